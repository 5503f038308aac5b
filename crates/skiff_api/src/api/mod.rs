use std::sync::Arc;

use axum::{routing, Router};
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub mod account;
pub mod repository;

/// All routes of the console API.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", Router::new()
            .route("/repositories", routing::get(repository::list_repositories))
            .route("/repositories/tags", routing::get(repository::list_tags))
            .route("/repositories/manifests", routing::get(repository::get_manifest))
        )
        .route("/login", routing::post(account::login_post))
        .route("/logout", routing::get(account::logout))
        .route("/changePassword", routing::get(account::change_password_page)
            .post(account::change_password_post))
        .route("/forgotPassword", routing::post(account::forgot_password_post))
        .route("/resetPassword", routing::get(account::reset_password_page)
            .post(account::reset_password_post))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
