use std::sync::Arc;

use axum::{extract::{Query, State}, http::{header, StatusCode}, response::{IntoResponse, Response}, Form, Json};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::{
    app_state::AppState,
    auth::{create_jwt_token, RequestContext, SESSION_AUDIENCE, SESSION_COOKIE},
    database::random_string,
    error::{messages, AppError},
    mail::{is_valid_email, render_reset_message, Mail},
};

/// Length of the token mailed to users who forgot their password.
const RESET_UUID_LENGTH: usize = 32;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    principal: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    token: String,
    expires_in: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangePasswordForm {
    #[serde(default)]
    old_password: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForgotPasswordForm {
    #[serde(default)]
    email: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResetPasswordForm {
    #[serde(default)]
    reset_uuid: String,
    #[serde(default)]
    password: String,
}

fn redirect_found(location: &'static str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

pub async fn login_post(state: State<Arc<AppState>>, Form(form): Form<LoginForm>) -> Result<Response, AppError> {
    let user = match state.database.verify_user_login(&form.principal, &form.password).await? {
        Some(user) => user,
        None => {
            debug!("Failed login for '{}'", form.principal);
            return Err(AppError::Unauthorized(messages::INVALID_CREDENTIALS));
        }
    };

    let config = &state.config;
    let max_age = config.session.token_max_age;
    let token_info = create_jwt_token(&config.jwt_key, &config.url(), SESSION_AUDIENCE, &user.username, Duration::seconds(max_age as i64), vec![])?;
    info!("'{}' logged in", user.username);

    Ok((
        StatusCode::OK,
        [
            (header::SET_COOKIE, format!("{}={}; Max-Age={}; Path=/; HttpOnly", SESSION_COOKIE, token_info.token, max_age))
        ],
        Json(LoginResponse {
            token: token_info.token,
            expires_in: max_age,
        }),
    ).into_response())
}

pub async fn logout() -> Response {
    (
        StatusCode::FOUND,
        [
            (header::LOCATION, "/".to_string()),
            (header::SET_COOKIE, format!("{}=; Max-Age=0; Path=/; HttpOnly", SESSION_COOKIE)),
        ],
    ).into_response()
}

pub async fn change_password_page(ctx: RequestContext) -> Response {
    match ctx.user {
        Some(user) => Json(serde_json::json!({ "username": user.username })).into_response(),
        None => redirect_found("/signIn"),
    }
}

pub async fn change_password_post(ctx: RequestContext, state: State<Arc<AppState>>, Form(form): Form<ChangePasswordForm>) -> Result<Response, AppError> {
    let user_id = ctx.user_id()
        .ok_or(AppError::Unauthorized(messages::PLEASE_LOGIN_FIRST))?;

    if form.old_password.is_empty() {
        return Err(AppError::BadRequest(messages::OLD_PASSWORD_IS_BLANK));
    }

    let database = &state.database;
    if database.check_user_password(user_id, &form.old_password).await?.is_none() {
        return Err(AppError::Forbidden(messages::OLD_PASSWORD_IS_NOT_CORRECT));
    }

    if form.password.is_empty() {
        return Err(AppError::BadRequest(messages::PLEASE_INPUT_NEW_PASSWORD));
    }

    // re-verified against the stored hash, it may have changed since the check above
    if !database.change_user_password(user_id, &form.old_password, &form.password).await? {
        return Err(AppError::Forbidden(messages::OLD_PASSWORD_IS_NOT_CORRECT));
    }

    info!("'{}' changed their password", ctx.username());
    Ok(StatusCode::OK.into_response())
}

pub async fn forgot_password_post(state: State<Arc<AppState>>, Form(form): Form<ForgotPasswordForm>) -> Result<Response, AppError> {
    let email = form.email.trim();
    if !is_valid_email(email) {
        return Err(AppError::BadRequest(messages::EMAIL_CONTENT_ILLEGAL));
    }

    let database = &state.database;
    if !database.does_user_exist(email).await? {
        return Err(AppError::NotFound(messages::EMAIL_DOES_NOT_EXIST));
    }

    let reset_uuid = random_string(RESET_UUID_LENGTH);
    let user = database.set_user_reset_uuid(email, &reset_uuid).await?
        .ok_or(AppError::NotFound(messages::EMAIL_DOES_NOT_EXIST))?;

    let config = &state.config;
    let mail = Mail {
        from: config.mail.from.clone(),
        to: vec![user.email.clone()],
        subject: config.mail.reset_subject.clone(),
        message: render_reset_message(&config.mail.reset_hint, &config.url(), &reset_uuid),
    };

    if let Err(e) = state.mailer.send(mail).await {
        // a token nobody received must not stay usable
        if let Err(rollback) = database.clear_user_reset_uuid(user.user_id, &reset_uuid).await {
            error!("Failed to clear reset uuid of '{}': {}", user.username, rollback);
        }

        return Err(e.into());
    }

    info!("Sent password reset mail to '{}'", user.username);
    Ok(StatusCode::OK.into_response())
}

pub async fn reset_password_page(Query(params): Query<ResetPasswordForm>, state: State<Arc<AppState>>) -> Result<Response, AppError> {
    if params.reset_uuid.is_empty() {
        return Ok(redirect_found("/"));
    }

    match state.database.get_user_by_reset_uuid(&params.reset_uuid).await? {
        Some(_) => Ok(Json(serde_json::json!({ "reset_uuid": params.reset_uuid })).into_response()),
        None => {
            debug!("Unknown reset uuid, redirecting");
            Ok(redirect_found("/"))
        }
    }
}

pub async fn reset_password_post(state: State<Arc<AppState>>, Form(form): Form<ResetPasswordForm>) -> Result<Response, AppError> {
    if form.reset_uuid.is_empty() {
        return Err(AppError::BadRequest(messages::RESET_UUID_IS_BLANK));
    }

    let database = &state.database;
    let user = database.get_user_by_reset_uuid(&form.reset_uuid).await?
        .ok_or(AppError::BadRequest(messages::USER_DOES_NOT_EXIST))?;

    if form.password.is_empty() {
        return Err(AppError::BadRequest(messages::PASSWORD_IS_REQUIRED));
    }

    // only one of several concurrent resets with the same uuid gets through
    if !database.reset_user_password(&form.reset_uuid, &form.password).await? {
        return Err(AppError::BadRequest(messages::USER_DOES_NOT_EXIST));
    }

    info!("'{}' reset their password", user.username);
    Ok(StatusCode::OK.into_response())
}
