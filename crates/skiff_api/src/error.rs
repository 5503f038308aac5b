use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use tracing::{debug, error};

use crate::{database::DatabaseError, dto::manifest::ManifestDecodeError, mail::MailError, registry::RegistryError};

/// Machine readable keys sent as the error message, for the UI to translate.
pub mod messages {
    pub const PLEASE_LOGIN_FIRST: &str = "please_login_first";
    pub const OLD_PASSWORD_IS_BLANK: &str = "old_password_is_blank";
    pub const OLD_PASSWORD_IS_NOT_CORRECT: &str = "old_password_is_not_correct";
    pub const PLEASE_INPUT_NEW_PASSWORD: &str = "please_input_new_password";
    pub const EMAIL_CONTENT_ILLEGAL: &str = "email_content_illegal";
    pub const EMAIL_DOES_NOT_EXIST: &str = "email_does_not_exist";
    pub const SEND_EMAIL_FAILED: &str = "send_email_failed";
    pub const RESET_UUID_IS_BLANK: &str = "reset_uuid_is_blank";
    pub const USER_DOES_NOT_EXIST: &str = "user_does_not_exist";
    pub const PASSWORD_IS_REQUIRED: &str = "password_is_required";
    pub const INVALID_CREDENTIALS: &str = "invalid_credentials";
    pub const INVALID_PROJECT_ID: &str = "invalid_project_id";
    pub const PROJECT_NOT_FOUND: &str = "project_not_found";
    pub const PERMISSION_DENIED: &str = "permission_denied";
    pub const REPO_NAME_IS_REQUIRED: &str = "repo_name_is_required";
    pub const TAG_IS_REQUIRED: &str = "tag_is_required";
    pub const INVALID_REPO_NAME: &str = "invalid_repo_name";
    pub const INVALID_TAG: &str = "invalid_tag";
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(&'static str),
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error("{0}")]
    Registry(#[from] RegistryError),
    #[error("{0}")]
    Decode(#[from] ManifestDecodeError),
    #[error("{0}")]
    Mail(#[from] MailError),
    #[error("{0}")]
    Database(#[from] DatabaseError),
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Upstream,
    Decode,
    Internal,
}

#[derive(Debug, Serialize)]
pub struct ErrorMessage {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorsMessage {
    pub errors: Vec<ErrorMessage>,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::BadRequest(_) => ErrorCode::BadRequest,
            AppError::Unauthorized(_) => ErrorCode::Unauthorized,
            AppError::Forbidden(_) => ErrorCode::Forbidden,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::Registry(_) => ErrorCode::Upstream,
            AppError::Decode(_) => ErrorCode::Decode,
            AppError::Mail(_) | AppError::Database(_) | AppError::Other(_) => ErrorCode::Internal,
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::BadRequest(key)
            | AppError::Unauthorized(key)
            | AppError::Forbidden(key)
            | AppError::NotFound(key) => key.to_string(),
            AppError::Mail(_) => messages::SEND_EMAIL_FAILED.to_string(),
            other => other.to_string(),
        }
    }
}

// Tell axum how to convert `AppError` into a response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            debug!("Rejected request: {}", self);
        }

        let body = ErrorsMessage {
            errors: vec![ErrorMessage {
                code: self.code(),
                message: self.message(),
            }],
        };

        (status, Json(body)).into_response()
    }
}
