use std::sync::Arc;

use axum::{extract::FromRequestParts, http::{header, request::Parts}};
use chrono::Duration;
use hmac::{Hmac, digest::KeyInit};
use jwt::{SignWithKey, VerifyWithKey};
use sha2::Sha256;
use tracing::debug;

use crate::{app_state::AppState, database::Database, dto::{Project, scope::Scope, user::{AuthToken, Permission, TokenInfo, User}}, error::AppError};

/// Name of the cookie holding a console session token.
pub const SESSION_COOKIE: &str = "TOKEN";

/// Audience of console session tokens.
pub const SESSION_AUDIENCE: &str = "skiff-console";

/// Sign a token for `subject` with an HS256 key.
///
/// An empty `subject` stands for an anonymous caller.
pub fn create_jwt_token(key: &str, issuer: &str, audience: &str, subject: &str, max_age: Duration, access: Vec<Scope>) -> anyhow::Result<TokenInfo> {
    let key: Hmac<Sha256> = Hmac::new_from_slice(key.as_bytes())?;

    let now = chrono::offset::Utc::now();
    let expiration = now + max_age;

    let token = AuthToken::new(
        issuer.to_string(),
        subject.to_string(),
        audience.to_string(),
        expiration,
        now,
        now,
        uuid::Uuid::new_v4().to_string(),
        access,
    );

    let token_str = token.sign_with_key(&key)?;
    Ok(TokenInfo::new(token_str, expiration, now))
}

/// Verify the signature, audience and lifetime of a token.
pub fn verify_jwt_token(key: &str, audience: &str, token: &str) -> Option<AuthToken> {
    let key: Hmac<Sha256> = Hmac::new_from_slice(key.as_bytes()).ok()?;

    let claims: AuthToken = match VerifyWithKey::<AuthToken>::verify_with_key(token, &key) {
        Ok(claims) => claims,
        Err(e) => {
            debug!("Failure to verify token: '{}'", e);
            return None;
        }
    };

    let now = chrono::offset::Utc::now();
    if claims.audience != audience || claims.expiration <= now || claims.not_before > now {
        debug!("Token is expired or not meant for '{}'", audience);
        return None;
    }

    Some(claims)
}

/// Identity of the caller of one request.
///
/// Built from a session token in the `Authorization: Bearer` header or the
/// session cookie. A missing or invalid token gives an anonymous context.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestContext {
    pub user: Option<User>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self { user: None }
    }

    pub fn authenticated(user: User) -> Self {
        Self { user: Some(user) }
    }

    /// Name the registry sees for this caller, empty when anonymous.
    pub fn username(&self) -> &str {
        self.user.as_ref().map(|u| u.username.as_str()).unwrap_or("")
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user.as_ref().map(|u| u.user_id)
    }
}

/// Pull the session token out of the request headers.
fn session_token(parts: &Parts) -> Option<String> {
    if let Some(auth) = parts.headers.get(header::AUTHORIZATION).and_then(|h| h.to_str().ok()) {
        if let Some(("Bearer", token)) = auth.split_once(' ') {
            return Some(token.trim().to_string());
        }
    }

    parts.headers.get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|c| c.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|v| !v.is_empty())
}

impl FromRequestParts<Arc<AppState>> for RequestContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = match session_token(parts) {
            Some(token) => token,
            None => return Ok(RequestContext::anonymous()),
        };

        let claims = match verify_jwt_token(&state.config.jwt_key, SESSION_AUDIENCE, &token) {
            Some(claims) => claims,
            None => return Ok(RequestContext::anonymous()),
        };

        match state.database.get_user_by_username(&claims.subject).await? {
            Some(user) => Ok(RequestContext::authenticated(user)),
            None => {
                debug!("failure to get user from token: {:?}", claims);
                Ok(RequestContext::anonymous())
            }
        }
    }
}

/// Check if the caller may read the repositories of a private project.
///
/// System admins can read every project, other users need a role granting `PULL`.
pub async fn check_project_permission(database: &dyn Database, ctx: &RequestContext, project: &Project) -> Result<bool, AppError> {
    let user = match &ctx.user {
        Some(user) => user,
        None => return Ok(false),
    };

    if user.sysadmin {
        return Ok(true);
    }

    Ok(database.get_project_role(project.project_id, user.user_id).await?
        .map(|role| role.has_permission(Permission::PULL))
        .unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn parts_with(name: header::HeaderName, value: &str) -> Parts {
        let (parts, _) = Request::builder()
            .header(name, value)
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn signed_token_verifies() {
        let info = create_jwt_token("secret", "skiff", SESSION_AUDIENCE, "alice", Duration::minutes(5), vec![]).unwrap();
        let claims = verify_jwt_token("secret", SESSION_AUDIENCE, &info.token).unwrap();

        assert_eq!(claims.subject, "alice");
        assert_eq!(claims.issuer, "skiff");
        assert_eq!(claims.expiration.timestamp(), info.expiry.timestamp());
    }

    #[test]
    fn token_with_other_key_is_rejected() {
        let info = create_jwt_token("secret", "skiff", SESSION_AUDIENCE, "alice", Duration::minutes(5), vec![]).unwrap();
        assert!(verify_jwt_token("other", SESSION_AUDIENCE, &info.token).is_none());
    }

    #[test]
    fn token_for_other_audience_is_rejected() {
        let info = create_jwt_token("secret", "skiff", "registry", "alice", Duration::minutes(5), vec![]).unwrap();
        assert!(verify_jwt_token("secret", SESSION_AUDIENCE, &info.token).is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let info = create_jwt_token("secret", "skiff", SESSION_AUDIENCE, "alice", Duration::minutes(-1), vec![]).unwrap();
        assert!(verify_jwt_token("secret", SESSION_AUDIENCE, &info.token).is_none());
    }

    #[test]
    fn token_is_read_from_bearer_header() {
        let parts = parts_with(header::AUTHORIZATION, "Bearer abc.def.ghi");
        assert_eq!(session_token(&parts).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn token_is_read_from_cookie() {
        let parts = parts_with(header::COOKIE, "lang=en; TOKEN=abc.def.ghi; theme=dark");
        assert_eq!(session_token(&parts).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn basic_auth_and_empty_cookie_are_ignored() {
        assert!(session_token(&parts_with(header::AUTHORIZATION, "Basic YWxpY2U6cHc=")).is_none());
        assert!(session_token(&parts_with(header::COOKIE, "TOKEN=")).is_none());
    }

    #[test]
    fn anonymous_context_has_empty_username() {
        assert_eq!(RequestContext::anonymous().username(), "");
        assert_eq!(RequestContext::anonymous().user_id(), None);
    }
}
