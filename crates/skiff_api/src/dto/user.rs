use anyhow::anyhow;
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::scope::Scope;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct User {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub sysadmin: bool,
    #[serde(skip)]
    pub reset_uuid: Option<String>,
}

impl User {
    pub fn new(user_id: i64, username: String, email: String, sysadmin: bool, reset_uuid: Option<String>) -> Self {
        Self {
            user_id,
            username,
            email,
            sysadmin,
            reset_uuid,
        }
    }
}

/// Claims of a JWT. Used both for console session tokens and for the bearer
/// tokens presented to the upstream registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    #[serde(rename = "iss")]
    pub issuer: String,

    #[serde(rename = "sub")]
    pub subject: String,

    #[serde(rename = "aud")]
    pub audience: String,

    #[serde(rename = "exp")]
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expiration: DateTime<Utc>,

    #[serde(rename = "nbf")]
    #[serde(with = "chrono::serde::ts_seconds")]
    pub not_before: DateTime<Utc>,

    #[serde(rename = "iat")]
    #[serde(with = "chrono::serde::ts_seconds")]
    pub issued_at: DateTime<Utc>,

    #[serde(rename = "jti")]
    pub jwt_id: String,

    #[serde(default)]
    pub access: Vec<Scope>,
}

impl AuthToken {
    pub fn new(issuer: String, subject: String, audience: String, expiration: DateTime<Utc>, not_before: DateTime<Utc>, issued_at: DateTime<Utc>, jwt_id: String, access: Vec<Scope>) -> Self {
        Self {
            issuer,
            subject,
            audience,
            expiration,
            not_before,
            issued_at,
            jwt_id,
            access
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TokenInfo {
    pub token: String,
    pub expiry: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TokenInfo {
    pub fn new(token: String, expiry: DateTime<Utc>, created_at: DateTime<Utc>) -> Self {
        Self {
            token,
            expiry,
            created_at
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Permission: u32 {
        const NONE = 0b000;
        const PULL = 0b001;
        const PUSH = 0b011;
        const ADMIN = 0b111;
    }
}

/// Role of a user inside a project.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProjectRole {
    ProjectAdmin = 1,
    Developer = 2,
    Guest = 3,
}

impl ProjectRole {
    pub fn permissions(&self) -> Permission {
        match self {
            ProjectRole::ProjectAdmin => Permission::ADMIN,
            ProjectRole::Developer => Permission::PUSH,
            ProjectRole::Guest => Permission::PULL,
        }
    }

    pub fn has_permission(&self, perm: Permission) -> bool {
        self.permissions().contains(perm)
    }
}

impl TryFrom<u32> for ProjectRole {
    type Error = anyhow::Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::ProjectAdmin),
            2 => Ok(Self::Developer),
            3 => Ok(Self::Guest),
            _ => Err(anyhow!("Invalid value for ProjectRole: `{}`", value)),
        }
    }
}

impl TryFrom<&str> for ProjectRole {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "admin" | "project_admin" => Ok(Self::ProjectAdmin),
            "developer" => Ok(Self::Developer),
            "guest" => Ok(Self::Guest),
            _ => Err(anyhow!("Unknown project role '{}'!", value)),
        }
    }
}
