use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::{Rng, distr::Alphanumeric};
use sqlx::{Sqlite, Pool};
use thiserror::Error;
use tracing::debug;

use crate::dto::{Project, user::{ProjectRole, User}};

#[cfg(test)]
mod tests;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("password error: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),
    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

#[async_trait]
pub trait Database: Send + Sync {
    /// Create or upgrade the tables in the database
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Secret used to sign console session tokens, created on first use.
    async fn get_jwt_secret(&self) -> Result<String, DatabaseError>;

    // Project related functions

    /// Create a project. The owner becomes its project admin.
    async fn create_project(&self, name: &str, public: bool, owner_id: i64) -> Result<Project, DatabaseError>;
    async fn get_project_by_id(&self, project_id: i64) -> Result<Option<Project>, DatabaseError>;
    async fn get_project_by_name(&self, name: &str) -> Result<Option<Project>, DatabaseError>;
    async fn add_project_member(&self, project_id: i64, user_id: i64, role: ProjectRole) -> Result<(), DatabaseError>;
    async fn get_project_role(&self, project_id: i64, user_id: i64) -> Result<Option<ProjectRole>, DatabaseError>;

    // User related functions

    async fn create_user(&self, username: &str, email: &str, password: &str, sysadmin: bool) -> Result<User, DatabaseError>;
    async fn get_user_by_id(&self, user_id: i64) -> Result<Option<User>, DatabaseError>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, DatabaseError>;
    async fn get_user_by_reset_uuid(&self, reset_uuid: &str) -> Result<Option<User>, DatabaseError>;
    async fn does_user_exist(&self, email: &str) -> Result<bool, DatabaseError>;
    /// Find the user whose username or email is `principal` and whose password matches.
    async fn verify_user_login(&self, principal: &str, password: &str) -> Result<Option<User>, DatabaseError>;
    /// Returns the user if `password` is their current password.
    async fn check_user_password(&self, user_id: i64, password: &str) -> Result<Option<User>, DatabaseError>;
    /// Replace the password of a user, re-verifying `old_password` in the same transaction.
    ///
    /// Returns `false` without writing anything if the old password does not match,
    /// including when it was changed concurrently.
    async fn change_user_password(&self, user_id: i64, old_password: &str, new_password: &str) -> Result<bool, DatabaseError>;
    /// Store a reset uuid for the user owning `email`.
    async fn set_user_reset_uuid(&self, email: &str, reset_uuid: &str) -> Result<Option<User>, DatabaseError>;
    /// Remove `reset_uuid` from the user if it is still the one stored.
    async fn clear_user_reset_uuid(&self, user_id: i64, reset_uuid: &str) -> Result<bool, DatabaseError>;
    /// Set a new password for the holder of `reset_uuid` and invalidate the uuid.
    ///
    /// Returns `false` if no user holds the uuid. A uuid can only be consumed once.
    async fn reset_user_password(&self, reset_uuid: &str, new_password: &str) -> Result<bool, DatabaseError>;
}

type UserRow = (i64, String, String, bool, Option<String>);
type ProjectRow = (i64, String, bool, i64, i64);

const USER_COLUMNS: &str = "user_id, username, email, sysadmin, reset_uuid";
const PROJECT_COLUMNS: &str = "project_id, name, public, owner_id, creation_time";

fn user_from_row(row: UserRow) -> User {
    User::new(row.0, row.1, row.2, row.3, row.4)
}

fn project_from_row(row: ProjectRow) -> Project {
    let creation_time = DateTime::<Utc>::from_timestamp(row.4, 0).unwrap_or_default();
    Project::new(row.0, row.1, row.2, row.3, creation_time)
}

/// Random alphanumeric string from the thread-local CSPRNG.
pub fn random_string(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn hash_password(password: &str, salt: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(format!("{password}{salt}"), bcrypt::DEFAULT_COST)
}

fn verify_password(password: &str, salt: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    bcrypt::verify(format!("{password}{salt}"), hash)
}

#[async_trait]
impl Database for Pool<Sqlite> {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        sqlx::migrate!("migrations/sqlite").run(self).await?;
        debug!("Ran database migrations");

        Ok(())
    }

    async fn get_jwt_secret(&self) -> Result<String, DatabaseError> {
        let row: Option<(String, )> = sqlx::query_as("SELECT jwt_secret FROM skiff_meta WHERE id = (SELECT max(id) FROM skiff_meta)")
            .fetch_optional(self).await?;

        if let Some(row) = row {
            return Ok(row.0);
        }

        let jwt_sec = random_string(32);
        sqlx::query("INSERT INTO skiff_meta (jwt_secret) VALUES (?)")
            .bind(&jwt_sec)
            .execute(self).await?;
        debug!("Generated a new session token secret");

        Ok(jwt_sec)
    }

    async fn create_project(&self, name: &str, public: bool, owner_id: i64) -> Result<Project, DatabaseError> {
        let now = Utc::now().timestamp();

        let mut tx = self.begin().await?;
        let row: ProjectRow = sqlx::query_as(&format!("INSERT INTO projects (name, public, owner_id, creation_time) VALUES (?, ?, ?, ?) RETURNING {PROJECT_COLUMNS}"))
            .bind(name)
            .bind(public)
            .bind(owner_id)
            .bind(now)
            .fetch_one(&mut *tx).await?;

        sqlx::query("INSERT INTO project_members (project_id, user_id, role) VALUES (?, ?, ?)")
            .bind(row.0)
            .bind(owner_id)
            .bind(ProjectRole::ProjectAdmin as u32)
            .execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(project_from_row(row))
    }

    async fn get_project_by_id(&self, project_id: i64) -> Result<Option<Project>, DatabaseError> {
        let row: Option<ProjectRow> = sqlx::query_as(&format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE project_id = ?"))
            .bind(project_id)
            .fetch_optional(self).await?;

        Ok(row.map(project_from_row))
    }

    async fn get_project_by_name(&self, name: &str) -> Result<Option<Project>, DatabaseError> {
        let row: Option<ProjectRow> = sqlx::query_as(&format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE name = ?"))
            .bind(name)
            .fetch_optional(self).await?;

        Ok(row.map(project_from_row))
    }

    async fn add_project_member(&self, project_id: i64, user_id: i64, role: ProjectRole) -> Result<(), DatabaseError> {
        sqlx::query("INSERT INTO project_members (project_id, user_id, role) VALUES (?, ?, ?) \
                ON CONFLICT (project_id, user_id) DO UPDATE SET role = excluded.role")
            .bind(project_id)
            .bind(user_id)
            .bind(role as u32)
            .execute(self).await?;

        Ok(())
    }

    async fn get_project_role(&self, project_id: i64, user_id: i64) -> Result<Option<ProjectRole>, DatabaseError> {
        let row: (u32, ) = match sqlx::query_as("SELECT role FROM project_members WHERE project_id = ? AND user_id = ?")
                .bind(project_id)
                .bind(user_id)
                .fetch_one(self).await {
            Ok(row) => row,
            Err(e) => match e {
                sqlx::Error::RowNotFound => {
                    return Ok(None)
                },
                _ => {
                    return Err(e.into());
                }
            }
        };

        Ok(Some(ProjectRole::try_from(row.0)?))
    }

    async fn create_user(&self, username: &str, email: &str, password: &str, sysadmin: bool) -> Result<User, DatabaseError> {
        let username = username.to_lowercase();
        let email = email.to_lowercase();
        let salt = random_string(16);
        let password_hash = hash_password(password, &salt)?;

        let row: UserRow = sqlx::query_as(&format!("INSERT INTO users (username, email, password_hash, salt, sysadmin, creation_time) VALUES (?, ?, ?, ?, ?, ?) RETURNING {USER_COLUMNS}"))
            .bind(username)
            .bind(email)
            .bind(password_hash)
            .bind(salt)
            .bind(sysadmin)
            .bind(Utc::now().timestamp())
            .fetch_one(self).await?;

        Ok(user_from_row(row))
    }

    async fn get_user_by_id(&self, user_id: i64) -> Result<Option<User>, DatabaseError> {
        let row: Option<UserRow> = sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?"))
            .bind(user_id)
            .fetch_optional(self).await?;

        Ok(row.map(user_from_row))
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, DatabaseError> {
        let row: Option<UserRow> = sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?"))
            .bind(username.to_lowercase())
            .fetch_optional(self).await?;

        Ok(row.map(user_from_row))
    }

    async fn get_user_by_reset_uuid(&self, reset_uuid: &str) -> Result<Option<User>, DatabaseError> {
        let row: Option<UserRow> = sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE reset_uuid = ?"))
            .bind(reset_uuid)
            .fetch_optional(self).await?;

        Ok(row.map(user_from_row))
    }

    async fn does_user_exist(&self, email: &str) -> Result<bool, DatabaseError> {
        let row: (i64, ) = sqlx::query_as("SELECT COUNT(1) FROM users WHERE email = ?")
            .bind(email.to_lowercase())
            .fetch_one(self).await?;

        Ok(row.0 > 0)
    }

    async fn verify_user_login(&self, principal: &str, password: &str) -> Result<Option<User>, DatabaseError> {
        let principal = principal.to_lowercase();

        let row: Option<(i64, String, String)> = sqlx::query_as("SELECT user_id, password_hash, salt FROM users WHERE username = ? OR email = ?")
            .bind(&principal)
            .bind(&principal)
            .fetch_optional(self).await?;

        match row {
            Some((user_id, hash, salt)) if verify_password(password, &salt, &hash)? => {
                self.get_user_by_id(user_id).await
            },
            _ => Ok(None),
        }
    }

    async fn check_user_password(&self, user_id: i64, password: &str) -> Result<Option<User>, DatabaseError> {
        let row: Option<(String, String)> = sqlx::query_as("SELECT password_hash, salt FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(self).await?;

        match row {
            Some((hash, salt)) if verify_password(password, &salt, &hash)? => {
                self.get_user_by_id(user_id).await
            },
            _ => Ok(None),
        }
    }

    async fn change_user_password(&self, user_id: i64, old_password: &str, new_password: &str) -> Result<bool, DatabaseError> {
        let mut tx = self.begin().await?;

        let row: Option<(String, String)> = sqlx::query_as("SELECT password_hash, salt FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&mut *tx).await?;

        let (old_hash, old_salt) = match row {
            Some(row) => row,
            None => return Ok(false),
        };

        if !verify_password(old_password, &old_salt, &old_hash)? {
            return Ok(false);
        }

        let salt = random_string(16);
        let password_hash = hash_password(new_password, &salt)?;

        // the hash comparison makes this a compare-and-swap against concurrent changes
        let result = sqlx::query("UPDATE users SET password_hash = ?, salt = ? WHERE user_id = ? AND password_hash = ?")
            .bind(password_hash)
            .bind(salt)
            .bind(user_id)
            .bind(old_hash)
            .execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_user_reset_uuid(&self, email: &str, reset_uuid: &str) -> Result<Option<User>, DatabaseError> {
        let row: Option<UserRow> = sqlx::query_as(&format!("UPDATE users SET reset_uuid = ? WHERE email = ? RETURNING {USER_COLUMNS}"))
            .bind(reset_uuid)
            .bind(email.to_lowercase())
            .fetch_optional(self).await?;

        Ok(row.map(user_from_row))
    }

    async fn clear_user_reset_uuid(&self, user_id: i64, reset_uuid: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE users SET reset_uuid = NULL WHERE user_id = ? AND reset_uuid = ?")
            .bind(user_id)
            .bind(reset_uuid)
            .execute(self).await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reset_user_password(&self, reset_uuid: &str, new_password: &str) -> Result<bool, DatabaseError> {
        let salt = random_string(16);
        let password_hash = hash_password(new_password, &salt)?;

        let result = sqlx::query("UPDATE users SET password_hash = ?, salt = ?, reset_uuid = NULL WHERE reset_uuid = ?")
            .bind(password_hash)
            .bind(salt)
            .bind(reset_uuid)
            .execute(self).await?;

        Ok(result.rows_affected() == 1)
    }
}
