use chrono::{DateTime, Utc};
use serde::Serialize;

pub mod manifest;
pub mod scope;
pub mod user;

/// A namespace grouping repositories named `<project>/<image>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Project {
    pub project_id: i64,
    pub name: String,
    pub public: bool,
    pub owner_id: i64,
    pub creation_time: DateTime<Utc>,
}

impl Project {
    pub fn new(project_id: i64, name: String, public: bool, owner_id: i64, creation_time: DateTime<Utc>) -> Self {
        Self {
            project_id,
            name,
            public,
            owner_id,
            creation_time,
        }
    }
}
