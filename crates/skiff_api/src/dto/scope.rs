use serde::{Deserialize, Serialize};

use std::fmt;

/// Resource type of a registry token scope.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScopeType {
    #[serde(rename = "repository")]
    Repository,
    #[serde(rename = "registry")]
    Registry,
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ScopeType::Repository => write!(f, "repository"),
            ScopeType::Registry => write!(f, "registry"),
        }
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Action {
    #[serde(rename = "pull")]
    Pull,
    #[serde(rename = "*")]
    All,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Action::Pull => write!(f, "pull"),
            Action::All => write!(f, "*"),
        }
    }
}

/// One entry of the `access` claim of a registry bearer token,
/// e.g. `repository:library/nginx:pull`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scope {
    #[serde(rename = "type")]
    pub scope_type: ScopeType,
    pub name: String,
    pub actions: Vec<Action>,
}

impl Scope {
    pub fn new(scope_type: ScopeType, name: String, actions: &[Action]) -> Self {
        Self {
            scope_type,
            name,
            actions: actions.to_vec(),
        }
    }

    /// Read-only access to one repository.
    pub fn repository_pull(name: &str) -> Self {
        Self::new(ScopeType::Repository, name.to_string(), &[Action::Pull])
    }

    /// Access to the `/v2/_catalog` endpoint.
    pub fn catalog() -> Self {
        Self::new(ScopeType::Registry, "catalog".to_string(), &[Action::All])
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let actions = self.actions
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<String>>()
            .join(",");

        write!(f, "{}:{}:{}", self.scope_type, self.name, actions)
    }
}
