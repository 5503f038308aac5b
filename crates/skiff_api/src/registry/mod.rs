//! Client for the upstream Docker registry HTTP API.
//!
//! Every request carries a short-lived bearer token minted for the calling
//! user, so the registry decides what that user is allowed to read.

pub mod cache;

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{header, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::auth::create_jwt_token;
use crate::config::RegistryConfig;
use crate::dto::manifest::media_types;
use crate::dto::scope::Scope;


/// Lifetime of the tokens handed to the registry.
const REGISTRY_TOKEN_MAX_AGE: i64 = 300;

lazy_static! {
    static ref REPOSITORY_NAME_REGEX: Regex = Regex::new(
        r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*$"
    ).unwrap();
    static ref TAG_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").unwrap();
}

/// Check `name` against the registry's repository name grammar, e.g. `library/nginx`.
pub fn is_valid_repository_name(name: &str) -> bool {
    name.len() <= 255 && REPOSITORY_NAME_REGEX.is_match(name)
}

/// Check `tag` against the registry's tag grammar.
pub fn is_valid_tag(tag: &str) -> bool {
    TAG_REGEX.is_match(tag)
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("registry responded with {status} for {url}")]
    Status {
        status: StatusCode,
        url: String,
    },
    #[error("failed to create registry token: {0}")]
    Token(#[source] anyhow::Error),
    #[error("invalid catalog response: {0}")]
    Catalog(#[source] serde_json::Error),
}

/// Per-repository resources the console reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resource {
    Tags,
    Manifests,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Resource::Tags => write!(f, "tags"),
            Resource::Manifests => write!(f, "manifests"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    repositories: Vec<String>,
}

#[derive(Clone, Debug)]
struct TokenIssuer {
    secret: String,
    issuer: String,
    service: String,
}

#[derive(Clone, Debug)]
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
    token_issuer: Option<TokenIssuer>,
    catalog_page_size: u32,
}

impl RegistryClient {
    pub fn new(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .user_agent(format!("skiff-console/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let token_issuer = config.token_secret.as_ref().map(|secret| TokenIssuer {
            secret: secret.clone(),
            issuer: config.token_issuer.clone(),
            service: config.token_service.clone(),
        });

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            token_issuer,
            catalog_page_size: config.catalog_page_size.max(1),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `<registry>/v2/<repo_name>/<resource>/<reference>`
    pub fn build_url(&self, repo_name: &str, resource: Resource, reference: &str) -> String {
        format!("{}/v2/{}/{}/{}", self.base_url, repo_name, resource, reference)
    }

    /// GET a repository resource on behalf of `identity`, empty for anonymous.
    ///
    /// The minted token grants pull on `repo_name`, so callers must check read access first.
    /// Any failure, including a non 2xx status, is returned as an error. Nothing is retried.
    pub async fn fetch(&self, repo_name: &str, resource: Resource, reference: &str, identity: &str) -> Result<Bytes, RegistryError> {
        let url = self.build_url(repo_name, resource, reference);
        let accept: &[&str] = match resource {
            Resource::Manifests => &[media_types::MANIFEST_V1_SIGNED, media_types::MANIFEST_V1],
            Resource::Tags => &["application/json"],
        };

        self.get(&url, &[], Scope::repository_pull(repo_name), identity, accept).await
    }

    /// List every repository in the registry, following the catalog pagination.
    pub async fn catalog(&self, identity: &str) -> Result<Vec<String>, RegistryError> {
        let url = format!("{}/v2/_catalog", self.base_url);
        let page_size = self.catalog_page_size;

        let mut repositories = Vec::new();
        let mut last: Option<String> = None;
        loop {
            let mut query = vec![("n", page_size.to_string())];
            if let Some(last) = &last {
                query.push(("last", last.clone()));
            }

            let body = self.get(&url, &query, Scope::catalog(), identity, &["application/json"]).await?;
            let page: CatalogResponse = serde_json::from_slice(&body)
                .map_err(RegistryError::Catalog)?;

            let count = page.repositories.len();
            last = page.repositories.last().cloned();
            repositories.extend(page.repositories);

            if count < page_size as usize || last.is_none() {
                break;
            }
        }

        debug!("Listed {} repositories from the registry catalog", repositories.len());
        Ok(repositories)
    }

    async fn get(&self, url: &str, query: &[(&str, String)], scope: Scope, identity: &str, accept: &[&str]) -> Result<Bytes, RegistryError> {
        let mut request = self.http.get(url)
            .query(query)
            .header(header::ACCEPT, accept.join(", "));

        if let Some(issuer) = &self.token_issuer {
            let token = create_jwt_token(
                &issuer.secret,
                &issuer.issuer,
                &issuer.service,
                identity,
                chrono::Duration::seconds(REGISTRY_TOKEN_MAX_AGE),
                vec![scope],
            ).map_err(RegistryError::Token)?;

            request = request.bearer_auth(token.token);
        }

        debug!("GET {} as '{}'", url, identity);
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Status {
                status,
                url: url.to_string(),
            });
        }

        Ok(response.bytes().await?)
    }
}
