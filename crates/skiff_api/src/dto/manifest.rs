use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Constants for the media types the console asks the registry for.
pub mod media_types {
    pub const MANIFEST_V1_SIGNED: &'static str = "application/vnd.docker.distribution.manifest.v1+prettyjws";
    pub const MANIFEST_V1: &'static str = "application/vnd.docker.distribution.manifest.v1+json";
}

/// Body of `GET /v2/<name>/tags/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagList {
    #[serde(default)]
    pub name: String,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryItem {
    #[serde(rename = "v1Compatibility")]
    pub v1_compatibility: String,
}

/// A schema 1 image manifest.
/// https://github.com/distribution/distribution/blob/main/docs/content/spec/deprecated-schema-v1.md
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestV1 {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub architecture: String,
    pub schema_version: u32,
    #[serde(default)]
    pub history: Vec<HistoryItem>,
}

/// Display record built from the newest history entry of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoItem {
    #[serde(rename(serialize = "Id", deserialize = "id"), default)]
    pub id: String,
    #[serde(rename(serialize = "Parent", deserialize = "parent"), default)]
    pub parent: String,
    /// The unix epoch when the entry carries no creation time.
    #[serde(rename(serialize = "Created", deserialize = "created"), default)]
    pub created: DateTime<Utc>,
    #[serde(rename(serialize = "CreatedStr", deserialize = "created_str"), default)]
    pub created_str: String,
    #[serde(rename(serialize = "DurationDays", deserialize = "duration_days"), default)]
    pub duration_days: String,
    #[serde(rename(serialize = "Author", deserialize = "author"), default)]
    pub author: String,
    #[serde(rename(serialize = "Architecture", deserialize = "architecture"), default)]
    pub architecture: String,
    #[serde(rename(serialize = "DockerVersion", deserialize = "docker_version"), default)]
    pub docker_version: String,
    #[serde(rename(serialize = "OS", deserialize = "os"), default)]
    pub os: String,
}

#[derive(Debug, Error)]
pub enum ManifestDecodeError {
    #[error("failed to decode manifest: {0}")]
    Manifest(#[source] serde_json::Error),
    #[error("manifest has no history entries")]
    EmptyHistory,
    #[error("failed to decode v1Compatibility: {0}")]
    V1Compatibility(#[source] serde_json::Error),
}

/// Decode the tags of a `tags/list` response.
///
/// An undecodable body or a `null` tag list is treated as no tags.
pub fn decode_tags(body: &[u8]) -> Vec<String> {
    match serde_json::from_slice::<TagList>(body) {
        Ok(list) => list.tags.unwrap_or_default(),
        Err(e) => {
            tracing::warn!("Failed to decode tag list, treating it as empty: {}", e);
            Vec::new()
        }
    }
}

/// Decode a schema 1 manifest into the display record of its first history entry.
///
/// `now` is the instant the age of the image is measured against.
pub fn decode_manifest(body: &[u8], now: DateTime<Utc>) -> Result<RepoItem, ManifestDecodeError> {
    let manifest: ManifestV1 = serde_json::from_slice(body)
        .map_err(ManifestDecodeError::Manifest)?;

    let first = manifest.history.first()
        .ok_or(ManifestDecodeError::EmptyHistory)?;

    let mut item: RepoItem = serde_json::from_str(&first.v1_compatibility)
        .map_err(ManifestDecodeError::V1Compatibility)?;

    item.created_str = format_created(&item.created);
    item.duration_days = age_in_days(&item.created, now);

    Ok(item)
}

pub fn format_created(created: &DateTime<Utc>) -> String {
    created.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Whole days between `created` and `now`, rendered as `"<n> days"`.
///
/// A `created` in the future counts as `"0 days"`.
pub fn age_in_days(created: &DateTime<Utc>, now: DateTime<Utc>) -> String {
    let hours = now.signed_duration_since(*created).num_hours().max(0);
    format!("{} days", hours / 24)
}
