use std::sync::Arc;

use axum::{extract::{Query, State}, response::{IntoResponse, Response}, Json};
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use crate::{
    app_state::AppState,
    auth::{check_project_permission, RequestContext},
    dto::{manifest::{decode_manifest, decode_tags}, Project},
    error::{messages, AppError},
    registry::{is_valid_repository_name, is_valid_tag, Resource},
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListRepositoriesParams {
    project_id: Option<String>,
    #[serde(default)]
    q: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagsParams {
    #[serde(default)]
    repo_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestParams {
    #[serde(default)]
    repo_name: String,
    #[serde(default)]
    tag: String,
}

/// Keep the repositories of project `project_name` whose image name contains `query`.
///
/// The project of `a/b/c` is `a/b`. Names without a `/` belong to no project.
/// With both filters empty the whole list is returned. Order is preserved.
pub fn filter_repositories(repositories: &[String], project_name: &str, query: &str) -> Vec<String> {
    if project_name.is_empty() && query.is_empty() {
        return repositories.to_vec();
    }

    repositories.iter()
        .filter(|repo| match repo.rsplit_once('/') {
            Some((project, image)) => project == project_name && image.contains(query),
            None => false,
        })
        .cloned()
        .collect()
}

async fn ensure_project_readable(state: &AppState, ctx: &RequestContext, project: &Project) -> Result<(), AppError> {
    if !project.public && !check_project_permission(state.database.as_ref(), ctx, project).await? {
        debug!("'{}' may not read the repositories of '{}'", ctx.username(), project.name);
        return Err(AppError::Forbidden(messages::PERMISSION_DENIED));
    }

    Ok(())
}

/// Check that the caller may read `repo_name`, before any registry token is minted for it.
async fn ensure_repository_readable(state: &AppState, ctx: &RequestContext, repo_name: &str) -> Result<(), AppError> {
    let project_name = repo_name.rsplit_once('/')
        .map(|(project, _)| project)
        .ok_or(AppError::NotFound(messages::PROJECT_NOT_FOUND))?;

    let project = state.database.get_project_by_name(project_name).await?
        .ok_or(AppError::NotFound(messages::PROJECT_NOT_FOUND))?;

    ensure_project_readable(state, ctx, &project).await
}

fn check_repo_name(repo_name: &str) -> Result<(), AppError> {
    if repo_name.is_empty() {
        return Err(AppError::BadRequest(messages::REPO_NAME_IS_REQUIRED));
    }
    if !is_valid_repository_name(repo_name) {
        return Err(AppError::BadRequest(messages::INVALID_REPO_NAME));
    }

    Ok(())
}

pub async fn list_repositories(ctx: RequestContext, Query(params): Query<ListRepositoriesParams>, state: State<Arc<AppState>>) -> Result<Response, AppError> {
    let project_id: i64 = params.project_id.as_deref()
        .unwrap_or_default()
        .trim()
        .parse()
        .map_err(|_| AppError::BadRequest(messages::INVALID_PROJECT_ID))?;

    let database = &state.database;
    let project = database.get_project_by_id(project_id).await?
        .ok_or(AppError::NotFound(messages::PROJECT_NOT_FOUND))?;

    ensure_project_readable(&state, &ctx, &project).await?;

    let registry = &state.config.registry;
    let snapshot = state.repositories.get_or_refresh(&state.registry, &registry.catalog_account).await?;

    let repositories = filter_repositories(&snapshot, &project.name, params.q.trim());
    Ok(Json(repositories).into_response())
}

pub async fn list_tags(ctx: RequestContext, Query(params): Query<TagsParams>, state: State<Arc<AppState>>) -> Result<Response, AppError> {
    check_repo_name(&params.repo_name)?;
    ensure_repository_readable(&state, &ctx, &params.repo_name).await?;

    let body = state.registry.fetch(&params.repo_name, Resource::Tags, "list", ctx.username()).await?;

    Ok(Json(decode_tags(&body)).into_response())
}

pub async fn get_manifest(ctx: RequestContext, Query(params): Query<ManifestParams>, state: State<Arc<AppState>>) -> Result<Response, AppError> {
    check_repo_name(&params.repo_name)?;
    if params.tag.is_empty() {
        return Err(AppError::BadRequest(messages::TAG_IS_REQUIRED));
    }
    if !is_valid_tag(&params.tag) {
        return Err(AppError::BadRequest(messages::INVALID_TAG));
    }
    ensure_repository_readable(&state, &ctx, &params.repo_name).await?;

    let body = state.registry.fetch(&params.repo_name, Resource::Manifests, &params.tag, ctx.username()).await?;
    let item = decode_manifest(&body, Utc::now())?;

    Ok(Json(item).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repos(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn project_filter_keeps_cache_order() {
        let cache = repos(&["library/nginx", "library/busybox", "other/x"]);
        assert_eq!(filter_repositories(&cache, "library", ""), vec!["library/nginx", "library/busybox"]);
    }

    #[test]
    fn query_matches_image_name_within_project() {
        let cache = repos(&["library/nginx", "library/nginx-alpine", "library/busybox", "other/nginx"]);
        assert_eq!(filter_repositories(&cache, "library", "nginx"), vec!["library/nginx", "library/nginx-alpine"]);
    }

    #[test]
    fn query_without_project_matches_nothing() {
        let cache = repos(&["library/nginx", "library/busybox", "other/x"]);
        assert!(filter_repositories(&cache, "", "nginx").is_empty());
    }

    #[test]
    fn no_filters_returns_everything() {
        let cache = repos(&["library/nginx", "toplevel", "library/nginx"]);
        assert_eq!(filter_repositories(&cache, "", ""), cache);
    }

    #[test]
    fn nested_names_belong_to_their_full_prefix() {
        let cache = repos(&["team/app/api", "team/web", "team/app"]);

        assert_eq!(filter_repositories(&cache, "team", ""), vec!["team/web", "team/app"]);
        assert_eq!(filter_repositories(&cache, "team/app", ""), vec!["team/app/api"]);
    }

    #[test]
    fn names_without_slash_never_match_a_project() {
        let cache = repos(&["nginx", "library", "library/nginx"]);

        for project in ["library", "nginx", "lib"] {
            for query in ["", "nginx", "x"] {
                let found = filter_repositories(&cache, project, query);
                assert!(found.iter().all(|r| r.contains('/')), "{project:?} {query:?} -> {found:?}");
            }
        }
    }

    #[test]
    fn query_results_are_a_subset_of_project_results() {
        let cache = repos(&["a/nginx", "a/redis", "a/b/nginx", "b/nginx", "nginx", "a/ngx"]);

        for project in ["a", "a/b", "b", "c"] {
            let by_project = filter_repositories(&cache, project, "");
            assert!(by_project.iter().all(|r| r.rsplit_once('/').map(|(p, _)| p) == Some(project)));

            for query in ["nginx", "ng", "x", "redis"] {
                let by_query = filter_repositories(&cache, project, query);
                assert!(by_query.iter().all(|r| by_project.contains(r)), "{project:?} {query:?}");
            }
        }
    }
}
