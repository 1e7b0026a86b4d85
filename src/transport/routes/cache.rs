use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
    cache::{CacheManager, SyncReport},
    common::ApiError,
    server::AppState,
};

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct CacheRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct UrlSetRequest {
    pub urls: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedMedia {
    pub url: String,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    /// `stagecache://{filename}` playback address for the local copy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl CachedMedia {
    fn hit(url: String, path: &Path) -> Self {
        Self {
            cached: true,
            local_path: Some(path.display().to_string()),
            address: CacheManager::media_address(path),
            url,
        }
    }

    fn miss(url: String) -> Self {
        Self {
            url,
            cached: false,
            local_path: None,
            address: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictReport {
    pub evicted: usize,
}

/// GET /v1/lookup?url=... — availability check, never downloads.
pub async fn lookup(
    Query(query): Query<LookupQuery>,
    State(state): State<Arc<AppState>>,
) -> Json<CachedMedia> {
    tracing::debug!("GET /v1/lookup: {}", query.url);

    match state.cache.lookup(&query.url) {
        Some(path) => Json(CachedMedia::hit(query.url, &path)),
        None => Json(CachedMedia::miss(query.url)),
    }
}

/// POST /v1/cache {url} — mirror one URL, downloading it if needed.
///
/// A not-cacheable URL or an upstream 404 is a normal `cached: false`
/// response; the caller keeps streaming from the original URL. Only
/// genuine transport failures become a 500.
pub async fn ensure(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CacheRequest>,
) -> Response {
    tracing::debug!("POST /v1/cache: {}", req.url);

    match state.cache.ensure_cached(&req.url).await {
        Ok(Some(path)) => Json(CachedMedia::hit(req.url, &path)).into_response(),
        Ok(None) => Json(CachedMedia::miss(req.url)).into_response(),
        Err(e) => {
            error!("Failed to mirror {}: {}", req.url, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::internal(
                    format!("Failed to mirror {}: {}", req.url, e),
                    "/v1/cache",
                )),
            )
                .into_response()
        }
    }
}

/// POST /v1/sync {urls} — mirror the full usage set, then evict everything
/// it no longer references.
pub async fn sync(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UrlSetRequest>,
) -> Json<SyncReport> {
    info!("POST /v1/sync: {} urls", req.urls.len());
    Json(state.cache.sync(&req.urls).await)
}

/// POST /v1/evict {urls} — evict every entry not referenced by `urls`.
pub async fn evict(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UrlSetRequest>,
) -> Json<EvictReport> {
    info!("POST /v1/evict: keeping {} urls", req.urls.len());

    let used_keys: HashSet<String> = req
        .urls
        .iter()
        .filter_map(|u| state.cache.normalize(u))
        .map(|n| n.cache_key)
        .collect();

    Json(EvictReport {
        evicted: state.cache.evict_unused(&used_keys),
    })
}

/// GET /version
pub async fn get_version() -> String {
    tracing::debug!("GET /version");
    env!("CARGO_PKG_VERSION").to_string()
}
