use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::{
    server::AppState,
    transport::{
        middleware::add_response_headers,
        routes::{cache, media},
    },
};

const API_V1: &str = "/v1";

pub fn router(state: Arc<AppState>) -> Router {
    let v1_routes = Router::new()
        .route("/lookup", get(cache::lookup))
        .route("/cache", post(cache::ensure))
        .route("/sync", post(cache::sync))
        .route("/evict", post(cache::evict));

    Router::new()
        .nest(API_V1, v1_routes)
        .route("/version", get(cache::get_version))
        .route("/media/{filename}", get(media::serve_media))
        .layer(middleware::from_fn(add_response_headers))
        .with_state(state)
}
