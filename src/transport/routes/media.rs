use std::io::SeekFrom;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

use crate::{common::ApiError, server::AppState};

const PATH: &str = "/media";
const MEDIA_CONTENT_TYPE: &str = "video/mp4";

/// GET /media/{filename}
///
/// Serves a cached file with byte-range semantics: 200 with the whole file
/// when no `Range` header is present, 206 with exactly the requested span
/// otherwise. The body is a stream over a seeked, length-limited file
/// handle; if the player disconnects mid-stream the handle is dropped and
/// closed with it.
pub async fn serve_media(
    Path(filename): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(path) = state.cache.resolve_media(&filename) else {
        return not_found(&filename);
    };

    let meta = match tokio::fs::metadata(&path).await {
        Ok(m) if m.is_file() => m,
        _ => return not_found(&filename),
    };
    let size = meta.len();

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| parse_range(raw, size));

    debug!(
        "GET {}/{} ({} bytes, range: {:?})",
        PATH, filename, size, range
    );

    let mut file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) => {
            error!("Failed to open cached file {}: {}", path.display(), e);
            return internal(&filename);
        }
    };

    let result = match range {
        Some((start, end)) => {
            if let Err(e) = file.seek(SeekFrom::Start(start)).await {
                error!("Failed to seek {} to {}: {}", path.display(), start, e);
                return internal(&filename);
            }

            let len = end - start + 1;
            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, MEDIA_CONTENT_TYPE)
                .header(header::CONTENT_LENGTH, len)
                .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{size}"))
                .header(header::ACCEPT_RANGES, "bytes")
                .body(Body::from_stream(ReaderStream::new(file.take(len))))
        }
        None => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, MEDIA_CONTENT_TYPE)
            .header(header::CONTENT_LENGTH, size)
            .header(header::ACCEPT_RANGES, "bytes")
            .body(Body::from_stream(ReaderStream::new(file))),
    };

    match result {
        Ok(res) => res,
        Err(e) => {
            error!("Failed to build media response: {}", e);
            internal(&filename)
        }
    }
}

/// Parse `bytes=S-E` / `bytes=S-` against the file size. Anything else
/// (including multi-range specs) is ignored and the whole file is served.
fn parse_range(raw: &str, size: u64) -> Option<(u64, u64)> {
    if size == 0 {
        return None;
    }

    let spec = raw.strip_prefix("bytes=")?;
    let (start_raw, end_raw) = spec.split_once('-')?;

    let start: u64 = start_raw.trim().parse().ok()?;
    let end: u64 = if end_raw.trim().is_empty() {
        size - 1
    } else {
        end_raw.trim().parse().ok()?
    };

    let end = end.min(size - 1);
    if start > end {
        return None;
    }

    Some((start, end))
}

fn not_found(filename: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError::not_found(
            format!("No cached media named '{}'", filename),
            PATH,
        )),
    )
        .into_response()
}

fn internal(filename: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError::internal(
            format!("Failed to serve cached media '{}'", filename),
            PATH,
        )),
    )
        .into_response()
}
