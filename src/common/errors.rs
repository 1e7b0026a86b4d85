use serde::Serialize;

use crate::common::types::now_millis;

/// JSON error response format shared by every HTTP route.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    /// HTTP status code.
    pub status: u16,
    /// HTTP status reason phrase (e.g. "Bad Request").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
    /// The request path that caused the error.
    pub path: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            timestamp: now_millis(),
            status: 400,
            error: "Bad Request".into(),
            message: message.into(),
            path: path.into(),
        }
    }

    pub fn not_found(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            timestamp: now_millis(),
            status: 404,
            error: "Not Found".into(),
            message: message.into(),
            path: path.into(),
        }
    }

    pub fn internal(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            timestamp: now_millis(),
            status: 500,
            error: "Internal Server Error".into(),
            message: message.into(),
            path: path.into(),
        }
    }
}
