//! Response helpers.
//!
//! # Responsibilities
//! - Build the JSON error body shared by every gateway-generated error
//! - Strip hop-by-hop headers in both directions
//!
//! # Design Decisions
//! - Upstream bodies are streamed, never buffered
//! - Gateway errors use the same shape as authentication failures

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;

/// `{timestamp, status, error, message, path}` with the given status.
pub fn error_response(status: StatusCode, message: &str, path: &str) -> Response {
    let body = json!({
        "timestamp": Utc::now().timestamp_millis(),
        "status": status.as_u16(),
        "error": status.canonical_reason().unwrap_or("Error"),
        "message": message,
        "path": path,
    });
    (status, Json(body)).into_response()
}

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in [
        header::CONNECTION,
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
    ] {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = error_response(StatusCode::NOT_FOUND, "No matching route found", "/x");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], 404);
        assert_eq!(body["error"], "Not Found");
        assert_eq!(body["path"], "/x");
        assert!(body["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, "close".parse().unwrap());
        headers.insert("keep-alive", "timeout=5".parse().unwrap());
        headers.insert("x-custom", "1".parse().unwrap());
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
    }
}
