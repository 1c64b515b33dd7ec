//! AuthGate: HMAC signature authentication for the public listener.
//!
//! Checks run in a fixed order and stop at the first failure:
//! headers present → timestamp parses → timestamp fresh → client known →
//! client enabled → signature matches.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, request::Parts, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;

use crate::clients::{ApiClient, ClientDirectory};
use crate::observability::metrics;
use crate::security::signature::{self, SigningInput, X_APP_KEY, X_NONCE, X_SIGNATURE, X_TIMESTAMP};

/// Why a request was rejected. The display text is sent to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing required authentication headers.")]
    MissingHeader,

    #[error("Invalid timestamp format.")]
    InvalidTimestamp,

    #[error("Timestamp is expired or invalid.")]
    ExpiredTimestamp,

    #[error("Invalid AppKey.")]
    UnknownClient,

    #[error("API client is disabled.")]
    DisabledClient,

    #[error("Signature mismatch.")]
    SignatureMismatch,
}

impl AuthError {
    /// Metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingHeader => "missing_header",
            AuthError::InvalidTimestamp => "invalid_timestamp",
            AuthError::ExpiredTimestamp => "expired_timestamp",
            AuthError::UnknownClient => "unknown_client",
            AuthError::DisabledClient => "disabled_client",
            AuthError::SignatureMismatch => "signature_mismatch",
        }
    }
}

/// Identity of the authenticated caller, attached to the request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedClient {
    pub id: u64,
    pub app_key: String,
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

/// Host used in the canonical string: the Host header, else the request
/// target's authority.
fn canonical_host(parts: &Parts) -> String {
    header_str(parts, header::HOST.as_str())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

/// Verify a request against the client directory. `now_secs` is the current
/// epoch time in seconds.
pub fn authenticate(
    parts: &Parts,
    body: &[u8],
    now_secs: i64,
    clients: &dyn ClientDirectory,
    tolerance_secs: u64,
) -> Result<ApiClient, AuthError> {
    let (Some(app_key), Some(timestamp), Some(nonce), Some(presented)) = (
        header_str(parts, X_APP_KEY),
        header_str(parts, X_TIMESTAMP),
        header_str(parts, X_NONCE),
        header_str(parts, X_SIGNATURE),
    ) else {
        return Err(AuthError::MissingHeader);
    };

    let ts: i64 = timestamp.parse().map_err(|_| AuthError::InvalidTimestamp)?;
    if now_secs.abs_diff(ts) > tolerance_secs {
        return Err(AuthError::ExpiredTimestamp);
    }

    let client = clients.lookup(app_key).ok_or(AuthError::UnknownClient)?;
    if !client.enabled {
        return Err(AuthError::DisabledClient);
    }

    let host = canonical_host(parts);
    let path = signature::decode_path(parts.uri.path());
    let query = signature::decode_query(parts.uri.query());
    let canonical = SigningInput {
        method: parts.method.as_str(),
        host: &host,
        path: &path,
        query: &query,
        timestamp,
        nonce,
        body,
    }
    .canonical_string();
    tracing::trace!(canonical = %canonical, "Server-side string to sign");

    if signature::verify(&client.secret_key, &canonical, presented) {
        Ok(client)
    } else {
        Err(AuthError::SignatureMismatch)
    }
}

#[derive(Clone)]
pub struct AuthState {
    pub clients: Arc<dyn ClientDirectory>,
    pub enabled: bool,
    pub tolerance_secs: u64,
    pub max_body_size: usize,
}

/// 401 with `{timestamp, status, error, message, path}`.
pub fn unauthorized(path: &str, error: AuthError) -> Response {
    let body = json!({
        "timestamp": Utc::now().timestamp_millis(),
        "status": StatusCode::UNAUTHORIZED.as_u16(),
        "error": "Unauthorized",
        "message": error.to_string(),
        "path": path,
    });
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

/// Middleware: buffer the body once, authenticate, and hand the same bytes on.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.enabled {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, limit = state.max_body_size, "Request body rejected");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let now = Utc::now().timestamp();
    match authenticate(&parts, &bytes, now, state.clients.as_ref(), state.tolerance_secs) {
        Ok(client) => {
            tracing::debug!(app_key = %client.app_key, "Request authenticated");
            let mut request = Request::from_parts(parts, Body::from(bytes));
            request.extensions_mut().insert(AuthenticatedClient {
                id: client.id,
                app_key: client.app_key,
            });
            next.run(request).await
        }
        Err(e) => {
            tracing::warn!(reason = e.reason(), path = %parts.uri.path(), "Authentication failed: {}", e);
            metrics::record_auth_rejection(e.reason());
            unauthorized(parts.uri.path(), e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const NOW: i64 = 1_700_000_000;

    fn directory() -> HashMap<String, ApiClient> {
        let mut clients = HashMap::new();
        for (id, key, enabled) in [(1, "AKlive", true), (2, "AKoff", false)] {
            clients.insert(
                key.to_string(),
                ApiClient {
                    id,
                    app_key: key.to_string(),
                    secret_key: format!("SK-{}", key),
                    description: None,
                    enabled,
                },
            );
        }
        clients
    }

    fn signed(app_key: &str, ts: i64, uri: &str, body: &str) -> Parts {
        let uri_parsed: axum::http::Uri = uri.parse().unwrap();
        signed_as(app_key, ts, uri, uri_parsed.path(), body)
    }

    /// Sign with `signed_path` in the canonical string, send to `uri`.
    fn signed_as(app_key: &str, ts: i64, uri: &str, signed_path: &str, body: &str) -> Parts {
        let uri_parsed: axum::http::Uri = uri.parse().unwrap();
        let query = signature::decode_query(uri_parsed.query());
        let canonical = SigningInput {
            method: "POST",
            host: "gw.local",
            path: signed_path,
            query: &query,
            timestamp: &ts.to_string(),
            nonce: "nonce-1",
            body: body.as_bytes(),
        }
        .canonical_string();
        let sig = signature::sign(&format!("SK-{}", app_key), &canonical);

        Request::builder()
            .method("POST")
            .uri(uri)
            .header("host", "gw.local")
            .header("X-AppKey", app_key)
            .header("X-Timestamp", ts.to_string())
            .header("X-Nonce", "nonce-1")
            .header("X-Signature", sig)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[test]
    fn test_valid_signature() {
        let parts = signed("AKlive", NOW, "/orders?name=a+b", "{}");
        let client = authenticate(&parts, b"{}", NOW, &directory(), 300).unwrap();
        assert_eq!(client.id, 1);
    }

    #[test]
    fn test_path_is_verified_decoded() {
        let parts = signed_as("AKlive", NOW, "/a%20b", "/a b", "");
        assert!(authenticate(&parts, b"", NOW, &directory(), 300).is_ok());

        let raw = signed_as("AKlive", NOW, "/a%20b", "/a%20b", "");
        assert_eq!(
            authenticate(&raw, b"", NOW, &directory(), 300),
            Err(AuthError::SignatureMismatch)
        );
    }

    #[test]
    fn test_missing_header() {
        let mut parts = signed("AKlive", NOW, "/orders", "");
        parts.headers.remove("x-nonce");
        assert_eq!(
            authenticate(&parts, b"", NOW, &directory(), 300),
            Err(AuthError::MissingHeader)
        );
    }

    #[test]
    fn test_timestamp_checks() {
        let mut parts = signed("AKlive", NOW, "/", "");
        parts.headers.insert("x-timestamp", "soon".parse().unwrap());
        assert_eq!(authenticate(&parts, b"", NOW, &directory(), 300), Err(AuthError::InvalidTimestamp));

        let edge = signed("AKlive", NOW - 300, "/", "");
        assert!(authenticate(&edge, b"", NOW, &directory(), 300).is_ok());

        let late = signed("AKlive", NOW - 301, "/", "");
        assert_eq!(authenticate(&late, b"", NOW, &directory(), 300), Err(AuthError::ExpiredTimestamp));

        let future = signed("AKlive", NOW + 301, "/", "");
        assert_eq!(authenticate(&future, b"", NOW, &directory(), 300), Err(AuthError::ExpiredTimestamp));
    }

    #[test]
    fn test_client_checks() {
        let unknown = signed("AKnobody", NOW, "/", "");
        assert_eq!(authenticate(&unknown, b"", NOW, &directory(), 300), Err(AuthError::UnknownClient));

        let disabled = signed("AKoff", NOW, "/", "");
        assert_eq!(authenticate(&disabled, b"", NOW, &directory(), 300), Err(AuthError::DisabledClient));
    }

    #[test]
    fn test_tampered_body() {
        let parts = signed("AKlive", NOW, "/orders", r#"{"amount":1}"#);
        assert_eq!(
            authenticate(&parts, br#"{"amount":9}"#, NOW, &directory(), 300),
            Err(AuthError::SignatureMismatch)
        );
    }

    #[test]
    fn test_messages() {
        assert_eq!(AuthError::MissingHeader.to_string(), "Missing required authentication headers.");
        assert_eq!(AuthError::SignatureMismatch.to_string(), "Signature mismatch.");
    }
}
