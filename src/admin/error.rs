//! Admin API error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::routes::ReconcileError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("route not found: {0}")]
    RouteNotFound(String),

    #[error("client not found: {0}")]
    ClientNotFound(u64),

    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AdminError::RouteNotFound(_) => (StatusCode::NOT_FOUND, "ROUTE_NOT_FOUND"),
            AdminError::ClientNotFound(_) => (StatusCode::NOT_FOUND, "CLIENT_NOT_FOUND"),
            AdminError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_ERROR"),
            AdminError::Reconcile(_) => (StatusCode::INTERNAL_SERVER_ERROR, "RECONCILE_ERROR"),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Admin request failed");
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

pub type AdminResult<T> = Result<T, AdminError>;
