//! Admin REST API, served on its own listener.
//!
//! # Endpoints
//! - `GET /admin/status`, `GET /admin/capabilities`
//! - `GET|POST /admin/routes`, `GET|DELETE /admin/routes/{id}`
//! - `POST /admin/routes/refresh`, `POST /admin/routes/reconcile`
//! - `GET|POST /admin/clients`, `PUT|DELETE /admin/clients/{id}`
//!
//! Every endpoint requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::capability::CapabilityRegistry;
use crate::clients::ApiClientStore;
use crate::routes::RouteAdminService;
use crate::routing::RouteTableHandle;

pub use error::{AdminError, AdminResult};

#[derive(Clone)]
pub struct AdminState {
    pub routes: RouteAdminService,
    pub clients: Arc<ApiClientStore>,
    pub registry: Arc<CapabilityRegistry>,
    pub table: RouteTableHandle,
    pub api_key: Arc<str>,
    /// Recorded as creator/updater of route mutations.
    pub operator: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/capabilities", get(get_capabilities))
        .route("/admin/routes", get(list_routes).post(save_route))
        .route("/admin/routes/refresh", post(refresh_routes))
        .route("/admin/routes/reconcile", post(reconcile_routes))
        .route("/admin/routes/{id}", get(get_route).delete(delete_route))
        .route("/admin/clients", get(list_clients).post(create_client))
        .route("/admin/clients/{id}", put(update_client).delete(delete_client))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until shutdown.
pub async fn serve_admin(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    tracing::info!("Admin API stopped");
    Ok(())
}
