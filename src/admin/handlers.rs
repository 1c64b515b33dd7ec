use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::admin::error::{AdminError, AdminResult};
use crate::admin::AdminState;
use crate::capability::CapabilityInfo;
use crate::clients::ApiClient;
use crate::routes::RouteDefinition;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub routes_loaded: usize,
    pub clients: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub query: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Capabilities {
    pub predicates: Vec<CapabilityInfo>,
    pub filters: Vec<CapabilityInfo>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateClient {
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateClient {
    pub description: Option<String>,
    pub enabled: Option<bool>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        routes_loaded: state.table.load().len(),
        clients: state.clients.len(),
    })
}

pub async fn get_capabilities(State(state): State<AdminState>) -> Json<Capabilities> {
    Json(Capabilities {
        predicates: state.registry.predicates(),
        filters: state.registry.filters(),
    })
}

pub async fn list_routes(
    State(state): State<AdminState>,
    Query(params): Query<SearchParams>,
) -> AdminResult<Json<Vec<RouteDefinition>>> {
    Ok(Json(state.routes.get_all(params.query.as_deref()).await?))
}

pub async fn get_route(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> AdminResult<Json<RouteDefinition>> {
    state
        .routes
        .get_by_id(&id)
        .await?
        .map(Json)
        .ok_or(AdminError::RouteNotFound(id))
}

/// 201 when the route is new, 200 when it replaced an existing one.
pub async fn save_route(
    State(state): State<AdminState>,
    Json(def): Json<RouteDefinition>,
) -> AdminResult<(StatusCode, Json<RouteDefinition>)> {
    let outcome = state.routes.save(def, &state.operator).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.route)))
}

/// Deleting a route that does not exist still succeeds.
pub async fn delete_route(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> AdminResult<Json<serde_json::Value>> {
    let existed = state.routes.delete(&id).await?;
    Ok(Json(json!({ "id": id, "deleted": existed })))
}

pub async fn refresh_routes(State(state): State<AdminState>) -> Json<serde_json::Value> {
    state.routes.refresh();
    Json(json!({ "status": "refresh broadcast" }))
}

pub async fn reconcile_routes(State(state): State<AdminState>) -> AdminResult<Json<serde_json::Value>> {
    let projected = state.routes.reconcile().await?;
    Ok(Json(json!({ "projected": projected })))
}

pub async fn list_clients(
    State(state): State<AdminState>,
    Query(params): Query<SearchParams>,
) -> Json<Vec<ApiClient>> {
    Json(state.clients.list(params.query.as_deref()))
}

pub async fn create_client(
    State(state): State<AdminState>,
    Json(body): Json<CreateClient>,
) -> AdminResult<(StatusCode, Json<ApiClient>)> {
    let client = state.clients.create(body.description).await?;
    Ok((StatusCode::CREATED, Json(client)))
}

pub async fn update_client(
    State(state): State<AdminState>,
    Path(id): Path<u64>,
    Json(body): Json<UpdateClient>,
) -> AdminResult<Json<ApiClient>> {
    state
        .clients
        .update(id, body.description, body.enabled)
        .await?
        .map(Json)
        .ok_or(AdminError::ClientNotFound(id))
}

pub async fn delete_client(State(state): State<AdminState>, Path(id): Path<u64>) -> AdminResult<StatusCode> {
    state.clients.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
