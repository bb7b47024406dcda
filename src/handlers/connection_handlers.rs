//! HTTP handlers for connection profile management.

use crate::{
    errors::AppError,
    handlers::{SuccessResponse, success},
    models::connection::{ConnectionConfig, ConnectionInput, ConnectionProfile},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ConnectionsResponse {
    pub connections: Vec<ConnectionProfile>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionResponse {
    pub connection: ConnectionProfile,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConnectionResponse {
    pub success: bool,
    pub message: String,
    pub bucket_count: usize,
}

/// GET `/api/connections`
pub async fn list_connections(
    State(state): State<AppState>,
) -> Result<Json<ConnectionsResponse>, AppError> {
    let connections = state.store.list().await?;
    Ok(Json(ConnectionsResponse { connections }))
}

/// POST `/api/connections`
pub async fn create_connection(
    State(state): State<AppState>,
    Json(input): Json<ConnectionInput>,
) -> Result<(StatusCode, Json<ConnectionResponse>), AppError> {
    let connection = state.store.create(input).await?;
    Ok((StatusCode::CREATED, Json(ConnectionResponse { connection })))
}

/// PUT `/api/connections/{id}`: blank secrets keep the stored ones.
pub async fn update_connection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<ConnectionInput>,
) -> Result<Json<ConnectionResponse>, AppError> {
    let connection = state.store.update(id, input).await?;
    Ok(Json(ConnectionResponse { connection }))
}

/// DELETE `/api/connections/{id}`
pub async fn delete_connection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.store.delete(id).await?;
    Ok(success("Connection deleted"))
}

/// POST `/api/connections/{id}/activate`
pub async fn activate_connection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConnectionResponse>, AppError> {
    let connection = state.store.activate(id).await?;
    Ok(Json(ConnectionResponse { connection }))
}

/// POST `/api/connections/test`: try an explicit config without saving it.
pub async fn test_connection(
    State(state): State<AppState>,
    Json(config): Json<ConnectionConfig>,
) -> Result<Json<TestConnectionResponse>, AppError> {
    let buckets = state.test_connection(&config).await?;
    Ok(Json(TestConnectionResponse {
        success: true,
        message: format!("Connected to {}", config.endpoint),
        bucket_count: buckets.len(),
    }))
}
