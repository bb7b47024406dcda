//! HTTP handlers for bucket operations.

use crate::{
    errors::AppError,
    handlers::{SuccessResponse, success},
    models::bucket::BucketInfo,
    state::AppState,
    validation,
};
use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateBucketReq {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct BucketsResponse {
    pub buckets: Vec<BucketInfo>,
}

/// GET `/api/buckets`
pub async fn list_buckets(State(state): State<AppState>) -> Result<Json<BucketsResponse>, AppError> {
    let buckets = state.gateway().await?.list_buckets().await?;
    Ok(Json(BucketsResponse { buckets }))
}

/// POST `/api/buckets`: create bucket `{name}`.
pub async fn create_bucket(
    State(state): State<AppState>,
    Json(req): Json<CreateBucketReq>,
) -> Result<Json<SuccessResponse>, AppError> {
    let name = req.name.trim();
    validation::validate_bucket_name(name)?;
    state.gateway().await?.create_bucket(name).await?;
    Ok(success(format!("Bucket \"{}\" created", name)))
}

/// DELETE `/api/buckets/{name}`: empties the bucket, then deletes it.
pub async fn delete_bucket(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    validation::validate_bucket_name(&name)?;
    state.gateway().await?.delete_bucket(&name).await?;
    Ok(success(format!("Bucket \"{}\" deleted", name)))
}
