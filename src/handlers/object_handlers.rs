//! HTTP handlers for object operations.
//! Every handler validates bucket names and keys before resolving a gateway,
//! so malformed input is rejected without touching the backend.

use crate::{
    errors::AppError,
    handlers::{SuccessResponse, success},
    models::{
        multipart::UploadedObject,
        object::{DeleteOutcome, ObjectInfo},
    },
    services::{StorageError, backend::ObjectHead, keyspace, mutation::DeleteTarget},
    state::AppState,
    validation,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct ListObjectsQuery {
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Serialize)]
pub struct ListObjectsResponse {
    pub objects: Vec<ObjectInfo>,
    pub prefixes: Vec<String>,
    pub bucket: String,
    pub prefix: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyQuery {
    pub key: String,
    pub expires_in: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct UrlResponse {
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteQuery {
    pub key: String,
    #[serde(default)]
    pub is_folder: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateFolderReq {
    pub path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameReq {
    pub old_key: String,
    pub new_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyReq {
    pub source_key: String,
    /// Defaults to the source bucket.
    pub dest_bucket: Option<String>,
    pub dest_key: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchDeleteReq {
    pub objects: Vec<DeleteTarget>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub uploaded: Vec<UploadedObject>,
}

/// GET `/api/objects/{bucket}?prefix=`: folder/file view of one level.
pub async fn list_objects(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<ListObjectsQuery>,
) -> Result<Json<ListObjectsResponse>, AppError> {
    validation::validate_bucket_name(&bucket)?;
    validation::validate_prefix(&q.prefix)?;

    let listing = state.gateway().await?.list_objects(&bucket, &q.prefix).await?;
    Ok(Json(ListObjectsResponse {
        objects: listing.objects,
        prefixes: listing.prefixes,
        bucket,
        prefix: q.prefix,
    }))
}

/// GET `/api/objects/{bucket}/download?key=`: presigned URL, no bytes proxied.
pub async fn download_url(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<KeyQuery>,
) -> Result<Json<UrlResponse>, AppError> {
    validate_target(&bucket, &q.key)?;
    let url = state
        .gateway()
        .await?
        .get_object_url(&bucket, &q.key, q.expires_in.map(Duration::from_secs))
        .await?;
    Ok(Json(UrlResponse { url }))
}

/// GET `/api/objects/{bucket}/metadata?key=`
pub async fn object_metadata(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<KeyQuery>,
) -> Result<Json<ObjectInfo>, AppError> {
    validate_target(&bucket, &q.key)?;
    let info = state
        .gateway()
        .await?
        .get_object_metadata(&bucket, &q.key)
        .await?;
    Ok(Json(info))
}

/// GET `/api/objects/{bucket}/stream?key=`: object bytes as a streaming response.
pub async fn stream_object(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<KeyQuery>,
) -> Result<Response, AppError> {
    validate_target(&bucket, &q.key)?;
    let object = state
        .gateway()
        .await?
        .get_object_stream(&bucket, &q.key)
        .await?;

    let mut response = Response::new(Body::from_stream(object.stream));
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &object.head);
    Ok(response)
}

/// POST `/api/objects/{bucket}/upload`: multipart form with `prefix`,
/// repeated `files`, optional positional `names` and `autoRename`.
pub async fn upload_objects(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    mut form: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    validation::validate_bucket_name(&bucket)?;

    let mut prefix = String::new();
    let mut names: Vec<String> = Vec::new();
    let mut auto_rename = false;
    let mut files: Vec<(String, Option<String>, Bytes)> = Vec::new();

    while let Some(field) = form.next_field().await? {
        let field_name = field.name().unwrap_or_default().trim_end_matches("[]").to_string();
        match field_name.as_str() {
            "prefix" => prefix = field.text().await?,
            "names" => names.push(field.text().await?),
            "autoRename" => auto_rename = matches!(field.text().await?.trim(), "true" | "1"),
            "files" | "file" => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::bad_request("file part without a filename"))?;
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await?;
                files.push((filename, content_type, data));
            }
            other => debug!(field = other, "ignoring unknown upload field"),
        }
    }

    validation::validate_prefix(&prefix)?;
    if files.is_empty() {
        return Err(AppError::bad_request("no files provided"));
    }

    let gateway = state.gateway().await?;
    let mut uploaded = Vec::with_capacity(files.len());
    for (idx, (filename, content_type, data)) in files.into_iter().enumerate() {
        let rename_to = names
            .get(idx)
            .map(|n| n.trim())
            .filter(|n| !n.is_empty());
        let result = gateway
            .upload_file(
                &bucket,
                &prefix,
                &filename,
                rename_to,
                auto_rename,
                data,
                content_type.as_deref(),
            )
            .await;
        match result {
            Ok(object) => uploaded.push(object),
            Err(err) => return Err(with_uploaded(AppError::from(err), &uploaded)),
        }
    }

    Ok(Json(UploadResponse {
        success: true,
        uploaded,
    }))
}

/// Report the keys already stored when a later file in the form fails.
fn with_uploaded(mut err: AppError, uploaded: &[UploadedObject]) -> AppError {
    if !uploaded.is_empty() {
        let keys: Vec<&str> = uploaded.iter().map(|o| o.key.as_str()).collect();
        err.details = Some(json!({ "uploaded": keys }));
    }
    err
}

/// POST `/api/objects/{bucket}/folder`: write a folder marker `{path}`.
pub async fn create_folder(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Json(req): Json<CreateFolderReq>,
) -> Result<Json<SuccessResponse>, AppError> {
    validation::validate_bucket_name(&bucket)?;
    let key = keyspace::normalize_folder_path(&req.path)?;
    validation::validate_object_key(&key)?;

    let key = state.gateway().await?.create_folder(&bucket, &key).await?;
    Ok(success(format!("Folder \"{}\" created", key)))
}

/// PUT `/api/objects/{bucket}/rename`: `{oldKey, newKey}`.
pub async fn rename_object(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Json(req): Json<RenameReq>,
) -> Result<Json<SuccessResponse>, AppError> {
    validate_target(&bucket, &req.old_key)?;
    validation::validate_object_key(&req.new_key)?;

    let moved = state
        .gateway()
        .await?
        .rename_object(&bucket, &req.old_key, &req.new_key)
        .await?
        .into_result()?;
    Ok(success(format!(
        "Renamed \"{}\" to \"{}\" ({} object{})",
        req.old_key,
        req.new_key,
        moved.len(),
        plural(moved.len())
    )))
}

/// POST `/api/objects/{bucket}/copy`: `{sourceKey, destBucket?, destKey}`.
pub async fn copy_object(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Json(req): Json<CopyReq>,
) -> Result<Json<SuccessResponse>, AppError> {
    let dest_bucket = req.dest_bucket.unwrap_or_else(|| bucket.clone());
    validate_target(&bucket, &req.source_key)?;
    validate_target(&dest_bucket, &req.dest_key)?;

    let copied = state
        .gateway()
        .await?
        .copy_object(&bucket, &req.source_key, &dest_bucket, &req.dest_key)
        .await?
        .into_result()?;
    Ok(success(format!(
        "Copied {} object{} to {}/{}",
        copied.len(),
        plural(copied.len()),
        dest_bucket,
        req.dest_key
    )))
}

/// DELETE `/api/objects/{bucket}?key=&isFolder=`
///
/// A folder delete attempts every key under the prefix; any key that could
/// not be deleted turns the response into a partial-failure error.
pub async fn delete_object(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<DeleteQuery>,
) -> Result<Json<SuccessResponse>, AppError> {
    validate_target(&bucket, &q.key)?;
    let gateway = state.gateway().await?;

    if q.is_folder || keyspace::is_folder_key(&q.key) {
        let outcome = gateway.delete_folder(&bucket, &q.key).await?;
        if !outcome.failed.is_empty() {
            return Err(StorageError::PartialFailure {
                succeeded: outcome.deleted,
                failed: outcome.failed,
            }
            .into());
        }
        return Ok(success(format!(
            "Deleted folder \"{}\" ({} object{})",
            q.key,
            outcome.deleted.len(),
            plural(outcome.deleted.len())
        )));
    }

    gateway.delete_object(&bucket, &q.key).await?;
    Ok(success(format!("Deleted \"{}\"", q.key)))
}

/// POST `/api/objects/{bucket}/batch-delete`: `{objects: [{key, isFolder}]}`.
///
/// Always answers 200 with both lists; per-target failures never fail the
/// request.
pub async fn batch_delete(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Json(req): Json<BatchDeleteReq>,
) -> Result<Json<DeleteOutcome>, AppError> {
    validation::validate_bucket_name(&bucket)?;
    if req.objects.is_empty() {
        return Err(AppError::bad_request("no objects to delete"));
    }

    let outcome = state
        .gateway()
        .await?
        .batch_delete(&bucket, req.objects)
        .await?;
    Ok(Json(outcome))
}

fn validate_target(bucket: &str, key: &str) -> Result<(), AppError> {
    validation::validate_bucket_name(bucket)?;
    validation::validate_object_key(key)?;
    Ok(())
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

fn set_object_headers(headers: &mut HeaderMap, head: &ObjectHead) {
    let content_type = head
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(head.size.max(0)));

    if let Some(value) = head
        .etag
        .as_deref()
        .and_then(|etag| HeaderValue::from_str(etag).ok())
    {
        headers.insert(header::ETAG, value);
    }

    if let Some(value) = head
        .last_modified
        .and_then(|ts| HeaderValue::from_str(&ts.to_rfc2822()).ok())
    {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
