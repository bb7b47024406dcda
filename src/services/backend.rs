//! The raw S3 primitive seam.
//!
//! The gateway never talks to an SDK directly: it drives an `S3Backend`,
//! which is either the AWS SDK client (`AwsS3Backend`) or the in-memory
//! implementation used by tests and local demos (`MemoryBackend`).
//!
//! Implementations must normalize every failure into `StorageError` so that
//! callers never inspect SDK-specific error shapes.

use crate::models::{
    bucket::BucketInfo, connection::ConnectionConfig, multipart::CompletedPartInfo,
};
use crate::services::storage_service::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::{fmt, io, sync::Arc, time::Duration};

/// Largest page the S3 protocol returns, and the batch-delete limit.
pub const MAX_KEYS_PER_PAGE: i32 = 1000;

/// Parameters of a single ListObjectsV2 call.
#[derive(Clone, Debug, Default)]
pub struct ListPageRequest {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
    pub max_keys: Option<i32>,
}

impl ListPageRequest {
    /// Undelimited listing of everything under `prefix`.
    pub fn recursive(prefix: &str) -> Self {
        Self {
            prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
            ..Self::default()
        }
    }

    /// Delimited listing of the direct children of `prefix`.
    pub fn delimited(prefix: &str, delimiter: &str) -> Self {
        Self {
            prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
            delimiter: Some(delimiter.to_string()),
            ..Self::default()
        }
    }

    pub fn after(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }
}

/// A content entry of a listing page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawObject {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// One page of a ListObjectsV2 response.
#[derive(Clone, Debug, Default)]
pub struct ListPage {
    pub objects: Vec<RawObject>,
    pub common_prefixes: Vec<String>,

    /// Present only when the listing was truncated.
    pub next_continuation_token: Option<String>,
}

/// HEAD-style object metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectHead {
    pub size: i64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// A readable object: its metadata plus a byte stream.
pub struct ObjectBody {
    pub head: ObjectHead,
    pub stream: BoxStream<'static, io::Result<Bytes>>,
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBody")
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

/// A key the backend refused to remove during a batch delete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchDeleteFailure {
    pub key: String,
    pub code: Option<String>,
    pub message: String,
}

/// Raw S3 primitives.
///
/// All implementations must be thread-safe; the gateway dispatches part
/// uploads and per-key mutations concurrently against one backend.
#[async_trait]
pub trait S3Backend: Send + Sync {
    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>>;

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Fails on non-empty buckets, as S3-compatible backends do.
    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()>;

    async fn list_objects_page(
        &self,
        bucket: &str,
        request: &ListPageRequest,
    ) -> StorageResult<ListPage>;

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectHead>;

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectBody>;

    /// Single-shot PUT. Returns the ETag when the backend reports one.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<Option<String>>;

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> StorageResult<()>;

    /// Idempotent: deleting a missing key succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Deletes up to `MAX_KEYS_PER_PAGE` keys in one request and returns the
    /// keys the backend refused.
    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> StorageResult<Vec<BatchDeleteFailure>>;

    /// Returns the upload id, or `None` if the backend did not issue one.
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> StorageResult<Option<String>>;

    /// Returns the part ETag, or `None` if the backend did not report one.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<Option<String>>;

    /// `parts` must be in strictly ascending part-number order.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPartInfo],
    ) -> StorageResult<()>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<()>;

    /// Time-limited GET URL. No bytes pass through the gateway.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;
}

/// Builds a backend client for one resolved connection.
pub trait BackendFactory: Send + Sync {
    fn connect(&self, config: &ConnectionConfig) -> StorageResult<Arc<dyn S3Backend>>;
}
