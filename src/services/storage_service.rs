//! src/services/storage_service.rs
//!
//! StorageService: the storage gateway. A stateless façade over one
//! `S3Backend` client, built per request from a resolved connection
//! snapshot. Folder semantics come from `keyspace`, uploads from
//! `upload`, and rename/copy/delete recursion from `mutation`.

use crate::{
    models::{
        bucket::BucketInfo,
        connection::ConnectionConfig,
        multipart::UploadedObject,
        object::{DeleteOutcome, FailedKey, MutationOutcome, ObjectInfo, ObjectListing},
    },
    services::{
        backend::{BackendFactory, ListPageRequest, ObjectBody, S3Backend},
        keyspace,
        mutation::{DeleteTarget, MutationEngine},
        upload::{UploadOrchestrator, UploadSettings},
    },
    validation,
};
use bytes::Bytes;
use std::{collections::HashSet, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info};

/// Closed error taxonomy of the gateway.
///
/// SDK-specific failures are normalized into `Backend` at the backend
/// boundary; partial failures of multi-key work are `PartialFailure`.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no active connection is configured")]
    NoActiveConnection,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{message}")]
    Backend {
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },
    #[error("failed to initiate multipart upload: {0}")]
    MultipartInitFailed(String),
    #[error("multipart upload failed on part {part_number}: {message}")]
    MultipartPartFailed {
        part_number: i32,
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },
    #[error("{} of {} keys failed", .failed.len(), .succeeded.len() + .failed.len())]
    PartialFailure {
        succeeded: Vec<String>,
        failed: Vec<FailedKey>,
    },
    #[error("connection `{0}` not found")]
    ConnectionNotFound(String),
    #[error("a connection named `{0}` already exists")]
    DuplicateConnectionName(String),
    #[error("credential sealing failed: {0}")]
    Crypto(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Backend error without an HTTP status or S3 code.
    pub fn backend(message: impl Into<String>) -> Self {
        StorageError::Backend {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        StorageError::InvalidInput(message.into())
    }

    /// S3 error code (e.g. `NoSuchKey`) when the backend reported one.
    pub fn s3_code(&self) -> Option<&str> {
        match self {
            StorageError::Backend { code, .. }
            | StorageError::MultipartPartFailed { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Record this error against `key` for a multi-key result.
    pub fn for_key(&self, key: impl Into<String>) -> FailedKey {
        FailedKey {
            key: key.into(),
            error: self.to_string(),
            code: self.s3_code().map(str::to_string),
        }
    }
}

impl MutationOutcome {
    /// Keys that fully succeeded, or a `PartialFailure` error.
    pub fn into_result(self) -> StorageResult<Vec<String>> {
        match self {
            MutationOutcome::Completed { keys } => Ok(keys),
            MutationOutcome::PartiallyCompleted { succeeded, failed } => {
                Err(StorageError::PartialFailure { succeeded, failed })
            }
            MutationOutcome::Failed { failed } => Err(StorageError::PartialFailure {
                succeeded: Vec::new(),
                failed,
            }),
        }
    }
}

/// Default lifetime of presigned download URLs.
pub const DEFAULT_PRESIGN_EXPIRY: Duration = Duration::from_secs(3600);

/// StorageService exposes the bucket and object primitives of the explorer:
/// - bucket listing, creation and (emptying) deletion
/// - delimited object listing with synthesized folders
/// - presigned downloads and pass-through reads
/// - single-shot or multipart uploads
/// - rename/copy/delete over files and folder prefixes
///
/// It holds no connection state of its own: the backend it wraps was built
/// from the connection snapshot passed to `connect`.
#[derive(Clone)]
pub struct StorageService {
    backend: Arc<dyn S3Backend>,
    settings: UploadSettings,
    presign_expiry: Duration,
}

impl StorageService {
    /// Wrap an already constructed backend.
    pub fn new(backend: Arc<dyn S3Backend>, settings: UploadSettings) -> Self {
        Self {
            backend,
            settings,
            presign_expiry: DEFAULT_PRESIGN_EXPIRY,
        }
    }

    /// Build a gateway for `config` through `factory`.
    pub fn connect(
        factory: &dyn BackendFactory,
        config: &ConnectionConfig,
        settings: UploadSettings,
    ) -> StorageResult<Self> {
        debug!(endpoint = %config.endpoint, region = %config.region, "building storage client");
        let backend = factory.connect(config)?;
        Ok(Self::new(backend, settings))
    }

    pub fn with_presign_expiry(mut self, expiry: Duration) -> Self {
        self.presign_expiry = expiry;
        self
    }

    fn mutations(&self) -> MutationEngine<'_> {
        MutationEngine::new(self.backend.as_ref(), self.settings.part_concurrency)
    }

    fn orchestrator(&self) -> UploadOrchestrator<'_> {
        UploadOrchestrator::new(self.backend.as_ref(), self.settings)
    }

    /// List all buckets visible to the connection.
    pub async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        self.backend.list_buckets().await
    }

    pub async fn create_bucket(&self, name: &str) -> StorageResult<()> {
        validation::validate_bucket_name(name)?;
        self.backend.create_bucket(name).await?;
        info!(bucket = name, "bucket created");
        Ok(())
    }

    /// Delete a bucket after emptying it.
    ///
    /// S3-compatible backends refuse to delete non-empty buckets, so every
    /// key is batch-deleted page by page first. The bucket deletion is only
    /// issued once a fresh listing comes back empty.
    pub async fn delete_bucket(&self, name: &str) -> StorageResult<()> {
        validation::validate_bucket_name(name)?;
        let removed = self.mutations().empty_bucket(name).await?;
        self.backend.delete_bucket(name).await?;
        info!(bucket = name, removed, "bucket deleted");
        Ok(())
    }

    /// Folder/file view of the direct children of `prefix`.
    ///
    /// The zero-byte marker whose key equals `prefix` is never returned as a
    /// file.
    pub async fn list_objects(&self, bucket: &str, prefix: &str) -> StorageResult<ObjectListing> {
        self.list_objects_with_delimiter(bucket, prefix, keyspace::DELIMITER)
            .await
    }

    pub async fn list_objects_with_delimiter(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> StorageResult<ObjectListing> {
        validation::validate_bucket_name(bucket)?;
        validation::validate_prefix(prefix)?;

        let mut objects = Vec::new();
        let mut prefixes = Vec::new();
        let mut token = None;
        loop {
            let request = ListPageRequest::delimited(prefix, delimiter).after(token);
            let page = self.backend.list_objects_page(bucket, &request).await?;
            objects.extend(page.objects);
            prefixes.extend(page.common_prefixes);
            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        Ok(keyspace::folder_view(objects, prefixes, prefix, delimiter))
    }

    /// Write the zero-byte marker that makes an (empty) folder exist.
    ///
    /// Returns the normalized folder key, which always ends with `/`.
    pub async fn create_folder(&self, bucket: &str, path: &str) -> StorageResult<String> {
        validation::validate_bucket_name(bucket)?;
        let key = keyspace::normalize_folder_path(path)?;
        validation::validate_object_key(&key)?;
        self.backend
            .put_object(bucket, &key, Bytes::new(), None)
            .await?;
        debug!(bucket, key = %key, "folder marker written");
        Ok(key)
    }

    /// Presigned GET URL for `key`, valid for `expires_in` (or the gateway
    /// default).
    pub async fn get_object_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Option<Duration>,
    ) -> StorageResult<String> {
        validation::validate_bucket_name(bucket)?;
        validation::validate_object_key(key)?;
        self.backend
            .presign_get(bucket, key, expires_in.unwrap_or(self.presign_expiry))
            .await
    }

    pub async fn get_object_stream(&self, bucket: &str, key: &str) -> StorageResult<ObjectBody> {
        validation::validate_bucket_name(bucket)?;
        validation::validate_object_key(key)?;
        self.backend.get_object(bucket, key).await
    }

    pub async fn get_object_metadata(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
        validation::validate_bucket_name(bucket)?;
        validation::validate_object_key(key)?;
        let head = self.backend.head_object(bucket, key).await?;
        Ok(ObjectInfo {
            key: key.to_string(),
            size: head.size,
            last_modified: head.last_modified,
            is_folder: keyspace::is_folder_key(key),
            content_type: head.content_type,
            etag: head.etag,
        })
    }

    /// Write `payload` at `key`, choosing single-shot PUT or multipart by size.
    pub async fn upload(
        &self,
        bucket: &str,
        key: &str,
        payload: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<UploadedObject> {
        validation::validate_bucket_name(bucket)?;
        validation::validate_object_key(key)?;
        self.orchestrator()
            .upload(bucket, key, payload, content_type)
            .await
    }

    /// Upload a client-supplied file under `prefix`.
    ///
    /// The stored name is `rename_to` when the caller resolved a duplicate
    /// already, otherwise the sanitized `filename`. With `auto_rename`, a
    /// name that already exists under `prefix` is disambiguated as
    /// `name (n).ext` instead of being overwritten.
    #[allow(clippy::too_many_arguments)]
    pub async fn upload_file(
        &self,
        bucket: &str,
        prefix: &str,
        filename: &str,
        rename_to: Option<&str>,
        auto_rename: bool,
        payload: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<UploadedObject> {
        validation::validate_prefix(prefix)?;
        let name = match rename_to {
            Some(resolved) => keyspace::sanitize_filename(resolved),
            None if auto_rename => self.resolve_upload_name(bucket, prefix, filename).await?,
            None => keyspace::sanitize_filename(filename),
        };
        let key = keyspace::object_key(prefix, &name);
        self.upload(bucket, &key, payload, content_type).await
    }

    /// First free name for `filename` under `prefix`: the sanitized name
    /// itself, or `name (1).ext`, `name (2).ext`, ...
    pub async fn resolve_upload_name(
        &self,
        bucket: &str,
        prefix: &str,
        filename: &str,
    ) -> StorageResult<String> {
        let listing = self.list_objects(bucket, prefix).await?;
        let existing: HashSet<String> = listing
            .objects
            .iter()
            .filter(|o| !o.is_folder)
            .map(|o| o.name().to_string())
            .collect();
        Ok(keyspace::disambiguate(
            &keyspace::sanitize_filename(filename),
            &existing,
        ))
    }

    /// Rename or move a file or a folder prefix (copy then delete).
    pub async fn rename_object(
        &self,
        bucket: &str,
        old_key: &str,
        new_key: &str,
    ) -> StorageResult<MutationOutcome> {
        validation::validate_bucket_name(bucket)?;
        validation::validate_object_key(old_key)?;
        validation::validate_object_key(new_key)?;
        self.mutations().rename(bucket, old_key, new_key).await
    }

    /// Copy a file, or every key under a folder prefix, to another location.
    pub async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> StorageResult<MutationOutcome> {
        validation::validate_bucket_name(source_bucket)?;
        validation::validate_bucket_name(dest_bucket)?;
        validation::validate_object_key(source_key)?;
        validation::validate_object_key(dest_key)?;
        self.mutations()
            .copy(source_bucket, source_key, dest_bucket, dest_key)
            .await
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        validation::validate_bucket_name(bucket)?;
        validation::validate_object_key(key)?;
        self.mutations().delete_object(bucket, key).await
    }

    /// Delete every key under `prefix`, continuing past per-key failures.
    pub async fn delete_folder(&self, bucket: &str, prefix: &str) -> StorageResult<DeleteOutcome> {
        validation::validate_bucket_name(bucket)?;
        validation::validate_object_key(prefix)?;
        self.mutations().delete_folder(bucket, prefix).await
    }

    /// Delete several files and folders, isolating failures per target.
    pub async fn batch_delete(
        &self,
        bucket: &str,
        targets: Vec<DeleteTarget>,
    ) -> StorageResult<DeleteOutcome> {
        validation::validate_bucket_name(bucket)?;
        Ok(self.mutations().batch_delete(bucket, targets).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_backend::MemoryBackend;

    fn gateway(backend: &Arc<MemoryBackend>) -> StorageService {
        StorageService::new(backend.clone(), UploadSettings::default())
    }

    #[tokio::test]
    async fn folder_marker_is_excluded_from_its_own_listing() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed("demo", &["docs/", "docs/readme.txt"]);
        let service = gateway(&backend);

        let root = service.list_objects("demo", "").await.unwrap();
        assert_eq!(root.objects, vec![ObjectInfo::folder("docs/")]);
        assert_eq!(root.prefixes, vec!["docs/".to_string()]);

        let docs = service.list_objects("demo", "docs/").await.unwrap();
        assert_eq!(docs.objects.len(), 1);
        assert_eq!(docs.objects[0].key, "docs/readme.txt");
        assert!(!docs.objects[0].is_folder);
    }

    #[tokio::test]
    async fn create_folder_normalizes_path() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed("demo", &[]);
        let service = gateway(&backend);

        let key = service.create_folder("demo", "photos/2025").await.unwrap();
        assert_eq!(key, "photos/2025/");
        assert_eq!(backend.object_bytes("demo", "photos/2025/").unwrap().len(), 0);
    }

    #[tokio::test]
    async fn invalid_bucket_is_rejected_before_backend() {
        let backend = Arc::new(MemoryBackend::new());
        let service = gateway(&backend);

        let err = service.create_bucket("Bad_Bucket").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn resolve_upload_name_skips_taken_names() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed("demo", &["inbox/report.pdf", "inbox/report (1).pdf"]);
        let service = gateway(&backend);

        let name = service
            .resolve_upload_name("demo", "inbox/", "report.pdf")
            .await
            .unwrap();
        assert_eq!(name, "report (2).pdf");
    }

    #[tokio::test]
    async fn metadata_reports_size_and_type() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed("demo", &[]);
        let service = gateway(&backend);
        service
            .upload("demo", "a.txt", Bytes::from_static(b"hello"), Some("text/plain"))
            .await
            .unwrap();

        let info = service.get_object_metadata("demo", "a.txt").await.unwrap();
        assert_eq!(info.size, 5);
        assert_eq!(info.content_type.as_deref(), Some("text/plain"));
        assert!(!info.is_folder);
    }

    #[test]
    fn partial_failure_message_counts_keys() {
        let err = StorageError::PartialFailure {
            succeeded: vec!["a".into(), "b".into()],
            failed: vec![StorageError::backend("boom").for_key("c")],
        };
        assert_eq!(err.to_string(), "1 of 3 keys failed");
    }
}
