//! In-memory S3-compatible backend.
//!
//! Simulates the subset of S3 the gateway relies on (delimited listing with
//! continuation tokens, copy, batch delete, multipart sessions) with:
//! - **Injected failures**: per operation and key, or per part number
//! - **Call journal**: every primitive call, for assertions
//! - **Part delays**: lower part numbers finish later, to exercise
//!   out-of-order completion
//!
//! Used by the test suites and by `--backend memory` for local demos.

use crate::{
    models::{bucket::BucketInfo, connection::ConnectionConfig, multipart::CompletedPartInfo},
    services::{
        StorageError, StorageResult,
        backend::{
            BackendFactory, BatchDeleteFailure, ListPage, ListPageRequest, MAX_KEYS_PER_PAGE,
            ObjectBody, ObjectHead, RawObject, S3Backend,
        },
        keyspace,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

/// Backend primitive, as recorded in the call journal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    ListBuckets,
    CreateBucket,
    DeleteBucket,
    ListObjects,
    HeadObject,
    GetObject,
    PutObject,
    CopyObject,
    DeleteObject,
    DeleteObjects,
    CreateMultipartUpload,
    UploadPart,
    CompleteMultipartUpload,
    AbortMultipartUpload,
    PresignGet,
}

/// One journal entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    pub bucket: String,
    pub key: String,
}

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    last_modified: DateTime<Utc>,
    etag: String,
}

struct StoredBucket {
    created_at: DateTime<Utc>,
    objects: BTreeMap<String, StoredObject>,
}

struct PendingUpload {
    bucket: String,
    key: String,
    content_type: Option<String>,
    parts: BTreeMap<i32, (String, Bytes)>,
}

#[derive(Default)]
pub struct MemoryBackend {
    buckets: RwLock<BTreeMap<String, StoredBucket>>,
    uploads: RwLock<HashMap<String, PendingUpload>>,
    failures: RwLock<HashSet<(Operation, String)>>,
    failing_parts: RwLock<HashSet<i32>>,
    withhold_upload_ids: AtomicBool,
    part_delay: Option<Duration>,
    calls: RwLock<Vec<Call>>,
    part_arrivals: RwLock<Vec<i32>>,
    completions: RwLock<Vec<Vec<i32>>>,
    upload_counter: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay each part upload so that, within a window, higher part numbers
    /// finish first.
    pub fn with_part_delay(mut self, step: Duration) -> Self {
        self.part_delay = Some(step);
        self
    }

    /// Create `bucket` if needed and write `keys` into it. File keys hold
    /// their own name as content; folder keys are zero-byte markers.
    pub fn seed(&self, bucket: &str, keys: &[&str]) {
        let mut buckets = self.buckets.write();
        let entry = buckets
            .entry(bucket.to_string())
            .or_insert_with(|| StoredBucket {
                created_at: Utc::now(),
                objects: BTreeMap::new(),
            });
        for key in keys {
            let data = if keyspace::is_folder_key(key) {
                Bytes::new()
            } else {
                Bytes::copy_from_slice(key.as_bytes())
            };
            entry
                .objects
                .insert(key.to_string(), stored_object(data, None));
        }
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.read().contains_key(bucket)
    }

    /// All keys of `bucket`, in key order.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .read()
            .get(bucket)
            .map(|b| b.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn object_bytes(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.buckets
            .read()
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map(|o| o.data.to_vec())
    }

    /// Fail `operation` whenever it targets `key` (or, for listings, the
    /// prefix `key`).
    pub fn fail_operation(&self, operation: Operation, key: &str) {
        self.failures.write().insert((operation, key.to_string()));
    }

    pub fn fail_part(&self, part_number: i32) {
        self.failing_parts.write().insert(part_number);
    }

    /// Make multipart initiation succeed without issuing an upload id.
    pub fn withhold_upload_ids(&self) {
        self.withhold_upload_ids.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.read().clone()
    }

    pub fn count_calls(&self, operation: Operation) -> usize {
        self.calls
            .read()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Part numbers of successful part uploads, in completion order.
    pub fn part_arrival_order(&self) -> Vec<i32> {
        self.part_arrivals.read().clone()
    }

    /// Part numbers passed to each successful completion call.
    pub fn completed_part_lists(&self) -> Vec<Vec<i32>> {
        self.completions.read().clone()
    }

    pub fn open_multipart_uploads(&self) -> usize {
        self.uploads.read().len()
    }

    fn record(&self, operation: Operation, bucket: &str, key: &str) {
        self.calls.write().push(Call {
            operation,
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
    }

    fn check_injected(&self, operation: Operation, key: &str) -> StorageResult<()> {
        if self
            .failures
            .read()
            .contains(&(operation, key.to_string()))
        {
            return Err(StorageError::Backend {
                status: Some(500),
                code: Some("InternalError".into()),
                message: format!("injected {:?} failure for `{}`", operation, key),
            });
        }
        Ok(())
    }

    fn with_bucket<T>(
        &self,
        bucket: &str,
        f: impl FnOnce(&StoredBucket) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let buckets = self.buckets.read();
        let stored = buckets.get(bucket).ok_or_else(|| no_such_bucket(bucket))?;
        f(stored)
    }

    fn with_bucket_mut<T>(
        &self,
        bucket: &str,
        f: impl FnOnce(&mut StoredBucket) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut buckets = self.buckets.write();
        let stored = buckets
            .get_mut(bucket)
            .ok_or_else(|| no_such_bucket(bucket))?;
        f(stored)
    }

    fn read_object(&self, bucket: &str, key: &str) -> StorageResult<StoredObject> {
        self.with_bucket(bucket, |b| {
            b.objects
                .get(key)
                .cloned()
                .ok_or_else(|| no_such_key(key))
        })
    }
}

#[async_trait]
impl S3Backend for MemoryBackend {
    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        self.record(Operation::ListBuckets, "", "");
        self.check_injected(Operation::ListBuckets, "")?;
        Ok(self
            .buckets
            .read()
            .iter()
            .map(|(name, b)| BucketInfo {
                name: name.clone(),
                creation_date: Some(b.created_at),
            })
            .collect())
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.record(Operation::CreateBucket, bucket, "");
        self.check_injected(Operation::CreateBucket, bucket)?;
        let mut buckets = self.buckets.write();
        if buckets.contains_key(bucket) {
            return Err(s3_error(
                409,
                "BucketAlreadyOwnedByYou",
                format!("bucket `{}` already exists", bucket),
            ));
        }
        buckets.insert(
            bucket.to_string(),
            StoredBucket {
                created_at: Utc::now(),
                objects: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.record(Operation::DeleteBucket, bucket, "");
        self.check_injected(Operation::DeleteBucket, bucket)?;
        let mut buckets = self.buckets.write();
        match buckets.get(bucket) {
            None => Err(no_such_bucket(bucket)),
            Some(b) if !b.objects.is_empty() => Err(s3_error(
                409,
                "BucketNotEmpty",
                format!("bucket `{}` is not empty", bucket),
            )),
            Some(_) => {
                buckets.remove(bucket);
                Ok(())
            }
        }
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        request: &ListPageRequest,
    ) -> StorageResult<ListPage> {
        let prefix = request.prefix.as_deref().unwrap_or("");
        self.record(Operation::ListObjects, bucket, prefix);
        self.check_injected(Operation::ListObjects, prefix)?;
        let max_keys = request
            .max_keys
            .unwrap_or(MAX_KEYS_PER_PAGE)
            .clamp(1, MAX_KEYS_PER_PAGE) as usize;

        self.with_bucket(bucket, |b| {
            let mut page = ListPage::default();
            let mut count = 0usize;
            let mut last_consumed: Option<&String> = None;
            let mut truncated = false;

            for (key, object) in b.objects.iter() {
                if !key.starts_with(prefix) {
                    continue;
                }
                if let Some(token) = request.continuation_token.as_deref() {
                    if key.as_str() <= token {
                        continue;
                    }
                }

                let folder = request
                    .delimiter
                    .as_deref()
                    .and_then(|d| keyspace::common_prefix_of(key, prefix, d));
                if let Some(folder) = folder {
                    if page.common_prefixes.last() == Some(&folder) {
                        last_consumed = Some(key);
                        continue;
                    }
                    if count == max_keys {
                        truncated = true;
                        break;
                    }
                    page.common_prefixes.push(folder);
                } else {
                    if count == max_keys {
                        truncated = true;
                        break;
                    }
                    page.objects.push(RawObject {
                        key: key.clone(),
                        size: object.data.len() as i64,
                        last_modified: Some(object.last_modified),
                        etag: Some(object.etag.clone()),
                    });
                }
                count += 1;
                last_consumed = Some(key);
            }

            if truncated {
                page.next_continuation_token = last_consumed.cloned();
            }
            Ok(page)
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectHead> {
        self.record(Operation::HeadObject, bucket, key);
        self.check_injected(Operation::HeadObject, key)?;
        let object = self.read_object(bucket, key)?;
        Ok(head_of(&object))
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectBody> {
        self.record(Operation::GetObject, bucket, key);
        self.check_injected(Operation::GetObject, key)?;
        let object = self.read_object(bucket, key)?;
        let head = head_of(&object);
        let data = object.data;
        Ok(ObjectBody {
            head,
            stream: futures::stream::once(async move { Ok::<_, std::io::Error>(data) }).boxed(),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<Option<String>> {
        self.record(Operation::PutObject, bucket, key);
        self.check_injected(Operation::PutObject, key)?;
        let object = stored_object(body, content_type.map(str::to_string));
        let etag = object.etag.clone();
        self.with_bucket_mut(bucket, |b| {
            b.objects.insert(key.to_string(), object);
            Ok(())
        })?;
        Ok(Some(etag))
    }

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> StorageResult<()> {
        self.record(Operation::CopyObject, dest_bucket, dest_key);
        self.check_injected(Operation::CopyObject, source_key)?;
        self.check_injected(Operation::CopyObject, dest_key)?;
        let mut object = self.read_object(source_bucket, source_key)?;
        object.last_modified = Utc::now();
        self.with_bucket_mut(dest_bucket, |b| {
            b.objects.insert(dest_key.to_string(), object);
            Ok(())
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.record(Operation::DeleteObject, bucket, key);
        self.check_injected(Operation::DeleteObject, key)?;
        self.with_bucket_mut(bucket, |b| {
            b.objects.remove(key);
            Ok(())
        })
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> StorageResult<Vec<BatchDeleteFailure>> {
        self.record(Operation::DeleteObjects, bucket, "");
        if keys.len() > MAX_KEYS_PER_PAGE as usize {
            return Err(s3_error(
                400,
                "MalformedXML",
                format!("cannot delete more than {} keys at once", MAX_KEYS_PER_PAGE),
            ));
        }
        let mut failures = Vec::new();
        let mut removable = Vec::new();
        for key in keys {
            match self
                .check_injected(Operation::DeleteObjects, key)
                .and_then(|_| self.check_injected(Operation::DeleteObject, key))
            {
                Ok(()) => removable.push(key),
                Err(err) => failures.push(BatchDeleteFailure {
                    key: key.clone(),
                    code: err.s3_code().map(str::to_string),
                    message: err.to_string(),
                }),
            }
        }
        self.with_bucket_mut(bucket, |b| {
            for key in removable {
                b.objects.remove(key);
            }
            Ok(())
        })?;
        Ok(failures)
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> StorageResult<Option<String>> {
        self.record(Operation::CreateMultipartUpload, bucket, key);
        self.check_injected(Operation::CreateMultipartUpload, key)?;
        self.with_bucket(bucket, |_| Ok(()))?;
        if self.withhold_upload_ids.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let upload_id = format!(
            "upload-{}",
            self.upload_counter.fetch_add(1, Ordering::SeqCst) + 1
        );
        self.uploads.write().insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                content_type: content_type.map(str::to_string),
                parts: BTreeMap::new(),
            },
        );
        Ok(Some(upload_id))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<Option<String>> {
        self.record(Operation::UploadPart, bucket, key);
        if let Some(step) = self.part_delay {
            let steps = 10 - (part_number.rem_euclid(10)) as u32;
            tokio::time::sleep(step * steps).await;
        }
        if self.failing_parts.read().contains(&part_number) {
            return Err(s3_error(
                500,
                "InternalError",
                format!("injected failure for part {}", part_number),
            ));
        }

        let etag = format!("\"{:x}\"", md5::compute(&body));
        {
            let mut uploads = self.uploads.write();
            let pending = uploads
                .get_mut(upload_id)
                .ok_or_else(|| no_such_upload(upload_id))?;
            pending.parts.insert(part_number, (etag.clone(), body));
        }
        self.part_arrivals.write().push(part_number);
        Ok(Some(etag))
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPartInfo],
    ) -> StorageResult<()> {
        self.record(Operation::CompleteMultipartUpload, bucket, key);
        self.check_injected(Operation::CompleteMultipartUpload, key)?;
        if parts.is_empty() || !parts.windows(2).all(|w| w[0].part_number < w[1].part_number) {
            return Err(s3_error(
                400,
                "InvalidPartOrder",
                "parts must be listed in ascending part-number order",
            ));
        }

        let pending = self
            .uploads
            .write()
            .remove(upload_id)
            .ok_or_else(|| no_such_upload(upload_id))?;
        if pending.bucket != bucket || pending.key != key {
            return Err(no_such_upload(upload_id));
        }

        let mut assembled = Vec::new();
        let mut digests = Vec::new();
        for part in parts {
            match pending.parts.get(&part.part_number) {
                Some((etag, data)) if *etag == part.etag => {
                    assembled.extend_from_slice(data);
                    digests.extend_from_slice(&md5::compute(data).0);
                }
                _ => {
                    return Err(s3_error(
                        400,
                        "InvalidPart",
                        format!("part {} was not uploaded", part.part_number),
                    ));
                }
            }
        }

        let mut object = stored_object(Bytes::from(assembled), pending.content_type);
        object.etag = format!("\"{:x}-{}\"", md5::compute(&digests), parts.len());
        self.with_bucket_mut(bucket, |b| {
            b.objects.insert(key.to_string(), object);
            Ok(())
        })?;
        self.completions
            .write()
            .push(parts.iter().map(|p| p.part_number).collect());
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<()> {
        self.record(Operation::AbortMultipartUpload, bucket, key);
        self.check_injected(Operation::AbortMultipartUpload, key)?;
        self.uploads
            .write()
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| no_such_upload(upload_id))
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.record(Operation::PresignGet, bucket, key);
        self.check_injected(Operation::PresignGet, key)?;
        Ok(format!(
            "memory://{}/{}?X-Amz-Expires={}",
            bucket,
            key,
            expires_in.as_secs()
        ))
    }
}

/// Hands out the same shared `MemoryBackend` for every connection.
#[derive(Clone, Default)]
pub struct MemoryBackendFactory {
    backend: Arc<MemoryBackend>,
}

impl MemoryBackendFactory {
    pub fn new(backend: Arc<MemoryBackend>) -> Self {
        Self { backend }
    }
}

impl BackendFactory for MemoryBackendFactory {
    fn connect(&self, _config: &ConnectionConfig) -> StorageResult<Arc<dyn S3Backend>> {
        Ok(self.backend.clone())
    }
}

fn stored_object(data: Bytes, content_type: Option<String>) -> StoredObject {
    StoredObject {
        etag: format!("\"{:x}\"", md5::compute(&data)),
        data,
        content_type,
        last_modified: Utc::now(),
    }
}

fn head_of(object: &StoredObject) -> ObjectHead {
    ObjectHead {
        size: object.data.len() as i64,
        content_type: object.content_type.clone(),
        last_modified: Some(object.last_modified),
        etag: Some(object.etag.clone()),
    }
}

fn s3_error(status: u16, code: &str, message: impl Into<String>) -> StorageError {
    StorageError::Backend {
        status: Some(status),
        code: Some(code.to_string()),
        message: message.into(),
    }
}

fn no_such_bucket(bucket: &str) -> StorageError {
    s3_error(
        404,
        "NoSuchBucket",
        format!("bucket `{}` does not exist", bucket),
    )
}

fn no_such_key(key: &str) -> StorageError {
    s3_error(404, "NoSuchKey", format!("key `{}` does not exist", key))
}

fn no_such_upload(upload_id: &str) -> StorageError {
    s3_error(
        404,
        "NoSuchUpload",
        format!("multipart upload `{}` does not exist", upload_id),
    )
}
