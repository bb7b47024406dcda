//! Upload orchestration: single-shot PUT below the multipart threshold,
//! multipart above it.
//!
//! Multipart protocol:
//! 1. initiate, failing with `MultipartInitFailed` when no upload id comes back
//!    (backend errors pass through unchanged)
//! 2. split the payload into fixed-size parts (the last one may be shorter)
//! 3. upload parts in windows of `part_concurrency`
//! 4. sort completed parts by part number
//! 5. complete with the ordered part list
//!
//! Any failure in steps 2–5 aborts the upload (best-effort) and returns the
//! original error. A failed part does not cancel its siblings in the same
//! window: they are awaited before the abort is issued.

use crate::{
    models::multipart::{CompletedPartInfo, UploadSession, UploadedObject},
    services::{StorageError, StorageResult, backend::S3Backend},
};
use bytes::Bytes;
use futures::{StreamExt, stream::FuturesUnordered};
use tracing::{debug, error, info, warn};

pub const MIB: usize = 1024 * 1024;

/// Smallest part size S3-compatible backends accept (except the last part).
pub const MIN_PART_SIZE: usize = 5 * MIB;
pub const DEFAULT_MULTIPART_THRESHOLD: usize = 100 * MIB;
pub const DEFAULT_PART_SIZE: usize = 10 * MIB;
pub const DEFAULT_PART_CONCURRENCY: usize = 5;

/// Upload tuning knobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadSettings {
    /// Payloads strictly larger than this go multipart.
    pub multipart_threshold: usize,
    pub part_size: usize,

    /// Parts in flight at once. Also bounds per-key rename/delete fan-out.
    pub part_concurrency: usize,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            part_size: DEFAULT_PART_SIZE,
            part_concurrency: DEFAULT_PART_CONCURRENCY,
        }
    }
}

impl UploadSettings {
    pub fn uses_multipart(&self, len: usize) -> bool {
        len > self.multipart_threshold
    }

    pub fn part_count(&self, len: usize) -> usize {
        len.div_ceil(self.part_size.max(1))
    }

    /// Split `payload` into numbered parts without copying.
    pub fn partition(&self, payload: &Bytes) -> Vec<(i32, Bytes)> {
        let part_size = self.part_size.max(1);
        (0..self.part_count(payload.len()))
            .map(|idx| {
                let start = idx * part_size;
                let end = (start + part_size).min(payload.len());
                (idx as i32 + 1, payload.slice(start..end))
            })
            .collect()
    }
}

/// Writes payloads to one backend according to `UploadSettings`.
pub struct UploadOrchestrator<'a> {
    backend: &'a dyn S3Backend,
    settings: UploadSettings,
}

impl<'a> UploadOrchestrator<'a> {
    pub fn new(backend: &'a dyn S3Backend, settings: UploadSettings) -> Self {
        Self { backend, settings }
    }

    pub async fn upload(
        &self,
        bucket: &str,
        key: &str,
        payload: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<UploadedObject> {
        let size = payload.len() as u64;
        if !self.settings.uses_multipart(payload.len()) {
            self.backend
                .put_object(bucket, key, payload, content_type)
                .await?;
            debug!(bucket, key, size, "single-shot upload complete");
            return Ok(UploadedObject {
                key: key.to_string(),
                size,
            });
        }

        self.upload_multipart(bucket, key, payload, content_type)
            .await?;
        Ok(UploadedObject {
            key: key.to_string(),
            size,
        })
    }

    async fn upload_multipart(
        &self,
        bucket: &str,
        key: &str,
        payload: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        let upload_id = match self
            .backend
            .create_multipart_upload(bucket, key, content_type)
            .await
        {
            Ok(Some(id)) => id,
            Ok(None) => {
                return Err(StorageError::MultipartInitFailed(
                    "backend returned no upload id".into(),
                ));
            }
            Err(err) => return Err(err),
        };

        let mut session = UploadSession::new(bucket, key, upload_id);
        let result = self.transfer(&mut session, &payload).await;

        match result {
            Ok(()) => {
                info!(
                    bucket,
                    key,
                    size = payload.len(),
                    parts = session.parts.len(),
                    "multipart upload complete"
                );
                Ok(())
            }
            Err(err) => {
                warn!(bucket, key, upload_id = %session.upload_id, error = %err, "aborting multipart upload");
                if let Err(abort_err) = self
                    .backend
                    .abort_multipart_upload(bucket, key, &session.upload_id)
                    .await
                {
                    error!(
                        bucket,
                        key,
                        upload_id = %session.upload_id,
                        error = %abort_err,
                        "failed to abort multipart upload"
                    );
                }
                Err(err)
            }
        }
    }

    /// Steps 2–5: upload every part, then complete in part-number order.
    async fn transfer(&self, session: &mut UploadSession, payload: &Bytes) -> StorageResult<()> {
        session.parts = self
            .upload_parts(&session.bucket, &session.key, &session.upload_id, payload)
            .await?;
        let ordered = session.ordered_parts();
        self.backend
            .complete_multipart_upload(&session.bucket, &session.key, &session.upload_id, &ordered)
            .await
    }

    /// Upload parts window by window. Returns parts in completion order.
    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        payload: &Bytes,
    ) -> StorageResult<Vec<CompletedPartInfo>> {
        let parts = self.settings.partition(payload);
        let window = self.settings.part_concurrency.max(1);
        let mut completed = Vec::with_capacity(parts.len());

        for batch in parts.chunks(window) {
            let mut in_flight: FuturesUnordered<_> = batch
                .iter()
                .map(|(part_number, body)| async move {
                    let result = self
                        .backend
                        .upload_part(bucket, key, upload_id, *part_number, body.clone())
                        .await;
                    (*part_number, result)
                })
                .collect();

            let mut first_error = None;
            while let Some((part_number, result)) = in_flight.next().await {
                match result {
                    Ok(Some(etag)) => {
                        debug!(key, part_number, "part uploaded");
                        completed.push(CompletedPartInfo { part_number, etag });
                    }
                    Ok(None) => {
                        first_error.get_or_insert(StorageError::MultipartPartFailed {
                            part_number,
                            status: None,
                            code: None,
                            message: "backend returned no ETag".into(),
                        });
                    }
                    Err(err) => {
                        first_error.get_or_insert_with(|| part_failure(part_number, err));
                    }
                }
            }

            if let Some(err) = first_error {
                return Err(err);
            }
        }

        Ok(completed)
    }
}

/// Wrap a part error, keeping the backend's status and S3 code.
fn part_failure(part_number: i32, err: StorageError) -> StorageError {
    match err {
        StorageError::Backend {
            status,
            code,
            message,
        } => StorageError::MultipartPartFailed {
            part_number,
            status,
            code,
            message,
        },
        other => StorageError::MultipartPartFailed {
            part_number,
            status: None,
            code: None,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_backend::{MemoryBackend, Operation};
    use std::time::Duration;

    fn small_settings() -> UploadSettings {
        UploadSettings {
            multipart_threshold: 100,
            part_size: 10,
            part_concurrency: 5,
        }
    }

    #[test]
    fn design_defaults_split_250_mib_into_25_parts() {
        let settings = UploadSettings::default();
        let len = 250 * MIB;
        assert!(settings.uses_multipart(len));
        assert_eq!(settings.part_count(len), 25);
        assert!(!settings.uses_multipart(100 * MIB));
    }

    #[test]
    fn partition_keeps_short_tail() {
        let settings = small_settings();
        let payload = Bytes::from(vec![7u8; 25]);
        let parts = settings.partition(&payload);
        let sizes: Vec<(i32, usize)> = parts.iter().map(|(n, b)| (*n, b.len())).collect();
        assert_eq!(sizes, vec![(1, 10), (2, 10), (3, 5)]);
    }

    #[tokio::test]
    async fn small_payload_uses_single_put() {
        let backend = MemoryBackend::new();
        backend.seed("demo", &[]);
        let orchestrator = UploadOrchestrator::new(&backend, small_settings());

        let uploaded = orchestrator
            .upload("demo", "a.bin", Bytes::from(vec![1u8; 100]), None)
            .await
            .unwrap();

        assert_eq!(uploaded.size, 100);
        assert_eq!(backend.count_calls(Operation::PutObject), 1);
        assert_eq!(backend.count_calls(Operation::CreateMultipartUpload), 0);
    }

    #[tokio::test]
    async fn completes_parts_in_ascending_order() {
        let backend = MemoryBackend::new().with_part_delay(Duration::from_millis(2));
        backend.seed("demo", &[]);
        let orchestrator = UploadOrchestrator::new(&backend, small_settings());
        let payload: Vec<u8> = (0..250u32).map(|i| (i % 251) as u8).collect();

        orchestrator
            .upload("demo", "big.bin", Bytes::from(payload.clone()), None)
            .await
            .unwrap();

        let arrival = backend.part_arrival_order();
        assert_eq!(arrival.len(), 25);
        let mut sorted_arrival = arrival.clone();
        sorted_arrival.sort();
        assert_ne!(arrival, sorted_arrival, "parts should finish out of order");

        let completions = backend.completed_part_lists();
        assert_eq!(completions, vec![(1..=25).collect::<Vec<i32>>()]);
        assert_eq!(backend.object_bytes("demo", "big.bin").unwrap(), payload);
    }

    #[tokio::test]
    async fn failed_part_aborts_upload() {
        let backend = MemoryBackend::new();
        backend.seed("demo", &[]);
        backend.fail_part(7);
        let orchestrator = UploadOrchestrator::new(&backend, small_settings());

        let err = orchestrator
            .upload("demo", "big.bin", Bytes::from(vec![0u8; 250]), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StorageError::MultipartPartFailed { part_number: 7, .. }
        ));
        assert_eq!(backend.count_calls(Operation::AbortMultipartUpload), 1);
        assert_eq!(backend.count_calls(Operation::CompleteMultipartUpload), 0);
        assert!(backend.object_bytes("demo", "big.bin").is_none());
        assert_eq!(backend.open_multipart_uploads(), 0);
        // the whole window holding part 7 ran, nothing after it started
        assert_eq!(backend.part_arrival_order().len(), 9);
    }

    #[tokio::test]
    async fn missing_upload_id_is_fatal() {
        let backend = MemoryBackend::new();
        backend.seed("demo", &[]);
        backend.withhold_upload_ids();
        let orchestrator = UploadOrchestrator::new(&backend, small_settings());

        let err = orchestrator
            .upload("demo", "big.bin", Bytes::from(vec![0u8; 101]), None)
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::MultipartInitFailed(_)));
        assert_eq!(backend.count_calls(Operation::UploadPart), 0);
    }

    #[tokio::test]
    async fn initiate_error_keeps_backend_status() {
        let backend = MemoryBackend::new();
        let orchestrator = UploadOrchestrator::new(&backend, small_settings());

        let err = orchestrator
            .upload("nobucket", "big.bin", Bytes::from(vec![0u8; 150]), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StorageError::Backend {
                status: Some(404),
                ..
            }
        ));
        assert_eq!(err.s3_code(), Some("NoSuchBucket"));
        assert_eq!(backend.count_calls(Operation::UploadPart), 0);
    }

    #[tokio::test]
    async fn part_error_keeps_backend_code() {
        let backend = MemoryBackend::new();
        backend.seed("demo", &[]);
        backend.fail_part(2);
        let orchestrator = UploadOrchestrator::new(&backend, small_settings());

        let err = orchestrator
            .upload("demo", "big.bin", Bytes::from(vec![0u8; 120]), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StorageError::MultipartPartFailed {
                part_number: 2,
                status: Some(500),
                ..
            }
        ));
        assert_eq!(err.s3_code(), Some("InternalError"));
    }

    #[tokio::test]
    async fn abort_failure_keeps_original_error() {
        let backend = MemoryBackend::new();
        backend.seed("demo", &[]);
        backend.fail_part(1);
        backend.fail_operation(Operation::AbortMultipartUpload, "big.bin");
        let orchestrator = UploadOrchestrator::new(&backend, small_settings());

        let err = orchestrator
            .upload("demo", "big.bin", Bytes::from(vec![0u8; 120]), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StorageError::MultipartPartFailed { part_number: 1, .. }
        ));
    }
}
