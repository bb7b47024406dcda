//! Rename, copy and delete over files and folder prefixes.
//!
//! Folders are prefixes, so every folder mutation is a fan-out over the keys
//! a recursive listing returns. Per-key work runs with bounded concurrency;
//! a failed key never stops its siblings and every dispatched future is
//! awaited before the outcome is reported.

use crate::{
    models::object::{DeleteOutcome, FailedKey, MutationOutcome},
    services::{
        StorageError, StorageResult,
        backend::{ListPageRequest, S3Backend},
        keyspace,
    },
    validation,
};
use futures::{StreamExt, stream};
use serde::Deserialize;
use tracing::{debug, warn};

/// Listing passes `empty_bucket` makes before giving up on a bucket that
/// keeps refilling.
const EMPTY_BUCKET_PASSES: usize = 3;

/// One entry of a batch delete request.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTarget {
    pub key: String,
    #[serde(default)]
    pub is_folder: bool,
}

impl DeleteTarget {
    pub fn file(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            is_folder: false,
        }
    }

    pub fn folder(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            is_folder: true,
        }
    }
}

pub struct MutationEngine<'a> {
    backend: &'a dyn S3Backend,
    concurrency: usize,
}

impl<'a> MutationEngine<'a> {
    pub fn new(backend: &'a dyn S3Backend, concurrency: usize) -> Self {
        Self {
            backend,
            concurrency: concurrency.max(1),
        }
    }

    /// Every key under `prefix`, at any depth, in listing order.
    pub async fn list_all_keys(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut token = None;
        loop {
            let request = ListPageRequest::recursive(prefix).after(token);
            let page = self.backend.list_objects_page(bucket, &request).await?;
            keys.extend(page.objects.into_iter().map(|o| o.key));
            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(keys)
    }

    /// Copy-then-delete rename of a file, or of every key under a folder.
    ///
    /// For a file, a failed copy is returned as an error and nothing is
    /// deleted; a failed delete after a successful copy yields `Failed` with
    /// both keys left in place. For a folder, each key is moved on its own and
    /// the outcome lists the source keys that moved and the ones that did not.
    pub async fn rename(
        &self,
        bucket: &str,
        old_key: &str,
        new_key: &str,
    ) -> StorageResult<MutationOutcome> {
        if old_key == new_key {
            return Err(StorageError::invalid("source and destination keys are identical"));
        }

        if !keyspace::is_folder_key(old_key) {
            if keyspace::is_folder_key(new_key) {
                return Err(StorageError::invalid(format!(
                    "cannot rename file `{}` to folder key `{}`",
                    old_key, new_key
                )));
            }
            self.backend
                .copy_object(bucket, old_key, bucket, new_key)
                .await?;
            return Ok(match self.backend.delete_object(bucket, old_key).await {
                Ok(()) => {
                    debug!(bucket, from = old_key, to = new_key, "file renamed");
                    MutationOutcome::Completed {
                        keys: vec![old_key.to_string()],
                    }
                }
                Err(err) => {
                    warn!(bucket, from = old_key, to = new_key, error = %err, "rename left the original in place");
                    MutationOutcome::Failed {
                        failed: vec![leftover(old_key, new_key, &err)],
                    }
                }
            });
        }

        let new_prefix = folder_prefix(new_key);
        if new_prefix == old_key || new_prefix.starts_with(old_key) {
            return Err(StorageError::invalid(format!(
                "cannot move folder `{}` into itself",
                old_key
            )));
        }

        let keys = self.existing_keys(bucket, old_key).await?;
        let moves: Vec<_> = keys
            .into_iter()
            .map(|key| {
                let target = retarget(&key, old_key, &new_prefix);
                self.move_key(bucket, key, target)
            })
            .collect();
        let results: Vec<Result<String, FailedKey>> = stream::iter(moves)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let outcome = split_results(results);
        log_outcome("rename", bucket, old_key, &outcome);
        Ok(outcome)
    }

    /// Copy a file, or every key under a folder with its prefix rewritten.
    pub async fn copy(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> StorageResult<MutationOutcome> {
        if source_bucket == dest_bucket && source_key == dest_key {
            return Err(StorageError::invalid("source and destination are identical"));
        }

        if !keyspace::is_folder_key(source_key) {
            if keyspace::is_folder_key(dest_key) {
                return Err(StorageError::invalid(format!(
                    "cannot copy file `{}` to folder key `{}`",
                    source_key, dest_key
                )));
            }
            self.backend
                .copy_object(source_bucket, source_key, dest_bucket, dest_key)
                .await?;
            return Ok(MutationOutcome::Completed {
                keys: vec![source_key.to_string()],
            });
        }

        let dest_prefix = folder_prefix(dest_key);
        let keys = self.existing_keys(source_bucket, source_key).await?;
        let copies: Vec<_> = keys
            .into_iter()
            .map(|key| {
                let target = retarget(&key, source_key, &dest_prefix);
                self.copy_key(source_bucket, key, dest_bucket, target)
            })
            .collect();
        let results: Vec<Result<String, FailedKey>> = stream::iter(copies)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let outcome = split_results(results);
        log_outcome("copy", source_bucket, source_key, &outcome);
        Ok(outcome)
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.backend.delete_object(bucket, key).await?;
        debug!(bucket, key, "object deleted");
        Ok(())
    }

    /// Delete every key under `prefix`, including its marker.
    ///
    /// Per-key failures are collected and the remaining keys are still
    /// attempted. Only a failed listing is returned as an error.
    pub async fn delete_folder(&self, bucket: &str, prefix: &str) -> StorageResult<DeleteOutcome> {
        let prefix = folder_prefix(prefix);
        let keys = self.list_all_keys(bucket, &prefix).await?;

        let deletes: Vec<_> = keys
            .into_iter()
            .map(|key| self.delete_key(bucket, key))
            .collect();
        let results: Vec<Result<String, FailedKey>> = stream::iter(deletes)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut outcome = DeleteOutcome::default();
        for result in results {
            match result {
                Ok(key) => outcome.deleted.push(key),
                Err(failed) => outcome.failed.push(failed),
            }
        }
        outcome.deleted.sort();
        outcome.failed.sort_by(|a, b| a.key.cmp(&b.key));

        if outcome.failed.is_empty() {
            debug!(bucket, prefix = %prefix, deleted = outcome.deleted.len(), "folder deleted");
        } else {
            warn!(
                bucket,
                prefix = %prefix,
                deleted = outcome.deleted.len(),
                failed = outcome.failed.len(),
                "folder partially deleted"
            );
        }
        Ok(outcome)
    }

    /// Delete each target on its own. Every target ends up in exactly one of
    /// `deleted` or `failed`, in request order.
    pub async fn batch_delete(&self, bucket: &str, targets: Vec<DeleteTarget>) -> DeleteOutcome {
        let deletes: Vec<_> = targets
            .into_iter()
            .map(|target| self.delete_target(bucket, target))
            .collect();
        let results: Vec<Result<String, FailedKey>> = stream::iter(deletes)
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut outcome = DeleteOutcome::default();
        for result in results {
            match result {
                Ok(key) => outcome.deleted.push(key),
                Err(failed) => outcome.failed.push(failed),
            }
        }
        outcome
    }

    /// Remove every object in `bucket`, page by page, with batch deletes.
    ///
    /// Returns once a fresh listing comes back empty. A key the backend
    /// refuses to delete aborts with `PartialFailure`.
    pub async fn empty_bucket(&self, bucket: &str) -> StorageResult<usize> {
        let mut removed = 0usize;

        for pass in 1..=EMPTY_BUCKET_PASSES {
            let mut token = None;
            loop {
                let request = ListPageRequest::recursive("").after(token);
                let page = self.backend.list_objects_page(bucket, &request).await?;
                let keys: Vec<String> = page.objects.into_iter().map(|o| o.key).collect();

                if !keys.is_empty() {
                    let failures = self.backend.delete_objects(bucket, &keys).await?;
                    if !failures.is_empty() {
                        let failed: Vec<FailedKey> = failures
                            .into_iter()
                            .map(|f| FailedKey {
                                key: f.key,
                                error: f.message,
                                code: f.code,
                            })
                            .collect();
                        let succeeded = keys
                            .into_iter()
                            .filter(|k| !failed.iter().any(|f| &f.key == k))
                            .collect();
                        return Err(StorageError::PartialFailure { succeeded, failed });
                    }
                    removed += keys.len();
                    debug!(bucket, batch = keys.len(), removed, "batch deleted");
                }

                match page.next_continuation_token {
                    Some(next) => token = Some(next),
                    None => break,
                }
            }

            let recheck = ListPageRequest {
                max_keys: Some(1),
                ..ListPageRequest::recursive("")
            };
            if self
                .backend
                .list_objects_page(bucket, &recheck)
                .await?
                .objects
                .is_empty()
            {
                return Ok(removed);
            }
            debug!(bucket, pass, "objects remain after emptying pass");
        }

        Err(StorageError::Backend {
            status: Some(409),
            code: Some("BucketNotEmpty".into()),
            message: format!(
                "bucket `{}` still has objects after {} emptying passes",
                bucket, EMPTY_BUCKET_PASSES
            ),
        })
    }

    /// Keys under a folder prefix; a folder with no keys at all does not exist.
    async fn existing_keys(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let keys = self.list_all_keys(bucket, prefix).await?;
        if keys.is_empty() {
            return Err(StorageError::Backend {
                status: Some(404),
                code: Some("NoSuchKey".into()),
                message: format!("folder `{}` does not exist", prefix),
            });
        }
        Ok(keys)
    }

    /// Copy then delete one key. The delete only runs after a successful copy.
    async fn move_key(&self, bucket: &str, key: String, target: String) -> Result<String, FailedKey> {
        if let Err(err) = self.backend.copy_object(bucket, &key, bucket, &target).await {
            return Err(err.for_key(key));
        }
        match self.backend.delete_object(bucket, &key).await {
            Ok(()) => Ok(key),
            Err(err) => Err(leftover(&key, &target, &err)),
        }
    }

    async fn copy_key(
        &self,
        source_bucket: &str,
        key: String,
        dest_bucket: &str,
        target: String,
    ) -> Result<String, FailedKey> {
        match self
            .backend
            .copy_object(source_bucket, &key, dest_bucket, &target)
            .await
        {
            Ok(()) => Ok(key),
            Err(err) => Err(err.for_key(key)),
        }
    }

    async fn delete_key(&self, bucket: &str, key: String) -> Result<String, FailedKey> {
        match self.backend.delete_object(bucket, &key).await {
            Ok(()) => Ok(key),
            Err(err) => Err(err.for_key(key)),
        }
    }

    async fn delete_target(&self, bucket: &str, target: DeleteTarget) -> Result<String, FailedKey> {
        let key = target.key;
        if let Err(err) = validation::validate_object_key(&key) {
            return Err(err.for_key(key));
        }
        if !target.is_folder && !keyspace::is_folder_key(&key) {
            return self.delete_key(bucket, key).await;
        }
        match self.delete_folder(bucket, &key).await {
            Ok(outcome) if outcome.failed.is_empty() => Ok(key),
            Ok(outcome) => Err(folder_failure(key, outcome)),
            Err(err) => Err(err.for_key(key)),
        }
    }
}

/// Destination of `key` when everything under `from` moves under `to`.
fn retarget(key: &str, from: &str, to: &str) -> String {
    keyspace::rename_target(key, from, to).unwrap_or_else(|| format!("{}{}", to, key))
}

fn folder_prefix(key: &str) -> String {
    if keyspace::is_folder_key(key) {
        key.to_string()
    } else {
        format!("{}{}", key, keyspace::DELIMITER)
    }
}

fn leftover(key: &str, target: &str, err: &StorageError) -> FailedKey {
    FailedKey {
        key: key.to_string(),
        error: format!(
            "copied to `{}` but the original could not be deleted: {}",
            target, err
        ),
        code: err.s3_code().map(str::to_string),
    }
}

fn folder_failure(key: String, outcome: DeleteOutcome) -> FailedKey {
    let total = outcome.deleted.len() + outcome.failed.len();
    FailedKey {
        error: format!(
            "{} of {} keys under the folder could not be deleted",
            outcome.failed.len(),
            total
        ),
        code: outcome.failed.first().and_then(|f| f.code.clone()),
        key,
    }
}

fn split_results(results: Vec<Result<String, FailedKey>>) -> MutationOutcome {
    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    for result in results {
        match result {
            Ok(key) => succeeded.push(key),
            Err(f) => failed.push(f),
        }
    }
    succeeded.sort();
    failed.sort_by(|a, b| a.key.cmp(&b.key));
    MutationOutcome::from_parts(succeeded, failed)
}

fn log_outcome(action: &str, bucket: &str, prefix: &str, outcome: &MutationOutcome) {
    match outcome {
        MutationOutcome::Completed { keys } => {
            debug!(action, bucket, prefix, keys = keys.len(), "folder mutation complete")
        }
        MutationOutcome::PartiallyCompleted { succeeded, failed } => warn!(
            action,
            bucket,
            prefix,
            succeeded = succeeded.len(),
            failed = failed.len(),
            "folder mutation partially applied"
        ),
        MutationOutcome::Failed { failed } => {
            warn!(action, bucket, prefix, failed = failed.len(), "folder mutation failed")
        }
    }
}
