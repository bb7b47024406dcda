//! Represents a listed object: either a file or a synthesized folder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single entry of a bucket listing.
///
/// `is_folder` is a listing-time classification. It is true only for entries
/// derived from a common prefix and is never stored on the backend.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    /// Full key inside the bucket. Folder keys end with `/`.
    pub key: String,

    /// Size in bytes, 0 for folders.
    pub size: i64,

    /// Last modification timestamp reported by the backend.
    pub last_modified: Option<DateTime<Utc>>,

    pub is_folder: bool,

    /// MIME type, only known for HEAD-style metadata lookups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl ObjectInfo {
    /// Folder entry synthesized from a common prefix.
    pub fn folder(prefix: impl Into<String>) -> Self {
        Self {
            key: prefix.into(),
            size: 0,
            last_modified: None,
            is_folder: true,
            content_type: None,
            etag: None,
        }
    }

    /// Final path segment, without the trailing `/` for folders.
    pub fn name(&self) -> &str {
        let trimmed = self.key.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }
}

/// Folder/file view of one delimited listing.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectListing {
    /// Folders first, then files, each in backend key order.
    pub objects: Vec<ObjectInfo>,

    /// Raw common prefixes of the listing.
    pub prefixes: Vec<String>,
}

/// A key that could not be processed during a multi-key operation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FailedKey {
    pub key: String,
    pub error: String,

    /// Backend error code (e.g. `AccessDenied`) when one was reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Result of a delete over several keys. Failures never stop the remaining
/// attempts, so `deleted.len() + failed.len()` equals the number of targets.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: Vec<String>,
    pub failed: Vec<FailedKey>,
}

/// Outcome of a copy-then-delete move (or a copy) over one or more keys.
///
/// A move is not atomic: when some keys fail, the ones that succeeded stay
/// moved and the failed ones stay where they were.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum MutationOutcome {
    Completed {
        keys: Vec<String>,
    },
    PartiallyCompleted {
        succeeded: Vec<String>,
        failed: Vec<FailedKey>,
    },
    Failed {
        failed: Vec<FailedKey>,
    },
}

impl MutationOutcome {
    /// Classify the per-key results of one operation.
    pub fn from_parts(succeeded: Vec<String>, failed: Vec<FailedKey>) -> Self {
        match (succeeded.is_empty(), failed.is_empty()) {
            (_, true) => MutationOutcome::Completed { keys: succeeded },
            (true, false) => MutationOutcome::Failed { failed },
            (false, false) => MutationOutcome::PartiallyCompleted { succeeded, failed },
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, MutationOutcome::Completed { .. })
    }
}
