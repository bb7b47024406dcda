//! Represents a bucket as reported by the S3-compatible backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bucket on the backend.
///
/// Buckets are never cached: every listing re-fetches them from the backend,
/// which stays the only source of truth.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BucketInfo {
    /// Bucket name (unique per backend).
    pub name: String,

    /// When the bucket was created, if the backend reports it.
    pub creation_date: Option<DateTime<Utc>>,
}
