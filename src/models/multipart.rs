//! Multipart upload session bookkeeping.
//!
//! Sessions live only for the duration of one upload call and are never
//! persisted: every session ends in either completion or abort.

use serde::{Deserialize, Serialize};

/// One uploaded part, identified by its 1-based part number.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPartInfo {
    pub part_number: i32,
    pub etag: String,
}

/// An in-flight multipart upload.
#[derive(Clone, Debug)]
pub struct UploadSession {
    pub bucket: String,
    pub key: String,

    /// Backend-issued upload id.
    pub upload_id: String,

    pub parts: Vec<CompletedPartInfo>,
}

impl UploadSession {
    pub fn new(bucket: &str, key: &str, upload_id: String) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
            parts: Vec::new(),
        }
    }

    /// Parts in strictly ascending part-number order, as completion requires.
    pub fn ordered_parts(&self) -> Vec<CompletedPartInfo> {
        let mut parts = self.parts.clone();
        parts.sort_by_key(|p| p.part_number);
        parts.dedup_by_key(|p| p.part_number);
        parts
    }
}

/// An object written by the upload orchestrator.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadedObject {
    pub key: String,
    pub size: u64,
}
