//! Boundary validation for bucket names, object keys and prefixes.
//!
//! Handlers run these before any gateway call; the gateway runs them again
//! so library callers get the same guarantees.

use crate::services::{StorageError, StorageResult};

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// Validate a bucket name.
///
/// Equivalent to `^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$` with no `..`.
pub fn validate_bucket_name(name: &str) -> StorageResult<()> {
    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(StorageError::invalid(format!(
            "bucket name `{}` must be between 3 and 63 characters",
            name
        )));
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(StorageError::invalid(format!(
            "bucket name `{}` may only contain lowercase letters, digits, dots, and hyphens",
            name
        )));
    }

    let edge_ok = |c: Option<char>| matches!(c, Some('a'..='z' | '0'..='9'));
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        return Err(StorageError::invalid(format!(
            "bucket name `{}` must start and end with a lowercase letter or digit",
            name
        )));
    }

    if name.contains("..") {
        return Err(StorageError::invalid(format!(
            "bucket name `{}` cannot contain consecutive dots",
            name
        )));
    }

    Ok(())
}

/// Validate an object key: non-empty, at most 1024 characters, no `../`.
pub fn validate_object_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::invalid("object key cannot be empty"));
    }
    if key.chars().count() > MAX_OBJECT_KEY_LEN {
        return Err(StorageError::invalid(format!(
            "object key too long (max {} characters)",
            MAX_OBJECT_KEY_LEN
        )));
    }
    if key.contains("../") {
        return Err(StorageError::invalid("object key cannot contain `../`"));
    }
    Ok(())
}

/// Validate a listing/upload prefix. The empty prefix (bucket root) is valid.
pub fn validate_prefix(prefix: &str) -> StorageResult<()> {
    if prefix.is_empty() {
        return Ok(());
    }
    validate_object_key(prefix)
}
