//! Folder semantics over a flat key space.
//!
//! S3 has no directories. A "folder" is the set of keys sharing a prefix up
//! to the next delimiter, and an empty folder is a single zero-byte marker
//! key ending with `/`. Everything in this module is a pure function of keys.

use crate::{
    models::object::{ObjectInfo, ObjectListing},
    services::{StorageError, StorageResult, backend::RawObject},
};
use std::collections::{BTreeSet, HashSet};

pub const DELIMITER: &str = "/";

/// Folder keys are the ones ending with the delimiter.
pub fn is_folder_key(key: &str) -> bool {
    key.ends_with(DELIMITER)
}

/// Common prefix `key` collapses into under `prefix`, if any.
///
/// `docs/img/a.png` under `docs/` with `/` collapses into `docs/img/`;
/// `docs/readme.txt` does not collapse.
pub fn common_prefix_of(key: &str, prefix: &str, delimiter: &str) -> Option<String> {
    if delimiter.is_empty() {
        return None;
    }
    let after_prefix = key.strip_prefix(prefix)?;
    let pos = after_prefix.find(delimiter)?;
    let mut combined = String::with_capacity(prefix.len() + pos + delimiter.len());
    combined.push_str(prefix);
    combined.push_str(&after_prefix[..pos + delimiter.len()]);
    Some(combined)
}

/// Turn one delimited listing into the folder/file view.
///
/// - common prefixes become folder entries (size 0, `is_folder`)
/// - the content entry equal to `prefix` is the folder's own marker and is
///   dropped
/// - content entries that still contain the delimiter past `prefix` (from
///   backends that ignore the delimiter) are folded into their folder
pub fn folder_view<I, P>(
    entries: I,
    common_prefixes: P,
    prefix: &str,
    delimiter: &str,
) -> ObjectListing
where
    I: IntoIterator<Item = RawObject>,
    P: IntoIterator<Item = String>,
{
    let mut folders: BTreeSet<String> = common_prefixes
        .into_iter()
        .filter(|p| p != prefix)
        .collect();
    let mut files = Vec::new();

    for entry in entries {
        if entry.key == prefix || !entry.key.starts_with(prefix) {
            continue;
        }
        if let Some(folder) = common_prefix_of(&entry.key, prefix, delimiter) {
            folders.insert(folder);
            continue;
        }
        files.push(ObjectInfo {
            key: entry.key,
            size: entry.size,
            last_modified: entry.last_modified,
            is_folder: false,
            content_type: None,
            etag: entry.etag,
        });
    }

    let prefixes: Vec<String> = folders.into_iter().collect();
    let mut objects: Vec<ObjectInfo> = prefixes.iter().cloned().map(ObjectInfo::folder).collect();
    objects.extend(files);

    ObjectListing { objects, prefixes }
}

/// Normalize a user-supplied folder path into a marker key ending in `/`.
pub fn normalize_folder_path(path: &str) -> StorageResult<String> {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(StorageError::invalid("folder path cannot be empty"));
    }
    Ok(format!("{}{}", trimmed, DELIMITER))
}

/// Make a client-supplied filename safe to use as the last key segment.
///
/// Directory components are stripped and every character outside
/// `[A-Za-z0-9._-]` becomes `_`. A trailing ` (n)` duplicate counter on the
/// stem is kept so pre-resolved names like `photo (2).jpg` survive.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let (stem, extension) = split_extension(base);
    let (stem, counter) = split_counter(stem);

    let mut sanitized = replace_unsafe(stem);
    if let Some(n) = counter {
        sanitized.push_str(" (");
        sanitized.push_str(n);
        sanitized.push(')');
    }
    if let Some(ext) = extension {
        sanitized.push('.');
        sanitized.push_str(&replace_unsafe(ext));
    }

    if sanitized.trim_matches('.').is_empty() {
        return "unnamed".to_string();
    }
    sanitized
}

/// Join an upload prefix and a filename into an object key.
pub fn object_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() || prefix.ends_with(DELIMITER) {
        format!("{}{}", prefix, name)
    } else {
        format!("{}{}{}", prefix, DELIMITER, name)
    }
}

/// First of `name`, `name (1).ext`, `name (2).ext`, ... not in `existing`.
pub fn disambiguate(name: &str, existing: &HashSet<String>) -> String {
    if !existing.contains(name) {
        return name.to_string();
    }
    let (stem, extension) = split_extension(name);
    let mut n = 1usize;
    loop {
        let candidate = match extension {
            Some(ext) => format!("{} ({}).{}", stem, n, ext),
            None => format!("{} ({})", stem, n),
        };
        if !existing.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Rewrite `key` from under `old_prefix` to under `new_prefix`.
pub fn rename_target(key: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    key.strip_prefix(old_prefix)
        .map(|rest| format!("{}{}", new_prefix, rest))
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

fn split_counter(stem: &str) -> (&str, Option<&str>) {
    if !stem.ends_with(')') {
        return (stem, None);
    }
    if let Some(open) = stem.rfind(" (") {
        let digits = &stem[open + 2..stem.len() - 1];
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            return (&stem[..open], Some(digits));
        }
    }
    (stem, None)
}

fn replace_unsafe(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
