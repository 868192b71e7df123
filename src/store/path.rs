//! Repository paths
//!
//! Paths are `/`-separated and relative to the top-level node, which is written `/`.
//! Segments are NFC-normalized so visually identical names map to one node.

use crate::error::RepoError;
use unicode_normalization::UnicodeNormalization;

/// Name of the reserved child collection holding a node's files.
pub const FILES_NODE: &str = "__FILES";

pub const ROOT: &str = "/";

/// Normalize a path: drop empty and `.` segments, reject `..`.
pub fn normalize(path: &str) -> Result<String, RepoError> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment.trim() {
            "" | "." => {}
            ".." => {
                return Err(RepoError::InvalidPath(format!(
                    "parent references are not allowed: {}",
                    path
                )))
            }
            s => segments.push(normalize_name(s)?),
        }
    }
    Ok(format!("/{}", segments.join("/")))
}

/// Validate and NFC-normalize a single node name.
pub fn normalize_name(name: &str) -> Result<String, RepoError> {
    let name: String = name.trim().nfc().collect();
    if name.is_empty() || name == "." || name == ".." {
        return Err(RepoError::InvalidPath(format!("invalid node name '{}'", name)));
    }
    if name.contains('/') || name.chars().any(char::is_control) {
        return Err(RepoError::InvalidPath(format!("invalid node name '{}'", name)));
    }
    Ok(name)
}

/// Split a normalized path into segments.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Parent of a normalized path; `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of a normalized path; empty for the root.
pub fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// Child path without re-validating the parent.
pub fn child(parent: &str, name: &str) -> String {
    if parent == ROOT {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Path of the files collection of `node`.
pub fn files_collection(node: &str) -> String {
    child(node, FILES_NODE)
}

/// Path of one file node.
pub fn file_node(node: &str, file_id: &str) -> String {
    child(&files_collection(node), file_id)
}

/// True if `path` equals `prefix` or lies below it.
pub fn is_within(path: &str, prefix: &str) -> bool {
    if prefix == ROOT {
        return true;
    }
    path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}

/// User-visible node paths must not address the reserved files collection.
pub fn reject_reserved(path: &str) -> Result<(), RepoError> {
    if segments(path).any(|s| s == FILES_NODE) {
        return Err(RepoError::InvalidPath(format!(
            "{} is reserved for file metadata: {}",
            FILES_NODE, path
        )));
    }
    Ok(())
}
