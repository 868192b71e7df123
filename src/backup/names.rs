//! Entry names inside backup archives.

use crate::size::format_bytes;
use crate::store::path;

pub const README_ENTRY: &str = "README.TXT";
pub const TREE_ENTRY: &str = "repository.json";
pub const FILES_MANIFEST_ENTRY: &str = "files.json";
pub const FILES_LISTING_ENTRY: &str = "files.txt";
pub const NODE_ENTRY: &str = "node.json";

const FALLBACK_EXTENSION: &str = "file";

/// Replace every character that is not alphanumeric with `_`.
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Sanitized extension of `file_name`, or `file` when there is none.
pub fn extension(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => sanitize(ext),
        _ => FALLBACK_EXTENSION.to_string(),
    }
}

/// Archive name of a file's bytes: `<fileId>.<ext>`.
pub fn file_entry_name(file_id: &str, file_name: &str) -> String {
    format!("{}.{}", sanitize(file_id), extension(file_name))
}

/// Directory of `node_path` inside the archive.
pub fn node_dir(stem: &str, node_path: &str) -> String {
    if node_path == path::ROOT {
        stem.to_string()
    } else {
        format!("{}{}", stem, node_path)
    }
}

pub fn entry(stem: &str, node_path: &str, leaf: &str) -> String {
    format!("{}/{}", node_dir(stem, node_path), leaf)
}

/// One line of `files.txt`.
pub fn listing_line(file_id: &str, file_name: &str, size: u64) -> String {
    format!(
        "{} {} {}\n",
        file_entry_name(file_id, file_name),
        format_bytes(size),
        file_name
    )
}

/// Entries that carry metadata, not file content.
pub fn is_metadata_entry(name: &str) -> bool {
    let leaf = name.rsplit('/').next().unwrap_or(name);
    matches!(
        leaf,
        README_ENTRY | TREE_ENTRY | FILES_MANIFEST_ENTRY | FILES_LISTING_ENTRY | NODE_ENTRY
    )
}
