//! Error types
//!
//! `RepoError` is the taxonomy surfaced to callers of the repository. Failures of the
//! physical engines are wrapped in `StorageError` so callers can match on the lookup and
//! policy variants without caring which backend is active.

use crate::size::format_bytes;
use thiserror::Error;

/// Failures raised by the physical node stores.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("local segment store error: {0}")]
    Sled(#[from] sled::Error),

    #[error("relational store error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("record encoding error: {0}")]
    Encoding(String),
}

/// Errors surfaced by the repository.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("File not found: {file_id} in {node_path}")]
    FileNotFound { node_path: String, file_id: String },

    #[error(
        "File too large: {} ({actual} bytes) exceeds the limit of {} ({limit} bytes)",
        human(.actual),
        human(.limit)
    )]
    FileTooLarge { limit: u64, actual: u64 },

    #[error("Wrong password for file {0}")]
    WrongPassword(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("File {0} is encrypted and no password was given")]
    DecryptionRequired(String),

    #[error("Restore aborted: binary entry {0} precedes the repository tree")]
    RestoreOrderViolation(String),

    #[error("Restore rejected: security confirmation does not match")]
    RestoreConfirmationRejected,

    #[error("Repository backend is already initialized")]
    DuplicateInitialization,

    #[error("Repository backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Archive error: {0}")]
    ArchiveError(String),

    #[error(transparent)]
    StorageError(#[from] StorageError),
}

fn human(bytes: &u64) -> String {
    format_bytes(*bytes)
}

impl From<std::io::Error> for RepoError {
    fn from(err: std::io::Error) -> Self {
        RepoError::StorageError(StorageError::IoError(err))
    }
}

impl From<sled::Error> for RepoError {
    fn from(err: sled::Error) -> Self {
        RepoError::StorageError(StorageError::Sled(err))
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(err: rusqlite::Error) -> Self {
        RepoError::StorageError(StorageError::Sql(err))
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(err: serde_json::Error) -> Self {
        RepoError::StorageError(StorageError::Encoding(err.to_string()))
    }
}

impl From<zip::result::ZipError> for RepoError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => RepoError::from(io),
            other => RepoError::ArchiveError(other.to_string()),
        }
    }
}

impl From<config::ConfigError> for RepoError {
    fn from(err: config::ConfigError) -> Self {
        RepoError::ConfigError(err.to_string())
    }
}
