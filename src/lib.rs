//! Contentrepo: embedded hierarchical content repository
//!
//! A tree of named nodes carrying properties and binary files, persisted in one of two
//! node stores (a local segment store or a SQLite database). Files can be encrypted at
//! rest, are checksummed over their stored bytes, and whole subtrees can be written to
//! and restored from portable zip archives.

pub mod backup;
pub mod checksum;
pub mod concurrency;
pub mod config;
pub mod crypto;
pub mod error;
pub mod file;
pub mod logging;
pub mod repository;
pub mod sanity;
pub mod size;
pub mod store;
pub mod tree;
pub mod types;

pub use backup::{backup, restore, BackupJob, BackupReport, RestoreReport, RESTORE_CONFIRMATION};
pub use crate::config::RepositoryConfig;
pub use error::{RepoError, StorageError};
pub use file::FileRecord;
pub use repository::{FileInfoChange, Reencryption, RepositoryService, SessionStream, StoreOptions};
pub use sanity::{SanityCheckJob, SanityReport};
pub use size::SizePolicy;
pub use types::{Property, PropertyValue, ZipMode};
