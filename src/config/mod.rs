//! Configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional file, then
//! `CONTENTREPO__*` environment variables (nested keys separated by `__`).

pub mod facade;
pub mod paths;

pub mod merge {
    pub mod service;
}

pub mod sources {
    pub mod environment;
}

pub use facade::ConfigLoader;

use crate::error::RepoError;
use crate::logging::LoggingConfig;
use crate::size::SizePolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default name of the top-level node.
pub const DEFAULT_TOP_NODE: &str = "repository";

/// Default upper bound for one stored file (100 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

const DEFAULT_MAX_IDLE_CONNECTIONS: usize = 4;

fn default_top_node() -> String {
    DEFAULT_TOP_NODE.to_string()
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_max_idle_connections() -> usize {
    DEFAULT_MAX_IDLE_CONNECTIONS
}

fn default_daily() -> u32 {
    7
}

fn default_weekly() -> u32 {
    4
}

/// Root configuration of a repository instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Name of the top-level node; fixed for the lifetime of the repository.
    #[serde(default = "default_top_node")]
    pub top_node: String,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub files: FilesConfig,

    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            top_node: default_top_node(),
            storage: StorageConfig::default(),
            files: FilesConfig::default(),
            backup: BackupConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RepositoryConfig {
    /// Configuration for a local store rooted in `store_dir`.
    pub fn local(store_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.storage.store_dir = Some(store_dir.into());
        config
    }

    /// Configuration for a relational store at `database_url`.
    pub fn relational(database_url: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.storage.database_url = database_url.into();
        config
    }

    pub fn validate(&self) -> Result<(), RepoError> {
        if self.top_node.trim().is_empty() {
            return Err(RepoError::BackendUnavailable(
                "top-level node name must not be blank".to_string(),
            ));
        }
        if self.files.max_file_size == 0 {
            return Err(RepoError::ConfigError(
                "files.max_file_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn size_policy(&self) -> SizePolicy {
        SizePolicy::new(self.files.max_file_size)
    }
}

/// Physical store selection. A non-blank `database_url` selects the relational store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory of the local store; `None` means the platform data directory.
    #[serde(default)]
    pub store_dir: Option<PathBuf>,

    #[serde(default)]
    pub database_url: String,

    #[serde(default = "default_max_idle_connections")]
    pub max_idle_connections: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_dir: None,
            database_url: String::new(),
            max_idle_connections: default_max_idle_connections(),
        }
    }
}

impl StorageConfig {
    pub fn resolve_store_dir(&self) -> Result<PathBuf, RepoError> {
        match &self.store_dir {
            Some(dir) if !dir.as_os_str().is_empty() => Ok(dir.clone()),
            _ => Ok(paths::data_dir()?.join("store")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Where backup archives are written; `None` means the platform data directory.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Subtrees left out of every backup.
    #[serde(default)]
    pub ignored_paths: Vec<String>,

    #[serde(default)]
    pub retention: RetentionConfig,
}

impl BackupConfig {
    pub fn resolve_output_dir(&self) -> Result<PathBuf, RepoError> {
        match &self.output_dir {
            Some(dir) if !dir.as_os_str().is_empty() => Ok(dir.clone()),
            _ => Ok(paths::data_dir()?.join("backups")),
        }
    }
}

/// How many archives the external purge utility keeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_daily")]
    pub daily: u32,

    #[serde(default = "default_weekly")]
    pub weekly: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            daily: default_daily(),
            weekly: default_weekly(),
        }
    }
}
