//! ConfigLoader facade delegating to the merge service.

use super::merge::service::MergeService;
use super::RepositoryConfig;
use crate::error::RepoError;
use std::path::Path;

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the platform config file (if present) and environment overrides.
    pub fn load() -> Result<RepositoryConfig, RepoError> {
        MergeService::load()
    }

    /// Load configuration from a specific file with environment overrides.
    pub fn load_from_file(path: &Path) -> Result<RepositoryConfig, RepoError> {
        MergeService::load_from_file(path)
    }

    pub fn default() -> RepositoryConfig {
        RepositoryConfig::default()
    }
}
