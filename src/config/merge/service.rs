//! MergeService: orchestrates sources and deserializes to RepositoryConfig.

use crate::config::paths;
use crate::config::sources::environment;
use crate::config::{RepositoryConfig, DEFAULT_MAX_FILE_SIZE, DEFAULT_TOP_NODE};
use crate::error::RepoError;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, File};
use std::path::Path;
use tracing::debug;

/// Merge service for config composition.
pub struct MergeService;

fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("top_node", DEFAULT_TOP_NODE)?
        .set_default("files.max_file_size", DEFAULT_MAX_FILE_SIZE)
}

impl MergeService {
    /// Precedence: defaults (lowest) -> platform config file -> environment (highest).
    pub fn load() -> Result<RepositoryConfig, RepoError> {
        let builder = builder_with_defaults()?;
        let builder = match paths::config_file() {
            Ok(path) => {
                debug!(path = %path.display(), "Looking for repository config file");
                builder.add_source(File::from(path).required(false))
            }
            Err(_) => builder,
        };
        let builder = environment::add_to_builder(builder)?;
        Self::finish(builder)
    }

    /// Load config from a specific file with environment overlay.
    pub fn load_from_file(path: &Path) -> Result<RepositoryConfig, RepoError> {
        let builder = builder_with_defaults()?;
        let builder = builder.add_source(File::from(path).required(true));
        let builder = environment::add_to_builder(builder)?;
        Self::finish(builder)
    }

    fn finish(builder: ConfigBuilder<DefaultState>) -> Result<RepositoryConfig, RepoError> {
        let config: RepositoryConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
