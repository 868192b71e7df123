//! Platform directories for repository data, configuration and logs.

use crate::error::RepoError;
use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Result<ProjectDirs, RepoError> {
    ProjectDirs::from("", "contentrepo", "contentrepo").ok_or_else(|| {
        RepoError::ConfigError("Could not determine platform directories (HOME not set)".to_string())
    })
}

/// Data directory, e.g. `~/.local/share/contentrepo`.
pub fn data_dir() -> Result<PathBuf, RepoError> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// Default configuration file, e.g. `~/.config/contentrepo/config.toml`.
pub fn config_file() -> Result<PathBuf, RepoError> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

/// State directory for log files; falls back to the data directory where the
/// platform has no state directory.
pub fn state_dir() -> Result<PathBuf, RepoError> {
    let dirs = project_dirs()?;
    Ok(dirs
        .state_dir()
        .unwrap_or_else(|| dirs.data_dir())
        .to_path_buf())
}
