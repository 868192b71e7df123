//! Scheduled backup job
//!
//! Writes `<output_dir>/<stem>.zip` through a `.partial` file that is renamed into place
//! once the archive is complete, so a crashed run never leaves a truncated backup behind.

use super::{backup, BackupReport};
use crate::error::RepoError;
use crate::repository::RepositoryService;
use crate::store::path;
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::path::PathBuf;
use tracing::{info, warn};

/// Where a finished backup ended up.
#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub archive: PathBuf,
    pub report: BackupReport,
}

pub struct BackupJob<'a> {
    service: &'a RepositoryService,
    output_dir: PathBuf,
    root: String,
    ignored_paths: Vec<String>,
}

impl<'a> BackupJob<'a> {
    pub fn new(service: &'a RepositoryService, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            service,
            output_dir: output_dir.into(),
            root: path::ROOT.to_string(),
            ignored_paths: Vec::new(),
        }
    }

    /// Output directory and ignored paths from the service configuration.
    pub fn from_config(service: &'a RepositoryService) -> Result<Self, RepoError> {
        let config = service.config().ok_or_else(|| {
            RepoError::BackendUnavailable("repository has not been initialized".to_string())
        })?;
        let mut job = Self::new(service, config.backup.resolve_output_dir()?);
        job.ignored_paths = config.backup.ignored_paths.clone();
        Ok(job)
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn ignore(mut self, node_path: impl Into<String>) -> Self {
        self.ignored_paths.push(node_path.into());
        self
    }

    /// `<topNode>-backup-<yyyy-MM-dd-HHmmss>`
    pub fn default_stem(top_node: &str, at: DateTime<Utc>) -> String {
        format!("{}-backup-{}", top_node, at.format("%Y-%m-%d-%H%M%S"))
    }

    /// Run with a timestamped archive name.
    pub fn run(&self) -> Result<BackupOutcome, RepoError> {
        let stem = Self::default_stem(self.service.top_node()?, Utc::now());
        self.run_with_stem(&stem)
    }

    pub fn run_with_stem(&self, stem: &str) -> Result<BackupOutcome, RepoError> {
        fs::create_dir_all(&self.output_dir)?;
        let archive = self.output_dir.join(format!("{}.zip", stem));
        let partial = self.output_dir.join(format!("{}.zip.partial", stem));

        let written = File::create(&partial)
            .map_err(RepoError::from)
            .and_then(|file| backup(self.service, &self.root, stem, &self.ignored_paths, file))
            .and_then(|(report, file)| {
                file.sync_all()?;
                Ok(report)
            });
        let report = match written {
            Ok(report) => report,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&partial) {
                    warn!(error = %cleanup, path = %partial.display(), "Failed to remove partial backup");
                }
                return Err(e);
            }
        };
        fs::rename(&partial, &archive)?;
        info!(archive = %archive.display(), files = report.files, "Backup job finished");
        Ok(BackupOutcome { archive, report })
    }
}
