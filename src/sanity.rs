//! Sanity check
//!
//! Walks the repository and verifies every file against its metadata: the checksum and
//! size are recomputed over the stored bytes. Findings are collected into a report
//! instead of aborting the walk. The only write is backfilling the zip mode of zip-type
//! files that have none.

use crate::checksum;
use crate::crypto;
use crate::error::RepoError;
use crate::file::{FileRecord, PROP_ZIP_MODE};
use crate::repository::{read_stored_bytes, RepositoryService};
use crate::store::{path, NodeSession, Session};
use crate::tree::{TreeVisitor, TreeWalker, Visit};
use crate::types::{NodeData, Property, ZipMode};
use serde::Serialize;
use tracing::{info, warn};

/// Findings of one sanity check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SanityReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub nodes_visited: usize,
    pub files_visited: usize,
    pub zip_modes_backfilled: usize,
}

impl SanityReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct SanityCheckJob<'a> {
    service: &'a RepositoryService,
    root: String,
}

impl<'a> SanityCheckJob<'a> {
    /// A check of the whole repository.
    pub fn new(service: &'a RepositoryService) -> Self {
        Self {
            service,
            root: path::ROOT.to_string(),
        }
    }

    /// Limit the check to one subtree.
    pub fn with_root(mut self, root: &str) -> Result<Self, RepoError> {
        self.root = path::normalize(root)?;
        Ok(self)
    }

    pub fn run(&self) -> Result<SanityReport, RepoError> {
        let report = self.service.with_session(|session| {
            let mut checker = Checker::default();
            let stats = TreeWalker::new().walk(session, &self.root, &mut checker)?;
            if checker.report.zip_modes_backfilled > 0 {
                session.save()?;
            }
            let mut report = checker.report;
            report.nodes_visited = stats.nodes_visited;
            report.files_visited = stats.files_visited;
            Ok(report)
        })?;

        info!(
            root = %self.root,
            nodes = report.nodes_visited,
            files = report.files_visited,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            backfilled = report.zip_modes_backfilled,
            "Sanity check finished"
        );
        Ok(report)
    }
}

#[derive(Default)]
struct Checker {
    report: SanityReport,
}

impl Checker {
    fn error(&mut self, record: &FileRecord, message: String) {
        warn!(node = %record.node_path, file_id = %record.file_id, "{}", message);
        self.report.errors.push(format!(
            "{} [{}] {}: {}",
            record.node_path, record.file_id, record.file_name, message
        ));
    }

    fn warning(&mut self, record: &FileRecord, message: String) {
        self.report.warnings.push(format!(
            "{} [{}] {}: {}",
            record.node_path, record.file_id, record.file_name, message
        ));
    }
}

impl TreeVisitor<Session> for Checker {
    fn visit(&mut self, _session: &mut Session, _node: &NodeData, _is_root: bool) -> Result<Visit, RepoError> {
        Ok(Visit::Continue)
    }

    fn visit_file(
        &mut self,
        session: &mut Session,
        file_node: &NodeData,
        record: &FileRecord,
    ) -> Result<(), RepoError> {
        let bytes = match read_stored_bytes(session, record) {
            Ok(bytes) => bytes,
            Err(RepoError::FileNotFound { .. }) => {
                self.error(record, "stored content is missing".to_string());
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let actual = checksum::checksum_bytes(&bytes);
        match record.checksum.as_deref() {
            Some(stored) if checksum::is_complete(stored) => {
                if !checksum::matches(stored, &actual) {
                    self.error(
                        record,
                        format!("checksum mismatch: stored {}, actual {}", stored, actual),
                    );
                }
            }
            Some(stored) => self.warning(record, format!("incomplete checksum '{}'", stored)),
            None => self.warning(record, "no checksum recorded".to_string()),
        }

        let size = bytes.len() as u64;
        match record.size_bytes {
            Some(stored) if stored != size => self.error(
                record,
                format!("size mismatch: stored {}, actual {}", stored, size),
            ),
            Some(_) => {}
            None => self.warning(record, "no size recorded".to_string()),
        }

        let detected = crypto::detect_mode(&bytes);
        let mut zip_mode = record.zip_mode;
        if zip_mode.is_none() && record.is_zip_type() {
            match detected {
                Some(mode) => {
                    session.set_property(
                        &file_node.path,
                        PROP_ZIP_MODE,
                        Some(Property::string(mode.as_str())),
                    )?;
                    self.report.zip_modes_backfilled += 1;
                    zip_mode = Some(mode);
                }
                None => self.warning(record, "zip mode could not be detected".to_string()),
            }
        }

        // An uploaded encrypted zip is stored as is: aesEncrypted=false with an encrypted mode.
        if let Some(mode) = zip_mode {
            if record.aes_encrypted && !mode.is_encrypted() {
                self.warning(record, format!("aesEncrypted=true but zip mode is {}", mode));
            }
            let stored_encrypted = detected.map_or(false, ZipMode::is_encrypted);
            if mode.is_encrypted() != stored_encrypted {
                let found = detected.map_or("no zip".to_string(), |d| d.to_string());
                self.warning(
                    record,
                    format!("zip mode {} disagrees with stored content ({})", mode, found),
                );
            }
        }
        Ok(())
    }
}
