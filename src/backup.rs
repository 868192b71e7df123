//! Backup archives
//!
//! A backup is a zip archive with, in this order: a README, the JSON tree of the backed-up
//! subtree, and for every visited node its file manifest and listing (if it owns files),
//! its own node JSON and the stored bytes of each of its files. File bytes are written
//! exactly as stored, so encrypted files stay encrypted inside the archive.

pub mod job;
pub mod names;
pub mod restore;

pub use job::{BackupJob, BackupOutcome};
pub use restore::{restore, RestoreReport, RESTORE_CONFIRMATION};

use crate::error::RepoError;
use crate::file::FileRecord;
use crate::repository::{list_file_records, read_stored_bytes, RepositoryService};
use crate::store::{path, Session};
use crate::tree::{read_node_info, NodeInfo, TreeVisitor, TreeWalker, Visit};
use crate::types::NodeData;
use std::io::{Seek, Write};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const README: &str = "\
This archive is a backup of a content repository.

repository.json  the node tree with all node properties
<node>/node.json the properties of one node
<node>/files.json metadata of the files owned by the node
<node>/files.txt  human readable listing of those files
<node>/<id>.<ext> the stored bytes of one file

Encrypted files are kept in their encrypted form and need their password
after a restore. Restoring replaces the backed-up subtree completely.
";

/// Outcome of writing one archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupReport {
    pub stem: String,
    pub nodes: usize,
    pub files: usize,
    /// Total size of the file bytes written.
    pub bytes: u64,
    /// Nodes left out because they matched an ignored path.
    pub skipped_paths: Vec<String>,
}

/// Write a backup of `root` into `writer`; entries are prefixed with `stem`.
pub fn backup<W: Write + Seek>(
    service: &RepositoryService,
    root: &str,
    stem: &str,
    ignored_paths: &[String],
    writer: W,
) -> Result<(BackupReport, W), RepoError> {
    let root = path::normalize(root)?;
    path::reject_reserved(&root)?;
    let stem = stem.trim_matches('/');
    if stem.is_empty() {
        return Err(RepoError::InvalidArgument(
            "backup name must not be blank".to_string(),
        ));
    }
    let ignored = ignored_paths
        .iter()
        .map(|p| path::normalize(p))
        .collect::<Result<Vec<_>, _>>()?;

    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let report = service.with_session(|session| {
        zip.start_file(names::entry(stem, path::ROOT, names::README_ENTRY), options)?;
        zip.write_all(README.as_bytes())?;

        let mut tree = read_node_info(session, &root, true)?;
        prune_ignored(&mut tree, &ignored);
        zip.start_file(names::entry(stem, path::ROOT, names::TREE_ENTRY), options)?;
        serde_json::to_writer_pretty(&mut zip, &tree)?;

        let mut visitor = ArchiveVisitor {
            zip: &mut zip,
            options,
            stem,
            ignored: &ignored,
            report: BackupReport {
                stem: stem.to_string(),
                ..BackupReport::default()
            },
        };
        let stats = TreeWalker::new().walk(session, &root, &mut visitor)?;
        let mut report = visitor.report;
        report.nodes = stats.nodes_visited - report.skipped_paths.len();
        report.files = stats.files_visited;
        Ok(report)
    })?;

    let writer = zip.finish()?;
    info!(
        stem = %report.stem,
        root = %root,
        nodes = report.nodes,
        files = report.files,
        bytes = report.bytes,
        skipped = report.skipped_paths.len(),
        "Backup written"
    );
    Ok((report, writer))
}

/// Drop every child of `tree` lying in an ignored subtree.
fn prune_ignored(tree: &mut NodeInfo, ignored: &[String]) {
    if ignored.is_empty() {
        return;
    }
    let mut pending = vec![tree];
    while let Some(info) = pending.pop() {
        if let Some(children) = info.children.as_mut() {
            children.retain(|child| !ignored.iter().any(|p| path::is_within(&child.path, p)));
            pending.extend(children.iter_mut());
        }
    }
}

struct ArchiveVisitor<'a, W: Write + Seek> {
    zip: &'a mut ZipWriter<W>,
    options: SimpleFileOptions,
    stem: &'a str,
    ignored: &'a [String],
    report: BackupReport,
}

impl<'a, W: Write + Seek> TreeVisitor<Session> for ArchiveVisitor<'a, W> {
    fn visit(&mut self, session: &mut Session, node: &NodeData, _is_root: bool) -> Result<Visit, RepoError> {
        if self.ignored.iter().any(|p| path::is_within(&node.path, p)) {
            info!(path = %node.path, "Skipping ignored path in backup");
            self.report.skipped_paths.push(node.path.clone());
            return Ok(Visit::SkipSubtree);
        }

        let files = list_file_records(session, &node.path)?;
        if !files.is_empty() {
            self.zip.start_file(
                names::entry(self.stem, &node.path, names::FILES_MANIFEST_ENTRY),
                self.options,
            )?;
            serde_json::to_writer_pretty(&mut *self.zip, &files)?;

            self.zip.start_file(
                names::entry(self.stem, &node.path, names::FILES_LISTING_ENTRY),
                self.options,
            )?;
            for file in &files {
                let line =
                    names::listing_line(&file.file_id, &file.file_name, file.size_bytes.unwrap_or(0));
                self.zip.write_all(line.as_bytes())?;
            }
        }

        self.zip.start_file(
            names::entry(self.stem, &node.path, names::NODE_ENTRY),
            self.options,
        )?;
        serde_json::to_writer_pretty(&mut *self.zip, &NodeInfo::from_node(node))?;
        Ok(Visit::Continue)
    }

    fn visit_file(
        &mut self,
        session: &mut Session,
        _file_node: &NodeData,
        record: &FileRecord,
    ) -> Result<(), RepoError> {
        let bytes = read_stored_bytes(session, record)?;
        let name = names::entry(
            self.stem,
            &record.node_path,
            &names::file_entry_name(&record.file_id, &record.file_name),
        );
        let options = self
            .options
            .large_file(bytes.len() as u64 >= u64::from(u32::MAX));
        self.zip.start_file(name.as_str(), options)?;
        self.zip.write_all(&bytes)?;
        self.report.bytes += bytes.len() as u64;
        debug!(entry = %name, size = bytes.len(), "Archived file");
        Ok(())
    }
}
