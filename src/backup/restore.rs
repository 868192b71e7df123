//! Restoring backup archives
//!
//! Restore replaces the backed-up subtree with the archive content. The archive is
//! checked before anything is touched: the confirmation phrase must match exactly and
//! no file content may precede the tree JSON.

use super::names;
use crate::error::RepoError;
use crate::file::PROP_FILE_NAME;
use crate::repository::RepositoryService;
use crate::sanity::{SanityCheckJob, SanityReport};
use crate::store::{path, NodeSession};
use crate::tree::NodeInfo;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{Read, Seek};
use tracing::{info, warn};
use zip::ZipArchive;

/// The phrase a caller must pass to confirm that a restore may overwrite data.
pub const RESTORE_CONFIRMATION: &str =
    "Yes, I really want to restore the repository and I know what I'm doing.";

#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    /// Repository path the tree was restored at.
    pub root: String,
    pub nodes_restored: usize,
    pub files_restored: usize,
    /// Entries that carried no file content, or content nothing refers to.
    pub skipped_entries: usize,
    pub warnings: Vec<String>,
    /// Sanity check of the whole repository after the restore.
    pub sanity: SanityReport,
}

/// Restore an archive written by [`backup`](super::backup).
pub fn restore<R: Read + Seek>(
    service: &RepositoryService,
    archive: R,
    confirmation: &str,
) -> Result<RestoreReport, RepoError> {
    if confirmation != RESTORE_CONFIRMATION {
        warn!("Restore rejected: confirmation phrase does not match");
        return Err(RepoError::RestoreConfirmationRejected);
    }
    service.top_node()?;

    let mut zip = ZipArchive::new(archive)?;
    let mut entry_names = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        entry_names.push(zip.by_index_raw(index)?.name().to_string());
    }
    let tree_index = check_entry_order(&entry_names)?;
    let stem = entry_names[tree_index]
        .strip_suffix(names::TREE_ENTRY)
        .unwrap_or_default()
        .trim_end_matches('/')
        .to_string();

    let tree: NodeInfo = {
        let entry = zip.by_index(tree_index)?;
        let mut deserializer = serde_json::Deserializer::from_reader(entry);
        deserializer.disable_recursion_limit();
        NodeInfo::deserialize(&mut deserializer)?
    };
    let root = path::normalize(&tree.path)?;
    path::reject_reserved(&root)?;

    let mut report = RestoreReport {
        root: root.clone(),
        ..RestoreReport::default()
    };
    report.nodes_restored = service.with_session(|session| {
        clear_target(session, &root)?;
        let restored = write_tree(session, &tree, &root)?;
        session.save()?;
        Ok(restored)
    })?;
    info!(root = %root, nodes = report.nodes_restored, "Restored node tree");

    let mut targets = file_targets(&tree, &root, &stem);
    service.with_session(|session| {
        for (index, name) in entry_names.iter().enumerate() {
            if index == tree_index || name.ends_with('/') {
                continue;
            }
            if let Some((owner, file_id)) = targets.remove(name) {
                let mut entry = zip.by_index(index)?;
                let mut bytes = Vec::with_capacity(entry.size().min(64 * 1024 * 1024) as usize);
                entry.read_to_end(&mut bytes)?;
                session.write_file_blob(&owner, &file_id, &bytes)?;
                report.files_restored += 1;
            } else if names::is_metadata_entry(name) {
                report.skipped_entries += 1;
            } else {
                warn!(entry = %name, "Archive entry does not belong to any restored file");
                report
                    .warnings
                    .push(format!("unknown archive entry {}", name));
                report.skipped_entries += 1;
            }
        }
        session.save()
    })?;

    let mut missing: Vec<_> = targets.into_values().collect();
    missing.sort();
    for (owner, file_id) in missing {
        warn!(node = %owner, file_id = %file_id, "Archive holds no content for file");
        report
            .warnings
            .push(format!("no content in archive for file {} of {}", file_id, owner));
    }

    info!(
        root = %report.root,
        files = report.files_restored,
        skipped = report.skipped_entries,
        warnings = report.warnings.len(),
        "Restored file content"
    );
    report.sanity = SanityCheckJob::new(service).run()?;
    Ok(report)
}

/// Index of the tree entry, after making sure no file content comes before it.
fn check_entry_order(entry_names: &[String]) -> Result<usize, RepoError> {
    let is_tree = |name: &String| name.rsplit('/').next() == Some(names::TREE_ENTRY);
    let is_content = |name: &String| !name.ends_with('/') && !names::is_metadata_entry(name);
    let tree_index = entry_names.iter().position(is_tree);
    let first_content = entry_names.iter().position(is_content);
    match (tree_index, first_content) {
        (Some(tree), Some(content)) if content < tree => Err(RepoError::RestoreOrderViolation(
            entry_names[content].clone(),
        )),
        (Some(tree), _) => Ok(tree),
        (None, Some(content)) => Err(RepoError::RestoreOrderViolation(
            entry_names[content].clone(),
        )),
        (None, None) => Err(RepoError::ArchiveError(format!(
            "archive contains no {}",
            names::TREE_ENTRY
        ))),
    }
}

/// Empty the restore target: the top node keeps only its name, other nodes are removed.
fn clear_target<S: NodeSession>(session: &mut S, root: &str) -> Result<(), RepoError> {
    if root == path::ROOT {
        let top = session.get_node(path::ROOT)?;
        for child in &top.children {
            session.delete_node(&path::child(path::ROOT, child))?;
        }
        for name in top.properties.keys() {
            session.set_property(path::ROOT, name, None)?;
        }
        return Ok(());
    }
    if session.node_exists(root)? {
        session.delete_node(root)?;
    }
    session.get_or_create_path(root)?;
    Ok(())
}

/// Recreate `tree` at `root`; returns the number of nodes written.
fn write_tree<S: NodeSession>(session: &mut S, tree: &NodeInfo, root: &str) -> Result<usize, RepoError> {
    let mut written = 0;
    let mut pending = vec![(root.to_string(), tree)];
    while let Some((node_path, info)) = pending.pop() {
        for (name, value) in info.property_map() {
            if !value.is_binary() {
                session.set_property(&node_path, &name, Some(value))?;
            }
        }
        written += 1;
        for child in info.children.iter().flatten() {
            let child_path = session.get_or_create_node(&node_path, &child.name)?;
            pending.push((child_path, child));
        }
    }
    Ok(written)
}

/// Archive entry name of every file in `tree`, mapped to its owner node and file id.
fn file_targets(tree: &NodeInfo, root: &str, stem: &str) -> HashMap<String, (String, String)> {
    let mut targets = HashMap::new();
    let mut pending = vec![(root.to_string(), tree)];
    while let Some((node_path, info)) = pending.pop() {
        let Some(children) = info.children.as_ref() else {
            continue;
        };
        for child in children {
            let child_path = path::child(&node_path, &child.name);
            if child.name == path::FILES_NODE {
                for file in child.children.iter().flatten() {
                    let file_name = file
                        .property(PROP_FILE_NAME)
                        .and_then(|p| p.value.as_ref())
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    let entry = names::entry(
                        stem,
                        &node_path,
                        &names::file_entry_name(&file.name, file_name),
                    );
                    targets.insert(
                        entry.trim_start_matches('/').to_string(),
                        (node_path.clone(), file.name.clone()),
                    );
                }
            } else {
                pending.push((child_path, child));
            }
        }
    }
    targets
}
