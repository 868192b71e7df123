//! Depth-first traversal of nodes and their files
//!
//! A node is visited, then each of its files, then its children in store enumeration
//! order. The work list is explicit, so depth is bounded only by memory.

use crate::error::RepoError;
use crate::file::FileRecord;
use crate::store::{path, NodeSession};
use crate::types::NodeData;
use tracing::trace;

/// What the walker does after visiting a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    /// Skip the node's files and descendants.
    SkipSubtree,
}

/// Callbacks driven by [`TreeWalker`].
pub trait TreeVisitor<S: NodeSession> {
    fn visit(&mut self, session: &mut S, node: &NodeData, is_root: bool) -> Result<Visit, RepoError>;

    /// `file_node` is the metadata node of `record`.
    fn visit_file(
        &mut self,
        _session: &mut S,
        _file_node: &NodeData,
        _record: &FileRecord,
    ) -> Result<(), RepoError> {
        Ok(())
    }
}

/// Running counts of one traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub nodes_visited: usize,
    pub files_visited: usize,
}

pub struct TreeWalker {
    stats: WalkStats,
}

impl TreeWalker {
    pub fn new() -> Self {
        Self {
            stats: WalkStats::default(),
        }
    }

    pub fn stats(&self) -> WalkStats {
        self.stats
    }

    /// Walk the subtree at `root`.
    pub fn walk<S, V>(&mut self, session: &mut S, root: &str, visitor: &mut V) -> Result<WalkStats, RepoError>
    where
        S: NodeSession,
        V: TreeVisitor<S>,
    {
        let mut pending = vec![root.to_string()];
        while let Some(node_path) = pending.pop() {
            let node = session.get_node(&node_path)?;
            let is_root = node_path == root;
            self.stats.nodes_visited += 1;
            if visitor.visit(session, &node, is_root)? == Visit::SkipSubtree {
                trace!(path = %node_path, "Skipping subtree");
                continue;
            }

            if node.children.iter().any(|c| c == path::FILES_NODE) {
                let collection = session.get_node(&path::files_collection(&node_path))?;
                for file_id in &collection.children {
                    let file_node = session.get_node(&path::child(&collection.path, file_id))?;
                    let record = FileRecord::from_node(&node_path, &file_node);
                    self.stats.files_visited += 1;
                    visitor.visit_file(session, &file_node, &record)?;
                }
            }

            for child in node.children.iter().rev() {
                if child != path::FILES_NODE {
                    pending.push(path::child(&node_path, child));
                }
            }
        }
        Ok(self.stats)
    }
}

impl Default for TreeWalker {
    fn default() -> Self {
        Self::new()
    }
}
