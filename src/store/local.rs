//! Local segment store
//!
//! Nodes and blobs live in a sled database (an append-only, log-structured segment store)
//! under one directory. Node records are keyed by their full path including the
//! top-level node name; blobs are keyed by `<node key>\0<file id>`.

use super::path;
use super::{check_storable, NodeSession};
use crate::error::{RepoError, StorageError};
use crate::types::{NodeData, Property, PropertyMap};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sled::transaction::{TransactionError, TransactionResult};
use sled::Transactional;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const NODES_TREE: &str = "nodes";
const BLOBS_TREE: &str = "blobs";
const BLOB_KEY_SEPARATOR: u8 = 0;

/// Persisted form of one node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct NodeRecord {
    /// Child names in creation order.
    children: Vec<String>,
    properties: PropertyMap,
}

struct LocalInner {
    db: sled::Db,
    nodes: sled::Tree,
    blobs: sled::Tree,
    top_node: String,
    dir: PathBuf,
    /// Serializes multi-key mutations across sessions.
    write_lock: Mutex<()>,
    shut_down: AtomicBool,
}

/// Handle to an opened local store. Cheap to share; sessions hold their own reference.
pub struct LocalStore {
    inner: Arc<LocalInner>,
}

impl LocalStore {
    /// Open (or create) the store in `dir` with the given top-level node.
    pub fn open(dir: &Path, top_node: &str) -> Result<Self, RepoError> {
        let top_node = top_node.trim();
        if top_node.is_empty() {
            return Err(RepoError::BackendUnavailable(
                "top-level node name must not be blank".to_string(),
            ));
        }
        let top_node = path::normalize_name(top_node)?;
        std::fs::create_dir_all(dir).map_err(|e| {
            RepoError::BackendUnavailable(format!(
                "failed to create store directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        let db = sled::open(dir).map_err(|e| {
            RepoError::BackendUnavailable(format!(
                "failed to open local store {}: {}",
                dir.display(),
                e
            ))
        })?;
        let nodes = db.open_tree(NODES_TREE)?;
        let blobs = db.open_tree(BLOBS_TREE)?;
        let inner = LocalInner {
            db,
            nodes,
            blobs,
            top_node,
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
            shut_down: AtomicBool::new(false),
        };
        let root_key = inner.key(path::ROOT);
        if inner.nodes.get(&root_key)?.is_none() {
            inner.put_record(&root_key, &NodeRecord::default())?;
            info!(top_node = %inner.top_node, "Created top-level node");
        }
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn top_node(&self) -> &str {
        &self.inner.top_node
    }

    pub fn directory(&self) -> &Path {
        &self.inner.dir
    }

    pub fn login(&self) -> Result<LocalSession, RepoError> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(RepoError::BackendUnavailable(
                "local store has been shut down".to_string(),
            ));
        }
        Ok(LocalSession {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Sweep orphaned blobs and flush. Only the first call does anything and returns `true`.
    pub fn shutdown(&self) -> bool {
        if self
            .inner
            .shut_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Local store already shut down");
            return false;
        }
        match self.inner.sweep_orphaned_blobs() {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Removed orphaned blobs"),
            Err(e) => warn!(error = %e, "Orphaned blob sweep failed"),
        }
        match self.inner.db.flush() {
            Ok(bytes) => info!(
                flushed_bytes = bytes,
                dir = %self.inner.dir.display(),
                "Local store shut down"
            ),
            Err(e) => error!(error = %e, "Failed to flush local store during shutdown"),
        }
        true
    }
}

impl LocalInner {
    fn key(&self, repo_path: &str) -> String {
        if repo_path == path::ROOT {
            format!("/{}", self.top_node)
        } else {
            format!("/{}{}", self.top_node, repo_path)
        }
    }

    fn blob_key(&self, node: &str, file_id: &str) -> Vec<u8> {
        let mut key = self.key(node).into_bytes();
        key.push(BLOB_KEY_SEPARATOR);
        key.extend_from_slice(file_id.as_bytes());
        key
    }

    fn blob_prefix(node_key: &str) -> Vec<u8> {
        let mut prefix = node_key.as_bytes().to_vec();
        prefix.push(BLOB_KEY_SEPARATOR);
        prefix
    }

    fn record(&self, key: &str) -> Result<Option<NodeRecord>, RepoError> {
        match self.nodes.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn require(&self, repo_path: &str) -> Result<NodeRecord, RepoError> {
        self.record(&self.key(repo_path))?
            .ok_or_else(|| RepoError::NodeNotFound(repo_path.to_string()))
    }

    fn encode(record: &NodeRecord) -> Result<Vec<u8>, RepoError> {
        serde_json::to_vec(record)
            .map_err(|e| RepoError::StorageError(StorageError::Encoding(e.to_string())))
    }

    fn put_record(&self, key: &str, record: &NodeRecord) -> Result<(), RepoError> {
        self.nodes.insert(key, Self::encode(record)?)?;
        Ok(())
    }

    /// Remove blobs whose file node no longer exists.
    fn sweep_orphaned_blobs(&self) -> Result<usize, RepoError> {
        let _guard = self.write_lock.lock();
        let mut batch = sled::Batch::default();
        let mut removed = 0;
        for entry in self.blobs.iter() {
            let (key, _) = entry?;
            let Some(split) = key.iter().position(|b| *b == BLOB_KEY_SEPARATOR) else {
                continue;
            };
            let node_key = String::from_utf8_lossy(&key[..split]);
            let file_id = String::from_utf8_lossy(&key[split + 1..]);
            let file_key = format!("{}/{}/{}", node_key, path::FILES_NODE, file_id);
            if !self.nodes.contains_key(file_key.as_bytes())? {
                batch.remove(key);
                removed += 1;
            }
        }
        self.blobs.apply_batch(batch)?;
        Ok(removed)
    }
}

/// One session on the local store.
pub struct LocalSession {
    inner: Arc<LocalInner>,
}

impl NodeSession for LocalSession {
    fn node_exists(&self, path: &str) -> Result<bool, RepoError> {
        Ok(self.inner.nodes.contains_key(self.inner.key(path))?)
    }

    fn get_node(&self, path: &str) -> Result<NodeData, RepoError> {
        let record = self.inner.require(path)?;
        Ok(NodeData {
            path: path.to_string(),
            name: if path == path::ROOT {
                self.inner.top_node.clone()
            } else {
                path::name(path).to_string()
            },
            properties: record.properties,
            children: record.children,
        })
    }

    fn get_or_create_node(&mut self, parent: &str, name: &str) -> Result<String, RepoError> {
        let name = path::normalize_name(name)?;
        let _guard = self.inner.write_lock.lock();
        let parent_key = self.inner.key(parent);
        let mut parent_record = self
            .inner
            .record(&parent_key)?
            .ok_or_else(|| RepoError::NodeNotFound(parent.to_string()))?;
        let child_path = path::child(parent, &name);
        let child_key = self.inner.key(&child_path);
        if self.inner.nodes.contains_key(&child_key)? {
            return Ok(child_path);
        }
        if !parent_record.children.contains(&name) {
            parent_record.children.push(name);
        }
        let mut batch = sled::Batch::default();
        batch.insert(child_key.as_bytes(), LocalInner::encode(&NodeRecord::default())?);
        batch.insert(parent_key.as_bytes(), LocalInner::encode(&parent_record)?);
        self.inner.nodes.apply_batch(batch)?;
        Ok(child_path)
    }

    fn delete_node(&mut self, path: &str) -> Result<(), RepoError> {
        let parent = path::parent(path).ok_or_else(|| {
            RepoError::InvalidPath("the top-level node cannot be deleted".to_string())
        })?;
        let _guard = self.inner.write_lock.lock();
        let key = self.inner.key(path);
        if self.inner.record(&key)?.is_none() {
            return Err(RepoError::NodeNotFound(path.to_string()));
        }

        let mut removed = Vec::new();
        let mut pending = vec![key];
        while let Some(current) = pending.pop() {
            if let Some(record) = self.inner.record(&current)? {
                for child in &record.children {
                    pending.push(format!("{}/{}", current, child));
                }
            }
            removed.push(current);
        }

        let parent_key = self.inner.key(parent);
        let mut batch = sled::Batch::default();
        for node_key in &removed {
            batch.remove(node_key.as_bytes());
        }
        if let Some(mut parent_record) = self.inner.record(&parent_key)? {
            let name = path::name(path);
            parent_record.children.retain(|c| c != name);
            batch.insert(parent_key.as_bytes(), LocalInner::encode(&parent_record)?);
        }
        self.inner.nodes.apply_batch(batch)?;

        let mut blob_batch = sled::Batch::default();
        for node_key in &removed {
            for entry in self.inner.blobs.scan_prefix(LocalInner::blob_prefix(node_key)) {
                let (blob_key, _) = entry?;
                blob_batch.remove(blob_key);
            }
        }
        self.inner.blobs.apply_batch(blob_batch)?;
        debug!(path, nodes = removed.len(), "Deleted node subtree");
        Ok(())
    }

    fn set_property(
        &mut self,
        path: &str,
        name: &str,
        value: Option<Property>,
    ) -> Result<(), RepoError> {
        if let Some(value) = &value {
            check_storable(name, value)?;
        }
        let _guard = self.inner.write_lock.lock();
        let key = self.inner.key(path);
        let mut record = self
            .inner
            .record(&key)?
            .ok_or_else(|| RepoError::NodeNotFound(path.to_string()))?;
        match value {
            Some(value) => {
                record.properties.insert(name.to_string(), value);
            }
            None => {
                record.properties.remove(name);
            }
        }
        self.inner.put_record(&key, &record)
    }

    fn get_property(&self, path: &str, name: &str) -> Result<Option<Property>, RepoError> {
        Ok(self.inner.require(path)?.properties.remove(name))
    }

    fn write_file_blob(
        &mut self,
        node: &str,
        file_id: &str,
        content: &[u8],
    ) -> Result<(), RepoError> {
        if !self.node_exists(node)? {
            return Err(RepoError::NodeNotFound(node.to_string()));
        }
        self.inner
            .blobs
            .insert(self.inner.blob_key(node, file_id), content)?;
        Ok(())
    }

    fn open_file_blob(&self, node: &str, file_id: &str) -> Result<Box<dyn Read + Send>, RepoError> {
        match self.inner.blobs.get(self.inner.blob_key(node, file_id))? {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes))),
            None => Err(RepoError::FileNotFound {
                node_path: node.to_string(),
                file_id: file_id.to_string(),
            }),
        }
    }

    fn delete_file_blob(&mut self, node: &str, file_id: &str) -> Result<bool, RepoError> {
        Ok(self
            .inner
            .blobs
            .remove(self.inner.blob_key(node, file_id))?
            .is_some())
    }

    fn write_file_entry(
        &mut self,
        node: &str,
        file_id: &str,
        content: Option<&[u8]>,
        properties: &[(&str, Option<Property>)],
    ) -> Result<(), RepoError> {
        for (name, value) in properties {
            if let Some(value) = value {
                check_storable(name, value)?;
            }
        }
        let metadata_path = path::file_node(node, file_id);
        let _guard = self.inner.write_lock.lock();
        let key = self.inner.key(&metadata_path);
        let mut record = self
            .inner
            .record(&key)?
            .ok_or_else(|| RepoError::NodeNotFound(metadata_path.clone()))?;
        for (name, value) in properties {
            match value {
                Some(value) => {
                    record.properties.insert(name.to_string(), value.clone());
                }
                None => {
                    record.properties.remove(*name);
                }
            }
        }
        let encoded = LocalInner::encode(&record)?;
        let blob_key = self.inner.blob_key(node, file_id);

        let written: TransactionResult<(), ()> = (&self.inner.nodes, &self.inner.blobs)
            .transaction(|(nodes, blobs)| {
                nodes.insert(key.as_bytes(), encoded.as_slice())?;
                if let Some(content) = content {
                    blobs.insert(blob_key.as_slice(), content)?;
                }
                Ok(())
            });
        written.map_err(|e| match e {
            TransactionError::Storage(e) => RepoError::from(e),
            TransactionError::Abort(()) => RepoError::StorageError(StorageError::Encoding(
                "file entry transaction aborted".to_string(),
            )),
        })
    }

    fn save(&mut self) -> Result<(), RepoError> {
        self.inner.db.flush()?;
        Ok(())
    }

    fn logout(mut self) -> Result<(), RepoError> {
        self.save()
    }
}
