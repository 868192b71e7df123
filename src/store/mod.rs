//! Node stores
//!
//! A node store is the physical engine behind the repository: a session-scoped tree of
//! named nodes carrying properties, plus file blobs addressed by owning node and file id.
//! Two engines implement the same contract, a local segmented store (sled) and a
//! relational store (SQLite). Exactly one of them is selected at startup.

pub mod local;
pub mod path;
pub mod relational;

use crate::config::RepositoryConfig;
use crate::error::RepoError;
use crate::types::{NodeData, Property};
use std::io::{self, Read, Write};
use tracing::info;

pub use local::{LocalSession, LocalStore};
pub use relational::{RelationalSession, RelationalStore};

/// Operations available inside one store session.
///
/// All paths are normalized repository paths (see [`path`]).
pub trait NodeSession {
    fn node_exists(&self, path: &str) -> Result<bool, RepoError>;

    /// Read a node with its properties and child names.
    fn get_node(&self, path: &str) -> Result<NodeData, RepoError>;

    /// Return the child `name` of `parent`, creating it if missing.
    fn get_or_create_node(&mut self, parent: &str, name: &str) -> Result<String, RepoError>;

    /// Remove a node, its subtree and every blob owned by the subtree.
    fn delete_node(&mut self, path: &str) -> Result<(), RepoError>;

    /// Set (`Some`) or remove (`None`) a property.
    fn set_property(
        &mut self,
        path: &str,
        name: &str,
        value: Option<Property>,
    ) -> Result<(), RepoError>;

    fn get_property(&self, path: &str, name: &str) -> Result<Option<Property>, RepoError>;

    /// Replace the blob `file_id` of `node` in one step.
    fn write_file_blob(&mut self, node: &str, file_id: &str, content: &[u8])
        -> Result<(), RepoError>;

    fn open_file_blob(&self, node: &str, file_id: &str) -> Result<Box<dyn Read + Send>, RepoError>;

    /// Returns whether a blob was removed.
    fn delete_file_blob(&mut self, node: &str, file_id: &str) -> Result<bool, RepoError>;

    /// Set properties of the metadata node of file `file_id` and, with `content`, replace
    /// its blob, all in one atomic step. The metadata node must already exist.
    fn write_file_entry(
        &mut self,
        node: &str,
        file_id: &str,
        content: Option<&[u8]>,
        properties: &[(&str, Option<Property>)],
    ) -> Result<(), RepoError>;

    /// Persist pending writes.
    fn save(&mut self) -> Result<(), RepoError>;

    /// Persist pending writes and release the session.
    fn logout(self) -> Result<(), RepoError>
    where
        Self: Sized;

    /// Open a writable sink for a blob. Nothing is stored until [`BlobWriter::commit`].
    fn create_file_blob(&mut self, node: &str, file_id: &str) -> BlobWriter<'_, Self>
    where
        Self: Sized,
    {
        BlobWriter {
            session: self,
            node: node.to_string(),
            file_id: file_id.to_string(),
            buffer: Vec::new(),
        }
    }

    /// Create every missing node along `path`.
    fn get_or_create_path(&mut self, path: &str) -> Result<String, RepoError> {
        let mut current = path::ROOT.to_string();
        let names: Vec<String> = path::segments(path).map(str::to_string).collect();
        for name in names {
            current = self.get_or_create_node(&current, &name)?;
        }
        Ok(current)
    }

    fn children(&self, path: &str) -> Result<Vec<String>, RepoError> {
        Ok(self.get_node(path)?.children)
    }
}

/// Reject values the stores cannot encode, before anything is written.
pub(crate) fn check_storable(name: &str, value: &Property) -> Result<(), RepoError> {
    if value.is_storable() {
        Ok(())
    } else {
        Err(RepoError::InvalidArgument(format!(
            "property {} holds a non-finite number",
            name
        )))
    }
}

/// Staging sink for a blob write.
///
/// Bytes are buffered and handed to the store in one call on commit, so a failed or
/// abandoned write never leaves a partial blob behind.
pub struct BlobWriter<'s, S: NodeSession> {
    session: &'s mut S,
    node: String,
    file_id: String,
    buffer: Vec<u8>,
}

impl<'s, S: NodeSession> BlobWriter<'s, S> {
    /// Store the staged bytes, returning their length.
    pub fn commit(self) -> Result<u64, RepoError> {
        let len = self.buffer.len() as u64;
        self.session
            .write_file_blob(&self.node, &self.file_id, &self.buffer)?;
        Ok(len)
    }
}

impl<'s, S: NodeSession> Write for BlobWriter<'s, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The physical engine chosen at startup.
pub enum Backend {
    Local(LocalStore),
    Relational(RelationalStore),
}

impl Backend {
    /// Select and open the engine: a blank database URL means the local store.
    pub fn from_config(config: &RepositoryConfig) -> Result<Self, RepoError> {
        config.validate()?;
        if let Some(store) = RelationalStore::open(
            &config.storage.database_url,
            &config.top_node,
            config.storage.max_idle_connections,
        )? {
            info!(top_node = %config.top_node, "Using relational node store");
            return Ok(Backend::Relational(store));
        }
        let dir = config.storage.resolve_store_dir()?;
        info!(top_node = %config.top_node, dir = %dir.display(), "Using local segment store");
        Ok(Backend::Local(LocalStore::open(&dir, &config.top_node)?))
    }

    pub fn login(&self) -> Result<Session, RepoError> {
        match self {
            Backend::Local(store) => store.login().map(Session::Local),
            Backend::Relational(store) => store.login().map(Session::Relational),
        }
    }

    /// Release engine resources. Only the first call has an effect; failures are logged.
    pub fn shutdown(&self) -> bool {
        match self {
            Backend::Local(store) => store.shutdown(),
            Backend::Relational(store) => store.shutdown(),
        }
    }

    pub fn top_node(&self) -> &str {
        match self {
            Backend::Local(store) => store.top_node(),
            Backend::Relational(store) => store.top_node(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Backend::Local(_) => "local",
            Backend::Relational(_) => "relational",
        }
    }
}

/// A session on whichever engine is active.
pub enum Session {
    Local(LocalSession),
    Relational(RelationalSession),
}

macro_rules! dispatch {
    ($self:expr, $session:ident => $call:expr) => {
        match $self {
            Session::Local($session) => $call,
            Session::Relational($session) => $call,
        }
    };
}

impl NodeSession for Session {
    fn node_exists(&self, path: &str) -> Result<bool, RepoError> {
        dispatch!(self, s => s.node_exists(path))
    }

    fn get_node(&self, path: &str) -> Result<NodeData, RepoError> {
        dispatch!(self, s => s.get_node(path))
    }

    fn get_or_create_node(&mut self, parent: &str, name: &str) -> Result<String, RepoError> {
        dispatch!(self, s => s.get_or_create_node(parent, name))
    }

    fn delete_node(&mut self, path: &str) -> Result<(), RepoError> {
        dispatch!(self, s => s.delete_node(path))
    }

    fn set_property(
        &mut self,
        path: &str,
        name: &str,
        value: Option<Property>,
    ) -> Result<(), RepoError> {
        dispatch!(self, s => s.set_property(path, name, value))
    }

    fn get_property(&self, path: &str, name: &str) -> Result<Option<Property>, RepoError> {
        dispatch!(self, s => s.get_property(path, name))
    }

    fn write_file_blob(
        &mut self,
        node: &str,
        file_id: &str,
        content: &[u8],
    ) -> Result<(), RepoError> {
        dispatch!(self, s => s.write_file_blob(node, file_id, content))
    }

    fn open_file_blob(&self, node: &str, file_id: &str) -> Result<Box<dyn Read + Send>, RepoError> {
        dispatch!(self, s => s.open_file_blob(node, file_id))
    }

    fn delete_file_blob(&mut self, node: &str, file_id: &str) -> Result<bool, RepoError> {
        dispatch!(self, s => s.delete_file_blob(node, file_id))
    }

    fn write_file_entry(
        &mut self,
        node: &str,
        file_id: &str,
        content: Option<&[u8]>,
        properties: &[(&str, Option<Property>)],
    ) -> Result<(), RepoError> {
        dispatch!(self, s => s.write_file_entry(node, file_id, content, properties))
    }

    fn save(&mut self) -> Result<(), RepoError> {
        dispatch!(self, s => s.save())
    }

    fn logout(self) -> Result<(), RepoError> {
        dispatch!(self, s => s.logout())
    }
}
