//! Relational node store
//!
//! Nodes, properties and blobs are rows in a SQLite database. Sessions borrow a
//! connection from a small idle pool and hand it back on logout.

use super::path;
use super::{check_storable, NodeSession};
use crate::error::RepoError;
use crate::types::{NodeData, Property, PropertyMap};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const URL_PREFIXES: [&str; 3] = ["jdbc:sqlite:", "sqlite://", "sqlite:"];
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const UPSERT_PROPERTY: &str = "INSERT INTO repo_property (node_path, name, value) VALUES (?1, ?2, ?3)
     ON CONFLICT(node_path, name) DO UPDATE SET value = excluded.value";
const DELETE_PROPERTY: &str = "DELETE FROM repo_property WHERE node_path = ?1 AND name = ?2";
const UPSERT_BLOB: &str = "INSERT INTO repo_blob (node_path, file_id, content) VALUES (?1, ?2, ?3)
     ON CONFLICT(node_path, file_id) DO UPDATE SET content = excluded.content";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS repo_node (
    path        TEXT PRIMARY KEY,
    parent_path TEXT,
    name        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS repo_node_parent ON repo_node(parent_path);
CREATE TABLE IF NOT EXISTS repo_property (
    node_path TEXT NOT NULL REFERENCES repo_node(path) ON DELETE CASCADE,
    name      TEXT NOT NULL,
    value     TEXT NOT NULL,
    PRIMARY KEY (node_path, name)
);
CREATE TABLE IF NOT EXISTS repo_blob (
    node_path TEXT NOT NULL REFERENCES repo_node(path) ON DELETE CASCADE,
    file_id   TEXT NOT NULL,
    content   BLOB NOT NULL,
    PRIMARY KEY (node_path, file_id)
);
"#;

/// Parse a database URL into a SQLite file path.
///
/// A blank URL yields `None`, meaning the relational store is not configured.
pub fn parse_database_url(url: &str) -> Result<Option<PathBuf>, RepoError> {
    let url = url.trim();
    if url.is_empty() {
        return Ok(None);
    }
    for prefix in URL_PREFIXES {
        if let Some(rest) = url.strip_prefix(prefix) {
            if rest.trim().is_empty() {
                return Err(RepoError::BackendUnavailable(format!(
                    "database url has no file path: {}",
                    url
                )));
            }
            return Ok(Some(PathBuf::from(rest)));
        }
    }
    Err(RepoError::BackendUnavailable(format!(
        "unsupported database url: {}",
        url
    )))
}

struct Pool {
    db_path: PathBuf,
    top_node: String,
    max_idle: usize,
    idle: Mutex<Vec<Connection>>,
    closed: AtomicBool,
}

impl Pool {
    fn connect(&self) -> Result<Connection, RepoError> {
        let conn = Connection::open(&self.db_path).map_err(|e| {
            RepoError::BackendUnavailable(format!(
                "failed to open database {}: {}",
                self.db_path.display(),
                e
            ))
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    fn checkout(&self) -> Result<Connection, RepoError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RepoError::BackendUnavailable(
                "relational store has been shut down".to_string(),
            ));
        }
        if let Some(conn) = self.idle.lock().pop() {
            return Ok(conn);
        }
        self.connect()
    }

    fn give_back(&self, conn: Connection) {
        // Checked under the idle lock so a connection returned during shutdown is not
        // parked after the drain.
        let mut idle = self.idle.lock();
        if !self.closed.load(Ordering::Acquire) && idle.len() < self.max_idle {
            idle.push(conn);
        } else {
            drop(idle);
            close_connection(conn);
        }
    }

    fn key(&self, repo_path: &str) -> String {
        if repo_path == path::ROOT {
            format!("/{}", self.top_node)
        } else {
            format!("/{}{}", self.top_node, repo_path)
        }
    }
}

fn close_connection(conn: Connection) {
    if let Err((_, e)) = conn.close() {
        warn!(error = %e, "Failed to close database connection");
    }
}

/// Handle to an opened relational store.
pub struct RelationalStore {
    pool: Arc<Pool>,
}

impl RelationalStore {
    /// Open the store named by `url`. Returns `Ok(None)` when `url` is blank.
    pub fn open(url: &str, top_node: &str, max_idle: usize) -> Result<Option<Self>, RepoError> {
        let Some(db_path) = parse_database_url(url)? else {
            return Ok(None);
        };
        let top_node = top_node.trim();
        if top_node.is_empty() {
            return Err(RepoError::BackendUnavailable(
                "top-level node name must not be blank".to_string(),
            ));
        }
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let pool = Pool {
            db_path,
            top_node: path::normalize_name(top_node)?,
            max_idle: max_idle.max(1),
            idle: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        };
        let conn = pool.connect()?;
        conn.execute_batch(SCHEMA)?;
        let root_key = pool.key(path::ROOT);
        let created = conn.execute(
            "INSERT OR IGNORE INTO repo_node (path, parent_path, name) VALUES (?1, NULL, ?2)",
            params![root_key, pool.top_node],
        )?;
        if created > 0 {
            info!(top_node = %pool.top_node, "Created top-level node");
        }
        pool.give_back(conn);
        Ok(Some(Self {
            pool: Arc::new(pool),
        }))
    }

    pub fn top_node(&self) -> &str {
        &self.pool.top_node
    }

    pub fn login(&self) -> Result<RelationalSession, RepoError> {
        let conn = self.pool.checkout()?;
        Ok(RelationalSession {
            pool: Arc::clone(&self.pool),
            conn: Some(conn),
        })
    }

    /// Close idle connections and refuse new sessions. Only the first call has an effect.
    pub fn shutdown(&self) -> bool {
        if self
            .pool
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Relational store already shut down");
            return false;
        }
        let drained: Vec<Connection> = self.pool.idle.lock().drain(..).collect();
        let count = drained.len();
        for conn in drained {
            close_connection(conn);
        }
        info!(
            closed_connections = count,
            db = %self.pool.db_path.display(),
            "Relational store shut down"
        );
        true
    }
}

/// One session on the relational store, holding a pooled connection.
pub struct RelationalSession {
    pool: Arc<Pool>,
    conn: Option<Connection>,
}

impl RelationalSession {
    fn conn(&self) -> Result<&Connection, RepoError> {
        self.conn
            .as_ref()
            .ok_or_else(|| RepoError::BackendUnavailable("session is closed".to_string()))
    }

    fn conn_mut(&mut self) -> Result<&mut Connection, RepoError> {
        self.conn
            .as_mut()
            .ok_or_else(|| RepoError::BackendUnavailable("session is closed".to_string()))
    }

    fn exists_key(conn: &Connection, key: &str) -> Result<bool, RepoError> {
        let found = conn
            .query_row(
                "SELECT 1 FROM repo_node WHERE path = ?1",
                params![key],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn require_key(conn: &Connection, key: &str, repo_path: &str) -> Result<(), RepoError> {
        if Self::exists_key(conn, key)? {
            Ok(())
        } else {
            Err(RepoError::NodeNotFound(repo_path.to_string()))
        }
    }
}

impl NodeSession for RelationalSession {
    fn node_exists(&self, path: &str) -> Result<bool, RepoError> {
        Self::exists_key(self.conn()?, &self.pool.key(path))
    }

    fn get_node(&self, path: &str) -> Result<NodeData, RepoError> {
        let conn = self.conn()?;
        let key = self.pool.key(path);
        let name: String = conn
            .query_row(
                "SELECT name FROM repo_node WHERE path = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| RepoError::NodeNotFound(path.to_string()))?;

        let mut stmt =
            conn.prepare_cached("SELECT name FROM repo_node WHERE parent_path = ?1 ORDER BY rowid")?;
        let children = stmt
            .query_map(params![key], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt =
            conn.prepare_cached("SELECT name, value FROM repo_property WHERE node_path = ?1")?;
        let rows = stmt
            .query_map(params![key], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut properties = PropertyMap::new();
        for (prop_name, value) in rows {
            properties.insert(prop_name, serde_json::from_str(&value)?);
        }

        Ok(NodeData {
            path: path.to_string(),
            name,
            properties,
            children,
        })
    }

    fn get_or_create_node(&mut self, parent: &str, name: &str) -> Result<String, RepoError> {
        let name = path::normalize_name(name)?;
        let parent_key = self.pool.key(parent);
        let child_path = path::child(parent, &name);
        let child_key = self.pool.key(&child_path);
        let conn = self.conn_mut()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Self::require_key(&tx, &parent_key, parent)?;
        tx.execute(
            "INSERT OR IGNORE INTO repo_node (path, parent_path, name) VALUES (?1, ?2, ?3)",
            params![child_key, parent_key, name],
        )?;
        tx.commit()?;
        Ok(child_path)
    }

    fn delete_node(&mut self, path: &str) -> Result<(), RepoError> {
        if path::parent(path).is_none() {
            return Err(RepoError::InvalidPath(
                "the top-level node cannot be deleted".to_string(),
            ));
        }
        let key = self.pool.key(path);
        let conn = self.conn_mut()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Self::require_key(&tx, &key, path)?;
        let removed = tx.execute(
            "DELETE FROM repo_node WHERE path = ?1 OR substr(path, 1, length(?1) + 1) = ?1 || '/'",
            params![key],
        )?;
        tx.commit()?;
        debug!(path, nodes = removed, "Deleted node subtree");
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
        let key = self.pool.key(path);
        let conn = self.conn()?;
        Self::require_key(conn, &key, path)?;
        match value {
            Some(value) => {
                let encoded = serde_json::to_string(&value)?;
                conn.execute(UPSERT_PROPERTY, params![key, name, encoded])?;
            }
            None => {
                conn.execute(DELETE_PROPERTY, params![key, name])?;
            }
        }
        Ok(())
    }

    fn get_property(&self, path: &str, name: &str) -> Result<Option<Property>, RepoError> {
        let key = self.pool.key(path);
        let conn = self.conn()?;
        Self::require_key(conn, &key, path)?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM repo_property WHERE node_path = ?1 AND name = ?2",
                params![key, name],
                |row| row.get(0),
            )
            .optional()?;
        match value {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    fn write_file_blob(
        &mut self,
        node: &str,
        file_id: &str,
        content: &[u8],
    ) -> Result<(), RepoError> {
        let key = self.pool.key(node);
        let conn = self.conn()?;
        Self::require_key(conn, &key, node)?;
        conn.execute(UPSERT_BLOB, params![key, file_id, content])?;
        Ok(())
    }

    fn open_file_blob(&self, node: &str, file_id: &str) -> Result<Box<dyn Read + Send>, RepoError> {
        let content: Option<Vec<u8>> = self
            .conn()?
            .query_row(
                "SELECT content FROM repo_blob WHERE node_path = ?1 AND file_id = ?2",
                params![self.pool.key(node), file_id],
                |row| row.get(0),
            )
            .optional()?;
        match content {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes))),
            None => Err(RepoError::FileNotFound {
                node_path: node.to_string(),
                file_id: file_id.to_string(),
            }),
        }
    }

    fn delete_file_blob(&mut self, node: &str, file_id: &str) -> Result<bool, RepoError> {
        let removed = self.conn()?.execute(
            "DELETE FROM repo_blob WHERE node_path = ?1 AND file_id = ?2",
            params![self.pool.key(node), file_id],
        )?;
        Ok(removed > 0)
    }

    fn write_file_entry(
        &mut self,
        node: &str,
        file_id: &str,
        content: Option<&[u8]>,
        properties: &[(&str, Option<Property>)],
    ) -> Result<(), RepoError> {
        let mut encoded = Vec::with_capacity(properties.len());
        for (name, value) in properties {
            let value = match value {
                Some(value) => {
                    check_storable(name, value)?;
                    Some(serde_json::to_string(value)?)
                }
                None => None,
            };
            encoded.push((*name, value));
        }
        let metadata_path = path::file_node(node, file_id);
        let node_key = self.pool.key(node);
        let metadata_key = self.pool.key(&metadata_path);

        let conn = self.conn_mut()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Self::require_key(&tx, &metadata_key, &metadata_path)?;
        for (name, value) in &encoded {
            match value {
                Some(value) => tx.execute(UPSERT_PROPERTY, params![metadata_key, name, value])?,
                None => tx.execute(DELETE_PROPERTY, params![metadata_key, name])?,
            };
        }
        if let Some(content) = content {
            tx.execute(UPSERT_BLOB, params![node_key, file_id, content])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn save(&mut self) -> Result<(), RepoError> {
        // Every statement commits on its own; nothing is pending here.
        self.conn()?;
        Ok(())
    }

    fn logout(mut self) -> Result<(), RepoError> {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn);
        }
        Ok(())
    }
}

impl Drop for RelationalSession {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn);
        }
    }
}
