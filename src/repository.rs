//! Repository service
//!
//! The single entry point for node and file operations. It owns the active node store,
//! resolves repository paths, enforces the size policy and keeps the encryption and
//! checksum metadata of every stored file.

pub mod options;
pub mod stream;

pub use options::{FileInfoChange, Reencryption, StoreOptions};
pub use stream::SessionStream;

use crate::backup::names;
use crate::checksum;
use crate::concurrency::FileLockManager;
use crate::config::RepositoryConfig;
use crate::crypto::{self, CryptoError};
use crate::error::RepoError;
use crate::file::FileRecord;
use crate::size::SizePolicy;
use crate::store::{path, Backend, NodeSession, Session};
use crate::tree::{read_node_info, NodeInfo};
use crate::types::{Property, ZipMode};
use chrono::Utc;
use parking_lot::Mutex;
use std::io::{Cursor, Read};
use std::sync::OnceLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Facade over the node store selected at initialization.
pub struct RepositoryService {
    backend: OnceLock<Backend>,
    config: OnceLock<RepositoryConfig>,
    init_lock: Mutex<()>,
    locks: FileLockManager,
}

impl RepositoryService {
    /// An uninitialized service; every operation fails until [`initialize`](Self::initialize).
    pub fn new() -> Self {
        Self {
            backend: OnceLock::new(),
            config: OnceLock::new(),
            init_lock: Mutex::new(()),
            locks: FileLockManager::new(),
        }
    }

    /// Create and initialize in one step.
    pub fn open(config: RepositoryConfig) -> Result<Self, RepoError> {
        let service = Self::new();
        service.initialize(config)?;
        Ok(service)
    }

    /// Select and open the node store. A second call fails with `DuplicateInitialization`.
    pub fn initialize(&self, config: RepositoryConfig) -> Result<(), RepoError> {
        let _guard = self.init_lock.lock();
        if self.backend.get().is_some() {
            return Err(RepoError::DuplicateInitialization);
        }
        let backend = Backend::from_config(&config)?;
        info!(
            backend = backend.kind(),
            top_node = %backend.top_node(),
            "Repository initialized"
        );
        if let Err(backend) = self.backend.set(backend) {
            backend.shutdown();
            return Err(RepoError::DuplicateInitialization);
        }
        if self.config.set(config).is_err() {
            debug!("Repository configuration was already recorded");
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.get().is_some()
    }

    fn backend(&self) -> Result<&Backend, RepoError> {
        self.backend.get().ok_or_else(|| {
            RepoError::BackendUnavailable("repository has not been initialized".to_string())
        })
    }

    pub fn config(&self) -> Option<&RepositoryConfig> {
        self.config.get()
    }

    pub fn top_node(&self) -> Result<&str, RepoError> {
        Ok(self.backend()?.top_node())
    }

    pub fn backend_kind(&self) -> Result<&'static str, RepoError> {
        Ok(self.backend()?.kind())
    }

    /// The configured limit, or the built-in default.
    pub fn size_policy(&self) -> SizePolicy {
        self.config
            .get()
            .map(RepositoryConfig::size_policy)
            .unwrap_or_default()
    }

    /// Open a raw session. Callers must log it out.
    pub fn login(&self) -> Result<Session, RepoError> {
        self.backend()?.login()
    }

    /// Run `f` inside one session, which is logged out whatever `f` returns.
    pub fn with_session<T, F>(&self, f: F) -> Result<T, RepoError>
    where
        F: FnOnce(&mut Session) -> Result<T, RepoError>,
    {
        let mut session = self.login()?;
        let result = f(&mut session);
        match (session.logout(), result) {
            (Ok(()), result) => result,
            (Err(logout), Ok(_)) => Err(logout),
            (Err(logout), Err(e)) => {
                warn!(error = %logout, "Session logout failed after an error");
                Err(e)
            }
        }
    }

    pub fn node_exists(&self, node_path: &str) -> Result<bool, RepoError> {
        let node_path = user_path(node_path)?;
        self.with_session(|session| session.node_exists(&node_path))
    }

    /// Create every missing node along `relative` below `parent` (default: the top node).
    pub fn ensure_node(&self, parent: Option<&str>, relative: &str) -> Result<String, RepoError> {
        let parent = user_path(parent.unwrap_or(path::ROOT))?;
        let relative = path::normalize(relative)?;
        path::reject_reserved(&relative)?;
        self.with_session(|session| {
            if !session.node_exists(&parent)? {
                return Err(RepoError::NodeNotFound(parent.clone()));
            }
            let mut current = parent.clone();
            for name in path::segments(&relative) {
                current = session.get_or_create_node(&current, name)?;
            }
            session.save()?;
            Ok(current)
        })
    }

    /// Store `content` as the file described by `record`.
    ///
    /// The size limit is enforced before anything is written. With a password the
    /// content is encrypted at rest; the checksum always covers the stored bytes.
    pub fn store_file<R: Read>(
        &self,
        record: &FileRecord,
        content: R,
        options: &StoreOptions,
    ) -> Result<FileRecord, RepoError> {
        self.backend()?;
        let node_path = user_path(&record.node_path)?;
        let file_id = if record.has_id() {
            let file_id = path::normalize_name(&record.file_id)?;
            check_file_id(&file_id, &record.file_name)?;
            file_id
        } else {
            Uuid::new_v4().simple().to_string()
        };
        let policy = options.size_policy.unwrap_or_else(|| self.size_policy());
        let plain = policy.read_limited(content, options.known_length)?;

        let mut stored = record.clone();
        stored.node_path = node_path.clone();
        stored.file_id = file_id.clone();
        if options.context_data.is_some() {
            stored.context_data = options.context_data.clone();
        }
        let (bytes, zip_mode, aes_encrypted) = match options.password.as_deref() {
            Some(password) => seal(
                &stored,
                &plain,
                Some(password),
                options.zip_mode.unwrap_or_default(),
            )?,
            None if stored.has_zip_extension() => {
                let detected = crypto::detect_mode(&plain);
                (plain, detected, false)
            }
            None => (plain, None, false),
        };
        stored.zip_mode = zip_mode;
        stored.aes_encrypted = aes_encrypted;
        stored.checksum = Some(checksum::checksum_bytes(&bytes));
        stored.size_bytes = Some(bytes.len() as u64);

        let key = FileLockManager::key(&node_path, &file_id);
        let stored = self.locks.with_write(&key, || {
            self.with_session(|session| {
                session.get_or_create_path(&node_path)?;
                let previous = match load_file_record(session, &node_path, &file_id) {
                    Ok(previous) => Some(previous),
                    Err(RepoError::FileNotFound { .. }) => None,
                    Err(e) => return Err(e),
                };
                let now = Utc::now();
                match &previous {
                    Some(previous) if previous.created_at.is_some() => {
                        stored.created_at = previous.created_at;
                        stored.created_by_user = previous.created_by_user.clone();
                    }
                    _ => {
                        stored.created_at = Some(now);
                        stored.created_by_user = Some(options.user.clone());
                    }
                }
                stored.last_update_at = Some(now);
                stored.last_update_by_user = Some(options.user.clone());

                if let Err(e) = write_file_record(session, &stored, Some(bytes.as_slice())) {
                    if previous.is_none() {
                        if let Err(cleanup) = discard_file_node(session, &stored) {
                            warn!(
                                error = %cleanup,
                                file_id = %file_id,
                                "Failed to remove metadata of failed store"
                            );
                        }
                    }
                    return Err(e);
                }
                session.save()?;
                Ok(stored)
            })
        })?;

        info!(
            node = %stored.node_path,
            file_id = %stored.file_id,
            size = stored.size_bytes.unwrap_or(0),
            encrypted = stored.is_encrypted(),
            "Stored file"
        );
        Ok(stored)
    }

    /// Read the content of a file, decrypting it when it is encrypted at rest.
    pub fn retrieve_file(
        &self,
        record: &FileRecord,
        password: Option<&str>,
    ) -> Result<Vec<u8>, RepoError> {
        let (node_path, file_id) = locate(record)?;
        self.with_session(|session| {
            let current = load_file_record(session, &node_path, &file_id)?;
            let bytes = read_stored_bytes(session, &current)?;
            open_content(&current, bytes, password)
        })
    }

    /// Like [`retrieve_file`](Self::retrieve_file), returning a stream that keeps the
    /// session open until it is closed or dropped.
    pub fn retrieve_file_stream(
        &self,
        record: &FileRecord,
        password: Option<&str>,
    ) -> Result<SessionStream, RepoError> {
        let (node_path, file_id) = locate(record)?;
        let session = self.login()?;
        let opened = (|| -> Result<Box<dyn Read + Send>, RepoError> {
            let current = load_file_record(&session, &node_path, &file_id)?;
            let reader = session.open_file_blob(&node_path, &file_id)?;
            if !current.is_encrypted() {
                return Ok(reader);
            }
            let mut bytes = Vec::new();
            let mut reader = reader;
            reader.read_to_end(&mut bytes)?;
            Ok(Box::new(Cursor::new(open_content(&current, bytes, password)?)))
        })();
        match opened {
            Ok(reader) => Ok(SessionStream::new(session, reader)),
            Err(e) => {
                if let Err(logout) = session.logout() {
                    warn!(error = %logout, "Session logout failed after an error");
                }
                Err(e)
            }
        }
    }

    /// Change the metadata of a file, re-encrypting its content when asked to.
    pub fn change_file_info(
        &self,
        record: &FileRecord,
        change: &FileInfoChange,
    ) -> Result<FileRecord, RepoError> {
        let (node_path, file_id) = locate(record)?;
        let key = FileLockManager::key(&node_path, &file_id);
        self.locks.with_write(&key, || {
            self.with_session(|session| {
                let mut current = load_file_record(session, &node_path, &file_id)?;
                if let Some(name) = &change.new_name {
                    if name.trim().is_empty() {
                        return Err(RepoError::InvalidArgument(
                            "file name must not be blank".to_string(),
                        ));
                    }
                    check_entry_name(&file_id, name)?;
                    current.file_name = name.clone();
                }
                if let Some(description) = &change.new_description {
                    current.description = Some(description.clone()).filter(|d| !d.is_empty());
                }

                let mut sealed_content = None;
                if let Some(reencryption) = &change.reencryption {
                    let bytes = read_stored_bytes(session, &current)?;
                    let plain = open_content(
                        &current,
                        bytes,
                        reencryption.current_password.as_deref(),
                    )?;
                    let (sealed, zip_mode, aes_encrypted) = seal(
                        &current,
                        &plain,
                        reencryption.new_password.as_deref(),
                        reencryption.mode,
                    )?;
                    current.checksum = Some(checksum::checksum_bytes(&sealed));
                    current.size_bytes = Some(sealed.len() as u64);
                    current.zip_mode = zip_mode;
                    current.aes_encrypted = aes_encrypted;
                    sealed_content = Some(sealed);
                    info!(file_id = %file_id, mode = %reencryption.mode, "Re-encrypting file");
                }

                if change.update_last_update_info {
                    current.last_update_at = Some(Utc::now());
                    current.last_update_by_user = Some(change.user.clone());
                }
                write_file_record(session, &current, sealed_content.as_deref())?;
                session.save()?;
                Ok(current)
            })
        })
    }

    /// The stored checksum, computed and persisted first if it is missing.
    pub fn checksum(&self, record: &FileRecord) -> Result<String, RepoError> {
        let (node_path, file_id) = locate(record)?;
        let key = FileLockManager::key(&node_path, &file_id);
        self.locks.with_write(&key, || {
            self.with_session(|session| {
                let mut current = load_file_record(session, &node_path, &file_id)?;
                if let Some(existing) = current.checksum.as_deref() {
                    if checksum::is_complete(existing) {
                        return Ok(existing.to_string());
                    }
                }
                let (digest, size) =
                    checksum::checksum_reader(session.open_file_blob(&node_path, &file_id)?)?;
                current.checksum = Some(digest.clone());
                current.size_bytes = Some(size);
                write_file_record(session, &current, None)?;
                session.save()?;
                debug!(file_id = %file_id, "Computed missing checksum");
                Ok(digest)
            })
        })
    }

    pub fn delete_file(&self, record: &FileRecord) -> Result<(), RepoError> {
        let (node_path, file_id) = locate(record)?;
        let key = FileLockManager::key(&node_path, &file_id);
        self.locks.with_write(&key, || {
            self.with_session(|session| {
                let current = load_file_record(session, &node_path, &file_id)?;
                session.delete_file_blob(&node_path, &file_id)?;
                session.delete_node(&current.metadata_path())?;
                let collection = path::files_collection(&node_path);
                if session.children(&collection)?.is_empty() {
                    session.delete_node(&collection)?;
                }
                session.save()
            })
        })?;
        info!(node = %node_path, file_id = %file_id, "Deleted file");
        Ok(())
    }

    /// Delete a node with its subtree and files.
    pub fn delete_node(&self, node_path: &str) -> Result<(), RepoError> {
        let node_path = user_path(node_path)?;
        if node_path == path::ROOT {
            return Err(RepoError::InvalidPath(
                "the top-level node cannot be deleted".to_string(),
            ));
        }
        self.with_session(|session| {
            if !session.node_exists(&node_path)? {
                return Err(RepoError::NodeNotFound(node_path.clone()));
            }
            session.delete_node(&node_path)?;
            session.save()
        })?;
        info!(node = %node_path, "Deleted node");
        Ok(())
    }

    /// Snapshot of a node, and of its whole subtree when `recursive`.
    pub fn get_node_info(&self, node_path: &str, recursive: bool) -> Result<NodeInfo, RepoError> {
        let node_path = path::normalize(node_path)?;
        self.with_session(|session| read_node_info(session, &node_path, recursive))
    }

    pub fn list_files(&self, node_path: &str) -> Result<Vec<FileRecord>, RepoError> {
        let node_path = user_path(node_path)?;
        self.with_session(|session| list_file_records(session, &node_path))
    }

    /// Find a file by id, or else by file name.
    pub fn find_file(
        &self,
        node_path: &str,
        file_id: Option<&str>,
        file_name: Option<&str>,
    ) -> Result<Option<FileRecord>, RepoError> {
        let files = self.list_files(node_path)?;
        if let Some(id) = file_id {
            return Ok(files.into_iter().find(|f| f.file_id == id));
        }
        Ok(file_name.and_then(|name| files.into_iter().find(|f| f.file_name == name)))
    }

    pub fn get_file_info(&self, node_path: &str, file_id: &str) -> Result<FileRecord, RepoError> {
        let (node_path, file_id) = locate(&FileRecord::reference(node_path, file_id))?;
        self.with_session(|session| load_file_record(session, &node_path, &file_id))
    }

    pub fn store_property(
        &self,
        node_path: &str,
        name: &str,
        value: Property,
    ) -> Result<(), RepoError> {
        self.update_property(node_path, name, Some(value))
    }

    pub fn remove_property(&self, node_path: &str, name: &str) -> Result<(), RepoError> {
        self.update_property(node_path, name, None)
    }

    fn update_property(
        &self,
        node_path: &str,
        name: &str,
        value: Option<Property>,
    ) -> Result<(), RepoError> {
        let node_path = user_path(node_path)?;
        if name.trim().is_empty() {
            return Err(RepoError::InvalidArgument(
                "property name must not be blank".to_string(),
            ));
        }
        self.with_session(|session| {
            session.set_property(&node_path, name, value)?;
            session.save()
        })
    }

    pub fn get_property(&self, node_path: &str, name: &str) -> Result<Option<Property>, RepoError> {
        let node_path = user_path(node_path)?;
        self.with_session(|session| session.get_property(&node_path, name))
    }

    /// Release the node store. Only the first call has an effect and returns `true`;
    /// failures are logged.
    pub fn shutdown(&self) -> bool {
        match self.backend.get() {
            Some(backend) => backend.shutdown(),
            None => {
                debug!("Shutdown requested before initialization");
                false
            }
        }
    }
}

impl Default for RepositoryService {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize a caller-supplied node path.
fn user_path(node_path: &str) -> Result<String, RepoError> {
    let normalized = path::normalize(node_path)?;
    path::reject_reserved(&normalized)?;
    Ok(normalized)
}

fn locate(record: &FileRecord) -> Result<(String, String), RepoError> {
    if !record.has_id() {
        return Err(RepoError::InvalidArgument(
            "file record has no file id".to_string(),
        ));
    }
    Ok((
        user_path(&record.node_path)?,
        path::normalize_name(&record.file_id)?,
    ))
}

/// Caller-chosen file ids must be their own archive name and must not collide with
/// the metadata entries of a backup.
fn check_file_id(file_id: &str, file_name: &str) -> Result<(), RepoError> {
    if names::sanitize(file_id) != file_id {
        return Err(RepoError::InvalidArgument(format!(
            "file id {} may only contain letters, digits and _",
            file_id
        )));
    }
    check_entry_name(file_id, file_name)
}

fn check_entry_name(file_id: &str, file_name: &str) -> Result<(), RepoError> {
    let entry = names::file_entry_name(file_id, file_name);
    if names::is_metadata_entry(&entry) {
        return Err(RepoError::InvalidArgument(format!(
            "file {} named {} would be archived as the reserved entry {}",
            file_id, file_name, entry
        )));
    }
    Ok(())
}

/// Encrypt `plain` for `record`, or keep it as is for `STANDARD`.
fn seal(
    record: &FileRecord,
    plain: &[u8],
    password: Option<&str>,
    mode: ZipMode,
) -> Result<(Vec<u8>, Option<ZipMode>, bool), RepoError> {
    if mode == ZipMode::Standard {
        return Ok((plain.to_vec(), Some(ZipMode::Standard), false));
    }
    let password = password.ok_or_else(|| {
        RepoError::InvalidArgument(format!("zip mode {} requires a password", mode))
    })?;
    let sealed = crypto::encrypt(Cursor::new(plain), &record.file_name, password, mode)
        .map_err(|e| crypto_error(&record.file_id, e))?;
    Ok((sealed, Some(mode), true))
}

/// Turn stored bytes into content, decrypting when the record says so.
fn open_content(
    record: &FileRecord,
    stored: Vec<u8>,
    password: Option<&str>,
) -> Result<Vec<u8>, RepoError> {
    if !record.is_encrypted() {
        return Ok(stored);
    }
    let password =
        password.ok_or_else(|| RepoError::DecryptionRequired(record.file_id.clone()))?;
    crypto::decrypt(&stored, password).map_err(|e| crypto_error(&record.file_id, e))
}

fn crypto_error(file_id: &str, err: CryptoError) -> RepoError {
    match err {
        CryptoError::WrongPassword => RepoError::WrongPassword(file_id.to_string()),
        CryptoError::Failed(message) => {
            RepoError::DecryptionFailed(format!("{}: {}", file_id, message))
        }
        CryptoError::UnsupportedMode(_) | CryptoError::EmptyPassword => {
            RepoError::InvalidArgument(err.to_string())
        }
    }
}

/// Load the metadata of one file; `FileNotFound` if it does not exist.
pub(crate) fn load_file_record<S: NodeSession + ?Sized>(
    session: &S,
    node_path: &str,
    file_id: &str,
) -> Result<FileRecord, RepoError> {
    let metadata_path = path::file_node(node_path, file_id);
    if !session.node_exists(&metadata_path)? {
        return Err(RepoError::FileNotFound {
            node_path: node_path.to_string(),
            file_id: file_id.to_string(),
        });
    }
    Ok(FileRecord::from_node(
        node_path,
        &session.get_node(&metadata_path)?,
    ))
}

/// Persist the metadata of one file, creating its metadata node if needed. With
/// `content` the blob is replaced in the same store write.
pub(crate) fn write_file_record<S: NodeSession + ?Sized>(
    session: &mut S,
    record: &FileRecord,
    content: Option<&[u8]>,
) -> Result<(), RepoError> {
    let collection = session.get_or_create_node(&record.node_path, path::FILES_NODE)?;
    session.get_or_create_node(&collection, &record.file_id)?;
    session.write_file_entry(
        &record.node_path,
        &record.file_id,
        content,
        &record.to_properties(),
    )
}

/// Remove the metadata node of a file that never got stored.
fn discard_file_node<S: NodeSession + ?Sized>(
    session: &mut S,
    record: &FileRecord,
) -> Result<(), RepoError> {
    let metadata_path = record.metadata_path();
    if session.node_exists(&metadata_path)? {
        session.delete_node(&metadata_path)?;
    }
    let collection = path::files_collection(&record.node_path);
    if session.node_exists(&collection)? && session.children(&collection)?.is_empty() {
        session.delete_node(&collection)?;
    }
    Ok(())
}

pub(crate) fn list_file_records<S: NodeSession + ?Sized>(
    session: &S,
    node_path: &str,
) -> Result<Vec<FileRecord>, RepoError> {
    let node = session.get_node(node_path)?;
    if !node.children.iter().any(|c| c == path::FILES_NODE) {
        return Ok(Vec::new());
    }
    let collection = path::files_collection(node_path);
    session
        .children(&collection)?
        .iter()
        .map(|id| -> Result<FileRecord, RepoError> {
            let file_node = session.get_node(&path::child(&collection, id))?;
            Ok(FileRecord::from_node(node_path, &file_node))
        })
        .collect()
}

/// The bytes of a file exactly as stored.
pub(crate) fn read_stored_bytes<S: NodeSession + ?Sized>(
    session: &S,
    record: &FileRecord,
) -> Result<Vec<u8>, RepoError> {
    let mut reader = session.open_file_blob(&record.node_path, &record.file_id)?;
    let mut bytes = Vec::with_capacity(record.size_bytes.unwrap_or(0).min(64 * 1024 * 1024) as usize);
    reader.read_to_end(&mut bytes)?;
    Ok(bytes)
}
