//! Arguments of store and change operations.

use crate::size::SizePolicy;
use crate::types::ZipMode;

/// How a file is stored.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Recorded as creator and last updater.
    pub user: String,
    /// Falls back to the configured limit.
    pub size_policy: Option<SizePolicy>,
    /// Length announced by the caller, checked before reading.
    pub known_length: Option<u64>,
    /// Encrypts the content at rest when set.
    pub password: Option<String>,
    /// Requested encryption mode; AES-256 when a password is given without one.
    pub zip_mode: Option<ZipMode>,
    pub context_data: Option<String>,
}

impl StoreOptions {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Self::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_zip_mode(mut self, mode: ZipMode) -> Self {
        self.zip_mode = Some(mode);
        self
    }

    pub fn with_size_policy(mut self, policy: SizePolicy) -> Self {
        self.size_policy = Some(policy);
        self
    }

    pub fn with_known_length(mut self, length: u64) -> Self {
        self.known_length = Some(length);
        self
    }

    pub fn with_context_data(mut self, data: impl Into<String>) -> Self {
        self.context_data = Some(data.into());
        self
    }
}

/// Switch a file to another encryption mode.
///
/// `Standard` stores the plaintext; any other known mode needs `new_password`.
#[derive(Debug, Clone)]
pub struct Reencryption {
    pub mode: ZipMode,
    /// Needed when the file is currently encrypted.
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

/// Metadata change of a stored file.
#[derive(Debug, Clone)]
pub struct FileInfoChange {
    pub user: String,
    pub new_name: Option<String>,
    /// An empty description removes it.
    pub new_description: Option<String>,
    pub reencryption: Option<Reencryption>,
    pub update_last_update_info: bool,
}

impl FileInfoChange {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            new_name: None,
            new_description: None,
            reencryption: None,
            update_last_update_info: true,
        }
    }

    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.new_name = Some(name.into());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.new_description = Some(description.into());
        self
    }

    pub fn reencrypt(mut self, reencryption: Reencryption) -> Self {
        self.reencryption = Some(reencryption);
        self
    }

    pub fn keep_last_update_info(mut self) -> Self {
        self.update_last_update_info = false;
        self
    }
}
