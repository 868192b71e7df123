//! File-size policy and human-readable byte counts.

use crate::error::RepoError;
use serde::{Deserialize, Serialize};
use std::io::Read;

const KB: f64 = 1024.0;
const MB: f64 = KB * 1024.0;
const GB: f64 = MB * 1024.0;

/// Format a byte count for humans (`512 bytes`, `1.5 KB`, `3.2 MB`, ...).
pub fn format_bytes(bytes: u64) -> String {
    let value = bytes as f64;
    if value < KB {
        format!("{} bytes", bytes)
    } else if value < MB {
        format!("{:.1} KB", value / KB)
    } else if value < GB {
        format!("{:.1} MB", value / MB)
    } else {
        format!("{:.1} GB", value / GB)
    }
}

/// Upper bound for the size of a single stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizePolicy {
    pub max_bytes: u64,
}

impl SizePolicy {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn unlimited() -> Self {
        Self {
            max_bytes: u64::MAX,
        }
    }

    /// Reject a length known up front.
    pub fn check(&self, actual: u64) -> Result<(), RepoError> {
        if actual > self.max_bytes {
            return Err(RepoError::FileTooLarge {
                limit: self.max_bytes,
                actual,
            });
        }
        Ok(())
    }

    /// Read `content` completely while enforcing the limit.
    ///
    /// At most `max_bytes + 1` bytes are pulled from the source; if the extra byte
    /// arrives the content is rejected before anything has been persisted. The
    /// reported actual size is then a lower bound.
    pub fn read_limited<R: Read>(
        &self,
        content: R,
        known_length: Option<u64>,
    ) -> Result<Vec<u8>, RepoError> {
        if let Some(len) = known_length {
            self.check(len)?;
        }
        let mut buffer = Vec::with_capacity(known_length.unwrap_or(0).min(16 * 1024 * 1024) as usize);
        let mut limited = content.take(self.max_bytes.saturating_add(1));
        limited.read_to_end(&mut buffer)?;
        self.check(buffer.len() as u64)?;
        Ok(buffer)
    }
}

impl Default for SizePolicy {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_FILE_SIZE)
    }
}
