//! Content digests for stored blobs.
//!
//! A checksum is the lowercase hex SHA-256 of the bytes as physically stored, so
//! encrypted files are verified without their password.

use sha2::{Digest, Sha256};
use std::io::{self, Read};

/// Length of a complete checksum in hex characters.
pub const CHECKSUM_HEX_LEN: usize = 64;

const READ_BUFFER: usize = 64 * 1024;

/// Digest a byte stream.
pub fn checksum_reader<R: Read>(mut reader: R) -> io::Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER];
    let mut total = 0u64;
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..read]);
        total += read as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

/// Digest an in-memory buffer.
pub fn checksum_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Legacy records may carry empty or truncated checksums that cannot be compared.
pub fn is_complete(checksum: &str) -> bool {
    checksum.len() >= CHECKSUM_HEX_LEN
}

/// Compare a stored checksum against a freshly computed one.
pub fn matches(stored: &str, computed: &str) -> bool {
    stored.trim().eq_ignore_ascii_case(computed)
}
