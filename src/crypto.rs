//! Encryption at rest
//!
//! Encrypted content is stored as a single-entry zip container, either with traditional
//! PKWARE encryption or WinZip AES (128 or 256 bit). Using the zip container keeps stored
//! blobs readable by ordinary archive tools given the password. The password itself is
//! never persisted.

use crate::types::ZipMode;
use std::io::{self, Cursor, Read};
use thiserror::Error;
use zip::result::ZipError;
use zip::unstable::write::FileOptionsExt;
use zip::write::SimpleFileOptions;
use zip::{AesMode, CompressionMethod, ZipArchive, ZipWriter};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;
const LOCAL_HEADER_LEN: usize = 30;
const FLAG_ENCRYPTED: u16 = 0x0001;
const FLAG_STRONG_ENCRYPTION: u16 = 0x0040;
const METHOD_AES: u16 = 99;
const EXTRA_AES: u16 = 0x9901;

/// Bytes inspected by [`detect_mode_from_reader`].
pub const DETECT_PREFIX_LEN: usize = 64 * 1024;

/// Entry name used inside the container when the caller has no file name.
pub const DEFAULT_ENTRY_NAME: &str = "content";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("wrong password")]
    WrongPassword,

    #[error("{0}")]
    Failed(String),

    #[error("zip mode {0} cannot be used for encryption")]
    UnsupportedMode(ZipMode),

    #[error("an empty password cannot be used for encryption")]
    EmptyPassword,
}

/// Encrypt `plain` into a zip container using `mode`.
pub fn encrypt<R: Read>(
    mut plain: R,
    entry_name: &str,
    password: &str,
    mode: ZipMode,
) -> Result<Vec<u8>, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::EmptyPassword);
    }
    let entry_name = if entry_name.trim().is_empty() {
        DEFAULT_ENTRY_NAME
    } else {
        entry_name
    };
    let base = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let started = match mode {
        ZipMode::EncryptedStandard => writer.start_file(
            entry_name,
            base.with_deprecated_encryption(password.as_bytes()),
        ),
        ZipMode::EncryptedAes128 => {
            writer.start_file(entry_name, base.with_aes_encryption(AesMode::Aes128, password))
        }
        ZipMode::EncryptedAes256 => {
            writer.start_file(entry_name, base.with_aes_encryption(AesMode::Aes256, password))
        }
        ZipMode::Standard | ZipMode::Encrypted => return Err(CryptoError::UnsupportedMode(mode)),
    };
    started.map_err(|e| CryptoError::Failed(e.to_string()))?;
    io::copy(&mut plain, &mut writer).map_err(|e| CryptoError::Failed(e.to_string()))?;
    let cursor = writer
        .finish()
        .map_err(|e| CryptoError::Failed(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// Decrypt a container produced by [`encrypt`] (or any single-entry encrypted zip).
///
/// Authentication failures of either cipher surface as [`CryptoError::WrongPassword`]:
/// the traditional cipher only checks one byte up front, so a wrong password may get
/// past the header and is then caught by the CRC at the end of the entry.
pub fn decrypt(encrypted: &[u8], password: &str) -> Result<Vec<u8>, CryptoError> {
    let mut archive = ZipArchive::new(Cursor::new(encrypted))
        .map_err(|e| CryptoError::Failed(format!("not an encrypted container: {}", e)))?;
    if archive.len() == 0 {
        return Err(CryptoError::Failed("encrypted container is empty".to_string()));
    }
    let mut entry = match archive.by_index_decrypt(0, password.as_bytes()) {
        Ok(entry) => entry,
        Err(ZipError::InvalidPassword) => return Err(CryptoError::WrongPassword),
        Err(e) => return Err(CryptoError::Failed(e.to_string())),
    };
    let mut plain = Vec::with_capacity(entry.size().min(64 * 1024 * 1024) as usize);
    entry
        .read_to_end(&mut plain)
        .map_err(|_| CryptoError::WrongPassword)?;
    Ok(plain)
}

/// Inspect the start of a stored blob and report which mode produced it.
///
/// Returns `None` for content that is not a zip container at all, `Standard` for an
/// unencrypted zip, `Encrypted` when the entry is encrypted with an algorithm we can't
/// name, and the specific mode otherwise.
pub fn detect_mode(header: &[u8]) -> Option<ZipMode> {
    let signature = read_u32(header, 0)?;
    if signature == END_OF_CENTRAL_DIR_SIG {
        return Some(ZipMode::Standard);
    }
    if signature != LOCAL_HEADER_SIG || header.len() < LOCAL_HEADER_LEN {
        return None;
    }
    let flags = read_u16(header, 6)?;
    let method = read_u16(header, 8)?;
    if flags & FLAG_ENCRYPTED == 0 {
        return Some(ZipMode::Standard);
    }
    if flags & FLAG_STRONG_ENCRYPTION != 0 {
        return Some(ZipMode::Encrypted);
    }
    if method != METHOD_AES {
        return Some(ZipMode::EncryptedStandard);
    }

    let name_len = read_u16(header, 26)? as usize;
    let extra_len = read_u16(header, 28)? as usize;
    let extra_start = LOCAL_HEADER_LEN + name_len;
    let extra_end = (extra_start + extra_len).min(header.len());
    if extra_start >= extra_end {
        return Some(ZipMode::Encrypted);
    }
    let extra = &header[extra_start..extra_end];
    let mut offset = 0;
    while offset + 4 <= extra.len() {
        let id = read_u16(extra, offset)?;
        let size = read_u16(extra, offset + 2)? as usize;
        let data_start = offset + 4;
        if id == EXTRA_AES && size >= 7 && data_start + 5 <= extra.len() {
            return Some(match extra[data_start + 4] {
                1 => ZipMode::EncryptedAes128,
                3 => ZipMode::EncryptedAes256,
                _ => ZipMode::Encrypted,
            });
        }
        offset = data_start + size;
    }
    Some(ZipMode::Encrypted)
}

/// Detect the mode of a non-seekable stream.
///
/// The inspected prefix is replayed in front of the remaining stream, so the returned
/// reader yields exactly the bytes the original one would have.
pub fn detect_mode_from_reader<R: Read>(
    mut reader: R,
) -> io::Result<(Option<ZipMode>, io::Chain<Cursor<Vec<u8>>, R>)> {
    let mut prefix = Vec::with_capacity(DETECT_PREFIX_LEN);
    (&mut reader)
        .take(DETECT_PREFIX_LEN as u64)
        .read_to_end(&mut prefix)?;
    let mode = detect_mode(&prefix);
    Ok((mode, Cursor::new(prefix).chain(reader)))
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    bytes
        .get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}
