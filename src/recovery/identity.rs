//! Database identity and per-open session ids.

use crate::env::FileSystem;
use crate::error::Result;
use crate::filename::IDENTITY_FILE_NAME;
use rand::Rng;
use std::path::Path;

/// Length of a session id.
pub(crate) const SESSION_ID_LEN: usize = 20;

const SESSION_ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A random id in UUID version 4 format.
pub(crate) fn generate_db_id() -> String {
    let mut bytes: [u8; 16] = rand::random();
    bytes[6] = (bytes[6] & 0x0F) | 0x40;
    bytes[8] = (bytes[8] & 0x3F) | 0x80;
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}-{}-{}-{}-{}", &hex[0..8], &hex[8..12], &hex[12..16], &hex[16..20], &hex[20..32])
}

/// A fresh 20 character session id over `[0-9A-Z]`.
pub(crate) fn generate_session_id() -> String {
    let mut rng = rand::rng();
    (0..SESSION_ID_LEN)
        .map(|_| SESSION_ID_ALPHABET[rng.random_range(0..SESSION_ID_ALPHABET.len())] as char)
        .collect()
}

/// Determines the database id.
///
/// IDENTITY wins; otherwise the id recorded in the manifest, otherwise a
/// new one. Unless `read_only`, a missing IDENTITY is (re)written.
pub(crate) fn resolve_db_id(fs: &dyn FileSystem, dir: &Path, manifest_id: Option<&str>, read_only: bool) -> Result<String> {
    let path = dir.join(IDENTITY_FILE_NAME);
    if fs.file_exists(&path) {
        let data = fs.read_file(&path)?;
        let id = String::from_utf8_lossy(&data).trim().to_string();
        if !id.is_empty() {
            return Ok(id);
        }
        log::warn!("IDENTITY file is empty, replacing it");
    }

    let id = match manifest_id {
        Some(id) => {
            log::info!("Restoring database id {} from the manifest", id);
            id.to_string()
        }
        None => generate_db_id(),
    };
    if !read_only {
        fs.write_file(&path, id.as_bytes(), true)?;
    }
    Ok(id)
}
