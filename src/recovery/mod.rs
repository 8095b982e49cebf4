//! Recovery of a database directory at open.
//!
//! Recovery runs in three phases:
//! 1. Scan the directory and classify every file by name.
//! 2. Rebuild the column family layout from the manifest, strictly from the
//!    one CURRENT names or, in best-efforts mode, from the newest manifest
//!    whose tables check out.
//! 3. Replay the write-ahead logs the manifest does not cover yet.
//!
//! Assembling the live database from the result is left to the caller.

mod identity;
mod manifest;
mod wal_replay;

pub(crate) use identity::{generate_session_id, resolve_db_id};
pub(crate) use manifest::{ColumnFamilyRecord, ManifestState, RecoveredManifest};
pub(crate) use wal_replay::{replay_logs, ReplayStats, ReplayTarget};

use crate::config::{Options, PersistedOptions, RecoveryMode};
use crate::env::FileSystem;
use crate::error::{Error, Result};
use crate::filename::{options_file_name, parse_file_name, FileType};
use std::path::Path;

/// Files found in a database directory, by kind, each list ascending.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct DirectoryListing {
    pub logs: Vec<u64>,
    pub tables: Vec<u64>,
    pub manifests: Vec<u64>,
    pub options: Vec<u64>,
    pub temps: Vec<u64>,
    pub has_current: bool,
    /// Largest file number of any kind
    pub max_number: u64,
}

impl DirectoryListing {
    /// True if the directory holds a database.
    pub fn has_database(&self) -> bool {
        self.has_current || !self.manifests.is_empty()
    }
}

/// Lists and classifies the files in `dir`. Unknown names are ignored.
pub(crate) fn scan_directory(fs: &dyn FileSystem, dir: &Path) -> Result<DirectoryListing> {
    let mut listing = DirectoryListing::default();
    for name in fs.children(dir)? {
        let number = match parse_file_name(&name) {
            Some(FileType::Log(n)) => {
                listing.logs.push(n);
                n
            }
            Some(FileType::Table(n)) => {
                listing.tables.push(n);
                n
            }
            Some(FileType::Manifest(n)) => {
                listing.manifests.push(n);
                n
            }
            Some(FileType::Options(n)) => {
                listing.options.push(n);
                n
            }
            Some(FileType::Temp(n)) => {
                listing.temps.push(n);
                n
            }
            Some(FileType::Current) => {
                listing.has_current = true;
                continue;
            }
            Some(FileType::Identity) | Some(FileType::Lock) | Some(FileType::Trace) | None => continue,
        };
        listing.max_number = listing.max_number.max(number);
    }
    for list in [&mut listing.logs, &mut listing.tables, &mut listing.manifests, &mut listing.options, &mut listing.temps] {
        list.sort_unstable();
    }
    Ok(listing)
}

/// Rebuilds the manifest state of an existing database.
pub(crate) fn recover_manifest(
    fs: &dyn FileSystem,
    dir: &Path,
    listing: &DirectoryListing,
    mode: RecoveryMode,
) -> Result<RecoveredManifest> {
    match mode {
        RecoveryMode::Strict => {
            if !listing.has_current {
                return Err(Error::corruption("CURRENT file is missing"));
            }
            manifest::recover_strict(fs, dir)
        }
        RecoveryMode::BestEfforts => manifest::recover_best_efforts(fs, dir, &listing.manifests),
    }
}

/// Writes the options in effect to `OPTIONS-<number>` and removes the
/// options files of earlier opens.
pub(crate) fn persist_options(
    fs: &dyn FileSystem,
    dir: &Path,
    number: u64,
    options: &Options,
    column_families: Vec<String>,
    previous: &[u64],
) -> Result<()> {
    let persisted = PersistedOptions::from_options(options, column_families);
    let json = serde_json::to_string_pretty(&persisted)?;
    fs.write_file(&dir.join(options_file_name(number)), json.as_bytes(), true)?;
    for &old in previous.iter().filter(|&&n| n != number) {
        if let Err(e) = fs.remove_file(&dir.join(options_file_name(old))) {
            log::warn!("Failed to delete old options file {}: {}", old, e);
        }
    }
    Ok(())
}
