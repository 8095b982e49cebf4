//! Rebuilding the column family layout from manifest files.
//!
//! Strict recovery replays the manifest named by CURRENT and requires every
//! referenced table to be present with its recorded size. Best-efforts
//! recovery tries every manifest, newest first, and keeps for each column
//! family the latest state whose tables are all present and intact.

use crate::column_family::{DEFAULT_COLUMN_FAMILY_ID, DEFAULT_COLUMN_FAMILY_NAME};
use crate::env::FileSystem;
use crate::error::{Error, Result};
use crate::filename::{manifest_file_path, read_current_file, table_file_path};
use crate::sstable::file_checksum;
use crate::version::{read_manifest, FileMetaData, ManifestEnd, VersionEdit};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// One column family as described by the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ColumnFamilyRecord {
    pub id: u32,
    pub name: String,
    pub log_number: u64,
    /// Live files by number
    pub files: BTreeMap<u64, FileMetaData>,
}

impl ColumnFamilyRecord {
    fn new(id: u32, name: String) -> Self {
        Self { id, name, log_number: 0, files: BTreeMap::new() }
    }
}

/// Database state accumulated from manifest edits.
#[derive(Debug, Clone, Default)]
pub(crate) struct ManifestState {
    pub column_families: BTreeMap<u32, ColumnFamilyRecord>,
    pub next_file_number: u64,
    pub last_sequence: u64,
    pub max_column_family: u32,
    pub db_id: Option<String>,
}

impl ManifestState {
    /// State of a database that has never been written.
    pub fn empty_database() -> Self {
        let mut state = Self { next_file_number: 1, ..Self::default() };
        let default = ColumnFamilyRecord::new(DEFAULT_COLUMN_FAMILY_ID, DEFAULT_COLUMN_FAMILY_NAME.to_string());
        state.column_families.insert(DEFAULT_COLUMN_FAMILY_ID, default);
        state
    }

    /// Applies one edit.
    ///
    /// Edits that only carry database-wide counters need no column family;
    /// any other edit for an unknown family is corruption.
    pub fn apply(&mut self, edit: &VersionEdit) -> Result<()> {
        if let Some(next) = edit.next_file_number {
            self.next_file_number = self.next_file_number.max(next);
        }
        if let Some(seq) = edit.last_sequence {
            self.last_sequence = self.last_sequence.max(seq);
        }
        if let Some(max) = edit.max_column_family {
            self.max_column_family = self.max_column_family.max(max);
        }
        if let Some(id) = &edit.db_id {
            self.db_id = Some(id.clone());
        }

        if let Some(name) = &edit.column_family_add {
            if self.column_families.values().any(|cf| &cf.name == name && cf.id != edit.column_family) {
                return Err(Error::corruption(format!("column family {} added twice", name)));
            }
            self.column_families.insert(edit.column_family, ColumnFamilyRecord::new(edit.column_family, name.clone()));
            self.max_column_family = self.max_column_family.max(edit.column_family);
        } else if edit.column_family_drop {
            if self.column_families.remove(&edit.column_family).is_none() {
                return Err(Error::corruption(format!("drop of unknown column family {}", edit.column_family)));
            }
            return Ok(());
        }

        if !edit.has_file_changes() && edit.log_number.is_none() {
            return Ok(());
        }
        let cf = self
            .column_families
            .get_mut(&edit.column_family)
            .ok_or_else(|| Error::corruption(format!("edit for unknown column family {}", edit.column_family)))?;
        for &(_, number) in &edit.deleted_files {
            if cf.files.remove(&number).is_none() {
                return Err(Error::corruption(format!("edit deletes unknown file {}", number)));
            }
        }
        for meta in &edit.new_files {
            cf.files.insert(meta.number, meta.clone());
        }
        if let Some(log_number) = edit.log_number {
            cf.log_number = cf.log_number.max(log_number);
        }
        Ok(())
    }

    fn require_default(&self) -> Result<()> {
        if self.column_families.contains_key(&DEFAULT_COLUMN_FAMILY_ID) {
            Ok(())
        } else {
            Err(Error::corruption("manifest has no default column family"))
        }
    }
}

/// Outcome of manifest recovery.
#[derive(Debug)]
pub(crate) struct RecoveredManifest {
    pub state: ManifestState,
    pub manifest_number: u64,
    /// Some column family was recovered to an older state than the manifest
    /// describes
    pub rolled_back: bool,
}

/// Replays the manifest named by CURRENT.
pub(crate) fn recover_strict(fs: &dyn FileSystem, dir: &Path) -> Result<RecoveredManifest> {
    let number = read_current_file(fs, dir)?;
    let path = manifest_file_path(dir, number);
    let log = read_manifest(fs, &path).map_err(|e| {
        if e.is_file_not_found() {
            Error::corruption(format!("CURRENT names missing manifest {}", number))
        } else {
            e
        }
    })?;
    if let ManifestEnd::Corrupt(reason) = &log.end {
        return Err(Error::corruption(format!("manifest {}: {}", number, reason)));
    }

    let mut state = ManifestState::default();
    for edit in &log.edits {
        state.apply(edit)?;
    }
    state.require_default()?;

    for cf in state.column_families.values() {
        for meta in cf.files.values() {
            let path = table_file_path(dir, meta.number);
            let size = fs.file_size(&path).map_err(|e| {
                if e.is_file_not_found() {
                    Error::corruption(format!("table file {} of column family {} is missing", meta.number, cf.name))
                } else {
                    e
                }
            })?;
            if size != meta.file_size {
                return Err(Error::corruption(format!(
                    "table file {} has {} bytes, manifest records {}",
                    meta.number, size, meta.file_size
                )));
            }
        }
    }

    log::info!(
        "Recovered manifest {}: {} column families, next file {}, last sequence {}",
        number,
        state.column_families.len(),
        state.next_file_number,
        state.last_sequence
    );
    Ok(RecoveredManifest { state, manifest_number: number, rolled_back: false })
}

/// Validates table files against their metadata, remembering every verdict.
struct FileChecker<'a> {
    fs: &'a dyn FileSystem,
    dir: &'a Path,
    verdicts: HashMap<u64, bool>,
}

impl<'a> FileChecker<'a> {
    fn new(fs: &'a dyn FileSystem, dir: &'a Path) -> Self {
        Self { fs, dir, verdicts: HashMap::new() }
    }

    fn is_intact(&mut self, meta: &FileMetaData) -> bool {
        if let Some(&ok) = self.verdicts.get(&meta.number) {
            return ok;
        }
        let ok = match file_checksum(self.fs, &table_file_path(self.dir, meta.number)) {
            Ok((size, checksum)) => size == meta.file_size && checksum == meta.checksum,
            Err(_) => false,
        };
        if !ok {
            log::warn!("Table file {} is missing or damaged", meta.number);
        }
        self.verdicts.insert(meta.number, ok);
        ok
    }

    fn all_intact(&mut self, cf: &ColumnFamilyRecord) -> bool {
        cf.files.values().all(|meta| self.is_intact(meta))
    }
}

/// Recovers from the newest usable manifest among `manifests`.
///
/// A manifest is usable when it yields at least one decodable edit. Each
/// column family ends up in the latest state whose files all check out, or
/// empty when no such state exists.
pub(crate) fn recover_best_efforts(fs: &dyn FileSystem, dir: &Path, manifests: &[u64]) -> Result<RecoveredManifest> {
    let mut candidates = manifests.to_vec();
    candidates.sort_unstable_by(|a, b| b.cmp(a));
    let mut checker = FileChecker::new(fs, dir);

    for number in candidates {
        let log = match read_manifest(fs, &manifest_file_path(dir, number)) {
            Ok(log) => log,
            Err(e) => {
                log::warn!("Skipping unreadable manifest {}: {}", number, e);
                continue;
            }
        };
        if log.edits.is_empty() {
            log::warn!("Manifest {} holds no decodable edits", number);
            continue;
        }
        if let ManifestEnd::Corrupt(reason) = &log.end {
            log::warn!("Manifest {} is corrupt after {} edits: {}", number, log.edits.len(), reason);
        }

        let mut state = ManifestState::default();
        let mut good: BTreeMap<u32, ColumnFamilyRecord> = BTreeMap::new();
        for edit in &log.edits {
            if let Err(e) = state.apply(edit) {
                log::warn!("Ignoring edit in manifest {}: {}", number, e);
                continue;
            }
            if edit.column_family_drop {
                good.remove(&edit.column_family);
                continue;
            }
            if let Some(cf) = state.column_families.get(&edit.column_family) {
                if checker.all_intact(cf) {
                    good.insert(cf.id, cf.clone());
                }
            }
        }
        if state.column_families.is_empty() {
            log::warn!("Manifest {} describes no column family", number);
            continue;
        }

        let mut rolled_back = false;
        let mut resolved = BTreeMap::new();
        for (id, latest) in &state.column_families {
            let chosen = match good.remove(id) {
                Some(cf) => cf,
                None => {
                    log::warn!("Column family {} has no intact state, opening it empty", latest.name);
                    ColumnFamilyRecord::new(*id, latest.name.clone())
                }
            };
            if &chosen != latest {
                log::warn!(
                    "Column family {} rolled back from {} to {} files",
                    latest.name,
                    latest.files.len(),
                    chosen.files.len()
                );
                rolled_back = true;
            }
            resolved.insert(*id, chosen);
        }
        state.column_families = resolved;
        if state.require_default().is_err() {
            log::warn!("Manifest {} has no default column family", number);
            continue;
        }

        log::info!("Best-efforts recovery chose manifest {} (rolled back: {})", number, rolled_back);
        return Ok(RecoveredManifest { state, manifest_number: number, rolled_back });
    }
    Err(Error::corruption("no usable manifest found"))
}
