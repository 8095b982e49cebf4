//! The version set: every column family's current Version plus the manifest.

use super::{ManifestWriter, Version, VersionBuilder, VersionEdit};
use crate::column_family::{ColumnFamilyData, DEFAULT_COLUMN_FAMILY_ID, DEFAULT_COLUMN_FAMILY_NAME};
use crate::env::FileSystem;
use crate::error::{Error, Result};
use crate::filename::manifest_file_path;
use crate::memtable::{MemTable, MemTableList};
use crossbeam::channel::Sender;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Static configuration of a [`VersionSet`].
#[derive(Debug, Clone)]
pub(crate) struct VersionSetOptions {
    pub dir: PathBuf,
    pub fs: Arc<dyn FileSystem>,
    pub num_levels: usize,
    pub max_manifest_file_size: u64,
    pub write_dbid_to_manifest: bool,
    pub purge_tx: Option<Sender<u64>>,
}

/// Owns the column families and the manifest they are persisted in.
///
/// All changes go through [`log_and_apply`](VersionSet::log_and_apply), which
/// builds the new Version, persists the edit and only then publishes it.
pub(crate) struct VersionSet {
    opts: VersionSetOptions,
    column_families: BTreeMap<u32, Arc<ColumnFamilyData>>,
    manifest: Option<ManifestWriter>,
    manifest_number: Option<u64>,
    next_file_number: u64,
    last_sequence: u64,
    max_column_family: u32,
    next_version_number: u64,
    db_id: String,
}

impl VersionSet {
    pub fn new(
        opts: VersionSetOptions,
        db_id: String,
        next_file_number: u64,
        last_sequence: u64,
        max_column_family: u32,
        recovered_manifest: Option<u64>,
    ) -> Self {
        Self {
            opts,
            column_families: BTreeMap::new(),
            manifest: None,
            manifest_number: recovered_manifest,
            next_file_number: next_file_number.max(1),
            last_sequence,
            max_column_family,
            next_version_number: 1,
            db_id,
        }
    }

    pub fn num_levels(&self) -> usize {
        self.opts.num_levels
    }

    pub fn add_column_family(&mut self, cf: Arc<ColumnFamilyData>) {
        self.max_column_family = self.max_column_family.max(cf.id());
        self.column_families.insert(cf.id(), cf);
    }

    pub fn column_family(&self, id: u32) -> Option<&Arc<ColumnFamilyData>> {
        self.column_families.get(&id)
    }

    pub fn column_family_by_name(&self, name: &str) -> Option<&Arc<ColumnFamilyData>> {
        self.column_families.values().find(|cf| cf.name() == name)
    }

    pub fn column_families(&self) -> impl Iterator<Item = &Arc<ColumnFamilyData>> {
        self.column_families.values()
    }

    pub fn new_file_number(&mut self) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        number
    }

    pub fn next_file_number(&self) -> u64 {
        self.next_file_number
    }

    pub fn new_version_number(&mut self) -> u64 {
        let number = self.next_version_number;
        self.next_version_number += 1;
        number
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn manifest_number(&self) -> Option<u64> {
        self.manifest_number
    }

    pub fn purge_tx(&self) -> Option<Sender<u64>> {
        self.opts.purge_tx.clone()
    }

    /// Oldest WAL that still holds unflushed data for some column family.
    ///
    /// Families with nothing in memory need no log at all.
    pub fn min_log_number_to_keep(&self, current_log: u64) -> u64 {
        self.column_families
            .values()
            .map(|cf| {
                let state = cf.lock_state();
                if state.mem.is_empty() && state.imm.is_empty() {
                    current_log
                } else {
                    state.log_number
                }
            })
            .min()
            .unwrap_or(current_log)
    }

    /// Edits that recreate the whole current state.
    pub fn snapshot_edits(&self) -> Vec<VersionEdit> {
        let mut global = VersionEdit::new(DEFAULT_COLUMN_FAMILY_ID);
        global.set_next_file_number(self.next_file_number);
        global.set_last_sequence(self.last_sequence);
        global.max_column_family = Some(self.max_column_family);
        if self.opts.write_dbid_to_manifest {
            global.db_id = Some(self.db_id.clone());
        }

        let mut edits = vec![global];
        for cf in self.column_families.values() {
            let state = cf.lock_state();
            let mut edit = VersionEdit::new(cf.id());
            edit.column_family_add = Some(cf.name().to_string());
            edit.set_log_number(state.log_number);
            for file in state.current.all_files() {
                edit.add_file(file.meta().clone());
            }
            edits.push(edit);
        }
        edits
    }

    /// Starts a new manifest holding a snapshot of the current state.
    ///
    /// CURRENT is repointed and the previous manifest deleted.
    pub fn roll_manifest(&mut self) -> Result<()> {
        self.manifest = None;
        let number = self.new_file_number();
        let snapshot = self.snapshot_edits();
        let writer = match ManifestWriter::create(self.opts.fs.as_ref(), &self.opts.dir, number, &snapshot) {
            Ok(writer) => writer,
            Err(e) => {
                let _ = self.opts.fs.remove_file(&manifest_file_path(&self.opts.dir, number));
                return Err(e);
            }
        };
        if let Some(old) = self.manifest_number.replace(number) {
            if old != number {
                log::info!("Manifest rolled over from {} to {}", old, number);
                if let Err(e) = self.opts.fs.remove_file(&manifest_file_path(&self.opts.dir, old)) {
                    log::warn!("Failed to delete old manifest {}: {}", old, e);
                }
            }
        }
        self.manifest = Some(writer);
        Ok(())
    }

    fn write_edit(&mut self, edit: &VersionEdit) -> Result<()> {
        let needs_new = match &self.manifest {
            None => true,
            Some(m) => m.file_size() > self.opts.max_manifest_file_size,
        };
        if needs_new {
            self.roll_manifest()?;
        }
        let manifest = self.manifest.as_mut().ok_or_else(|| Error::internal("manifest writer missing"))?;
        if let Err(e) = manifest.add_edit(edit) {
            log::error!("Failed to write manifest {}: {}", manifest.number(), e);
            // The file may now end in a partial record; never append to it again
            self.manifest = None;
            return Err(e);
        }
        Ok(())
    }

    /// Applies `edit` to `cf`, persists it and publishes the new Version.
    ///
    /// The caller installs a new SuperVersion afterwards.
    pub fn log_and_apply(&mut self, cf: &Arc<ColumnFamilyData>, mut edit: VersionEdit) -> Result<Arc<Version>> {
        if cf.is_dropped() {
            return Err(Error::invalid_state(format!("column family {} was dropped", cf.name())));
        }
        edit.column_family = cf.id();
        edit.set_next_file_number(self.next_file_number);
        match edit.last_sequence {
            Some(seq) => self.last_sequence = self.last_sequence.max(seq),
            None => edit.set_last_sequence(self.last_sequence),
        }

        let base = cf.current_version();
        let mut builder = VersionBuilder::new(&base, self.purge_tx());
        builder.apply(&edit)?;
        let number = self.new_version_number();
        let version = Arc::new(builder.build(number)?);

        self.write_edit(&edit)?;

        let moved: HashSet<u64> = edit.new_files.iter().map(|f| f.number).collect();
        for &(level, number) in &edit.deleted_files {
            if moved.contains(&number) {
                continue;
            }
            if let Some(file) = base.files(level).iter().find(|f| f.number == number) {
                file.mark_obsolete();
            }
        }

        let mut state = cf.lock_state();
        state.current = Arc::clone(&version);
        if let Some(log_number) = edit.log_number {
            state.log_number = state.log_number.max(log_number);
        }
        Ok(version)
    }

    /// Creates and persists a new column family.
    pub fn create_column_family(&mut self, name: &str, mem: Arc<MemTable>) -> Result<Arc<ColumnFamilyData>> {
        if self.column_family_by_name(name).is_some() {
            return Err(Error::AlreadyExists(format!("column family {}", name)));
        }
        let id = self.max_column_family + 1;
        let mut edit = VersionEdit::new(id);
        edit.column_family_add = Some(name.to_string());
        edit.max_column_family = Some(id);
        edit.set_log_number(mem.log_number());
        edit.set_next_file_number(self.next_file_number);
        edit.set_last_sequence(self.last_sequence);
        self.write_edit(&edit)?;

        self.max_column_family = id;
        let version = Arc::new(Version::from_levels(self.new_version_number(), vec![Vec::new(); self.opts.num_levels]));
        let log_number = mem.log_number();
        let cf = ColumnFamilyData::new(id, name, mem, MemTableList::new(), version, log_number);
        self.column_families.insert(id, Arc::clone(&cf));
        log::info!("Created column family {} (id {})", name, id);
        Ok(cf)
    }

    /// Persists the drop of `cf` and releases its files.
    pub fn drop_column_family(&mut self, cf: &Arc<ColumnFamilyData>) -> Result<()> {
        if cf.id() == DEFAULT_COLUMN_FAMILY_ID {
            return Err(Error::invalid_argument(format!("cannot drop the {} column family", DEFAULT_COLUMN_FAMILY_NAME)));
        }
        if cf.is_dropped() {
            return Err(Error::invalid_argument(format!("column family {} already dropped", cf.name())));
        }
        let mut edit = VersionEdit::new(cf.id());
        edit.column_family_drop = true;
        edit.set_next_file_number(self.next_file_number);
        edit.set_last_sequence(self.last_sequence);
        self.write_edit(&edit)?;

        cf.set_dropped();
        for file in cf.current_version().all_files() {
            file.mark_obsolete();
        }
        self.column_families.remove(&cf.id());
        log::info!("Dropped column family {} (id {})", cf.name(), cf.id());
        Ok(())
    }

    /// Wraps recovered metadata in live handles for `cf`'s first Version.
    pub fn version_from_files(&mut self, files: Vec<super::FileMetaData>) -> Result<Arc<Version>> {
        let mut edit = VersionEdit::new(0);
        edit.new_files = files;
        let mut builder = VersionBuilder::new(&Version::new(self.opts.num_levels), self.purge_tx());
        builder.apply(&edit)?;
        let number = self.new_version_number();
        Ok(Arc::new(builder.build(number)?))
    }
}

impl std::fmt::Debug for VersionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionSet")
            .field("column_families", &self.column_families.len())
            .field("manifest_number", &self.manifest_number)
            .field("next_file_number", &self.next_file_number)
            .field("last_sequence", &self.last_sequence)
            .finish()
    }
}
