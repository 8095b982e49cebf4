//! The database core shared by the client handle and the background workers.
//!
//! Locks are always taken in this order:
//! writer mutex → version set mutex → column family state mutex.
//! Readers take none of them on the fast path.

use crate::background::{Job, WorkerPool};
use crate::cache::{BlockCache, CacheStats, RowCache};
use crate::column_family::{ColumnFamilyData, ColumnFamilyHandle, DEFAULT_COLUMN_FAMILY_NAME};
use crate::compaction::{
    key_range, write_tables, CompactionIterator, CompactionJob, CompactionPicker, CompactionTask, Entry, EntrySource,
    MergeIterator, OutputOptions,
};
use crate::config::{CompactRangeOptions, Options, ReadOptions, WriteOptions};
use crate::env::{FileLock, FileSystem, IoOptions};
use crate::error::{Error, Result};
use crate::filename::{lock_file_path, log_file_path, manifest_file_path, parse_file_name, table_file_path, temp_file_name, FileType};
use crate::lookup::{self, acquire_consistent, LookupEnv, MultiGetGroup};
use crate::memtable::{MemTable, MemTableList, ValueType};
use crate::properties::Property;
use crate::recovery::{self, DirectoryListing, ManifestState, ReplayTarget};
use crate::snapshot::{Snapshot, SnapshotList};
use crate::sstable::{file_checksum, TableCache, TableReadOptions};
use crate::trace::Tracer;
use crate::version::{FileMetaData, Version, VersionEdit, VersionSet, VersionSetOptions};
use crate::wal::{create_log_writer, LogWriter};
use crate::write_batch::WriteBatch;
use crossbeam::channel::{unbounded, Receiver};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// How long a stalled writer sleeps before re-checking for room.
const WRITE_STALL_WAIT: Duration = Duration::from_millis(100);

/// One stored version of a key, as listed by `get_all_key_versions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVersion {
    /// User key
    pub user_key: Vec<u8>,
    /// Stored value, operand, or empty for tombstones
    pub value: Vec<u8>,
    /// Sequence number of the write
    pub sequence: u64,
    /// Kind of entry
    pub value_type: ValueType,
}

/// State serialized by the writer mutex.
struct WriterState {
    log: Option<LogWriter>,
}

pub(crate) struct DbInner {
    path: PathBuf,
    options: Options,
    fs: Arc<dyn FileSystem>,
    read_only: bool,

    versions: Mutex<VersionSet>,
    /// Live column families; the read path resolves ids here
    cf_registry: RwLock<BTreeMap<u32, Arc<ColumnFamilyData>>>,

    writer: Mutex<WriterState>,
    stall_cv: Condvar,
    last_sequence: AtomicU64,
    current_log_number: AtomicU64,
    next_memtable_id: AtomicU64,

    snapshots: SnapshotList,
    table_cache: TableCache,
    row_cache: Option<RowCache>,
    picker: CompactionPicker,

    bg_error: Mutex<Option<Error>>,
    purge_rx: Option<Receiver<u64>>,
    flush_pool: WorkerPool,
    compaction_pool: WorkerPool,
    compaction_scheduled: AtomicBool,
    shutting_down: AtomicBool,
    close_result: Mutex<Option<Result<()>>>,
    /// Held from open until the first close; read-only opens take none
    lock: Mutex<Option<Box<dyn FileLock>>>,

    tracing: AtomicBool,
    tracer: Mutex<Option<Tracer>>,

    db_id: String,
    session_id: String,
}

impl DbInner {
    /// Opens or creates the database at `path`.
    ///
    /// `cf_names` lists the column families a writable open must cover;
    /// `None` means only the default one.
    pub fn open(path: &Path, options: Options, cf_names: Option<&[String]>, read_only: bool) -> Result<Arc<Self>> {
        options.validate()?;
        let fs = Arc::clone(&options.file_system);
        let path = path.to_path_buf();

        // Step 1: Classify what is on disk
        if !read_only && options.create_if_missing {
            fs.create_dir_all(&path)?;
        }
        let lock = if read_only {
            None
        } else {
            match fs.lock_file(&lock_file_path(&path)) {
                Ok(lock) => Some(lock),
                Err(e) if e.is_file_not_found() => {
                    return Err(Error::invalid_argument(format!("database {} does not exist", path.display())));
                }
                Err(e) => return Err(e),
            }
        };
        let listing = match recovery::scan_directory(fs.as_ref(), &path) {
            Ok(listing) => listing,
            Err(e) if e.is_file_not_found() => {
                return Err(Error::invalid_argument(format!("database {} does not exist", path.display())));
            }
            Err(e) => return Err(e),
        };

        // Step 2: Rebuild the column family layout
        let (state, manifest_number, rolled_back) = if listing.has_database() {
            if options.error_if_exists {
                return Err(Error::AlreadyExists(format!("database {} already exists", path.display())));
            }
            let recovered = recovery::recover_manifest(fs.as_ref(), &path, &listing, options.recovery_mode)?;
            (recovered.state, Some(recovered.manifest_number), recovered.rolled_back)
        } else if read_only || !options.create_if_missing {
            return Err(Error::invalid_argument(format!(
                "database {} does not exist (create_if_missing is false)",
                path.display()
            )));
        } else {
            log::info!("Creating new database at {:?}", path);
            (ManifestState::empty_database(), None, false)
        };
        let missing = check_column_family_names(&state, cf_names, read_only, options.create_missing_column_families)?;

        // Step 3: Identity
        let db_id = recovery::resolve_db_id(fs.as_ref(), &path, state.db_id.as_deref(), read_only)?;
        let session_id = recovery::generate_session_id();

        // Step 4: Live column families over the recovered files
        let (purge_tx, purge_rx) = if read_only {
            (None, None)
        } else {
            let (tx, rx) = unbounded();
            (Some(tx), Some(rx))
        };
        let next_file_number = state.next_file_number.max(listing.max_number + 1);
        let mut versions = VersionSet::new(
            VersionSetOptions {
                dir: path.clone(),
                fs: Arc::clone(&fs),
                num_levels: options.max_levels,
                max_manifest_file_size: options.max_manifest_file_size,
                write_dbid_to_manifest: options.write_dbid_to_manifest,
                purge_tx,
            },
            db_id.clone(),
            next_file_number,
            state.last_sequence,
            state.max_column_family,
            manifest_number,
        );

        let mut next_memtable_id = 1;
        let mut live_tables = HashSet::new();
        let mut targets = HashMap::new();
        for record in state.column_families.values() {
            live_tables.extend(record.files.keys().copied());
            let current = versions.version_from_files(record.files.values().cloned().collect())?;
            let mem = Arc::new(MemTable::new(next_memtable_id, record.log_number));
            next_memtable_id += 1;
            targets.insert(record.id, ReplayTarget { log_number: record.log_number, mem: Arc::clone(&mem) });
            let cf = ColumnFamilyData::new(record.id, record.name.clone(), mem, MemTableList::new(), current, record.log_number);
            versions.add_column_family(cf);
        }

        if !read_only {
            remove_leftovers(fs.as_ref(), &path, &listing, &live_tables);
        }

        // Step 5: Replay the logs the manifest does not cover
        let mut last_sequence = state.last_sequence;
        if rolled_back {
            log::warn!("Skipping WAL replay: recovered state is older than the logs");
        } else {
            let min_log = state.column_families.values().map(|cf| cf.log_number).min().unwrap_or(0);
            let logs: Vec<u64> = listing.logs.iter().copied().filter(|&n| n >= min_log).collect();
            if !logs.is_empty() {
                let stats = recovery::replay_logs(fs.as_ref(), &path, &logs, &targets, options.recovery_mode)?;
                log::info!(
                    "Replayed {} batches ({} entries) from {} logs, max sequence {}",
                    stats.batches,
                    stats.entries,
                    logs.len(),
                    stats.max_sequence
                );
                last_sequence = last_sequence.max(stats.max_sequence);
            }
        }
        drop(targets);

        let block_cache = (options.block_cache_size > 0).then(|| Arc::new(BlockCache::new(options.block_cache_size)));
        let row_cache = (options.row_cache_size > 0).then(|| RowCache::new(options.row_cache_size));
        let registry: BTreeMap<u32, Arc<ColumnFamilyData>> =
            versions.column_families().map(|cf| (cf.id(), Arc::clone(cf))).collect();

        let inner = Arc::new(Self {
            table_cache: TableCache::new(Arc::clone(&fs), path.clone(), block_cache),
            row_cache,
            picker: CompactionPicker::new(&options),
            path,
            fs,
            read_only,
            versions: Mutex::new(versions),
            cf_registry: RwLock::new(registry),
            writer: Mutex::new(WriterState { log: None }),
            stall_cv: Condvar::new(),
            last_sequence: AtomicU64::new(last_sequence),
            current_log_number: AtomicU64::new(0),
            next_memtable_id: AtomicU64::new(next_memtable_id),
            snapshots: SnapshotList::new(),
            bg_error: Mutex::new(None),
            purge_rx,
            flush_pool: WorkerPool::new("flush"),
            compaction_pool: WorkerPool::new("compaction"),
            compaction_scheduled: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            close_result: Mutex::new(None),
            lock: Mutex::new(lock),
            tracing: AtomicBool::new(false),
            tracer: Mutex::new(None),
            db_id,
            session_id,
            options,
        });

        if read_only {
            log::info!("Opened {:?} read-only at sequence {}", inner.path, last_sequence);
            return Ok(inner);
        }

        // Step 6: Make the recovered state durable and start accepting writes
        inner.finish_recovery(&listing, &missing)?;
        inner.start_background()?;
        log::info!(
            "Opened database {:?} (id {}, session {}) at sequence {}",
            inner.path,
            inner.db_id,
            inner.session_id,
            last_sequence
        );
        Ok(inner)
    }

    /// Flushes replayed memtables, starts a fresh WAL, and records both in a
    /// new manifest.
    fn finish_recovery(&self, listing: &DirectoryListing, missing: &[String]) -> Result<()> {
        let mut writer = self.writer.lock();
        let mut versions = self.versions.lock();

        let log_number = versions.new_file_number();
        let log = if self.options.use_wal {
            Some(create_log_writer(self.fs.as_ref(), &log_file_path(&self.path, log_number), log_number)?)
        } else {
            None
        };

        let cfs: Vec<Arc<ColumnFamilyData>> = versions.column_families().cloned().collect();
        for cf in &cfs {
            let replayed = Arc::clone(&cf.lock_state().mem);
            let mut edit = VersionEdit::new(cf.id());
            if !replayed.is_empty() {
                let files = {
                    let mut new_file_number = || versions.new_file_number();
                    self.build_level0(&[replayed], Vec::new(), &mut new_file_number)?
                };
                for meta in files {
                    edit.add_file(meta);
                }
            }
            edit.set_log_number(log_number);
            edit.set_last_sequence(self.last_sequence.load(Ordering::Acquire));
            versions.log_and_apply(cf, edit)?;

            let mut state = cf.lock_state();
            state.mem = Arc::new(MemTable::new(self.new_memtable_id(), log_number));
            cf.install_super_version(&state);
        }

        for name in missing {
            let mem = Arc::new(MemTable::new(self.new_memtable_id(), log_number));
            let cf = versions.create_column_family(name, mem)?;
            self.cf_registry.write().insert(cf.id(), cf);
        }

        let manifest_number = versions.manifest_number();
        let options_number = versions.new_file_number();
        let cf_names: Vec<String> = versions.column_families().map(|cf| cf.name().to_string()).collect();
        self.current_log_number.store(log_number, Ordering::Release);
        writer.log = log;
        drop(versions);
        drop(writer);

        for &number in listing.manifests.iter().filter(|&&n| Some(n) != manifest_number) {
            if let Err(e) = self.fs.remove_file(&manifest_file_path(&self.path, number)) {
                log::warn!("Failed to delete stale manifest {}: {}", number, e);
            }
        }
        recovery::persist_options(self.fs.as_ref(), &self.path, options_number, &self.options, cf_names, &listing.options)?;
        self.delete_obsolete_files();
        Ok(())
    }

    fn start_background(self: &Arc<Self>) -> Result<()> {
        let weak = Arc::downgrade(self);
        self.flush_pool.start(self.options.flush_threads, move |job| run_job(&weak, job))?;
        let weak = Arc::downgrade(self);
        self.compaction_pool.start(self.options.compaction_threads, move |job| run_job(&weak, job))?;
        self.maybe_schedule_compaction();
        Ok(())
    }

    fn new_memtable_id(&self) -> u64 {
        self.next_memtable_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn db_id(&self) -> &str {
        &self.db_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn latest_sequence_number(&self) -> u64 {
        self.last_sequence.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Column families
    // ------------------------------------------------------------------

    pub fn column_family(&self, id: u32) -> Result<Arc<ColumnFamilyData>> {
        self.cf_registry
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::invalid_argument(format!("unknown column family id {}", id)))
    }

    pub fn cf_handle(&self, name: &str) -> Option<ColumnFamilyHandle> {
        self.cf_registry.read().values().find(|cf| cf.name() == name).map(|cf| cf.handle())
    }

    pub fn column_family_handles(&self) -> Vec<ColumnFamilyHandle> {
        self.cf_registry.read().values().map(|cf| cf.handle()).collect()
    }

    pub fn create_column_family(&self, name: &str) -> Result<ColumnFamilyHandle> {
        self.check_writable()?;
        if name.is_empty() {
            return Err(Error::invalid_argument("column family name must not be empty"));
        }
        let _writer = self.writer.lock();
        self.check_bg_error()?;
        let mut versions = self.versions.lock();
        let mem = Arc::new(MemTable::new(self.new_memtable_id(), self.current_log_number.load(Ordering::Acquire)));
        let cf = versions.create_column_family(name, mem)?;
        let handle = cf.handle();
        self.cf_registry.write().insert(cf.id(), cf);
        Ok(handle)
    }

    pub fn drop_column_family(&self, handle: &ColumnFamilyHandle) -> Result<()> {
        self.check_writable()?;
        {
            let _writer = self.writer.lock();
            self.check_bg_error()?;
            let cf = self.column_family(handle.id())?;
            self.versions.lock().drop_column_family(&cf)?;
            self.cf_registry.write().remove(&cf.id());
        }
        self.delete_obsolete_files();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::not_supported("database was opened read-only"));
        }
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Error::invalid_state("database is closed"));
        }
        Ok(())
    }

    fn check_bg_error(&self) -> Result<()> {
        match self.bg_error.lock().as_ref() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Records the first background failure; it is never cleared.
    fn set_bg_error(&self, error: Error) {
        {
            let mut bg = self.bg_error.lock();
            if bg.is_none() {
                log::error!("Background error, database is now read-only: {}", error);
                *bg = Some(error);
            }
        }
        self.stall_cv.notify_all();
    }

    /// Wakes writers stalled on memtable backpressure.
    fn notify_writers(&self) {
        let _writer = self.writer.lock();
        self.stall_cv.notify_all();
    }

    /// Applies `batch` atomically with one contiguous sequence range.
    pub fn write(&self, opts: &WriteOptions, batch: &WriteBatch) -> Result<()> {
        self.check_writable()?;
        if batch.is_empty() {
            return Ok(());
        }

        let mut writer = self.writer.lock();
        self.check_bg_error()?;

        // Step 1: Resolve column families and make room in their memtables
        let mut cfs: BTreeMap<u32, Arc<ColumnFamilyData>> = BTreeMap::new();
        for op in batch.iter() {
            if !cfs.contains_key(&op.cf_id) {
                cfs.insert(op.cf_id, self.column_family(op.cf_id)?);
            }
        }
        for cf in cfs.values() {
            self.make_room_for_write(&mut writer, cf)?;
        }

        // Step 2: Log the batch
        let first = self.last_sequence.load(Ordering::Acquire) + 1;
        if self.options.use_wal && !opts.disable_wal {
            if let Some(log) = writer.log.as_mut() {
                let sync = opts.sync || self.options.sync_wal;
                let result = log.add_record(&batch.encode(first)).and_then(|_| if sync { log.sync() } else { Ok(()) });
                if let Err(e) = result {
                    log::error!("WAL write failed: {}", e);
                    self.set_bg_error(e.clone());
                    return Err(e);
                }
            }
        }

        // Step 3: Insert into the memtables and publish
        let mems: HashMap<u32, Arc<MemTable>> =
            cfs.iter().map(|(id, cf)| (*id, Arc::clone(&cf.lock_state().mem))).collect();
        let mut sequence = first;
        for op in batch.iter() {
            if let Some(mem) = mems.get(&op.cf_id) {
                mem.add(sequence, op.value_type, &op.key, &op.value);
            }
            sequence += 1;
        }
        self.last_sequence.store(sequence - 1, Ordering::Release);
        drop(writer);

        self.trace(|tracer| tracer.record_write(batch, first));
        Ok(())
    }

    /// Switches the memtable of `cf` once it is full, stalling while the
    /// column family already has its maximum number of memtables.
    fn make_room_for_write(&self, writer: &mut MutexGuard<'_, WriterState>, cf: &Arc<ColumnFamilyData>) -> Result<()> {
        let mut stalled = false;
        loop {
            self.check_bg_error()?;
            if self.shutting_down.load(Ordering::Acquire) {
                return Err(Error::invalid_state("database is closing"));
            }
            let (mem_size, num_imm) = {
                let state = cf.lock_state();
                (state.mem.approximate_size(), state.imm.len())
            };
            if mem_size < self.options.memtable_size {
                return Ok(());
            }
            if num_imm + 1 >= self.options.max_write_buffer_number {
                if !stalled {
                    log::warn!("Stalling writes to {}: {} memtables waiting for flush", cf.name(), num_imm);
                    stalled = true;
                }
                self.stall_cv.wait_for(writer, WRITE_STALL_WAIT);
                continue;
            }
            self.switch_memtable(writer, cf, true)?;
            return Ok(());
        }
    }

    /// Starts a new WAL and a new memtable for `cf`. The old memtable joins
    /// the immutable list and, with `schedule`, a background flush is queued.
    /// Returns the id of the old memtable.
    fn switch_memtable(&self, writer: &mut WriterState, cf: &Arc<ColumnFamilyData>, schedule: bool) -> Result<u64> {
        let log_number = self.versions.lock().new_file_number();
        if self.options.use_wal {
            let log = create_log_writer(self.fs.as_ref(), &log_file_path(&self.path, log_number), log_number)?;
            writer.log = Some(log);
        }
        self.current_log_number.store(log_number, Ordering::Release);

        let mem = Arc::new(MemTable::new(self.new_memtable_id(), log_number));
        let old_id = {
            let mut state = cf.lock_state();
            let old = std::mem::replace(&mut state.mem, mem);
            let old_id = old.id();
            log::info!(
                "Switching memtable of {} ({} bytes, {} entries), new log {}",
                cf.name(),
                old.approximate_size(),
                old.len(),
                log_number
            );
            state.imm.add(old);
            cf.install_super_version(&state);
            old_id
        };
        if schedule {
            self.flush_pool.schedule(Job::Flush(cf.id()));
        }
        Ok(old_id)
    }

    // ------------------------------------------------------------------
    // Flush
    // ------------------------------------------------------------------

    fn output_options(&self, target_file_size: Option<u64>) -> OutputOptions<'_> {
        OutputOptions {
            fs: self.fs.as_ref(),
            dir: &self.path,
            block_size: self.options.block_size,
            compression: self.options.compression,
            target_file_size,
        }
    }

    /// Merges `mems` into one level-0 table, dropping what no snapshot sees.
    fn build_level0(
        &self,
        mems: &[Arc<MemTable>],
        snapshots: Vec<u64>,
        new_file_number: &mut dyn FnMut() -> u64,
    ) -> Result<Vec<FileMetaData>> {
        let sources: Vec<EntrySource> =
            mems.iter().map(|mem| Box::new(mem.iter().map(Ok::<Entry, Error>)) as EntrySource).collect();
        let mut retained = CompactionIterator::new(MergeIterator::new(sources), snapshots, false);
        let files = write_tables(&self.output_options(None), &mut retained, 0, new_file_number)?;
        let stats = retained.stats();
        log::info!(
            "Flushed {} memtables: {} entries, {} dropped, {} bytes written",
            mems.len(),
            stats.input,
            stats.dropped,
            files.iter().map(|f| f.file_size).sum::<u64>()
        );
        Ok(files)
    }

    /// Flushes every immutable memtable of `cf` not already being flushed.
    pub fn flush_column_family(&self, cf: &Arc<ColumnFamilyData>) -> Result<()> {
        let result = {
            let _flush = cf.flush_lock();
            self.check_bg_error()?;
            let picked = cf.lock_state().imm.pick_memtables_to_flush();
            if picked.is_empty() {
                return Ok(());
            }
            let result = self.install_flush(cf, &picked);
            if let Err(e) = &result {
                cf.lock_state().imm.rollback_flush(&picked);
                if !cf.is_dropped() {
                    log::error!("Flush of {} failed: {}", cf.name(), e);
                    self.set_bg_error(e.clone());
                }
            }
            result
        };
        self.notify_writers();
        result?;
        self.delete_obsolete_files();
        self.maybe_schedule_compaction();
        Ok(())
    }

    fn install_flush(&self, cf: &Arc<ColumnFamilyData>, picked: &[Arc<MemTable>]) -> Result<()> {
        let files = {
            let mut new_file_number = || self.versions.lock().new_file_number();
            self.build_level0(picked, self.snapshots.sequences(), &mut new_file_number)?
        };

        let mut edit = VersionEdit::new(cf.id());
        for meta in &files {
            edit.add_file(meta.clone());
        }
        // Logs older than every memtable left unflushed are no longer needed
        let log_number = {
            let state = cf.lock_state();
            let imm = state.imm.current();
            imm.memtables()
                .iter()
                .filter(|m| !picked.iter().any(|p| p.id() == m.id()))
                .map(|m| m.log_number())
                .chain(std::iter::once(state.mem.log_number()))
                .min()
                .unwrap_or_else(|| state.mem.log_number())
        };
        edit.set_log_number(log_number);
        edit.set_last_sequence(self.last_sequence.load(Ordering::Acquire));

        let mut versions = self.versions.lock();
        if let Err(e) = versions.log_and_apply(cf, edit) {
            for meta in &files {
                let _ = self.fs.remove_file(&table_file_path(&self.path, meta.number));
            }
            return Err(e);
        }
        let mut state = cf.lock_state();
        state.imm.remove_flushed(picked);
        cf.install_super_version(&state);
        Ok(())
    }

    /// Switches the active memtable of `cf` if it holds data, then flushes
    /// and waits until every memtable up to it is on disk.
    pub fn flush(&self, cf_id: u32) -> Result<()> {
        self.check_writable()?;
        let cf = self.column_family(cf_id)?;
        let target = {
            let mut writer = self.writer.lock();
            self.check_bg_error()?;
            let state = cf.lock_state();
            if state.mem.is_empty() {
                state.imm.current().memtables().iter().map(|m| m.id()).max()
            } else {
                drop(state);
                Some(self.switch_memtable(&mut writer, &cf, false)?)
            }
        };
        let Some(target) = target else {
            return Ok(());
        };

        self.flush_column_family(&cf)?;

        // A background flush may still hold some of the older memtables
        let mut writer = self.writer.lock();
        loop {
            self.check_bg_error()?;
            if cf.is_dropped() {
                return Ok(());
            }
            let pending = cf.lock_state().imm.current().memtables().iter().any(|m| m.id() <= target);
            if !pending {
                return Ok(());
            }
            self.stall_cv.wait_for(&mut writer, WRITE_STALL_WAIT);
        }
    }

    // ------------------------------------------------------------------
    // Compaction
    // ------------------------------------------------------------------

    fn maybe_schedule_compaction(&self) {
        if self.read_only || self.options.disable_auto_compactions || self.shutting_down.load(Ordering::Acquire) {
            return;
        }
        let needed = self
            .cf_registry
            .read()
            .values()
            .any(|cf| self.picker.needs_compaction(&cf.current_version()));
        if needed && !self.compaction_scheduled.swap(true, Ordering::AcqRel) {
            self.compaction_pool.schedule(Job::Compaction);
        }
    }

    /// Runs automatic compactions until no column family needs one.
    fn background_compaction(&self) {
        self.compaction_scheduled.store(false, Ordering::Release);
        let cfs: Vec<Arc<ColumnFamilyData>> = self.cf_registry.read().values().cloned().collect();
        for cf in cfs {
            loop {
                if self.shutting_down.load(Ordering::Acquire)
                    || self.options.disable_auto_compactions
                    || self.check_bg_error().is_err()
                {
                    return;
                }
                let _guard = cf.compaction_lock();
                let version = cf.current_version();
                let Some(task) = self.picker.pick_compaction(&version) else {
                    break;
                };
                match self.run_compaction(&cf, &version, &task) {
                    Ok(()) => {}
                    Err(_) if cf.is_dropped() => break,
                    Err(e) => {
                        log::error!("Compaction of {} failed: {}", cf.name(), e);
                        self.set_bg_error(e);
                        return;
                    }
                }
            }
        }
        self.delete_obsolete_files();
    }

    /// Runs `task` and installs its result. The caller holds the column
    /// family's compaction lock.
    fn run_compaction(&self, cf: &Arc<ColumnFamilyData>, version: &Version, task: &CompactionTask) -> Result<()> {
        let inputs: Vec<_> = task.all_inputs().cloned().collect();
        let deepest_input = inputs.iter().map(|f| f.level).max().unwrap_or(task.output_level);
        let bottommost = match key_range(&inputs) {
            Some((smallest, largest)) => !version.overlaps_below(deepest_input.max(task.output_level), &smallest, &largest),
            None => true,
        };

        let job = CompactionJob {
            task,
            table_cache: &self.table_cache,
            output: self.output_options(Some(self.options.target_file_size)),
            snapshots: self.snapshots.sequences(),
            bottommost,
        };
        let mut new_file_number = || self.versions.lock().new_file_number();
        let result = job.run(&mut new_file_number)?;

        let input_numbers: HashSet<u64> = inputs.iter().map(|f| f.number).collect();
        let outputs: Vec<u64> =
            result.edit.new_files.iter().map(|f| f.number).filter(|n| !input_numbers.contains(n)).collect();
        let mut versions = self.versions.lock();
        if let Err(e) = versions.log_and_apply(cf, result.edit) {
            for number in outputs {
                let _ = self.fs.remove_file(&table_file_path(&self.path, number));
            }
            return Err(e);
        }
        let state = cf.lock_state();
        cf.install_super_version(&state);
        Ok(())
    }

    /// Compacts every file overlapping `[begin, end]` of `cf_id`.
    pub fn compact_range(
        &self,
        opts: &CompactRangeOptions,
        cf_id: u32,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        self.check_writable()?;
        let num_levels = self.options.max_levels;
        if opts.change_level && (opts.target_level == 0 || opts.target_level >= num_levels) {
            return Err(Error::invalid_argument(format!(
                "target level {} must be in 1..{}",
                opts.target_level, num_levels
            )));
        }
        let cf = self.column_family(cf_id)?;
        self.flush(cf_id)?;

        {
            let _guard = cf.compaction_lock();
            self.check_bg_error()?;
            let version = cf.current_version();
            let Some(task) = self.pick_range(&version, begin, end, opts) else {
                log::debug!("Nothing to compact in {}", cf.name());
                return Ok(());
            };
            if let Err(e) = self.run_compaction(&cf, &version, &task) {
                log::error!("Manual compaction of {} failed: {}", cf.name(), e);
                self.set_bg_error(e.clone());
                return Err(e);
            }
        }
        self.delete_obsolete_files();
        self.maybe_schedule_compaction();
        Ok(())
    }

    /// Resolves a manual compaction over `[begin, end]`.
    ///
    /// Output goes to the deepest level holding overlapping data (at least
    /// level 1), or to `target_level` with `change_level`. When the target
    /// is shallower than the data, everything is merged and moved up.
    fn pick_range(
        &self,
        version: &Version,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
        opts: &CompactRangeOptions,
    ) -> Option<CompactionTask> {
        let deepest = (0..version.num_levels())
            .rev()
            .find(|&level| !version.overlapping_files(level, begin, end).is_empty())?;
        let output_level = if opts.change_level { opts.target_level } else { deepest.max(1) };
        let span = deepest.max(output_level);

        let mut task = self.picker.pick_range(version, begin, end, span)?;
        if span != output_level {
            let below = std::mem::take(&mut task.output_inputs);
            task.inputs.extend(below);
            task.output_level = output_level;
        }
        Some(task)
    }

    // ------------------------------------------------------------------
    // Obsolete files
    // ------------------------------------------------------------------

    /// Deletes tables no Version references any more and logs no column
    /// family needs.
    fn delete_obsolete_files(&self) {
        let Some(purge_rx) = &self.purge_rx else {
            return;
        };
        for number in purge_rx.try_iter() {
            self.table_cache.evict(number);
            match self.fs.remove_file(&table_file_path(&self.path, number)) {
                Ok(()) => log::info!("Deleted obsolete table {}", number),
                Err(e) => log::warn!("Failed to delete obsolete table {}: {}", number, e),
            }
        }

        let min_log = self.versions.lock().min_log_number_to_keep(self.current_log_number.load(Ordering::Acquire));
        let children = match self.fs.children(&self.path) {
            Ok(children) => children,
            Err(e) => {
                log::warn!("Failed to list {:?}: {}", self.path, e);
                return;
            }
        };
        for name in children {
            if let Some(FileType::Log(number)) = parse_file_name(&name) {
                if number < min_log {
                    match self.fs.remove_file(&log_file_path(&self.path, number)) {
                        Ok(()) => log::info!("Deleted obsolete log {}", number),
                        Err(e) => log::warn!("Failed to delete obsolete log {}: {}", number, e),
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    fn lookup_env(&self) -> LookupEnv<'_> {
        LookupEnv {
            table_cache: &self.table_cache,
            row_cache: self.row_cache.as_ref(),
            merge_operator: self.options.merge_operator.as_deref(),
            clock: self.options.clock.as_ref(),
        }
    }

    pub fn get(&self, opts: &ReadOptions, cf_id: u32, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.column_family(cf_id)?;
        let snapshot = opts.snapshot.as_ref().map(Snapshot::sequence);
        let (svs, sequence) = acquire_consistent(std::slice::from_ref(&cf), &self.last_sequence, snapshot);
        let result = lookup::get(&self.lookup_env(), &svs[0], key, sequence, opts);
        self.trace(|tracer| tracer.record_get(cf_id, key));
        result
    }

    /// Looks up `keys`, each paired with its column family id.
    ///
    /// Results are in input order. With `sorted_input` the keys of every
    /// column family are taken to be sorted already.
    pub fn multi_get(&self, opts: &ReadOptions, keys: &[(u32, &[u8])], sorted_input: bool) -> Vec<Result<Option<Vec<u8>>>> {
        let mut results: Vec<Option<Result<Option<Vec<u8>>>>> = vec![None; keys.len()];

        let mut by_cf: BTreeMap<u32, Vec<(usize, &[u8])>> = BTreeMap::new();
        for (slot, &(cf_id, key)) in keys.iter().enumerate() {
            by_cf.entry(cf_id).or_default().push((slot, key));
        }
        let mut cfs = Vec::with_capacity(by_cf.len());
        let mut grouped = Vec::with_capacity(by_cf.len());
        for (cf_id, mut cf_keys) in by_cf {
            match self.column_family(cf_id) {
                Ok(cf) => {
                    if !sorted_input {
                        cf_keys.sort_by(|a, b| a.1.cmp(b.1));
                    }
                    cfs.push(cf);
                    grouped.push(cf_keys);
                }
                Err(e) => {
                    for (slot, _) in cf_keys {
                        results[slot] = Some(Err(e.clone()));
                    }
                }
            }
        }

        let snapshot = opts.snapshot.as_ref().map(Snapshot::sequence);
        let (svs, sequence) = acquire_consistent(&cfs, &self.last_sequence, snapshot);
        let groups: Vec<MultiGetGroup<'_>> =
            svs.into_iter().zip(grouped).map(|(sv, keys)| MultiGetGroup { sv, sequence, keys }).collect();
        lookup::multi_get(&self.lookup_env(), opts, &groups, &mut results);
        drop(groups);

        self.trace(|tracer| tracer.record_multi_get(keys));
        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(Error::internal("key left unresolved"))))
            .collect()
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn get_snapshot(&self) -> Snapshot {
        self.snapshots.create(self.last_sequence.load(Ordering::Acquire), self.options.clock.unix_seconds())
    }

    pub fn release_snapshot(&self, snapshot: &Snapshot) {
        self.snapshots.release(snapshot);
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn get_property(&self, cf_id: u32, name: &str) -> Option<String> {
        let property = Property::parse(name)?;
        let cf = self.column_family(cf_id).ok()?;
        let value = match property {
            Property::NumSnapshots => self.snapshots.len() as u64,
            Property::OldestSnapshotTime => self.snapshots.oldest_time().unwrap_or(0),
            Property::OldestSnapshotSequence => self.snapshots.oldest_sequence().unwrap_or(0),
            Property::NumFilesAtLevel(level) => {
                let version = cf.current_version();
                if level >= version.num_levels() {
                    return None;
                }
                version.num_files_at_level(level) as u64
            }
            Property::NumImmutableMemTable => cf.lock_state().imm.len() as u64,
            Property::CurSizeActiveMemTable => cf.lock_state().mem.approximate_size() as u64,
            Property::CurrentSuperVersionNumber => cf.super_versions().current_number(),
        };
        Some(value.to_string())
    }

    pub fn num_files_at_level(&self, cf_id: u32, level: usize) -> Result<usize> {
        let version = self.column_family(cf_id)?.current_version();
        if level >= version.num_levels() {
            return Err(Error::invalid_argument(format!("level {} out of range", level)));
        }
        Ok(version.num_files_at_level(level))
    }

    /// Every stored entry with a user key in `[begin, end]`, in internal key
    /// order, at most `max` of them.
    pub fn get_all_key_versions(
        &self,
        cf_id: u32,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
        max: usize,
    ) -> Result<Vec<KeyVersion>> {
        let cf = self.column_family(cf_id)?;
        let sv = cf.super_versions().acquire();

        let mut sources: Vec<EntrySource> = Vec::new();
        sources.push(Box::new(sv.mem.iter().map(Ok::<Entry, Error>)));
        for mem in sv.imm.memtables() {
            sources.push(Box::new(mem.iter().map(Ok::<Entry, Error>)));
        }
        let read_opts = TableReadOptions { io: IoOptions::unbounded(), fill_cache: false, verify_checksums: true };
        for file in sv.current.all_files() {
            if !file.overlaps(begin, end) {
                continue;
            }
            let reader = self.table_cache.find_table(file.number, file.file_size, &read_opts.io)?;
            sources.push(Box::new(reader.iter(read_opts)));
        }

        let mut versions = Vec::new();
        for entry in MergeIterator::new(sources) {
            let (key, value) = entry?;
            if begin.is_some_and(|b| key.user_key() < b) {
                continue;
            }
            if end.is_some_and(|e| key.user_key() > e) {
                break;
            }
            if versions.len() >= max {
                break;
            }
            versions.push(KeyVersion {
                sequence: key.sequence(),
                value_type: key.value_type(),
                user_key: key.into_user_key(),
                value,
            });
        }
        Ok(versions)
    }

    /// Recomputes the checksum of every live table.
    pub fn verify_file_checksums(&self) -> Result<()> {
        let cfs: Vec<Arc<ColumnFamilyData>> = self.cf_registry.read().values().cloned().collect();
        let mut checked = 0;
        for cf in cfs {
            let version = cf.current_version();
            for file in version.all_files() {
                let (size, checksum) = file_checksum(self.fs.as_ref(), &table_file_path(&self.path, file.number))?;
                if size != file.file_size || checksum != file.checksum {
                    return Err(Error::corruption(format!(
                        "table {} of {}: size {} crc {:#x}, expected size {} crc {:#x}",
                        file.number,
                        cf.name(),
                        size,
                        checksum,
                        file.file_size,
                        file.checksum
                    )));
                }
                checked += 1;
            }
        }
        log::info!("Verified checksums of {} tables", checked);
        Ok(())
    }

    pub fn block_cache_stats(&self) -> Option<CacheStats> {
        self.table_cache.block_cache().map(|cache| cache.stats())
    }

    pub fn row_cache_stats(&self) -> Option<CacheStats> {
        self.row_cache.as_ref().map(|cache| cache.stats())
    }

    // ------------------------------------------------------------------
    // Tracing
    // ------------------------------------------------------------------

    pub fn start_trace(&self, path: &Path) -> Result<()> {
        let mut tracer = self.tracer.lock();
        if tracer.is_some() {
            return Err(Error::invalid_state("a trace is already running"));
        }
        *tracer = Some(Tracer::create(self.fs.as_ref(), path, Arc::clone(&self.options.clock), &self.db_id)?);
        self.tracing.store(true, Ordering::Release);
        Ok(())
    }

    pub fn end_trace(&self) -> Result<()> {
        let tracer = self.tracer.lock().take();
        self.tracing.store(false, Ordering::Release);
        match tracer {
            Some(tracer) => tracer.finish(),
            None => Err(Error::invalid_state("no trace is running")),
        }
    }

    fn trace(&self, record: impl FnOnce(&mut Tracer) -> Result<()>) {
        if !self.tracing.load(Ordering::Acquire) {
            return;
        }
        let mut guard = self.tracer.lock();
        if let Some(tracer) = guard.as_mut() {
            if let Err(e) = record(tracer) {
                log::warn!("Stopping trace after failed write: {}", e);
                *guard = None;
                self.tracing.store(false, Ordering::Release);
            }
        }
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Stops background work and syncs the WAL. Every call returns the
    /// result of the first one.
    pub fn close(&self) -> Result<()> {
        let mut stored = self.close_result.lock();
        if let Some(result) = stored.as_ref() {
            return result.clone();
        }

        if !self.read_only && !self.options.use_wal && self.check_bg_error().is_ok() {
            // Without a WAL the memtables are the only copy
            let ids: Vec<u32> = self.cf_registry.read().keys().copied().collect();
            for id in ids {
                if let Err(e) = self.flush(id) {
                    log::error!("Flush at close failed: {}", e);
                }
            }
        }

        self.shutting_down.store(true, Ordering::Release);
        self.stall_cv.notify_all();
        self.flush_pool.shutdown();
        self.compaction_pool.shutdown();

        if let Some(tracer) = self.tracer.lock().take() {
            if let Err(e) = tracer.finish() {
                log::warn!("Failed to finish trace: {}", e);
            }
        }

        let mut result = Ok(());
        if let Some(log) = self.writer.lock().log.as_mut() {
            result = log.sync();
        }
        if let Some(e) = self.bg_error.lock().clone() {
            result = Err(e);
        }
        if result.is_ok() {
            self.delete_obsolete_files();
        }

        if let Some(lock) = self.lock.lock().take() {
            if let Err(e) = self.fs.unlock_file(lock) {
                log::warn!("Failed to release {:?}: {}", lock_file_path(&self.path), e);
            }
        }

        match &result {
            Ok(()) => log::info!("Closed database {:?}", self.path),
            Err(e) => log::warn!("Closed database {:?} with error: {}", self.path, e),
        }
        *stored = Some(result.clone());
        result
    }

    /// Injects a background error; used by tests of the error path.
    #[cfg(test)]
    pub(crate) fn inject_bg_error(&self, error: Error) {
        self.set_bg_error(error);
    }
}

impl std::fmt::Debug for DbInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbInner")
            .field("path", &self.path)
            .field("read_only", &self.read_only)
            .field("last_sequence", &self.latest_sequence_number())
            .field("column_families", &self.cf_registry.read().len())
            .finish_non_exhaustive()
    }
}

fn run_job(db: &Weak<DbInner>, job: Job) {
    let Some(db) = db.upgrade() else {
        return;
    };
    match job {
        Job::Flush(cf_id) => {
            let cf = db.cf_registry.read().get(&cf_id).cloned();
            if let Some(cf) = cf {
                if let Err(e) = db.flush_column_family(&cf) {
                    log::debug!("Background flush of {} ended with: {}", cf.name(), e);
                }
            }
        }
        Job::Compaction => db.background_compaction(),
        Job::Shutdown => {}
    }
}

/// Validates the requested column family names against the recovered ones
/// and returns the names that must be created.
fn check_column_family_names(
    state: &ManifestState,
    cf_names: Option<&[String]>,
    read_only: bool,
    create_missing: bool,
) -> Result<Vec<String>> {
    let requested: Vec<&str> = match cf_names {
        Some(names) => names.iter().map(String::as_str).collect(),
        None => vec![DEFAULT_COLUMN_FAMILY_NAME],
    };
    let existing: HashSet<&str> = state.column_families.values().map(|cf| cf.name.as_str()).collect();

    let mut missing = Vec::new();
    for name in &requested {
        if existing.contains(name) || missing.iter().any(|m: &String| m == name) {
            continue;
        }
        if read_only || !create_missing {
            return Err(Error::invalid_argument(format!("column family {} does not exist", name)));
        }
        missing.push(name.to_string());
    }
    if !read_only {
        if let Some(unlisted) = existing.iter().find(|name| **name != DEFAULT_COLUMN_FAMILY_NAME && !requested.contains(name)) {
            return Err(Error::invalid_argument(format!("column family {} exists but was not opened", unlisted)));
        }
    }
    Ok(missing)
}

/// Removes tables no recovered Version references and temp files of
/// interrupted renames.
fn remove_leftovers(fs: &dyn FileSystem, dir: &Path, listing: &DirectoryListing, live_tables: &HashSet<u64>) {
    for &number in listing.tables.iter().filter(|n| !live_tables.contains(n)) {
        match fs.remove_file(&table_file_path(dir, number)) {
            Ok(()) => log::info!("Deleted orphan table {}", number),
            Err(e) => log::warn!("Failed to delete orphan table {}: {}", number, e),
        }
    }
    for &number in &listing.temps {
        let _ = fs.remove_file(&dir.join(temp_file_name(number)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::ColumnFamilyRecord;
    use tempfile::TempDir;

    fn state_with(names: &[&str]) -> ManifestState {
        let mut state = ManifestState::empty_database();
        for (i, name) in names.iter().enumerate() {
            let id = i as u32 + 1;
            state.column_families.insert(
                id,
                ColumnFamilyRecord { id, name: name.to_string(), log_number: 0, files: BTreeMap::new() },
            );
        }
        state
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_column_family_names_missing() {
        let state = state_with(&["logs"]);
        let requested = names(&["default", "logs", "metrics"]);

        let err = check_column_family_names(&state, Some(&requested), false, false).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let missing = check_column_family_names(&state, Some(&requested), false, true).unwrap();
        assert_eq!(missing, names(&["metrics"]));
    }

    #[test]
    fn test_column_family_names_unlisted() {
        let state = state_with(&["logs"]);
        assert!(check_column_family_names(&state, None, false, true).is_err());
        // Read-only opens may leave families out
        assert!(check_column_family_names(&state, None, true, false).unwrap().is_empty());
        assert!(check_column_family_names(&state, Some(&names(&["metrics"])), true, true).is_err());
    }

    #[test]
    fn test_background_error_blocks_writes() {
        let dir = TempDir::new().unwrap();
        let db = DbInner::open(dir.path(), Options::default(), None, false).unwrap();
        let mut batch = WriteBatch::new();
        batch.put(b"k", b"v");
        db.write(&WriteOptions::default(), &batch).unwrap();

        db.inject_bg_error(Error::corruption("injected"));
        assert!(db.write(&WriteOptions::default(), &batch).unwrap_err().is_corruption());
        // Reads keep working
        assert_eq!(db.get(&ReadOptions::default(), 0, b"k").unwrap(), Some(b"v".to_vec()));

        let first = db.close().unwrap_err();
        assert!(first.is_corruption());
        assert_eq!(db.close().unwrap_err().to_string(), first.to_string());

        // A failed close still releases the directory
        let reopened = DbInner::open(dir.path(), Options::default(), None, false).unwrap();
        assert_eq!(reopened.get(&ReadOptions::default(), 0, b"k").unwrap(), Some(b"v".to_vec()));
        reopened.close().unwrap();
    }

    #[test]
    fn test_write_assigns_contiguous_sequences() {
        let dir = TempDir::new().unwrap();
        let db = DbInner::open(dir.path(), Options::default(), None, false).unwrap();
        let mut batch = WriteBatch::new();
        batch.put(b"a", b"1");
        batch.put(b"b", b"2");
        batch.delete(b"a");
        db.write(&WriteOptions::default(), &batch).unwrap();
        assert_eq!(db.latest_sequence_number(), 3);

        let versions = db.get_all_key_versions(0, None, None, usize::MAX).unwrap();
        let seqs: Vec<(Vec<u8>, u64)> = versions.iter().map(|v| (v.user_key.clone(), v.sequence)).collect();
        assert_eq!(seqs, vec![(b"a".to_vec(), 3), (b"a".to_vec(), 1), (b"b".to_vec(), 2)]);
        assert_eq!(versions[0].value_type, ValueType::Deletion);
        db.close().unwrap();
    }
}
