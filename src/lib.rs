//! # VersaDB - A Versioned LSM-Tree Storage Engine
//!
//! VersaDB is a persistent, embeddable key-value store built on a
//! Log-Structured Merge-Tree. Every write gets a sequence number, and reads
//! observe a consistent point in time: either the latest published state or
//! an explicit [`Snapshot`].
//!
//! ## Architecture
//!
//! The storage engine consists of several key components:
//!
//! - **WAL (Write-Ahead Log)**: Ensures durability by logging all writes
//! - **MemTable**: In-memory sorted structure for recent writes
//! - **SSTable**: Immutable sorted files on disk, organized in levels
//! - **Manifest**: Log of version edits describing the live files
//! - **SuperVersion**: Reference-counted read view (memtables + files)
//! - **Compaction**: Background merging that drops versions no snapshot sees
//! - **Block and row caches**: Keep hot blocks and lookup results in memory
//!
//! Keys live in column families, each with its own memtables and levels
//! but sharing one WAL and one sequence number space.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use versadb::{DB, Options, ReadOptions, WriteBatch};
//!
//! # fn main() -> Result<(), versadb::Error> {
//! // Open or create a database
//! let db = DB::open("./data", Options::default())?;
//!
//! // Write operations
//! db.put(b"key1", b"value1")?;
//! let mut batch = WriteBatch::new();
//! batch.put(b"key2", b"value2");
//! batch.delete(b"key1");
//! db.write(&batch)?;
//!
//! // Read operations
//! if let Some(value) = db.get(b"key2")? {
//!     println!("Found: {:?}", value);
//! }
//! let values = db.multi_get(&ReadOptions::default(), &[b"key1".as_slice(), b"key2".as_slice()]);
//! assert_eq!(values.len(), 2);
//!
//! db.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod background;
pub mod cache;
pub mod column_family;
pub mod compaction;
pub mod config;
mod db_impl;
pub mod env;
pub mod error;
pub mod filename;
pub mod lookup;
pub mod memtable;
pub mod merge_operator;
pub mod properties;
mod recovery;
pub mod snapshot;
pub mod sstable;
pub mod trace;
pub mod version;
pub mod wal;
pub mod write_batch;

// Re-exports
pub use cache::CacheStats;
pub use column_family::{ColumnFamilyHandle, DEFAULT_COLUMN_FAMILY_NAME};
pub use config::{CompactRangeOptions, CompressionType, Options, ReadOptions, RecoveryMode, WriteOptions};
pub use db_impl::KeyVersion;
pub use env::{Clock, FileSystem};
pub use error::{Error, Result};
pub use memtable::ValueType;
pub use merge_operator::{MergeOperator, StringAppendOperator, UInt64AddOperator};
pub use snapshot::Snapshot;
pub use trace::{Replayer, TraceExecutionResult, TraceOutcome, TraceRecord};
pub use write_batch::WriteBatch;

use column_family::DEFAULT_COLUMN_FAMILY_ID;
use db_impl::DbInner;
use std::path::Path;
use std::sync::Arc;

/// The main database handle.
///
/// This is the primary interface for interacting with the storage engine.
/// Every operation has a form for the default column family and a `_cf`
/// form taking a [`ColumnFamilyHandle`].
///
/// # Thread Safety
///
/// `DB` is designed to be thread-safe and can be safely shared across threads
/// using `Arc<DB>`. Writes are serialized; reads never wait on writers.
///
/// Dropping the handle closes the database.
pub struct DB {
    inner: Arc<DbInner>,
}

impl DB {
    /// Opens a database at the specified path with the given options.
    ///
    /// Only the default column family is opened; use [`DB::open_cf`] for a
    /// database that has others.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored
    /// * `options` - Configuration options for the database
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The database does not exist and `create_if_missing` is false
    /// - It exists and `error_if_exists` is true
    /// - Recovery finds corrupted data (see [`RecoveryMode`])
    /// - The path is invalid or inaccessible
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use versadb::{DB, Options};
    ///
    /// # fn main() -> Result<(), versadb::Error> {
    /// let options = Options::default();
    /// let db = DB::open("./my_database", options)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        let inner = DbInner::open(path.as_ref(), options, None, false)?;
        Ok(Self { inner })
    }

    /// Opens a database with the named column families.
    ///
    /// Every existing column family must be listed. Listed ones that do not
    /// exist are created if `create_missing_column_families` is set.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use versadb::{DB, Options};
    ///
    /// # fn main() -> Result<(), versadb::Error> {
    /// let options = Options::default().create_missing_column_families(true);
    /// let db = DB::open_cf("./my_database", options, &["default", "users"])?;
    /// let users = db.cf_handle("users").unwrap();
    /// db.put_cf(&users, b"alice", b"1")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open_cf<P, N>(path: P, options: Options, names: &[N]) -> Result<Self>
    where
        P: AsRef<Path>,
        N: AsRef<str>,
    {
        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        let inner = DbInner::open(path.as_ref(), options, Some(&names), false)?;
        Ok(Self { inner })
    }

    /// Opens an existing database for reads only.
    ///
    /// Recovery replays the WAL into memory but writes nothing: no flush,
    /// no new manifest, no file deletion. Every column family is available.
    pub fn open_for_read_only<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        let inner = DbInner::open(path.as_ref(), options, None, true)?;
        Ok(Self { inner })
    }

    fn default_cf(&self) -> u32 {
        DEFAULT_COLUMN_FAMILY_ID
    }

    /// Inserts a key-value pair into the database.
    ///
    /// If the key already exists, its value will be updated.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use versadb::{DB, Options};
    /// # fn main() -> Result<(), versadb::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// db.put(b"user:1001", b"Alice")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(&batch)
    }

    /// Inserts a key-value pair into a column family.
    pub fn put_cf(&self, cf: &ColumnFamilyHandle, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put_cf(cf.id(), key, value);
        self.write(&batch)
    }

    /// Deletes a key from the database.
    ///
    /// Deleting a missing key is not an error.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(&batch)
    }

    /// Deletes a key from a column family.
    pub fn delete_cf(&self, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete_cf(cf.id(), key);
        self.write(&batch)
    }

    /// Removes the single most recent put of `key`.
    ///
    /// Only meaningful for keys written at most once since their last
    /// deletion; mixing it with overwrites or merges is undefined.
    pub fn single_delete(&self, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.single_delete(key);
        self.write(&batch)
    }

    /// `single_delete` in a column family.
    pub fn single_delete_cf(&self, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.single_delete_cf(cf.id(), key);
        self.write(&batch)
    }

    /// Appends a merge operand for `key`.
    ///
    /// # Errors
    ///
    /// Reads of the key fail with `InvalidArgument` unless
    /// [`Options::merge_operator`] is set.
    pub fn merge(&self, key: &[u8], operand: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.merge(key, operand);
        self.write(&batch)
    }

    /// Appends a merge operand in a column family.
    pub fn merge_cf(&self, cf: &ColumnFamilyHandle, key: &[u8], operand: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.merge_cf(cf.id(), key, operand);
        self.write(&batch)
    }

    /// Applies a batch atomically with default write options.
    pub fn write(&self, batch: &WriteBatch) -> Result<()> {
        self.inner.write(&WriteOptions::default(), batch)
    }

    /// Applies a batch atomically.
    ///
    /// Readers see either none or all of the batch.
    ///
    /// # Errors
    ///
    /// - `NotSupported` on a read-only database
    /// - `InvalidState` after [`DB::close`]
    /// - The background error, once a flush, compaction or WAL write failed
    pub fn write_opt(&self, opts: &WriteOptions, batch: &WriteBatch) -> Result<()> {
        self.inner.write(opts, batch)
    }

    /// Retrieves the value for a key from the database.
    ///
    /// Returns `None` if the key does not exist or has been deleted.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use versadb::{DB, Options};
    /// # fn main() -> Result<(), versadb::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// if let Some(value) = db.get(b"user:1001")? {
    ///     println!("User: {}", String::from_utf8_lossy(&value));
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(&ReadOptions::default(), self.default_cf(), key)
    }

    /// Retrieves the value for a key from a column family.
    pub fn get_cf(&self, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(&ReadOptions::default(), cf.id(), key)
    }

    /// Retrieves a value with explicit read options.
    ///
    /// `cf` defaults to the default column family.
    ///
    /// # Errors
    ///
    /// - `TimedOut` once `opts.deadline` has passed
    /// - `Corruption` or I/O errors from table reads
    /// - `InvalidArgument` for merge operands without a merge operator
    pub fn get_opt(&self, opts: &ReadOptions, cf: Option<&ColumnFamilyHandle>, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf_id = cf.map_or(self.default_cf(), ColumnFamilyHandle::id);
        self.inner.get(opts, cf_id, key)
    }

    /// Get by column family id, for trace replay.
    pub(crate) fn get_by_id(&self, opts: &ReadOptions, cf_id: u32, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(opts, cf_id, key)
    }

    /// Looks up several keys of the default column family at once.
    ///
    /// All keys are read from one consistent view, and the result has one
    /// entry per key in input order. A failure affects only the keys it
    /// reaches: a deadline expiring mid-way fails the keys not yet
    /// resolved with `TimedOut`.
    pub fn multi_get(&self, opts: &ReadOptions, keys: &[&[u8]]) -> Vec<Result<Option<Vec<u8>>>> {
        let pairs: Vec<(u32, &[u8])> = keys.iter().map(|k| (self.default_cf(), *k)).collect();
        self.inner.multi_get(opts, &pairs, false)
    }

    /// Looks up keys across column families from one consistent view.
    pub fn multi_get_cf(&self, opts: &ReadOptions, keys: &[(&ColumnFamilyHandle, &[u8])]) -> Vec<Result<Option<Vec<u8>>>> {
        let pairs: Vec<(u32, &[u8])> = keys.iter().map(|(cf, k)| (cf.id(), *k)).collect();
        self.inner.multi_get(opts, &pairs, false)
    }

    /// Looks up keys of one column family.
    ///
    /// With `sorted_input` the keys must already be in ascending order and
    /// are not sorted again.
    pub fn batched_multi_get_cf(
        &self,
        opts: &ReadOptions,
        cf: &ColumnFamilyHandle,
        keys: &[&[u8]],
        sorted_input: bool,
    ) -> Vec<Result<Option<Vec<u8>>>> {
        let pairs: Vec<(u32, &[u8])> = keys.iter().map(|k| (cf.id(), *k)).collect();
        self.inner.multi_get(opts, &pairs, sorted_input)
    }

    /// MultiGet by column family id, for trace replay.
    pub(crate) fn multi_get_by_id(&self, opts: &ReadOptions, keys: &[(u32, &[u8])]) -> Vec<Result<Option<Vec<u8>>>> {
        self.inner.multi_get(opts, keys, false)
    }

    /// Takes a snapshot of the latest published state.
    ///
    /// Flush and compaction keep every version the snapshot can see until
    /// it is released.
    pub fn get_snapshot(&self) -> Snapshot {
        self.inner.get_snapshot()
    }

    /// Releases a snapshot. Releasing twice is a no-op.
    pub fn release_snapshot(&self, snapshot: &Snapshot) {
        self.inner.release_snapshot(snapshot)
    }

    /// Handle of the column family called `name`.
    pub fn cf_handle(&self, name: &str) -> Option<ColumnFamilyHandle> {
        self.inner.cf_handle(name)
    }

    /// Handles of every open column family, by id.
    pub fn column_families(&self) -> Vec<ColumnFamilyHandle> {
        self.inner.column_family_handles()
    }

    /// Creates a column family.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the name is taken.
    pub fn create_column_family(&self, name: &str) -> Result<ColumnFamilyHandle> {
        self.inner.create_column_family(name)
    }

    /// Drops a column family. Its files are deleted once no read uses them.
    ///
    /// The default column family cannot be dropped.
    pub fn drop_column_family(&self, cf: &ColumnFamilyHandle) -> Result<()> {
        self.inner.drop_column_family(cf)
    }

    /// Flushes the default column family's memtables to level 0.
    ///
    /// Blocks until the flush is installed.
    pub fn flush(&self) -> Result<()> {
        self.inner.flush(self.default_cf())
    }

    /// Flushes a column family's memtables to level 0.
    pub fn flush_cf(&self, cf: &ColumnFamilyHandle) -> Result<()> {
        self.inner.flush(cf.id())
    }

    /// Compacts the default column family over `[begin, end]`.
    ///
    /// `None` bounds are open. The memtables are flushed first.
    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        self.inner.compact_range(&CompactRangeOptions::default(), self.default_cf(), begin, end)
    }

    /// Compacts a column family over `[begin, end]`.
    ///
    /// With `change_level` the result is placed on `target_level`, which
    /// must be in `1..max_levels`.
    pub fn compact_range_opt(
        &self,
        opts: &CompactRangeOptions,
        cf: Option<&ColumnFamilyHandle>,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        let cf_id = cf.map_or(self.default_cf(), ColumnFamilyHandle::id);
        self.inner.compact_range(opts, cf_id, begin, end)
    }

    /// Value of a `versadb.*` property for the default column family.
    ///
    /// See [`properties`] for the names. Unknown names yield `None`.
    pub fn get_property(&self, name: &str) -> Option<String> {
        self.inner.get_property(self.default_cf(), name)
    }

    /// Value of a property for a column family.
    pub fn get_property_cf(&self, cf: &ColumnFamilyHandle, name: &str) -> Option<String> {
        self.inner.get_property(cf.id(), name)
    }

    /// Number of table files on `level` of a column family.
    pub fn num_files_at_level(&self, cf: Option<&ColumnFamilyHandle>, level: usize) -> Result<usize> {
        let cf_id = cf.map_or(self.default_cf(), ColumnFamilyHandle::id);
        self.inner.num_files_at_level(cf_id, level)
    }

    /// Sequence number of the last published write.
    pub fn latest_sequence_number(&self) -> u64 {
        self.inner.latest_sequence_number()
    }

    /// Every stored version of the keys in `[begin, end]`, including
    /// tombstones and merge operands, up to `max` entries.
    pub fn get_all_key_versions(
        &self,
        cf: Option<&ColumnFamilyHandle>,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
        max: usize,
    ) -> Result<Vec<KeyVersion>> {
        let cf_id = cf.map_or(self.default_cf(), ColumnFamilyHandle::id);
        self.inner.get_all_key_versions(cf_id, begin, end, max)
    }

    /// Recomputes the whole-file checksum of every live table.
    ///
    /// # Errors
    ///
    /// `Corruption` naming the first table whose size or checksum differs
    /// from the manifest.
    pub fn verify_file_checksums(&self) -> Result<()> {
        self.inner.verify_file_checksums()
    }

    /// The database id, stable across opens.
    pub fn get_db_identity(&self) -> &str {
        self.inner.db_id()
    }

    /// Id of this open, 20 characters of `[0-9A-Z]`.
    pub fn get_db_session_id(&self) -> &str {
        self.inner.session_id()
    }

    /// Block cache statistics, if a block cache is configured.
    pub fn block_cache_stats(&self) -> Option<CacheStats> {
        self.inner.block_cache_stats()
    }

    /// Row cache statistics, if a row cache is configured.
    pub fn row_cache_stats(&self) -> Option<CacheStats> {
        self.inner.row_cache_stats()
    }

    /// Starts recording writes and lookups to a trace file at `path`.
    ///
    /// # Errors
    ///
    /// `InvalidState` if a trace is already running.
    pub fn start_trace<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.inner.start_trace(path.as_ref())
    }

    /// Stops the running trace and syncs it.
    pub fn end_trace(&self) -> Result<()> {
        self.inner.end_trace()
    }

    /// The database directory.
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// The options the database was opened with.
    pub fn options(&self) -> &Options {
        self.inner.options()
    }

    /// The file system the database runs on.
    pub fn file_system(&self) -> Arc<dyn FileSystem> {
        Arc::clone(self.inner.file_system())
    }

    /// The clock used for deadlines and timestamps.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.options().clock)
    }

    /// Closes the database.
    ///
    /// Waits for background work, syncs the WAL and, when the WAL is
    /// disabled, flushes the memtables. Operations afterwards fail with
    /// `InvalidState`. Closing again returns the same result.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if let Err(e) = self.inner.close() {
            log::warn!("Error closing database on drop: {}", e);
        }
    }
}

impl std::fmt::Debug for DB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DB").field(&self.inner).finish()
    }
}
