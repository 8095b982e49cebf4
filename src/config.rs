//! Configuration options for the VersaDB storage engine.

use crate::env::{default_clock, default_file_system, Clock, FileSystem};
use crate::merge_operator::MergeOperator;
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How much damage recovery is allowed to tolerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecoveryMode {
    /// Any manifest or log corruption fails `open`.
    #[default]
    Strict,
    /// Recover to the latest state whose files are all present and intact.
    BestEfforts,
}

/// Configuration options for opening a database.
#[derive(Clone)]
pub struct Options {
    /// Create the database if it doesn't exist.
    /// Default: true
    pub create_if_missing: bool,

    /// Error if the database already exists.
    /// Default: false
    pub error_if_exists: bool,

    /// Create column families named in `open_cf` that do not exist yet.
    /// Default: false
    pub create_missing_column_families: bool,

    /// Recovery mode used by `open`.
    /// Default: RecoveryMode::Strict
    pub recovery_mode: RecoveryMode,

    /// Size threshold for switching the active MemTable (in bytes).
    /// Default: 4MB
    pub memtable_size: usize,

    /// Maximum number of memtables (active + immutable) per column family
    /// before writers stall.
    /// Default: 2
    pub max_write_buffer_number: usize,

    /// Maximum number of Level 0 files before triggering compaction.
    /// Default: 4
    pub level0_compaction_threshold: usize,

    /// Size multiplier between levels.
    /// Default: 10 (Level N+1 is 10x larger than Level N)
    pub level_size_multiplier: usize,

    /// Base level size (Level 1 target size in bytes).
    /// Default: 10MB
    pub base_level_size: usize,

    /// Maximum number of levels.
    /// Default: 7 (Level 0 through Level 6)
    pub max_levels: usize,

    /// Compaction output files are cut once they reach this size.
    /// Default: 2MB
    pub target_file_size: u64,

    /// Disable automatic compactions. Manual compaction still works.
    /// Default: false
    pub disable_auto_compactions: bool,

    /// Block size for SSTables (in bytes).
    /// Default: 4KB
    pub block_size: usize,

    /// Block cache size (in bytes).
    /// Set to 0 to disable caching.
    /// Default: 8MB
    pub block_cache_size: usize,

    /// Row cache size (in bytes).
    /// Set to 0 to disable the row cache.
    /// Default: 0
    pub row_cache_size: usize,

    /// Compression algorithm for SSTables.
    /// Default: CompressionType::Snappy
    pub compression: CompressionType,

    /// Enable write-ahead log (WAL).
    /// Disabling reduces durability but increases performance.
    /// Default: true
    pub use_wal: bool,

    /// Sync WAL writes to disk.
    /// Default: false
    pub sync_wal: bool,

    /// Number of background flush threads (high priority).
    /// Default: 1
    pub flush_threads: usize,

    /// Number of background compaction threads (low priority).
    /// Default: 1
    pub compaction_threads: usize,

    /// Manifest size that triggers a roll-over to a new manifest file.
    /// Default: 1GB
    pub max_manifest_file_size: u64,

    /// Record the database id in the manifest as well as in IDENTITY.
    /// Default: false
    pub write_dbid_to_manifest: bool,

    /// Operator used to fold merge operands.
    /// Default: None
    pub merge_operator: Option<Arc<dyn MergeOperator>>,

    /// File system used for all I/O.
    /// Default: the local file system
    pub file_system: Arc<dyn FileSystem>,

    /// Clock used for deadlines and snapshot times.
    /// Default: the system clock
    pub clock: Arc<dyn Clock>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            create_missing_column_families: false,
            recovery_mode: RecoveryMode::Strict,
            memtable_size: 4 * 1024 * 1024, // 4MB
            max_write_buffer_number: 2,
            level0_compaction_threshold: 4,
            level_size_multiplier: 10,
            base_level_size: 10 * 1024 * 1024, // 10MB
            max_levels: 7,
            target_file_size: 2 * 1024 * 1024, // 2MB
            disable_auto_compactions: false,
            block_size: 4 * 1024,              // 4KB
            block_cache_size: 8 * 1024 * 1024, // 8MB
            row_cache_size: 0,
            compression: CompressionType::default(),
            use_wal: true,
            sync_wal: false,
            flush_threads: 1,
            compaction_threads: 1,
            max_manifest_file_size: 1024 * 1024 * 1024,
            write_dbid_to_manifest: false,
            merge_operator: None,
            file_system: default_file_system(),
            clock: default_clock(),
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("create_if_missing", &self.create_if_missing)
            .field("error_if_exists", &self.error_if_exists)
            .field("recovery_mode", &self.recovery_mode)
            .field("memtable_size", &self.memtable_size)
            .field("max_write_buffer_number", &self.max_write_buffer_number)
            .field("max_levels", &self.max_levels)
            .field("block_size", &self.block_size)
            .field("block_cache_size", &self.block_cache_size)
            .field("row_cache_size", &self.row_cache_size)
            .field("compression", &self.compression)
            .field("use_wal", &self.use_wal)
            .field("merge_operator", &self.merge_operator.as_ref().map(|op| op.name()))
            .field("file_system", &self.file_system)
            .finish_non_exhaustive()
    }
}

/// Compression algorithms supported by VersaDB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompressionType {
    /// No compression.
    None = 0,

    /// Snappy compression (fast, moderate compression ratio).
    #[cfg(feature = "snappy")]
    Snappy = 1,
}

impl CompressionType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionType::None),
            #[cfg(feature = "snappy")]
            1 => Some(CompressionType::Snappy),
            _ => None,
        }
    }
}

impl Default for CompressionType {
    fn default() -> Self {
        #[cfg(feature = "snappy")]
        return CompressionType::Snappy;

        #[cfg(not(feature = "snappy"))]
        CompressionType::None
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if it doesn't exist.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether opening an existing database is an error.
    pub fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets whether missing column families are created by `open_cf`.
    pub fn create_missing_column_families(mut self, value: bool) -> Self {
        self.create_missing_column_families = value;
        self
    }

    /// Sets the recovery mode.
    pub fn recovery_mode(mut self, mode: RecoveryMode) -> Self {
        self.recovery_mode = mode;
        self
    }

    /// Sets the MemTable size threshold.
    pub fn memtable_size(mut self, size: usize) -> Self {
        self.memtable_size = size;
        self
    }

    /// Sets the maximum number of memtables per column family.
    pub fn max_write_buffer_number(mut self, count: usize) -> Self {
        self.max_write_buffer_number = count;
        self
    }

    /// Sets the Level 0 file count that triggers compaction.
    pub fn level0_compaction_threshold(mut self, count: usize) -> Self {
        self.level0_compaction_threshold = count;
        self
    }

    /// Sets the number of levels.
    pub fn max_levels(mut self, levels: usize) -> Self {
        self.max_levels = levels;
        self
    }

    /// Sets the compaction output file size.
    pub fn target_file_size(mut self, size: u64) -> Self {
        self.target_file_size = size;
        self
    }

    /// Enables or disables automatic compactions.
    pub fn disable_auto_compactions(mut self, value: bool) -> Self {
        self.disable_auto_compactions = value;
        self
    }

    /// Sets the block size for SSTables.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the block cache size.
    pub fn block_cache_size(mut self, size: usize) -> Self {
        self.block_cache_size = size;
        self
    }

    /// Sets the row cache size.
    pub fn row_cache_size(mut self, size: usize) -> Self {
        self.row_cache_size = size;
        self
    }

    /// Sets the compression algorithm.
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Enables or disables the write-ahead log.
    pub fn use_wal(mut self, value: bool) -> Self {
        self.use_wal = value;
        self
    }

    /// Sets whether every WAL write is synced.
    pub fn sync_wal(mut self, value: bool) -> Self {
        self.sync_wal = value;
        self
    }

    /// Sets the manifest roll-over size.
    pub fn max_manifest_file_size(mut self, size: u64) -> Self {
        self.max_manifest_file_size = size;
        self
    }

    /// Sets whether the database id is mirrored into the manifest.
    pub fn write_dbid_to_manifest(mut self, value: bool) -> Self {
        self.write_dbid_to_manifest = value;
        self
    }

    /// Sets the merge operator.
    pub fn merge_operator(mut self, op: Arc<dyn MergeOperator>) -> Self {
        self.merge_operator = Some(op);
        self
    }

    /// Sets the file system.
    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.file_system = fs;
        self
    }

    /// Sets the clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.memtable_size == 0 {
            return Err(crate::Error::invalid_argument("memtable_size must be > 0"));
        }
        if self.block_size == 0 {
            return Err(crate::Error::invalid_argument("block_size must be > 0"));
        }
        if self.max_levels < 2 {
            return Err(crate::Error::invalid_argument("max_levels must be >= 2"));
        }
        if self.max_write_buffer_number < 2 {
            return Err(crate::Error::invalid_argument("max_write_buffer_number must be >= 2"));
        }
        if self.target_file_size == 0 {
            return Err(crate::Error::invalid_argument("target_file_size must be > 0"));
        }
        if self.level0_compaction_threshold == 0 {
            return Err(crate::Error::invalid_argument("level0_compaction_threshold must be > 0"));
        }
        if self.level_size_multiplier < 2 {
            return Err(crate::Error::invalid_argument("level_size_multiplier must be >= 2"));
        }
        if self.flush_threads == 0 || self.compaction_threads == 0 {
            return Err(crate::Error::invalid_argument("background thread counts must be > 0"));
        }
        Ok(())
    }

    /// Target size of a level in bytes; Level 0 is governed by file count.
    pub fn target_size_for_level(&self, level: usize) -> u64 {
        if level == 0 {
            return u64::MAX;
        }
        let mut size = self.base_level_size as u64;
        for _ in 1..level {
            size = size.saturating_mul(self.level_size_multiplier as u64);
        }
        size
    }
}

/// The serializable subset of [`Options`] written to the OPTIONS file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedOptions {
    /// Recovery mode in effect.
    pub recovery_mode: RecoveryMode,
    /// MemTable size threshold.
    pub memtable_size: usize,
    /// Maximum memtables per column family.
    pub max_write_buffer_number: usize,
    /// Level 0 compaction trigger.
    pub level0_compaction_threshold: usize,
    /// Level size multiplier.
    pub level_size_multiplier: usize,
    /// Level 1 target size.
    pub base_level_size: usize,
    /// Number of levels.
    pub max_levels: usize,
    /// SSTable block size.
    pub block_size: usize,
    /// Block cache capacity.
    pub block_cache_size: usize,
    /// Row cache capacity.
    pub row_cache_size: usize,
    /// Block compression.
    pub compression: CompressionType,
    /// WAL enabled.
    pub use_wal: bool,
    /// Manifest roll-over size.
    pub max_manifest_file_size: u64,
    /// Database id mirrored in the manifest.
    pub write_dbid_to_manifest: bool,
    /// Name of the merge operator, if any.
    pub merge_operator: Option<String>,
    /// Column family names at open time.
    pub column_families: Vec<String>,
}

impl PersistedOptions {
    /// Captures the persisted subset of `options`.
    pub fn from_options(options: &Options, column_families: Vec<String>) -> Self {
        Self {
            recovery_mode: options.recovery_mode,
            memtable_size: options.memtable_size,
            max_write_buffer_number: options.max_write_buffer_number,
            level0_compaction_threshold: options.level0_compaction_threshold,
            level_size_multiplier: options.level_size_multiplier,
            base_level_size: options.base_level_size,
            max_levels: options.max_levels,
            block_size: options.block_size,
            block_cache_size: options.block_cache_size,
            row_cache_size: options.row_cache_size,
            compression: options.compression,
            use_wal: options.use_wal,
            max_manifest_file_size: options.max_manifest_file_size,
            write_dbid_to_manifest: options.write_dbid_to_manifest,
            merge_operator: options.merge_operator.as_ref().map(|op| op.name().to_string()),
            column_families,
        }
    }
}

/// Options for a single read.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Read as of this snapshot instead of the latest state.
    pub snapshot: Option<Snapshot>,

    /// Absolute deadline in the database clock's time base.
    pub deadline: Option<Duration>,

    /// Upper bound for any single file read.
    pub io_timeout: Option<Duration>,

    /// MultiGet aborts the remaining keys once the returned values exceed
    /// this many bytes.
    pub value_size_soft_limit: u64,

    /// Insert blocks read by this call into the block cache.
    pub fill_cache: bool,

    /// Verify block checksums.
    pub verify_checksums: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            snapshot: None,
            deadline: None,
            io_timeout: None,
            value_size_soft_limit: u64::MAX,
            fill_cache: true,
            verify_checksums: true,
        }
    }
}

impl ReadOptions {
    /// Creates read options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads as of the given snapshot.
    pub fn snapshot(mut self, snapshot: &Snapshot) -> Self {
        self.snapshot = Some(snapshot.clone());
        self
    }

    /// Sets an absolute deadline.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the per-read timeout.
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    /// Sets the MultiGet value size soft limit.
    pub fn value_size_soft_limit(mut self, limit: u64) -> Self {
        self.value_size_soft_limit = limit;
        self
    }

    /// Sets whether blocks are added to the cache.
    pub fn fill_cache(mut self, value: bool) -> Self {
        self.fill_cache = value;
        self
    }
}

/// Options for a single write.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Sync the WAL before acknowledging the write.
    pub sync: bool,

    /// Skip the WAL for this write.
    pub disable_wal: bool,
}

/// Options for manual compaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactRangeOptions {
    /// Place the output on `target_level` instead of the deepest level that
    /// currently holds overlapping data.
    pub change_level: bool,

    /// Output level used when `change_level` is set.
    pub target_level: usize,
}
