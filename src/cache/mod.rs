//! Caches for table data blocks and for per-file row lookups.
//!
//! Both are byte-bounded LRU caches:
//! - the block cache maps (file number, block offset) to an uncompressed
//!   data block;
//! - the row cache maps (file number, user key) to the entries that file
//!   holds for the key, replayed into a lookup without touching the file.

mod lru;

pub use lru::{CacheStats, LruCache};

use crate::memtable::ValueType;
use bytes::Bytes;
use std::sync::Arc;

/// A unique identifier for a cached block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Table file number
    pub file_id: u64,
    /// Block offset in the file
    pub offset: u64,
}

impl CacheKey {
    /// Create a new cache key
    pub fn new(file_id: u64, offset: u64) -> Self {
        Self { file_id, offset }
    }
}

/// Cache of uncompressed data blocks.
pub type BlockCache = LruCache<CacheKey, Bytes>;

/// Key of a row cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowCacheKey {
    /// Table file number
    pub file_number: u64,
    /// User key looked up in that file
    pub user_key: Vec<u8>,
}

/// Entries one file contributed to a lookup, newest first.
pub type RowReplayLog = Arc<Vec<(ValueType, Vec<u8>)>>;

/// Cache of per-file lookup results.
pub type RowCache = LruCache<RowCacheKey, RowReplayLog>;

/// Charge of a row cache entry.
pub fn row_charge(key: &RowCacheKey, log: &RowReplayLog) -> usize {
    key.user_key.len() + 8 + log.iter().map(|(_, v)| v.len() + 1).sum::<usize>()
}
