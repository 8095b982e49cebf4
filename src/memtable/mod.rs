//! # MemTable - In-Memory Sorted Table
//!
//! The MemTable is an in-memory data structure that stores recent writes.
//! It uses a SkipList for efficient concurrent reads and writes.
//!
//! ## Design
//!
//! - Based on crossbeam-skiplist for lock-free concurrent access
//! - Stores puts, tombstones, single-delete tombstones and merge operands
//! - Tracks size to determine when to switch and flush to disk
//! - Remembers the WAL that was current when it was created, so a flush
//!   knows which logs it made obsolete
//!
//! ## Thread Safety
//!
//! One writer thread inserts while any number of readers look up keys
//! (crossbeam-skiplist provides this guarantee).

mod internal_key;
mod list;

pub use internal_key::{
    compare_encoded, InternalKey, ParsedInternalKey, SequenceNumber, ValueType,
    INTERNAL_KEY_TRAILER, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK,
};
pub use list::{MemTableList, MemTableListVersion};

use crate::lookup::GetContext;
use crossbeam_skiplist::SkipMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Per-entry bookkeeping overhead counted towards the memtable size.
const ENTRY_OVERHEAD: usize = 16;

/// MemTable stores recent writes in memory using a SkipList.
///
/// # Example
///
/// ```rust
/// use versadb::lookup::GetContext;
/// use versadb::memtable::{MemTable, ValueType};
///
/// let memtable = MemTable::new(1, 1);
/// memtable.add(1, ValueType::Value, b"key1", b"value1");
///
/// let mut ctx = GetContext::new(b"key1", None);
/// assert!(memtable.get(b"key1", 2, &mut ctx));
/// assert_eq!(ctx.finish().unwrap(), Some(b"value1".to_vec()));
/// ```
pub struct MemTable {
    id: u64,

    /// The underlying SkipList storing InternalKey -> Value
    data: Arc<SkipMap<InternalKey, Vec<u8>>>,

    /// Approximate size in bytes (keys + values)
    size: AtomicUsize,

    /// WAL that was active when this memtable was created
    log_number: u64,

    first_sequence: AtomicU64,
    largest_sequence: AtomicU64,

    flush_in_progress: AtomicBool,
}

impl MemTable {
    /// Creates a new empty MemTable.
    ///
    /// # Arguments
    ///
    /// * `id` - Creation order, unique within the database
    /// * `log_number` - The WAL file receiving writes for this memtable
    pub fn new(id: u64, log_number: u64) -> Self {
        Self {
            id,
            data: Arc::new(SkipMap::new()),
            size: AtomicUsize::new(0),
            log_number,
            first_sequence: AtomicU64::new(0),
            largest_sequence: AtomicU64::new(0),
            flush_in_progress: AtomicBool::new(false),
        }
    }

    /// Inserts one entry.
    pub fn add(&self, sequence: SequenceNumber, value_type: ValueType, key: &[u8], value: &[u8]) {
        let internal_key = InternalKey::new(key.to_vec(), sequence, value_type);
        let entry_size = key.len() + value.len() + ENTRY_OVERHEAD;

        self.data.insert(internal_key, value.to_vec());
        self.size.fetch_add(entry_size, Ordering::Relaxed);

        let _ = self.first_sequence.compare_exchange(0, sequence, Ordering::AcqRel, Ordering::Acquire);
        self.largest_sequence.fetch_max(sequence, Ordering::AcqRel);
    }

    /// Feeds the entries for `key` visible at `max_sequence` into `ctx`.
    ///
    /// Returns true once `ctx` has a final answer and older sources need not
    /// be consulted.
    pub fn get(&self, key: &[u8], max_sequence: SequenceNumber, ctx: &mut GetContext<'_>) -> bool {
        let seek = InternalKey::seek(key, max_sequence);
        for entry in self.data.range(seek..) {
            let internal_key = entry.key();
            if internal_key.user_key() != key {
                break;
            }
            if !ctx.save_value(internal_key.value_type(), entry.value()) {
                return true;
            }
        }
        ctx.is_done()
    }

    /// Returns the approximate size of the MemTable in bytes.
    pub fn approximate_size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Returns the number of entries in the MemTable.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the MemTable contains no entries.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns an iterator over the MemTable entries in internal key order.
    pub fn iter(&self) -> MemTableIterator {
        MemTableIterator::new(self.data.clone())
    }

    /// Creation order of this memtable.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The WAL file that was current when this memtable was created.
    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    /// Sequence number of the first insert, or 0 if empty.
    pub fn first_sequence(&self) -> SequenceNumber {
        self.first_sequence.load(Ordering::Acquire)
    }

    /// Largest sequence number inserted, or 0 if empty.
    pub fn largest_sequence(&self) -> SequenceNumber {
        self.largest_sequence.load(Ordering::Acquire)
    }

    pub(crate) fn flush_in_progress(&self) -> bool {
        self.flush_in_progress.load(Ordering::Acquire)
    }

    pub(crate) fn set_flush_in_progress(&self, value: bool) {
        self.flush_in_progress.store(value, Ordering::Release);
    }
}

impl std::fmt::Debug for MemTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemTable")
            .field("id", &self.id)
            .field("entries", &self.len())
            .field("size", &self.approximate_size())
            .field("log_number", &self.log_number)
            .finish()
    }
}

/// Iterator over MemTable entries in sorted order.
///
/// Holds the skiplist alive through an `Arc` and re-seeks past the last
/// returned key on every step, so it never borrows the map across calls.
pub struct MemTableIterator {
    data: Arc<SkipMap<InternalKey, Vec<u8>>>,
    last: Option<InternalKey>,
}

impl MemTableIterator {
    fn new(data: Arc<SkipMap<InternalKey, Vec<u8>>>) -> Self {
        Self { data, last: None }
    }
}

impl Iterator for MemTableIterator {
    type Item = (InternalKey, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match &self.last {
            None => self.data.front(),
            Some(last) => self.data.lower_bound(Bound::Excluded(last)),
        }?;
        let key = entry.key().clone();
        let value = entry.value().clone();
        self.last = Some(key.clone());
        Some((key, value))
    }
}
