//! Index block implementation for SSTable.
//!
//! The index block maps the last internal key of every data block to the
//! block's handle. Readers load it once at open and binary search it.

use crate::error::{Error, Result};
use crate::memtable::compare_encoded;
use crate::sstable::block::{Block, BlockBuilder};
use crate::sstable::footer::BlockHandle;
use bytes::Bytes;
use std::cmp::Ordering;

/// IndexEntry represents a single entry in the index block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// The largest internal key in the data block
    pub key: Vec<u8>,
    /// Handle to the data block
    pub handle: BlockHandle,
}

impl IndexEntry {
    /// Create a new IndexEntry
    pub fn new(key: Vec<u8>, handle: BlockHandle) -> Self {
        Self { key, handle }
    }
}

/// IndexBlock provides lookup of data blocks by internal key.
#[derive(Debug, Clone)]
pub struct IndexBlock {
    entries: Vec<IndexEntry>,
}

impl IndexBlock {
    /// Parses an index block.
    pub fn new(data: Bytes) -> Result<Self> {
        let block = Block::new(data)?;
        let mut iter = block.iter();
        iter.seek_to_first();

        let mut entries: Vec<IndexEntry> = Vec::new();
        while iter.advance() {
            let handle = BlockHandle::decode(iter.value())?;
            if let Some(prev) = entries.last() {
                if compare_encoded(&prev.key, iter.key()) != Ordering::Less {
                    return Err(Error::corruption("index keys out of order"));
                }
            }
            entries.push(IndexEntry::new(iter.key().to_vec(), handle));
        }
        iter.status()?;

        Ok(Self { entries })
    }

    /// Position of the first data block that may hold `target` or a later key.
    ///
    /// Returns `None` when `target` sorts after every key in the table.
    pub fn find_block(&self, target: &[u8]) -> Option<usize> {
        let idx = self.entries.partition_point(|e| compare_encoded(&e.key, target) == Ordering::Less);
        (idx < self.entries.len()).then_some(idx)
    }

    /// Entry at `index`.
    pub fn entry(&self, index: usize) -> Option<&IndexEntry> {
        self.entries.get(index)
    }

    /// All entries in key order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Get the number of entries in the index
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// IndexBlockBuilder builds an index block.
pub struct IndexBlockBuilder {
    builder: BlockBuilder,
}

impl IndexBlockBuilder {
    /// Create a new IndexBlockBuilder
    pub fn new() -> Self {
        // Every index entry is a restart point
        Self { builder: BlockBuilder::new(1) }
    }

    /// Add an index entry
    pub fn add_entry(&mut self, entry: &IndexEntry) {
        self.builder.add(&entry.key, &entry.handle.encode());
    }

    /// Finish building and return the block data
    pub fn finish(self) -> Bytes {
        self.builder.finish()
    }

    /// Check if the builder is empty
    pub fn is_empty(&self) -> bool {
        self.builder.is_empty()
    }
}

impl Default for IndexBlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}
