//! Multi-way merge iterator for flush and compaction.
//!
//! Merges several sorted streams of internal entries into one stream in
//! internal key order. Sources may be memtables or table files.

use crate::error::Result;
use crate::memtable::InternalKey;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// An internal entry: key and value.
pub type Entry = (InternalKey, Vec<u8>);

/// A sorted source of entries.
pub type EntrySource = Box<dyn Iterator<Item = Result<Entry>> + Send>;

/// Entry in the merge heap
struct MergeEntry {
    key: InternalKey,
    value: Vec<u8>,
    source: usize,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (smallest key first)
        other.key.cmp(&self.key).then_with(|| other.source.cmp(&self.source))
    }
}

/// Multi-way merge over sorted entry sources.
///
/// The first error from any source is returned once and ends the stream.
pub struct MergeIterator {
    heap: BinaryHeap<MergeEntry>,
    sources: Vec<EntrySource>,
    error: Option<crate::Error>,
    done: bool,
}

impl MergeIterator {
    /// Create a merge iterator over `sources`.
    pub fn new(sources: Vec<EntrySource>) -> Self {
        let mut iter = Self { heap: BinaryHeap::new(), sources, error: None, done: false };
        for index in 0..iter.sources.len() {
            iter.advance_source(index);
        }
        iter
    }

    /// Pull the next entry of `index` into the heap.
    fn advance_source(&mut self, index: usize) {
        if self.error.is_some() {
            return;
        }
        match self.sources[index].next() {
            Some(Ok((key, value))) => self.heap.push(MergeEntry { key, value, source: index }),
            Some(Err(e)) => self.error = Some(e),
            None => {}
        }
    }
}

impl Iterator for MergeIterator {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(e) = self.error.take() {
            self.done = true;
            return Some(Err(e));
        }
        let Some(entry) = self.heap.pop() else {
            self.done = true;
            return None;
        };
        self.advance_source(entry.source);
        Some(Ok((entry.key, entry.value)))
    }
}
