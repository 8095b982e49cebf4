//! Immutable memtables waiting to be flushed.
//!
//! A [`MemTableListVersion`] is a frozen view of the list that readers hold
//! through a SuperVersion; every change produces a new version, leaving the
//! old one untouched for readers still using it.

use super::{MemTable, SequenceNumber};
use crate::lookup::GetContext;
use std::sync::Arc;

/// A frozen list of immutable memtables, newest first.
#[derive(Debug, Default, Clone)]
pub struct MemTableListVersion {
    memlist: Vec<Arc<MemTable>>,
}

impl MemTableListVersion {
    /// Memtables, newest first.
    pub fn memtables(&self) -> &[Arc<MemTable>] {
        &self.memlist
    }

    /// Number of memtables.
    pub fn len(&self) -> usize {
        self.memlist.len()
    }

    /// True if no memtable is waiting.
    pub fn is_empty(&self) -> bool {
        self.memlist.is_empty()
    }

    /// Looks `key` up newest to oldest. Returns true once `ctx` is final.
    pub fn get(&self, key: &[u8], max_sequence: SequenceNumber, ctx: &mut GetContext<'_>) -> bool {
        for mem in &self.memlist {
            if mem.get(key, max_sequence, ctx) {
                return true;
            }
        }
        false
    }

    /// Total approximate size of every memtable in the list.
    pub fn approximate_size(&self) -> usize {
        self.memlist.iter().map(|m| m.approximate_size()).sum()
    }
}

/// The mutable handle owning the current [`MemTableListVersion`].
#[derive(Debug, Default)]
pub struct MemTableList {
    current: Arc<MemTableListVersion>,
}

impl MemTableList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current frozen view.
    pub fn current(&self) -> Arc<MemTableListVersion> {
        self.current.clone()
    }

    /// Appends a freshly switched memtable as the newest entry.
    pub fn add(&mut self, mem: Arc<MemTable>) {
        let mut memlist = Vec::with_capacity(self.current.memlist.len() + 1);
        memlist.push(mem);
        memlist.extend(self.current.memlist.iter().cloned());
        self.current = Arc::new(MemTableListVersion { memlist });
    }

    /// Number of memtables not yet flushed.
    pub fn len(&self) -> usize {
        self.current.len()
    }

    /// True if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Number of memtables a flush could pick right now.
    pub fn num_not_flushing(&self) -> usize {
        self.current.memlist.iter().filter(|m| !m.flush_in_progress()).count()
    }

    /// Claims every memtable not already being flushed, oldest first.
    ///
    /// Only a contiguous run starting at the oldest memtable is claimed, so
    /// flush results always commit in memtable order.
    pub fn pick_memtables_to_flush(&self) -> Vec<Arc<MemTable>> {
        let mut picked = Vec::new();
        for mem in self.current.memlist.iter().rev() {
            if mem.flush_in_progress() {
                if picked.is_empty() {
                    continue;
                }
                break;
            }
            mem.set_flush_in_progress(true);
            picked.push(mem.clone());
        }
        picked
    }

    /// Releases memtables claimed by a failed flush.
    pub fn rollback_flush(&self, picked: &[Arc<MemTable>]) {
        for mem in picked {
            mem.set_flush_in_progress(false);
        }
    }

    /// Drops memtables whose contents are now durable in a table file.
    pub fn remove_flushed(&mut self, flushed: &[Arc<MemTable>]) {
        let memlist: Vec<_> = self
            .current
            .memlist
            .iter()
            .filter(|m| !flushed.iter().any(|f| f.id() == m.id()))
            .cloned()
            .collect();
        self.current = Arc::new(MemTableListVersion { memlist });
    }

    /// Log number of the oldest memtable still waiting, if any.
    pub fn oldest_log_number(&self) -> Option<u64> {
        self.current.memlist.last().map(|m| m.log_number())
    }
}
