//! Descriptors of on-disk tables.

use crate::sstable::TableSummary;
use crossbeam::channel::Sender;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Metadata for a table file, as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetaData {
    /// File number identifier
    pub number: u64,
    /// Level holding the file
    pub level: usize,
    /// Size of the file in bytes
    pub file_size: u64,
    /// Smallest user key in the file
    pub smallest_key: Vec<u8>,
    /// Largest user key in the file
    pub largest_key: Vec<u8>,
    /// Smallest sequence number in the file
    pub smallest_seqno: u64,
    /// Largest sequence number in the file
    pub largest_seqno: u64,
    /// CRC32 of the whole file
    pub checksum: u32,
    /// Number of entries
    pub num_entries: u64,
}

impl FileMetaData {
    /// Describes a freshly written table.
    pub fn from_summary(number: u64, level: usize, summary: &TableSummary) -> Self {
        Self {
            number,
            level,
            file_size: summary.file_size,
            smallest_key: summary.smallest.user_key().to_vec(),
            largest_key: summary.largest.user_key().to_vec(),
            smallest_seqno: summary.smallest_seqno,
            largest_seqno: summary.largest_seqno,
            checksum: summary.checksum,
            num_entries: summary.num_entries,
        }
    }

    /// True if `key` lies within the file's key range.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.smallest_key.as_slice() <= key && key <= self.largest_key.as_slice()
    }

    /// True if the file's range intersects `[begin, end]`; `None` is unbounded.
    pub fn overlaps(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> bool {
        let after_end = end.is_some_and(|e| self.smallest_key.as_slice() > e);
        let before_begin = begin.is_some_and(|b| self.largest_key.as_slice() < b);
        !after_end && !before_begin
    }
}

/// A live reference to a table file shared by every Version that lists it.
///
/// Once the file is removed from the current Version it is marked obsolete;
/// when the last Version holding it goes away the file number is sent to the
/// purge queue and the file is deleted.
#[derive(Debug)]
pub struct FileHandle {
    meta: FileMetaData,
    obsolete: AtomicBool,
    purge_tx: Option<Sender<u64>>,
}

/// Shared file handle.
pub type FileRef = Arc<FileHandle>;

impl FileHandle {
    /// Wraps `meta`. Without a purge queue obsolete files are left on disk.
    pub fn new(meta: FileMetaData, purge_tx: Option<Sender<u64>>) -> FileRef {
        Arc::new(Self { meta, obsolete: AtomicBool::new(false), purge_tx })
    }

    /// The file's metadata.
    pub fn meta(&self) -> &FileMetaData {
        &self.meta
    }

    /// Schedules deletion once the last reference is dropped.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    /// True once removed from the current Version.
    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }
}

impl Deref for FileHandle {
    type Target = FileMetaData;

    fn deref(&self) -> &FileMetaData {
        &self.meta
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if self.is_obsolete() {
            if let Some(tx) = &self.purge_tx {
                // The receiver is gone only during shutdown
                let _ = tx.send(self.meta.number);
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn test_meta(number: u64, level: usize, smallest: &str, largest: &str, seqs: (u64, u64)) -> FileMetaData {
    FileMetaData {
        number,
        level,
        file_size: 1024,
        smallest_key: smallest.as_bytes().to_vec(),
        largest_key: largest.as_bytes().to_vec(),
        smallest_seqno: seqs.0,
        largest_seqno: seqs.1,
        checksum: 0,
        num_entries: 10,
    }
}
