//! Snapshots for point-in-time consistent reads.
//!
//! A snapshot pins a sequence number: reads through it see exactly the
//! writes with a sequence at or below it, and flush and compaction keep
//! every version some live snapshot can still see.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A point-in-time view of the database.
///
/// Obtained from [`DB::get_snapshot`](crate::DB::get_snapshot) and live until
/// passed to [`DB::release_snapshot`](crate::DB::release_snapshot). Clones
/// refer to the same snapshot.
///
/// # Example
///
/// ```rust,no_run
/// use versadb::{DB, Options, ReadOptions};
///
/// # fn main() -> Result<(), versadb::Error> {
/// let db = DB::open("./data", Options::default().create_if_missing(true))?;
/// db.put(b"key1", b"value1")?;
///
/// let snapshot = db.get_snapshot();
/// db.put(b"key1", b"value2")?;
///
/// let opts = ReadOptions::default().snapshot(&snapshot);
/// assert_eq!(db.get_opt(&opts, None, b"key1")?, Some(b"value1".to_vec()));
/// assert_eq!(db.get(b"key1")?, Some(b"value2".to_vec()));
///
/// db.release_snapshot(&snapshot);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

struct SnapshotInner {
    id: u64,
    sequence: u64,
    unix_time: u64,
}

impl Snapshot {
    /// Sequence number visible through this snapshot.
    pub fn sequence(&self) -> u64 {
        self.inner.sequence
    }

    /// Creation time in seconds since the unix epoch, per the database clock.
    pub fn unix_time(&self) -> u64 {
        self.inner.unix_time
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Snapshot {}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("sequence", &self.inner.sequence)
            .field("unix_time", &self.inner.unix_time)
            .finish()
    }
}

/// The set of live snapshots, ordered by sequence.
#[derive(Default)]
pub(crate) struct SnapshotList {
    next_id: AtomicU64,
    live: Mutex<BTreeMap<(u64, u64), u64>>,
}

impl SnapshotList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, sequence: u64, unix_time: u64) -> Snapshot {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.live.lock().insert((sequence, id), unix_time);
        Snapshot { inner: Arc::new(SnapshotInner { id, sequence, unix_time }) }
    }

    /// Removes `snapshot`; releasing twice is a no-op.
    pub fn release(&self, snapshot: &Snapshot) {
        self.live.lock().remove(&(snapshot.inner.sequence, snapshot.inner.id));
    }

    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.lock().is_empty()
    }

    pub fn oldest_sequence(&self) -> Option<u64> {
        self.live.lock().keys().next().map(|(seq, _)| *seq)
    }

    /// Creation time of the snapshot with the smallest sequence.
    pub fn oldest_time(&self) -> Option<u64> {
        self.live.lock().values().next().copied()
    }

    /// Distinct live sequences in ascending order.
    pub fn sequences(&self) -> Vec<u64> {
        let mut seqs: Vec<u64> = self.live.lock().keys().map(|(seq, _)| *seq).collect();
        seqs.dedup();
        seqs
    }
}

impl fmt::Debug for SnapshotList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotList").field("live", &self.len()).finish()
    }
}
