//! Names accepted by [`DB::get_property`](crate::DB::get_property).

/// Prefix shared by every property name.
pub const PROPERTY_PREFIX: &str = "versadb.";

/// Number of live snapshots.
pub const NUM_SNAPSHOTS: &str = "versadb.num-snapshots";
/// Unix time of the oldest live snapshot, 0 without snapshots.
pub const OLDEST_SNAPSHOT_TIME: &str = "versadb.oldest-snapshot-time";
/// Sequence of the oldest live snapshot, 0 without snapshots.
pub const OLDEST_SNAPSHOT_SEQUENCE: &str = "versadb.oldest-snapshot-sequence";
/// Followed by a level number, e.g. `versadb.num-files-at-level0`.
pub const NUM_FILES_AT_LEVEL_PREFIX: &str = "versadb.num-files-at-level";
/// Immutable memtables waiting to be flushed.
pub const NUM_IMMUTABLE_MEM_TABLE: &str = "versadb.num-immutable-mem-table";
/// Approximate bytes in the active memtable.
pub const CUR_SIZE_ACTIVE_MEM_TABLE: &str = "versadb.cur-size-active-mem-table";
/// Number of the SuperVersion currently installed.
pub const CURRENT_SUPER_VERSION_NUMBER: &str = "versadb.current-super-version-number";

/// A parsed property name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Property {
    NumSnapshots,
    OldestSnapshotTime,
    OldestSnapshotSequence,
    NumFilesAtLevel(usize),
    NumImmutableMemTable,
    CurSizeActiveMemTable,
    CurrentSuperVersionNumber,
}

impl Property {
    /// Parses `name`; unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let property = match name {
            NUM_SNAPSHOTS => Property::NumSnapshots,
            OLDEST_SNAPSHOT_TIME => Property::OldestSnapshotTime,
            OLDEST_SNAPSHOT_SEQUENCE => Property::OldestSnapshotSequence,
            NUM_IMMUTABLE_MEM_TABLE => Property::NumImmutableMemTable,
            CUR_SIZE_ACTIVE_MEM_TABLE => Property::CurSizeActiveMemTable,
            CURRENT_SUPER_VERSION_NUMBER => Property::CurrentSuperVersionNumber,
            _ => {
                let level = name.strip_prefix(NUM_FILES_AT_LEVEL_PREFIX)?;
                if level.is_empty() || !level.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                Property::NumFilesAtLevel(level.parse().ok()?)
            }
        };
        Some(property)
    }
}
