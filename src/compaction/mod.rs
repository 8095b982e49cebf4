//! Compaction: merging table files down the level tree.
//!
//! ## Compaction Strategy
//!
//! We use Leveled Compaction inspired by RocksDB:
//! - Level 0: New tables from flush (may overlap)
//! - Level 1+: Non-overlapping tables sorted by key
//! - Each level has a size threshold
//!
//! ## Compaction Triggers
//!
//! - Level 0: When the number of files reaches `level0_compaction_threshold`
//! - Level N: When total size exceeds `Options::target_size_for_level(N)`
//! - Manual: `DB::compact_range` over any key range
//!
//! ## Process
//!
//! 1. Pick files for compaction (picker.rs)
//! 2. Merge the inputs in internal key order (merge.rs)
//! 3. Drop versions no live snapshot can observe (iterator.rs)
//! 4. Write new tables to the output level (job.rs)
//! 5. Install the edit; inputs are deleted once no Version references them

mod iterator;
mod job;
mod merge;
mod picker;

pub use iterator::{CompactionIterator, RetentionStats};
pub(crate) use job::{write_tables, CompactionJob, CompactionResult, OutputOptions};
pub use merge::{Entry, EntrySource, MergeIterator};
pub use picker::{key_range, CompactionPicker, CompactionTask};
