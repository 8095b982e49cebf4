//! Snapshot-aware retention applied by flush and compaction.
//!
//! Versions of a user key are grouped into snapshot stripes: two sequences
//! share a stripe when no live snapshot lies between them. Inside a stripe
//! only the newest non-merge entry and the merge operands above it are
//! observable, so everything older in the same stripe is dropped.

use super::merge::Entry;
use crate::error::Result;
use crate::memtable::ValueType;
use std::iter::Peekable;

/// Counters of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionStats {
    /// Entries read from the input
    pub input: u64,
    /// Entries dropped
    pub dropped: u64,
}

/// Filters a sorted stream of internal entries down to what some reader
/// can still observe.
///
/// Rules, per user key from newest to oldest:
/// - an entry hidden by a newer value or tombstone in its stripe is dropped;
/// - a single delete and the value right below it cancel each other when
///   they share a stripe;
/// - a tombstone visible to every snapshot is dropped when the output is
///   bottommost, because nothing older can exist below it.
pub struct CompactionIterator<I: Iterator<Item = Result<Entry>>> {
    input: Peekable<I>,
    /// Live snapshot sequences, ascending and distinct
    snapshots: Vec<u64>,
    earliest_snapshot: u64,
    bottommost: bool,
    current_key: Option<Vec<u8>>,
    current_stripe: u64,
    hidden: bool,
    stats: RetentionStats,
}

impl<I: Iterator<Item = Result<Entry>>> CompactionIterator<I> {
    /// Wraps `input`; `snapshots` must be ascending.
    pub fn new(input: I, snapshots: Vec<u64>, bottommost: bool) -> Self {
        let earliest_snapshot = snapshots.first().copied().unwrap_or(u64::MAX);
        Self {
            input: input.peekable(),
            snapshots,
            earliest_snapshot,
            bottommost,
            current_key: None,
            current_stripe: 0,
            hidden: false,
            stats: RetentionStats::default(),
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> RetentionStats {
        self.stats
    }

    /// The smallest snapshot that can see `sequence`, or `u64::MAX`.
    fn stripe(&self, sequence: u64) -> u64 {
        let idx = self.snapshots.partition_point(|&s| s < sequence);
        self.snapshots.get(idx).copied().unwrap_or(u64::MAX)
    }

    fn cancels_next_value(&mut self, user_key: &[u8], stripe: u64) -> bool {
        let (is_value, sequence) = match self.input.peek() {
            Some(Ok((next, _))) if next.user_key() == user_key => (next.value_type() == ValueType::Value, next.sequence()),
            _ => return false,
        };
        is_value && self.stripe(sequence) == stripe
    }
}

impl<I: Iterator<Item = Result<Entry>>> Iterator for CompactionIterator<I> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (key, value) = match self.input.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            self.stats.input += 1;

            let stripe = self.stripe(key.sequence());
            if self.current_key.as_deref() != Some(key.user_key()) {
                self.current_key = Some(key.user_key().to_vec());
                self.current_stripe = stripe;
                self.hidden = false;
            } else if stripe != self.current_stripe {
                self.current_stripe = stripe;
                self.hidden = false;
            }

            if self.hidden {
                self.stats.dropped += 1;
                continue;
            }

            let droppable_tombstone = self.bottommost && key.sequence() <= self.earliest_snapshot;
            match key.value_type() {
                ValueType::Merge => return Some(Ok((key, value))),
                ValueType::Value => {
                    self.hidden = true;
                    return Some(Ok((key, value)));
                }
                ValueType::Deletion => {
                    self.hidden = true;
                    if droppable_tombstone {
                        self.stats.dropped += 1;
                        continue;
                    }
                    return Some(Ok((key, value)));
                }
                ValueType::SingleDeletion => {
                    self.hidden = true;
                    if self.cancels_next_value(key.user_key(), stripe) {
                        self.input.next();
                        self.stats.input += 1;
                        self.stats.dropped += 2;
                        continue;
                    }
                    if droppable_tombstone {
                        self.stats.dropped += 1;
                        continue;
                    }
                    return Some(Ok((key, value)));
                }
            }
        }
    }
}
