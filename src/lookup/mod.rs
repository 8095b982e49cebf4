//! Point lookups: single-key Get and batched MultiGet.
//!
//! Both read one consistent view per column family: a SuperVersion plus a
//! sequence bound fixed after the SuperVersion was acquired. Sources are
//! consulted newest to oldest (active memtable, immutable memtables, level 0
//! newest file first, then one file per deeper level) and feed a
//! [`GetContext`] until it reaches a final answer.

mod get;
mod get_context;
mod multi_get;

pub use get_context::{GetContext, GetState};
pub(crate) use get::get;
pub(crate) use multi_get::{multi_get, MultiGetGroup};

use crate::cache::{row_charge, RowCache, RowCacheKey};
use crate::column_family::ColumnFamilyData;
use crate::config::ReadOptions;
use crate::env::{Clock, IoOptions};
use crate::error::{Error, Result};
use crate::merge_operator::MergeOperator;
use crate::sstable::{TableCache, TableReadOptions};
use crate::version::{FileMetaData, SuperVersion};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Attempts at a lock-free consistent acquisition before taking the state
/// locks.
const MAX_ACQUIRE_ATTEMPTS: usize = 3;

/// Shared read-path resources.
pub(crate) struct LookupEnv<'a> {
    pub table_cache: &'a TableCache,
    pub row_cache: Option<&'a RowCache>,
    pub merge_operator: Option<&'a dyn MergeOperator>,
    pub clock: &'a dyn Clock,
}

/// The time a read may still spend.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadBudget<'a> {
    clock: &'a dyn Clock,
    deadline: Option<Duration>,
    io_timeout: Option<Duration>,
}

impl<'a> ReadBudget<'a> {
    pub fn new(clock: &'a dyn Clock, opts: &ReadOptions) -> Self {
        Self { clock, deadline: opts.deadline, io_timeout: opts.io_timeout }
    }

    /// Fails with `TimedOut` once the deadline has passed.
    pub fn check(&self) -> Result<()> {
        self.remaining().map(|_| ())
    }

    fn remaining(&self) -> Result<Option<Duration>> {
        let Some(deadline) = self.deadline else {
            return Ok(None);
        };
        let now = self.clock.now();
        if now >= deadline {
            return Err(Error::timed_out(format!("deadline passed {:?} ago", now - deadline)));
        }
        Ok(Some(deadline - now))
    }

    /// I/O options for the next physical read: the smaller of the time left
    /// and the per-read timeout.
    pub fn io_options(&self) -> Result<IoOptions> {
        let timeout = match (self.remaining()?, self.io_timeout) {
            (Some(left), Some(io)) => Some(left.min(io)),
            (left, io) => left.or(io),
        };
        Ok(IoOptions { timeout })
    }

    pub fn table_options(&self, opts: &ReadOptions) -> Result<TableReadOptions> {
        Ok(TableReadOptions {
            io: self.io_options()?,
            fill_cache: opts.fill_cache,
            verify_checksums: opts.verify_checksums,
        })
    }
}

/// Looks `key` up in one table file, through the row cache when the file is
/// entirely visible at `sequence`.
pub(crate) fn get_from_file(
    env: &LookupEnv<'_>,
    file: &FileMetaData,
    key: &[u8],
    sequence: u64,
    ctx: &mut GetContext<'_>,
    opts: &TableReadOptions,
) -> Result<bool> {
    let row_cache = env.row_cache.filter(|_| sequence >= file.largest_seqno);
    let row_key = row_cache.map(|_| RowCacheKey { file_number: file.number, user_key: key.to_vec() });
    if let (Some(cache), Some(row_key)) = (row_cache, row_key.as_ref()) {
        if let Some(log) = cache.get(row_key) {
            ctx.replay(&log);
            return Ok(ctx.is_done());
        }
        ctx.start_replay_log();
    }

    let result = env
        .table_cache
        .find_table(file.number, file.file_size, &opts.io)
        .and_then(|reader| reader.get(key, sequence, ctx, opts));

    if let (Some(cache), Some(row_key)) = (row_cache, row_key) {
        let log = Arc::new(ctx.take_replay_log());
        if result.is_ok() {
            let charge = row_charge(&row_key, &log);
            cache.insert(row_key, log, charge);
        }
    }
    result
}

/// Acquires one SuperVersion per column family and a sequence bound that
/// is consistent with all of them.
///
/// The lock-free path is retried while a SuperVersion is superseded before
/// the bound is fixed; the last attempt holds every state lock and always
/// succeeds.
pub(crate) fn acquire_consistent(
    cfs: &[Arc<ColumnFamilyData>],
    published: &AtomicU64,
    snapshot: Option<u64>,
) -> (Vec<Arc<SuperVersion>>, u64) {
    for _ in 0..MAX_ACQUIRE_ATTEMPTS - 1 {
        let svs: Vec<Arc<SuperVersion>> = cfs.iter().map(|cf| cf.super_versions().acquire()).collect();
        let sequence = snapshot.unwrap_or_else(|| published.load(Ordering::Acquire));
        let still_current = cfs
            .iter()
            .zip(&svs)
            .all(|(cf, sv)| sv.number() == cf.super_versions().current_number());
        if still_current {
            return (svs, sequence);
        }
    }

    let mut order: Vec<&Arc<ColumnFamilyData>> = cfs.iter().collect();
    order.sort_by_key(|cf| cf.id());
    order.dedup_by_key(|cf| cf.id());
    let _guards: Vec<_> = order.iter().map(|cf| cf.lock_state()).collect();
    let svs = cfs.iter().map(|cf| cf.super_versions().get_current()).collect();
    let sequence = snapshot.unwrap_or_else(|| published.load(Ordering::Acquire));
    (svs, sequence)
}
