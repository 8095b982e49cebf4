//! Batched point lookups.
//!
//! Keys of one column family are looked up in sorted batches. A batch walks
//! the memtables once, then the files level by level; for every file the
//! keys it may hold are grouped by data block so each block is read once,
//! and all uncached blocks of the file are fetched with one `multi_read`.

use super::{GetContext, LookupEnv, ReadBudget};
use crate::cache::{row_charge, RowCacheKey};
use crate::config::ReadOptions;
use crate::error::{Error, Result};
use crate::version::{FileMetaData, SuperVersion};
use std::sync::Arc;

/// Keys processed together between budget checks.
pub(crate) const MULTI_GET_BATCH_SIZE: usize = 32;

/// The keys of one column family and the view they are read from.
pub(crate) struct MultiGetGroup<'k> {
    pub sv: Arc<SuperVersion>,
    pub sequence: u64,
    /// (result slot, key), sorted by key
    pub keys: Vec<(usize, &'k [u8])>,
}

type KeyResult = Option<Result<Option<Vec<u8>>>>;

struct KeyState<'a> {
    slot: usize,
    key: &'a [u8],
    ctx: GetContext<'a>,
    error: Option<Error>,
}

impl KeyState<'_> {
    fn searching(&self) -> bool {
        self.error.is_none() && !self.ctx.is_done()
    }
}

/// Resolves every key of every group into `results`.
///
/// Each slot ends up `Some`: a value, not found, or the per-key error.
pub(crate) fn multi_get(
    env: &LookupEnv<'_>,
    opts: &ReadOptions,
    groups: &[MultiGetGroup<'_>],
    results: &mut [KeyResult],
) {
    let budget = ReadBudget::new(env.clock, opts);
    let mut returned_bytes = 0u64;

    for group in groups {
        for batch in group.keys.chunks(MULTI_GET_BATCH_SIZE) {
            // An expired deadline outranks the soft limit
            let outcome = budget.check().and_then(|_| {
                if returned_bytes > opts.value_size_soft_limit {
                    return Err(value_limit_error(opts));
                }
                run_batch(env, &budget, opts, group, batch, results, &mut returned_bytes)
            });
            if let Err(e) = outcome {
                fail_unresolved(results, &e);
                return;
            }
        }
    }
}

/// Looks up one batch. An `Err` means every key not yet resolved must fail
/// with it.
fn run_batch<'a>(
    env: &LookupEnv<'a>,
    budget: &ReadBudget<'_>,
    opts: &ReadOptions,
    group: &MultiGetGroup<'a>,
    batch: &[(usize, &'a [u8])],
    results: &mut [KeyResult],
    returned_bytes: &mut u64,
) -> Result<()> {
    let sequence = group.sequence;
    let mut keys: Vec<KeyState<'a>> = batch
        .iter()
        .map(|&(slot, key)| KeyState { slot, key, ctx: GetContext::new(key, env.merge_operator), error: None })
        .collect();

    for state in &mut keys {
        if !group.sv.mem.get(state.key, sequence, &mut state.ctx) {
            group.sv.imm.get(state.key, sequence, &mut state.ctx);
        }
    }

    let version = &group.sv.current;
    let mut interrupted = None;
    'levels: for level in 0..version.num_levels() {
        for file in version.files(level) {
            if !keys.iter().any(KeyState::searching) {
                break 'levels;
            }
            let candidates: Vec<usize> = keys
                .iter()
                .enumerate()
                .filter(|(_, s)| s.searching() && file.contains_key(s.key))
                .map(|(i, _)| i)
                .collect();
            if candidates.is_empty() {
                continue;
            }
            if let Err(e) = search_file(env, budget, opts, file, sequence, &mut keys, &candidates) {
                interrupted = Some(e);
                break 'levels;
            }
        }
    }

    for state in keys {
        if *returned_bytes > opts.value_size_soft_limit {
            return Err(interrupted.unwrap_or_else(|| value_limit_error(opts)));
        }
        let result = if let Some(e) = state.error {
            Err(e)
        } else if !state.ctx.is_done() && interrupted.is_some() {
            continue;
        } else {
            state.ctx.finish()
        };
        if let Ok(Some(value)) = &result {
            *returned_bytes += value.len() as u64;
        }
        results[state.slot] = Some(result);
    }

    match interrupted {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Feeds the entries `file` holds for the candidate keys.
///
/// Per-key failures are recorded on the key; only a timeout is returned.
fn search_file<'a>(
    env: &LookupEnv<'_>,
    budget: &ReadBudget<'_>,
    opts: &ReadOptions,
    file: &FileMetaData,
    sequence: u64,
    keys: &mut [KeyState<'a>],
    candidates: &[usize],
) -> Result<()> {
    let row_cache = env.row_cache.filter(|_| sequence >= file.largest_seqno);
    let row_key = |key: &[u8]| RowCacheKey { file_number: file.number, user_key: key.to_vec() };

    let mut table_keys = Vec::with_capacity(candidates.len());
    for &i in candidates {
        match row_cache.and_then(|cache| cache.get(&row_key(keys[i].key))) {
            Some(log) => {
                keys[i].ctx.replay(&log);
            }
            None => table_keys.push(i),
        }
    }
    if table_keys.is_empty() {
        return Ok(());
    }

    let table_opts = budget.table_options(opts)?;
    let reader = match env.table_cache.find_table(file.number, file.file_size, &table_opts.io) {
        Ok(reader) => reader,
        Err(e) if e.is_timed_out() => return Err(e),
        Err(e) => {
            for i in table_keys {
                keys[i].error = Some(e.clone());
            }
            return Ok(());
        }
    };

    // Sorted keys map to non-decreasing block indices
    let mut blocks: Vec<usize> = Vec::new();
    let mut wanted: Vec<(usize, usize)> = Vec::new();
    for i in table_keys {
        match reader.block_index_for(keys[i].key, sequence) {
            Some(block) => {
                if blocks.last() != Some(&block) {
                    blocks.push(block);
                }
                wanted.push((i, blocks.len() - 1));
            }
            None => {
                if let Some(cache) = row_cache {
                    let key = row_key(keys[i].key);
                    let log = Arc::new(Vec::new());
                    let charge = row_charge(&key, &log);
                    cache.insert(key, log, charge);
                }
            }
        }
    }

    let loaded = reader.multi_read_blocks(&blocks, &table_opts);
    let mut timed_out = None;
    for (i, pos) in wanted {
        let state = &mut keys[i];
        let block = match &loaded[pos] {
            Ok(block) => block.clone(),
            Err(e) if e.is_timed_out() => {
                timed_out = Some(e.clone());
                continue;
            }
            Err(e) => {
                state.error = Some(e.clone());
                continue;
            }
        };

        if row_cache.is_some() {
            state.ctx.start_replay_log();
        }
        let result = reader.get_with_block(state.key, sequence, blocks[pos], block, &mut state.ctx, &table_opts);
        if let Some(cache) = row_cache {
            let log = Arc::new(state.ctx.take_replay_log());
            if result.is_ok() {
                let key = row_key(state.key);
                let charge = row_charge(&key, &log);
                cache.insert(key, log, charge);
            }
        }
        match result {
            Ok(_) => {}
            Err(e) if e.is_timed_out() => timed_out = Some(e),
            Err(e) => state.error = Some(e),
        }
    }

    match timed_out {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn value_limit_error(opts: &ReadOptions) -> Error {
    Error::aborted(format!("value size soft limit of {} bytes exceeded", opts.value_size_soft_limit))
}

fn fail_unresolved(results: &mut [KeyResult], error: &Error) {
    for slot in results.iter_mut().filter(|r| r.is_none()) {
        *slot = Some(Err(error.clone()));
    }
}
