//! Replaying write-ahead logs into memtables.

use crate::config::RecoveryMode;
use crate::env::FileSystem;
use crate::error::{Error, Result};
use crate::filename::log_file_path;
use crate::memtable::MemTable;
use crate::wal::{open_log_reader, ReadOutcome};
use crate::write_batch::WriteBatch;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Where replayed records of one column family go.
#[derive(Debug, Clone)]
pub(crate) struct ReplayTarget {
    /// Logs below this number were already flushed for the family
    pub log_number: u64,
    pub mem: Arc<MemTable>,
}

/// What replay produced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReplayStats {
    pub batches: u64,
    pub entries: u64,
    pub max_sequence: u64,
}

/// Replays `logs` (ascending) into the targets.
///
/// A torn tail ends a log quietly. A corrupt record fails in strict mode and
/// stops all further replay in best-efforts mode.
pub(crate) fn replay_logs(
    fs: &dyn FileSystem,
    dir: &Path,
    logs: &[u64],
    targets: &HashMap<u32, ReplayTarget>,
    mode: RecoveryMode,
) -> Result<ReplayStats> {
    let mut stats = ReplayStats::default();
    for &number in logs {
        let mut reader = open_log_reader(fs, &log_file_path(dir, number))?;
        loop {
            let corruption = match reader.read_record()? {
                ReadOutcome::Record(data) => match WriteBatch::decode(&data) {
                    Ok((sequence, batch)) => {
                        apply_batch(number, sequence, &batch, targets, &mut stats);
                        continue;
                    }
                    Err(e) => format!("undecodable batch at offset {}: {}", reader.position(), e),
                },
                ReadOutcome::Eof => break,
                ReadOutcome::TruncatedTail { offset } => {
                    log::warn!("Log {} ends in a torn record at offset {}", number, offset);
                    break;
                }
                ReadOutcome::Corrupt { offset, reason } => format!("offset {}: {}", offset, reason),
            };

            match mode {
                RecoveryMode::Strict => {
                    return Err(Error::corruption(format!("log {} is corrupt at {}", number, corruption)));
                }
                RecoveryMode::BestEfforts => {
                    log::warn!("Stopping log replay at log {}: {}", number, corruption);
                    return Ok(stats);
                }
            }
        }
        log::info!("Replayed log {}", number);
    }
    Ok(stats)
}

fn apply_batch(
    log_number: u64,
    first_sequence: u64,
    batch: &WriteBatch,
    targets: &HashMap<u32, ReplayTarget>,
    stats: &mut ReplayStats,
) {
    stats.batches += 1;
    for (i, op) in batch.iter().enumerate() {
        let sequence = first_sequence + i as u64;
        stats.max_sequence = stats.max_sequence.max(sequence);
        match targets.get(&op.cf_id) {
            Some(target) if target.log_number <= log_number => {
                target.mem.add(sequence, op.value_type, &op.key, &op.value);
                stats.entries += 1;
            }
            Some(_) => {}
            None => log::debug!("Skipping record for dropped column family {}", op.cf_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PosixFileSystem;
    use crate::lookup::GetContext;
    use crate::wal::create_log_writer;
    use tempfile::TempDir;

    fn write_log(fs: &PosixFileSystem, dir: &Path, number: u64, batches: &[(u64, WriteBatch)]) {
        let mut log = create_log_writer(fs, &log_file_path(dir, number), number).unwrap();
        for (seq, batch) in batches {
            log.add_record(&batch.encode(*seq)).unwrap();
        }
        log.sync().unwrap();
    }

    fn lookup(mem: &MemTable, key: &[u8]) -> Option<Vec<u8>> {
        let mut ctx = GetContext::new(key, None);
        mem.get(key, u64::MAX, &mut ctx);
        ctx.finish().unwrap()
    }

    fn targets(default_log: u64, other_log: u64) -> HashMap<u32, ReplayTarget> {
        let mut map = HashMap::new();
        map.insert(0, ReplayTarget { log_number: default_log, mem: Arc::new(MemTable::new(1, 0)) });
        map.insert(1, ReplayTarget { log_number: other_log, mem: Arc::new(MemTable::new(2, 0)) });
        map
    }

    #[test]
    fn test_replay_respects_log_numbers() {
        let dir = TempDir::new().unwrap();
        let fs = PosixFileSystem::new();
        let mut b1 = WriteBatch::new();
        b1.put(b"a", b"1");
        b1.put_cf(1, b"x", b"old");
        let mut b2 = WriteBatch::new();
        b2.put_cf(1, b"x", b"new");
        b2.put_cf(7, b"gone", b"v");
        write_log(&fs, dir.path(), 4, &[(1, b1)]);
        write_log(&fs, dir.path(), 6, &[(3, b2)]);

        // Family 1 already flushed everything in log 4
        let targets = targets(4, 6);
        let stats = replay_logs(&fs, dir.path(), &[4, 6], &targets, RecoveryMode::Strict).unwrap();
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.max_sequence, 4);
        assert_eq!(lookup(&targets[&0].mem, b"a"), Some(b"1".to_vec()));
        assert_eq!(lookup(&targets[&1].mem, b"x"), Some(b"new".to_vec()));
        assert_eq!(targets[&1].mem.len(), 1);
    }

    #[test]
    fn test_corrupt_record_by_mode() {
        let dir = TempDir::new().unwrap();
        let fs = PosixFileSystem::new();
        let mut b1 = WriteBatch::new();
        b1.put(b"a", b"1");
        let mut b2 = WriteBatch::new();
        b2.put(b"b", b"2");
        let mut b3 = WriteBatch::new();
        b3.put(b"c", b"3");
        write_log(&fs, dir.path(), 4, &[(1, b1), (2, b2), (3, b3)]);

        // Flip a payload byte of the second record
        let path = log_file_path(dir.path(), 4);
        let mut data = fs.read_file(&path).unwrap();
        let first_len = data.len() / 3;
        data[first_len + 10] ^= 0xFF;
        fs.write_file(&path, &data, false).unwrap();

        let strict = targets(0, 0);
        assert!(replay_logs(&fs, dir.path(), &[4], &strict, RecoveryMode::Strict).unwrap_err().is_corruption());

        let lenient = targets(0, 0);
        let stats = replay_logs(&fs, dir.path(), &[4], &lenient, RecoveryMode::BestEfforts).unwrap();
        assert_eq!(stats.batches, 1);
        assert_eq!(lookup(&lenient[&0].mem, b"a"), Some(b"1".to_vec()));
        assert_eq!(lookup(&lenient[&0].mem, b"c"), None);
    }

    #[test]
    fn test_torn_tail_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let fs = PosixFileSystem::new();
        let mut b1 = WriteBatch::new();
        b1.put(b"a", b"1");
        let mut b2 = WriteBatch::new();
        b2.put(b"b", b"2");
        write_log(&fs, dir.path(), 4, &[(1, b1), (2, b2)]);

        let path = log_file_path(dir.path(), 4);
        let data = fs.read_file(&path).unwrap();
        fs.write_file(&path, &data[..data.len() - 3], false).unwrap();

        let targets = targets(0, 0);
        let stats = replay_logs(&fs, dir.path(), &[4], &targets, RecoveryMode::Strict).unwrap();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.max_sequence, 1);
    }
}
