//! Execution of a picked compaction.

use super::iterator::{CompactionIterator, RetentionStats};
use super::merge::{Entry, EntrySource, MergeIterator};
use super::picker::CompactionTask;
use crate::config::CompressionType;
use crate::env::{FileSystem, IoOptions};
use crate::error::Result;
use crate::filename::table_file_path;
use crate::sstable::{TableBuilder, TableCache, TableReadOptions};
use crate::version::{FileMetaData, VersionEdit};
use std::path::Path;

/// Where and how output tables are written.
pub(crate) struct OutputOptions<'a> {
    pub fs: &'a dyn FileSystem,
    pub dir: &'a Path,
    pub block_size: usize,
    pub compression: CompressionType,
    /// Start a new file once the current one reaches this size
    pub target_file_size: Option<u64>,
}

/// Writes `entries` into new tables on `level`.
///
/// Files are only cut between user keys, so every version of a key lands
/// in the same file. On error every file created here is removed.
pub(crate) fn write_tables<I>(
    opts: &OutputOptions<'_>,
    entries: I,
    level: usize,
    new_file_number: &mut dyn FnMut() -> u64,
) -> Result<Vec<FileMetaData>>
where
    I: Iterator<Item = Result<Entry>>,
{
    let mut created = Vec::new();
    let result = write_tables_inner(opts, entries, level, new_file_number, &mut created);
    if result.is_err() {
        for number in created {
            let _ = opts.fs.remove_file(&table_file_path(opts.dir, number));
        }
    }
    result
}

fn write_tables_inner<I>(
    opts: &OutputOptions<'_>,
    entries: I,
    level: usize,
    new_file_number: &mut dyn FnMut() -> u64,
    created: &mut Vec<u64>,
) -> Result<Vec<FileMetaData>>
where
    I: Iterator<Item = Result<Entry>>,
{
    let mut outputs = Vec::new();
    let mut current: Option<(u64, TableBuilder)> = None;
    let mut last_user_key: Vec<u8> = Vec::new();

    for entry in entries {
        let (key, value) = entry?;
        let new_user_key = last_user_key.as_slice() != key.user_key();

        let cut = match (&current, opts.target_file_size) {
            (Some((_, builder)), Some(target)) => new_user_key && builder.current_size() >= target,
            _ => false,
        };
        if cut {
            if let Some((number, builder)) = current.take() {
                outputs.push(FileMetaData::from_summary(number, level, &builder.finish()?));
            }
        }

        if current.is_none() {
            let number = new_file_number();
            created.push(number);
            let file = opts.fs.new_writable_file(&table_file_path(opts.dir, number))?;
            current = Some((number, TableBuilder::new(file, opts.block_size, opts.compression)));
        }
        if let Some((_, builder)) = current.as_mut() {
            builder.add(&key, &value)?;
        }
        if new_user_key {
            last_user_key.clear();
            last_user_key.extend_from_slice(key.user_key());
        }
    }

    if let Some((number, builder)) = current.take() {
        outputs.push(FileMetaData::from_summary(number, level, &builder.finish()?));
    }
    Ok(outputs)
}

/// Result of a compaction operation
#[derive(Debug)]
pub(crate) struct CompactionResult {
    /// Deletes the inputs and adds the outputs
    pub edit: VersionEdit,
    pub stats: RetentionStats,
    pub bytes_written: u64,
}

/// Compaction job that merges the inputs of a [`CompactionTask`].
pub(crate) struct CompactionJob<'a> {
    pub task: &'a CompactionTask,
    pub table_cache: &'a TableCache,
    pub output: OutputOptions<'a>,
    /// Live snapshot sequences, ascending
    pub snapshots: Vec<u64>,
    /// No level below the output holds data in the task's key range
    pub bottommost: bool,
}

impl CompactionJob<'_> {
    /// Execute the compaction and return the edit to install.
    pub fn run(&self, new_file_number: &mut dyn FnMut() -> u64) -> Result<CompactionResult> {
        let task = self.task;
        let mut edit = VersionEdit::default();
        for file in task.all_inputs() {
            edit.delete_file(file.level, file.number);
        }

        if task.is_trivial_move() {
            let mut meta = task.inputs[0].meta().clone();
            log::info!("Moving file {} from level {} to level {}", meta.number, meta.level, task.output_level);
            meta.level = task.output_level;
            edit.add_file(meta);
            return Ok(CompactionResult { edit, stats: RetentionStats::default(), bytes_written: 0 });
        }

        log::info!(
            "Starting compaction: {} input files ({} bytes) -> level {}",
            task.inputs.len() + task.output_inputs.len(),
            task.input_size(),
            task.output_level
        );

        let read_opts = TableReadOptions { io: IoOptions::unbounded(), fill_cache: false, verify_checksums: true };
        let mut sources: Vec<EntrySource> = Vec::new();
        for file in task.all_inputs() {
            let reader = self.table_cache.find_table(file.number, file.file_size, &read_opts.io)?;
            sources.push(Box::new(reader.iter(read_opts)));
        }

        let mut retained = CompactionIterator::new(MergeIterator::new(sources), self.snapshots.clone(), self.bottommost);
        let outputs = write_tables(&self.output, &mut retained, task.output_level, new_file_number)?;
        let stats = retained.stats();

        let bytes_written = outputs.iter().map(|f| f.file_size).sum();
        log::info!(
            "Compaction completed: {} entries read, {} dropped, {} files / {} bytes written to level {}",
            stats.input,
            stats.dropped,
            outputs.len(),
            bytes_written,
            task.output_level
        );
        for meta in outputs {
            edit.add_file(meta);
        }
        Ok(CompactionResult { edit, stats, bytes_written })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PosixFileSystem;
    use crate::memtable::{InternalKey, ValueType};
    use tempfile::TempDir;

    fn entries(n: usize, versions: u64) -> Vec<Result<Entry>> {
        let mut out = Vec::new();
        for i in 0..n {
            for v in (1..=versions).rev() {
                let key = InternalKey::new(format!("key{:05}", i).into_bytes(), i as u64 * 10 + v, ValueType::Value);
                out.push(Ok((key, vec![b'x'; 100])));
            }
        }
        out
    }

    #[test]
    fn test_write_tables_splits_between_user_keys() {
        let dir = TempDir::new().unwrap();
        let fs = PosixFileSystem::new();
        let opts = OutputOptions {
            fs: &fs,
            dir: dir.path(),
            block_size: 1024,
            compression: CompressionType::None,
            target_file_size: Some(4096),
        };
        let mut next = 10;
        let outputs = write_tables(&opts, entries(200, 3).into_iter(), 1, &mut || {
            next += 1;
            next
        })
        .unwrap();

        assert!(outputs.len() > 1);
        for pair in outputs.windows(2) {
            assert!(pair[0].largest_key < pair[1].smallest_key);
        }
        assert_eq!(outputs.iter().map(|f| f.num_entries).sum::<u64>(), 600);
        assert!(outputs.iter().all(|f| f.level == 1));
    }

    #[test]
    fn test_write_tables_removes_files_on_error() {
        let dir = TempDir::new().unwrap();
        let fs = PosixFileSystem::new();
        let opts =
            OutputOptions { fs: &fs, dir: dir.path(), block_size: 1024, compression: CompressionType::None, target_file_size: None };
        let mut input = entries(5, 1);
        input.push(Err(crate::Error::corruption("bad input")));
        let mut next = 0;
        let result = write_tables(&opts, input.into_iter(), 0, &mut || {
            next += 1;
            next
        });
        assert!(result.unwrap_err().is_corruption());
        assert!(!fs.file_exists(&table_file_path(dir.path(), 1)));
    }

    #[test]
    fn test_empty_input_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let fs = PosixFileSystem::new();
        let opts =
            OutputOptions { fs: &fs, dir: dir.path(), block_size: 1024, compression: CompressionType::None, target_file_size: None };
        let outputs = write_tables(&opts, std::iter::empty(), 0, &mut || -> u64 { unreachable!() }).unwrap();
        assert!(outputs.is_empty());
    }
}
