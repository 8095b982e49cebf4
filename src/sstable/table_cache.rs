//! Cache of open table readers.

use crate::cache::{BlockCache, LruCache};
use crate::env::{FileSystem, IoOptions};
use crate::error::Result;
use crate::filename::table_file_path;
use crate::sstable::TableReader;
use std::path::PathBuf;
use std::sync::Arc;

/// Number of table readers kept open.
const MAX_OPEN_TABLES: usize = 1000;

/// Opens table files on demand and keeps recently used readers around.
///
/// Readers share one block cache.
pub struct TableCache {
    fs: Arc<dyn FileSystem>,
    dir: PathBuf,
    readers: LruCache<u64, Arc<TableReader>>,
    block_cache: Option<Arc<BlockCache>>,
}

impl TableCache {
    /// Creates a cache for tables stored in `dir`.
    pub fn new(fs: Arc<dyn FileSystem>, dir: PathBuf, block_cache: Option<Arc<BlockCache>>) -> Self {
        Self { fs, dir, readers: LruCache::new(MAX_OPEN_TABLES), block_cache }
    }

    /// Returns a reader for table `number`, opening the file if needed.
    pub fn find_table(&self, number: u64, file_size: u64, io: &IoOptions) -> Result<Arc<TableReader>> {
        if let Some(reader) = self.readers.get(&number) {
            return Ok(reader);
        }
        let path = table_file_path(&self.dir, number);
        let file = self.fs.new_random_access_file(&path)?;
        let reader = Arc::new(TableReader::open(number, file, file_size, self.block_cache.clone(), io)?);
        self.readers.insert(number, Arc::clone(&reader), 1);
        Ok(reader)
    }

    /// Drops the reader and cached blocks of a deleted table.
    pub fn evict(&self, number: u64) {
        self.readers.erase_if(|n| *n == number);
        if let Some(cache) = &self.block_cache {
            cache.erase_if(|key| key.file_id == number);
        }
    }

    /// The shared block cache, if enabled.
    pub fn block_cache(&self) -> Option<&Arc<BlockCache>> {
        self.block_cache.as_ref()
    }
}

impl std::fmt::Debug for TableCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableCache").field("dir", &self.dir).field("open", &self.readers.len()).finish()
    }
}
