//! SSTable reader implementation.
//!
//! Reads data from an SSTable file with block caching, per-read timeouts
//! and batched block reads for MultiGet.

use crate::cache::{BlockCache, CacheKey};
use crate::env::{IoOptions, RandomAccessFile, ReadRequest};
use crate::error::{Error, Result};
use crate::lookup::GetContext;
use crate::memtable::{InternalKey, ParsedInternalKey, SequenceNumber};
use crate::sstable::block::Block;
use crate::sstable::footer::{BlockHandle, Footer};
use crate::sstable::index::IndexBlock;
use crate::sstable::{CompressionType, TableProperties, BLOCK_TRAILER_SIZE, FOOTER_SIZE};
use bytes::{Buf, Bytes};
use std::sync::Arc;

/// How a table read is performed.
#[derive(Debug, Clone, Copy)]
pub struct TableReadOptions {
    /// Timeout passed to every file read
    pub io: IoOptions,
    /// Insert blocks read from disk into the block cache
    pub fill_cache: bool,
    /// Verify block checksums
    pub verify_checksums: bool,
}

impl Default for TableReadOptions {
    fn default() -> Self {
        Self { io: IoOptions::unbounded(), fill_cache: true, verify_checksums: true }
    }
}

/// TableReader provides read access to an SSTable file.
///
/// The index and properties blocks are loaded at open; data blocks are read
/// on demand and shared through the block cache.
pub struct TableReader {
    file_number: u64,
    file: Arc<dyn RandomAccessFile>,
    file_size: u64,
    index: IndexBlock,
    properties: TableProperties,
    block_cache: Option<Arc<BlockCache>>,
}

impl TableReader {
    /// Opens the table stored in `file`.
    pub fn open(
        file_number: u64,
        file: Arc<dyn RandomAccessFile>,
        file_size: u64,
        block_cache: Option<Arc<BlockCache>>,
        io: &IoOptions,
    ) -> Result<Self> {
        if file_size < FOOTER_SIZE as u64 {
            return Err(Error::corruption(format!(
                "file {} too small to be a valid SSTable",
                file_number
            )));
        }

        let footer_data = file.read(file_size - FOOTER_SIZE as u64, FOOTER_SIZE, io)?;
        let footer = Footer::decode(&footer_data)?;

        let index_raw = file.read(footer.index_handle.offset, footer.index_handle.size as usize, io)?;
        let index = IndexBlock::new(decode_block_contents(&index_raw, true)?)?;

        let props_raw =
            file.read(footer.properties_handle.offset, footer.properties_handle.size as usize, io)?;
        let properties: TableProperties = bincode::deserialize(&decode_block_contents(&props_raw, true)?)?;

        Ok(Self { file_number, file, file_size, index, properties, block_cache })
    }

    /// Feeds the entries for `key` visible at `max_sequence` into `ctx`.
    ///
    /// Returns true once `ctx` has a final answer.
    pub fn get(
        &self,
        key: &[u8],
        max_sequence: SequenceNumber,
        ctx: &mut GetContext<'_>,
        opts: &TableReadOptions,
    ) -> Result<bool> {
        let target = InternalKey::seek(key, max_sequence).encode();
        let Some(index) = self.index.find_block(&target) else {
            return Ok(ctx.is_done());
        };
        let block = self.read_block(index, opts)?;
        self.get_from_block(key, &target, index, block, ctx, opts)
    }

    /// Index of the data block where a lookup of `key` at `max_sequence` starts.
    pub fn block_index_for(&self, key: &[u8], max_sequence: SequenceNumber) -> Option<usize> {
        self.index.find_block(&InternalKey::seek(key, max_sequence).encode())
    }

    /// Continues a lookup using an already loaded data block.
    ///
    /// When the key's versions run past the end of `block`, the following
    /// blocks are read individually.
    pub fn get_with_block(
        &self,
        key: &[u8],
        max_sequence: SequenceNumber,
        block_index: usize,
        block: Block,
        ctx: &mut GetContext<'_>,
        opts: &TableReadOptions,
    ) -> Result<bool> {
        let target = InternalKey::seek(key, max_sequence).encode();
        self.get_from_block(key, &target, block_index, block, ctx, opts)
    }

    fn get_from_block(
        &self,
        key: &[u8],
        target: &[u8],
        mut block_index: usize,
        mut block: Block,
        ctx: &mut GetContext<'_>,
        opts: &TableReadOptions,
    ) -> Result<bool> {
        let mut first = true;
        loop {
            let mut iter = block.iter();
            if first {
                iter.seek(target);
                first = false;
            } else {
                iter.seek_to_first();
                iter.advance();
            }

            while iter.valid() {
                let parsed = ParsedInternalKey::parse(iter.key())
                    .ok_or_else(|| Error::corruption(format!("bad internal key in file {}", self.file_number)))?;
                if parsed.user_key != key {
                    return Ok(ctx.is_done());
                }
                if !ctx.save_value(parsed.value_type, iter.value()) {
                    return Ok(true);
                }
                iter.advance();
            }
            iter.status()?;

            block_index += 1;
            if block_index >= self.index.len() {
                return Ok(ctx.is_done());
            }
            block = self.read_block(block_index, opts)?;
        }
    }

    /// Reads the data block at `index`, consulting the block cache first.
    pub fn read_block(&self, index: usize, opts: &TableReadOptions) -> Result<Block> {
        let handle = self.handle(index)?;
        if let Some(block) = self.cached_block(&handle) {
            return Ok(block);
        }
        let raw = self.file.read(handle.offset, handle.size as usize, &opts.io)?;
        self.finish_block_read(&handle, &raw, opts)
    }

    /// Reads several data blocks with a single batched file read.
    ///
    /// Results line up with `indices`. Cached blocks are served without I/O.
    pub fn multi_read_blocks(&self, indices: &[usize], opts: &TableReadOptions) -> Vec<Result<Block>> {
        let mut results: Vec<Option<Result<Block>>> = Vec::with_capacity(indices.len());
        let mut requests = Vec::new();
        let mut pending = Vec::new();

        for (slot, &index) in indices.iter().enumerate() {
            match self.handle(index) {
                Ok(handle) => match self.cached_block(&handle) {
                    Some(block) => results.push(Some(Ok(block))),
                    None => {
                        results.push(None);
                        requests.push(ReadRequest::new(handle.offset, handle.size as usize));
                        pending.push((slot, handle));
                    }
                },
                Err(e) => results.push(Some(Err(e))),
            }
        }

        if !requests.is_empty() {
            self.file.multi_read(&mut requests, &opts.io);
            for (req, (slot, handle)) in requests.into_iter().zip(pending) {
                let result = match req.result {
                    Some(Ok(raw)) => self.finish_block_read(&handle, &raw, opts),
                    Some(Err(e)) => Err(e),
                    None => Err(Error::internal("read request not served")),
                };
                results[slot] = Some(result);
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(Error::internal("block not read"))))
            .collect()
    }

    fn handle(&self, index: usize) -> Result<BlockHandle> {
        self.index
            .entry(index)
            .map(|e| e.handle)
            .ok_or_else(|| Error::corruption(format!("block {} out of range in file {}", index, self.file_number)))
    }

    fn cached_block(&self, handle: &BlockHandle) -> Option<Block> {
        let cache = self.block_cache.as_ref()?;
        let data = cache.get(&CacheKey::new(self.file_number, handle.offset))?;
        Block::new(data).ok()
    }

    fn finish_block_read(&self, handle: &BlockHandle, raw: &[u8], opts: &TableReadOptions) -> Result<Block> {
        let contents = decode_block_contents(raw, opts.verify_checksums)?;
        if opts.fill_cache {
            if let Some(cache) = &self.block_cache {
                let charge = contents.len();
                cache.insert(CacheKey::new(self.file_number, handle.offset), contents.clone(), charge);
            }
        }
        Block::new(contents)
    }

    /// Number of the table file.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Get the number of data blocks
    pub fn num_blocks(&self) -> usize {
        self.index.len()
    }

    /// Get the file size
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Properties recorded when the table was built.
    pub fn properties(&self) -> &TableProperties {
        &self.properties
    }

    /// Create an iterator over all entries.
    pub fn iter(self: &Arc<Self>, opts: TableReadOptions) -> TableIterator {
        TableIterator { reader: Arc::clone(self), opts, block_index: 0, entries: Vec::new().into_iter(), failed: false }
    }
}

impl std::fmt::Debug for TableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableReader")
            .field("file_number", &self.file_number)
            .field("file_size", &self.file_size)
            .field("num_blocks", &self.index.len())
            .finish()
    }
}

/// Strips and checks the block trailer, then decompresses.
///
/// Layout: `[data...][compression_type: 1 byte][checksum: 4 bytes]`
fn decode_block_contents(raw: &[u8], verify_checksum: bool) -> Result<Bytes> {
    if raw.len() < BLOCK_TRAILER_SIZE {
        return Err(Error::corruption("Block size too small"));
    }

    let data_size = raw.len() - BLOCK_TRAILER_SIZE;
    let data = &raw[..data_size];
    let compression_type = raw[data_size];
    let stored_checksum = (&raw[data_size + 1..]).get_u32_le();

    if verify_checksum {
        let computed_checksum = crc32fast::hash(data);
        if computed_checksum != stored_checksum {
            return Err(Error::ChecksumMismatch { expected: stored_checksum, actual: computed_checksum });
        }
    }

    let compression = CompressionType::from_u8(compression_type)
        .ok_or_else(|| Error::corruption("Invalid compression type"))?;

    let decompressed = match compression {
        CompressionType::None => data.to_vec(),
        #[cfg(feature = "snappy")]
        CompressionType::Snappy => snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| Error::corruption(format!("Decompression failed: {}", e)))?,
    };

    Ok(Bytes::from(decompressed))
}

/// Iterator over all entries of a table in internal key order.
///
/// Loads one data block at a time. After an error the iterator is fused.
pub struct TableIterator {
    reader: Arc<TableReader>,
    opts: TableReadOptions,
    block_index: usize,
    entries: std::vec::IntoIter<(InternalKey, Vec<u8>)>,
    failed: bool,
}

impl TableIterator {
    fn load_next_block(&mut self) -> Result<bool> {
        if self.block_index >= self.reader.num_blocks() {
            return Ok(false);
        }
        let block = self.reader.read_block(self.block_index, &self.opts)?;
        self.block_index += 1;

        let mut entries = Vec::new();
        let mut iter = block.iter();
        iter.seek_to_first();
        while iter.advance() {
            let key = InternalKey::decode(iter.key()).ok_or_else(|| {
                Error::corruption(format!("bad internal key in file {}", self.reader.file_number))
            })?;
            entries.push((key, iter.value().to_vec()));
        }
        iter.status()?;
        self.entries = entries.into_iter();
        Ok(true)
    }
}

impl Iterator for TableIterator {
    type Item = Result<(InternalKey, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(entry) = self.entries.next() {
                return Some(Ok(entry));
            }
            match self.load_next_block() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
