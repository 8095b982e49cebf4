//! SSTable builder implementation.
//!
//! Builds an SSTable file from a sequence of sorted internal keys.

use crate::env::WritableFile;
use crate::error::{Error, Result};
use crate::memtable::{InternalKey, SequenceNumber};
use crate::sstable::block::BlockBuilder;
use crate::sstable::footer::{BlockHandle, Footer};
use crate::sstable::index::{IndexBlockBuilder, IndexEntry};
use crate::sstable::{CompressionType, TableProperties, BLOCK_RESTART_INTERVAL, DEFAULT_BLOCK_SIZE};
use std::cmp::Ordering;

/// What a finished table looks like, for its manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    /// Final file size in bytes
    pub file_size: u64,
    /// CRC32 of the whole file
    pub checksum: u32,
    /// Number of entries written
    pub num_entries: u64,
    /// Smallest internal key
    pub smallest: InternalKey,
    /// Largest internal key
    pub largest: InternalKey,
    /// Smallest sequence number written
    pub smallest_seqno: SequenceNumber,
    /// Largest sequence number written
    pub largest_seqno: SequenceNumber,
}

/// TableBuilder builds an SSTable file.
///
/// Usage:
/// ```no_run
/// use versadb::env::{FileSystem, PosixFileSystem};
/// use versadb::memtable::{InternalKey, ValueType};
/// use versadb::sstable::{CompressionType, TableBuilder};
/// use std::path::Path;
///
/// # fn main() -> Result<(), versadb::Error> {
/// let fs = PosixFileSystem::new();
/// let file = fs.new_writable_file(Path::new("000007.sst"))?;
/// let mut builder = TableBuilder::new(file, 4096, CompressionType::None);
/// builder.add(&InternalKey::new(b"key1".to_vec(), 1, ValueType::Value), b"value1")?;
/// builder.add(&InternalKey::new(b"key2".to_vec(), 2, ValueType::Value), b"value2")?;
/// let summary = builder.finish()?;
/// assert_eq!(summary.num_entries, 2);
/// # Ok(())
/// # }
/// ```
pub struct TableBuilder {
    file: Box<dyn WritableFile>,
    data_block_builder: BlockBuilder,
    index_block_builder: IndexBlockBuilder,
    last_key: Vec<u8>,
    offset: u64,
    block_size: usize,
    compression: CompressionType,
    pending_handle: Option<BlockHandle>,
    hasher: crc32fast::Hasher,
    smallest: Option<InternalKey>,
    largest: Option<InternalKey>,
    properties: TableProperties,
}

impl TableBuilder {
    /// Create a builder writing to `file`.
    pub fn new(file: Box<dyn WritableFile>, block_size: usize, compression: CompressionType) -> Self {
        Self {
            file,
            data_block_builder: BlockBuilder::new(BLOCK_RESTART_INTERVAL),
            index_block_builder: IndexBlockBuilder::new(),
            last_key: Vec::new(),
            offset: 0,
            block_size: if block_size == 0 { DEFAULT_BLOCK_SIZE } else { block_size },
            compression,
            pending_handle: None,
            hasher: crc32fast::Hasher::new(),
            smallest: None,
            largest: None,
            properties: TableProperties { smallest_seqno: u64::MAX, ..Default::default() },
        }
    }

    /// Add an entry. Keys must be added in strictly increasing internal key order.
    pub fn add(&mut self, key: &InternalKey, value: &[u8]) -> Result<()> {
        let encoded = key.encode();
        if self.largest.is_some() && crate::memtable::compare_encoded(&self.last_key, &encoded) != Ordering::Less {
            return Err(Error::invalid_argument("Keys must be added in sorted order"));
        }

        // The previous block is indexed once its last key is known
        if let Some(handle) = self.pending_handle.take() {
            let entry = IndexEntry::new(self.last_key.clone(), handle);
            self.index_block_builder.add_entry(&entry);
        }

        self.data_block_builder.add(&encoded, value);

        if self.smallest.is_none() {
            self.smallest = Some(key.clone());
        }
        self.largest = Some(key.clone());
        self.last_key = encoded;

        let props = &mut self.properties;
        props.num_entries += 1;
        props.raw_key_size += key.encoded_size() as u64;
        props.raw_value_size += value.len() as u64;
        props.smallest_seqno = props.smallest_seqno.min(key.sequence());
        props.largest_seqno = props.largest_seqno.max(key.sequence());

        if self.data_block_builder.current_size() >= self.block_size {
            self.flush_data_block()?;
        }

        Ok(())
    }

    fn flush_data_block(&mut self) -> Result<()> {
        if self.data_block_builder.is_empty() {
            return Ok(());
        }

        let old_builder =
            std::mem::replace(&mut self.data_block_builder, BlockBuilder::new(BLOCK_RESTART_INTERVAL));
        let block_data = old_builder.finish();
        let handle = self.write_block(&block_data, self.compression)?;
        self.pending_handle = Some(handle);
        self.properties.num_data_blocks += 1;
        Ok(())
    }

    /// Writes a block with its trailer and returns its handle.
    fn write_block(&mut self, raw: &[u8], compression: CompressionType) -> Result<BlockHandle> {
        let stored: Vec<u8> = match compression {
            CompressionType::None => raw.to_vec(),
            #[cfg(feature = "snappy")]
            CompressionType::Snappy => snap::raw::Encoder::new()
                .compress_vec(raw)
                .map_err(|e| Error::internal(format!("Compression failed: {}", e)))?,
        };

        let block_offset = self.offset;
        let checksum = crc32fast::hash(&stored);
        self.write_raw(&stored)?;
        self.write_raw(&[compression as u8])?;
        self.write_raw(&checksum.to_le_bytes())?;

        Ok(BlockHandle::new(block_offset, self.offset - block_offset))
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.file.append(data)?;
        self.hasher.update(data);
        self.offset += data.len() as u64;
        Ok(())
    }

    /// Finish building the SSTable.
    ///
    /// Writes the properties block, the index block and the footer, then
    /// syncs the file.
    pub fn finish(mut self) -> Result<TableSummary> {
        let (smallest, largest) = match (self.smallest.take(), self.largest.take()) {
            (Some(s), Some(l)) => (s, l),
            _ => return Err(Error::invalid_argument("cannot finish an empty table")),
        };

        self.flush_data_block()?;
        if let Some(handle) = self.pending_handle.take() {
            let entry = IndexEntry::new(self.last_key.clone(), handle);
            self.index_block_builder.add_entry(&entry);
        }

        let properties = bincode::serialize(&self.properties)?;
        let properties_handle = self.write_block(&properties, CompressionType::None)?;

        let index_builder = std::mem::take(&mut self.index_block_builder);
        let index_data = index_builder.finish();
        let index_handle = self.write_block(&index_data, CompressionType::None)?;

        let footer = Footer::new(properties_handle, index_handle);
        self.write_raw(&footer.encode())?;
        self.file.sync()?;

        Ok(TableSummary {
            file_size: self.offset,
            checksum: self.hasher.clone().finalize(),
            num_entries: self.properties.num_entries,
            smallest,
            largest,
            smallest_seqno: self.properties.smallest_seqno,
            largest_seqno: self.properties.largest_seqno,
        })
    }

    /// Get the number of entries added
    pub fn num_entries(&self) -> u64 {
        self.properties.num_entries
    }

    /// Get the current file size
    pub fn current_size(&self) -> u64 {
        self.offset + self.data_block_builder.current_size() as u64
    }

    /// Abandon the SSTable without writing a footer.
    ///
    /// The caller deletes the partial file.
    pub fn abandon(self) {}
}
