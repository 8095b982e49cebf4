//! SSTable (Sorted String Table) implementation.
//!
//! SSTable is an immutable, sorted file format for storing internal keys
//! and their values. Flush and compaction write them; lookups read them
//! through the [`TableCache`].
//!
//! ## File Format
//!
//! ```text
//! [Data Block 1]
//! [Data Block 2]
//! ...
//! [Data Block N]
//! [Properties Block] // bincode-encoded TableProperties
//! [Index Block]      // Index for data blocks
//! [Footer: 48B]      // Points to the properties and index blocks
//! ```
//!
//! Every block is followed by a 5-byte trailer: the compression type and a
//! CRC32 of the stored (possibly compressed) bytes.
//!
//! ## Index Format
//!
//! The index block contains entries that map keys to data blocks:
//! - Key: The largest internal key in the block
//! - Value: The block handle (offset and size)

pub mod block;
pub mod builder;
pub mod footer;
pub mod index;
pub mod reader;
pub mod table_cache;

pub use block::{Block, BlockBuilder, BlockIterator};
pub use builder::{TableBuilder, TableSummary};
pub use footer::{BlockHandle, Footer};
pub use index::IndexBlock;
pub use reader::{TableIterator, TableReadOptions, TableReader};
pub use table_cache::TableCache;

pub use crate::config::CompressionType;

use crate::env::FileSystem;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default block size (4KB)
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Footer size in bytes (fixed)
pub const FOOTER_SIZE: usize = 48;

/// Trailer after every block: compression type and CRC32.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Magic number for SSTable files
pub const MAGIC_NUMBER: u64 = 0x5441424c455f5353; // "SSTABLE_" in hex

/// Restart interval of data blocks.
pub const BLOCK_RESTART_INTERVAL: usize = 16;

/// Summary statistics stored inside every table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableProperties {
    /// Number of entries
    pub num_entries: u64,
    /// Number of data blocks
    pub num_data_blocks: u64,
    /// Smallest sequence number present
    pub smallest_seqno: u64,
    /// Largest sequence number present
    pub largest_seqno: u64,
    /// Total bytes of keys as written
    pub raw_key_size: u64,
    /// Total bytes of values as written
    pub raw_value_size: u64,
}

/// Size and CRC32 of a whole file, as recorded in the manifest.
pub fn file_checksum(fs: &dyn FileSystem, path: &Path) -> Result<(u64, u32)> {
    let data = fs.read_file(path)?;
    Ok((data.len() as u64, crc32fast::hash(&data)))
}
