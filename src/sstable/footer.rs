//! SSTable footer implementation.
//!
//! The footer is a fixed-size (48 bytes) structure at the end of an SSTable file
//! that contains pointers to the index block and the properties block.

use crate::error::{Error, Result};
use crate::sstable::{FOOTER_SIZE, MAGIC_NUMBER};
use bytes::{Buf, BufMut};

/// BlockHandle represents a pointer to a block in the SSTable file.
///
/// The size includes the 5-byte block trailer (compression type and CRC32).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle {
    /// Offset of the block in the file
    pub offset: u64,
    /// Size of the block in bytes
    pub size: u64,
}

impl BlockHandle {
    /// Encoded size of a handle.
    pub const ENCODED_SIZE: usize = 16;

    /// Create a new BlockHandle
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Encode the BlockHandle to bytes (8 for offset + 8 for size)
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_SIZE);
        buf.put_u64_le(self.offset);
        buf.put_u64_le(self.size);
        buf
    }

    /// Decode a BlockHandle from bytes
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < Self::ENCODED_SIZE {
            return Err(Error::corruption("BlockHandle too short"));
        }
        let offset = data.get_u64_le();
        let size = data.get_u64_le();
        Ok(Self { offset, size })
    }

    /// Get the end offset of this block
    pub fn end_offset(&self) -> u64 {
        self.offset + self.size
    }
}

/// Footer is the last 48 bytes of an SSTable file.
///
/// Format:
/// ```text
/// [properties_handle: 16 bytes]
/// [index_handle: 16 bytes]
/// [padding: 8 bytes]
/// [magic: 8 bytes]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    /// Handle to the table properties block
    pub properties_handle: BlockHandle,
    /// Handle to the index block
    pub index_handle: BlockHandle,
}

impl Footer {
    /// Create a new Footer
    pub fn new(properties_handle: BlockHandle, index_handle: BlockHandle) -> Self {
        Self { properties_handle, index_handle }
    }

    /// Encode the footer to bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FOOTER_SIZE);
        buf.extend_from_slice(&self.properties_handle.encode());
        buf.extend_from_slice(&self.index_handle.encode());
        // Reserved
        buf.extend_from_slice(&[0u8; 8]);
        buf.put_u64_le(MAGIC_NUMBER);
        buf
    }

    /// Decode a footer from bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != FOOTER_SIZE {
            return Err(Error::corruption(format!(
                "Footer size mismatch: expected {}, got {}",
                FOOTER_SIZE,
                data.len()
            )));
        }

        let magic = (&data[40..48]).get_u64_le();
        if magic != MAGIC_NUMBER {
            return Err(Error::corruption(format!(
                "Invalid SSTable magic number: expected {:#x}, got {:#x}",
                MAGIC_NUMBER, magic
            )));
        }

        let properties_handle = BlockHandle::decode(&data[0..16])?;
        let index_handle = BlockHandle::decode(&data[16..32])?;

        Ok(Self { properties_handle, index_handle })
    }
}
