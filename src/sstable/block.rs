//! Block format implementation for SSTable.
//!
//! A block contains multiple key-value entries and uses restart points
//! for efficient binary search and prefix compression. Keys stored in data
//! and index blocks are encoded internal keys, ordered by
//! [`compare_encoded`].

use crate::error::{Error, Result};
use crate::memtable::compare_encoded;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::cmp::Ordering;

const ENTRY_HEADER: usize = 12;

/// Block stores key-value pairs with prefix compression.
///
/// Format:
/// ```text
/// [Entry 1]
/// [Entry 2]
/// ...
/// [Entry N]
/// [Restart Point 1: u32]
/// ...
/// [Restart Point M: u32]
/// [Num Restarts: u32]
/// ```
///
/// Each entry format:
/// ```text
/// [shared_key_len: u32]     // Length of shared prefix with previous key
/// [unshared_key_len: u32]   // Length of unshared key suffix
/// [value_len: u32]          // Length of value
/// [unshared_key: bytes]     // Key suffix
/// [value: bytes]            // Value data
/// ```
#[derive(Debug, Clone)]
pub struct Block {
    data: Bytes,
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    /// Create a new Block from raw data
    pub fn new(data: Bytes) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::corruption("Block too small"));
        }

        let num_restarts = (&data[data.len() - 4..]).get_u32_le();
        let trailer = (num_restarts as usize).saturating_mul(4).saturating_add(4);
        if trailer > data.len() {
            return Err(Error::corruption("Invalid restart offset"));
        }
        let restart_offset = data.len() - trailer;

        Ok(Self { data, restart_offset, num_restarts })
    }

    /// Get the number of restart points
    pub fn num_restarts(&self) -> u32 {
        self.num_restarts
    }

    fn restart_point(&self, index: u32) -> usize {
        let offset = self.restart_offset + index as usize * 4;
        (&self.data[offset..offset + 4]).get_u32_le() as usize
    }

    /// Key stored at a restart point. Restart entries share no prefix.
    fn restart_key(&self, index: u32) -> Option<&[u8]> {
        let start = self.restart_point(index);
        let mut header = self.data.get(start..start + ENTRY_HEADER)?;
        let shared = header.get_u32_le() as usize;
        let unshared = header.get_u32_le() as usize;
        if shared != 0 {
            return None;
        }
        let key_start = start + ENTRY_HEADER;
        if key_start + unshared > self.restart_offset {
            return None;
        }
        Some(&self.data[key_start..key_start + unshared])
    }

    /// Create an iterator over the block
    pub fn iter(&self) -> BlockIterator {
        BlockIterator::new(self.clone())
    }

    /// Size of the block contents in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// BlockBuilder builds a block with prefix compression.
pub struct BlockBuilder {
    buffer: BytesMut,
    restarts: Vec<u32>,
    counter: usize,
    last_key: Vec<u8>,
    block_restart_interval: usize,
}

impl BlockBuilder {
    /// Create a new BlockBuilder
    pub fn new(block_restart_interval: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            restarts: vec![0],
            counter: 0,
            last_key: Vec::new(),
            block_restart_interval: block_restart_interval.max(1),
        }
    }

    /// Add a key-value pair to the block.
    ///
    /// Callers add keys in strictly increasing order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(
            self.buffer.is_empty() || compare_encoded(&self.last_key, key) == Ordering::Less,
            "Keys must be added in sorted order"
        );

        let mut shared = 0;
        if self.counter >= self.block_restart_interval {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        } else if !self.buffer.is_empty() {
            shared = shared_prefix_len(&self.last_key, key);
        }

        let unshared = key.len() - shared;

        // shared | unshared | value_len | key_suffix | value
        self.buffer.put_u32_le(shared as u32);
        self.buffer.put_u32_le(unshared as u32);
        self.buffer.put_u32_le(value.len() as u32);
        self.buffer.put_slice(&key[shared..]);
        self.buffer.put_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
    }

    /// Finish building and return the block data
    pub fn finish(mut self) -> Bytes {
        for restart in &self.restarts {
            self.buffer.put_u32_le(*restart);
        }
        self.buffer.put_u32_le(self.restarts.len() as u32);
        self.buffer.freeze()
    }

    /// Get the current size of the block
    pub fn current_size(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    /// Check if the block is empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Iterator over entries in a block.
///
/// After [`seek_to_first`](Self::seek_to_first) the iterator sits before the
/// first entry and [`advance`](Self::advance) steps onto it. After
/// [`seek`](Self::seek) it sits on the found entry.
pub struct BlockIterator {
    block: Block,
    current: usize,
    key: Vec<u8>,
    value_range: (usize, usize),
    valid: bool,
    corrupted: bool,
}

impl BlockIterator {
    fn new(block: Block) -> Self {
        Self {
            block,
            current: 0,
            key: Vec::new(),
            value_range: (0, 0),
            valid: false,
            corrupted: false,
        }
    }

    /// Seek to the first entry
    pub fn seek_to_first(&mut self) {
        self.seek_to_restart_point(0);
    }

    fn seek_to_restart_point(&mut self, index: u32) {
        self.key.clear();
        self.valid = false;
        self.current = if self.block.num_restarts == 0 { self.block.restart_offset } else { self.block.restart_point(index) };
    }

    /// Positions at the first entry whose key is `>= target`.
    pub fn seek(&mut self, target: &[u8]) {
        if self.block.num_restarts == 0 {
            self.valid = false;
            return;
        }

        // Last restart point whose key is < target
        let mut left = 0u32;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right).div_ceil(2);
            match self.block.restart_key(mid) {
                Some(key) if compare_encoded(key, target) == Ordering::Less => left = mid,
                Some(_) => right = mid - 1,
                None => {
                    self.corrupted = true;
                    self.valid = false;
                    return;
                }
            }
        }

        self.seek_to_restart_point(left);
        while self.advance() {
            if compare_encoded(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    /// Move to the next entry. Returns false at the end of the block.
    pub fn advance(&mut self) -> bool {
        self.parse_next_entry();
        self.valid
    }

    fn parse_next_entry(&mut self) {
        if self.corrupted || self.current >= self.block.restart_offset {
            self.valid = false;
            return;
        }

        let data = &self.block.data[self.current..self.block.restart_offset];
        if data.len() < ENTRY_HEADER {
            self.mark_corrupted();
            return;
        }

        let mut header = &data[..ENTRY_HEADER];
        let shared = header.get_u32_le() as usize;
        let unshared = header.get_u32_le() as usize;
        let value_len = header.get_u32_le() as usize;

        if shared > self.key.len() || data.len() < ENTRY_HEADER + unshared + value_len {
            self.mark_corrupted();
            return;
        }

        self.key.truncate(shared);
        self.key.extend_from_slice(&data[ENTRY_HEADER..ENTRY_HEADER + unshared]);

        let value_start = self.current + ENTRY_HEADER + unshared;
        self.value_range = (value_start, value_start + value_len);

        self.current += ENTRY_HEADER + unshared + value_len;
        self.valid = true;
    }

    fn mark_corrupted(&mut self) {
        self.corrupted = true;
        self.valid = false;
    }

    /// Check if the iterator is valid
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Get the current key. Only meaningful while `valid()`.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Get the current value. Only meaningful while `valid()`.
    pub fn value(&self) -> &[u8] {
        &self.block.data[self.value_range.0..self.value_range.1]
    }

    /// Reports malformed entries met while iterating.
    pub fn status(&self) -> Result<()> {
        if self.corrupted {
            Err(Error::corruption("malformed block entry"))
        } else {
            Ok(())
        }
    }
}
