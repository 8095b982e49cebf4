//! WriteBatch provides atomic batch write operations.
//!
//! A batch groups puts, deletes, single deletes and merges, possibly across
//! column families. The whole batch gets one contiguous range of sequence
//! numbers, is written to the WAL as a single record, and becomes visible
//! to readers all at once.
//!
//! # Example
//!
//! ```rust,no_run
//! use versadb::{DB, Options, WriteBatch};
//!
//! # fn main() -> Result<(), versadb::Error> {
//! let db = DB::open("./data", Options::default())?;
//! let mut batch = WriteBatch::new();
//!
//! batch.put(b"key1", b"value1");
//! batch.put(b"key2", b"value2");
//! batch.delete(b"key3");
//!
//! db.write(&batch)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## WAL encoding
//!
//! ```text
//! [sequence: u64][count: u32]
//! count x [type: u8][cf: u32][key_len: u32][key][value_len: u32][value]
//! ```

use crate::column_family::DEFAULT_COLUMN_FAMILY_ID;
use crate::error::{Error, Result};
use crate::memtable::{SequenceNumber, ValueType};
use bytes::{Buf, BufMut, BytesMut};

const BATCH_HEADER: usize = 12;

/// One operation inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOp {
    /// Target column family id
    pub cf_id: u32,
    /// Kind of entry written
    pub value_type: ValueType,
    /// User key
    pub key: Vec<u8>,
    /// Value or merge operand; empty for tombstones
    pub value: Vec<u8>,
}

/// WriteBatch accumulates a sequence of write operations to be applied atomically.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    operations: Vec<WriteOp>,
    approximate_size: usize,
}

impl WriteBatch {
    /// Creates a new empty WriteBatch.
    ///
    /// # Example
    ///
    /// ```
    /// use versadb::WriteBatch;
    ///
    /// let batch = WriteBatch::new();
    /// assert!(batch.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, cf_id: u32, value_type: ValueType, key: &[u8], value: &[u8]) {
        self.approximate_size += key.len() + value.len() + 13;
        self.operations.push(WriteOp { cf_id, value_type, key: key.to_vec(), value: value.to_vec() });
    }

    /// Adds a Put operation to the default column family.
    ///
    /// # Example
    ///
    /// ```
    /// use versadb::WriteBatch;
    ///
    /// let mut batch = WriteBatch::new();
    /// batch.put(b"key", b"value");
    /// assert_eq!(batch.len(), 1);
    /// ```
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.put_cf(DEFAULT_COLUMN_FAMILY_ID, key, value);
    }

    /// Adds a Put operation to the given column family.
    pub fn put_cf(&mut self, cf_id: u32, key: &[u8], value: &[u8]) {
        self.push(cf_id, ValueType::Value, key, value);
    }

    /// Adds a Delete operation to the default column family.
    pub fn delete(&mut self, key: &[u8]) {
        self.delete_cf(DEFAULT_COLUMN_FAMILY_ID, key);
    }

    /// Adds a Delete operation to the given column family.
    pub fn delete_cf(&mut self, cf_id: u32, key: &[u8]) {
        self.push(cf_id, ValueType::Deletion, key, &[]);
    }

    /// Adds a SingleDelete operation to the default column family.
    ///
    /// Only valid for keys that were put at most once since the last
    /// delete; the tombstone and the put cancel each other during flush.
    pub fn single_delete(&mut self, key: &[u8]) {
        self.single_delete_cf(DEFAULT_COLUMN_FAMILY_ID, key);
    }

    /// Adds a SingleDelete operation to the given column family.
    pub fn single_delete_cf(&mut self, cf_id: u32, key: &[u8]) {
        self.push(cf_id, ValueType::SingleDeletion, key, &[]);
    }

    /// Adds a Merge operand to the default column family.
    pub fn merge(&mut self, key: &[u8], operand: &[u8]) {
        self.merge_cf(DEFAULT_COLUMN_FAMILY_ID, key, operand);
    }

    /// Adds a Merge operand to the given column family.
    pub fn merge_cf(&mut self, cf_id: u32, key: &[u8], operand: &[u8]) {
        self.push(cf_id, ValueType::Merge, key, operand);
    }

    /// Clears all operations from the batch.
    pub fn clear(&mut self) {
        self.operations.clear();
        self.approximate_size = 0;
    }

    /// Returns the number of operations in the batch.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if the batch contains no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Returns the approximate size of the batch in bytes.
    pub fn approximate_size(&self) -> usize {
        self.approximate_size
    }

    /// Iterates over operations in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.operations.iter()
    }

    /// Encodes the batch as it is written to the WAL.
    pub fn encode(&self, sequence: SequenceNumber) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(BATCH_HEADER + self.approximate_size);
        buf.put_u64_le(sequence);
        buf.put_u32_le(self.operations.len() as u32);
        for op in &self.operations {
            buf.put_u8(op.value_type.as_u8());
            buf.put_u32_le(op.cf_id);
            buf.put_u32_le(op.key.len() as u32);
            buf.put_slice(&op.key);
            buf.put_u32_le(op.value.len() as u32);
            buf.put_slice(&op.value);
        }
        buf.to_vec()
    }

    /// Decodes a WAL record back into its first sequence number and batch.
    pub fn decode(mut data: &[u8]) -> Result<(SequenceNumber, WriteBatch)> {
        if data.len() < BATCH_HEADER {
            return Err(Error::corruption("write batch too short"));
        }
        let sequence = data.get_u64_le();
        let count = data.get_u32_le() as usize;

        let mut batch = WriteBatch::new();
        for _ in 0..count {
            if data.remaining() < 9 {
                return Err(Error::corruption("write batch entry header truncated"));
            }
            let value_type = ValueType::from_u8(data.get_u8())
                .ok_or_else(|| Error::corruption("unknown write batch entry type"))?;
            let cf_id = data.get_u32_le();
            let key = take_slice(&mut data)?;
            let value = take_slice(&mut data)?;
            batch.push(cf_id, value_type, key, value);
        }
        if data.has_remaining() {
            return Err(Error::corruption("trailing bytes after write batch"));
        }
        Ok((sequence, batch))
    }
}

fn take_slice<'a>(data: &mut &'a [u8]) -> Result<&'a [u8]> {
    if data.remaining() < 4 {
        return Err(Error::corruption("write batch length truncated"));
    }
    let len = data.get_u32_le() as usize;
    if data.remaining() < len {
        return Err(Error::corruption("write batch payload truncated"));
    }
    let rest: &'a [u8] = *data;
    let (head, tail) = rest.split_at(len);
    *data = tail;
    Ok(head)
}
