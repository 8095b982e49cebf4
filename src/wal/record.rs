//! Physical record format shared by the WAL, the manifest and trace files.
//!
//! Each record consists of:
//! - Checksum (4 bytes): CRC32 of type and data
//! - Length (2 bytes): Length of the data
//! - Type (1 byte): Record type (Full, First, Middle, Last)
//! - Data (variable): Payload fragment

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use crc32fast::Hasher;

/// Maximum size of a single record's data portion
pub const MAX_RECORD_SIZE: usize = 32 * 1024; // 32KB

/// Size of the record header (checksum + length + type)
pub const HEADER_SIZE: usize = 7;

/// Record types for payloads that span several fragments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Complete payload in a single fragment
    Full = 1,
    /// First fragment of a multi-fragment payload
    First = 2,
    /// Middle fragment of a multi-fragment payload
    Middle = 3,
    /// Last fragment of a multi-fragment payload
    Last = 4,
}

impl RecordType {
    /// Convert from u8 to RecordType
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(RecordType::Full),
            2 => Ok(RecordType::First),
            3 => Ok(RecordType::Middle),
            4 => Ok(RecordType::Last),
            _ => Err(Error::corruption(format!("invalid record type: {}", value))),
        }
    }

    /// Picks the type of a fragment given its position in the payload.
    pub fn for_fragment(is_first: bool, is_last: bool) -> Self {
        match (is_first, is_last) {
            (true, true) => RecordType::Full,
            (true, false) => RecordType::First,
            (false, true) => RecordType::Last,
            (false, false) => RecordType::Middle,
        }
    }
}

/// One physical record.
#[derive(Debug, Clone)]
pub struct Record {
    /// Type of the record
    pub record_type: RecordType,
    /// Data payload
    pub data: Vec<u8>,
}

impl Record {
    /// Create a new record
    pub fn new(record_type: RecordType, data: Vec<u8>) -> Self {
        Self { record_type, data }
    }

    /// Appends the encoded record to `buf`.
    ///
    /// Format: [checksum: u32][length: u16][type: u8][data: bytes]
    pub fn encode_fragment(buf: &mut BytesMut, record_type: RecordType, data: &[u8]) {
        debug_assert!(data.len() <= MAX_RECORD_SIZE);
        buf.reserve(HEADER_SIZE + data.len());
        buf.put_u32_le(checksum(record_type as u8, data));
        buf.put_u16_le(data.len() as u16);
        buf.put_u8(record_type as u8);
        buf.put_slice(data);
    }

    /// Encode the record into bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_size());
        Self::encode_fragment(&mut buf, self.record_type, &self.data);
        buf.to_vec()
    }

    /// Decode a record from bytes
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::corruption(format!("record too short: {} bytes", data.len())));
        }

        let stored = data.get_u32_le();
        let length = data.get_u16_le() as usize;
        let raw_type = data.get_u8();

        if data.len() < length {
            return Err(Error::corruption(format!(
                "incomplete record: expected {} bytes, got {}",
                length,
                data.len()
            )));
        }
        let payload = &data[..length];

        let actual = checksum(raw_type, payload);
        if stored != actual {
            return Err(Error::ChecksumMismatch { expected: stored, actual });
        }
        let record_type = RecordType::from_u8(raw_type)?;

        Ok(Record { record_type, data: payload.to_vec() })
    }

    /// Get the total size of the encoded record
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }
}

/// CRC32 over the type byte followed by the payload.
pub fn checksum(record_type: u8, data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[record_type]);
    hasher.update(data);
    hasher.finalize()
}
