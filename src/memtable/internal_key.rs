//! # Internal Key Format
//!
//! This module defines the internal key format used in the MemTable and SSTable.
//!
//! ## Format
//!
//! ```text
//! InternalKey:
//!   [user_key: bytes] [sequence: u64 LE] [type: u8]
//! ```
//!
//! ## Ordering
//!
//! InternalKeys are ordered by:
//! 1. user_key (ascending)
//! 2. sequence (descending - newer first)
//! 3. type (descending)

use std::cmp::Ordering;

/// Sequence number assigned to every write.
pub type SequenceNumber = u64;

/// Largest sequence number a lookup can use as its bound.
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = u64::MAX;

/// Bytes appended to a user key by the internal encoding.
pub const INTERNAL_KEY_TRAILER: usize = 9;

/// The type of a value in the database.
///
/// - `Deletion`: a tombstone hiding every older version of the key
/// - `Value`: a normal key-value pair
/// - `Merge`: an operand folded into older versions by the merge operator
/// - `SingleDeletion`: a tombstone that cancels exactly one older `Value`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueType {
    /// A tombstone indicating the key has been deleted
    Deletion = 0,

    /// A normal value
    Value = 1,

    /// A merge operand
    Merge = 2,

    /// A tombstone for a key written at most once
    SingleDeletion = 3,
}

/// The type used to build seek keys; it sorts first among equal sequences.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::SingleDeletion;

impl ValueType {
    /// Converts a u8 to a ValueType.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ValueType::Deletion),
            1 => Some(ValueType::Value),
            2 => Some(ValueType::Merge),
            3 => Some(ValueType::SingleDeletion),
            _ => None,
        }
    }

    /// Converts the ValueType to a u8.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// True for both tombstone kinds.
    pub fn is_deletion(self) -> bool {
        matches!(self, ValueType::Deletion | ValueType::SingleDeletion)
    }
}

/// Internal key used in MemTable and SSTable.
///
/// The internal key consists of:
/// - User key: The key provided by the user
/// - Sequence number: A monotonically increasing number for MVCC
/// - Value type: what kind of entry this is
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InternalKey {
    user_key: Vec<u8>,
    sequence: SequenceNumber,
    value_type: ValueType,
}

impl InternalKey {
    /// Creates a new InternalKey.
    ///
    /// # Example
    ///
    /// ```rust
    /// use versadb::memtable::{InternalKey, ValueType};
    ///
    /// let key = InternalKey::new(b"user_key".to_vec(), 42, ValueType::Value);
    /// ```
    pub fn new(user_key: Vec<u8>, sequence: SequenceNumber, value_type: ValueType) -> Self {
        Self { user_key, sequence, value_type }
    }

    /// The first internal key for `user_key` visible at `sequence`.
    ///
    /// Everything at or after this key with the same user key has a sequence
    /// number `<= sequence`.
    pub fn seek(user_key: &[u8], sequence: SequenceNumber) -> Self {
        Self::new(user_key.to_vec(), sequence, VALUE_TYPE_FOR_SEEK)
    }

    /// Returns the user key.
    pub fn user_key(&self) -> &[u8] {
        &self.user_key
    }

    /// Returns the sequence number.
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    /// Returns the value type.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Consumes the key and returns the user key.
    pub fn into_user_key(self) -> Vec<u8> {
        self.user_key
    }

    /// Encodes the InternalKey into bytes.
    ///
    /// Format: [user_key][sequence: 8 bytes][type: 1 byte]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.user_key.len() + INTERNAL_KEY_TRAILER);
        buf.extend_from_slice(&self.user_key);
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.push(self.value_type.as_u8());
        buf
    }

    /// Decodes an InternalKey from bytes.
    ///
    /// Returns None if the data is too short or the value type is invalid.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let parsed = ParsedInternalKey::parse(data)?;
        Some(Self {
            user_key: parsed.user_key.to_vec(),
            sequence: parsed.sequence,
            value_type: parsed.value_type,
        })
    }

    /// Returns the total encoded size of this InternalKey.
    pub fn encoded_size(&self) -> usize {
        self.user_key.len() + INTERNAL_KEY_TRAILER
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_parts(
            (&self.user_key, self.sequence, self.value_type),
            (&other.user_key, other.sequence, other.value_type),
        )
    }
}

/// A borrowed view of an encoded internal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    /// The user key.
    pub user_key: &'a [u8],
    /// The sequence number.
    pub sequence: SequenceNumber,
    /// The value type.
    pub value_type: ValueType,
}

impl<'a> ParsedInternalKey<'a> {
    /// Parses an encoded internal key without copying.
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < INTERNAL_KEY_TRAILER {
            return None;
        }
        let user_key_len = data.len() - INTERNAL_KEY_TRAILER;
        let sequence_bytes: [u8; 8] = data[user_key_len..user_key_len + 8].try_into().ok()?;
        let value_type = ValueType::from_u8(data[user_key_len + 8])?;
        Some(Self {
            user_key: &data[..user_key_len],
            sequence: u64::from_le_bytes(sequence_bytes),
            value_type,
        })
    }

    /// Compares against an owned key using internal key order.
    pub fn cmp_key(&self, other: &InternalKey) -> Ordering {
        compare_parts(
            (self.user_key, self.sequence, self.value_type),
            (other.user_key(), other.sequence(), other.value_type()),
        )
    }

    /// Copies into an owned key.
    pub fn to_owned_key(&self) -> InternalKey {
        InternalKey::new(self.user_key.to_vec(), self.sequence, self.value_type)
    }
}

fn compare_parts(a: (&[u8], u64, ValueType), b: (&[u8], u64, ValueType)) -> Ordering {
    a.0.cmp(b.0).then_with(|| b.1.cmp(&a.1)).then_with(|| b.2.cmp(&a.2))
}

/// Compares two encoded internal keys.
///
/// Keys that fail to parse sort by raw bytes after all valid keys; table
/// readers reject such keys before they get this far.
pub fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering {
    match (ParsedInternalKey::parse(a), ParsedInternalKey::parse(b)) {
        (Some(pa), Some(pb)) => compare_parts(
            (pa.user_key, pa.sequence, pa.value_type),
            (pb.user_key, pb.sequence, pb.value_type),
        ),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}
