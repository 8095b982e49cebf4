//! Merge operators fold merge operands into a value at read time.

use std::fmt;

/// Combines a base value with merge operands.
///
/// Operands are passed oldest first. Returning `None` signals that the
/// operands could not be combined; the read then fails with a corruption
/// error.
pub trait MergeOperator: Send + Sync + fmt::Debug {
    /// Name persisted in the OPTIONS file.
    fn name(&self) -> &str;

    /// Merges `operands` (oldest to newest) on top of `existing`.
    fn full_merge(&self, key: &[u8], existing: Option<&[u8]>, operands: &[&[u8]]) -> Option<Vec<u8>>;
}

/// Appends operands to the existing value, separated by a delimiter.
///
/// `merge(k, "v1")` then `merge(k, "v2")` reads back as `"v1,v2"`.
#[derive(Debug, Clone)]
pub struct StringAppendOperator {
    delimiter: u8,
}

impl StringAppendOperator {
    /// Creates an operator using `delimiter` between parts.
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }
}

impl Default for StringAppendOperator {
    fn default() -> Self {
        Self::new(b',')
    }
}

impl MergeOperator for StringAppendOperator {
    fn name(&self) -> &str {
        "StringAppendOperator"
    }

    fn full_merge(&self, _key: &[u8], existing: Option<&[u8]>, operands: &[&[u8]]) -> Option<Vec<u8>> {
        let total: usize = existing.map_or(0, |v| v.len() + 1) + operands.iter().map(|o| o.len() + 1).sum::<usize>();
        let mut out = Vec::with_capacity(total);
        if let Some(base) = existing {
            out.extend_from_slice(base);
        }
        for (i, operand) in operands.iter().enumerate() {
            if i > 0 || existing.is_some() {
                out.push(self.delimiter);
            }
            out.extend_from_slice(operand);
        }
        Some(out)
    }
}

/// Treats values as little-endian u64 counters and adds operands to them.
#[derive(Debug, Clone, Copy, Default)]
pub struct UInt64AddOperator;

impl UInt64AddOperator {
    fn decode(bytes: &[u8]) -> Option<u64> {
        let arr: [u8; 8] = bytes.try_into().ok()?;
        Some(u64::from_le_bytes(arr))
    }
}

impl MergeOperator for UInt64AddOperator {
    fn name(&self) -> &str {
        "UInt64AddOperator"
    }

    fn full_merge(&self, _key: &[u8], existing: Option<&[u8]>, operands: &[&[u8]]) -> Option<Vec<u8>> {
        let mut sum = match existing {
            Some(v) => Self::decode(v)?,
            None => 0,
        };
        for operand in operands {
            sum = sum.wrapping_add(Self::decode(operand)?);
        }
        Some(sum.to_le_bytes().to_vec())
    }
}
