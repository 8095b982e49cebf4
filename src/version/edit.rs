//! Version edits: the records stored in the manifest.

use super::FileMetaData;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A version edit describes changes to one column family's Version and to
/// database-wide counters.
///
/// Edits are bincode-encoded and framed by the log writer in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEdit {
    /// Column family the file changes apply to
    pub column_family: u32,
    /// Creates the column family with this name
    pub column_family_add: Option<String>,
    /// Drops the column family
    pub column_family_drop: bool,
    /// Database id, when mirrored in the manifest
    pub db_id: Option<String>,
    /// WAL files below this number hold no unflushed data for the family
    pub log_number: Option<u64>,
    /// Next file number to allocate
    pub next_file_number: Option<u64>,
    /// Last sequence number persisted
    pub last_sequence: Option<u64>,
    /// Largest column family id ever assigned
    pub max_column_family: Option<u32>,
    /// Files added, with their levels
    pub new_files: Vec<FileMetaData>,
    /// Files removed as (level, file number)
    pub deleted_files: Vec<(usize, u64)>,
}

impl VersionEdit {
    /// An empty edit for `column_family`.
    pub fn new(column_family: u32) -> Self {
        Self { column_family, ..Default::default() }
    }

    /// Add a new table file
    pub fn add_file(&mut self, meta: FileMetaData) {
        self.new_files.push(meta);
    }

    /// Delete a table file
    pub fn delete_file(&mut self, level: usize, number: u64) {
        self.deleted_files.push((level, number));
    }

    /// Set the column family's log number
    pub fn set_log_number(&mut self, number: u64) {
        self.log_number = Some(number);
    }

    /// Set the next file number
    pub fn set_next_file_number(&mut self, number: u64) {
        self.next_file_number = Some(number);
    }

    /// Set the last sequence number
    pub fn set_last_sequence(&mut self, sequence: u64) {
        self.last_sequence = Some(sequence);
    }

    /// True if the edit changes the file layout.
    pub fn has_file_changes(&self) -> bool {
        !self.new_files.is_empty() || !self.deleted_files.is_empty()
    }

    /// Encodes the edit for the manifest.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decodes a manifest record.
    pub fn decode(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| Error::corruption(format!("undecodable version edit: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::file_meta::test_meta;

    #[test]
    fn test_edit_encoding() {
        let mut edit = VersionEdit::new(3);
        edit.add_file(test_meta(12, 0, "a", "k", (4, 9)));
        edit.delete_file(1, 7);
        edit.set_log_number(11);
        edit.set_next_file_number(13);
        edit.set_last_sequence(9);
        assert!(edit.has_file_changes());

        let decoded = VersionEdit::decode(&edit.encode().unwrap()).unwrap();
        assert_eq!(decoded, edit);
        assert!(!VersionEdit::new(0).has_file_changes());
    }

    #[test]
    fn test_decode_garbage() {
        let err = VersionEdit::decode(&[0xFF; 3]).unwrap_err();
        assert!(err.is_corruption());
    }
}
