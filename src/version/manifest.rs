//! Manifest files: the log of version edits.
//!
//! A manifest is a sequence of bincode-encoded [`VersionEdit`]s framed by the
//! WAL record format. A new manifest always starts with a full snapshot of
//! the database state, so any single manifest is self-contained.

use super::VersionEdit;
use crate::env::FileSystem;
use crate::error::Result;
use crate::filename::{manifest_file_path, set_current_file};
use crate::wal::{create_log_writer, open_log_reader, LogWriter, ReadOutcome};
use std::path::Path;

/// Appends edits to the live manifest.
#[derive(Debug)]
pub struct ManifestWriter {
    log: LogWriter,
}

impl ManifestWriter {
    /// Creates manifest `number`, writes `snapshot` into it, syncs it and
    /// points CURRENT at it.
    pub fn create(fs: &dyn FileSystem, dir: &Path, number: u64, snapshot: &[VersionEdit]) -> Result<Self> {
        let path = manifest_file_path(dir, number);
        let mut log = create_log_writer(fs, &path, number)?;
        for edit in snapshot {
            log.add_record(&edit.encode()?)?;
        }
        log.sync()?;
        set_current_file(fs, dir, number)?;
        log::info!("Created manifest {:?} with {} snapshot edits", path, snapshot.len());
        Ok(Self { log })
    }

    /// Appends and syncs one edit.
    pub fn add_edit(&mut self, edit: &VersionEdit) -> Result<()> {
        self.log.add_record(&edit.encode()?)?;
        self.log.sync()
    }

    /// Manifest file number.
    pub fn number(&self) -> u64 {
        self.log.number()
    }

    /// Bytes written so far.
    pub fn file_size(&self) -> u64 {
        self.log.file_size()
    }
}

/// How reading a manifest ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEnd {
    /// Every record was read.
    Clean,
    /// The final record was cut short.
    TruncatedTail,
    /// A record failed its checksum or did not decode.
    Corrupt(String),
}

/// The decodable prefix of a manifest.
#[derive(Debug)]
pub struct ManifestLog {
    /// Edits in file order
    pub edits: Vec<VersionEdit>,
    /// Why reading stopped
    pub end: ManifestEnd,
}

/// Reads every decodable edit from a manifest.
pub fn read_manifest(fs: &dyn FileSystem, path: &Path) -> Result<ManifestLog> {
    let mut reader = open_log_reader(fs, path)?;
    let mut edits = Vec::new();
    loop {
        match reader.read_record()? {
            ReadOutcome::Record(data) => match VersionEdit::decode(&data) {
                Ok(edit) => edits.push(edit),
                Err(e) => return Ok(ManifestLog { edits, end: ManifestEnd::Corrupt(e.to_string()) }),
            },
            ReadOutcome::Eof => return Ok(ManifestLog { edits, end: ManifestEnd::Clean }),
            ReadOutcome::TruncatedTail { offset } => {
                log::warn!("Manifest {:?} ends in a torn record at offset {}", path, offset);
                return Ok(ManifestLog { edits, end: ManifestEnd::TruncatedTail });
            }
            ReadOutcome::Corrupt { offset, reason } => {
                return Ok(ManifestLog {
                    edits,
                    end: ManifestEnd::Corrupt(format!("offset {}: {}", offset, reason)),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PosixFileSystem;
    use crate::filename::read_current_file;
    use crate::version::file_meta::test_meta;
    use tempfile::TempDir;

    #[test]
    fn test_create_append_read() {
        let dir = TempDir::new().unwrap();
        let fs = PosixFileSystem::new();

        let mut snapshot = VersionEdit::new(0);
        snapshot.set_next_file_number(5);
        let mut writer = ManifestWriter::create(&fs, dir.path(), 4, &[snapshot.clone()]).unwrap();
        assert_eq!(read_current_file(&fs, dir.path()).unwrap(), 4);

        let mut edit = VersionEdit::new(0);
        edit.add_file(test_meta(6, 0, "a", "b", (1, 2)));
        writer.add_edit(&edit).unwrap();
        assert!(writer.file_size() > 0);

        let log = read_manifest(&fs, &manifest_file_path(dir.path(), 4)).unwrap();
        assert_eq!(log.end, ManifestEnd::Clean);
        assert_eq!(log.edits, vec![snapshot, edit]);
    }

    #[test]
    fn test_torn_and_corrupt_manifest() {
        let dir = TempDir::new().unwrap();
        let fs = PosixFileSystem::new();
        let path = manifest_file_path(dir.path(), 2);
        let mut writer = ManifestWriter::create(&fs, dir.path(), 2, &[VersionEdit::new(0)]).unwrap();
        writer.add_edit(&VersionEdit::new(1)).unwrap();
        drop(writer);

        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - 2]).unwrap();
        let log = read_manifest(&fs, &path).unwrap();
        assert_eq!(log.edits.len(), 1);
        assert_eq!(log.end, ManifestEnd::TruncatedTail);

        let mut damaged = data.clone();
        damaged[8] ^= 0xFF;
        std::fs::write(&path, &damaged).unwrap();
        let log = read_manifest(&fs, &path).unwrap();
        assert!(log.edits.is_empty());
        assert!(matches!(log.end, ManifestEnd::Corrupt(_)));
    }
}
