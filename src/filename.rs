//! Names of the files that make up a database directory.
//!
//! ```text
//! 000007.log        write-ahead log
//! 000012.sst        table file
//! MANIFEST-000005   version edit log
//! CURRENT           name of the live manifest
//! IDENTITY          database id
//! LOCK              held by the process that has the database open
//! OPTIONS-000009    options in effect at the last open
//! ```

use crate::env::FileSystem;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Kinds of file found in a database directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Write-ahead log.
    Log(u64),
    /// Table file.
    Table(u64),
    /// Manifest.
    Manifest(u64),
    /// Pointer to the live manifest.
    Current,
    /// Database id.
    Identity,
    /// Exclusive lock of the open database.
    Lock,
    /// Persisted options.
    Options(u64),
    /// Leftover of an interrupted atomic rename.
    Temp(u64),
    /// Query trace written by the tracer.
    Trace,
}

/// Generate a WAL filename for a given file number
pub fn log_file_name(number: u64) -> String {
    format!("{:06}.log", number)
}

/// Generate a table filename for a given file number
pub fn table_file_name(number: u64) -> String {
    format!("{:06}.sst", number)
}

/// Generate a manifest filename for a given file number
pub fn manifest_file_name(number: u64) -> String {
    format!("MANIFEST-{:06}", number)
}

/// Generate an options filename for a given file number
pub fn options_file_name(number: u64) -> String {
    format!("OPTIONS-{:06}", number)
}

/// Generate a temp filename for a given file number
pub fn temp_file_name(number: u64) -> String {
    format!("{:06}.dbtmp", number)
}

/// Name of the file holding the live manifest's name.
pub const CURRENT_FILE_NAME: &str = "CURRENT";

/// Name of the file holding the database id.
pub const IDENTITY_FILE_NAME: &str = "IDENTITY";

/// Name of the file locked by the process writing the database.
pub const LOCK_FILE_NAME: &str = "LOCK";

/// Full path of the lock file.
pub fn lock_file_path(dir: &Path) -> PathBuf {
    dir.join(LOCK_FILE_NAME)
}

/// Full path of a WAL file.
pub fn log_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(log_file_name(number))
}

/// Full path of a table file.
pub fn table_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(table_file_name(number))
}

/// Full path of a manifest file.
pub fn manifest_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(manifest_file_name(number))
}

/// Parse a filename from the database directory.
pub fn parse_file_name(name: &str) -> Option<FileType> {
    match name {
        CURRENT_FILE_NAME => return Some(FileType::Current),
        IDENTITY_FILE_NAME => return Some(FileType::Identity),
        LOCK_FILE_NAME => return Some(FileType::Lock),
        _ => {}
    }
    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        return parse_number(rest).map(FileType::Manifest);
    }
    if let Some(rest) = name.strip_prefix("OPTIONS-") {
        return parse_number(rest).map(FileType::Options);
    }
    if let Some(rest) = name.strip_suffix(".log") {
        return parse_number(rest).map(FileType::Log);
    }
    if let Some(rest) = name.strip_suffix(".sst") {
        return parse_number(rest).map(FileType::Table);
    }
    if let Some(rest) = name.strip_suffix(".dbtmp") {
        return parse_number(rest).map(FileType::Temp);
    }
    if name.ends_with(".trace") {
        return Some(FileType::Trace);
    }
    None
}

fn parse_number(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Atomically points CURRENT at the given manifest.
///
/// The new content is written to a temp file, synced, then renamed over
/// CURRENT.
pub fn set_current_file(fs: &dyn FileSystem, dir: &Path, manifest_number: u64) -> Result<()> {
    let contents = format!("{}\n", manifest_file_name(manifest_number));
    let tmp = dir.join(temp_file_name(manifest_number));
    fs.write_file(&tmp, contents.as_bytes(), true)?;
    if let Err(e) = fs.rename_file(&tmp, &dir.join(CURRENT_FILE_NAME)) {
        let _ = fs.remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Reads CURRENT and returns the manifest number it names.
pub fn read_current_file(fs: &dyn FileSystem, dir: &Path) -> Result<u64> {
    let data = fs.read_file(&dir.join(CURRENT_FILE_NAME))?;
    let text = String::from_utf8(data)
        .map_err(|_| Error::corruption("CURRENT file is not valid UTF-8"))?;
    let name = text.trim_end_matches('\n');
    match parse_file_name(name) {
        Some(FileType::Manifest(number)) => Ok(number),
        _ => Err(Error::corruption(format!("CURRENT names an invalid manifest: {:?}", name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PosixFileSystem;
    use tempfile::TempDir;

    #[test]
    fn test_file_names() {
        assert_eq!(log_file_name(1), "000001.log");
        assert_eq!(table_file_name(123), "000123.sst");
        assert_eq!(manifest_file_name(999999), "MANIFEST-999999");
        assert_eq!(options_file_name(7), "OPTIONS-000007");
    }

    #[test]
    fn test_parse_file_name() {
        assert_eq!(parse_file_name("000001.log"), Some(FileType::Log(1)));
        assert_eq!(parse_file_name("000123.sst"), Some(FileType::Table(123)));
        assert_eq!(parse_file_name("MANIFEST-001000"), Some(FileType::Manifest(1000)));
        assert_eq!(parse_file_name("CURRENT"), Some(FileType::Current));
        assert_eq!(parse_file_name("IDENTITY"), Some(FileType::Identity));
        assert_eq!(parse_file_name("LOCK"), Some(FileType::Lock));
        assert_eq!(parse_file_name("OPTIONS-000004"), Some(FileType::Options(4)));
        assert_eq!(parse_file_name("000009.dbtmp"), Some(FileType::Temp(9)));
        assert_eq!(parse_file_name("invalid"), None);
        assert_eq!(parse_file_name("123.txt"), None);
        assert_eq!(parse_file_name("-1.sst"), None);
        assert_eq!(parse_file_name("MANIFEST-"), None);
    }

    #[test]
    fn test_current_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let fs = PosixFileSystem::new();

        set_current_file(&fs, dir.path(), 42).unwrap();
        assert_eq!(read_current_file(&fs, dir.path()).unwrap(), 42);

        set_current_file(&fs, dir.path(), 43).unwrap();
        assert_eq!(read_current_file(&fs, dir.path()).unwrap(), 43);
        assert!(!fs.file_exists(&dir.path().join(temp_file_name(43))));
    }

    #[test]
    fn test_current_file_garbage() {
        let dir = TempDir::new().unwrap();
        let fs = PosixFileSystem::new();
        fs.write_file(&dir.path().join(CURRENT_FILE_NAME), b"nonsense\n", false).unwrap();
        assert!(read_current_file(&fs, dir.path()).unwrap_err().is_corruption());
    }
}
