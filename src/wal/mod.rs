//! Write-Ahead Log (WAL) implementation.
//!
//! The WAL ensures durability by persisting every write batch before it is
//! applied to a MemTable. The same checksummed record framing is reused for
//! the manifest and for query traces.
//!
//! ## Architecture
//!
//! - **Record Format**: Each fragment carries a CRC32 of its type and data
//! - **Fragmentation**: Large payloads are split into First/Middle/Last
//! - **Recovery**: [`LogReader`] distinguishes a torn tail from corruption
//!   so recovery can apply its tolerance policy
//!
//! ## Usage
//!
//! ```rust,no_run
//! use versadb::env::{FileSystem, PosixFileSystem};
//! use versadb::wal::{LogReader, LogWriter, ReadOutcome};
//! use std::io::Cursor;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), versadb::Error> {
//! let fs = PosixFileSystem::new();
//! let path = Path::new("000001.log");
//!
//! let mut writer = LogWriter::new(fs.new_writable_file(path)?, 1);
//! writer.add_record(b"key1:value1")?;
//! writer.sync()?;
//!
//! let mut reader = LogReader::new(Cursor::new(fs.read_file(path)?));
//! while let ReadOutcome::Record(entry) = reader.read_record()? {
//!     println!("Recovered: {:?}", entry);
//! }
//! # Ok(())
//! # }
//! ```

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::{LogReader, ReadOutcome};
pub use record::{Record, RecordType};
pub use writer::LogWriter;

use crate::env::FileSystem;
use crate::error::Result;
use std::io::Cursor;
use std::path::Path;

/// Opens a log file from `fs` for sequential reading.
pub fn open_log_reader(fs: &dyn FileSystem, path: &Path) -> Result<LogReader<Cursor<Vec<u8>>>> {
    let data = fs.read_file(path)?;
    Ok(LogReader::new(Cursor::new(data)))
}

/// Creates a new log file through `fs`.
pub fn create_log_writer(fs: &dyn FileSystem, path: &Path, number: u64) -> Result<LogWriter> {
    Ok(LogWriter::new(fs.new_writable_file(path)?, number))
}
