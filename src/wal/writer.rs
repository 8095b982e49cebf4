//! Log writer: splits payloads into checksummed fragments.

use super::record::{Record, RecordType, MAX_RECORD_SIZE};
use crate::env::WritableFile;
use crate::error::Result;
use bytes::BytesMut;

/// Appends records to a log file.
///
/// Used for the WAL, the manifest and query traces.
pub struct LogWriter {
    file: Box<dyn WritableFile>,
    number: u64,
    buf: BytesMut,
}

impl LogWriter {
    /// Wraps a freshly created file.
    ///
    /// # Arguments
    ///
    /// * `file` - The destination, opened through the database file system
    /// * `number` - The file number this log was created with
    pub fn new(file: Box<dyn WritableFile>, number: u64) -> Self {
        Self { file, number, buf: BytesMut::new() }
    }

    /// Append a payload to the log
    ///
    /// Payloads larger than `MAX_RECORD_SIZE` are split into fragments.
    pub fn add_record(&mut self, data: &[u8]) -> Result<()> {
        self.buf.clear();
        if data.is_empty() {
            Record::encode_fragment(&mut self.buf, RecordType::Full, data);
        } else {
            let mut chunks = data.chunks(MAX_RECORD_SIZE).peekable();
            let mut first = true;
            while let Some(chunk) = chunks.next() {
                let record_type = RecordType::for_fragment(first, chunks.peek().is_none());
                Record::encode_fragment(&mut self.buf, record_type, chunk);
                first = false;
            }
        }
        self.file.append(&self.buf)?;
        self.file.flush()
    }

    /// Sync the log to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync()
    }

    /// Bytes written so far.
    pub fn file_size(&self) -> u64 {
        self.file.size()
    }

    /// The file number of this log.
    pub fn number(&self) -> u64 {
        self.number
    }
}

impl std::fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter")
            .field("number", &self.number)
            .field("file_size", &self.file.size())
            .finish()
    }
}
