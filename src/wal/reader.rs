//! Log reader used by recovery.

use super::record::{Record, RecordType, HEADER_SIZE};
use crate::error::{Error, Result};
use std::io::{self, Read};

/// What the reader found at the current position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete, verified payload.
    Record(Vec<u8>),
    /// Clean end of the log.
    Eof,
    /// The log ends in the middle of a record, as after a torn write.
    TruncatedTail {
        /// Offset of the incomplete record.
        offset: u64,
    },
    /// A record failed verification.
    Corrupt {
        /// Offset of the bad record.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },
}

/// Reads payloads back from a log written by [`LogWriter`](super::LogWriter).
pub struct LogReader<R: Read> {
    reader: R,
    /// Current read position
    position: u64,
}

impl<R: Read> LogReader<R> {
    /// Reads from the start of `reader`.
    pub fn new(reader: R) -> Self {
        Self { reader, position: 0 }
    }

    /// Read the next complete payload, reassembling fragments.
    ///
    /// Only failures of the underlying reader are returned as errors;
    /// damaged data is reported through [`ReadOutcome`].
    pub fn read_record(&mut self) -> Result<ReadOutcome> {
        let mut assembled: Option<(u64, Vec<u8>)> = None;

        loop {
            let offset = self.position;
            let fragment = match self.read_fragment()? {
                Fragment::Record(record) => record,
                Fragment::Eof => {
                    return Ok(match assembled {
                        Some((start, _)) => ReadOutcome::TruncatedTail { offset: start },
                        None => ReadOutcome::Eof,
                    });
                }
                Fragment::Truncated => {
                    let start = assembled.map_or(offset, |(start, _)| start);
                    return Ok(ReadOutcome::TruncatedTail { offset: start });
                }
                Fragment::Corrupt(reason) => return Ok(ReadOutcome::Corrupt { offset, reason }),
            };

            match fragment.record_type {
                RecordType::Full if assembled.is_none() => return Ok(ReadOutcome::Record(fragment.data)),
                RecordType::First if assembled.is_none() => assembled = Some((offset, fragment.data)),
                RecordType::Middle if assembled.is_some() => {
                    if let Some((_, data)) = assembled.as_mut() {
                        data.extend_from_slice(&fragment.data);
                    }
                }
                RecordType::Last if assembled.is_some() => {
                    if let Some((_, mut data)) = assembled.take() {
                        data.extend_from_slice(&fragment.data);
                        return Ok(ReadOutcome::Record(data));
                    }
                }
                record_type => {
                    return Ok(ReadOutcome::Corrupt {
                        offset,
                        reason: format!("unexpected {:?} fragment", record_type),
                    });
                }
            }
        }
    }

    fn read_fragment(&mut self) -> Result<Fragment> {
        let mut header = [0u8; HEADER_SIZE];
        let n = read_fully(&mut self.reader, &mut header)?;
        if n == 0 {
            return Ok(Fragment::Eof);
        }
        if n < HEADER_SIZE {
            return Ok(Fragment::Truncated);
        }

        let length = u16::from_le_bytes([header[4], header[5]]) as usize;
        let mut buffer = vec![0u8; HEADER_SIZE + length];
        buffer[..HEADER_SIZE].copy_from_slice(&header);
        let n = read_fully(&mut self.reader, &mut buffer[HEADER_SIZE..])?;
        if n < length {
            return Ok(Fragment::Truncated);
        }
        self.position += buffer.len() as u64;

        match Record::decode(&buffer) {
            Ok(record) => Ok(Fragment::Record(record)),
            Err(e) if e.is_corruption() => Ok(Fragment::Corrupt(e.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Get the current read position
    pub fn position(&self) -> u64 {
        self.position
    }
}

enum Fragment {
    Record(Record),
    Eof,
    Truncated,
    Corrupt(String),
}

fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::from(e)),
        }
    }
    Ok(filled)
}
