//! Query tracing and replay.
//!
//! While a trace is active every write batch, Get and MultiGet is appended
//! to the trace file as a [`TraceRecord`], timestamped with the database
//! clock. Records are bincode encoded and framed like WAL records, so a
//! crash can at most tear the final record.
//!
//! A [`Replayer`] reads a trace back and re-executes its records against a
//! database, reporting the outcome and latency of each one.

use crate::config::{ReadOptions, WriteOptions};
use crate::env::{Clock, FileSystem};
use crate::error::{Error, Result};
use crate::wal::{create_log_writer, open_log_reader, LogReader, LogWriter, ReadOutcome};
use crate::write_batch::WriteBatch;
use crate::DB;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Format version written in the trace header.
pub const TRACE_FORMAT_VERSION: u32 = 1;

/// One entry of a trace file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceRecord {
    /// First record of every trace.
    Header {
        /// Trace format version
        version: u32,
        /// Id of the traced database
        db_id: String,
        /// When tracing started, in microseconds of the database clock
        timestamp_micros: u64,
    },
    /// A write batch in its WAL encoding.
    Write {
        /// When the write was issued
        timestamp_micros: u64,
        /// Encoded batch
        batch: Vec<u8>,
    },
    /// A single-key lookup.
    Get {
        /// When the lookup was issued
        timestamp_micros: u64,
        /// Column family id
        cf_id: u32,
        /// Key looked up
        key: Vec<u8>,
    },
    /// A batched lookup.
    MultiGet {
        /// When the lookup was issued
        timestamp_micros: u64,
        /// Column family id of each key
        cf_ids: Vec<u32>,
        /// Keys looked up
        keys: Vec<Vec<u8>>,
    },
}

impl TraceRecord {
    /// Timestamp of the record in microseconds.
    pub fn timestamp_micros(&self) -> u64 {
        match self {
            TraceRecord::Header { timestamp_micros, .. }
            | TraceRecord::Write { timestamp_micros, .. }
            | TraceRecord::Get { timestamp_micros, .. }
            | TraceRecord::MultiGet { timestamp_micros, .. } => *timestamp_micros,
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn decode(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

/// Appends records to an open trace file.
pub(crate) struct Tracer {
    writer: LogWriter,
    clock: Arc<dyn Clock>,
    records: u64,
}

impl Tracer {
    /// Creates the trace file at `path` and writes its header.
    pub fn create(fs: &dyn FileSystem, path: &Path, clock: Arc<dyn Clock>, db_id: &str) -> Result<Self> {
        let writer = create_log_writer(fs, path, 0)?;
        let mut tracer = Self { writer, clock, records: 0 };
        let header = TraceRecord::Header {
            version: TRACE_FORMAT_VERSION,
            db_id: db_id.to_string(),
            timestamp_micros: tracer.now_micros(),
        };
        tracer.append(&header)?;
        log::info!("Started trace at {}", path.display());
        Ok(tracer)
    }

    fn now_micros(&self) -> u64 {
        self.clock.now().as_micros() as u64
    }

    fn append(&mut self, record: &TraceRecord) -> Result<()> {
        self.writer.add_record(&record.encode()?)?;
        self.records += 1;
        Ok(())
    }

    pub fn record_write(&mut self, batch: &WriteBatch, sequence: u64) -> Result<()> {
        let record = TraceRecord::Write { timestamp_micros: self.now_micros(), batch: batch.encode(sequence) };
        self.append(&record)
    }

    pub fn record_get(&mut self, cf_id: u32, key: &[u8]) -> Result<()> {
        let record = TraceRecord::Get { timestamp_micros: self.now_micros(), cf_id, key: key.to_vec() };
        self.append(&record)
    }

    pub fn record_multi_get(&mut self, keys: &[(u32, &[u8])]) -> Result<()> {
        let record = TraceRecord::MultiGet {
            timestamp_micros: self.now_micros(),
            cf_ids: keys.iter().map(|(cf, _)| *cf).collect(),
            keys: keys.iter().map(|(_, k)| k.to_vec()).collect(),
        };
        self.append(&record)
    }

    /// Syncs the trace and closes it.
    pub fn finish(mut self) -> Result<()> {
        self.writer.sync()?;
        log::info!("Finished trace with {} records", self.records);
        Ok(())
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer").field("records", &self.records).finish()
    }
}

/// What re-executing one record produced.
#[derive(Debug, Clone)]
pub enum TraceOutcome {
    /// Writes report only a status.
    StatusOnly(Result<()>),
    /// Result of a Get.
    SingleValue(Result<Option<Vec<u8>>>),
    /// Per-key results of a MultiGet.
    MultiValues(Vec<Result<Option<Vec<u8>>>>),
}

/// Outcome and timing of one replayed record.
#[derive(Debug, Clone)]
pub struct TraceExecutionResult {
    /// Start of execution on the database clock
    pub start: Duration,
    /// End of execution on the database clock
    pub end: Duration,
    /// What the operation returned
    pub outcome: TraceOutcome,
}

impl TraceExecutionResult {
    /// Time the operation took.
    pub fn latency(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// Re-executes a trace against a database.
///
/// # Example
///
/// ```rust,no_run
/// use versadb::{DB, Options, Replayer};
///
/// # fn main() -> Result<(), versadb::Error> {
/// let db = DB::open("./replica", Options::default())?;
/// let mut replayer = Replayer::new(&db, "./queries.trace")?;
/// for result in replayer.replay()? {
///     println!("{:?} in {:?}", result.outcome, result.latency());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Replayer<'a> {
    db: &'a DB,
    reader: LogReader<Cursor<Vec<u8>>>,
    header_timestamp: u64,
    db_id: String,
}

impl<'a> Replayer<'a> {
    /// Opens the trace at `path` and validates its header.
    pub fn new<P: AsRef<Path>>(db: &'a DB, path: P) -> Result<Self> {
        let fs = db.file_system();
        let mut reader = open_log_reader(fs.as_ref(), path.as_ref())?;
        let header = match reader.read_record()? {
            ReadOutcome::Record(data) => TraceRecord::decode(&data)?,
            _ => return Err(Error::corruption("trace has no header")),
        };
        match header {
            TraceRecord::Header { version, db_id, timestamp_micros } => {
                if version != TRACE_FORMAT_VERSION {
                    return Err(Error::not_supported(format!("trace format version {}", version)));
                }
                Ok(Self { db, reader, header_timestamp: timestamp_micros, db_id })
            }
            _ => Err(Error::corruption("trace does not start with a header")),
        }
    }

    /// When tracing started, in microseconds.
    pub fn header_timestamp(&self) -> u64 {
        self.header_timestamp
    }

    /// Id of the database the trace was taken from.
    pub fn traced_db_id(&self) -> &str {
        &self.db_id
    }

    /// Reads the next record; `None` at the end of the trace.
    ///
    /// A torn final record ends the trace quietly.
    pub fn next_record(&mut self) -> Result<Option<TraceRecord>> {
        match self.reader.read_record()? {
            ReadOutcome::Record(data) => TraceRecord::decode(&data).map(Some),
            ReadOutcome::Eof | ReadOutcome::TruncatedTail { .. } => Ok(None),
            ReadOutcome::Corrupt { offset, reason } => {
                Err(Error::corruption(format!("trace record at offset {}: {}", offset, reason)))
            }
        }
    }

    /// Runs one record against the database.
    pub fn execute(&self, record: &TraceRecord) -> Result<TraceExecutionResult> {
        let clock = self.db.clock();
        let start = clock.now();
        let outcome = match record {
            TraceRecord::Header { .. } => return Err(Error::invalid_argument("a trace header cannot be executed")),
            TraceRecord::Write { batch, .. } => {
                let (_, batch) = WriteBatch::decode(batch)?;
                TraceOutcome::StatusOnly(self.db.write_opt(&WriteOptions::default(), &batch))
            }
            TraceRecord::Get { cf_id, key, .. } => {
                TraceOutcome::SingleValue(self.db.get_by_id(&ReadOptions::default(), *cf_id, key))
            }
            TraceRecord::MultiGet { cf_ids, keys, .. } => {
                let pairs: Vec<(u32, &[u8])> = cf_ids.iter().copied().zip(keys.iter().map(Vec::as_slice)).collect();
                TraceOutcome::MultiValues(self.db.multi_get_by_id(&ReadOptions::default(), &pairs))
            }
        };
        Ok(TraceExecutionResult { start, end: clock.now(), outcome })
    }

    /// Executes every remaining record in order.
    pub fn replay(&mut self) -> Result<Vec<TraceExecutionResult>> {
        let mut results = Vec::new();
        while let Some(record) = self.next_record()? {
            results.push(self.execute(&record)?);
        }
        log::info!("Replayed {} trace records", results.len());
        Ok(results)
    }
}

impl std::fmt::Debug for Replayer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replayer")
            .field("db_id", &self.db_id)
            .field("header_timestamp", &self.header_timestamp)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{PosixFileSystem, SystemClock};
    use tempfile::TempDir;

    #[test]
    fn test_tracer_writes_header_first() {
        let dir = TempDir::new().unwrap();
        let fs = PosixFileSystem::new();
        let path = dir.path().join("ops.trace");

        let mut tracer = Tracer::create(&fs, &path, Arc::new(SystemClock), "db-1").unwrap();
        let mut batch = WriteBatch::new();
        batch.put(b"k", b"v");
        tracer.record_write(&batch, 5).unwrap();
        tracer.record_get(0, b"k").unwrap();
        tracer.record_multi_get(&[(0, b"a".as_slice()), (2, b"b".as_slice())]).unwrap();
        tracer.finish().unwrap();

        let mut reader = open_log_reader(&fs, &path).unwrap();
        let mut records = Vec::new();
        while let ReadOutcome::Record(data) = reader.read_record().unwrap() {
            records.push(TraceRecord::decode(&data).unwrap());
        }
        assert_eq!(records.len(), 4);
        assert!(matches!(&records[0], TraceRecord::Header { db_id, version: TRACE_FORMAT_VERSION, .. } if db_id == "db-1"));
        match &records[1] {
            TraceRecord::Write { batch: encoded, .. } => {
                let (seq, decoded) = WriteBatch::decode(encoded).unwrap();
                assert_eq!(seq, 5);
                assert_eq!(decoded.len(), 1);
            }
            other => panic!("unexpected record {:?}", other),
        }
        assert!(matches!(&records[2], TraceRecord::Get { cf_id: 0, key, .. } if key == b"k"));
        assert!(matches!(&records[3], TraceRecord::MultiGet { cf_ids, .. } if cf_ids == &vec![0, 2]));
        assert!(records.windows(2).all(|w| w[0].timestamp_micros() <= w[1].timestamp_micros()));
    }
}
