//! Storage and time environment.
//!
//! Every byte VersaDB reads or writes goes through a [`FileSystem`], and every
//! deadline and snapshot timestamp comes from a [`Clock`]. Both are injected
//! through [`Options`](crate::Options), which is how tests substitute fault- and
//! delay-injecting doubles without any global hooks.
//!
//! ## Timeouts
//!
//! Reads accept an [`IoOptions`] carrying the remaining time budget for that
//! call. A file system that honours timeouts returns
//! [`Error::TimedOut`](crate::Error::TimedOut) when the budget cannot be met.

pub mod clock;
pub mod posix;

pub use clock::{Clock, SystemClock};
pub use posix::PosixFileSystem;

use crate::error::Result;
use bytes::Bytes;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Per-call I/O options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoOptions {
    /// Remaining time budget for this call. `None` means unbounded.
    pub timeout: Option<Duration>,
}

impl IoOptions {
    /// Options with no timeout.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Options with the given timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout: Some(timeout) }
    }
}

/// One positioned read inside a [`RandomAccessFile::multi_read`] batch.
#[derive(Debug)]
pub struct ReadRequest {
    /// Byte offset in the file.
    pub offset: u64,
    /// Number of bytes to read.
    pub len: usize,
    /// Filled in by `multi_read`.
    pub result: Option<Result<Bytes>>,
}

impl ReadRequest {
    /// Creates an unfilled request.
    pub fn new(offset: u64, len: usize) -> Self {
        Self { offset, len, result: None }
    }
}

/// A file opened for positioned reads from many threads.
pub trait RandomAccessFile: Send + Sync {
    /// Reads exactly `len` bytes at `offset`.
    fn read(&self, offset: u64, len: usize, opts: &IoOptions) -> Result<Bytes>;

    /// Serves a batch of reads with one call.
    ///
    /// Each request's `result` is filled in individually. The default
    /// implementation issues the reads one after another; once one of them
    /// times out, the remaining requests are failed with the same error
    /// without touching the device.
    fn multi_read(&self, reqs: &mut [ReadRequest], opts: &IoOptions) {
        let mut timed_out: Option<crate::error::Error> = None;
        for req in reqs.iter_mut() {
            if let Some(ref err) = timed_out {
                req.result = Some(Err(err.clone()));
                continue;
            }
            let result = self.read(req.offset, req.len, opts);
            if let Err(ref e) = result {
                if e.is_timed_out() {
                    timed_out = Some(e.clone());
                }
            }
            req.result = Some(result);
        }
    }

    /// Returns the size of the file in bytes.
    fn size(&self) -> Result<u64>;
}

/// A file opened for sequential appends.
pub trait WritableFile: Send {
    /// Appends data to the end of the file.
    fn append(&mut self, data: &[u8]) -> Result<()>;

    /// Pushes buffered data to the operating system.
    fn flush(&mut self) -> Result<()>;

    /// Flushes and makes the data durable.
    fn sync(&mut self) -> Result<()>;

    /// Bytes appended so far.
    fn size(&self) -> u64;
}

/// An exclusive lock on a file, released when dropped.
pub trait FileLock: Send + Sync + fmt::Debug {
    /// Path of the locked file.
    fn path(&self) -> &Path;
}

/// The storage capability consumed by the engine.
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Opens an existing file for positioned reads.
    fn new_random_access_file(&self, path: &Path) -> Result<Arc<dyn RandomAccessFile>>;

    /// Creates (or truncates) a file for appending.
    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>>;

    /// Reads a whole file into memory.
    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// Returns true if the path exists.
    fn file_exists(&self, path: &Path) -> bool;

    /// Returns the size of a file.
    fn file_size(&self, path: &Path) -> Result<u64>;

    /// Lists the file names (not paths) inside a directory.
    fn children(&self, dir: &Path) -> Result<Vec<String>>;

    /// Deletes a file.
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Atomically renames a file, replacing the target.
    fn rename_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Creates a directory and its parents.
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Creates `path` if needed and locks it exclusively.
    ///
    /// Fails without blocking if another handle already holds the lock,
    /// including one in the same process.
    fn lock_file(&self, path: &Path) -> Result<Box<dyn FileLock>>;

    /// Releases a lock taken by [`lock_file`](Self::lock_file).
    fn unlock_file(&self, lock: Box<dyn FileLock>) -> Result<()> {
        drop(lock);
        Ok(())
    }

    /// Whether `IoOptions::timeout` is honoured by this file system.
    fn supports_timeouts(&self) -> bool {
        false
    }

    /// Writes a whole file, optionally syncing it.
    fn write_file(&self, path: &Path, data: &[u8], sync: bool) -> Result<()> {
        let mut file = self.new_writable_file(path)?;
        file.append(data)?;
        if sync {
            file.sync()
        } else {
            file.flush()
        }
    }
}

/// Returns the default file system.
pub fn default_file_system() -> Arc<dyn FileSystem> {
    Arc::new(PosixFileSystem::new())
}

/// Returns the default clock.
pub fn default_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
