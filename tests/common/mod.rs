// Shared helpers for the integration tests.
//
// The doubles implement `FileSystem` and `Clock` directly and are injected
// through `Options`.

#![allow(dead_code)]

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Once};
use std::time::Duration;
use versadb::env::{FileLock, IoOptions, PosixFileSystem, RandomAccessFile, WritableFile};
use versadb::{Clock, Error, FileSystem, Options, Result, DB};

static LOGGER: Once = Once::new();

/// Real locks taken through [`FaultInjectionFs`], by path.
///
/// The engine only sees a [`RegisteredLock`], so a crashed handle's lock
/// can be released here while the handle itself is leaked.
static HELD_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Box<dyn FileLock>>>> = LazyLock::new(Mutex::default);

/// Routes `log` output through the test harness.
pub fn init_logger() {
    LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct MockClock {
    now: Mutex<Duration>,
}

impl MockClock {
    pub fn new(start: Duration) -> Arc<Self> {
        Arc::new(Self { now: Mutex::new(start) })
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for MockClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

#[derive(Debug, Default)]
struct Faults {
    fail_table_writes: AtomicBool,
    /// Simulated latency of every table read, in microseconds; 0 disables it
    read_delay_micros: AtomicU64,
    table_reads: AtomicUsize,
}

/// A file system that wraps the real one and injects failures and latency.
///
/// Latency is simulated on the attached [`MockClock`]: a read that would
/// exceed its per-call timeout advances the clock by the timeout and fails
/// with `TimedOut` without reading.
#[derive(Debug)]
pub struct FaultInjectionFs {
    inner: PosixFileSystem,
    clock: Option<Arc<MockClock>>,
    faults: Arc<Faults>,
}

impl FaultInjectionFs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { inner: PosixFileSystem::new(), clock: None, faults: Arc::default() })
    }

    pub fn with_clock(clock: Arc<MockClock>) -> Arc<Self> {
        Arc::new(Self { inner: PosixFileSystem::new(), clock: Some(clock), faults: Arc::default() })
    }

    /// Makes creating `.sst` files fail.
    pub fn fail_table_writes(&self, value: bool) {
        self.faults.fail_table_writes.store(value, Ordering::SeqCst);
    }

    /// Sets the latency of every table read.
    pub fn set_read_delay(&self, delay: Duration) {
        self.faults.read_delay_micros.store(delay.as_micros() as u64, Ordering::SeqCst);
    }

    /// Table reads served so far.
    pub fn table_reads(&self) -> usize {
        self.faults.table_reads.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct RegisteredLock {
    path: PathBuf,
}

impl FileLock for RegisteredLock {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RegisteredLock {
    fn drop(&mut self) {
        HELD_LOCKS.lock().remove(&self.path);
    }
}

fn is_table(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "sst")
}

struct DelayedFile {
    inner: Arc<dyn RandomAccessFile>,
    clock: Option<Arc<MockClock>>,
    faults: Arc<Faults>,
}

impl RandomAccessFile for DelayedFile {
    fn read(&self, offset: u64, len: usize, opts: &IoOptions) -> Result<Bytes> {
        let delay = Duration::from_micros(self.faults.read_delay_micros.load(Ordering::SeqCst));
        if let (Some(clock), false) = (&self.clock, delay.is_zero()) {
            if let Some(timeout) = opts.timeout {
                if timeout < delay {
                    clock.advance(timeout);
                    return Err(Error::timed_out(format!("read of {} bytes exceeded {:?}", len, timeout)));
                }
            }
            clock.advance(delay);
        }
        self.faults.table_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(offset, len, opts)
    }

    fn size(&self) -> Result<u64> {
        self.inner.size()
    }
}

impl FileSystem for FaultInjectionFs {
    fn new_random_access_file(&self, path: &Path) -> Result<Arc<dyn RandomAccessFile>> {
        let file = self.inner.new_random_access_file(path)?;
        if !is_table(path) {
            return Ok(file);
        }
        Ok(Arc::new(DelayedFile { inner: file, clock: self.clock.clone(), faults: Arc::clone(&self.faults) }))
    }

    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        if is_table(path) && self.faults.fail_table_writes.load(Ordering::SeqCst) {
            return Err(Error::from(std::io::Error::other(format!("injected write failure for {}", path.display()))));
        }
        self.inner.new_writable_file(path)
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        self.inner.read_file(path)
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.inner.file_exists(path)
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        self.inner.file_size(path)
    }

    fn children(&self, dir: &Path) -> Result<Vec<String>> {
        self.inner.children(dir)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.inner.remove_file(path)
    }

    fn rename_file(&self, from: &Path, to: &Path) -> Result<()> {
        self.inner.rename_file(from, to)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.inner.create_dir_all(path)
    }

    fn lock_file(&self, path: &Path) -> Result<Box<dyn FileLock>> {
        let lock = self.inner.lock_file(path)?;
        HELD_LOCKS.lock().insert(path.to_path_buf(), lock);
        Ok(Box::new(RegisteredLock { path: path.to_path_buf() }))
    }

    fn supports_timeouts(&self) -> bool {
        true
    }
}

/// Options for tests: no background compaction, no compression.
pub fn test_options() -> Options {
    Options::default()
        .file_system(FaultInjectionFs::new())
        .disable_auto_compactions(true)
        .compression(versadb::CompressionType::None)
}

/// Drops the handle without closing it, as a crash would.
///
/// The process-level lock goes away with a crashed process, so it is
/// released here. The handle must have been opened with a
/// [`FaultInjectionFs`].
pub fn simulate_crash(db: DB) {
    let lock = db.path().join("LOCK");
    std::mem::forget(db);
    HELD_LOCKS.lock().remove(&lock);
}

/// Table files in `dir`, ascending by number.
pub fn table_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| is_table(p))
        .collect();
    files.sort();
    files
}

pub fn key(i: usize) -> Vec<u8> {
    format!("key_{:05}", i).into_bytes()
}

pub fn value(i: usize) -> Vec<u8> {
    format!("value_{:05}", i).into_bytes()
}
