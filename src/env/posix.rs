//! File system backed by `std::fs`.

use super::{FileLock, FileSystem, IoOptions, RandomAccessFile, WritableFile};
use crate::error::{Error, Result};
use bytes::Bytes;
use fs4::fs_std::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The local file system.
///
/// Reads are positioned (`pread`) so a single open file serves concurrent
/// readers. Timeouts are not supported; deadline checks still happen between
/// reads in the lookup layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixFileSystem;

impl PosixFileSystem {
    /// Creates the file system handle.
    pub fn new() -> Self {
        Self
    }
}

struct PosixRandomAccessFile {
    #[cfg(unix)]
    file: File,
    #[cfg(not(unix))]
    file: parking_lot::Mutex<File>,
    size: u64,
}

impl PosixRandomAccessFile {
    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(buf, offset)
    }

    #[cfg(not(unix))]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }
}

impl RandomAccessFile for PosixRandomAccessFile {
    fn read(&self, offset: u64, len: usize, _opts: &IoOptions) -> Result<Bytes> {
        let mut buf = vec![0u8; len];
        match self.read_at(&mut buf, offset) {
            Ok(()) => Ok(Bytes::from(buf)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::corruption(format!(
                "short read: {} bytes at offset {} in a {} byte file",
                len, offset, self.size
            ))),
            Err(e) => Err(e.into()),
        }
    }

    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }
}

struct PosixWritableFile {
    writer: BufWriter<File>,
    size: u64,
}

impl WritableFile for PosixWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.size += data.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for PosixWritableFile {
    fn drop(&mut self) {
        // Best effort flush on drop
        let _ = self.writer.flush();
    }
}

/// An advisory `flock`-style lock; closing the file releases it.
#[derive(Debug)]
struct PosixFileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock for PosixFileLock {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl FileSystem for PosixFileSystem {
    fn new_random_access_file(&self, path: &Path) -> Result<Arc<dyn RandomAccessFile>> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        #[cfg(not(unix))]
        let file = parking_lot::Mutex::new(file);
        Ok(Arc::new(PosixRandomAccessFile { file, size }))
    }

    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
        Ok(Box::new(PosixWritableFile { writer: BufWriter::new(file), size: 0 }))
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(fs::read(path)?)
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn children(&self, dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        Ok(fs::remove_file(path)?)
    }

    fn rename_file(&self, from: &Path, to: &Path) -> Result<()> {
        Ok(fs::rename(from, to)?)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        Ok(fs::create_dir_all(path)?)
    }

    fn lock_file(&self, path: &Path) -> Result<Box<dyn FileLock>> {
        let mut file = OpenOptions::new().create(true).truncate(false).write(true).open(path)?;
        let lock_error = |e: io::Error| Error::from(io::Error::new(e.kind(), format!("lock {}: {}", path.display(), e)));
        if !FileExt::try_lock_exclusive(&file).map_err(lock_error)? {
            return Err(lock_error(io::Error::new(io::ErrorKind::WouldBlock, "already held by another process")));
        }
        // Holder's pid, for whoever finds the file locked
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Box::new(PosixFileLock { _file: file, path: path.to_path_buf() }))
    }
}
