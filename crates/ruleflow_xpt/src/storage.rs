//! Byte-stream storage beneath the checkpoint log.
//!
//! Storage distinguishes three levels: appended (buffered in process),
//! flushed (handed to the OS, survives a process crash) and synced (on
//! durable media).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Append-structured byte storage
pub trait LogStorage: Send + Sync {
    /// Logical length, including bytes not yet flushed
    fn len(&self) -> u64;

    /// Check if nothing has been appended
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append bytes at the end, returning the offset they start at
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error
    fn append(&mut self, bytes: &[u8]) -> io::Result<u64>;

    /// Hand buffered bytes to the operating system
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error
    fn flush(&mut self) -> io::Result<()>;

    /// Flush, then force everything to durable media
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error
    fn sync(&mut self) -> io::Result<()>;

    /// Fill `buf` with the bytes starting at `offset`
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEof` if the range extends past [`len`](Self::len)
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Discard everything from `len` on
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(eof(offset, buf.len())),
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn eof(offset: u64, len: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("read of {} bytes at offset {} past end of log", len, offset),
    )
}

/// File-backed storage with an in-process append buffer
///
/// Reads are positional, so any number of readers can share `&self`.
pub struct FileStorage {
    path: PathBuf,
    file: File,
    pending: Vec<u8>,
    flushed_len: u64,
}

impl FileStorage {
    /// Open or create the file at `path`, creating parent directories
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be opened
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let flushed_len = file.metadata()?.len();

        Ok(Self {
            path,
            file,
            pending: Vec::new(),
            flushed_len,
        })
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes appended but not yet flushed
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl LogStorage for FileStorage {
    fn len(&self) -> u64 {
        self.flushed_len + self.pending.len() as u64
    }

    fn append(&mut self, bytes: &[u8]) -> io::Result<u64> {
        let offset = self.len();
        self.pending.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(self.flushed_len))?;
        self.file.write_all(&self.pending)?;
        self.file.flush()?;
        self.flushed_len += self.pending.len() as u64;
        self.pending.clear();
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.flush()?;
        self.file.sync_data()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or_else(|| eof(offset, buf.len()))?;
        if end > self.len() {
            return Err(eof(offset, buf.len()));
        }

        let mut done = 0usize;
        if offset < self.flushed_len {
            let from_file = (self.flushed_len - offset).min(buf.len() as u64) as usize;
            read_exact_at(&self.file, &mut buf[..from_file], offset)?;
            done = from_file;
        }

        if done < buf.len() {
            let start = (offset + done as u64 - self.flushed_len) as usize;
            let rest = buf.len() - done;
            buf[done..].copy_from_slice(&self.pending[start..start + rest]);
        }
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        if len >= self.flushed_len {
            let keep = (len - self.flushed_len) as usize;
            self.pending.truncate(keep);
            return Ok(());
        }
        self.pending.clear();
        self.file.set_len(len)?;
        self.file.sync_all()?;
        self.flushed_len = len;
        Ok(())
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        // Same contract as BufWriter: best effort, errors are lost.
        if let Err(e) = self.flush() {
            tracing::warn!(path = %self.path.display(), error = %e, "flush on drop failed");
        }
    }
}

/// In-memory storage that remembers how far it was flushed and synced
///
/// [`crash`](Self::crash) and [`power_loss`](Self::power_loss) produce the
/// image a restarted process would find.
#[derive(Debug, Clone, Default)]
pub struct MemStorage {
    data: Vec<u8>,
    flushed: usize,
    synced: usize,
    fail_sync: Arc<AtomicBool>,
    fail_flush: Arc<AtomicBool>,
}

impl MemStorage {
    /// Create empty storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that already holds `data`, all of it synced
    #[must_use]
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            data,
            flushed: len,
            synced: len,
            fail_sync: Arc::new(AtomicBool::new(false)),
            fail_flush: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Every byte appended so far
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Image after a process crash: flushed bytes survive
    #[must_use]
    pub fn crash(&self) -> Self {
        Self::from_bytes(self.data[..self.flushed].to_vec())
    }

    /// Image after losing power: only synced bytes survive
    #[must_use]
    pub fn power_loss(&self) -> Self {
        Self::from_bytes(self.data[..self.synced].to_vec())
    }

    /// Switch that makes every later `sync` fail while set
    #[must_use]
    pub fn sync_fault(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail_sync)
    }

    /// Switch that makes every later `flush` and `sync` fail while set
    #[must_use]
    pub fn flush_fault(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail_flush)
    }
}

impl LogStorage for MemStorage {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn append(&mut self, bytes: &[u8]) -> io::Result<u64> {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.fail_flush.load(Ordering::SeqCst) {
            return Err(io::Error::other("flush failure injected"));
        }
        self.flushed = self.data.len();
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.flush()?;
        if self.fail_sync.load(Ordering::SeqCst) {
            return Err(io::Error::other("sync failure injected"));
        }
        self.flushed = self.data.len();
        self.synced = self.data.len();
        Ok(())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(offset).map_err(|_| eof(offset, buf.len()))?;
        let end = start
            .checked_add(buf.len())
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| eof(offset, buf.len()))?;
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len).unwrap_or(usize::MAX).min(self.data.len());
        self.data.truncate(len);
        self.flushed = self.flushed.min(len);
        self.synced = self.synced.min(len);
        Ok(())
    }
}
