//! Bounds-checked random access over an opaque byte source.

use crate::chunked::{ChunkedFileReader, DEFAULT_CHUNK_SIZE};
use crate::mapped::MappedReader;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(thiserror::Error, Debug, Clone)]
pub enum ReaderError {
    #[error("invalid offset {0}")]
    InvalidOffset(i64),
    #[error("invalid count {0}")]
    InvalidCount(i64),
    #[error("requested range {offset}+{count} is outside 0..{length}")]
    RangeOutOfBounds { offset: i64, count: i64, length: i64 },
    #[error("offset {offset} + count {count} overflows")]
    Overflow { offset: i64, count: i64 },
    #[error("io: {0}")]
    Io(#[source] Arc<io::Error>),
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("mapping failed: {0}")]
    MappingFailed(#[source] Arc<io::Error>),
}

impl From<io::Error> for ReaderError {
    fn from(e: io::Error) -> Self {
        ReaderError::Io(Arc::new(e))
    }
}

impl ReaderError {
    /// IO and mapping failures poison the reader; bounds errors only fail one call.
    pub fn is_io(&self) -> bool {
        matches!(self, ReaderError::Io(_) | ReaderError::MappingFailed(_) | ReaderError::FileNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ReaderError>;

/// Random access over a fixed-length byte source.
///
/// `read` returns exactly `count` bytes or fails. Every implementation runs
/// [`check_range`] first so the precondition errors are identical across
/// backends.
pub trait RandomAccessReader {
    fn length(&self) -> i64;

    fn read(&self, offset: i64, count: i64) -> Result<Vec<u8>>;
}

/// Shared precondition checks. `Ok(None)` means "zero-length read, return empty".
pub fn check_range(offset: i64, count: i64, length: i64) -> Result<Option<i64>> {
    if offset < 0 {
        return Err(ReaderError::InvalidOffset(offset));
    }
    if count < 0 {
        return Err(ReaderError::InvalidCount(count));
    }
    if count == 0 {
        return Ok(None);
    }
    if offset >= length {
        return Err(ReaderError::RangeOutOfBounds { offset, count, length });
    }
    let end = offset
        .checked_add(count)
        .ok_or(ReaderError::Overflow { offset, count })?;
    if end > length {
        return Err(ReaderError::RangeOutOfBounds { offset, count, length });
    }
    Ok(Some(end))
}

impl<R: RandomAccessReader + ?Sized> RandomAccessReader for &R {
    fn length(&self) -> i64 {
        (**self).length()
    }
    fn read(&self, offset: i64, count: i64) -> Result<Vec<u8>> {
        (**self).read(offset, count)
    }
}

impl<R: RandomAccessReader + ?Sized> RandomAccessReader for Box<R> {
    fn length(&self) -> i64 {
        (**self).length()
    }
    fn read(&self, offset: i64, count: i64) -> Result<Vec<u8>> {
        (**self).read(offset, count)
    }
}

impl<R: RandomAccessReader + ?Sized> RandomAccessReader for Arc<R> {
    fn length(&self) -> i64 {
        (**self).length()
    }
    fn read(&self, offset: i64, count: i64) -> Result<Vec<u8>> {
        (**self).read(offset, count)
    }
}

/// Serialises access to a reader that is not safe to share, such as
/// [`ChunkedFileReader`], so it can be used from several threads.
impl<R: RandomAccessReader> RandomAccessReader for parking_lot::Mutex<R> {
    fn length(&self) -> i64 {
        self.lock().length()
    }
    fn read(&self, offset: i64, count: i64) -> Result<Vec<u8>> {
        self.lock().read(offset, count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ReaderKind {
    Chunked { chunk_size: usize },
    Mapped,
}

impl Default for ReaderKind {
    fn default() -> Self {
        ReaderKind::Chunked { chunk_size: DEFAULT_CHUNK_SIZE }
    }
}

/// Open `path` with the requested backend.
pub fn open_reader(path: impl AsRef<Path>, kind: ReaderKind) -> Result<Box<dyn RandomAccessReader + Send>> {
    Ok(match kind {
        ReaderKind::Chunked { chunk_size } => Box::new(ChunkedFileReader::with_chunk_size(path, chunk_size)?),
        ReaderKind::Mapped => Box::new(MappedReader::open(path)?),
    })
}
