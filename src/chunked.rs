//! File-backed reader with a single-slot, chunk-aligned cache.

use crate::reader::{RandomAccessReader, ReaderError, Result, check_range};
use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

pub const DEFAULT_CHUNK_SIZE: usize = 1 << 20;

/// Buffered random-access reader over a seekable source.
///
/// Holds at most one chunk in memory. Not `Sync`: the cache and the source
/// cursor are mutated on every miss, so wrap it in a `parking_lot::Mutex`
/// (which also implements [`RandomAccessReader`]) or open one reader per
/// thread.
pub struct ChunkedFileReader<F = File> {
    length: i64,
    chunk_size: usize,
    inner: RefCell<Inner<F>>,
}

struct Inner<F> {
    source: F,
    cached_offset: Option<i64>,
    cached: Vec<u8>,
}

impl ChunkedFileReader<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_chunk_size(path, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let length = file.metadata()?.len();
        let length = i64::try_from(length)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "file length exceeds i64"))?;
        debug!(path = %path.display(), length, chunk_size, "opened chunked reader");
        Self::from_source(file, length, chunk_size)
    }
}

impl<F: Read + Seek> ChunkedFileReader<F> {
    /// Wrap any seekable source whose length is already known.
    pub fn from_source(source: F, length: i64, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "chunk size must be positive").into());
        }
        if length < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "length must be non-negative").into());
        }
        Ok(Self {
            length,
            chunk_size,
            inner: RefCell::new(Inner { source, cached_offset: None, cached: Vec::new() }),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Absolute offset of the chunk currently cached, if any.
    pub fn cached_chunk_offset(&self) -> Option<i64> {
        self.inner.borrow().cached_offset
    }

    fn aligned(&self, position: i64) -> i64 {
        let chunk = self.chunk_size as i64;
        (position / chunk) * chunk
    }
}

impl<F> Inner<F>
where
    F: Read + Seek,
{
    fn load(&mut self, offset: i64, chunk_size: usize) -> Result<&[u8]> {
        if self.cached_offset == Some(offset) && !self.cached.is_empty() {
            return Ok(&self.cached);
        }
        // invalidate first so a failed load never leaves a stale slot behind
        self.cached_offset = None;
        self.cached.clear();
        self.source.seek(SeekFrom::Start(offset as u64))?;
        let mut limited = (&mut self.source).take(chunk_size as u64);
        limited.read_to_end(&mut self.cached)?;
        self.cached_offset = Some(offset);
        Ok(&self.cached)
    }
}

impl<F: Read + Seek> RandomAccessReader for ChunkedFileReader<F> {
    fn length(&self) -> i64 {
        self.length
    }

    fn read(&self, offset: i64, count: i64) -> Result<Vec<u8>> {
        if check_range(offset, count, self.length)?.is_none() {
            return Ok(Vec::new());
        }

        let mut inner = self.inner.borrow_mut();
        let mut out = Vec::with_capacity(count as usize);
        let mut position = offset;
        let mut remaining = count as usize;

        while remaining > 0 {
            let chunk_offset = self.aligned(position);
            let chunk = inner.load(chunk_offset, self.chunk_size)?;
            let start = (position - chunk_offset) as usize;
            let available = chunk.len().saturating_sub(start);
            if available == 0 {
                return Err(ReaderError::from(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("source ended at chunk {chunk_offset} before offset {position}"),
                )));
            }
            let take = available.min(remaining);
            out.extend_from_slice(&chunk[start..start + take]);
            remaining -= take;
            position += take as i64;
        }

        Ok(out)
    }
}
