//! Whole-file reader backed by a memory map, with an eager-load fallback.

use crate::reader::{RandomAccessReader, ReaderError, Result, check_range};
use memmap2::Mmap;
use std::fs::{self, File};
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

enum Backing {
    Mapped(Mmap),
    Loaded(Vec<u8>),
}

impl Deref for Backing {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Backing::Mapped(m) => m,
            Backing::Loaded(v) => v,
        }
    }
}

/// Immutable view of an entire file. `Send + Sync`; share it freely.
pub struct MappedReader {
    storage: Backing,
}

impl MappedReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ReaderError::FileNotFound(path.to_path_buf()));
        }

        match Self::map(path) {
            Ok(mmap) => {
                debug!(path = %path.display(), length = mmap.len(), "mapped file");
                Ok(Self { storage: Backing::Mapped(mmap) })
            }
            Err(map_err) => {
                warn!(path = %path.display(), error = %map_err, "mmap failed, loading eagerly");
                let bytes = fs::read(path).map_err(|e| ReaderError::MappingFailed(Arc::new(e)))?;
                Ok(Self::from_bytes(bytes))
            }
        }
    }

    fn map(path: &Path) -> std::io::Result<Mmap> {
        let file = File::open(path)?;
        // Safety: the map is only ever read. Another process truncating the
        // file underneath us is outside what we can defend against.
        #[allow(unsafe_code)]
        unsafe {
            Mmap::map(&file)
        }
    }

    /// Serve reads from an in-memory buffer.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { storage: Backing::Loaded(bytes) }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.storage, Backing::Mapped(_))
    }

    /// The whole backing buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage
    }
}

impl RandomAccessReader for MappedReader {
    fn length(&self) -> i64 {
        self.storage.len() as i64
    }

    fn read(&self, offset: i64, count: i64) -> Result<Vec<u8>> {
        let Some(end) = check_range(offset, count, self.length())? else {
            return Ok(Vec::new());
        };
        Ok(self.storage[offset as usize..end as usize].to_vec())
    }
}
