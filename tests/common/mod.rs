#![allow(dead_code)]

use isoinspect::reader::Result;
use isoinspect::{MappedReader, RandomAccessReader};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A plain box: 32-bit size, type, payload.
pub fn bx(typ: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(&((8 + payload.len()) as u32).to_be_bytes());
    v.extend_from_slice(typ);
    v.extend_from_slice(payload);
    v
}

/// A box whose size field says `declared` regardless of the payload.
pub fn bx_declared(typ: &[u8; 4], declared: u32, payload: &[u8]) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(&declared.to_be_bytes());
    v.extend_from_slice(typ);
    v.extend_from_slice(payload);
    v
}

/// A box with version/flags in front of `body`.
pub fn full_box(typ: &[u8; 4], version: u8, flags: u32, body: &[u8]) -> Vec<u8> {
    let mut payload = vec![version];
    payload.extend_from_slice(&flags.to_be_bytes()[1..]);
    payload.extend_from_slice(body);
    bx(typ, &payload)
}

/// 24-byte `ftyp`: isom, minor 1, compatible isom + iso2.
pub fn ftyp() -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(b"isom");
    payload.extend_from_slice(&1u32.to_be_bytes());
    payload.extend_from_slice(b"isom");
    payload.extend_from_slice(b"iso2");
    bx(b"ftyp", &payload)
}

pub fn concat(parts: &[&[u8]]) -> Vec<u8> {
    parts.concat()
}

pub fn reader(bytes: Vec<u8>) -> MappedReader {
    MappedReader::from_bytes(bytes)
}

/// Counts every `read` that reaches the wrapped reader.
pub struct CountingReader {
    inner: MappedReader,
    pub reads: Arc<AtomicUsize>,
}

impl CountingReader {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { inner: MappedReader::from_bytes(bytes), reads: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl RandomAccessReader for CountingReader {
    fn length(&self) -> i64 {
        self.inner.length()
    }

    fn read(&self, offset: i64, count: i64) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(offset, count)
    }
}

/// Serves the first `budget` reads, then fails every read with an IO error.
pub struct FailAfter {
    inner: MappedReader,
    budget: usize,
    reads: AtomicUsize,
}

impl FailAfter {
    pub fn new(bytes: Vec<u8>, budget: usize) -> Self {
        Self { inner: MappedReader::from_bytes(bytes), budget, reads: AtomicUsize::new(0) }
    }
}

impl RandomAccessReader for FailAfter {
    fn length(&self) -> i64 {
        self.inner.length()
    }

    fn read(&self, offset: i64, count: i64) -> Result<Vec<u8>> {
        if self.reads.fetch_add(1, Ordering::SeqCst) >= self.budget {
            return Err(std::io::Error::other("device gone").into());
        }
        self.inner.read(offset, count)
    }
}
