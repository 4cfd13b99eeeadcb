//! Fixed-width big-endian decoding on top of [`RandomAccessReader`].

use crate::boxes::FourCC;
use crate::reader::{RandomAccessReader, ReaderError};
use byteorder::{BigEndian, ByteOrder};

#[derive(thiserror::Error, Debug, Clone)]
pub enum DecodeError {
    #[error("truncated read: expected {expected} bytes, got {actual}")]
    TruncatedRead { expected: usize, actual: usize },
    #[error("invalid four-character code {}", hex::encode(.0))]
    InvalidFourCharCode([u8; 4]),
    #[error(transparent)]
    Reader(#[from] ReaderError),
}

pub type Result<T> = std::result::Result<T, DecodeError>;

/// Typed reads. Bytes past the end of the reader are never zero-filled: a
/// field that is cut short comes back as [`DecodeError::TruncatedRead`].
pub trait ReaderExt: RandomAccessReader {
    fn read_array<const N: usize>(&self, offset: i64) -> Result<[u8; N]> {
        let available = if offset >= 0 {
            (self.length() - offset).clamp(0, N as i64) as usize
        } else {
            N // let the reader reject the offset itself
        };
        if available < N {
            return Err(DecodeError::TruncatedRead { expected: N, actual: available });
        }
        let bytes = self.read(offset, N as i64)?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| DecodeError::TruncatedRead { expected: N, actual: bytes.len() })
    }

    fn read_u8(&self, offset: i64) -> Result<u8> {
        Ok(self.read_array::<1>(offset)?[0])
    }

    fn read_u16(&self, offset: i64) -> Result<u16> {
        Ok(BigEndian::read_u16(&self.read_array::<2>(offset)?))
    }

    fn read_u32(&self, offset: i64) -> Result<u32> {
        Ok(BigEndian::read_u32(&self.read_array::<4>(offset)?))
    }

    fn read_u64(&self, offset: i64) -> Result<u64> {
        Ok(BigEndian::read_u64(&self.read_array::<8>(offset)?))
    }

    fn read_fourcc(&self, offset: i64) -> Result<FourCC> {
        let raw = self.read_array::<4>(offset)?;
        let code = FourCC(raw);
        if !code.is_legal() {
            return Err(DecodeError::InvalidFourCharCode(raw));
        }
        Ok(code)
    }

    fn read_uuid(&self, offset: i64) -> Result<[u8; 16]> {
        self.read_array::<16>(offset)
    }
}

impl<R: RandomAccessReader + ?Sized> ReaderExt for R {}
