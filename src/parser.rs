use crate::boxes::{BoxHeader, FourCC};
use crate::decode::{DecodeError, ReaderExt};
use crate::issues::codes;
use crate::reader::{RandomAccessReader, ReaderError};
use std::ops::Range;

#[derive(thiserror::Error, Debug, Clone)]
pub enum HeaderError {
    #[error("header field truncated at {offset}: expected {expected} bytes, {actual} available")]
    TruncatedField { offset: i64, expected: usize, actual: usize, reader_ended: bool },
    #[error("invalid four-character code {} at {offset}", hex::encode(.raw))]
    InvalidFourCC { offset: i64, raw: [u8; 4] },
    #[error(transparent)]
    Reader(#[from] ReaderError),
}

impl HeaderError {
    /// Stable issue code for this failure, `None` when it is a reader failure.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            HeaderError::TruncatedField { reader_ended: true, .. } => Some(codes::HEADER_TRUNCATED_FIELD),
            HeaderError::TruncatedField { reader_ended: false, .. } => Some(codes::TRAILING_BYTES),
            HeaderError::InvalidFourCC { .. } => Some(codes::HEADER_INVALID_FOURCC),
            HeaderError::Reader(_) => None,
        }
    }

    /// Bytes the failed header occupied (or would have occupied).
    pub fn byte_range(&self, offset: i64) -> Option<Range<i64>> {
        match self {
            HeaderError::TruncatedField { offset: at, expected, .. } => Some(offset..at + *expected as i64),
            HeaderError::InvalidFourCC { offset: at, .. } => Some(offset..at + 4),
            HeaderError::Reader(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, HeaderError>;

/// Header fields must lie within `limit` (the enclosing payload end).
fn ensure_fits<R: RandomAccessReader + ?Sized>(r: &R, offset: i64, len: usize, limit: i64) -> Result<()> {
    let remaining = (limit - offset).max(0);
    if remaining < len as i64 {
        return Err(HeaderError::TruncatedField {
            offset,
            expected: len,
            actual: remaining as usize,
            reader_ended: offset + len as i64 > r.length(),
        });
    }
    Ok(())
}

fn at(offset: i64) -> impl Fn(DecodeError) -> HeaderError {
    move |e| match e {
        DecodeError::TruncatedRead { expected, actual } => HeaderError::TruncatedField {
            offset,
            expected,
            actual,
            reader_ended: true,
        },
        DecodeError::InvalidFourCharCode(raw) => HeaderError::InvalidFourCC { offset, raw },
        DecodeError::Reader(e) => HeaderError::Reader(e),
    }
}

/// Decode the header of the box starting at `offset` inside `parent`
/// (a payload range, or `0..len` at top level).
///
/// The result describes what the file *declares*. Sizes that are smaller
/// than the header or that overrun `parent` are reported back unchanged;
/// deciding what to do about them is the caller's business.
pub fn read_box_header<R: RandomAccessReader + ?Sized>(r: &R, offset: i64, parent: &Range<i64>) -> Result<BoxHeader> {
    let limit = parent.end.min(r.length());

    ensure_fits(r, offset, 4, limit)?;
    let size32 = r.read_u32(offset).map_err(at(offset))?;
    ensure_fits(r, offset + 4, 4, limit)?;
    let typ = r.read_fourcc(offset + 4).map_err(at(offset + 4))?;

    let mut header_size: i64 = 8;
    let mut total_size = size32 as i64;

    if size32 == 1 {
        ensure_fits(r, offset + header_size, 8, limit)?;
        let large = r.read_u64(offset + header_size).map_err(at(offset + header_size))?;
        // anything past i64::MAX cannot fit in any reader; let the caller flag it
        total_size = i64::try_from(large).unwrap_or(i64::MAX);
        header_size += 8;
    }

    let mut uuid = None;
    if typ == FourCC::UUID {
        ensure_fits(r, offset + header_size, 16, limit)?;
        uuid = Some(r.read_uuid(offset + header_size).map_err(at(offset + header_size))?);
        header_size += 16;
    }

    if size32 == 0 {
        total_size = parent.end - offset;
    }

    let end = offset.saturating_add(total_size);
    let payload_start = offset + header_size;
    Ok(BoxHeader {
        typ,
        uuid,
        header_size,
        total_size,
        range: offset..end,
        payload_range: payload_start..end.max(payload_start),
    })
}

/// Where the first child of a container starts.
///
/// `stsd` carries version/flags and an entry count before its entries.
/// ISO `meta` is a full box, but QuickTime writes it without version/flags,
/// in which case the handler box sits right at the payload start.
pub fn first_child_offset<R: RandomAccessReader + ?Sized>(r: &R, header: &BoxHeader) -> i64 {
    let start = header.payload_range.start;
    let skip = match &header.typ.0 {
        b"stsd" => 8,
        b"meta" => {
            let quicktime = r
                .read_array::<4>(start + 4)
                .map(|t| &t == b"hdlr")
                .unwrap_or(false);
            if quicktime { 0 } else { 4 }
        }
        _ => 0,
    };
    (start + skip).min(header.payload_range.end)
}

/// QuickTime closes `udta` with a 32-bit zero. Those four bytes are a
/// terminator, not a child header cut short.
pub fn is_udta_terminator<R: RandomAccessReader + ?Sized>(r: &R, container: &BoxHeader, offset: i64) -> bool {
    &container.typ.0 == b"udta"
        && container.payload_range.end - offset == 4
        && r.read_u32(offset).is_ok_and(|v| v == 0)
}
