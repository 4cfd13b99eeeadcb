use crate::reader::{RandomAccessReader, Result};
use serde::Serialize;

/// A slice of the source rendered for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HexDump {
    pub offset: i64,
    /// Bytes actually dumped, which is less than requested near the end.
    pub length: i64,
    pub hex: String,
}

/// Up to `max_len` bytes at `offset`, clamped to the end of the reader.
///
/// Nothing is available at or past the end, so that yields an empty buffer.
/// Negative arguments are still rejected by the reader's own checks.
pub fn read_clamped<R: RandomAccessReader + ?Sized>(r: &R, offset: i64, max_len: i64) -> Result<Vec<u8>> {
    let available = (r.length() - offset).max(0);
    let count = if max_len < 0 { max_len } else { max_len.min(available) };
    if count == 0 && offset >= 0 {
        return Ok(Vec::new());
    }
    r.read(offset, count)
}

pub fn hex_dump(bytes: &[u8], start_offset: i64) -> String {
    let mut out = String::new();
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let offs = start_offset + (i as i64) * 16;
        let hexs: String = chunk.iter().map(|b| format!("{:02x} ", b)).collect();
        let ascii: String = chunk
            .iter()
            .map(|&c| if (32..=126).contains(&c) { c as char } else { '.' })
            .collect();
        out.push_str(&format!("{:08x}  {:<48}  |{}|\n", offs, hexs, ascii));
    }
    out
}

pub fn hex_range<R: RandomAccessReader + ?Sized>(r: &R, offset: i64, max_len: i64) -> Result<HexDump> {
    let data = read_clamped(r, offset, max_len)?;
    Ok(HexDump { offset, length: data.len() as i64, hex: hex_dump(&data, offset) })
}
