use serde::{Serialize, Serializer};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Four-character box type code.
///
/// Always exactly four bytes. Whether those bytes form a *legal* code is a
/// separate question answered by [`FourCC::is_legal`]; the header decoder
/// rejects illegal codes with a dedicated error.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct FourCC(pub [u8; 4]);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("four-character code must be exactly 4 bytes, got {0}")]
pub struct FourCCLengthError(pub usize);

impl FourCC {
    pub const UUID: FourCC = FourCC(*b"uuid");

    /// Printable ASCII, plus `©` (0xA9) which prefixes QuickTime metadata items.
    pub fn is_legal_byte(b: u8) -> bool {
        (0x20..=0x7e).contains(&b) || b == 0xa9
    }

    pub fn is_legal(&self) -> bool {
        self.0.iter().all(|&b| Self::is_legal_byte(b))
    }

    pub fn as_str_lossy(&self) -> String {
        self.0
            .iter()
            .map(|&c| match c {
                32..=126 => c as char,
                0xa9 => '©',
                _ => '.',
            })
            .collect()
    }
}

impl TryFrom<&[u8]> for FourCC {
    type Error = FourCCLengthError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 4] = bytes.try_into().map_err(|_| FourCCLengthError(bytes.len()))?;
        Ok(FourCC(arr))
    }
}

impl FromStr for FourCC {
    type Err = FourCCLengthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FourCC::try_from(s.as_bytes())
    }
}

impl fmt::Debug for FourCC { fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.as_str_lossy()) } }
impl fmt::Display for FourCC { fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.as_str_lossy()) } }

impl Serialize for FourCC {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_str_lossy())
    }
}

/// A box header as declared by the file.
///
/// Nothing here is guaranteed to agree with the bytes actually available:
/// `range` and `payload_range` are computed from the declared size, and it is
/// the pipeline's job to notice when they run past their container or the
/// end of the reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoxHeader {
    #[serde(rename = "type")]
    pub typ: FourCC,
    #[serde(serialize_with = "serialize_uuid")]
    pub uuid: Option<[u8; 16]>,
    pub header_size: i64, // 8, 16, 24 or 32
    pub total_size: i64,  // header + payload
    pub range: Range<i64>,
    pub payload_range: Range<i64>,
}

impl BoxHeader {
    pub fn start(&self) -> i64 {
        self.range.start
    }

    pub fn end(&self) -> i64 {
        self.range.end
    }

    pub fn payload_len(&self) -> i64 {
        (self.payload_range.end - self.payload_range.start).max(0)
    }

    pub fn key(&self) -> BoxKey {
        match self.uuid {
            Some(u) if self.typ == FourCC::UUID => BoxKey::Uuid(u),
            _ => BoxKey::FourCC(self.typ),
        }
    }

    /// `moov`, or `uuid:0011…` for extended types.
    pub fn identifier(&self) -> String {
        match self.uuid {
            Some(u) => format!("uuid:{}", hex::encode(u)),
            None => self.typ.to_string(),
        }
    }
}

fn serialize_uuid<S: Serializer>(uuid: &Option<[u8; 16]>, serializer: S) -> Result<S::Ok, S::Error> {
    match uuid {
        Some(u) => serializer.serialize_some(&hex::encode(u)),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoxKey {
    FourCC(FourCC),
    Uuid([u8; 16]),
}
