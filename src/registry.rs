use crate::boxes::{BoxHeader, BoxKey, FourCC};
use crate::decode::ReaderExt;
use crate::reader::RandomAccessReader;
use anyhow::bail;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::ops::Range;
use std::sync::{Arc, LazyLock};

/// One decoded, human-readable payload field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayloadField {
    pub label: String,
    pub value: String,
    pub byte_range: Option<Range<i64>>,
}

/// The handful of well-known fields pulled out of a box payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedPayload {
    pub fields: Vec<PayloadField>,
}

impl ParsedPayload {
    pub fn field(&self, label: &str) -> Option<&PayloadField> {
        self.fields.iter().find(|f| f.label == label)
    }

    pub fn value(&self, label: &str) -> Option<&str> {
        self.field(label).map(|f| f.value.as_str())
    }
}

/// Trait for payload decoders.
///
/// A decoder interprets the payload of a specific box (identified by a
/// [`BoxKey`]). Decoders must not read past the payload or the reader; a
/// short payload is an `Err`, which the pipeline treats as "no payload".
pub trait BoxDecoder: Send + Sync {
    fn decode(&self, r: &dyn RandomAccessReader, hdr: &BoxHeader) -> anyhow::Result<ParsedPayload>;
}

/// Registry of decoders keyed by `BoxKey` (4CC or UUID).
///
/// The registry is immutable once constructed; use [`Registry::with_decoder`]
/// to build it fluently.
pub struct Registry {
    map: HashMap<BoxKey, BoxDecoderEntry>,
}

struct BoxDecoderEntry {
    inner: Box<dyn BoxDecoder>,
    name: String,
}

impl Registry {
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    /// Return a new registry with the given decoder added.
    pub fn with_decoder(mut self, key: BoxKey, name: &str, dec: Box<dyn BoxDecoder>) -> Self {
        self.map.insert(key, BoxDecoderEntry { inner: dec, name: name.to_string() });
        self
    }

    pub fn contains(&self, key: &BoxKey) -> bool {
        self.map.contains_key(key)
    }

    pub fn decoder_name(&self, key: &BoxKey) -> Option<&str> {
        self.map.get(key).map(|d| d.name.as_str())
    }

    /// Returns `None` if no decoder exists for the given key.
    pub fn decode(&self, r: &dyn RandomAccessReader, hdr: &BoxHeader) -> Option<anyhow::Result<ParsedPayload>> {
        self.map.get(&hdr.key()).map(|d| d.inner.decode(r, hdr))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------- Helpers ----------

/// Sequential field reader bounded by the payload and the reader length.
struct Fields<'a> {
    r: &'a dyn RandomAccessReader,
    pos: i64,
    end: i64,
    out: Vec<PayloadField>,
}

impl<'a> Fields<'a> {
    fn new(r: &'a dyn RandomAccessReader, hdr: &BoxHeader) -> Self {
        Self {
            r,
            pos: hdr.payload_range.start,
            end: hdr.payload_range.end.min(r.length()),
            out: Vec::new(),
        }
    }

    fn remaining(&self) -> i64 {
        (self.end - self.pos).max(0)
    }

    fn take<const N: usize>(&mut self) -> anyhow::Result<([u8; N], Range<i64>)> {
        if self.remaining() < N as i64 {
            bail!("{}-byte field at {} runs past payload end {}", N, self.pos, self.end);
        }
        let bytes = self.r.read_array::<N>(self.pos)?;
        let range = self.pos..self.pos + N as i64;
        self.pos += N as i64;
        Ok((bytes, range))
    }

    fn skip(&mut self, n: i64) -> anyhow::Result<()> {
        if self.remaining() < n {
            bail!("cannot skip {n} bytes at {}", self.pos);
        }
        self.pos += n;
        Ok(())
    }

    fn push(&mut self, label: &str, value: impl Display, range: Range<i64>) {
        self.out.push(PayloadField { label: label.to_string(), value: value.to_string(), byte_range: Some(range) });
    }

    fn u32(&mut self, label: &str) -> anyhow::Result<u32> {
        let (b, range) = self.take::<4>()?;
        let v = u32::from_be_bytes(b);
        self.push(label, v, range);
        Ok(v)
    }

    fn u64(&mut self, label: &str) -> anyhow::Result<u64> {
        let (b, range) = self.take::<8>()?;
        let v = u64::from_be_bytes(b);
        self.push(label, v, range);
        Ok(v)
    }

    /// 32-bit in version 0, 64-bit in version 1.
    fn versioned(&mut self, version: u8, label: &str) -> anyhow::Result<u64> {
        if version == 1 { self.u64(label) } else { self.u32(label).map(u64::from) }
    }

    fn brand(&mut self, label: &str) -> anyhow::Result<FourCC> {
        let (b, range) = self.take::<4>()?;
        let code = FourCC(b);
        self.push(label, code, range);
        Ok(code)
    }

    fn version_flags(&mut self) -> anyhow::Result<u8> {
        let (b, range) = self.take::<4>()?;
        let flags = u32::from_be_bytes([0, b[1], b[2], b[3]]);
        self.push("version", b[0], range.start..range.start + 1);
        self.push("flags", format!("0x{flags:06x}"), range.start + 1..range.end);
        Ok(b[0])
    }

    fn fixed_16_16(&mut self, label: &str) -> anyhow::Result<f64> {
        let (b, range) = self.take::<4>()?;
        let v = u32::from_be_bytes(b) as f64 / 65536.0;
        self.push(label, v, range);
        Ok(v)
    }

    fn finish(self) -> ParsedPayload {
        ParsedPayload { fields: self.out }
    }
}

fn lang_from_u16(code: u16) -> String {
    if code == 0 {
        return "und".to_string();
    }
    let c1 = ((code >> 10) & 0x1F) as u8 + 0x60;
    let c2 = ((code >> 5) & 0x1F) as u8 + 0x60;
    let c3 = (code & 0x1F) as u8 + 0x60;
    format!("{}{}{}", c1 as char, c2 as char, c3 as char)
}

// ---------- Decoders ----------

// ftyp: major + minor + compatible brands
pub struct FtypDecoder;

impl BoxDecoder for FtypDecoder {
    fn decode(&self, r: &dyn RandomAccessReader, hdr: &BoxHeader) -> anyhow::Result<ParsedPayload> {
        let mut f = Fields::new(r, hdr);
        f.brand("major_brand")?;
        f.u32("minor_version")?;

        let start = f.pos;
        let mut brands = Vec::new();
        while f.remaining() >= 4 {
            let (b, _) = f.take::<4>()?;
            brands.push(FourCC(b).to_string());
        }
        if !brands.is_empty() {
            let end = f.pos;
            f.push("compatible_brands", brands.join(", "), start..end);
        }
        Ok(f.finish())
    }
}

// mvhd: times, timescale, duration, next track id
pub struct MvhdDecoder;

impl BoxDecoder for MvhdDecoder {
    fn decode(&self, r: &dyn RandomAccessReader, hdr: &BoxHeader) -> anyhow::Result<ParsedPayload> {
        let mut f = Fields::new(r, hdr);
        let version = f.version_flags()?;
        f.versioned(version, "creation_time")?;
        f.versioned(version, "modification_time")?;
        f.u32("timescale")?;
        f.versioned(version, "duration")?;
        // rate, volume, reserved, matrix, pre_defined
        f.skip(4 + 2 + 10 + 36 + 24)?;
        f.u32("next_track_id")?;
        Ok(f.finish())
    }
}

// tkhd: track id, duration, width, height
pub struct TkhdDecoder;

impl BoxDecoder for TkhdDecoder {
    fn decode(&self, r: &dyn RandomAccessReader, hdr: &BoxHeader) -> anyhow::Result<ParsedPayload> {
        let mut f = Fields::new(r, hdr);
        let version = f.version_flags()?;
        f.versioned(version, "creation_time")?;
        f.versioned(version, "modification_time")?;
        f.u32("track_id")?;
        f.skip(4)?;
        f.versioned(version, "duration")?;
        // reserved[2], layer, alternate_group, volume, reserved, matrix
        f.skip(8 + 8 + 36)?;
        f.fixed_16_16("width")?;
        f.fixed_16_16("height")?;
        Ok(f.finish())
    }
}

// mdhd: timescale, duration, language
pub struct MdhdDecoder;

impl BoxDecoder for MdhdDecoder {
    fn decode(&self, r: &dyn RandomAccessReader, hdr: &BoxHeader) -> anyhow::Result<ParsedPayload> {
        let mut f = Fields::new(r, hdr);
        let version = f.version_flags()?;
        f.versioned(version, "creation_time")?;
        f.versioned(version, "modification_time")?;
        f.u32("timescale")?;
        f.versioned(version, "duration")?;
        let (b, range) = f.take::<2>()?;
        f.push("language", lang_from_u16(u16::from_be_bytes(b)), range);
        Ok(f.finish())
    }
}

// hdlr: handler type + name
pub struct HdlrDecoder;

const MAX_HANDLER_NAME: i64 = 256;

impl BoxDecoder for HdlrDecoder {
    fn decode(&self, r: &dyn RandomAccessReader, hdr: &BoxHeader) -> anyhow::Result<ParsedPayload> {
        let mut f = Fields::new(r, hdr);
        f.version_flags()?;
        f.skip(4)?; // pre_defined
        f.brand("handler_type")?;
        f.skip(12)?;

        let len = f.remaining().min(MAX_HANDLER_NAME);
        if len > 0 {
            let start = f.pos;
            let mut bytes = f.r.read(start, len)?;
            if let Some(nul) = bytes.iter().position(|&b| b == 0) {
                bytes.truncate(nul);
            }
            f.push("name", String::from_utf8_lossy(&bytes), start..start + len);
        }
        Ok(f.finish())
    }
}

// mfhd: sequence number
pub struct MfhdDecoder;

impl BoxDecoder for MfhdDecoder {
    fn decode(&self, r: &dyn RandomAccessReader, hdr: &BoxHeader) -> anyhow::Result<ParsedPayload> {
        let mut f = Fields::new(r, hdr);
        f.version_flags()?;
        f.u32("sequence_number")?;
        Ok(f.finish())
    }
}

// tfhd: track id
pub struct TfhdDecoder;

impl BoxDecoder for TfhdDecoder {
    fn decode(&self, r: &dyn RandomAccessReader, hdr: &BoxHeader) -> anyhow::Result<ParsedPayload> {
        let mut f = Fields::new(r, hdr);
        f.version_flags()?;
        f.u32("track_id")?;
        Ok(f.finish())
    }
}

// free / skip / mdat: payload extent only
pub struct ExtentDecoder;

impl BoxDecoder for ExtentDecoder {
    fn decode(&self, _r: &dyn RandomAccessReader, hdr: &BoxHeader) -> anyhow::Result<ParsedPayload> {
        let range = hdr.payload_range.clone();
        let mut out = ParsedPayload::default();
        out.fields.push(PayloadField {
            label: "payload_length".to_string(),
            value: hdr.payload_len().to_string(),
            byte_range: Some(range),
        });
        Ok(out)
    }
}

pub fn default_registry() -> Registry {
    let code = |c: &[u8; 4]| BoxKey::FourCC(FourCC(*c));

    Registry::new()
        .with_decoder(code(b"ftyp"), "ftyp", Box::new(FtypDecoder))
        .with_decoder(code(b"styp"), "styp", Box::new(FtypDecoder))
        .with_decoder(code(b"mvhd"), "mvhd", Box::new(MvhdDecoder))
        .with_decoder(code(b"tkhd"), "tkhd", Box::new(TkhdDecoder))
        .with_decoder(code(b"mdhd"), "mdhd", Box::new(MdhdDecoder))
        .with_decoder(code(b"hdlr"), "hdlr", Box::new(HdlrDecoder))
        .with_decoder(code(b"mfhd"), "mfhd", Box::new(MfhdDecoder))
        .with_decoder(code(b"tfhd"), "tfhd", Box::new(TfhdDecoder))
        .with_decoder(code(b"free"), "free", Box::new(ExtentDecoder))
        .with_decoder(code(b"skip"), "skip", Box::new(ExtentDecoder))
        .with_decoder(code(b"mdat"), "mdat", Box::new(ExtentDecoder))
}

static SHARED: LazyLock<Arc<Registry>> = LazyLock::new(|| Arc::new(default_registry()));

/// The default registry, built once and shared by every stream.
pub fn shared_default() -> Arc<Registry> {
    Arc::clone(&SHARED)
}
