//! Static catalog of well-known ISOBMFF / QuickTime boxes.
//!
//! Lookup is by [`BoxKey`], so `uuid` boxes can carry their own descriptor.
//! A missing descriptor is not an error; the box is still parsed
//! structurally and shown generically.

use crate::boxes::{BoxHeader, BoxKey, FourCC};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxCategory {
    FileType,
    Movie,
    Track,
    Media,
    SampleTable,
    SampleEntry,
    Fragment,
    Index,
    Metadata,
    MediaData,
    Padding,
    Protection,
    Vendor,
}

/// Human-readable description of a box type.
///
/// `version`/`flags` are set only where the format pins them to a single
/// value; the version/flags rule compares the payload against them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoxDescriptor {
    pub name: &'static str,
    pub summary: &'static str,
    pub category: BoxCategory,
    pub reference: &'static str,
    pub version: Option<u8>,
    pub flags: Option<u32>,
}

const ISO: &str = "ISO/IEC 14496-12";
const QT: &str = "QuickTime File Format";

const fn entry(
    code: &[u8; 4],
    name: &'static str,
    summary: &'static str,
    category: BoxCategory,
    reference: &'static str,
) -> (FourCC, BoxDescriptor) {
    (FourCC(*code), BoxDescriptor { name, summary, category, reference, version: None, flags: None })
}

const fn full(
    code: &[u8; 4],
    name: &'static str,
    summary: &'static str,
    category: BoxCategory,
    version: u8,
    flags: u32,
) -> (FourCC, BoxDescriptor) {
    (
        FourCC(*code),
        BoxDescriptor { name, summary, category, reference: ISO, version: Some(version), flags: Some(flags) },
    )
}

use BoxCategory::*;

static ENTRIES: &[(FourCC, BoxDescriptor)] = &[
    // file level
    entry(b"ftyp", "File Type", "Major brand, minor version and compatible brands.", FileType, ISO),
    entry(b"styp", "Segment Type", "Brand declaration for a media segment.", FileType, ISO),
    entry(b"mdat", "Media Data", "Raw sample data referenced by the sample tables.", MediaData, ISO),
    entry(b"free", "Free Space", "Padding that readers ignore.", Padding, ISO),
    entry(b"skip", "Skip", "Padding that readers ignore.", Padding, ISO),
    entry(b"wide", "Wide", "QuickTime placeholder reserving room for a 64-bit size.", Padding, QT),
    entry(b"pdin", "Progressive Download Info", "Download rate and initial delay pairs.", Index, ISO),
    // movie
    entry(b"moov", "Movie", "Container for all presentation metadata.", Movie, ISO),
    entry(b"mvhd", "Movie Header", "Timescale, duration and next track id for the presentation.", Movie, ISO),
    entry(b"trak", "Track", "Container for a single track.", Track, ISO),
    entry(b"tkhd", "Track Header", "Track id, duration, layer and presentation size.", Track, ISO),
    entry(b"tref", "Track Reference", "References from this track to other tracks.", Track, ISO),
    entry(b"edts", "Edit", "Container for the edit list.", Track, ISO),
    full(b"elst", "Edit List", "Maps presentation time to media time.", Track, 0, 0),
    entry(b"mdia", "Media", "Container for media information of a track.", Media, ISO),
    entry(b"mdhd", "Media Header", "Media timescale, duration and language.", Media, ISO),
    full(b"hdlr", "Handler Reference", "Declares the media handler type.", Media, 0, 0),
    entry(b"minf", "Media Information", "Container for media-specific information.", Media, ISO),
    full(b"vmhd", "Video Media Header", "Graphics mode and opcolor for video tracks.", Media, 0, 1),
    full(b"smhd", "Sound Media Header", "Stereo balance for audio tracks.", Media, 0, 0),
    full(b"nmhd", "Null Media Header", "Header for tracks without a specific media header.", Media, 0, 0),
    entry(b"dinf", "Data Information", "Container for data references.", Media, ISO),
    full(b"dref", "Data Reference", "Table of data references for the track's media.", Media, 0, 0),
    // sample tables
    entry(b"stbl", "Sample Table", "Container for the sample tables.", SampleTable, ISO),
    full(b"stsd", "Sample Description", "Coding type and initialization for samples.", SampleTable, 0, 0),
    full(b"stts", "Decoding Time to Sample", "Run-length table of sample durations.", SampleTable, 0, 0),
    entry(b"ctts", "Composition Time to Sample", "Composition offsets per sample run.", SampleTable, ISO),
    full(b"stsc", "Sample to Chunk", "Maps samples to chunks.", SampleTable, 0, 0),
    full(b"stsz", "Sample Size", "Per-sample or uniform sample sizes.", SampleTable, 0, 0),
    full(b"stz2", "Compact Sample Size", "Sample sizes packed into 4, 8 or 16 bits.", SampleTable, 0, 0),
    full(b"stco", "Chunk Offset", "32-bit chunk offsets.", SampleTable, 0, 0),
    full(b"co64", "Chunk Offset 64", "64-bit chunk offsets.", SampleTable, 0, 0),
    full(b"stss", "Sync Sample", "Sample numbers of random access points.", SampleTable, 0, 0),
    entry(b"sdtp", "Sample Dependency Type", "Per-sample dependency flags.", SampleTable, ISO),
    entry(b"sgpd", "Sample Group Description", "Descriptions of sample groups.", SampleTable, ISO),
    entry(b"sbgp", "Sample to Group", "Assigns samples to groups.", SampleTable, ISO),
    // sample entries
    entry(b"avc1", "AVC Sample Entry", "H.264 visual sample entry.", SampleEntry, "ISO/IEC 14496-15"),
    entry(b"avc3", "AVC Sample Entry", "H.264 visual sample entry with in-band parameter sets.", SampleEntry, "ISO/IEC 14496-15"),
    entry(b"hvc1", "HEVC Sample Entry", "H.265 visual sample entry.", SampleEntry, "ISO/IEC 14496-15"),
    entry(b"hev1", "HEVC Sample Entry", "H.265 visual sample entry with in-band parameter sets.", SampleEntry, "ISO/IEC 14496-15"),
    entry(b"av01", "AV1 Sample Entry", "AV1 visual sample entry.", SampleEntry, "AV1 ISOBMFF binding"),
    entry(b"mp4a", "MPEG-4 Audio Sample Entry", "AAC and other MPEG-4 audio.", SampleEntry, "ISO/IEC 14496-14"),
    entry(b"encv", "Encrypted Video Sample Entry", "Protected visual sample entry.", SampleEntry, "ISO/IEC 23001-7"),
    entry(b"enca", "Encrypted Audio Sample Entry", "Protected audio sample entry.", SampleEntry, "ISO/IEC 23001-7"),
    entry(b"avcC", "AVC Configuration", "H.264 decoder configuration record.", SampleEntry, "ISO/IEC 14496-15"),
    entry(b"hvcC", "HEVC Configuration", "H.265 decoder configuration record.", SampleEntry, "ISO/IEC 14496-15"),
    entry(b"esds", "Elementary Stream Descriptor", "MPEG-4 ES descriptor.", SampleEntry, "ISO/IEC 14496-14"),
    entry(b"pasp", "Pixel Aspect Ratio", "Horizontal and vertical spacing.", SampleEntry, ISO),
    // fragments
    entry(b"mvex", "Movie Extends", "Signals that the movie is fragmented.", Fragment, ISO),
    entry(b"mehd", "Movie Extends Header", "Overall duration of a fragmented movie.", Fragment, ISO),
    full(b"trex", "Track Extends", "Default sample values for fragments.", Fragment, 0, 0),
    entry(b"moof", "Movie Fragment", "Container for one movie fragment.", Fragment, ISO),
    full(b"mfhd", "Movie Fragment Header", "Fragment sequence number.", Fragment, 0, 0),
    entry(b"traf", "Track Fragment", "Container for one track's fragment.", Fragment, ISO),
    entry(b"tfhd", "Track Fragment Header", "Track id and fragment defaults.", Fragment, ISO),
    entry(b"tfdt", "Track Fragment Decode Time", "Base media decode time of the fragment.", Fragment, ISO),
    entry(b"trun", "Track Run", "Samples of one contiguous run.", Fragment, ISO),
    entry(b"mfra", "Movie Fragment Random Access", "Container for fragment random access tables.", Index, ISO),
    entry(b"tfra", "Track Fragment Random Access", "Random access points per track.", Index, ISO),
    full(b"mfro", "Movie Fragment Random Access Offset", "Size of the enclosing mfra box.", Index, 0, 0),
    entry(b"sidx", "Segment Index", "Subsegment sizes and durations.", Index, ISO),
    entry(b"ssix", "Subsegment Index", "Level assignments inside subsegments.", Index, ISO),
    entry(b"prft", "Producer Reference Time", "Wall-clock time of a media sample.", Index, ISO),
    entry(b"emsg", "Event Message", "Timed application event.", Index, "ISO/IEC 23009-1"),
    // metadata
    entry(b"udta", "User Data", "Container for user metadata.", Metadata, ISO),
    entry(b"meta", "Metadata", "Container for timed or untimed metadata.", Metadata, ISO),
    entry(b"ilst", "Metadata Item List", "iTunes-style metadata items.", Metadata, QT),
    entry(b"keys", "Metadata Item Keys", "Key table for QuickTime metadata.", Metadata, QT),
    entry(b"strk", "Sub Track", "Container for a sub track definition.", Metadata, ISO),
    entry(b"strd", "Sub Track Definition", "Container for sub track information.", Metadata, ISO),
    entry(b"cprt", "Copyright", "Copyright notice.", Metadata, ISO),
    // protection
    entry(b"sinf", "Protection Scheme Information", "Container describing the protection scheme.", Protection, ISO),
    entry(b"frma", "Original Format", "Sample entry type before protection.", Protection, ISO),
    full(b"schm", "Scheme Type", "Protection scheme type and version.", Protection, 0, 0),
    entry(b"schi", "Scheme Information", "Container for scheme-specific data.", Protection, ISO),
    entry(b"tenc", "Track Encryption", "Default encryption parameters.", Protection, "ISO/IEC 23001-7"),
    entry(b"pssh", "Protection System Specific Header", "DRM system initialization data.", Protection, "ISO/IEC 23001-7"),
    entry(b"senc", "Sample Encryption", "Per-sample IVs and subsample maps.", Protection, "ISO/IEC 23001-7"),
    entry(b"saiz", "Sample Auxiliary Information Sizes", "Sizes of auxiliary sample data.", Protection, ISO),
    entry(b"saio", "Sample Auxiliary Information Offsets", "Offsets of auxiliary sample data.", Protection, ISO),
];

/// PIFF sample encryption, the only extended type the catalog knows about.
pub const PIFF_SAMPLE_ENCRYPTION: [u8; 16] = [
    0xa2, 0x39, 0x4f, 0x52, 0x5a, 0x9b, 0x4f, 0x14, 0xa2, 0x44, 0x6c, 0x42, 0x7c, 0x64, 0x8d, 0xf4,
];

/// Box types whose payload is a sequence of child boxes.
pub const CONTAINERS: &[&[u8; 4]] = &[
    b"moov", b"trak", b"mdia", b"minf", b"dinf", b"stbl", b"edts", b"mvex", b"moof", b"traf", b"mfra",
    b"tref", b"udta", b"strk", b"strd", b"sinf", b"schi", b"stsd", b"meta", b"ilst",
];

pub fn is_container(code: FourCC) -> bool {
    CONTAINERS.iter().any(|c| **c == code.0)
}

/// Descriptor table keyed by type code or extended type.
///
/// Immutable once built; use [`BoxCatalog::with_entry`] to extend it.
#[derive(Debug, Clone, Default)]
pub struct BoxCatalog {
    map: HashMap<BoxKey, BoxDescriptor>,
}

impl BoxCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, key: BoxKey, descriptor: BoxDescriptor) -> Self {
        self.map.insert(key, descriptor);
        self
    }

    pub fn lookup(&self, key: &BoxKey) -> Option<&BoxDescriptor> {
        self.map.get(key)
    }

    pub fn describe(&self, header: &BoxHeader) -> Option<&BoxDescriptor> {
        self.lookup(&header.key())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

static BUILTIN: LazyLock<Arc<BoxCatalog>> = LazyLock::new(|| {
    let catalog = ENTRIES
        .iter()
        .fold(BoxCatalog::new(), |c, (code, d)| c.with_entry(BoxKey::FourCC(*code), d.clone()));
    Arc::new(catalog.with_entry(
        BoxKey::Uuid(PIFF_SAMPLE_ENCRYPTION),
        BoxDescriptor {
            name: "PIFF Sample Encryption",
            summary: "Protected Interoperable File Format per-sample encryption data.",
            category: Vendor,
            reference: "PIFF 1.1",
            version: None,
            flags: None,
        },
    ))
});

/// The built-in catalog, shared by every parse.
pub fn builtin() -> Arc<BoxCatalog> {
    Arc::clone(&BUILTIN)
}
