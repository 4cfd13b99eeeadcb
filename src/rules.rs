//! Built-in validation rules.

use crate::boxes::{BoxHeader, FourCC};
use crate::decode::ReaderExt;
use crate::issues::ValidationIssue;
use crate::parser::{first_child_offset, is_udta_terminator};
use crate::pipeline::{ParseEvent, ParseEventKind};
use crate::reader::RandomAccessReader;
use crate::validation::{RuleId, ValidationRule};
use std::collections::BTreeSet;

/// A fresh instance of the built-in rule `id`.
pub fn build(id: RuleId) -> Box<dyn ValidationRule> {
    match id {
        RuleId::BoxSize => Box::new(BoxSizeRule::default()),
        RuleId::ContainerBoundary => Box::new(ContainerBoundaryRule::default()),
        RuleId::VersionFlags => Box::new(VersionFlagsRule),
        RuleId::FileTypeOrdering => Box::new(FileTypeOrderingRule::default()),
        RuleId::MovieDataOrdering => Box::new(MovieDataOrderingRule::default()),
        RuleId::UnknownBox => Box::new(UnknownBoxRule),
        RuleId::FragmentSequence => Box::new(FragmentSequenceRule::default()),
        RuleId::TopLevelOrdering => Box::new(TopLevelOrderingRule::default()),
    }
}

fn is_one_of(code: FourCC, set: &[&[u8; 4]]) -> bool {
    set.iter().any(|c| **c == code.0)
}

/// VR-001: declared size covers the header and stays inside parent and file.
#[derive(Default)]
pub struct BoxSizeRule {
    parent_ends: Vec<i64>,
}

impl ValidationRule for BoxSizeRule {
    fn id(&self) -> RuleId {
        RuleId::BoxSize
    }

    fn check(&mut self, event: &ParseEvent, reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStartBox { header, depth } = &event.kind else {
            return Vec::new();
        };
        let id = self.id();
        let name = header.identifier();
        let mut out = Vec::new();

        self.parent_ends.truncate(*depth);
        if header.total_size < header.header_size {
            out.push(id.issue(format!(
                "{name} declares {} bytes, smaller than its {}-byte header.",
                header.total_size, header.header_size
            )));
        } else {
            if let Some(&parent_end) = self.parent_ends.last() {
                if header.end() > parent_end {
                    out.push(id.issue(format!(
                        "{name} ends at {} beyond its parent's payload end {parent_end}.",
                        header.end()
                    )));
                }
            }
            if header.end() > reader.length() {
                out.push(id.issue(format!(
                    "{name} ends at {} beyond the end of the file ({} bytes).",
                    header.end(),
                    reader.length()
                )));
            }
        }
        self.parent_ends.push(header.payload_range.end);
        out
    }
}

struct Open {
    header: BoxHeader,
    next_child: i64,
    has_children: bool,
}

/// VR-002: children start where expected, don't overlap, and close the
/// container exactly at its payload end.
#[derive(Default)]
pub struct ContainerBoundaryRule {
    stack: Vec<Open>,
}

impl ContainerBoundaryRule {
    fn consume(&mut self, end: i64) {
        if let Some(parent) = self.stack.last_mut() {
            parent.next_child = parent.next_child.max(end);
            parent.has_children = true;
        }
    }
}

impl ValidationRule for ContainerBoundaryRule {
    fn id(&self) -> RuleId {
        RuleId::ContainerBoundary
    }

    fn check(&mut self, event: &ParseEvent, reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        let id = self.id();
        let mut out = Vec::new();

        match &event.kind {
            ParseEventKind::WillStartBox { header, depth } => {
                let depth = *depth;
                let name = header.identifier();
                if self.stack.len() > depth {
                    self.stack.truncate(depth);
                }
                if self.stack.len() < depth {
                    out.push(id.issue(format!("Start of {name} at depth {depth} has no open parent.")));
                    self.stack.clear();
                }

                if let Some(parent) = self.stack.last() {
                    let parent_name = parent.header.identifier();
                    let expected = parent.next_child;
                    if header.start() < expected {
                        out.push(id.issue(format!(
                            "{name} overlaps the previous child of {parent_name}: starts at {} before {expected}.",
                            header.start()
                        )));
                    } else if header.start() > expected {
                        out.push(id.issue(format!(
                            "{parent_name} expected its next child at {expected} but found {name} at {}.",
                            header.start()
                        )));
                    }
                    let parent_end = parent.header.payload_range.end;
                    if header.end() > parent_end {
                        out.push(id.issue(format!(
                            "{name} ends at {} beyond {parent_name} payload end {parent_end}.",
                            header.end()
                        )));
                    }
                }
                self.consume(header.end());

                self.stack.push(Open {
                    header: header.clone(),
                    next_child: first_child_offset(reader, header),
                    has_children: false,
                });
            }
            ParseEventKind::DidFinishBox { header, depth } => {
                let depth = *depth;
                if self.stack.len() > depth + 1 {
                    self.stack.truncate(depth + 1);
                }
                let Some(open) = self.stack.pop().filter(|_| self.stack.len() == depth) else {
                    out.push(id.issue(format!(
                        "Finish of {} at depth {depth} has no matching start.",
                        header.identifier()
                    )));
                    self.stack.clear();
                    return out;
                };
                if open.header != *header {
                    out.push(id.issue(format!(
                        "Expected to finish {} but received {}.",
                        open.header.identifier(),
                        header.identifier()
                    )));
                }
                let expected_end = open.header.payload_range.end;
                let closed = open.next_child == expected_end
                    || is_udta_terminator(reader, &open.header, open.next_child);
                if open.has_children && !closed {
                    out.push(id.issue(format!(
                        "{} expected to close at {expected_end} but children consumed up to {}.",
                        open.header.identifier(),
                        open.next_child
                    )));
                }
                self.consume(header.end());
            }
        }
        out
    }
}

/// VR-003: payload version/flags match what the catalog expects.
pub struct VersionFlagsRule;

impl ValidationRule for VersionFlagsRule {
    fn id(&self) -> RuleId {
        RuleId::VersionFlags
    }

    fn check(&mut self, event: &ParseEvent, reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStartBox { header, .. } = &event.kind else {
            return Vec::new();
        };
        let Some(descriptor) = &event.metadata else {
            return Vec::new();
        };
        if descriptor.version.is_none() && descriptor.flags.is_none() {
            return Vec::new();
        }
        let id = self.id();
        let name = header.identifier();
        if header.payload_len() < 4 {
            return vec![id.issue(format!(
                "{name} payload too small for version/flags (expected 4 bytes, found {}).",
                header.payload_len()
            ))];
        }

        let raw = match reader.read_u32(header.payload_range.start) {
            Ok(v) => v,
            Err(e) => return vec![id.issue(format!("{name} version/flags could not be read: {e}."))],
        };
        let version = (raw >> 24) as u8;
        let flags = raw & 0x00ff_ffff;

        let mut out = Vec::new();
        if let Some(expected) = descriptor.version.filter(|v| *v != version) {
            out.push(id.issue(format!("{name} version mismatch: expected {expected} but found {version}.")));
        }
        if let Some(expected) = descriptor.flags.filter(|f| *f != flags) {
            out.push(id.issue(format!("{name} flags mismatch: expected 0x{expected:06x} but found 0x{flags:06x}.")));
        }
        out
    }
}

const MEDIA_BOXES: &[&[u8; 4]] =
    &[b"moov", b"trak", b"mdia", b"minf", b"stbl", b"moof", b"traf", b"mvex", b"mdat", b"sidx", b"styp"];

/// VR-004: `ftyp` comes before any media box.
#[derive(Default)]
pub struct FileTypeOrderingRule {
    seen_ftyp: bool,
}

impl ValidationRule for FileTypeOrderingRule {
    fn id(&self) -> RuleId {
        RuleId::FileTypeOrdering
    }

    fn check(&mut self, event: &ParseEvent, _reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStartBox { header, .. } = &event.kind else {
            return Vec::new();
        };
        if &header.typ.0 == b"ftyp" {
            self.seen_ftyp = true;
            return Vec::new();
        }
        if self.seen_ftyp || !is_one_of(header.typ, MEDIA_BOXES) {
            return Vec::new();
        }
        vec![self.id().issue(format!("Encountered {} before the file type box (ftyp).", header.identifier()))]
    }
}

const STREAMING_INDICATORS: &[&[u8; 4]] = &[b"moof", b"mvex", b"sidx", b"ssix", b"prft", b"styp"];

/// VR-005: `moov` comes before `mdat` unless the file is fragmented or
/// segmented.
#[derive(Default)]
pub struct MovieDataOrderingRule {
    seen_moov: bool,
    streaming: bool,
}

impl ValidationRule for MovieDataOrderingRule {
    fn id(&self) -> RuleId {
        RuleId::MovieDataOrdering
    }

    fn check(&mut self, event: &ParseEvent, _reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStartBox { header, .. } = &event.kind else {
            return Vec::new();
        };
        if is_one_of(header.typ, STREAMING_INDICATORS) {
            self.streaming = true;
        }
        match &header.typ.0 {
            b"moov" => self.seen_moov = true,
            b"mdat" if !self.seen_moov && !self.streaming => {
                return vec![self.id().issue(
                    "Movie data box (mdat) encountered before movie box (moov); initialization metadata should precede media.",
                )];
            }
            _ => {}
        }
        Vec::new()
    }
}

/// VR-006: box types the catalog does not describe.
pub struct UnknownBoxRule;

impl ValidationRule for UnknownBoxRule {
    fn id(&self) -> RuleId {
        RuleId::UnknownBox
    }

    fn check(&mut self, event: &ParseEvent, _reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        match &event.kind {
            ParseEventKind::WillStartBox { header, .. } if event.metadata.is_none() => {
                vec![self.id().issue(format!("{} is not in the box catalog.", header.identifier()))]
            }
            _ => Vec::new(),
        }
    }
}

/// VR-016: movie fragment sequence numbers start at 1 and strictly increase.
/// Reads the decoded `mfhd` payload; boxes without one are skipped.
#[derive(Default)]
pub struct FragmentSequenceRule {
    /// Sequence number and offset of the previous `mfhd`.
    last: Option<(u32, i64)>,
}

impl ValidationRule for FragmentSequenceRule {
    fn id(&self) -> RuleId {
        RuleId::FragmentSequence
    }

    fn check(&mut self, event: &ParseEvent, _reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStartBox { header, .. } = &event.kind else {
            return Vec::new();
        };
        if &header.typ.0 != b"mfhd" {
            return Vec::new();
        }
        let Some(sequence) = event
            .payload
            .as_ref()
            .and_then(|p| p.value("sequence_number"))
            .and_then(|v| v.parse::<u32>().ok())
        else {
            return Vec::new();
        };

        let id = self.id();
        let offset = header.start();
        let mut out = Vec::new();
        if sequence == 0 {
            out.push(id.issue(format!("mfhd at {offset} has sequence number zero; fragments should start at 1.")));
        }
        if let Some((previous, previous_offset)) = self.last.filter(|(p, _)| sequence <= *p) {
            out.push(id.issue(format!(
                "mfhd at {offset} has non-monotonic sequence number {sequence} (mfhd at {previous_offset} used {previous})."
            )));
        }
        self.last = Some((sequence, offset));
        out
    }
}

const PADDING_BOXES: &[&[u8; 4]] = &[b"free", b"skip", b"wide"];
const SEGMENT_INDICATORS: &[&[u8; 4]] = &[b"sidx", b"styp", b"moof"];

/// E3: top-level boxes in unusual places around `ftyp` and `moov`.
///
/// Padding and `uuid` boxes may appear anywhere. Between `ftyp` and `moov`
/// segment indicators and `mdat` are expected too, but a `moov` arriving after
/// media data that followed a segment indicator is still worth a note. Each
/// advisory is raised at most once.
#[derive(Default)]
pub struct TopLevelOrderingRule {
    seen_ftyp: bool,
    seen_moov: bool,
    before_ftyp: BTreeSet<String>,
    between: BTreeSet<String>,
    indicators: BTreeSet<String>,
    media: BTreeSet<String>,
}

/// `"a"`, `"a" and "b"`, or `"a" and N others`.
fn describe(codes: &BTreeSet<String>) -> String {
    let mut it = codes.iter();
    match (it.next(), it.next()) {
        (None, _) => String::new(),
        (Some(a), None) => format!("\"{a}\""),
        (Some(a), Some(b)) if codes.len() == 2 => format!("\"{a}\" and \"{b}\""),
        (Some(a), Some(_)) => format!("\"{a}\" and {} others", codes.len() - 1),
    }
}

impl TopLevelOrderingRule {
    fn file_type_advisory(&self) -> Vec<ValidationIssue> {
        if self.before_ftyp.is_empty() {
            return Vec::new();
        }
        vec![self.id().issue(format!(
            "Top-level box {} appeared before the file type box (ftyp); verify muxer packaging order.",
            describe(&self.before_ftyp)
        ))]
    }

    fn movie_advisory(&self) -> Vec<ValidationIssue> {
        if !self.between.is_empty() {
            return vec![self.id().issue(format!(
                "Top-level box {} appeared between file type (ftyp) and movie (moov) boxes; review packaging workflow.",
                describe(&self.between)
            ))];
        }
        if !self.media.is_empty() && !self.indicators.is_empty() {
            return vec![self.id().issue(format!(
                "Movie box (moov) arrived after media payload {} following segment indicators {}; confirm initialization metadata remains accessible.",
                describe(&self.media),
                describe(&self.indicators)
            ))];
        }
        Vec::new()
    }
}

impl ValidationRule for TopLevelOrderingRule {
    fn id(&self) -> RuleId {
        RuleId::TopLevelOrdering
    }

    fn check(&mut self, event: &ParseEvent, _reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStartBox { header, depth: 0 } = &event.kind else {
            return Vec::new();
        };
        let typ = header.typ;
        let name = header.identifier();
        let padding = typ == FourCC::UUID || is_one_of(typ, PADDING_BOXES);
        let indicator = is_one_of(typ, SEGMENT_INDICATORS);
        let media = &typ.0 == b"mdat";

        match &typ.0 {
            b"ftyp" if !self.seen_ftyp => {
                self.seen_ftyp = true;
                self.file_type_advisory()
            }
            b"ftyp" => Vec::new(),
            _ if !self.seen_ftyp => {
                if !padding {
                    self.before_ftyp.insert(name);
                }
                Vec::new()
            }
            _ if self.seen_moov => Vec::new(),
            b"moov" => {
                self.seen_moov = true;
                self.movie_advisory()
            }
            _ => {
                if indicator {
                    self.indicators.insert(name);
                } else if media {
                    self.media.insert(name);
                } else if !padding {
                    self.between.insert(name);
                }
                Vec::new()
            }
        }
    }
}
