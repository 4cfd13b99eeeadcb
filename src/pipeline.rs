//! Depth-first streaming box walker.
//!
//! [`EventStream`] is a pull-based iterator: every call to `next` performs
//! only the reads needed for one event, so dropping the stream is all it
//! takes to cancel a parse. Traversal state lives in an explicit stack of
//! frames rather than on the call stack.

use crate::boxes::BoxHeader;
use crate::catalog::{self, BoxCatalog, BoxDescriptor};
use crate::decode::DecodeError;
use crate::issues::{ParseIssue, Severity, ValidationIssue, codes};
use crate::parser::{HeaderError, first_child_offset, is_udta_terminator, read_box_header};
use crate::reader::{RandomAccessReader, ReaderError};
use crate::registry::{self, ParsedPayload, Registry};
use crate::validation::{ValidationConfig, Validator};
use serde::{Deserialize, Serialize};
use std::iter::FusedIterator;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    /// The first structural anomaly terminates the stream.
    Strict,
    /// Anomalies degrade the affected box; siblings are still visited.
    #[default]
    Tolerant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    pub mode: ParseMode,
    pub max_depth: usize,
    pub decode_payloads: bool,
    pub validation: ValidationConfig,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            mode: ParseMode::Tolerant,
            max_depth: 64,
            decode_payloads: true,
            validation: ValidationConfig::default(),
        }
    }
}

impl ParseOptions {
    pub fn strict() -> Self {
        Self { mode: ParseMode::Strict, ..Self::default() }
    }

    pub fn tolerant() -> Self {
        Self::default()
    }

    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseEventKind {
    WillStartBox { header: BoxHeader, depth: usize },
    DidFinishBox { header: BoxHeader, depth: usize },
}

impl ParseEventKind {
    pub fn header(&self) -> &BoxHeader {
        match self {
            ParseEventKind::WillStartBox { header, .. } | ParseEventKind::DidFinishBox { header, .. } => header,
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            ParseEventKind::WillStartBox { depth, .. } | ParseEventKind::DidFinishBox { depth, .. } => *depth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseEvent {
    pub kind: ParseEventKind,
    /// Stream position when the event was produced: the box start for
    /// `WillStartBox`, the (clamped) box end for `DidFinishBox`.
    pub offset: i64,
    pub metadata: Option<BoxDescriptor>,
    pub payload: Option<ParsedPayload>,
    pub validation_issues: Vec<ValidationIssue>,
    pub issues: Vec<ParseIssue>,
}

impl ParseEvent {
    pub fn header(&self) -> &BoxHeader {
        self.kind.header()
    }

    pub fn depth(&self) -> usize {
        self.kind.depth()
    }

    pub fn is_start(&self) -> bool {
        matches!(self.kind, ParseEventKind::WillStartBox { .. })
    }
}

/// Stream-terminating failure.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ParseError {
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error("{}: {}", .0.code, .0.message)]
    Structural(ParseIssue),
}

/// A sequence of parse events plus the issues that belong to no box.
pub trait EventSource: Iterator<Item = Result<ParseEvent, ParseError>> {
    /// Header failures at top level, where there is no enclosing box to blame.
    fn detached_issues(&self) -> Vec<ParseIssue>;
}

struct Frame {
    header: BoxHeader,
    depth: usize,
    metadata: Option<BoxDescriptor>,
    /// Next child offset.
    cursor: i64,
    /// Children may not extend past this (payload end clamped to the bytes available).
    limit: i64,
    descend: bool,
    /// Where the box ends in practice; reported as the finish offset.
    end: i64,
    pending: Vec<ParseIssue>,
}

pub struct EventStream<R> {
    reader: R,
    options: ParseOptions,
    catalog: Arc<BoxCatalog>,
    registry: Arc<Registry>,
    validator: Validator,
    stack: Vec<Frame>,
    top_cursor: i64,
    top_done: bool,
    finished: bool,
    detached: Vec<ParseIssue>,
}

impl<R: RandomAccessReader> EventStream<R> {
    pub fn new(reader: R, options: ParseOptions) -> Self {
        let validator = Validator::from_config(&options.validation);
        Self {
            reader,
            options,
            catalog: catalog::builtin(),
            registry: registry::shared_default(),
            validator,
            stack: Vec::new(),
            top_cursor: 0,
            top_done: false,
            finished: false,
            detached: Vec::new(),
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<BoxCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the rules built from the options.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn into_reader(self) -> R {
        self.reader
    }

    fn strict(&self) -> bool {
        self.options.mode == ParseMode::Strict
    }

    fn step(&mut self) -> Result<Option<ParseEvent>, ParseError> {
        loop {
            if self.finished {
                return Ok(None);
            }
            let length = self.reader.length();
            let next = match self.stack.last() {
                Some(f) if f.descend && f.cursor < f.limit => {
                    Some((f.cursor, f.header.payload_range.start..f.limit, f.depth + 1))
                }
                Some(_) => None,
                None if !self.top_done && self.top_cursor < length => Some((self.top_cursor, 0..length, 0)),
                None => {
                    self.finished = true;
                    return Ok(None);
                }
            };
            match next {
                Some((offset, parent, depth)) => {
                    if let Some(event) = self.start_box(offset, parent, depth)? {
                        return Ok(Some(event));
                    }
                }
                None => return Ok(self.finish_box()),
            }
        }
    }

    fn start_box(&mut self, offset: i64, parent: Range<i64>, depth: usize) -> Result<Option<ParseEvent>, ParseError> {
        if let Some(frame) = self.stack.last_mut() {
            if is_udta_terminator(&self.reader, &frame.header, offset) {
                trace!(offset, "udta terminator");
                frame.cursor = frame.limit;
                return Ok(None);
            }
        }
        let header = match read_box_header(&self.reader, offset, &parent) {
            Ok(h) => h,
            Err(HeaderError::Reader(e)) => return Err(e.into()),
            Err(err) => {
                self.header_failed(offset, &err)?;
                return Ok(None);
            }
        };

        let available = parent.end.min(self.reader.length());
        let id = header.start();
        let name = header.identifier();
        let mut issues = Vec::new();

        let zero_loop = header.total_size < header.header_size;
        if zero_loop {
            issues.push(
                ParseIssue::new(
                    Severity::Error,
                    codes::ZERO_SIZE_LOOP,
                    format!("{name} declares {} bytes, less than its {}-byte header", header.total_size, header.header_size),
                )
                .with_range(offset..header.payload_range.start)
                .affecting(id),
            );
        } else if header.end() > available {
            issues.push(
                ParseIssue::new(
                    Severity::Error,
                    codes::PAYLOAD_TRUNCATED,
                    format!("{name} declares {} bytes but only {} are available", header.total_size, available - offset),
                )
                .with_range(header.payload_range.start..header.end())
                .affecting(id),
            );
        }

        let mut descend = !zero_loop && catalog::is_container(header.typ);
        if descend && depth >= self.options.max_depth {
            issues.push(
                ParseIssue::new(
                    Severity::Warning,
                    codes::RECURSION_DEPTH_EXCEEDED,
                    format!("{name} at depth {depth} reaches the maximum depth {}", self.options.max_depth),
                )
                .with_range(offset..header.end().min(available))
                .affecting(id),
            );
            descend = false;
        }

        for issue in &issues {
            debug!(code = %issue.code, offset, "{}", issue.message);
        }
        if self.strict() && !issues.is_empty() {
            return Err(ParseError::Structural(issues.remove(0)));
        }

        // a box that makes no forward progress ends its parent's traversal
        let resume = if zero_loop { available } else { header.end().min(available) };
        match self.stack.last_mut() {
            Some(parent) => parent.cursor = resume,
            None => self.top_cursor = resume,
        }

        let payload = if self.options.decode_payloads && !zero_loop { self.decode_payload(&header)? } else { None };
        let limit = header.payload_range.end.min(available);
        let cursor = if descend { first_child_offset(&self.reader, &header).min(limit) } else { limit };
        let end = if zero_loop { header.payload_range.start.min(available) } else { header.end().min(available) };
        let metadata = self.catalog.describe(&header).cloned();

        let mut event = ParseEvent {
            kind: ParseEventKind::WillStartBox { header: header.clone(), depth },
            offset,
            metadata: metadata.clone(),
            payload,
            validation_issues: Vec::new(),
            issues,
        };
        self.validator.annotate(&mut event, &self.reader);
        trace!(box_type = %name, offset, depth, "will start box");

        self.stack.push(Frame { header, depth, metadata, cursor, limit, descend, end, pending: Vec::new() });
        Ok(Some(event))
    }

    fn finish_box(&mut self) -> Option<ParseEvent> {
        let frame = self.stack.pop()?;
        let mut event = ParseEvent {
            kind: ParseEventKind::DidFinishBox { header: frame.header, depth: frame.depth },
            offset: frame.end,
            metadata: frame.metadata,
            payload: None,
            validation_issues: Vec::new(),
            issues: frame.pending,
        };
        self.validator.annotate(&mut event, &self.reader);
        trace!(box_type = %event.header().identifier(), offset = event.offset, depth = frame.depth, "did finish box");
        Some(event)
    }

    /// A header that cannot be decoded ends traversal of its container, or of
    /// the top level when there is no container.
    fn header_failed(&mut self, offset: i64, err: &HeaderError) -> Result<(), ParseError> {
        let Some(code) = err.code() else {
            return Ok(());
        };
        let severity = if code == codes::TRAILING_BYTES { Severity::Warning } else { Severity::Error };
        let mut issue = ParseIssue::new(severity, code, err.to_string());
        if let Some(range) = err.byte_range(offset) {
            issue = issue.with_range(range);
        }
        debug!(code, offset, error = %err, "box header could not be decoded");

        let strict = self.strict();
        match self.stack.last_mut() {
            Some(parent) => {
                parent.descend = false;
                let issue = issue.affecting(parent.header.start());
                if strict {
                    return Err(ParseError::Structural(issue));
                }
                parent.pending.push(issue);
            }
            None => {
                self.top_done = true;
                if strict {
                    return Err(ParseError::Structural(issue));
                }
                self.detached.push(issue);
            }
        }
        Ok(())
    }

    /// Decoder failures only cost the payload; IO failures still end the stream.
    fn decode_payload(&self, header: &BoxHeader) -> Result<Option<ParsedPayload>, ParseError> {
        let Some(result) = self.registry.decode(&self.reader, header) else {
            return Ok(None);
        };
        match result {
            Ok(payload) => Ok(Some(payload)),
            Err(e) => {
                let io = match e.downcast_ref::<DecodeError>() {
                    Some(DecodeError::Reader(r)) => Some(r),
                    _ => e.downcast_ref::<ReaderError>(),
                };
                if let Some(r) = io.filter(|r| r.is_io()) {
                    return Err(ParseError::Reader(r.clone()));
                }
                debug!(box_type = %header.identifier(), error = %e, "payload not decoded");
                Ok(None)
            }
        }
    }
}

impl<R: RandomAccessReader> Iterator for EventStream<R> {
    type Item = Result<ParseEvent, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(event) => event.map(Ok),
            Err(e) => {
                self.finished = true;
                debug!(error = %e, "parse stream terminated");
                Some(Err(e))
            }
        }
    }
}

impl<R: RandomAccessReader> FusedIterator for EventStream<R> {}

impl<R: RandomAccessReader> EventSource for EventStream<R> {
    fn detached_issues(&self) -> Vec<ParseIssue> {
        self.detached.clone()
    }
}

/// Parse `reader` with `options`.
pub fn parse<R: RandomAccessReader>(reader: R, options: ParseOptions) -> EventStream<R> {
    EventStream::new(reader, options)
}
