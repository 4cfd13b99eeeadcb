pub mod boxes;
pub mod broadcast;
pub mod catalog;
pub mod chunked;
pub mod decode;
pub mod issues;
pub mod mapped;
pub mod parser;
pub mod pipeline;
pub mod reader;
pub mod registry;
pub mod rules;
pub mod tree;
pub mod util;
pub mod validation;

pub use boxes::{BoxHeader, BoxKey, FourCC};
pub use broadcast::{EventBroadcast, Subscription};
pub use catalog::{BoxCatalog, BoxCategory, BoxDescriptor};
pub use chunked::ChunkedFileReader;
pub use decode::{DecodeError, ReaderExt};
pub use issues::{IssueMetrics, IssueOrdering, ParseIssue, ParseIssueStore, Severity, ValidationIssue};
pub use mapped::MappedReader;
pub use parser::{HeaderError, read_box_header};
pub use pipeline::{EventSource, EventStream, ParseError, ParseEvent, ParseEventKind, ParseMode, ParseOptions, parse};
pub use reader::{RandomAccessReader, ReaderError, ReaderKind, open_reader};
pub use registry::{BoxDecoder, ParsedPayload, PayloadField, Registry};
pub use tree::{NodeStatus, ParseTreeNode, ParseTreeSnapshot, ParseTreeState, ParseTreeStore};
pub use util::{HexDump, hex_dump, hex_range};
pub use validation::{RuleId, ValidationConfig, ValidationPreset, ValidationRule, Validator};
