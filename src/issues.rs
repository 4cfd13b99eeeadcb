//! Parse issues, validation issues and the per-session issue store.

use crate::boxes::BoxHeader;
use crate::tree::NodeStatus;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

/// Stable issue codes raised by the parser itself.
pub mod codes {
    pub const PAYLOAD_TRUNCATED: &str = "payload.truncated";
    pub const ZERO_SIZE_LOOP: &str = "guard.zero_size_loop";
    pub const RECURSION_DEPTH_EXCEEDED: &str = "guard.recursion_depth_exceeded";
    pub const HEADER_TRUNCATED_FIELD: &str = "header.truncated_field";
    pub const HEADER_INVALID_FOURCC: &str = "header.invalid_fourcc";
    pub const TRAILING_BYTES: &str = "structure.trailing_bytes";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// Result of a semantic validation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub rule_id: String,
    pub message: String,
    pub severity: Severity,
}

impl ValidationIssue {
    pub fn new(rule_id: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self { rule_id: rule_id.into(), message: message.into(), severity }
    }
}

/// Structural problem found by the parser or reader layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseIssue {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub byte_range: Option<Range<i64>>,
    pub affected_node_ids: Vec<i64>,
}

impl ParseIssue {
    pub fn new(severity: Severity, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.into(),
            message: message.into(),
            byte_range: None,
            affected_node_ids: Vec::new(),
        }
    }

    pub fn with_range(mut self, range: Range<i64>) -> Self {
        self.byte_range = Some(range);
        self
    }

    pub fn affecting(mut self, node_id: i64) -> Self {
        if !self.affected_node_ids.contains(&node_id) {
            self.affected_node_ids.push(node_id);
        }
        self
    }

    /// Lift a rule result into the store's vocabulary, pinned to `header`.
    pub fn from_validation(issue: &ValidationIssue, header: &BoxHeader) -> Self {
        ParseIssue::new(issue.severity, issue.rule_id.clone(), issue.message.clone())
            .with_range(header.range.clone())
            .affecting(header.start())
    }

    /// The node status this issue forces on the box it is attached to.
    pub fn implied_status(&self) -> NodeStatus {
        if self.severity < Severity::Warning {
            return NodeStatus::Valid;
        }
        match self.code.as_str() {
            codes::PAYLOAD_TRUNCATED | codes::ZERO_SIZE_LOOP => NodeStatus::Corrupt,
            codes::HEADER_TRUNCATED_FIELD => NodeStatus::Trimmed,
            codes::HEADER_INVALID_FOURCC | codes::TRAILING_BYTES | codes::RECURSION_DEPTH_EXCEEDED => {
                NodeStatus::Partial
            }
            _ => NodeStatus::Valid,
        }
    }

    fn first_node(&self) -> Option<i64> {
        self.affected_node_ids.first().copied()
    }

    fn start(&self) -> Option<i64> {
        self.byte_range.as_ref().map(|r| r.start)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IssueMetrics {
    pub error_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
    pub deepest_affected_depth: usize,
    pub total_count: usize,
}

impl IssueMetrics {
    pub fn count(&self, severity: Severity) -> usize {
        match severity {
            Severity::Error => self.error_count,
            Severity::Warning => self.warning_count,
            Severity::Info => self.info_count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueRecord {
    pub issue: ParseIssue,
    pub depth: usize,
}

/// Display orderings. Aggregation itself is always in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueOrdering {
    /// Byte offset, then severity (error first), then code.
    #[default]
    Offset,
    /// First affected node, then severity, then code, then byte offset.
    AffectedNode,
    /// Severity alone (error first); equal severities keep arrival order.
    Severity,
}

fn none_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl IssueOrdering {
    pub fn compare(&self, a: &ParseIssue, b: &ParseIssue) -> Ordering {
        let severity_then_code = || b.severity.cmp(&a.severity).then_with(|| a.code.cmp(&b.code));
        match self {
            IssueOrdering::Offset => none_last(a.start(), b.start()).then_with(severity_then_code),
            IssueOrdering::AffectedNode => none_last(a.first_node(), b.first_node())
                .then_with(severity_then_code)
                .then_with(|| none_last(a.start(), b.start())),
            IssueOrdering::Severity => b.severity.cmp(&a.severity),
        }
    }
}

/// Running collection of issues for one parse session.
#[derive(Debug, Clone, Default)]
pub struct ParseIssueStore {
    records: Vec<IssueRecord>,
    by_node: HashMap<i64, Vec<usize>>,
    metrics: IssueMetrics,
}

impl ParseIssueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, issue: ParseIssue, depth: usize) {
        let index = self.records.len();
        for id in &issue.affected_node_ids {
            self.by_node.entry(*id).or_default().push(index);
        }
        match issue.severity {
            Severity::Error => self.metrics.error_count += 1,
            Severity::Warning => self.metrics.warning_count += 1,
            Severity::Info => self.metrics.info_count += 1,
        }
        self.metrics.total_count += 1;
        self.metrics.deepest_affected_depth = self.metrics.deepest_affected_depth.max(depth);
        self.records.push(IssueRecord { issue, depth });
    }

    pub fn record_all(&mut self, issues: impl IntoIterator<Item = ParseIssue>, depth: usize) {
        for issue in issues {
            self.record(issue, depth);
        }
    }

    pub fn metrics(&self) -> IssueMetrics {
        self.metrics
    }

    pub fn records(&self) -> &[IssueRecord] {
        &self.records
    }

    pub fn issues(&self) -> impl Iterator<Item = &ParseIssue> {
        self.records.iter().map(|r| &r.issue)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn issues_for_node(&self, node_id: i64) -> Vec<&ParseIssue> {
        self.by_node
            .get(&node_id)
            .map(|idx| idx.iter().map(|&i| &self.records[i].issue).collect())
            .unwrap_or_default()
    }

    /// Issues whose byte range overlaps `range`.
    pub fn issues_in_range(&self, range: Range<i64>) -> Vec<&ParseIssue> {
        self.issues()
            .filter(|i| {
                i.byte_range
                    .as_ref()
                    .is_some_and(|r| r.start < range.end && range.start < r.end)
            })
            .collect()
    }

    pub fn sorted(&self, ordering: IssueOrdering) -> Vec<&ParseIssue> {
        let mut out: Vec<&ParseIssue> = self.issues().collect();
        out.sort_by(|a, b| ordering.compare(a, b));
        out
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
