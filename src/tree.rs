//! Materialises an event stream into a box tree with per-node status and
//! running issue metrics.

use crate::boxes::BoxHeader;
use crate::catalog::BoxDescriptor;
use crate::issues::{IssueMetrics, ParseIssue, ParseIssueStore, ValidationIssue};
use crate::pipeline::{EventSource, ParseError, ParseEvent, ParseEventKind};
use crate::registry::ParsedPayload;
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// Health of a box. Declaration order is precedence: when several issues
/// apply, the greatest wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Valid,
    /// Some children were parsed, then traversal of the container stopped.
    Partial,
    /// The reader ended before the box's declared size.
    Trimmed,
    /// Declared size is impossible or exceeds the bytes available.
    Corrupt,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeStatus::Valid => "valid",
            NodeStatus::Partial => "partial",
            NodeStatus::Trimmed => "trimmed",
            NodeStatus::Corrupt => "corrupt",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseTreeNode {
    /// Start offset of the box; unique within one parse.
    pub id: i64,
    pub header: BoxHeader,
    pub metadata: Option<BoxDescriptor>,
    pub payload: Option<ParsedPayload>,
    pub validation_issues: Vec<ValidationIssue>,
    pub issues: Vec<ParseIssue>,
    pub status: NodeStatus,
    pub children: Vec<ParseTreeNode>,
}

impl ParseTreeNode {
    fn open(event: ParseEvent) -> Self {
        let header = event.kind.header().clone();
        Self {
            id: header.start(),
            header,
            metadata: event.metadata,
            payload: event.payload,
            validation_issues: event.validation_issues,
            issues: event.issues,
            status: NodeStatus::Valid,
            children: Vec::new(),
        }
    }

    fn settle_status(&mut self) {
        self.status = self.issues.iter().map(ParseIssue::implied_status).max().unwrap_or_default();
    }

    /// Depth-first search by node id.
    pub fn find(&self, id: i64) -> Option<&ParseTreeNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(ParseTreeNode::count).sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum ParseTreeState {
    #[default]
    Idle,
    Parsing,
    Finished,
    Failed(String),
}

/// Read-only copy of the store, including boxes that are still open.
#[derive(Debug, Clone, Serialize)]
pub struct ParseTreeSnapshot {
    pub state: ParseTreeState,
    pub nodes: Vec<ParseTreeNode>,
    pub metrics: IssueMetrics,
    pub detached_issues: Vec<ParseIssue>,
}

impl ParseTreeSnapshot {
    pub fn find(&self, id: i64) -> Option<&ParseTreeNode> {
        self.nodes.iter().find_map(|n| n.find(id))
    }
}

type Observer = Box<dyn FnMut(&ParseTreeState) + Send>;

/// Single owner of tree-building state for one parse.
///
/// Boxes are assembled on an explicit stack: a start event pushes a node, the
/// matching finish event pops it, settles its status and attaches it to its
/// parent (or the root list).
#[derive(Default)]
pub struct ParseTreeStore {
    state: ParseTreeState,
    roots: Vec<ParseTreeNode>,
    stack: Vec<ParseTreeNode>,
    issues: ParseIssueStore,
    detached: Vec<ParseIssue>,
    observers: Vec<Observer>,
}

impl ParseTreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ParseTreeState {
        &self.state
    }

    pub fn roots(&self) -> &[ParseTreeNode] {
        &self.roots
    }

    pub fn issues(&self) -> &ParseIssueStore {
        &self.issues
    }

    pub fn metrics(&self) -> IssueMetrics {
        self.issues.metrics()
    }

    pub fn detached_issues(&self) -> &[ParseIssue] {
        &self.detached
    }

    pub fn node(&self, id: i64) -> Option<&ParseTreeNode> {
        self.roots.iter().find_map(|n| n.find(id))
    }

    /// Called with the new state on every transition.
    pub fn subscribe(&mut self, observer: impl FnMut(&ParseTreeState) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    fn transition(&mut self, next: ParseTreeState) {
        if self.state == next {
            return;
        }
        self.state = next;
        for observer in &mut self.observers {
            observer(&self.state);
        }
    }

    pub fn apply(&mut self, event: ParseEvent) {
        if self.state != ParseTreeState::Parsing {
            self.transition(ParseTreeState::Parsing);
        }
        match event.kind {
            ParseEventKind::WillStartBox { .. } => self.stack.push(ParseTreeNode::open(event)),
            ParseEventKind::DidFinishBox { ref header, depth } => {
                let Some(mut node) = self.stack.pop() else {
                    warn!(box_type = %header.identifier(), depth, "finish event without an open box");
                    return;
                };
                node.validation_issues.extend(event.validation_issues);
                node.issues.extend(event.issues);
                node.settle_status();

                for issue in &node.issues {
                    self.issues.record(issue.clone(), depth);
                }
                for v in &node.validation_issues {
                    self.issues.record(ParseIssue::from_validation(v, &node.header), depth);
                }

                match self.stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => self.roots.push(node),
                }
            }
        }
    }

    /// Stream ended normally.
    pub fn finish(&mut self, detached: Vec<ParseIssue>) {
        self.record_detached(detached);
        info!(nodes = self.roots.iter().map(ParseTreeNode::count).sum::<usize>(), issues = self.issues.len(), "parse finished");
        self.transition(ParseTreeState::Finished);
    }

    /// Stream ended with `error`. Boxes still open stay visible in snapshots,
    /// and their issues count towards the metrics.
    pub fn fail(&mut self, error: &ParseError, detached: Vec<ParseIssue>) {
        self.record_detached(detached);
        for (depth, node) in self.stack.iter_mut().enumerate() {
            node.settle_status();
            for issue in &node.issues {
                self.issues.record(issue.clone(), depth);
            }
            for v in &node.validation_issues {
                self.issues.record(ParseIssue::from_validation(v, &node.header), depth);
            }
        }
        if let ParseError::Structural(issue) = error {
            self.issues.record(issue.clone(), self.stack.len());
        }
        info!(error = %error, "parse failed");
        self.transition(ParseTreeState::Failed(error.to_string()));
    }

    fn record_detached(&mut self, detached: Vec<ParseIssue>) {
        for issue in detached {
            self.issues.record(issue.clone(), 0);
            self.detached.push(issue);
        }
    }

    /// Drive `source` to completion.
    pub fn run<S: EventSource>(&mut self, mut source: S) -> Result<(), ParseError> {
        while let Some(item) = source.next() {
            match item {
                Ok(event) => self.apply(event),
                Err(e) => {
                    self.fail(&e, source.detached_issues());
                    return Err(e);
                }
            }
        }
        self.finish(source.detached_issues());
        Ok(())
    }

    /// Back to `Idle`, dropping the tree and all issues. Observers stay.
    pub fn reset(&mut self) {
        self.roots.clear();
        self.stack.clear();
        self.detached.clear();
        self.issues.reset();
        self.transition(ParseTreeState::Idle);
    }

    pub fn snapshot(&self) -> ParseTreeSnapshot {
        let mut nodes = self.roots.clone();
        let open = self.stack.iter().cloned().rev().reduce(|child, mut parent| {
            parent.children.push(child);
            parent
        });
        nodes.extend(open);
        ParseTreeSnapshot {
            state: self.state.clone(),
            nodes,
            metrics: self.issues.metrics(),
            detached_issues: self.detached.clone(),
        }
    }
}

impl fmt::Debug for ParseTreeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseTreeStore")
            .field("state", &self.state)
            .field("roots", &self.roots.len())
            .field("open", &self.stack.len())
            .field("issues", &self.issues.len())
            .finish()
    }
}
