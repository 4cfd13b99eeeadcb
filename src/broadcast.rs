//! Fan-out of one event stream to several subscribers.
//!
//! The underlying source runs at most once. Whichever subscriber is furthest
//! ahead pulls the next event from it; everyone else replays from the shared
//! buffer. Events reach every subscriber in the same order.

use crate::issues::ParseIssue;
use crate::pipeline::{EventSource, ParseError, ParseEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

type Item = Result<ParseEvent, ParseError>;

struct Shared<S> {
    /// Dropped as soon as it is exhausted, releasing its reader.
    source: Option<S>,
    buffer: Vec<Item>,
    detached: Vec<ParseIssue>,
}

impl<S: EventSource> Shared<S> {
    fn pull(&mut self) -> Option<Item> {
        let source = self.source.as_mut()?;
        match source.next() {
            Some(item) => {
                self.buffer.push(item.clone());
                Some(item)
            }
            None => {
                self.detached = source.detached_issues();
                self.source = None;
                debug!(events = self.buffer.len(), "broadcast source exhausted");
                None
            }
        }
    }
}

pub struct EventBroadcast<S> {
    shared: Arc<Mutex<Shared<S>>>,
}

impl<S: EventSource> EventBroadcast<S> {
    pub fn new(source: S) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared { source: Some(source), buffer: Vec::new(), detached: Vec::new() })),
        }
    }

    /// A subscriber that starts from the first event.
    pub fn subscribe(&self) -> Subscription<S> {
        Subscription { shared: Arc::clone(&self.shared), position: 0 }
    }

    /// Events produced by the source so far.
    pub fn produced(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.shared.lock().source.is_none()
    }
}

impl<S> Clone for EventBroadcast<S> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

pub struct Subscription<S> {
    shared: Arc<Mutex<Shared<S>>>,
    position: usize,
}

impl<S> Subscription<S> {
    pub fn position(&self) -> usize {
        self.position
    }
}

impl<S: EventSource> Iterator for Subscription<S> {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        let mut shared = self.shared.lock();
        let item = match shared.buffer.get(self.position) {
            Some(item) => item.clone(),
            None => shared.pull()?,
        };
        self.position += 1;
        Some(item)
    }
}

impl<S: EventSource> EventSource for Subscription<S> {
    fn detached_issues(&self) -> Vec<ParseIssue> {
        let shared = self.shared.lock();
        match &shared.source {
            Some(source) => source.detached_issues(),
            None => shared.detached.clone(),
        }
    }
}
