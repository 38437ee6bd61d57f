//! Per-schedule duty state: a stack of at most two roster snapshots.

use std::collections::VecDeque;

use relay_core::error::{RelayError, Result};
use relay_core::types::RosterSnapshot;

use crate::diff::{Transition, diff};

/// Deepest history kept per schedule: previous + current.
pub const MAX_DEPTH: usize = 2;

/// Bounded snapshot history for one schedule. The top of the stack is the
/// most recently observed roster.
#[derive(Debug)]
pub struct DutyState {
    name: String,
    elements: VecDeque<RosterSnapshot>,
}

impl DutyState {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            elements: VecDeque::with_capacity(MAX_DEPTH),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Push a snapshot; the oldest one is discarded beyond `MAX_DEPTH`.
    pub fn push(&mut self, snapshot: RosterSnapshot) {
        self.elements.push_back(snapshot);
        while self.elements.len() > MAX_DEPTH {
            self.elements.pop_front();
        }
    }

    /// Most recent snapshot.
    pub fn peek(&self) -> Result<&RosterSnapshot> {
        self.elements
            .back()
            .ok_or_else(|| RelayError::EmptyState(self.name.clone()))
    }

    /// Remove and return the most recent snapshot.
    pub fn pop(&mut self) -> Result<RosterSnapshot> {
        self.elements
            .pop_back()
            .ok_or_else(|| RelayError::EmptyState(self.name.clone()))
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.elements.len()
    }

    /// Store `snapshot` and return what changed since the previous one.
    ///
    /// The very first snapshot of a schedule only seeds the state and never
    /// produces a transition.
    pub fn record_and_diff(&mut self, snapshot: RosterSnapshot) -> Transition {
        let transition = match self.peek() {
            Ok(previous) => diff(&previous.members, &snapshot.members),
            Err(_) => {
                tracing::debug!(
                    "🌱 First roster for '{}' ({} members), nothing to diff",
                    self.name,
                    snapshot.len()
                );
                Transition::default()
            }
        };
        self.push(snapshot);
        transition
    }
}
