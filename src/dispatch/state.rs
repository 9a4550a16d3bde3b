//! Run lifecycle.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DispatchError, Result};

/// Lifecycle of a single dispatch run.
///
/// Transitions only move forward, one step at a time:
/// `Idle -> Enqueuing -> Pacing -> Draining -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchState {
    /// Nothing has happened yet
    Idle,
    /// The producer is filling the queue
    Enqueuing,
    /// The gate is admitting requests and workers are being spawned
    Pacing,
    /// No more admissions; waiting for in-flight workers
    Draining,
    /// Every worker has joined
    Completed,
}

impl DispatchState {
    /// The state that follows this one, if any.
    pub fn next(&self) -> Option<DispatchState> {
        match self {
            DispatchState::Idle => Some(DispatchState::Enqueuing),
            DispatchState::Enqueuing => Some(DispatchState::Pacing),
            DispatchState::Pacing => Some(DispatchState::Draining),
            DispatchState::Draining => Some(DispatchState::Completed),
            DispatchState::Completed => None,
        }
    }

    /// Whether the run has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchState::Completed)
    }
}

/// Shared, observable run state.
#[derive(Debug)]
pub struct StateCell {
    state: RwLock<DispatchState>,
}

impl StateCell {
    /// Create a cell in the `Idle` state.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(DispatchState::Idle),
        }
    }

    /// Current state.
    pub fn get(&self) -> DispatchState {
        *self.state.read()
    }

    /// Move to `to`, which must be the direct successor of the current state.
    pub fn advance(&self, to: DispatchState) -> Result<()> {
        let mut state = self.state.write();
        let from = *state;
        if from.next() != Some(to) {
            return Err(DispatchError::InvalidTransition { from, to });
        }
        debug!(from = ?from, to = ?to, "Dispatch state transition");
        *state = to;
        Ok(())
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
