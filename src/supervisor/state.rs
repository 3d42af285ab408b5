//! Supervisor state machine.

use serde::{Deserialize, Serialize};

/// Coarse lifecycle state of the supervised node.
///
/// `Failed` and `Stopped` end a session; `start` may begin a new one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisorState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl SupervisorState {
    /// Whether a new `start` is meaningful from this state.
    #[must_use]
    pub fn can_start(self) -> bool {
        matches!(self, Self::Idle | Self::Stopped | Self::Failed)
    }
}

/// State machine for tracking session progress.
#[derive(Debug, Clone, Default)]
pub struct SupervisorStateMachine {
    state: SupervisorState,
    starts: usize,
    failures: usize,
}

impl SupervisorStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn transition(&mut self, new_state: SupervisorState) {
        tracing::debug!(from = ?self.state, to = ?new_state, "State transition");
        match new_state {
            SupervisorState::Starting => self.starts = self.starts.saturating_add(1),
            SupervisorState::Failed => self.failures = self.failures.saturating_add(1),
            _ => {}
        }
        self.state = new_state;
    }

    #[must_use]
    pub fn stats(&self) -> SupervisorStats {
        SupervisorStats {
            starts: self.starts,
            failures: self.failures,
        }
    }
}

/// Session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorStats {
    pub starts: usize,
    pub failures: usize,
}
