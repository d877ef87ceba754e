//! Supervised process state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle state of the process owned by a supervisor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    #[default]
    Idle,
    Starting,
    Paused,
    Running,
    StoppedExternally,
    Exited,
}

impl ProcessState {
    /// Whether a child exists that has not been reaped yet.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Paused | Self::Running | Self::StoppedExternally
        )
    }

    /// Whether the recorded pid refers to a process started by this run.
    #[must_use]
    pub fn has_pid(self) -> bool {
        matches!(
            self,
            Self::Paused | Self::Running | Self::StoppedExternally | Self::Exited
        )
    }
}

/// Tracks the current state and the pid it belongs to.
#[derive(Debug, Clone, Default)]
pub struct ProcessStateMachine {
    state: ProcessState,
    pid: Option<u32>,
}

impl ProcessStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// The pid, exposed only in states where it is meaningful.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        if self.state.has_pid() {
            self.pid
        } else {
            None
        }
    }

    /// Begin a new run for a freshly spawned child.
    pub fn begin(&mut self, pid: u32) {
        tracing::debug!(from = ?self.state, pid, "Starting process");
        self.pid = Some(pid);
        self.state = ProcessState::Starting;
    }

    pub fn transition(&mut self, new_state: ProcessState) {
        tracing::debug!(from = ?self.state, to = ?new_state, pid = ?self.pid, "State transition");
        self.state = new_state;
    }

    /// Move to `to` only if currently in `from`. Returns whether it moved.
    pub fn transition_from(&mut self, from: ProcessState, to: ProcessState) -> bool {
        if self.state == from {
            self.transition(to);
            true
        } else {
            false
        }
    }

    /// Forget the previous run after a failed start.
    pub fn reset(&mut self) {
        self.state = ProcessState::Idle;
        self.pid = None;
    }
}
