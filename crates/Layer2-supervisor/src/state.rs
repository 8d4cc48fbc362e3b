//! Supervised process state machine
//!
//! ```text
//! NotStarted → Starting → Running ──→ Stopping → Stopped
//!                  │          └────→ Crashed
//!                  └──→ FailedToStart
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    /// Nothing spawned yet
    NotStarted,

    /// Start sequence in progress
    Starting,

    /// Child alive and past readiness
    Running,

    /// Start sequence aborted
    FailedToStart(String),

    /// Termination requested, waiting for exit
    Stopping,

    /// Exited after an explicit stop
    Stopped(Option<i32>),

    /// Exited on its own
    Crashed(Option<i32>),
}

impl ProcessState {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessState::FailedToStart(_) | ProcessState::Stopped(_) | ProcessState::Crashed(_)
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running)
    }

    /// Exit code once the child is gone
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessState::Stopped(code) | ProcessState::Crashed(code) => *code,
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProcessState::NotStarted => "NotStarted",
            ProcessState::Starting => "Starting",
            ProcessState::Running => "Running",
            ProcessState::FailedToStart(_) => "FailedToStart",
            ProcessState::Stopping => "Stopping",
            ProcessState::Stopped(_) => "Stopped",
            ProcessState::Crashed(_) => "Crashed",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Answer to a status query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    NotStarted,
    Running { pid: u32 },
    Stopped { exit_code: Option<i32> },
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::NotStarted => write!(f, "Not started"),
            ProcessStatus::Running { pid } => write!(f, "Running (PID: {})", pid),
            ProcessStatus::Stopped { exit_code: Some(code) } => {
                write!(f, "Stopped (exit code: {})", code)
            }
            ProcessStatus::Stopped { exit_code: None } => write!(f, "Stopped (exit code unknown)"),
        }
    }
}
