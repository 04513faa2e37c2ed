//! Status codes shared by every crate that talks to a backend scheduler.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionCode {
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCode {
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatusCode {
    Ok,
    NoJobs,
    Error,
}

/// A workflow step's execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    Initialized,
    Pending,
    Waiting,
    Running,
    Finishing,
    Finished,
    Queued,
    Failed,
    Incomplete,
    HwFailure,
    TimedOut,
    Unknown,
    Cancelled,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            State::Finished | State::Failed | State::Incomplete | State::Cancelled
        )
    }
}

impl Default for State {
    fn default() -> Self {
        State::Initialized
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::Initialized => "INITIALIZED",
            State::Pending => "PENDING",
            State::Waiting => "WAITING",
            State::Running => "RUNNING",
            State::Finishing => "FINISHING",
            State::Finished => "FINISHED",
            State::Queued => "QUEUED",
            State::Failed => "FAILED",
            State::Incomplete => "INCOMPLETE",
            State::HwFailure => "HWFAILURE",
            State::TimedOut => "TIMEDOUT",
            State::Unknown => "UNKNOWN",
            State::Cancelled => "CANCELLED",
        };
        write!(f, "{}", name)
    }
}
