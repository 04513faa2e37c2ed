//! Error type shared by every adapter in this crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("malformed step '{0}': a StudyStep requires a run entry")]
    MalformedStep(String),

    #[error("failed to launch submission command for step '{step}': {detail}")]
    SubmissionFailed { step: String, detail: String },

    #[error("unknown adapter type '{0}'")]
    UnknownAdapter(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
