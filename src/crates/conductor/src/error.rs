//! `ConductorError`: composes every lower-crate error into the single type
//! the CLI matches on to choose a process exit code.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConductorError>;

#[derive(Debug, Error)]
pub enum ConductorError {
    #[error(transparent)]
    Study(#[from] study::StudyError),

    #[error(transparent)]
    Scheduler(#[from] scheduler::SchedulerError),

    #[error(transparent)]
    Utils(#[from] utils::UtilsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("(de)serialization error: {0}")]
    Serde(String),

    /// A status query came back ERROR; the tick aborts but the driver keeps
    /// running and retries at the next tick.
    #[error("status query failed, retrying next tick: {0}")]
    RetryableStatus(String),

    #[error("priority registry lock poisoned")]
    LockPoisoned,

    #[error("priority policy '{0}' already registered")]
    DuplicatePolicy(String),
}

impl From<serde_yaml::Error> for ConductorError {
    fn from(err: serde_yaml::Error) -> Self {
        ConductorError::Serde(err.to_string())
    }
}

impl From<serde_json::Error> for ConductorError {
    fn from(err: serde_json::Error) -> Self {
        ConductorError::Serde(err.to_string())
    }
}

impl From<environment::EnvError> for ConductorError {
    fn from(err: environment::EnvError) -> Self {
        ConductorError::Study(study::StudyError::from(err))
    }
}

impl From<params::ParamError> for ConductorError {
    fn from(err: params::ParamError) -> Self {
        ConductorError::Study(study::StudyError::from(err))
    }
}
