use thiserror::Error;

pub type Result<T> = std::result::Result<T, StudyError>;

#[derive(Debug, Error)]
pub enum StudyError {
    #[error("graph error: {0}")]
    Graph(#[from] dag::DagError),

    #[error("parameter error: {0}")]
    Parameter(#[from] params::ParamError),

    #[error("environment error: {0}")]
    Environment(#[from] environment::EnvError),

    #[error("{0}")]
    Utils(#[from] utils::UtilsError),

    #[error("invalid walltime value '{0}': expected seconds, minutes, or H:M:S")]
    InvalidWalltime(String),

    #[error("study '{0}' is not set up for staging; call setup() first")]
    NotSetUp(String),

    #[error("workspace reference '{0}' used before it would be generated")]
    WorkspaceUsedBeforeGeneration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("(de)serialization error: {0}")]
    Serde(String),
}

impl From<bincode::Error> for StudyError {
    fn from(e: bincode::Error) -> Self {
        StudyError::Serde(e.to_string())
    }
}
