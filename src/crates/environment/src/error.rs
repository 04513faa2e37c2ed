use thiserror::Error;

pub type Result<T> = std::result::Result<T, EnvError>;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("environment item '{0}' is incomplete: name and value must both be set")]
    Incomplete(String),

    #[error("duplicate name '{0}' in study environment, all names must be unique")]
    DuplicateName(String),

    #[error("path dependency '{name}' points at '{path}', which does not exist")]
    PathNotFound { name: String, path: String },

    #[error("git dependency '{0}' may set at most one of branch, tag, hash")]
    ConflictingGitRef(String),

    #[error("destination path '{0}' already exists")]
    DestinationExists(String),

    #[error("git command failed for dependency '{name}': {detail}")]
    GitCommandFailed { name: String, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
