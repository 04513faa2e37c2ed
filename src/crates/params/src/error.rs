use thiserror::Error;

pub type Result<T> = std::result::Result<T, ParamError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamError {
    #[error("parameter '{key}' has {actual} values, expected {expected} to match the table's established length")]
    SizeMismatch {
        key: String,
        expected: usize,
        actual: usize,
    },

    #[error("parameter '{key}' has {actual} labels, expected {expected}")]
    LabelSizeMismatch {
        key: String,
        expected: usize,
        actual: usize,
    },
}
