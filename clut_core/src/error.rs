use std::sync::Arc;

use thiserror::Error;

/// Errors from building, diffing and (de)serializing snapshots.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ClutError {
    /// The persisted form is not something this version can read.
    #[error("Format Error: {0}")]
    FormatError(String),

    /// The inputs to an operation are inconsistent (repositories, versions, interval lengths).
    #[error("Validation Error: {0}")]
    ValidationError(String),

    #[error("IO Error: {0}")]
    IoError(Arc<std::io::Error>),
}

pub type Result<T> = std::result::Result<T, ClutError>;

impl ClutError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        ClutError::FormatError(msg.into())
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        ClutError::ValidationError(msg.into())
    }
}

impl From<std::io::Error> for ClutError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return ClutError::FormatError(format!("Truncated input: {err}"));
        }
        ClutError::IoError(Arc::new(err))
    }
}
