use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use clut_core::ClutError;
use patch_client::PatchClientError;
use thiserror::Error;

/// Errors that can occur while reconstructing files from a snapshot diff.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ReconstructionError {
    #[error("CLUT Error: {0}")]
    ClutError(#[from] ClutError),

    #[error("Patch Client Error: {0}")]
    PatchClientError(#[from] PatchClientError),

    #[error("Sink Error at {path}: {source}")]
    SinkError { path: String, source: Arc<std::io::Error> },

    #[error("IO Error: {0}")]
    IoError(Arc<std::io::Error>),

    #[error("Decompression Error: {0}")]
    DecompressionError(String),

    #[error("Corrupted Reconstruction: {0}")]
    CorruptedReconstruction(String),

    #[error("No base patch URL: the diff carries none and none was given")]
    MissingBaseUrl,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal Error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, ReconstructionError>;

impl ReconstructionError {
    pub(crate) fn sink(path: impl Into<String>, err: std::io::Error) -> Self {
        ReconstructionError::SinkError {
            path: path.into(),
            source: Arc::new(err),
        }
    }

    /// Whether this error is a cancellation at any layer.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            ReconstructionError::Cancelled | ReconstructionError::PatchClientError(PatchClientError::Cancelled)
        )
    }
}

impl From<std::io::Error> for ReconstructionError {
    fn from(err: std::io::Error) -> Self {
        ReconstructionError::IoError(Arc::new(err))
    }
}

impl From<tokio::task::JoinError> for ReconstructionError {
    fn from(err: tokio::task::JoinError) -> Self {
        ReconstructionError::InternalError(format!("Task failed: {err}"))
    }
}

/// Thread-safe container for propagating errors from background tasks.
/// Uses atomic flag for fast checking and mutex for error storage; the first error wins.
pub struct ErrorState {
    has_error: AtomicBool,
    stored_error: Mutex<Option<ReconstructionError>>,
}

impl Default for ErrorState {
    fn default() -> Self {
        Self {
            has_error: AtomicBool::new(false),
            stored_error: Mutex::new(None),
        }
    }
}

impl ErrorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self) -> Result<()> {
        if self.has_error.load(AtomicOrdering::Acquire) {
            let error_guard = self.stored_error.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(err) = error_guard.as_ref() {
                return Err(err.clone());
            }
            return Err(ReconstructionError::InternalError(
                "Unknown error occurred in background task".to_string(),
            ));
        }
        Ok(())
    }

    pub fn set(&self, error: ReconstructionError) {
        let mut error_guard = self.stored_error.lock().unwrap_or_else(|e| e.into_inner());
        if error_guard.is_none() {
            *error_guard = Some(error);
            self.has_error.store(true, AtomicOrdering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_state_first_error_wins() {
        let state = ErrorState::new();
        assert!(state.check().is_ok());

        state.set(ReconstructionError::CorruptedReconstruction("first".into()));
        state.set(ReconstructionError::Cancelled);

        match state.check() {
            Err(ReconstructionError::CorruptedReconstruction(msg)) => assert_eq!(msg, "first"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cancellation_detection() {
        assert!(ReconstructionError::Cancelled.is_cancellation());
        assert!(ReconstructionError::from(PatchClientError::Cancelled).is_cancellation());
        assert!(!ReconstructionError::MissingBaseUrl.is_cancellation());
    }
}
