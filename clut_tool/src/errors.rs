use clut_core::ClutError;
use patch_client::PatchClientError;
use range_reconstruction::ReconstructionError;
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ClutToolError {
    #[error("Snapshot error: {0}")]
    ClutError(#[from] ClutError),

    #[error("Patch client error: {0}")]
    PatchClientError(#[from] PatchClientError),

    #[error("Reconstruction error: {0}")]
    ReconstructionError(#[from] ReconstructionError),

    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Operations file error: {0}")]
    OperationsError(#[from] serde_json::Error),

    #[error("Subtask scheduling error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// A broken version graph: unknown versions, cycles, or a missing operations file.
    #[error("Chain error: {0}")]
    ChainError(String),

    #[error("Parameter error: {0}")]
    ParameterError(String),

    /// Files skipped by an earlier filtered install would now be needed; the output directory has to
    /// be installed from scratch.
    #[error("{count} files were filtered out of a previous install and are now included, e.g. {example}")]
    PreviouslyFilteredFiles { count: usize, example: String },
}

pub type Result<T> = std::result::Result<T, ClutToolError>;
