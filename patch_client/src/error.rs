use std::sync::Arc;

use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum PatchClientError {
    #[error("Transport error: {0}")]
    TransportError(Arc<reqwest_middleware::Error>),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Failed to download {ranges} from {url}: {reason}")]
    RangeFetchFailed { url: String, ranges: String, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(Arc<std::io::Error>),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

pub type Result<T> = std::result::Result<T, PatchClientError>;

impl PatchClientError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        PatchClientError::ProtocolError(message.into())
    }
}

impl From<reqwest_middleware::Error> for PatchClientError {
    fn from(value: reqwest_middleware::Error) -> Self {
        PatchClientError::TransportError(Arc::new(value))
    }
}

impl From<reqwest::Error> for PatchClientError {
    fn from(value: reqwest::Error) -> Self {
        PatchClientError::TransportError(Arc::new(reqwest_middleware::Error::Reqwest(value)))
    }
}

impl From<std::io::Error> for PatchClientError {
    fn from(value: std::io::Error) -> Self {
        PatchClientError::IoError(Arc::new(value))
    }
}

impl From<url::ParseError> for PatchClientError {
    fn from(value: url::ParseError) -> Self {
        PatchClientError::InvalidUrl(value.to_string())
    }
}
