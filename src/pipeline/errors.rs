use crate::audio::DecodeError;
use crate::encoders::EncodeError;
use crate::pipeline::Operation;
use crate::vectors::{QueryError, StorageError, StoreError};

/// Errors surfaced by [`crate::pipeline::Controller`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("initialization failed: {0}")]
    InitFailure(String),

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("encoding failed: {0}")]
    EncodeFailure(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("store '{0}' is open in another session, not cleared")]
    ClearBlocked(String),

    #[error("busy: {running} is still running")]
    Busy { running: Operation },

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotInitialized(name) => {
                PipelineError::NotReady(format!("store '{name}' is not initialized"))
            }
            StoreError::InitFailure(reason) => PipelineError::InitFailure(reason),
            StoreError::DimensionMismatch { expected, got } => {
                PipelineError::DimensionMismatch { expected, got }
            }
            StoreError::EmptyEmbedding => {
                PipelineError::EncodeFailure("encoder returned an empty vector".to_string())
            }
            StoreError::Storage(StorageError::Io(e)) => PipelineError::Io(e.to_string()),
            StoreError::Storage(other) => PipelineError::Io(other.to_string()),
            StoreError::Query(e) => e.into(),
            StoreError::ClearBlocked(name) => PipelineError::ClearBlocked(name),
        }
    }
}

impl From<QueryError> for PipelineError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::EmptyQuery => PipelineError::InvalidQuery(err.to_string()),
            QueryError::DimensionMismatch { expected, got } => {
                PipelineError::DimensionMismatch { expected, got }
            }
        }
    }
}

impl From<EncodeError> for PipelineError {
    fn from(err: EncodeError) -> Self {
        match err {
            EncodeError::NotReady(name) => {
                PipelineError::NotReady(format!("encoder '{name}' is not loaded"))
            }
            EncodeError::LoadFailure(reason) => PipelineError::InitFailure(reason),
            EncodeError::InvalidModel(reason) => PipelineError::InitFailure(reason),
            EncodeError::EncodeFailure(reason) => PipelineError::EncodeFailure(reason),
            EncodeError::UnsupportedFormat(reason) => PipelineError::UnsupportedFormat(reason),
        }
    }
}

impl From<DecodeError> for PipelineError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Io(e) => PipelineError::Io(e.to_string()),
            DecodeError::UnsupportedFormat(reason) => PipelineError::UnsupportedFormat(reason),
            DecodeError::Malformed(reason) => PipelineError::EncodeFailure(reason),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err.to_string())
    }
}
