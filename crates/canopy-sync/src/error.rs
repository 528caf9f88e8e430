//! Error types for repository and client sessions.

use crate::network::NetworkError;
use canopy_core::GraphError;
use canopy_delta::{DeltaError, ErrorCode, QueryId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Not signed on")]
    NotSignedOn,

    #[error("Already signed on")]
    AlreadySignedOn,

    #[error("Reconnect rejected: {0}")]
    ReconnectMismatch(String),

    #[error("Unknown query: {0}")]
    UnknownQuery(QueryId),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// The repository answered a query with a failure.
    #[error("{code}: {message}")]
    QueryFailed { code: ErrorCode, message: String },

    #[error("Unexpected response to {query}")]
    UnexpectedResponse { query: &'static str },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Delta(#[from] DeltaError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
}

impl From<canopy_chunk::DeserializationError> for SyncError {
    fn from(error: canopy_chunk::DeserializationError) -> Self {
        SyncError::Delta(error.into())
    }
}

impl SyncError {
    /// The code reported to a client for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::NotSignedOn => ErrorCode::NotSignedOn,
            SyncError::AlreadySignedOn => ErrorCode::AlreadySignedOn,
            SyncError::ReconnectMismatch(_) => ErrorCode::ReconnectMismatch,
            SyncError::QueryFailed { code, .. } => *code,
            SyncError::Graph(GraphError::NotAPartition(_)) => ErrorCode::UnknownPartition,
            SyncError::Codec(_) => ErrorCode::MalformedMessage,
            SyncError::Delta(_) | SyncError::Graph(_) => ErrorCode::CommandRejected,
            _ => ErrorCode::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
