//! Errors raised while building or applying delta messages.

use canopy_chunk::DeserializationError;
use canopy_core::GraphError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeltaError {
    #[error("Invalid move: {0}")]
    InvalidMove(String),

    /// The edit does not match the current state, e.g. adding a property
    /// that is already set.
    #[error("Invalid edit: {0}")]
    InvalidEdit(String),

    #[error("Malformed change: {0}")]
    MalformedChange(String),

    #[error("Sequence gap: expected event {expected}, received {received}")]
    SequenceGap { expected: u64, received: u64 },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Deserialization(#[from] DeserializationError),
}

pub type Result<T> = std::result::Result<T, DeltaError>;
