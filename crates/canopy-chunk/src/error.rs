//! Deserialization errors.

use canopy_core::{GraphError, NodeId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeserializationError {
    #[error("Unsupported serialization format: {0}")]
    UnsupportedFormat(String),

    #[error("Child {child} of {parent} is not part of the chunk")]
    UnresolvedChild { parent: NodeId, child: NodeId },

    #[error("Rejected by handler: {0}")]
    Rejected(String),

    #[error("Ownership cycle: {child} cannot be placed below {parent}")]
    Cycle { child: NodeId, parent: NodeId },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub type Result<T> = std::result::Result<T, DeserializationError>;
