//! Error types for the node graph.

use crate::id::NodeId;
use crate::meta::MetaPointer;
use thiserror::Error;

/// Errors raised by graph, registry and value operations.
///
/// All batch operations validate every item before mutating anything, so an
/// error always leaves the forest untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Circular containment: {child} cannot be placed below {parent}")]
    CircularContainment { child: NodeId, parent: NodeId },

    #[error("Duplicate node id: {0}")]
    DuplicateId(NodeId),

    #[error("Invalid node id: {0:?}")]
    InvalidId(String),

    #[error("Node not found: {0}")]
    UnknownNode(NodeId),

    #[error("Node {0} is not a partition")]
    NotAPartition(NodeId),

    #[error("Unknown language: {key}@{version}")]
    UnknownLanguage { key: String, version: String },

    #[error("Unknown classifier: {0}")]
    UnknownClassifier(MetaPointer),

    #[error("Feature {feature} does not belong to classifier {classifier}")]
    UnknownFeature {
        classifier: MetaPointer,
        feature: MetaPointer,
    },

    #[error("Unknown datatype: {0}")]
    UnknownDatatype(MetaPointer),

    #[error("Invalid value {raw:?} for datatype {datatype}: {reason}")]
    InvalidPropertyValue {
        datatype: MetaPointer,
        raw: String,
        reason: String,
    },

    #[error("Invalid value for {feature}: {reason}")]
    InvalidValue { feature: String, reason: String },

    #[error("Required feature {feature} of node {node} is not set")]
    UnsetFeature { node: NodeId, feature: MetaPointer },

    #[error("Index {index} out of range (length: {length})")]
    IndexOutOfRange { index: usize, length: usize },
}

impl GraphError {
    pub(crate) fn invalid(feature: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        GraphError::InvalidValue {
            feature: feature.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
