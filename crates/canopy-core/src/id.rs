//! Node identifiers.

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Globally unique node id.
///
/// Valid ids are non-empty and consist of ASCII letters, digits, `_` and `-`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse and validate an id.
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = Self(id.into());
        if id.is_valid() {
            Ok(id)
        } else {
            Err(GraphError::InvalidId(id.0))
        }
    }

    /// A fresh id that is unique across replicas.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
