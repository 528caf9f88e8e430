//! Schema-independent pointers to metamodel elements.

use serde::{Deserialize, Serialize};

/// Identifies a classifier, feature or datatype by (language, version, key).
///
/// This is the only way metamodel elements are named on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetaPointer {
    pub language: String,
    pub version: String,
    pub key: String,
}

impl MetaPointer {
    pub fn new(
        language: impl Into<String>,
        version: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            language: language.into(),
            version: version.into(),
            key: key.into(),
        }
    }

    /// Whether both pointers live in the same language version.
    pub fn same_language(&self, other: &MetaPointer) -> bool {
        self.language == other.language && self.version == other.version
    }
}

impl std::fmt::Display for MetaPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}#{}", self.language, self.version, self.key)
    }
}
