//! The flat serialized form of a set of nodes.
//!
//! A chunk lists nodes in any order; ownership is expressed by child and
//! annotation id lists plus an optional `parent` back-pointer. Chunks are the
//! payload of partition snapshots and of subtree-carrying changes.

use crate::id::NodeId;
use crate::meta::MetaPointer;
use crate::value::{ReferenceEntry, SerializationFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UsedLanguage {
    pub key: String,
    pub version: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedChunk {
    /// Kept as a string so unsupported versions can be reported.
    pub serialization_format_version: String,
    pub languages: Vec<UsedLanguage>,
    pub nodes: Vec<SerializedNode>,
}

impl SerializedChunk {
    pub fn new(format: SerializationFormat) -> Self {
        Self {
            serialization_format_version: format.as_str().to_string(),
            languages: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn with_node(mut self, node: SerializedNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_language(mut self, key: impl Into<String>, version: impl Into<String>) -> Self {
        self.languages.push(UsedLanguage {
            key: key.into(),
            version: version.into(),
        });
        self
    }

    pub fn format(&self) -> Option<SerializationFormat> {
        SerializationFormat::parse(&self.serialization_format_version)
    }

    pub fn node(&self, id: &NodeId) -> Option<&SerializedNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Nodes that no other node of the chunk lists as child or annotation.
    pub fn root_ids(&self) -> Vec<NodeId> {
        let owned: HashSet<&NodeId> = self.nodes.iter().flat_map(|n| n.owned()).collect();
        self.nodes
            .iter()
            .filter(|n| !owned.contains(&n.id))
            .map(|n| n.id.clone())
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializedProperty {
    pub property: MetaPointer,
    pub value: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializedContainment {
    pub containment: MetaPointer,
    pub children: Vec<NodeId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializedReference {
    pub reference: MetaPointer,
    pub targets: Vec<ReferenceEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializedNode {
    pub id: NodeId,
    pub classifier: MetaPointer,
    #[serde(default)]
    pub properties: Vec<SerializedProperty>,
    #[serde(default)]
    pub containments: Vec<SerializedContainment>,
    #[serde(default)]
    pub references: Vec<SerializedReference>,
    #[serde(default)]
    pub annotations: Vec<NodeId>,
    pub parent: Option<NodeId>,
}

impl SerializedNode {
    pub fn new(id: impl Into<NodeId>, classifier: MetaPointer) -> Self {
        Self {
            id: id.into(),
            classifier,
            properties: Vec::new(),
            containments: Vec::new(),
            references: Vec::new(),
            annotations: Vec::new(),
            parent: None,
        }
    }

    pub fn with_property(mut self, property: MetaPointer, value: impl Into<String>) -> Self {
        self.properties.push(SerializedProperty {
            property,
            value: Some(value.into()),
        });
        self
    }

    pub fn with_children(mut self, containment: MetaPointer, children: Vec<NodeId>) -> Self {
        self.containments.push(SerializedContainment {
            containment,
            children,
        });
        self
    }

    pub fn with_references(mut self, reference: MetaPointer, targets: Vec<ReferenceEntry>) -> Self {
        self.references.push(SerializedReference { reference, targets });
        self
    }

    pub fn with_annotations(mut self, annotations: Vec<NodeId>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn with_parent(mut self, parent: impl Into<NodeId>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Child ids across containments, then annotations.
    pub fn owned(&self) -> impl Iterator<Item = &NodeId> {
        self.containments
            .iter()
            .flat_map(|c| c.children.iter())
            .chain(self.annotations.iter())
    }
}
