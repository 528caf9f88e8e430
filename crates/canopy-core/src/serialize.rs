//! Forest → chunk serialization and structural comparison.

use crate::chunk::{
    SerializedChunk, SerializedContainment, SerializedNode, SerializedProperty,
    SerializedReference, UsedLanguage,
};
use crate::error::{GraphError, Result};
use crate::forest::Forest;
use crate::id::NodeId;
use crate::meta::MetaPointer;
use crate::node::Node;
use crate::slots::FeatureSlots;
use crate::value::FeatureValue;
use std::collections::BTreeSet;

impl<S: FeatureSlots> Forest<S> {
    /// `root` and everything below it, pre-order. The root is written without
    /// a parent so the chunk stands on its own.
    pub fn serialize_subtree(&self, root: &NodeId) -> Result<SerializedChunk> {
        self.serialize_roots(std::slice::from_ref(root))
    }

    /// Every partition with its contents.
    pub fn serialize_partitions(&self) -> Result<SerializedChunk> {
        let roots: Vec<NodeId> = self.partitions.iter().cloned().collect();
        self.serialize_roots(&roots)
    }

    pub fn serialize_roots(&self, roots: &[NodeId]) -> Result<SerializedChunk> {
        let mut languages = BTreeSet::new();
        let mut nodes = Vec::new();
        for root in roots {
            if !self.nodes.contains_key(root) {
                return Err(GraphError::UnknownNode(root.clone()));
            }
            for id in self.descendants(root) {
                let node = self
                    .nodes
                    .get(&id)
                    .ok_or_else(|| GraphError::UnknownNode(id.clone()))?;
                let mut serialized = self.serialize_node(node, &mut languages)?;
                if &id == root {
                    serialized.parent = None;
                }
                nodes.push(serialized);
            }
        }

        Ok(SerializedChunk {
            serialization_format_version: self.format.as_str().to_string(),
            languages: languages.into_iter().collect(),
            nodes,
        })
    }

    fn serialize_node(
        &self,
        node: &Node<S>,
        languages: &mut BTreeSet<UsedLanguage>,
    ) -> Result<SerializedNode> {
        let mut used = |pointer: &MetaPointer| {
            languages.insert(UsedLanguage {
                key: pointer.language.clone(),
                version: pointer.version.clone(),
            });
        };
        used(node.classifier());

        let mut serialized = SerializedNode::new(node.id().clone(), node.classifier().clone());
        for feature in node.slots().all_set_features() {
            used(&feature);
            match node.slots().get(&feature) {
                Some(FeatureValue::Property(value)) => {
                    serialized.properties.push(SerializedProperty {
                        property: feature,
                        value: Some(self.registry.format_value(value, self.format)?),
                    });
                }
                Some(FeatureValue::Children(children)) => {
                    serialized.containments.push(SerializedContainment {
                        containment: feature,
                        children: children.clone(),
                    });
                }
                Some(FeatureValue::References(targets)) => {
                    serialized.references.push(SerializedReference {
                        reference: feature,
                        targets: targets.clone(),
                    });
                }
                None => {}
            }
        }
        serialized.annotations = node.annotations().to_vec();
        serialized.parent = node.parent().cloned();
        Ok(serialized)
    }
}

fn normalized(mut chunk: SerializedChunk) -> SerializedChunk {
    for node in &mut chunk.nodes {
        node.properties.sort_by(|a, b| a.property.cmp(&b.property));
        node.containments.sort_by(|a, b| a.containment.cmp(&b.containment));
        node.references.sort_by(|a, b| a.reference.cmp(&b.reference));
    }
    chunk
}

/// Whether two subtrees hold the same ids, classifiers, feature values and
/// ownership, regardless of storage layout.
pub fn subtree_eq<A: FeatureSlots, B: FeatureSlots>(
    a: &Forest<A>,
    a_root: &NodeId,
    b: &Forest<B>,
    b_root: &NodeId,
) -> bool {
    match (a.serialize_subtree(a_root), b.serialize_subtree(b_root)) {
        (Ok(left), Ok(right)) => {
            let left = normalized(left);
            let right = normalized(right);
            left.nodes == right.nodes && left.languages == right.languages
        }
        _ => false,
    }
}
