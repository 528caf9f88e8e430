//! Nodes and their ownership edge.

use crate::id::NodeId;
use crate::meta::MetaPointer;
use crate::slots::{DynamicSlots, FeatureSlots};

/// The single edge from a node to its owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Owner {
    /// Partition root or a node not yet attached anywhere.
    None,
    /// Child in `containment` of `parent`, at `index`.
    Contained {
        parent: NodeId,
        containment: MetaPointer,
        index: usize,
    },
    /// Annotation of `parent`, at `index`.
    Annotated { parent: NodeId, index: usize },
}

impl Owner {
    pub fn parent(&self) -> Option<&NodeId> {
        match self {
            Owner::None => None,
            Owner::Contained { parent, .. } | Owner::Annotated { parent, .. } => Some(parent),
        }
    }

    pub fn index(&self) -> Option<usize> {
        match self {
            Owner::None => None,
            Owner::Contained { index, .. } | Owner::Annotated { index, .. } => Some(*index),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Owner::None)
    }
}

#[derive(Clone, Debug)]
pub struct Node<S: FeatureSlots = DynamicSlots> {
    id: NodeId,
    classifier: MetaPointer,
    owner: Owner,
    slots: S,
    annotations: Vec<NodeId>,
}

impl<S: FeatureSlots> Node<S> {
    pub fn new(id: NodeId, classifier: MetaPointer, slots: S) -> Self {
        Self {
            id,
            classifier,
            owner: Owner::None,
            slots,
            annotations: Vec::new(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn classifier(&self) -> &MetaPointer {
        &self.classifier
    }

    pub(crate) fn set_classifier(&mut self, classifier: MetaPointer, slots: S) {
        self.classifier = classifier;
        self.slots = slots;
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn parent(&self) -> Option<&NodeId> {
        self.owner.parent()
    }

    pub fn set_owner(&mut self, owner: Owner) {
        self.owner = owner;
    }

    pub fn slots(&self) -> &S {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut S {
        &mut self.slots
    }

    pub fn annotations(&self) -> &[NodeId] {
        &self.annotations
    }

    pub fn annotations_mut(&mut self) -> &mut Vec<NodeId> {
        &mut self.annotations
    }

    /// Children across all containments followed by annotations.
    pub fn owned(&self) -> Vec<NodeId> {
        let mut owned = Vec::new();
        for feature in self.slots.all_set_features() {
            if let Some(crate::value::FeatureValue::Children(children)) = self.slots.get(&feature) {
                owned.extend(children.iter().cloned());
            }
        }
        owned.extend(self.annotations.iter().cloned());
        owned
    }
}
