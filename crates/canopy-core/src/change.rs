//! The tagged union every forest mutation is reported as.
//!
//! A [`Change`] names its target by node id and feature pointer only, so it
//! can be shipped between replicas and replayed. [`Notification`] wraps a
//! change with the partition context a broadcaster needs to route it.

use crate::chunk::SerializedChunk;
use crate::id::NodeId;
use crate::meta::MetaPointer;
use crate::value::ReferenceEntry;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotKind {
    Containment,
    Annotation,
    Reference,
}

/// A list-valued location on a node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Slot {
    Containment {
        parent: NodeId,
        containment: MetaPointer,
    },
    Annotations {
        parent: NodeId,
    },
    Reference {
        parent: NodeId,
        reference: MetaPointer,
    },
}

impl Slot {
    pub fn containment(parent: impl Into<NodeId>, containment: MetaPointer) -> Self {
        Slot::Containment {
            parent: parent.into(),
            containment,
        }
    }

    pub fn annotations(parent: impl Into<NodeId>) -> Self {
        Slot::Annotations {
            parent: parent.into(),
        }
    }

    pub fn reference(parent: impl Into<NodeId>, reference: MetaPointer) -> Self {
        Slot::Reference {
            parent: parent.into(),
            reference,
        }
    }

    pub fn parent(&self) -> &NodeId {
        match self {
            Slot::Containment { parent, .. }
            | Slot::Annotations { parent }
            | Slot::Reference { parent, .. } => parent,
        }
    }

    pub fn kind(&self) -> SlotKind {
        match self {
            Slot::Containment { .. } => SlotKind::Containment,
            Slot::Annotations { .. } => SlotKind::Annotation,
            Slot::Reference { .. } => SlotKind::Reference,
        }
    }

    pub fn at(self, index: usize) -> Position {
        Position { slot: self, index }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub slot: Slot,
    pub index: usize,
}

/// How the source and destination of a move relate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    SameSlot,
    SameOwner,
    OtherOwner,
}

impl Topology {
    pub fn of(from: &Slot, to: &Slot) -> Self {
        if from == to {
            Topology::SameSlot
        } else if from.parent() == to.parent() {
            Topology::SameOwner
        } else {
            Topology::OtherOwner
        }
    }
}

/// What gets placed into a slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Item {
    /// A new subtree, root first.
    Subtree(SerializedChunk),
    Entry(ReferenceEntry),
}

/// Transition of an optional scalar.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Edit<T> {
    /// Was unset, now set.
    Add(T),
    /// Was set, now unset.
    Delete,
    /// Was set, now set to something else.
    Change(T),
}

impl<T> Edit<T> {
    pub fn new_value(&self) -> Option<&T> {
        match self {
            Edit::Add(v) | Edit::Change(v) => Some(v),
            Edit::Delete => None,
        }
    }

    /// The edit that turns `old` into `new`, or `None` when they agree.
    pub fn between(old: Option<T>, new: Option<T>) -> Option<Self>
    where
        T: PartialEq,
    {
        match (old, new) {
            (None, None) => None,
            (None, Some(v)) => Some(Edit::Add(v)),
            (Some(_), None) => Some(Edit::Delete),
            (Some(a), Some(b)) if a == b => None,
            (Some(_), Some(b)) => Some(Edit::Change(b)),
        }
    }
}

/// An elementary or composite mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum Change {
    AddPartition {
        partition: SerializedChunk,
    },
    DeletePartition {
        partition: NodeId,
    },
    ChangeClassifier {
        node: NodeId,
        classifier: MetaPointer,
    },
    Property {
        node: NodeId,
        property: MetaPointer,
        edit: Edit<String>,
    },
    Add {
        at: Position,
        item: Item,
    },
    Delete {
        at: Position,
    },
    Replace {
        at: Position,
        item: Item,
    },
    Move {
        from: Position,
        to: Position,
        topology: Topology,
        /// The item previously at `to` is deleted.
        replace: bool,
    },
    ReferenceTarget {
        at: Position,
        edit: Edit<NodeId>,
    },
    ResolveInfo {
        at: Position,
        edit: Edit<String>,
    },
    Composite(Vec<Change>),
}

impl Change {
    /// The protocol name of this change.
    pub fn name(&self) -> String {
        fn edit_name<T>(edit: &Edit<T>, what: &str) -> String {
            match edit {
                Edit::Add(_) => format!("Add{}", what),
                Edit::Delete => format!("Delete{}", what),
                Edit::Change(_) => format!("Change{}", what),
            }
        }

        match self {
            Change::AddPartition { .. } => "AddPartition".into(),
            Change::DeletePartition { .. } => "DeletePartition".into(),
            Change::ChangeClassifier { .. } => "ChangeClassifier".into(),
            Change::Property { edit, .. } => edit_name(edit, "Property"),
            Change::Add { at, .. } => match at.slot.kind() {
                SlotKind::Containment => "AddChild".into(),
                SlotKind::Annotation => "AddAnnotation".into(),
                SlotKind::Reference => "AddReference".into(),
            },
            Change::Delete { at } => match at.slot.kind() {
                SlotKind::Containment => "DeleteChild".into(),
                SlotKind::Annotation => "DeleteAnnotation".into(),
                SlotKind::Reference => "DeleteReference".into(),
            },
            Change::Replace { at, .. } => match at.slot.kind() {
                SlotKind::Containment => "ReplaceChild".into(),
                SlotKind::Annotation => "ReplaceAnnotation".into(),
                SlotKind::Reference => "ChangeReference".into(),
            },
            Change::Move {
                from,
                topology,
                replace,
                ..
            } => {
                let base = match (from.slot.kind(), topology) {
                    (SlotKind::Containment, Topology::SameSlot) => "ChildInSameContainment",
                    (SlotKind::Containment, Topology::SameOwner) => {
                        "ChildFromOtherContainmentInSameParent"
                    }
                    (SlotKind::Containment, Topology::OtherOwner) => "ChildFromOtherContainment",
                    (SlotKind::Annotation, Topology::OtherOwner) => "AnnotationFromOtherParent",
                    (SlotKind::Annotation, _) => "AnnotationInSameParent",
                    (SlotKind::Reference, Topology::SameSlot) => "EntryInSameReference",
                    (SlotKind::Reference, Topology::SameOwner) => {
                        "EntryFromOtherReferenceInSameParent"
                    }
                    (SlotKind::Reference, Topology::OtherOwner) => "EntryFromOtherReference",
                };
                if *replace {
                    format!("MoveAndReplace{}", base)
                } else {
                    format!("Move{}", base)
                }
            }
            Change::ReferenceTarget { edit, .. } => edit_name(edit, "ReferenceTarget"),
            Change::ResolveInfo { edit, .. } => edit_name(edit, "ReferenceResolveInfo"),
            Change::Composite(_) => "Composite".into(),
        }
    }

    /// Elementary changes in order, composites flattened.
    pub fn flatten(self) -> Vec<Change> {
        match self {
            Change::Composite(parts) => parts.into_iter().flat_map(Change::flatten).collect(),
            change => vec![change],
        }
    }
}

/// A change as observed by the forest, with routing context.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    Elementary {
        change: Change,
        /// Partition the change lands in.
        partition: Option<NodeId>,
        /// For moves: the partition the item came from.
        source_partition: Option<NodeId>,
        /// For moves across partitions: the moved subtree or entry, so
        /// observers of only the destination can treat the move as an addition.
        moved_item: Option<Item>,
    },
    Composite(Vec<Notification>),
}

impl Notification {
    pub fn elementary(change: Change, partition: Option<NodeId>) -> Self {
        Notification::Elementary {
            change,
            partition,
            source_partition: None,
            moved_item: None,
        }
    }

    /// The underlying change, composites rebuilt.
    pub fn change(&self) -> Change {
        match self {
            Notification::Elementary { change, .. } => change.clone(),
            Notification::Composite(parts) => {
                Change::Composite(parts.iter().map(Notification::change).collect())
            }
        }
    }

    /// Elementary notifications in order.
    pub fn flatten(&self) -> Vec<&Notification> {
        match self {
            Notification::Elementary { .. } => vec![self],
            Notification::Composite(parts) => parts.iter().flat_map(|p| p.flatten()).collect(),
        }
    }
}
