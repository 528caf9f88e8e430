//! Replaying changes on a forest replica.
//!
//! Every entry point is all-or-nothing: the forest is snapshotted first and
//! restored when any part of the change fails. Subtrees carried by a change
//! are deserialized strictly; a malformed subtree rejects the change instead
//! of being healed.

use crate::command::Command;
use crate::error::{DeltaError, Result};
use crate::event::EventBody;
use canopy_chunk::{Deserializer, RejectCycles, StrictHandler};
use canopy_core::{
    Change, Edit, FeatureKind, FeatureSlots, Forest, GraphError, Item, MetaPointer, NodeId,
    Position, PropertyValue, ReferenceEntry, SerializedChunk, Slot, Topology, Value,
};

/// Version string exchanged on sign-on.
pub const PROTOCOL_VERSION: &str = "2024.1";

/// Apply `change`. On error the forest is left as it was.
pub fn apply_change<S: FeatureSlots>(forest: &mut Forest<S>, change: &Change) -> Result<()> {
    atomically(forest, |forest| replay(forest, change))
}

/// Apply every part of `command` in order, or none of them.
pub fn apply_command<S: FeatureSlots>(forest: &mut Forest<S>, command: &Command) -> Result<()> {
    let change = command.change();
    tracing::debug!(command = %command.id, change = %change.name(), "Applying command");
    atomically(forest, |forest| replay(forest, &change))
}

/// Apply the change carried by an event. `NoOp` and `Error` bodies leave the
/// forest alone.
pub fn apply_event_body<S: FeatureSlots>(forest: &mut Forest<S>, body: &EventBody) -> Result<()> {
    match body.change() {
        Some(change) => atomically(forest, |forest| replay(forest, &change)),
        None => Ok(()),
    }
}

fn atomically<S, F>(forest: &mut Forest<S>, f: F) -> Result<()>
where
    S: FeatureSlots,
    F: FnOnce(&mut Forest<S>) -> Result<()>,
{
    let snapshot = forest.clone();
    let result = f(forest);
    if result.is_err() {
        *forest = snapshot;
    }
    result
}

fn replay<S: FeatureSlots>(forest: &mut Forest<S>, change: &Change) -> Result<()> {
    match change {
        Change::AddPartition { partition } => {
            let root = graft_subtree(forest, partition)?;
            forest.add_partition(&root)?;
        }
        Change::DeletePartition { partition } => forest.delete_partition(partition)?,
        Change::ChangeClassifier { node, classifier } => forest.change_classifier(node, classifier)?,
        Change::Property {
            node,
            property,
            edit,
        } => {
            let current = forest.property(node, property)?;
            check_edit(edit, current.is_some(), || format!("property {} of {}", property, node))?;
            let value = match edit.new_value() {
                Some(raw) => Some(parse_property(forest, node, property, raw)?),
                None => None,
            };
            forest.set_property(node, property, value)?;
        }
        Change::Add { at, item } => match (&at.slot, item) {
            (Slot::Containment { parent, containment }, Item::Subtree(chunk)) => {
                let root = graft_subtree(forest, chunk)?;
                forest.insert(parent, containment, at.index, vec![Value::Node(root)])?;
            }
            (Slot::Annotations { parent }, Item::Subtree(chunk)) => {
                let root = graft_subtree(forest, chunk)?;
                forest.insert_annotations(parent, at.index, vec![root])?;
            }
            (Slot::Reference { parent, reference }, Item::Entry(entry)) => {
                forest.insert(parent, reference, at.index, vec![Value::Reference(entry.clone())])?;
            }
            _ => return Err(mismatched_item(at)),
        },
        Change::Delete { at } => forest.delete_at(at)?,
        Change::Replace { at, item } => match (&at.slot, item) {
            (Slot::Reference { .. }, Item::Entry(entry)) => {
                forest.replace_at(at, Value::Reference(entry.clone()))?
            }
            (Slot::Containment { .. } | Slot::Annotations { .. }, Item::Subtree(chunk)) => {
                let root = graft_subtree(forest, chunk)?;
                forest.replace_at(at, Value::Node(root))?;
            }
            _ => return Err(mismatched_item(at)),
        },
        Change::Move {
            from,
            to,
            topology,
            replace,
        } => {
            let actual = Topology::of(&from.slot, &to.slot);
            if actual != *topology {
                return Err(DeltaError::InvalidMove(format!(
                    "{:?} declared, but the slots are {:?}",
                    topology, actual
                )));
            }
            forest.move_item(from, to, *replace)?;
        }
        Change::ReferenceTarget { at, edit } => {
            let entry = entry_at(forest, at)?;
            check_edit(edit, entry.target.is_some(), || format!("reference target at {:?}", at))?;
            forest.set_reference_target(at, edit.new_value().cloned())?;
        }
        Change::ResolveInfo { at, edit } => {
            let entry = entry_at(forest, at)?;
            check_edit(edit, entry.resolve_info.is_some(), || format!("resolve info at {:?}", at))?;
            forest.set_resolve_info(at, edit.new_value().cloned())?;
        }
        Change::Composite(parts) => {
            for part in parts {
                replay(forest, part)?;
            }
        }
    }
    Ok(())
}

/// `Add` needs an unset target; `Delete` and `Change` need a set one.
fn check_edit<T>(edit: &Edit<T>, is_set: bool, what: impl FnOnce() -> String) -> Result<()> {
    match (edit, is_set) {
        (Edit::Add(_), true) => Err(DeltaError::InvalidEdit(format!("{} is already set", what()))),
        (Edit::Delete | Edit::Change(_), false) => {
            Err(DeltaError::InvalidEdit(format!("{} is not set", what())))
        }
        _ => Ok(()),
    }
}

fn mismatched_item(at: &Position) -> DeltaError {
    DeltaError::MalformedChange(format!("item does not fit a {:?} slot", at.slot.kind()))
}

fn parse_property<S: FeatureSlots>(
    forest: &Forest<S>,
    node: &NodeId,
    property: &MetaPointer,
    raw: &str,
) -> Result<PropertyValue> {
    let classifier = forest
        .node(node)
        .ok_or_else(|| GraphError::UnknownNode(node.clone()))?
        .classifier();
    let feature = forest.registry().feature(classifier, property)?;
    match &feature.kind {
        FeatureKind::Property { datatype } => {
            Ok(forest.registry().parse_value(datatype, raw, forest.format())?)
        }
        _ => Err(DeltaError::MalformedChange(format!("{} is not a property", property))),
    }
}

fn entry_at<S: FeatureSlots>(forest: &Forest<S>, at: &Position) -> Result<ReferenceEntry> {
    let Slot::Reference { parent, reference } = &at.slot else {
        return Err(DeltaError::MalformedChange("expected a reference slot".to_string()));
    };
    let entries = forest.references(parent, reference)?;
    entries.get(at.index).cloned().ok_or_else(|| {
        GraphError::IndexOutOfRange {
            index: at.index,
            length: entries.len(),
        }
        .into()
    })
}

/// Deserialize a single-rooted chunk as free nodes and return its root.
fn graft_subtree<S: FeatureSlots>(forest: &mut Forest<S>, chunk: &SerializedChunk) -> Result<NodeId> {
    let result = Deserializer::new()
        .with_handler(StrictHandler)
        .with_healing(RejectCycles)
        .deserialize(chunk, forest)?;
    match result.roots.as_slice() {
        [root] => Ok(root.clone()),
        roots => Err(DeltaError::MalformedChange(format!(
            "subtree chunk has {} roots",
            roots.len()
        ))),
    }
}
