//! The forest: an id-indexed node table with single-owner edges.
//!
//! Every node has at most one owner. Placing a node that already has an owner
//! moves it: it is detached first and the move is reported as one change.
//! Placing a node below itself fails with [`GraphError::CircularContainment`].
//!
//! Every public mutation validates all of its input before touching the
//! table. A mutation producing more than one elementary change is reported as
//! a single [`Notification::Composite`]. Changes to nodes outside every
//! partition are not reported, and a move that crosses the partition boundary
//! is reported as an addition or deletion.

use crate::change::{Change, Edit, Item, Notification, Position, Slot, Topology};
use crate::error::{GraphError, Result};
use crate::id::NodeId;
use crate::language::{Feature, FeatureKind};
use crate::meta::MetaPointer;
use crate::node::{Node, Owner};
use crate::registry::LanguageRegistry;
use crate::slots::{DynamicSlots, FeatureSlots};
use crate::value::{FeatureValue, PropertyValue, ReferenceEntry, SerializationFormat, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct Forest<S: FeatureSlots = DynamicSlots> {
    pub(crate) registry: Arc<LanguageRegistry>,
    pub(crate) format: SerializationFormat,
    pub(crate) nodes: HashMap<NodeId, Node<S>>,
    pub(crate) partitions: BTreeSet<NodeId>,
    notifications: Vec<Notification>,
}

impl<S: FeatureSlots> Forest<S> {
    pub fn new(registry: Arc<LanguageRegistry>) -> Self {
        Self {
            registry,
            format: SerializationFormat::default(),
            nodes: HashMap::new(),
            partitions: BTreeSet::new(),
            notifications: Vec::new(),
        }
    }

    /// Format used for property strings in changes and serialized chunks.
    pub fn with_format(mut self, format: SerializationFormat) -> Self {
        self.format = format;
        self
    }

    pub fn registry(&self) -> &Arc<LanguageRegistry> {
        &self.registry
    }

    pub fn format(&self) -> SerializationFormat {
        self.format
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node<S>> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node<S>> {
        self.nodes.values()
    }

    pub fn partitions(&self) -> impl Iterator<Item = &NodeId> {
        self.partitions.iter()
    }

    pub fn is_partition(&self, id: &NodeId) -> bool {
        self.partitions.contains(id)
    }

    /// Take every notification recorded since the last drain.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    fn node_ref(&self, id: &NodeId) -> Result<&Node<S>> {
        self.nodes
            .get(id)
            .ok_or_else(|| GraphError::UnknownNode(id.clone()))
    }

    fn node_mut(&mut self, id: &NodeId) -> Result<&mut Node<S>> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownNode(id.clone()))
    }

    fn feature_of(&self, node: &NodeId, feature: &MetaPointer) -> Result<Feature> {
        let classifier = self.node_ref(node)?.classifier();
        self.registry.feature(classifier, feature).cloned()
    }

    /// The root reached by following owners from `id`.
    pub fn root_of(&self, id: &NodeId) -> Option<NodeId> {
        let mut current = self.nodes.get(id)?;
        let mut steps = 0;
        while let Some(parent) = current.parent() {
            current = self.nodes.get(parent)?;
            steps += 1;
            if steps > self.nodes.len() {
                return None;
            }
        }
        Some(current.id().clone())
    }

    /// The partition `id` currently belongs to, if any.
    pub fn partition_of(&self, id: &NodeId) -> Option<NodeId> {
        self.root_of(id).filter(|root| self.partitions.contains(root))
    }

    /// Where `id` sits in its owner, if it has one.
    pub fn position_of(&self, id: &NodeId) -> Option<Position> {
        match self.nodes.get(id)?.owner() {
            Owner::None => None,
            Owner::Contained {
                parent,
                containment,
                index,
            } => Some(Slot::containment(parent.clone(), containment.clone()).at(*index)),
            Owner::Annotated { parent, index } => {
                Some(Slot::annotations(parent.clone()).at(*index))
            }
        }
    }

    /// `id` and everything it owns, pre-order.
    pub fn descendants(&self, id: &NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.owned().into_iter().rev());
                order.push(current);
            }
        }
        order
    }

    // ------------------------------------------------------------------
    // Slot access
    // ------------------------------------------------------------------

    fn check_slot(&self, slot: &Slot) -> Result<()> {
        match slot {
            Slot::Containment {
                parent,
                containment,
            } => match self.feature_of(parent, containment)?.kind {
                FeatureKind::Containment { .. } => Ok(()),
                _ => Err(GraphError::invalid(containment, "not a containment")),
            },
            Slot::Annotations { parent } => self.node_ref(parent).map(|_| ()),
            Slot::Reference { parent, reference } => {
                match self.feature_of(parent, reference)?.kind {
                    FeatureKind::Reference { .. } => Ok(()),
                    _ => Err(GraphError::invalid(reference, "not a reference")),
                }
            }
        }
    }

    fn node_list(&self, slot: &Slot) -> Result<Vec<NodeId>> {
        self.check_slot(slot)?;
        match slot {
            Slot::Containment {
                parent,
                containment,
            } => match self.node_ref(parent)?.slots().get(containment) {
                Some(FeatureValue::Children(children)) => Ok(children.clone()),
                None => Ok(Vec::new()),
                Some(_) => Err(GraphError::invalid(containment, "corrupt containment slot")),
            },
            Slot::Annotations { parent } => Ok(self.node_ref(parent)?.annotations().to_vec()),
            Slot::Reference { reference, .. } => {
                Err(GraphError::invalid(reference, "a reference holds no nodes"))
            }
        }
    }

    /// Store `list` in `slot` and point every listed node back at it.
    fn write_node_list(&mut self, slot: &Slot, list: Vec<NodeId>) -> Result<()> {
        match slot {
            Slot::Containment {
                parent,
                containment,
            } => {
                self.node_mut(parent)?
                    .slots_mut()
                    .try_set(containment, Some(FeatureValue::Children(list.clone())))?;
                for (index, child) in list.iter().enumerate() {
                    self.node_mut(child)?.set_owner(Owner::Contained {
                        parent: parent.clone(),
                        containment: containment.clone(),
                        index,
                    });
                }
            }
            Slot::Annotations { parent } => {
                *self.node_mut(parent)?.annotations_mut() = list.clone();
                for (index, annotation) in list.iter().enumerate() {
                    self.node_mut(annotation)?.set_owner(Owner::Annotated {
                        parent: parent.clone(),
                        index,
                    });
                }
            }
            Slot::Reference { reference, .. } => {
                return Err(GraphError::invalid(reference, "a reference holds no nodes"))
            }
        }
        Ok(())
    }

    fn entry_list(&self, slot: &Slot) -> Result<Vec<ReferenceEntry>> {
        self.check_slot(slot)?;
        match slot {
            Slot::Reference { parent, reference } => {
                match self.node_ref(parent)?.slots().get(reference) {
                    Some(FeatureValue::References(entries)) => Ok(entries.clone()),
                    None => Ok(Vec::new()),
                    Some(_) => Err(GraphError::invalid(reference, "corrupt reference slot")),
                }
            }
            other => Err(GraphError::invalid(
                other.parent(),
                "slot holds nodes, not reference entries",
            )),
        }
    }

    fn write_entry_list(&mut self, slot: &Slot, list: Vec<ReferenceEntry>) -> Result<()> {
        match slot {
            Slot::Reference { parent, reference } => {
                self.node_mut(parent)?
                    .slots_mut()
                    .try_set(reference, Some(FeatureValue::References(list)))?;
                Ok(())
            }
            other => Err(GraphError::invalid(other.parent(), "not a reference slot")),
        }
    }

    fn slot_for(&self, node: &NodeId, feature: &Feature) -> Slot {
        match feature.kind {
            FeatureKind::Reference { .. } => Slot::reference(node.clone(), feature.pointer.clone()),
            _ => Slot::containment(node.clone(), feature.pointer.clone()),
        }
    }

    fn expect_nodes(&self, feature: &MetaPointer, values: Vec<Value>) -> Result<Vec<NodeId>> {
        let mut seen = HashSet::new();
        values
            .into_iter()
            .map(|value| match value {
                Value::Node(id) if self.nodes.contains_key(&id) => {
                    if seen.insert(id.clone()) {
                        Ok(id)
                    } else {
                        Err(GraphError::invalid(feature, format!("{} listed twice", id)))
                    }
                }
                Value::Node(id) => Err(GraphError::invalid(
                    feature,
                    format!("{} is not a live node", id),
                )),
                _ => Err(GraphError::invalid(feature, "expected a node")),
            })
            .collect()
    }

    fn expect_entries(
        &self,
        feature: &MetaPointer,
        values: Vec<Value>,
    ) -> Result<Vec<ReferenceEntry>> {
        values
            .into_iter()
            .map(|value| match value {
                Value::Reference(entry) if entry.is_null() => {
                    Err(GraphError::invalid(feature, "null reference entry"))
                }
                Value::Reference(entry) => Ok(entry),
                Value::Node(id) => Ok(ReferenceEntry::to(id)),
                Value::Property(_) => Err(GraphError::invalid(feature, "expected a reference")),
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Placement
    // ------------------------------------------------------------------

    /// Type, partition-root and cycle checks for placing `child` in `slot`.
    fn check_placement(&self, child: &NodeId, slot: &Slot) -> Result<()> {
        let node = self.node_ref(child)?;
        if self.partitions.contains(child) {
            return Err(GraphError::invalid(
                slot.parent(),
                format!("partition {} cannot be owned", child),
            ));
        }

        match slot {
            Slot::Containment {
                parent,
                containment,
            } => {
                if let FeatureKind::Containment { child_type } =
                    &self.feature_of(parent, containment)?.kind
                {
                    if !self.registry.is_assignable(node.classifier(), child_type) {
                        return Err(GraphError::invalid(
                            containment,
                            format!("{} is not a {}", node.classifier(), child_type),
                        ));
                    }
                }
            }
            Slot::Annotations { parent } => {
                let info = self.registry.classifier(node.classifier())?;
                match &info.classifier.kind {
                    crate::language::ClassifierKind::Annotation { annotates } => {
                        if let Some(target) = annotates {
                            let owner = self.node_ref(parent)?.classifier();
                            if !self.registry.is_assignable(owner, target) {
                                return Err(GraphError::invalid(
                                    parent,
                                    format!("{} cannot annotate {}", node.classifier(), owner),
                                ));
                            }
                        }
                    }
                    _ => {
                        return Err(GraphError::invalid(
                            parent,
                            format!("{} is not an annotation", node.classifier()),
                        ))
                    }
                }
            }
            Slot::Reference { reference, .. } => {
                return Err(GraphError::invalid(reference, "a reference holds no nodes"))
            }
        }

        let mut cursor = Some(slot.parent().clone());
        let mut visited = HashSet::new();
        while let Some(current) = cursor {
            if &current == child {
                return Err(GraphError::CircularContainment {
                    child: child.clone(),
                    parent: slot.parent().clone(),
                });
            }
            if !visited.insert(current.clone()) {
                break;
            }
            cursor = self.nodes.get(&current).and_then(|n| n.parent().cloned());
        }
        Ok(())
    }

    /// Put `child` at `index` of `slot`, detaching it from its owner first.
    /// For a move within `slot`, `index` is counted after the removal.
    fn place(
        &mut self,
        child: &NodeId,
        slot: &Slot,
        index: usize,
        out: &mut Vec<Notification>,
    ) -> Result<()> {
        let from = self.position_of(child);
        let source_partition = self.partition_of(child);

        if let Some(from) = &from {
            if &from.slot == slot && from.index == index {
                return Ok(());
            }
            let mut source = self.node_list(&from.slot)?;
            source.remove(from.index);
            self.write_node_list(&from.slot, source)?;
        }
        self.node_mut(child)?.set_owner(Owner::None);

        let mut target = self.node_list(slot)?;
        if index > target.len() {
            return Err(GraphError::IndexOutOfRange {
                index,
                length: target.len(),
            });
        }
        target.insert(index, child.clone());
        self.write_node_list(slot, target)?;

        let partition = self.partition_of(child);
        self.record_arrival(from, source_partition, slot.clone().at(index), partition, child, false, out)
    }

    /// Place `ids` consecutively in `slot` right after `anchor` (or at the
    /// start), keeping their order.
    fn place_batch(
        &mut self,
        slot: &Slot,
        mut anchor: Option<NodeId>,
        ids: &[NodeId],
        out: &mut Vec<Notification>,
    ) -> Result<()> {
        for id in ids {
            let without: Vec<NodeId> = self
                .node_list(slot)?
                .into_iter()
                .filter(|x| x != id)
                .collect();
            let index = match &anchor {
                None => 0,
                Some(a) => without.iter().position(|x| x == a).map_or(without.len(), |i| i + 1),
            };
            self.place(id, slot, index, out)?;
            anchor = Some(id.clone());
        }
        Ok(())
    }

    /// Report a node arriving at `to`, classified by which partitions the
    /// source and destination belong to.
    #[allow(clippy::too_many_arguments)]
    fn record_arrival(
        &self,
        from: Option<Position>,
        source_partition: Option<NodeId>,
        to: Position,
        partition: Option<NodeId>,
        moved: &NodeId,
        replace: bool,
        out: &mut Vec<Notification>,
    ) -> Result<()> {
        match (from, source_partition, partition) {
            (Some(from), Some(source), Some(destination)) => {
                let moved_item = if source != destination {
                    Some(Item::Subtree(self.serialize_subtree(moved)?))
                } else {
                    None
                };
                out.push(Notification::Elementary {
                    change: Change::Move {
                        topology: Topology::of(&from.slot, &to.slot),
                        from,
                        to,
                        replace,
                    },
                    partition: Some(destination),
                    source_partition: Some(source),
                    moved_item,
                });
            }
            (_, _, Some(destination)) => {
                let item = Item::Subtree(self.serialize_subtree(moved)?);
                let change = if replace {
                    Change::Replace { at: to, item }
                } else {
                    Change::Add { at: to, item }
                };
                out.push(Notification::elementary(change, Some(destination)));
            }
            (Some(from), Some(source), None) => {
                out.push(Notification::elementary(Change::Delete { at: from }, Some(source)));
            }
            _ => {}
        }
        Ok(())
    }

    fn drop_subtree(&mut self, id: &NodeId) {
        for node in self.descendants(id) {
            self.nodes.remove(&node);
            self.partitions.remove(&node);
        }
    }

    fn delete_node_at(&mut self, at: &Position, out: &mut Vec<Notification>) -> Result<()> {
        let mut list = self.node_list(&at.slot)?;
        if at.index >= list.len() {
            return Err(GraphError::IndexOutOfRange {
                index: at.index,
                length: list.len(),
            });
        }
        let removed = list.remove(at.index);
        let partition = self.partition_of(&removed);
        self.write_node_list(&at.slot, list)?;
        self.drop_subtree(&removed);
        if let Some(partition) = partition {
            out.push(Notification::elementary(
                Change::Delete { at: at.clone() },
                Some(partition),
            ));
        }
        Ok(())
    }

    /// Put `new` where the node at `at` is and delete the old subtree.
    fn replace_node_at(
        &mut self,
        at: &Position,
        new: &NodeId,
        out: &mut Vec<Notification>,
    ) -> Result<()> {
        let list = self.node_list(&at.slot)?;
        let old = list
            .get(at.index)
            .cloned()
            .ok_or(GraphError::IndexOutOfRange {
                index: at.index,
                length: list.len(),
            })?;
        if &old == new {
            return Ok(());
        }
        self.check_placement(new, &at.slot)?;

        let from = self.position_of(new);
        let source_partition = self.partition_of(new);
        if let Some(from) = &from {
            let mut source = self.node_list(&from.slot)?;
            source.remove(from.index);
            self.write_node_list(&from.slot, source)?;
        }

        let mut target = self.node_list(&at.slot)?;
        let index = target
            .iter()
            .position(|x| x == &old)
            .ok_or_else(|| GraphError::invalid(at.slot.parent(), "replaced node vanished"))?;
        target[index] = new.clone();
        self.write_node_list(&at.slot, target)?;
        self.drop_subtree(&old);

        let partition = self.partition_of(new);
        self.record_arrival(from, source_partition, at.clone(), partition, new, true, out)
    }

    fn commit(&mut self, mut out: Vec<Notification>) {
        match out.len() {
            0 => {}
            1 => self.notifications.append(&mut out),
            _ => self.notifications.push(Notification::Composite(out)),
        }
    }

    // ------------------------------------------------------------------
    // Node lifecycle
    // ------------------------------------------------------------------

    /// Create a free node. Free nodes are not reported until they are placed
    /// inside a partition.
    pub fn create_node(
        &mut self,
        id: impl Into<NodeId>,
        classifier: &MetaPointer,
    ) -> Result<NodeId> {
        let id = NodeId::parse(id.into().0)?;
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateId(id));
        }
        let info = self.registry.classifier(classifier)?;
        if !info.is_instantiable() {
            return Err(GraphError::invalid(classifier, "cannot instantiate"));
        }
        let node = Node::new(id.clone(), classifier.clone(), S::for_classifier(info));
        self.nodes.insert(id.clone(), node);
        Ok(id)
    }

    /// Insert pre-linked nodes built elsewhere. Owners must point inside the
    /// batch. Returns the batch roots in input order. Nothing is reported.
    pub fn graft(&mut self, nodes: Vec<Node<S>>) -> Result<Vec<NodeId>> {
        let mut batch = HashSet::new();
        for node in &nodes {
            if self.nodes.contains_key(node.id()) || !batch.insert(node.id().clone()) {
                return Err(GraphError::DuplicateId(node.id().clone()));
            }
        }
        for node in &nodes {
            if let Some(parent) = node.parent() {
                if !batch.contains(parent) {
                    return Err(GraphError::UnknownNode(parent.clone()));
                }
            }
        }

        let roots = nodes
            .iter()
            .filter(|n| n.owner().is_none())
            .map(|n| n.id().clone())
            .collect();
        for node in nodes {
            self.nodes.insert(node.id().clone(), node);
        }
        Ok(roots)
    }

    fn check_partition_candidate(&self, id: &NodeId) -> Result<()> {
        let node = self.node_ref(id)?;
        if !self.registry.classifier(node.classifier())?.is_partition() {
            return Err(GraphError::NotAPartition(id.clone()));
        }
        if !node.owner().is_none() {
            return Err(GraphError::invalid(id, "an owned node cannot become a partition"));
        }
        if self.partitions.contains(id) {
            return Err(GraphError::DuplicateId(id.clone()));
        }
        Ok(())
    }

    /// Register a free node as a partition without reporting it.
    pub fn adopt_partition(&mut self, id: &NodeId) -> Result<()> {
        self.check_partition_candidate(id)?;
        self.partitions.insert(id.clone());
        Ok(())
    }

    /// Drop a partition and its contents without reporting it.
    pub fn evict_partition(&mut self, id: &NodeId) -> Result<()> {
        if !self.partitions.contains(id) {
            return Err(GraphError::NotAPartition(id.clone()));
        }
        self.drop_subtree(id);
        Ok(())
    }

    pub fn add_partition(&mut self, id: &NodeId) -> Result<()> {
        self.check_partition_candidate(id)?;
        self.partitions.insert(id.clone());
        let partition = self.serialize_subtree(id)?;
        self.commit(vec![Notification::elementary(
            Change::AddPartition { partition },
            Some(id.clone()),
        )]);
        Ok(())
    }

    pub fn delete_partition(&mut self, id: &NodeId) -> Result<()> {
        if !self.partitions.contains(id) {
            return Err(GraphError::NotAPartition(id.clone()));
        }
        self.drop_subtree(id);
        self.commit(vec![Notification::elementary(
            Change::DeletePartition {
                partition: id.clone(),
            },
            Some(id.clone()),
        )]);
        Ok(())
    }

    /// Switch the classifier of a node, keeping its feature values. Every set
    /// feature must exist on the new classifier.
    pub fn change_classifier(&mut self, node: &NodeId, classifier: &MetaPointer) -> Result<()> {
        let info = self.registry.classifier(classifier)?.clone();
        if !info.is_instantiable() {
            return Err(GraphError::invalid(classifier, "cannot instantiate"));
        }
        let current = self.node_ref(node)?;
        if current.classifier() == classifier {
            return Ok(());
        }

        let features = current.slots().all_set_features();
        for feature in &features {
            if info.feature(feature).is_none() {
                return Err(GraphError::UnknownFeature {
                    classifier: classifier.clone(),
                    feature: feature.clone(),
                });
            }
        }
        if self.partitions.contains(node) && !info.is_partition() {
            return Err(GraphError::NotAPartition(node.clone()));
        }
        if let Owner::Contained {
            parent,
            containment,
            ..
        } = current.owner()
        {
            if let FeatureKind::Containment { child_type } =
                &self.feature_of(parent, containment)?.kind
            {
                if !self.registry.is_assignable(classifier, child_type) {
                    return Err(GraphError::invalid(
                        containment,
                        format!("{} is not a {}", classifier, child_type),
                    ));
                }
            }
        }

        let mut slots = S::for_classifier(&info);
        for feature in &features {
            slots.try_set(feature, current.slots().get(feature).cloned())?;
        }
        self.node_mut(node)?.set_classifier(classifier.clone(), slots);

        if let Some(partition) = self.partition_of(node) {
            self.commit(vec![Notification::elementary(
                Change::ChangeClassifier {
                    node: node.clone(),
                    classifier: classifier.clone(),
                },
                Some(partition),
            )]);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reflective access
    // ------------------------------------------------------------------

    /// Current value(s) of a feature. Reading an unset required feature
    /// fails with [`GraphError::UnsetFeature`].
    pub fn get(&self, node: &NodeId, feature: &MetaPointer) -> Result<Vec<Value>> {
        let definition = self.feature_of(node, feature)?;
        let values = self
            .node_ref(node)?
            .slots()
            .get(feature)
            .map(FeatureValue::to_values)
            .unwrap_or_default();
        if values.is_empty() && definition.multiplicity.is_required() {
            return Err(GraphError::UnsetFeature {
                node: node.clone(),
                feature: feature.clone(),
            });
        }
        Ok(values)
    }

    /// Replace the whole content of a feature.
    pub fn set(&mut self, node: &NodeId, feature: &MetaPointer, values: Vec<Value>) -> Result<()> {
        let definition = self.feature_of(node, feature)?;
        if !definition.multiplicity.is_multiple() && values.len() > 1 {
            return Err(GraphError::invalid(feature, "holds at most one value"));
        }
        if definition.multiplicity.is_required() && values.is_empty() {
            return Err(GraphError::invalid(feature, "required feature cannot be emptied"));
        }

        let mut out = Vec::new();
        match &definition.kind {
            FeatureKind::Property { datatype } => {
                let value = match values.into_iter().next() {
                    None => None,
                    Some(Value::Property(value)) => {
                        self.registry.check_value(datatype, &value)?;
                        Some(value)
                    }
                    Some(_) => return Err(GraphError::invalid(feature, "expected a property value")),
                };
                self.write_property(node, feature, value, &mut out)?;
            }
            FeatureKind::Containment { .. } => {
                let slot = self.slot_for(node, &definition);
                let ids = self.expect_nodes(feature, values)?;
                for id in &ids {
                    self.check_placement(id, &slot)?;
                }
                self.place_batch(&slot, None, &ids, &mut out)?;
                let leftovers = self.node_list(&slot)?.len() - ids.len();
                for _ in 0..leftovers {
                    self.delete_node_at(&slot.clone().at(ids.len()), &mut out)?;
                }
            }
            FeatureKind::Reference { .. } => {
                let slot = self.slot_for(node, &definition);
                let entries = self.expect_entries(feature, values)?;
                let current = self.entry_list(&slot)?;
                for (index, entry) in entries.iter().enumerate() {
                    match current.get(index) {
                        Some(existing) if existing == entry => {}
                        Some(_) => self.replace_entry_at(&slot.clone().at(index), entry.clone(), &mut out)?,
                        None => self.insert_entry_at(&slot.clone().at(index), entry.clone(), &mut out)?,
                    }
                }
                for _ in entries.len()..current.len() {
                    self.delete_entry_at(&slot.clone().at(entries.len()), &mut out)?;
                }
            }
        }
        self.commit(out);
        Ok(())
    }

    /// Insert values into a list feature at `index` (0 ≤ index ≤ length).
    /// Nodes already in the list are moved so they end up in the given order.
    pub fn insert(
        &mut self,
        node: &NodeId,
        feature: &MetaPointer,
        index: usize,
        values: Vec<Value>,
    ) -> Result<()> {
        let definition = self.feature_of(node, feature)?;
        let slot = self.slot_for(node, &definition);
        let mut out = Vec::new();
        match &definition.kind {
            FeatureKind::Property { .. } => {
                return Err(GraphError::invalid(feature, "a property is not a list"))
            }
            FeatureKind::Containment { .. } => {
                let ids = self.expect_nodes(feature, values)?;
                let max = if definition.multiplicity.is_multiple() { None } else { Some(1) };
                self.insert_nodes(&slot, index, &ids, max, &mut out)?;
            }
            FeatureKind::Reference { .. } => {
                let entries = self.expect_entries(feature, values)?;
                let current = self.entry_list(&slot)?;
                if index > current.len() {
                    return Err(GraphError::IndexOutOfRange {
                        index,
                        length: current.len(),
                    });
                }
                if !definition.multiplicity.is_multiple() && current.len() + entries.len() > 1 {
                    return Err(GraphError::invalid(feature, "holds at most one value"));
                }
                for (offset, entry) in entries.into_iter().enumerate() {
                    self.insert_entry_at(&slot.clone().at(index + offset), entry, &mut out)?;
                }
            }
        }
        self.commit(out);
        Ok(())
    }

    /// Append values. A node already in the list moves to the end.
    pub fn add(&mut self, node: &NodeId, feature: &MetaPointer, values: Vec<Value>) -> Result<()> {
        let definition = self.feature_of(node, feature)?;
        let slot = self.slot_for(node, &definition);
        let length = match &definition.kind {
            FeatureKind::Property { .. } => return self.set(node, feature, values),
            FeatureKind::Containment { .. } => self
                .node_list(&slot)?
                .iter()
                .filter(|id| !values.iter().any(|v| matches!(v, Value::Node(n) if n == *id)))
                .count(),
            FeatureKind::Reference { .. } => self.entry_list(&slot)?.len(),
        };
        self.insert(node, feature, length, values)
    }

    /// Remove the given values. Removed children are deleted with their
    /// subtrees.
    pub fn remove(&mut self, node: &NodeId, feature: &MetaPointer, values: Vec<Value>) -> Result<()> {
        let definition = self.feature_of(node, feature)?;
        let slot = self.slot_for(node, &definition);
        let mut out = Vec::new();
        match &definition.kind {
            FeatureKind::Property { .. } => {
                let current = self.property(node, feature)?;
                for value in &values {
                    match (value, &current) {
                        (Value::Property(v), Some(c)) if v == c => {}
                        _ => return Err(GraphError::invalid(feature, "value is not present")),
                    }
                }
                if !values.is_empty() {
                    if definition.multiplicity.is_required() {
                        return Err(GraphError::invalid(feature, "required feature cannot be emptied"));
                    }
                    self.write_property(node, feature, None, &mut out)?;
                }
            }
            FeatureKind::Containment { .. } => {
                let ids = self.expect_nodes(feature, values)?;
                self.remove_nodes(&slot, &ids, definition.multiplicity.is_required(), &mut out)?;
            }
            FeatureKind::Reference { .. } => {
                let entries = self.expect_entries(feature, values)?;
                let mut current = self.entry_list(&slot)?;
                let mut indices = Vec::new();
                for entry in &entries {
                    let index = current
                        .iter()
                        .position(|e| e == entry)
                        .ok_or_else(|| GraphError::invalid(feature, "entry is not present"))?;
                    current.remove(index);
                    indices.push(index);
                }
                if current.is_empty() && !entries.is_empty() && definition.multiplicity.is_required() {
                    return Err(GraphError::invalid(feature, "required feature cannot be emptied"));
                }
                for index in indices {
                    self.delete_entry_at(&slot.clone().at(index), &mut out)?;
                }
            }
        }
        self.commit(out);
        Ok(())
    }

    fn insert_nodes(
        &mut self,
        slot: &Slot,
        index: usize,
        ids: &[NodeId],
        max: Option<usize>,
        out: &mut Vec<Notification>,
    ) -> Result<()> {
        let current = self.node_list(slot)?;
        // `index` addresses the final list, i.e. the list with `ids` taken out.
        let without: Vec<NodeId> = current.iter().filter(|x| !ids.contains(x)).cloned().collect();
        if index > without.len() {
            return Err(GraphError::IndexOutOfRange {
                index,
                length: without.len(),
            });
        }
        for id in ids {
            self.check_placement(id, slot)?;
        }

        if let Some(max) = max {
            if without.len() + ids.len() > max {
                return Err(GraphError::invalid(slot.parent(), "holds at most one value"));
            }
        }
        let anchor = if index == 0 { None } else { Some(without[index - 1].clone()) };
        self.place_batch(slot, anchor, ids, out)
    }

    fn remove_nodes(
        &mut self,
        slot: &Slot,
        ids: &[NodeId],
        required: bool,
        out: &mut Vec<Notification>,
    ) -> Result<()> {
        let current = self.node_list(slot)?;
        if let Some(missing) = ids.iter().find(|id| !current.contains(id)) {
            return Err(GraphError::invalid(
                slot.parent(),
                format!("{} is not owned here", missing),
            ));
        }
        if required && !ids.is_empty() && current.len() == ids.len() {
            return Err(GraphError::invalid(slot.parent(), "required feature cannot be emptied"));
        }
        for id in ids {
            let index = self
                .node_list(slot)?
                .iter()
                .position(|x| x == id)
                .ok_or_else(|| GraphError::UnknownNode(id.clone()))?;
            self.delete_node_at(&slot.clone().at(index), out)?;
        }
        Ok(())
    }

    fn write_property(
        &mut self,
        node: &NodeId,
        feature: &MetaPointer,
        value: Option<PropertyValue>,
        out: &mut Vec<Notification>,
    ) -> Result<()> {
        let new_raw = value
            .as_ref()
            .map(|v| self.registry.format_value(v, self.format))
            .transpose()?;
        let old = self.property(node, feature)?;
        if old == value {
            return Ok(());
        }
        let old_raw = old.and_then(|v| self.registry.format_value(&v, self.format).ok());

        self.node_mut(node)?
            .slots_mut()
            .try_set(feature, value.map(FeatureValue::Property))?;

        if let (Some(partition), Some(edit)) =
            (self.partition_of(node), Edit::between(old_raw, new_raw))
        {
            out.push(Notification::elementary(
                Change::Property {
                    node: node.clone(),
                    property: feature.clone(),
                    edit,
                },
                Some(partition),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Typed helpers
    // ------------------------------------------------------------------

    pub fn property(&self, node: &NodeId, feature: &MetaPointer) -> Result<Option<PropertyValue>> {
        if !self.feature_of(node, feature)?.is_property() {
            return Err(GraphError::invalid(feature, "not a property"));
        }
        match self.node_ref(node)?.slots().get(feature) {
            Some(FeatureValue::Property(value)) => Ok(Some(value.clone())),
            _ => Ok(None),
        }
    }

    pub fn set_property(
        &mut self,
        node: &NodeId,
        feature: &MetaPointer,
        value: Option<PropertyValue>,
    ) -> Result<()> {
        self.set(node, feature, value.map(Value::Property).into_iter().collect())
    }

    /// Children of a containment; empty when unset.
    pub fn children(&self, node: &NodeId, feature: &MetaPointer) -> Result<Vec<NodeId>> {
        self.node_list(&Slot::containment(node.clone(), feature.clone()))
    }

    /// Entries of a reference; empty when unset.
    pub fn references(&self, node: &NodeId, feature: &MetaPointer) -> Result<Vec<ReferenceEntry>> {
        self.entry_list(&Slot::reference(node.clone(), feature.clone()))
    }

    pub fn annotations(&self, node: &NodeId) -> Result<Vec<NodeId>> {
        Ok(self.node_ref(node)?.annotations().to_vec())
    }

    pub fn insert_annotations(&mut self, node: &NodeId, index: usize, ids: Vec<NodeId>) -> Result<()> {
        let slot = Slot::annotations(node.clone());
        let ids = self.expect_nodes(&annotations_feature(), ids.into_iter().map(Value::Node).collect())?;
        let mut out = Vec::new();
        self.insert_nodes(&slot, index, &ids, None, &mut out)?;
        self.commit(out);
        Ok(())
    }

    pub fn add_annotations(&mut self, node: &NodeId, ids: Vec<NodeId>) -> Result<()> {
        let length = self
            .node_ref(node)?
            .annotations()
            .iter()
            .filter(|id| !ids.contains(*id))
            .count();
        self.insert_annotations(node, length, ids)
    }

    pub fn remove_annotations(&mut self, node: &NodeId, ids: Vec<NodeId>) -> Result<()> {
        let slot = Slot::annotations(node.clone());
        let ids = self.expect_nodes(&annotations_feature(), ids.into_iter().map(Value::Node).collect())?;
        let mut out = Vec::new();
        self.remove_nodes(&slot, &ids, false, &mut out)?;
        self.commit(out);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Positional operations
    // ------------------------------------------------------------------

    pub fn delete_at(&mut self, at: &Position) -> Result<()> {
        let mut out = Vec::new();
        match at.slot {
            Slot::Reference { .. } => self.delete_entry_at(at, &mut out)?,
            _ => self.delete_node_at(at, &mut out)?,
        }
        self.commit(out);
        Ok(())
    }

    /// Replace the item at `at`. A replacing node that already has an owner
    /// is moved; the replaced subtree is deleted.
    pub fn replace_at(&mut self, at: &Position, value: Value) -> Result<()> {
        let mut out = Vec::new();
        match (&at.slot, value) {
            (Slot::Reference { reference, .. }, value) => {
                let entry = self
                    .expect_entries(reference, vec![value])?
                    .into_iter()
                    .next()
                    .ok_or_else(|| GraphError::invalid(reference, "expected a reference"))?;
                self.replace_entry_at(at, entry, &mut out)?;
            }
            (slot, Value::Node(id)) => {
                if !self.nodes.contains_key(&id) {
                    return Err(GraphError::invalid(slot.parent(), format!("{} is not a live node", id)));
                }
                self.replace_node_at(at, &id, &mut out)?;
            }
            (slot, _) => return Err(GraphError::invalid(slot.parent(), "expected a node")),
        }
        self.commit(out);
        Ok(())
    }

    /// Move the item at `from` to `to`. Without `replace`, `to.index` is
    /// counted after removing the item. With `replace`, the item currently at
    /// `to` is deleted and the moved item takes its place.
    pub fn move_item(&mut self, from: &Position, to: &Position, replace: bool) -> Result<()> {
        let mut out = Vec::new();
        match (&from.slot, &to.slot) {
            (Slot::Reference { .. }, Slot::Reference { .. }) => {
                self.move_entry(from, to, replace, &mut out)?
            }
            (Slot::Reference { .. }, _) | (_, Slot::Reference { .. }) => {
                return Err(GraphError::invalid(
                    to.slot.parent(),
                    "cannot move between node and reference slots",
                ))
            }
            _ => {
                let source = self.node_list(&from.slot)?;
                let moved = source.get(from.index).cloned().ok_or(GraphError::IndexOutOfRange {
                    index: from.index,
                    length: source.len(),
                })?;
                if replace {
                    let target = self.node_list(&to.slot)?;
                    match target.get(to.index) {
                        Some(existing) if existing == &moved => {
                            return Err(GraphError::invalid(to.slot.parent(), "cannot replace itself"))
                        }
                        Some(_) => {}
                        None => {
                            return Err(GraphError::IndexOutOfRange {
                                index: to.index,
                                length: target.len(),
                            })
                        }
                    }
                    self.replace_node_at(to, &moved, &mut out)?;
                } else {
                    let mut length = self.node_list(&to.slot)?.len();
                    if from.slot == to.slot {
                        length -= 1;
                    }
                    if to.index > length {
                        return Err(GraphError::IndexOutOfRange {
                            index: to.index,
                            length,
                        });
                    }
                    self.check_placement(&moved, &to.slot)?;
                    self.place(&moved, &to.slot, to.index, &mut out)?;
                }
            }
        }
        self.commit(out);
        Ok(())
    }

    pub fn set_reference_target(&mut self, at: &Position, target: Option<NodeId>) -> Result<()> {
        let mut entry = self.entry_at(at)?;
        let old = entry.target.clone();
        entry.target = target.clone();
        let edit = Edit::between(old, target).map(|edit| Change::ReferenceTarget {
            at: at.clone(),
            edit,
        });
        self.store_entry(at, entry, edit)
    }

    pub fn set_resolve_info(&mut self, at: &Position, resolve_info: Option<String>) -> Result<()> {
        let mut entry = self.entry_at(at)?;
        let old = entry.resolve_info.clone();
        entry.resolve_info = resolve_info.clone();
        let edit = Edit::between(old, resolve_info).map(|edit| Change::ResolveInfo {
            at: at.clone(),
            edit,
        });
        self.store_entry(at, entry, edit)
    }

    // ------------------------------------------------------------------
    // Reference entries
    // ------------------------------------------------------------------

    fn entry_at(&self, at: &Position) -> Result<ReferenceEntry> {
        let entries = self.entry_list(&at.slot)?;
        entries.get(at.index).cloned().ok_or(GraphError::IndexOutOfRange {
            index: at.index,
            length: entries.len(),
        })
    }

    fn store_entry(&mut self, at: &Position, entry: ReferenceEntry, change: Option<Change>) -> Result<()> {
        let Some(change) = change else {
            return Ok(());
        };
        if entry.is_null() {
            return Err(GraphError::invalid(at.slot.parent(), "entry would become null"));
        }
        let mut entries = self.entry_list(&at.slot)?;
        entries[at.index] = entry;
        self.write_entry_list(&at.slot, entries)?;
        if let Some(partition) = self.partition_of(at.slot.parent()) {
            self.commit(vec![Notification::elementary(change, Some(partition))]);
        }
        Ok(())
    }

    fn insert_entry_at(&mut self, at: &Position, entry: ReferenceEntry, out: &mut Vec<Notification>) -> Result<()> {
        let mut entries = self.entry_list(&at.slot)?;
        if at.index > entries.len() {
            return Err(GraphError::IndexOutOfRange {
                index: at.index,
                length: entries.len(),
            });
        }
        entries.insert(at.index, entry.clone());
        self.write_entry_list(&at.slot, entries)?;
        if let Some(partition) = self.partition_of(at.slot.parent()) {
            out.push(Notification::elementary(
                Change::Add {
                    at: at.clone(),
                    item: Item::Entry(entry),
                },
                Some(partition),
            ));
        }
        Ok(())
    }

    fn delete_entry_at(&mut self, at: &Position, out: &mut Vec<Notification>) -> Result<()> {
        let mut entries = self.entry_list(&at.slot)?;
        if at.index >= entries.len() {
            return Err(GraphError::IndexOutOfRange {
                index: at.index,
                length: entries.len(),
            });
        }
        entries.remove(at.index);
        self.write_entry_list(&at.slot, entries)?;
        if let Some(partition) = self.partition_of(at.slot.parent()) {
            out.push(Notification::elementary(Change::Delete { at: at.clone() }, Some(partition)));
        }
        Ok(())
    }

    fn replace_entry_at(&mut self, at: &Position, entry: ReferenceEntry, out: &mut Vec<Notification>) -> Result<()> {
        let mut entries = self.entry_list(&at.slot)?;
        let length = entries.len();
        let existing = entries.get_mut(at.index).ok_or(GraphError::IndexOutOfRange {
            index: at.index,
            length,
        })?;
        if *existing == entry {
            return Ok(());
        }
        *existing = entry.clone();
        self.write_entry_list(&at.slot, entries)?;
        if let Some(partition) = self.partition_of(at.slot.parent()) {
            out.push(Notification::elementary(
                Change::Replace {
                    at: at.clone(),
                    item: Item::Entry(entry),
                },
                Some(partition),
            ));
        }
        Ok(())
    }

    fn move_entry(&mut self, from: &Position, to: &Position, replace: bool, out: &mut Vec<Notification>) -> Result<()> {
        let same_slot = from.slot == to.slot;
        let source = self.entry_list(&from.slot)?;
        let target = self.entry_list(&to.slot)?;
        let entry = source.get(from.index).cloned().ok_or(GraphError::IndexOutOfRange {
            index: from.index,
            length: source.len(),
        })?;

        if replace {
            if to.index >= target.len() {
                return Err(GraphError::IndexOutOfRange {
                    index: to.index,
                    length: target.len(),
                });
            }
            if same_slot && from.index == to.index {
                return Err(GraphError::invalid(to.slot.parent(), "cannot replace itself"));
            }
        } else {
            let length = if same_slot { target.len() - 1 } else { target.len() };
            if to.index > length {
                return Err(GraphError::IndexOutOfRange {
                    index: to.index,
                    length,
                });
            }
            if same_slot && from.index == to.index {
                return Ok(());
            }
        }

        let mut source = source;
        source.remove(from.index);
        if same_slot {
            if replace {
                let index = if from.index < to.index { to.index - 1 } else { to.index };
                source[index] = entry.clone();
            } else {
                source.insert(to.index, entry.clone());
            }
            self.write_entry_list(&from.slot, source)?;
        } else {
            let mut target = target;
            if replace {
                target[to.index] = entry.clone();
            } else {
                target.insert(to.index, entry.clone());
            }
            self.write_entry_list(&from.slot, source)?;
            self.write_entry_list(&to.slot, target)?;
        }

        let source_partition = self.partition_of(from.slot.parent());
        let partition = self.partition_of(to.slot.parent());
        match (source_partition, partition) {
            (Some(source), Some(destination)) => {
                let moved_item = (source != destination).then(|| Item::Entry(entry));
                out.push(Notification::Elementary {
                    change: Change::Move {
                        from: from.clone(),
                        to: to.clone(),
                        topology: Topology::of(&from.slot, &to.slot),
                        replace,
                    },
                    partition: Some(destination),
                    source_partition: Some(source),
                    moved_item,
                });
            }
            (None, Some(destination)) => {
                let item = Item::Entry(entry);
                let change = if replace {
                    Change::Replace { at: to.clone(), item }
                } else {
                    Change::Add { at: to.clone(), item }
                };
                out.push(Notification::elementary(change, Some(destination)));
            }
            (Some(source), None) => {
                out.push(Notification::elementary(Change::Delete { at: from.clone() }, Some(source)));
            }
            (None, None) => {}
        }
        Ok(())
    }
}

/// Pseudo feature used in error messages about annotation lists.
fn annotations_feature() -> MetaPointer {
    MetaPointer::new("", "", "annotations")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::{builtins, LanguageBuilder, Multiplicity};

    fn registry() -> Arc<LanguageRegistry> {
        let lang = LanguageBuilder::new("t", "1")
            .partition_concept("Doc", |c| c.containment("items", "Item", Multiplicity::ZeroOrMore))
            .concept("Item", |c| {
                c.property("label", builtins::string(), Multiplicity::Optional)
                    .containment("items", "Item", Multiplicity::ZeroOrMore)
                    .reference("link", "Item", Multiplicity::ZeroOrMore)
            })
            .annotation("Note", "Item", |c| c)
            .build();
        let mut registry = LanguageRegistry::new();
        registry.register(lang).unwrap();
        Arc::new(registry)
    }

    fn p(key: &str) -> MetaPointer {
        MetaPointer::new("t", "1", key)
    }

    fn doc_with(items: &[&str]) -> Forest {
        let mut forest: Forest = Forest::new(registry());
        forest.create_node("doc", &p("Doc")).unwrap();
        forest.add_partition(&"doc".into()).unwrap();
        for item in items {
            forest.create_node(*item, &p("Item")).unwrap();
        }
        let values = items.iter().map(|i| Value::Node((*i).into())).collect();
        forest.add(&"doc".into(), &p("items"), values).unwrap();
        forest.drain_notifications();
        forest
    }

    fn ids(list: &[&str]) -> Vec<NodeId> {
        list.iter().map(|s| NodeId::from(*s)).collect()
    }

    #[test]
    fn test_same_list_move_lands_at_requested_index() {
        let mut forest = doc_with(&["a", "b", "c", "d"]);
        let slot = Slot::containment("doc", p("items"));

        forest.move_item(&slot.clone().at(0), &slot.clone().at(2), false).unwrap();
        assert_eq!(forest.children(&"doc".into(), &p("items")).unwrap(), ids(&["b", "c", "a", "d"]));

        let notes = forest.drain_notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].change().name(), "MoveChildInSameContainment");
    }

    #[test]
    fn test_move_to_current_index_is_silent() {
        let mut forest = doc_with(&["a", "b"]);
        let slot = Slot::containment("doc", p("items"));

        forest.move_item(&slot.clone().at(1), &slot.clone().at(1), false).unwrap();
        assert!(forest.drain_notifications().is_empty());
    }

    #[test]
    fn test_insert_existing_items_keeps_batch_order() {
        let mut forest = doc_with(&["a", "b", "c"]);
        let values = vec![Value::Node("a".into()), Value::Node("b".into())];

        forest.insert(&"doc".into(), &p("items"), 1, values).unwrap();
        assert_eq!(forest.children(&"doc".into(), &p("items")).unwrap(), ids(&["c", "a", "b"]));
    }

    #[test]
    fn test_insert_existing_item_lands_at_requested_index() {
        let mut forest = doc_with(&["a", "b", "c", "d"]);
        forest.insert(&"doc".into(), &p("items"), 2, vec![Value::Node("a".into())]).unwrap();
        assert_eq!(forest.children(&"doc".into(), &p("items")).unwrap(), ids(&["b", "c", "a", "d"]));
        forest.drain_notifications();

        forest.insert(&"doc".into(), &p("items"), 1, vec![Value::Node("b".into())]).unwrap();
        assert_eq!(forest.children(&"doc".into(), &p("items")).unwrap(), ids(&["c", "b", "a", "d"]));
        let notes = forest.drain_notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].change().name(), "MoveChildInSameContainment");

        forest.insert(&"doc".into(), &p("items"), 1, vec![Value::Node("b".into())]).unwrap();
        assert!(forest.drain_notifications().is_empty());

        let err = forest
            .insert(&"doc".into(), &p("items"), 4, vec![Value::Node("a".into())])
            .unwrap_err();
        assert_eq!(err, GraphError::IndexOutOfRange { index: 4, length: 3 });
    }

    #[test]
    fn test_add_moves_existing_child_to_end() {
        let mut forest = doc_with(&["a", "b", "c"]);
        forest.add(&"doc".into(), &p("items"), vec![Value::Node("a".into())]).unwrap();
        assert_eq!(forest.children(&"doc".into(), &p("items")).unwrap(), ids(&["b", "c", "a"]));
    }

    #[test]
    fn test_reparenting_detaches_first() {
        let mut forest = doc_with(&["a", "b"]);
        forest.add(&"a".into(), &p("items"), vec![Value::Node("b".into())]).unwrap();

        assert_eq!(forest.children(&"doc".into(), &p("items")).unwrap(), ids(&["a"]));
        assert_eq!(forest.node(&"b".into()).unwrap().parent(), Some(&NodeId::from("a")));
        let notes = forest.drain_notifications();
        assert_eq!(notes[0].change().name(), "MoveChildFromOtherContainment");
    }

    #[test]
    fn test_cycles_are_rejected_without_mutation() {
        let mut forest = doc_with(&["a"]);
        forest.create_node("b", &p("Item")).unwrap();
        forest.add(&"a".into(), &p("items"), vec![Value::Node("b".into())]).unwrap();
        forest.drain_notifications();

        let err = forest
            .add(&"b".into(), &p("items"), vec![Value::Node("a".into())])
            .unwrap_err();
        assert!(matches!(err, GraphError::CircularContainment { .. }));

        let err = forest
            .add(&"a".into(), &p("items"), vec![Value::Node("a".into())])
            .unwrap_err();
        assert!(matches!(err, GraphError::CircularContainment { .. }));

        assert_eq!(forest.node(&"a".into()).unwrap().parent(), Some(&NodeId::from("doc")));
        assert!(forest.drain_notifications().is_empty());
    }

    #[test]
    fn test_batch_with_bad_item_changes_nothing() {
        let mut forest = doc_with(&["a"]);
        forest.create_node("b", &p("Item")).unwrap();
        let values = vec![Value::Node("b".into()), Value::Node("ghost".into())];

        assert!(forest.add(&"a".into(), &p("items"), values).is_err());
        assert!(forest.node(&"b".into()).unwrap().owner().is_none());
    }

    fn strict_forest() -> Forest {
        let lang = LanguageBuilder::new("r", "1")
            .partition_concept("Doc", |c| c.containment("parts", "Part", Multiplicity::OneOrMore))
            .concept("Part", |c| c.property("title", builtins::string(), Multiplicity::Single))
            .build();
        let mut registry = LanguageRegistry::new();
        registry.register(lang).unwrap();
        let mut forest: Forest = Forest::new(Arc::new(registry));
        forest.create_node("doc", &MetaPointer::new("r", "1", "Doc")).unwrap();
        forest.create_node("x", &MetaPointer::new("r", "1", "Part")).unwrap();
        forest
    }

    #[test]
    fn test_reading_unset_required_feature_fails() {
        let forest = strict_forest();
        let title = MetaPointer::new("r", "1", "title");
        assert_eq!(
            forest.get(&"x".into(), &title),
            Err(GraphError::UnsetFeature {
                node: "x".into(),
                feature: title.clone(),
            })
        );
    }

    #[test]
    fn test_foreign_feature_is_unknown() {
        let mut forest = strict_forest();
        let foreign = MetaPointer::new("r", "1", "parts");
        assert!(matches!(
            forest.get(&"x".into(), &foreign),
            Err(GraphError::UnknownFeature { .. })
        ));
        assert!(matches!(
            forest.set(&"x".into(), &foreign, vec![]),
            Err(GraphError::UnknownFeature { .. })
        ));
    }

    #[test]
    fn test_required_features_cannot_be_emptied() {
        let mut forest = strict_forest();
        let title = MetaPointer::new("r", "1", "title");
        let parts = MetaPointer::new("r", "1", "parts");

        assert!(matches!(
            forest.set(&"x".into(), &title, vec![]),
            Err(GraphError::InvalidValue { .. })
        ));
        forest.set_property(&"x".into(), &title, Some("intro".into())).unwrap();
        assert!(matches!(
            forest.remove(&"x".into(), &title, vec![Value::Property("intro".into())]),
            Err(GraphError::InvalidValue { .. })
        ));
        assert_eq!(forest.get(&"x".into(), &title).unwrap(), vec![Value::Property("intro".into())]);

        forest.add(&"doc".into(), &parts, vec![Value::Node("x".into())]).unwrap();
        assert!(matches!(
            forest.remove(&"doc".into(), &parts, vec![Value::Node("x".into())]),
            Err(GraphError::InvalidValue { .. })
        ));
        assert!(matches!(
            forest.set(&"doc".into(), &parts, vec![]),
            Err(GraphError::InvalidValue { .. })
        ));
        assert_eq!(forest.children(&"doc".into(), &parts).unwrap(), ids(&["x"]));
    }

    #[test]
    fn test_index_out_of_range() {
        let mut forest = doc_with(&["a"]);
        forest.create_node("b", &p("Item")).unwrap();
        let err = forest
            .insert(&"doc".into(), &p("items"), 5, vec![Value::Node("b".into())])
            .unwrap_err();
        assert_eq!(err, GraphError::IndexOutOfRange { index: 5, length: 1 });
    }

    #[test]
    fn test_partition_root_cannot_be_contained() {
        let mut forest = doc_with(&["a"]);
        let err = forest
            .add(&"a".into(), &p("items"), vec![Value::Node("doc".into())])
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidValue { .. }));
    }

    #[test]
    fn test_non_partition_concept_cannot_be_partition() {
        let mut forest: Forest = Forest::new(registry());
        forest.create_node("x", &p("Item")).unwrap();
        assert_eq!(
            forest.add_partition(&"x".into()),
            Err(GraphError::NotAPartition("x".into()))
        );
    }

    #[test]
    fn test_delete_drops_subtree() {
        let mut forest = doc_with(&["a"]);
        forest.create_node("b", &p("Item")).unwrap();
        forest.add(&"a".into(), &p("items"), vec![Value::Node("b".into())]).unwrap();

        forest.delete_at(&Slot::containment("doc", p("items")).at(0)).unwrap();
        assert!(!forest.contains(&"a".into()));
        assert!(!forest.contains(&"b".into()));
    }

    #[test]
    fn test_set_keeps_descendant_of_replaced_child() {
        let mut forest = doc_with(&["a"]);
        forest.create_node("b", &p("Item")).unwrap();
        forest.add(&"a".into(), &p("items"), vec![Value::Node("b".into())]).unwrap();

        forest.set(&"doc".into(), &p("items"), vec![Value::Node("b".into())]).unwrap();
        assert_eq!(forest.children(&"doc".into(), &p("items")).unwrap(), ids(&["b"]));
        assert!(!forest.contains(&"a".into()));
    }

    #[test]
    fn test_batch_reports_one_composite() {
        let mut forest = doc_with(&[]);
        forest.create_node("a", &p("Item")).unwrap();
        forest.create_node("b", &p("Item")).unwrap();
        let values = vec![Value::Node("a".into()), Value::Node("b".into())];
        forest.add(&"doc".into(), &p("items"), values).unwrap();

        let notes = forest.drain_notifications();
        assert_eq!(notes.len(), 1);
        assert!(matches!(&notes[0], Notification::Composite(parts) if parts.len() == 2));
    }

    #[test]
    fn test_property_edits() {
        let mut forest = doc_with(&["a"]);
        let label = p("label");
        forest.set_property(&"a".into(), &label, Some("x".into())).unwrap();
        forest.set_property(&"a".into(), &label, Some("y".into())).unwrap();
        forest.set_property(&"a".into(), &label, None).unwrap();

        let names: Vec<String> = forest
            .drain_notifications()
            .iter()
            .map(|n| n.change().name())
            .collect();
        assert_eq!(names, vec!["AddProperty", "ChangeProperty", "DeleteProperty"]);
    }

    #[test]
    fn test_reference_entries() {
        let mut forest = doc_with(&["a", "b"]);
        let link = p("link");
        forest
            .add(&"a".into(), &link, vec![Value::Reference(ReferenceEntry::to("b"))])
            .unwrap();
        let at = Slot::reference("a", link.clone()).at(0);
        forest.set_resolve_info(&at, Some("b".into())).unwrap();
        forest.set_reference_target(&at, None).unwrap();

        assert_eq!(
            forest.references(&"a".into(), &link).unwrap(),
            vec![ReferenceEntry::unresolved("b")]
        );
        assert!(forest.set_resolve_info(&at, None).is_err());

        let null = Value::Reference(ReferenceEntry {
            target: None,
            resolve_info: None,
        });
        assert!(forest.add(&"a".into(), &link, vec![null]).is_err());
    }

    #[test]
    fn test_annotations() {
        let mut forest = doc_with(&["a"]);
        forest.create_node("n", &p("Note")).unwrap();
        forest.add_annotations(&"a".into(), ids(&["n"])).unwrap();
        assert_eq!(forest.annotations(&"a".into()).unwrap(), ids(&["n"]));

        forest.create_node("n2", &p("Note")).unwrap();
        assert!(forest.add_annotations(&"doc".into(), ids(&["n2"])).is_err());

        forest.create_node("i", &p("Item")).unwrap();
        assert!(forest.add_annotations(&"a".into(), ids(&["i"])).is_err());
    }

    #[test]
    fn test_change_classifier_requires_features() {
        let mut forest = doc_with(&["a"]);
        forest.set_property(&"a".into(), &p("label"), Some("x".into())).unwrap();
        let err = forest.change_classifier(&"a".into(), &p("Doc")).unwrap_err();
        assert!(matches!(err, GraphError::UnknownFeature { .. }));
    }

    #[test]
    fn test_free_trees_are_silent_until_attached() {
        let mut forest = doc_with(&[]);
        forest.create_node("a", &p("Item")).unwrap();
        forest.create_node("b", &p("Item")).unwrap();
        forest.add(&"a".into(), &p("items"), vec![Value::Node("b".into())]).unwrap();
        assert!(forest.drain_notifications().is_empty());

        forest.add(&"doc".into(), &p("items"), vec![Value::Node("a".into())]).unwrap();
        let notes = forest.drain_notifications();
        match notes[0].change() {
            Change::Add { item: Item::Subtree(chunk), .. } => assert_eq!(chunk.nodes.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }
}
