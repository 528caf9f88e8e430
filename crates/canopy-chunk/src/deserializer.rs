//! Chunk → forest deserialization.
//!
//! Nodes are first built in a staging area: ids validated, classifiers and
//! features resolved, property strings parsed. Ownership edges are then
//! installed one at a time in chunk order, each guarded by a walk up the
//! owner chain, so a cycle is detected the moment its closing edge arrives
//! and healed before the next edge is considered. Only a fully acyclic
//! result is grafted into the target forest.

use crate::error::{DeserializationError, Result};
use crate::handler::{DeserializerHandler, LenientHandler, OwnerConflict, Resolution};
use crate::healing::{CycleResolution, DropConflictingEdge, HealingHandler};
use canopy_core::{
    FeatureKind, FeatureSlots, FeatureValue, Forest, GraphError, LanguageRegistry, MetaPointer,
    Node, NodeId, Owner, ReferenceEntry, SerializationFormat, SerializedChunk, SerializedNode,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Deserializer settings.
#[derive(Clone, Debug)]
pub struct DeserializerConfig {
    /// Parse property values with this format instead of the chunk's own.
    pub format: Option<SerializationFormat>,
    /// Count nodes already in the target forest as resolvable targets.
    pub resolve_against_forest: bool,
}

impl Default for DeserializerConfig {
    fn default() -> Self {
        Self {
            format: None,
            resolve_against_forest: true,
        }
    }
}

impl DeserializerConfig {
    pub fn with_format(mut self, format: SerializationFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn resolve_against_forest(mut self, enabled: bool) -> Self {
        self.resolve_against_forest = enabled;
        self
    }
}

/// Outcome of one deserialization.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Deserialized {
    /// Nodes left without an owner, in chunk order.
    pub roots: Vec<NodeId>,
    pub nodes: usize,
}

/// `None` stands for the annotation list.
type SlotKey = (NodeId, Option<MetaPointer>);

struct Staging<S: FeatureSlots> {
    order: Vec<NodeId>,
    /// Chunk id → accepted id; the first node with a given chunk id wins.
    aliases: HashMap<NodeId, NodeId>,
    nodes: HashMap<NodeId, Node<S>>,
    owners: HashMap<NodeId, SlotKey>,
    lists: HashMap<SlotKey, Vec<NodeId>>,
}

impl<S: FeatureSlots> Staging<S> {
    fn parent_of(&self, id: &NodeId) -> Option<&NodeId> {
        self.owners.get(id).map(|(parent, _)| parent)
    }

    /// The node directly below `ancestor` on the owner chain from `start`,
    /// or `None` when `ancestor` is not above `start`.
    fn below_on_chain(&self, start: &NodeId, ancestor: &NodeId) -> Option<NodeId> {
        let mut current = start.clone();
        let mut visited = HashSet::new();
        loop {
            let parent = self.parent_of(&current)?;
            if parent == ancestor {
                return Some(current);
            }
            if !visited.insert(current.clone()) {
                return None;
            }
            current = parent.clone();
        }
    }

    fn detach(&mut self, child: &NodeId) {
        if let Some(key) = self.owners.remove(child) {
            if let Some(list) = self.lists.get_mut(&key) {
                list.retain(|c| c != child);
            }
        }
    }

    fn attach(&mut self, child: &NodeId, key: SlotKey) {
        self.lists.entry(key.clone()).or_default().push(child.clone());
        self.owners.insert(child.clone(), key);
    }
}

/// Turns chunks into forest nodes.
///
/// # Example
///
/// ```rust
/// use canopy_chunk::{Deserializer, KeepNewEdge};
/// use canopy_core::{Forest, LanguageBuilder, LanguageRegistry, Multiplicity};
/// use canopy_core::{SerializationFormat, SerializedChunk, SerializedNode};
/// use std::sync::Arc;
///
/// let lang = LanguageBuilder::new("t", "1")
///     .concept("Box", |c| c.containment("items", "Box", Multiplicity::ZeroOrMore))
///     .build();
/// let boxed = lang.pointer("Box");
/// let items = lang.pointer("items");
/// let mut registry = LanguageRegistry::new();
/// registry.register(lang).unwrap();
///
/// let chunk = SerializedChunk::new(SerializationFormat::V2024_1)
///     .with_node(SerializedNode::new("a", boxed.clone()).with_children(items.clone(), vec!["b".into()]))
///     .with_node(SerializedNode::new("b", boxed).with_children(items, vec!["a".into()]));
///
/// let mut forest: Forest = Forest::new(Arc::new(registry));
/// let result = Deserializer::new()
///     .with_healing(KeepNewEdge)
///     .deserialize(&chunk, &mut forest)
///     .unwrap();
/// assert_eq!(result.roots, vec!["b".into()]);
/// ```
pub struct Deserializer<H = LenientHandler, C = DropConflictingEdge> {
    config: DeserializerConfig,
    handler: H,
    healing: C,
}

impl Default for Deserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer {
    pub fn new() -> Self {
        Self {
            config: DeserializerConfig::default(),
            handler: LenientHandler::new(),
            healing: DropConflictingEdge,
        }
    }
}

impl<H: DeserializerHandler, C: HealingHandler> Deserializer<H, C> {
    pub fn with_config(mut self, config: DeserializerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_handler<H2: DeserializerHandler>(self, handler: H2) -> Deserializer<H2, C> {
        Deserializer {
            config: self.config,
            handler,
            healing: self.healing,
        }
    }

    pub fn with_healing<C2: HealingHandler>(self, healing: C2) -> Deserializer<H, C2> {
        Deserializer {
            config: self.config,
            handler: self.handler,
            healing,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Deserialize `chunk` into `forest` as free nodes. Nothing is added to
    /// the forest when an error is returned.
    pub fn deserialize<S: FeatureSlots>(
        &mut self,
        chunk: &SerializedChunk,
        forest: &mut Forest<S>,
    ) -> Result<Deserialized> {
        let format = match self.config.format.or_else(|| chunk.format()) {
            Some(format) => format,
            None => {
                return Err(DeserializationError::UnsupportedFormat(
                    chunk.serialization_format_version.clone(),
                ))
            }
        };
        let registry = forest.registry().clone();

        let (ids, mut staging) = self.index(chunk, forest, &registry, format)?;
        for (serialized, id) in chunk.nodes.iter().zip(&ids) {
            if let Some(id) = id {
                self.install_references(serialized, id, forest, &mut staging)?;
            }
        }
        for (serialized, id) in chunk.nodes.iter().zip(&ids) {
            if let Some(id) = id {
                self.install_ownership(serialized, id, &registry, &mut staging)?;
            }
        }

        let Staging {
            order,
            aliases: _,
            mut nodes,
            owners,
            lists,
        } = staging;

        for ((parent, feature), children) in lists {
            for (index, child) in children.iter().enumerate() {
                if let Some(node) = nodes.get_mut(child) {
                    node.set_owner(match &feature {
                        Some(containment) => Owner::Contained {
                            parent: parent.clone(),
                            containment: containment.clone(),
                            index,
                        },
                        None => Owner::Annotated {
                            parent: parent.clone(),
                            index,
                        },
                    });
                }
            }
            if let Some(node) = nodes.get_mut(&parent) {
                match feature {
                    Some(containment) => {
                        node.slots_mut()
                            .try_set(&containment, Some(FeatureValue::Children(children)))?;
                    }
                    None => *node.annotations_mut() = children,
                }
            }
        }

        let roots: Vec<NodeId> = order
            .iter()
            .filter(|id| !owners.contains_key(*id))
            .cloned()
            .collect();
        let count = order.len();
        let batch: Vec<Node<S>> = order.iter().filter_map(|id| nodes.remove(id)).collect();
        forest.graft(batch)?;

        tracing::debug!(nodes = count, roots = roots.len(), "Deserialized chunk");
        Ok(Deserialized {
            roots,
            nodes: count,
        })
    }

    /// Deserialize and register every root whose classifier is a partition
    /// concept as a partition.
    pub fn deserialize_partitions<S: FeatureSlots>(
        &mut self,
        chunk: &SerializedChunk,
        forest: &mut Forest<S>,
    ) -> Result<Deserialized> {
        let result = self.deserialize(chunk, forest)?;
        for root in &result.roots {
            let is_partition = forest
                .node(root)
                .and_then(|n| forest.registry().classifier(n.classifier()).ok())
                .map(|info| info.is_partition())
                .unwrap_or(false);
            if is_partition {
                forest.adopt_partition(root)?;
            }
        }
        Ok(result)
    }

    /// A fresh forest holding the chunk's partitions.
    pub fn deserialize_forest<S: FeatureSlots>(
        &mut self,
        chunk: &SerializedChunk,
        registry: Arc<LanguageRegistry>,
    ) -> Result<Forest<S>> {
        let format = chunk.format().unwrap_or_default();
        let mut forest = Forest::new(registry).with_format(format);
        self.deserialize_partitions(chunk, &mut forest)?;
        Ok(forest)
    }

    fn index<S: FeatureSlots>(
        &mut self,
        chunk: &SerializedChunk,
        forest: &Forest<S>,
        registry: &LanguageRegistry,
        format: SerializationFormat,
    ) -> Result<(Vec<Option<NodeId>>, Staging<S>)> {
        let mut staging = Staging {
            order: Vec::new(),
            aliases: HashMap::new(),
            nodes: HashMap::new(),
            owners: HashMap::new(),
            lists: HashMap::new(),
        };
        let mut ids = Vec::with_capacity(chunk.nodes.len());

        for serialized in &chunk.nodes {
            let id = self.accept_id(&serialized.id, forest, &staging)?;
            let node = match &id {
                Some(id) => self.build_node(serialized, id, registry, format)?,
                None => None,
            };
            match (id, node) {
                (Some(id), Some(node)) => {
                    staging
                        .aliases
                        .entry(serialized.id.clone())
                        .or_insert_with(|| id.clone());
                    staging.order.push(id.clone());
                    staging.nodes.insert(id.clone(), node);
                    ids.push(Some(id));
                }
                _ => ids.push(None),
            }
        }
        Ok((ids, staging))
    }

    fn accept_id<S: FeatureSlots>(
        &mut self,
        raw: &NodeId,
        forest: &Forest<S>,
        staging: &Staging<S>,
    ) -> Result<Option<NodeId>> {
        let taken = |id: &NodeId| staging.nodes.contains_key(id) || forest.contains(id);

        let id = if raw.is_valid() {
            raw.clone()
        } else {
            match self.handler.invalid_id(raw.as_str()) {
                Resolution::Skip => return Ok(None),
                Resolution::Substitute(id) => id,
                Resolution::Fail => {
                    return Err(GraphError::InvalidId(raw.as_str().to_string()).into())
                }
            }
        };

        if !taken(&id) {
            return Ok(Some(id));
        }
        match self.handler.duplicate_id(&id) {
            Resolution::Skip => Ok(None),
            Resolution::Substitute(other) if other.is_valid() && !taken(&other) => Ok(Some(other)),
            Resolution::Substitute(_) | Resolution::Fail => Err(GraphError::DuplicateId(id).into()),
        }
    }

    fn build_node<S: FeatureSlots>(
        &mut self,
        serialized: &SerializedNode,
        id: &NodeId,
        registry: &LanguageRegistry,
        format: SerializationFormat,
    ) -> Result<Option<Node<S>>> {
        let classifier = match registry.classifier(&serialized.classifier) {
            Ok(_) => serialized.classifier.clone(),
            Err(error) => match self.handler.unknown_classifier(id, &serialized.classifier) {
                Resolution::Skip => return Ok(None),
                Resolution::Substitute(other) if registry.classifier(&other).is_ok() => other,
                Resolution::Substitute(_) | Resolution::Fail => return Err(error.into()),
            },
        };
        let info = registry.classifier(&classifier)?;
        let mut node = Node::new(id.clone(), classifier.clone(), S::for_classifier(info));

        for property in &serialized.properties {
            let Some(feature) = self.resolve_feature(registry, id, &classifier, &property.property)? else {
                continue;
            };
            let FeatureKind::Property { datatype } = &feature.kind else {
                self.reject_feature(id, &classifier, &property.property)?;
                continue;
            };
            let Some(raw) = &property.value else {
                continue;
            };
            let value = match registry.parse_value(datatype, raw, format) {
                Ok(value) => value,
                Err(error) => {
                    match self.handler.invalid_property_value(id, &feature.pointer, raw, &error) {
                        Resolution::Skip => continue,
                        Resolution::Substitute(value) => {
                            registry.check_value(datatype, &value)?;
                            value
                        }
                        Resolution::Fail => return Err(error.into()),
                    }
                }
            };
            node.slots_mut()
                .try_set(&feature.pointer, Some(FeatureValue::Property(value)))?;
        }
        Ok(Some(node))
    }

    /// Resolve a feature of `classifier`, consulting the handler on a miss.
    fn resolve_feature(
        &mut self,
        registry: &LanguageRegistry,
        node: &NodeId,
        classifier: &MetaPointer,
        feature: &MetaPointer,
    ) -> Result<Option<canopy_core::Feature>> {
        match registry.feature(classifier, feature) {
            Ok(found) => Ok(Some(found.clone())),
            Err(error) => match self.handler.unknown_feature(node, classifier, feature) {
                Resolution::Skip => Ok(None),
                Resolution::Substitute(other) => match registry.feature(classifier, &other) {
                    Ok(found) => Ok(Some(found.clone())),
                    Err(_) => Err(error.into()),
                },
                Resolution::Fail => Err(error.into()),
            },
        }
    }

    /// A feature used with the wrong kind is treated like an unknown one.
    fn reject_feature(&mut self, node: &NodeId, classifier: &MetaPointer, feature: &MetaPointer) -> Result<()> {
        match self.handler.unknown_feature(node, classifier, feature) {
            Resolution::Fail => Err(GraphError::UnknownFeature {
                classifier: classifier.clone(),
                feature: feature.clone(),
            }
            .into()),
            _ => Ok(()),
        }
    }

    fn install_references<S: FeatureSlots>(
        &mut self,
        serialized: &SerializedNode,
        id: &NodeId,
        forest: &Forest<S>,
        staging: &mut Staging<S>,
    ) -> Result<()> {
        let registry = forest.registry().clone();
        let Some(classifier) = staging.nodes.get(id).map(|n| n.classifier().clone()) else {
            return Ok(());
        };

        for reference in &serialized.references {
            let Some(feature) = self.resolve_feature(&registry, id, &classifier, &reference.reference)? else {
                continue;
            };
            if !feature.is_reference() {
                self.reject_feature(id, &classifier, &reference.reference)?;
                continue;
            }

            let mut entries = Vec::with_capacity(reference.targets.len());
            for entry in &reference.targets {
                if entry.is_null() {
                    continue;
                }
                let resolved = match &entry.target {
                    None => true,
                    Some(target) => {
                        staging.aliases.contains_key(target)
                            || (self.config.resolve_against_forest && forest.contains(target))
                    }
                };
                if resolved {
                    entries.push(ReferenceEntry {
                        target: entry
                            .target
                            .as_ref()
                            .map(|t| staging.aliases.get(t).cloned().unwrap_or_else(|| t.clone())),
                        resolve_info: entry.resolve_info.clone(),
                    });
                    continue;
                }
                match self.handler.unresolved_reference(id, &feature.pointer, entry) {
                    Resolution::Skip => {}
                    Resolution::Substitute(healed) if !healed.is_null() => entries.push(healed),
                    Resolution::Substitute(_) => {}
                    Resolution::Fail => {
                        return Err(DeserializationError::Rejected(format!(
                            "unresolved reference from {} via {}",
                            id, feature.pointer
                        )))
                    }
                }
            }

            if let Some(node) = staging.nodes.get_mut(id) {
                node.slots_mut()
                    .try_set(&feature.pointer, Some(FeatureValue::References(entries)))?;
            }
        }
        Ok(())
    }

    fn install_ownership<S: FeatureSlots>(
        &mut self,
        serialized: &SerializedNode,
        id: &NodeId,
        registry: &LanguageRegistry,
        staging: &mut Staging<S>,
    ) -> Result<()> {
        let Some(classifier) = staging.nodes.get(id).map(|n| n.classifier().clone()) else {
            return Ok(());
        };

        let mut slots: Vec<(Option<canopy_core::Feature>, &Vec<NodeId>)> = Vec::new();
        for containment in &serialized.containments {
            let Some(feature) = self.resolve_feature(registry, id, &classifier, &containment.containment)? else {
                continue;
            };
            if !feature.is_containment() {
                self.reject_feature(id, &classifier, &containment.containment)?;
                continue;
            }
            slots.push((Some(feature), &containment.children));
        }
        slots.push((None, &serialized.annotations));

        for (feature, children) in slots {
            let pointer = feature.as_ref().map(|f| f.pointer.clone());
            for raw_child in children {
                let Some(child) = self.resolve_child(id, pointer.as_ref(), raw_child, staging)? else {
                    continue;
                };
                let Some(child) = self.check_child(id, feature.as_ref(), child, registry, staging)? else {
                    continue;
                };
                self.install_edge(id, pointer.clone(), child, staging)?;
            }
        }
        Ok(())
    }

    fn resolve_child<S: FeatureSlots>(
        &mut self,
        parent: &NodeId,
        feature: Option<&MetaPointer>,
        raw: &NodeId,
        staging: &Staging<S>,
    ) -> Result<Option<NodeId>> {
        if let Some(child) = staging.aliases.get(raw) {
            return Ok(Some(child.clone()));
        }
        match self.handler.unresolved_child(parent, feature, raw) {
            Resolution::Skip => Ok(None),
            Resolution::Substitute(other) if staging.nodes.contains_key(&other) => Ok(Some(other)),
            Resolution::Substitute(_) | Resolution::Fail => Err(DeserializationError::UnresolvedChild {
                parent: parent.clone(),
                child: raw.clone(),
            }),
        }
    }

    /// Type check of a child against its slot.
    fn check_child<S: FeatureSlots>(
        &mut self,
        parent: &NodeId,
        feature: Option<&canopy_core::Feature>,
        child: NodeId,
        registry: &LanguageRegistry,
        staging: &Staging<S>,
    ) -> Result<Option<NodeId>> {
        let fits = |candidate: &NodeId| -> std::result::Result<(), GraphError> {
            let node = staging
                .nodes
                .get(candidate)
                .ok_or_else(|| GraphError::UnknownNode(candidate.clone()))?;
            match feature.map(|f| &f.kind) {
                Some(FeatureKind::Containment { child_type }) => {
                    if registry.is_assignable(node.classifier(), child_type) {
                        Ok(())
                    } else {
                        Err(GraphError::InvalidValue {
                            feature: child_type.to_string(),
                            reason: format!("{} is not a {}", node.classifier(), child_type),
                        })
                    }
                }
                _ => {
                    if registry.classifier(node.classifier())?.is_annotation() {
                        Ok(())
                    } else {
                        Err(GraphError::InvalidValue {
                            feature: "annotations".to_string(),
                            reason: format!("{} is not an annotation", node.classifier()),
                        })
                    }
                }
            }
        };

        let error = match fits(&child) {
            Ok(()) => return Ok(Some(child)),
            Err(error) => error,
        };
        match self
            .handler
            .invalid_child(parent, feature.map(|f| &f.pointer), &child, &error)
        {
            Resolution::Skip => Ok(None),
            Resolution::Substitute(other) if fits(&other).is_ok() => Ok(Some(other)),
            Resolution::Substitute(_) | Resolution::Fail => Err(error.into()),
        }
    }

    /// Install `parent → child`, resolving owner conflicts and healing a
    /// cycle the edge would close.
    fn install_edge<S: FeatureSlots>(
        &mut self,
        parent: &NodeId,
        feature: Option<MetaPointer>,
        child: NodeId,
        staging: &mut Staging<S>,
    ) -> Result<()> {
        if &child == parent {
            // The self-edge is the only edge of this cycle, so it goes
            // unless the handler rejects the chunk.
            return match self.healing.resolve(&child, parent) {
                CycleResolution::Reject => Err(DeserializationError::Cycle {
                    child,
                    parent: parent.clone(),
                }),
                CycleResolution::DropEdge | CycleResolution::KeepEdge => {
                    tracing::warn!(node = %child, "Dropped self-containment");
                    Ok(())
                }
            };
        }

        if let Some(first) = staging.parent_of(&child).cloned() {
            if &first == parent && staging.lists.get(&(parent.clone(), feature.clone())).map_or(false, |l| l.contains(&child)) {
                return Ok(());
            }
            match self.handler.owner_conflict(&child, &first, parent) {
                OwnerConflict::KeepFirst => return Ok(()),
                OwnerConflict::Fail => {
                    return Err(DeserializationError::Rejected(format!(
                        "{} is owned by both {} and {}",
                        child, first, parent
                    )))
                }
                OwnerConflict::Reparent => {}
            }
        }

        if let Some(below) = staging.below_on_chain(parent, &child) {
            match self.healing.resolve(&child, parent) {
                CycleResolution::DropEdge => {
                    tracing::warn!(child = %child, parent = %parent, "Dropped cycle-closing edge");
                    return Ok(());
                }
                CycleResolution::Reject => {
                    return Err(DeserializationError::Cycle {
                        child,
                        parent: parent.clone(),
                    })
                }
                CycleResolution::KeepEdge => {
                    tracing::warn!(child = %child, severed = %below, "Severed edge to keep cycle-closing edge");
                    staging.detach(&below);
                }
            }
        }

        staging.detach(&child);
        staging.attach(&child, (parent.clone(), feature));
        Ok(())
    }
}
