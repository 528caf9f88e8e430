//! Callbacks consulted when a chunk does not fit the registry or itself.
//!
//! Every callback returns a [`Resolution`]: skip the offending item,
//! substitute a replacement, or fail the whole deserialization. The default
//! method bodies are lenient.

use canopy_core::{GraphError, MetaPointer, NodeId, PropertyValue, ReferenceEntry};

#[derive(Clone, Debug, PartialEq)]
pub enum Resolution<T> {
    Skip,
    Substitute(T),
    Fail,
}

/// What to do when a node is listed by two owners.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnerConflict {
    /// Keep the edge installed first; ignore the later one.
    KeepFirst,
    /// Detach from the first owner and follow the later edge.
    Reparent,
    Fail,
}

/// `None` as `feature` means the annotation list.
pub trait DeserializerHandler {
    fn invalid_id(&mut self, _raw: &str) -> Resolution<NodeId> {
        Resolution::Skip
    }

    fn duplicate_id(&mut self, _id: &NodeId) -> Resolution<NodeId> {
        Resolution::Skip
    }

    fn unknown_classifier(&mut self, _node: &NodeId, _classifier: &MetaPointer) -> Resolution<MetaPointer> {
        Resolution::Skip
    }

    fn unknown_feature(
        &mut self,
        _node: &NodeId,
        _classifier: &MetaPointer,
        _feature: &MetaPointer,
    ) -> Resolution<MetaPointer> {
        Resolution::Skip
    }

    fn invalid_property_value(
        &mut self,
        _node: &NodeId,
        _property: &MetaPointer,
        _raw: &str,
        _error: &GraphError,
    ) -> Resolution<PropertyValue> {
        Resolution::Skip
    }

    fn unresolved_child(
        &mut self,
        _node: &NodeId,
        _feature: Option<&MetaPointer>,
        _child: &NodeId,
    ) -> Resolution<NodeId> {
        Resolution::Skip
    }

    fn invalid_child(
        &mut self,
        _node: &NodeId,
        _feature: Option<&MetaPointer>,
        _child: &NodeId,
        _error: &GraphError,
    ) -> Resolution<NodeId> {
        Resolution::Skip
    }

    /// Target not found in the chunk (or forest). The default drops the
    /// target and keeps the resolve info; an entry with neither is skipped.
    fn unresolved_reference(
        &mut self,
        _node: &NodeId,
        _reference: &MetaPointer,
        entry: &ReferenceEntry,
    ) -> Resolution<ReferenceEntry> {
        drop_target(entry)
    }

    fn owner_conflict(&mut self, _child: &NodeId, _first: &NodeId, _second: &NodeId) -> OwnerConflict {
        OwnerConflict::KeepFirst
    }
}

fn drop_target(entry: &ReferenceEntry) -> Resolution<ReferenceEntry> {
    match &entry.resolve_info {
        Some(info) => Resolution::Substitute(ReferenceEntry::unresolved(info.clone())),
        None => Resolution::Skip,
    }
}

/// Fails on every anomaly, except that references to nodes outside the chunk
/// are kept verbatim: they usually point into other partitions.
#[derive(Clone, Copy, Debug, Default)]
pub struct StrictHandler;

impl DeserializerHandler for StrictHandler {
    fn invalid_id(&mut self, _raw: &str) -> Resolution<NodeId> {
        Resolution::Fail
    }

    fn duplicate_id(&mut self, _id: &NodeId) -> Resolution<NodeId> {
        Resolution::Fail
    }

    fn unknown_classifier(&mut self, _node: &NodeId, _classifier: &MetaPointer) -> Resolution<MetaPointer> {
        Resolution::Fail
    }

    fn unknown_feature(
        &mut self,
        _node: &NodeId,
        _classifier: &MetaPointer,
        _feature: &MetaPointer,
    ) -> Resolution<MetaPointer> {
        Resolution::Fail
    }

    fn invalid_property_value(
        &mut self,
        _node: &NodeId,
        _property: &MetaPointer,
        _raw: &str,
        _error: &GraphError,
    ) -> Resolution<PropertyValue> {
        Resolution::Fail
    }

    fn unresolved_child(
        &mut self,
        _node: &NodeId,
        _feature: Option<&MetaPointer>,
        _child: &NodeId,
    ) -> Resolution<NodeId> {
        Resolution::Fail
    }

    fn invalid_child(
        &mut self,
        _node: &NodeId,
        _feature: Option<&MetaPointer>,
        _child: &NodeId,
        _error: &GraphError,
    ) -> Resolution<NodeId> {
        Resolution::Fail
    }

    fn unresolved_reference(
        &mut self,
        _node: &NodeId,
        _reference: &MetaPointer,
        entry: &ReferenceEntry,
    ) -> Resolution<ReferenceEntry> {
        Resolution::Substitute(entry.clone())
    }

    fn owner_conflict(&mut self, _child: &NodeId, _first: &NodeId, _second: &NodeId) -> OwnerConflict {
        OwnerConflict::Fail
    }
}

/// One anomaly seen by [`LenientHandler`].
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub node: Option<NodeId>,
    pub issue: Issue,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Issue {
    InvalidId(String),
    DuplicateId,
    UnknownClassifier(MetaPointer),
    UnknownFeature(MetaPointer),
    InvalidPropertyValue { property: MetaPointer, raw: String },
    UnresolvedChild(NodeId),
    InvalidChild(NodeId),
    UnresolvedReference(ReferenceEntry),
    OwnerConflict { child: NodeId, first: NodeId },
}

/// Applies the default resolutions and records what it saw.
#[derive(Clone, Debug, Default)]
pub struct LenientHandler {
    reports: Vec<Report>,
}

impl LenientHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> &[Report] {
        &self.reports
    }

    pub fn take_reports(&mut self) -> Vec<Report> {
        std::mem::take(&mut self.reports)
    }

    fn report(&mut self, node: Option<&NodeId>, issue: Issue) {
        tracing::debug!(?node, ?issue, "Lenient deserialization");
        self.reports.push(Report {
            node: node.cloned(),
            issue,
        });
    }
}

impl DeserializerHandler for LenientHandler {
    fn invalid_id(&mut self, raw: &str) -> Resolution<NodeId> {
        self.report(None, Issue::InvalidId(raw.to_string()));
        Resolution::Skip
    }

    fn duplicate_id(&mut self, id: &NodeId) -> Resolution<NodeId> {
        self.report(Some(id), Issue::DuplicateId);
        Resolution::Skip
    }

    fn unknown_classifier(&mut self, node: &NodeId, classifier: &MetaPointer) -> Resolution<MetaPointer> {
        self.report(Some(node), Issue::UnknownClassifier(classifier.clone()));
        Resolution::Skip
    }

    fn unknown_feature(
        &mut self,
        node: &NodeId,
        _classifier: &MetaPointer,
        feature: &MetaPointer,
    ) -> Resolution<MetaPointer> {
        self.report(Some(node), Issue::UnknownFeature(feature.clone()));
        Resolution::Skip
    }

    fn invalid_property_value(
        &mut self,
        node: &NodeId,
        property: &MetaPointer,
        raw: &str,
        _error: &GraphError,
    ) -> Resolution<PropertyValue> {
        self.report(
            Some(node),
            Issue::InvalidPropertyValue {
                property: property.clone(),
                raw: raw.to_string(),
            },
        );
        Resolution::Skip
    }

    fn unresolved_child(
        &mut self,
        node: &NodeId,
        _feature: Option<&MetaPointer>,
        child: &NodeId,
    ) -> Resolution<NodeId> {
        self.report(Some(node), Issue::UnresolvedChild(child.clone()));
        Resolution::Skip
    }

    fn invalid_child(
        &mut self,
        node: &NodeId,
        _feature: Option<&MetaPointer>,
        child: &NodeId,
        _error: &GraphError,
    ) -> Resolution<NodeId> {
        self.report(Some(node), Issue::InvalidChild(child.clone()));
        Resolution::Skip
    }

    fn unresolved_reference(
        &mut self,
        node: &NodeId,
        _reference: &MetaPointer,
        entry: &ReferenceEntry,
    ) -> Resolution<ReferenceEntry> {
        self.report(Some(node), Issue::UnresolvedReference(entry.clone()));
        drop_target(entry)
    }

    fn owner_conflict(&mut self, child: &NodeId, first: &NodeId, second: &NodeId) -> OwnerConflict {
        self.report(
            Some(second),
            Issue::OwnerConflict {
                child: child.clone(),
                first: first.clone(),
            },
        );
        OwnerConflict::KeepFirst
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_reference_healing() {
        let mut handler = LenientHandler::new();
        let node = NodeId::from("n");
        let reference = MetaPointer::new("t", "1", "r");

        let with_info = ReferenceEntry::to("gone").with_resolve_info("Gone");
        assert_eq!(
            handler.unresolved_reference(&node, &reference, &with_info),
            Resolution::Substitute(ReferenceEntry::unresolved("Gone"))
        );
        assert_eq!(
            handler.unresolved_reference(&node, &reference, &ReferenceEntry::to("gone")),
            Resolution::Skip
        );
        assert_eq!(handler.reports().len(), 2);
    }

    #[test]
    fn test_strict_keeps_foreign_references() {
        let mut handler = StrictHandler;
        let entry = ReferenceEntry::to("elsewhere");
        assert_eq!(
            handler.unresolved_reference(&"n".into(), &MetaPointer::new("t", "1", "r"), &entry),
            Resolution::Substitute(entry.clone())
        );
        assert_eq!(handler.invalid_id("bad id"), Resolution::Fail);
    }
}
