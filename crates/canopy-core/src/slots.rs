//! Per-node feature storage.
//!
//! The forest is generic over [`FeatureSlots`] so nodes can store their
//! features either in a map keyed by feature pointer ([`DynamicSlots`]) or
//! in a vector laid out from the classifier's resolved feature list
//! ([`FixedSlots`]). Both normalize an empty list to "unset".

use crate::error::{GraphError, Result};
use crate::meta::MetaPointer;
use crate::registry::ClassifierInfo;
use crate::value::FeatureValue;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

pub trait FeatureSlots: Clone + Debug + Send + Sync + 'static {
    /// Empty storage for an instance of the given classifier.
    fn for_classifier(info: &ClassifierInfo) -> Self;

    fn get(&self, feature: &MetaPointer) -> Option<&FeatureValue>;

    /// Store or clear a feature, returning the previous value.
    fn try_set(
        &mut self,
        feature: &MetaPointer,
        value: Option<FeatureValue>,
    ) -> Result<Option<FeatureValue>>;

    /// Features currently holding a value, in storage order.
    fn all_set_features(&self) -> Vec<MetaPointer>;
}

fn normalize(value: Option<FeatureValue>) -> Option<FeatureValue> {
    value.filter(|v| !v.is_empty())
}

/// Map-backed storage that accepts any feature the caller has validated.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DynamicSlots {
    values: BTreeMap<MetaPointer, FeatureValue>,
}

impl FeatureSlots for DynamicSlots {
    fn for_classifier(_info: &ClassifierInfo) -> Self {
        Self::default()
    }

    fn get(&self, feature: &MetaPointer) -> Option<&FeatureValue> {
        self.values.get(feature)
    }

    fn try_set(
        &mut self,
        feature: &MetaPointer,
        value: Option<FeatureValue>,
    ) -> Result<Option<FeatureValue>> {
        Ok(match normalize(value) {
            Some(value) => self.values.insert(feature.clone(), value),
            None => self.values.remove(feature),
        })
    }

    fn all_set_features(&self) -> Vec<MetaPointer> {
        self.values.keys().cloned().collect()
    }
}

/// Vector-backed storage with one slot per feature of the classifier.
#[derive(Clone, Debug)]
pub struct FixedSlots {
    classifier: MetaPointer,
    layout: Arc<[MetaPointer]>,
    values: Vec<Option<FeatureValue>>,
}

impl FixedSlots {
    fn position(&self, feature: &MetaPointer) -> Option<usize> {
        self.layout.iter().position(|f| f == feature)
    }
}

impl FeatureSlots for FixedSlots {
    fn for_classifier(info: &ClassifierInfo) -> Self {
        Self {
            classifier: info.pointer().clone(),
            layout: info.layout.clone(),
            values: vec![None; info.layout.len()],
        }
    }

    fn get(&self, feature: &MetaPointer) -> Option<&FeatureValue> {
        self.position(feature)
            .and_then(|i| self.values[i].as_ref())
    }

    fn try_set(
        &mut self,
        feature: &MetaPointer,
        value: Option<FeatureValue>,
    ) -> Result<Option<FeatureValue>> {
        let index = self
            .position(feature)
            .ok_or_else(|| GraphError::UnknownFeature {
                classifier: self.classifier.clone(),
                feature: feature.clone(),
            })?;
        Ok(std::mem::replace(&mut self.values[index], normalize(value)))
    }

    fn all_set_features(&self) -> Vec<MetaPointer> {
        self.layout
            .iter()
            .zip(&self.values)
            .filter(|(_, v)| v.is_some())
            .map(|(f, _)| f.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::{builtins, LanguageBuilder, Multiplicity};
    use crate::registry::LanguageRegistry;
    use crate::value::PropertyValue;

    fn info() -> Arc<ClassifierInfo> {
        let lang = LanguageBuilder::new("t", "1")
            .concept("Box", |c| {
                c.property("label", builtins::string(), Multiplicity::Optional)
                    .containment("items", "Box", Multiplicity::ZeroOrMore)
            })
            .build();
        let pointer = lang.pointer("Box");
        let mut registry = LanguageRegistry::new();
        registry.register(lang).unwrap();
        registry.classifier(&pointer).unwrap().clone()
    }

    #[test]
    fn test_fixed_slots_reject_unknown_features() {
        let mut slots = FixedSlots::for_classifier(&info());
        let bogus = MetaPointer::new("t", "1", "bogus");
        assert!(matches!(
            slots.try_set(&bogus, None),
            Err(GraphError::UnknownFeature { .. })
        ));
    }

    #[test]
    fn test_empty_list_reads_as_unset() {
        let info = info();
        let items = MetaPointer::new("t", "1", "items");
        let label = MetaPointer::new("t", "1", "label");

        probe(&mut FixedSlots::for_classifier(&info), &items, &label);
        probe(&mut DynamicSlots::for_classifier(&info), &items, &label);
    }

    fn probe<S: FeatureSlots>(slots: &mut S, items: &MetaPointer, label: &MetaPointer) {
        slots
            .try_set(items, Some(FeatureValue::Children(vec![])))
            .unwrap();
        assert!(slots.get(items).is_none());

        slots
            .try_set(label, Some(FeatureValue::Property(PropertyValue::from("x"))))
            .unwrap();
        assert_eq!(slots.all_set_features(), vec![label.clone()]);

        let previous = slots.try_set(label, None).unwrap();
        assert!(previous.is_some());
        assert!(slots.all_set_features().is_empty());
    }
}
