//! Classifier → feature lookup over a set of registered languages.
//!
//! Registration resolves inheritance eagerly: every classifier gets a
//! [`ClassifierInfo`] holding its full feature set (inherited features
//! included), an index from feature pointer to position and the set of its
//! ancestors. Feature access on a node is then a single hash lookup.

use crate::error::{GraphError, Result};
use crate::language::{builtins, Classifier, ClassifierKind, Datatype, Feature, Language, LanguageRef};
use crate::meta::MetaPointer;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Resolved view of one classifier.
#[derive(Clone, Debug)]
pub struct ClassifierInfo {
    pub classifier: Classifier,
    /// Own and inherited features, supertypes first.
    pub features: Vec<Feature>,
    index: HashMap<MetaPointer, usize>,
    /// Every classifier this one is assignable to, itself included.
    pub ancestors: BTreeSet<MetaPointer>,
    /// Feature order used by fixed-slot storage.
    pub layout: Arc<[MetaPointer]>,
}

impl ClassifierInfo {
    pub fn pointer(&self) -> &MetaPointer {
        &self.classifier.pointer
    }

    pub fn feature(&self, feature: &MetaPointer) -> Option<&Feature> {
        self.index.get(feature).map(|&i| &self.features[i])
    }

    pub fn feature_index(&self, feature: &MetaPointer) -> Option<usize> {
        self.index.get(feature).copied()
    }

    pub fn is_partition(&self) -> bool {
        matches!(
            self.classifier.kind,
            ClassifierKind::Concept {
                partition: true,
                ..
            }
        )
    }

    pub fn is_annotation(&self) -> bool {
        matches!(self.classifier.kind, ClassifierKind::Annotation { .. })
    }

    /// Interfaces and abstract concepts cannot be instantiated.
    pub fn is_instantiable(&self) -> bool {
        match self.classifier.kind {
            ClassifierKind::Concept { is_abstract, .. } => !is_abstract,
            ClassifierKind::Annotation { .. } => true,
            ClassifierKind::Interface => false,
        }
    }
}

/// All languages known to a forest.
#[derive(Clone, Debug)]
pub struct LanguageRegistry {
    languages: BTreeMap<LanguageRef, Language>,
    classifiers: HashMap<MetaPointer, Arc<ClassifierInfo>>,
    datatypes: HashMap<MetaPointer, Datatype>,
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageRegistry {
    /// A registry containing only the built-in language.
    pub fn new() -> Self {
        let mut registry = Self {
            languages: BTreeMap::new(),
            classifiers: HashMap::new(),
            datatypes: HashMap::new(),
        };
        registry.insert(builtins::language());
        // The builtins only extend each other, so this cannot fail.
        if let Ok(infos) = registry.resolve_all() {
            registry.classifiers = infos;
        }
        registry
    }

    /// Register a language. Its dependencies must already be registered and
    /// every supertype must resolve.
    pub fn register(&mut self, language: Language) -> Result<()> {
        for dependency in &language.dependencies {
            if !self.languages.contains_key(dependency) {
                return Err(GraphError::UnknownLanguage {
                    key: dependency.key.clone(),
                    version: dependency.version.clone(),
                });
            }
        }

        let mut candidate = self.clone();
        candidate.insert(language);
        candidate.classifiers = candidate.resolve_all()?;
        *self = candidate;
        Ok(())
    }

    fn insert(&mut self, language: Language) {
        for datatype in &language.datatypes {
            self.datatypes
                .insert(datatype.pointer.clone(), datatype.clone());
        }
        self.languages.insert(language.reference(), language);
    }

    fn resolve_all(&self) -> Result<HashMap<MetaPointer, Arc<ClassifierInfo>>> {
        let declared: HashMap<&MetaPointer, &Classifier> = self
            .languages
            .values()
            .flat_map(|language| language.classifiers.iter())
            .map(|classifier| (&classifier.pointer, classifier))
            .collect();

        let mut infos = HashMap::with_capacity(declared.len());
        for (&pointer, &classifier) in &declared {
            let mut features = Vec::new();
            let mut ancestors = BTreeSet::new();
            collect(&declared, classifier, &mut features, &mut ancestors)?;

            let index: HashMap<MetaPointer, usize> = features
                .iter()
                .enumerate()
                .map(|(i, f): (usize, &Feature)| (f.pointer.clone(), i))
                .collect();
            let layout: Arc<[MetaPointer]> = features.iter().map(|f| f.pointer.clone()).collect();

            infos.insert(
                pointer.clone(),
                Arc::new(ClassifierInfo {
                    classifier: classifier.clone(),
                    features,
                    index,
                    ancestors,
                    layout,
                }),
            );
        }
        Ok(infos)
    }

    pub fn languages(&self) -> impl Iterator<Item = &Language> {
        self.languages.values()
    }

    pub fn contains_language(&self, key: &str, version: &str) -> bool {
        self.languages.contains_key(&LanguageRef {
            key: key.to_string(),
            version: version.to_string(),
        })
    }

    pub fn classifier(&self, pointer: &MetaPointer) -> Result<&Arc<ClassifierInfo>> {
        self.classifiers
            .get(pointer)
            .ok_or_else(|| GraphError::UnknownClassifier(pointer.clone()))
    }

    pub fn feature(&self, classifier: &MetaPointer, feature: &MetaPointer) -> Result<&Feature> {
        self.classifier(classifier)?
            .feature(feature)
            .ok_or_else(|| GraphError::UnknownFeature {
                classifier: classifier.clone(),
                feature: feature.clone(),
            })
    }

    pub fn datatype(&self, pointer: &MetaPointer) -> Result<&Datatype> {
        self.datatypes
            .get(pointer)
            .ok_or_else(|| GraphError::UnknownDatatype(pointer.clone()))
    }

    /// Whether instances of `sub` may be stored where `sup` is expected.
    pub fn is_assignable(&self, sub: &MetaPointer, sup: &MetaPointer) -> bool {
        self.classifiers
            .get(sub)
            .map(|info| info.ancestors.contains(sup))
            .unwrap_or(false)
    }
}

/// Depth-first walk of the supertype graph. Diamond inheritance through
/// interfaces contributes each feature once.
fn collect(
    declared: &HashMap<&MetaPointer, &Classifier>,
    classifier: &Classifier,
    features: &mut Vec<Feature>,
    ancestors: &mut BTreeSet<MetaPointer>,
) -> Result<()> {
    if !ancestors.insert(classifier.pointer.clone()) {
        return Ok(());
    }
    for supertype in &classifier.supertypes {
        let parent = declared
            .get(supertype)
            .ok_or_else(|| GraphError::UnknownClassifier(supertype.clone()))?;
        collect(declared, parent, features, ancestors)?;
    }
    for feature in &classifier.features {
        if !features.iter().any(|f| f.pointer == feature.pointer) {
            features.push(feature.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::{LanguageBuilder, Multiplicity};

    fn shapes() -> Language {
        LanguageBuilder::new("shapes", "1")
            .abstract_concept("Shape", |c| {
                c.extends(builtins::inamed())
                    .property("color", builtins::string(), Multiplicity::Optional)
            })
            .concept("Circle", |c| {
                c.extends("Shape")
                    .property("radius", builtins::integer(), Multiplicity::Single)
            })
            .build()
    }

    #[test]
    fn test_inherited_features_are_resolved() {
        let mut registry = LanguageRegistry::new();
        registry.register(shapes()).unwrap();

        let circle = MetaPointer::new("shapes", "1", "Circle");
        let info = registry.classifier(&circle).unwrap();
        assert_eq!(info.features.len(), 3);
        assert_eq!(info.features[0].pointer, builtins::name());
        assert!(registry.feature(&circle, &builtins::name()).is_ok());
        assert!(registry.is_assignable(&circle, &builtins::inamed()));
        assert!(registry.is_assignable(&circle, &MetaPointer::new("shapes", "1", "Shape")));
    }

    #[test]
    fn test_unknown_feature_is_reported() {
        let mut registry = LanguageRegistry::new();
        registry.register(shapes()).unwrap();

        let circle = MetaPointer::new("shapes", "1", "Circle");
        let bogus = MetaPointer::new("shapes", "1", "bogus");
        assert!(matches!(
            registry.feature(&circle, &bogus),
            Err(GraphError::UnknownFeature { .. })
        ));
    }

    #[test]
    fn test_missing_dependency_is_rejected() {
        let mut registry = LanguageRegistry::new();
        let base = shapes();
        let derived = LanguageBuilder::new("fancy", "1").depends_on(&base).build();

        assert!(matches!(
            registry.register(derived),
            Err(GraphError::UnknownLanguage { .. })
        ));
        assert!(!registry.contains_language("fancy", "1"));
    }

    #[test]
    fn test_unresolved_supertype_leaves_registry_untouched() {
        let mut registry = LanguageRegistry::new();
        let broken = LanguageBuilder::new("broken", "1")
            .concept("A", |c| c.extends("Missing"))
            .build();

        assert!(registry.register(broken).is_err());
        assert!(!registry.contains_language("broken", "1"));
    }
}
