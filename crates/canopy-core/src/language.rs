//! Language definitions: classifiers, features and datatypes.
//!
//! Languages are authored with [`LanguageBuilder`] and registered in a
//! [`LanguageRegistry`](crate::registry::LanguageRegistry), which resolves
//! inheritance once so feature access never scans candidate features.

use crate::meta::MetaPointer;
use serde::{Deserialize, Serialize};

/// Cardinality and optionality of a feature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Multiplicity {
    /// 0..1
    Optional,
    /// 1
    Single,
    /// 0..*
    ZeroOrMore,
    /// 1..*
    OneOrMore,
}

impl Multiplicity {
    pub fn is_multiple(self) -> bool {
        matches!(self, Multiplicity::ZeroOrMore | Multiplicity::OneOrMore)
    }

    pub fn is_required(self) -> bool {
        matches!(self, Multiplicity::Single | Multiplicity::OneOrMore)
    }
}

/// What a feature holds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    Property { datatype: MetaPointer },
    Containment { child_type: MetaPointer },
    Reference { target_type: MetaPointer },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub pointer: MetaPointer,
    pub name: String,
    pub kind: FeatureKind,
    pub multiplicity: Multiplicity,
}

impl Feature {
    pub fn is_property(&self) -> bool {
        matches!(self.kind, FeatureKind::Property { .. })
    }

    pub fn is_containment(&self) -> bool {
        matches!(self.kind, FeatureKind::Containment { .. })
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, FeatureKind::Reference { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassifierKind {
    Concept { partition: bool, is_abstract: bool },
    Annotation { annotates: Option<MetaPointer> },
    Interface,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classifier {
    pub pointer: MetaPointer,
    pub name: String,
    pub kind: ClassifierKind,
    /// Extended concept / annotation and implemented interfaces.
    pub supertypes: Vec<MetaPointer>,
    /// Features declared on this classifier (inherited ones excluded).
    pub features: Vec<Feature>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Boolean,
    Integer,
    String,
    Json,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumerationLiteral {
    pub key: String,
    pub name: String,
}

/// A field of a structured datatype.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub key: String,
    pub name: String,
    pub datatype: MetaPointer,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatatypeKind {
    Primitive(PrimitiveKind),
    Enumeration(Vec<EnumerationLiteral>),
    Structured(Vec<Field>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datatype {
    pub pointer: MetaPointer,
    pub name: String,
    pub kind: DatatypeKind,
}

/// (key, version) of a language.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LanguageRef {
    pub key: String,
    pub version: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    pub key: String,
    pub version: String,
    pub name: String,
    /// Languages this one refers to.
    pub dependencies: Vec<LanguageRef>,
    pub classifiers: Vec<Classifier>,
    pub datatypes: Vec<Datatype>,
}

impl Language {
    /// Pointer to an element of this language.
    pub fn pointer(&self, key: &str) -> MetaPointer {
        MetaPointer::new(&self.key, &self.version, key)
    }

    pub fn reference(&self) -> LanguageRef {
        LanguageRef {
            key: self.key.clone(),
            version: self.version.clone(),
        }
    }

    pub fn classifier(&self, key: &str) -> Option<&Classifier> {
        self.classifiers.iter().find(|c| c.pointer.key == key)
    }
}

/// A type named either by a key local to the language being built or by a
/// full pointer into another language.
#[derive(Clone, Debug)]
pub enum TypeRef {
    Local(String),
    Pointer(MetaPointer),
}

impl From<&str> for TypeRef {
    fn from(key: &str) -> Self {
        TypeRef::Local(key.to_string())
    }
}

impl From<MetaPointer> for TypeRef {
    fn from(pointer: MetaPointer) -> Self {
        TypeRef::Pointer(pointer)
    }
}

impl From<&MetaPointer> for TypeRef {
    fn from(pointer: &MetaPointer) -> Self {
        TypeRef::Pointer(pointer.clone())
    }
}

fn resolve(language: &LanguageRef, type_ref: TypeRef) -> MetaPointer {
    match type_ref {
        TypeRef::Local(key) => MetaPointer::new(&language.key, &language.version, key),
        TypeRef::Pointer(pointer) => pointer,
    }
}

/// Builder for classifier contents.
pub struct ClassifierBuilder {
    language: LanguageRef,
    classifier: Classifier,
}

impl ClassifierBuilder {
    fn new(language: &LanguageRef, key: &str, kind: ClassifierKind) -> Self {
        Self {
            language: language.clone(),
            classifier: Classifier {
                pointer: MetaPointer::new(&language.key, &language.version, key),
                name: key.to_string(),
                kind,
                supertypes: Vec::new(),
                features: Vec::new(),
            },
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.classifier.name = name.into();
        self
    }

    pub fn extends(mut self, supertype: impl Into<TypeRef>) -> Self {
        let pointer = resolve(&self.language, supertype.into());
        self.classifier.supertypes.push(pointer);
        self
    }

    pub fn property(
        self,
        key: &str,
        datatype: impl Into<TypeRef>,
        multiplicity: Multiplicity,
    ) -> Self {
        let datatype = resolve(&self.language, datatype.into());
        self.feature(key, FeatureKind::Property { datatype }, multiplicity)
    }

    pub fn containment(
        self,
        key: &str,
        child_type: impl Into<TypeRef>,
        multiplicity: Multiplicity,
    ) -> Self {
        let child_type = resolve(&self.language, child_type.into());
        self.feature(key, FeatureKind::Containment { child_type }, multiplicity)
    }

    pub fn reference(
        self,
        key: &str,
        target_type: impl Into<TypeRef>,
        multiplicity: Multiplicity,
    ) -> Self {
        let target_type = resolve(&self.language, target_type.into());
        self.feature(key, FeatureKind::Reference { target_type }, multiplicity)
    }

    fn feature(mut self, key: &str, kind: FeatureKind, multiplicity: Multiplicity) -> Self {
        self.classifier.features.push(Feature {
            pointer: MetaPointer::new(&self.language.key, &self.language.version, key),
            name: key.to_string(),
            kind,
            multiplicity,
        });
        self
    }

    pub fn build(self) -> Classifier {
        self.classifier
    }
}

/// Builder for languages.
///
/// # Example
///
/// ```rust
/// use canopy_core::{builtins, LanguageBuilder, Multiplicity};
///
/// let lang = LanguageBuilder::new("library", "1")
///     .partition_concept("Library", |c| c.containment("books", "Book", Multiplicity::ZeroOrMore))
///     .concept("Book", |c| {
///         c.property("title", builtins::string(), Multiplicity::Single)
///             .reference("author", "Writer", Multiplicity::Optional)
///     })
///     .concept("Writer", |c| c)
///     .build();
///
/// assert_eq!(lang.classifiers.len(), 3);
/// ```
pub struct LanguageBuilder {
    language: Language,
}

impl LanguageBuilder {
    pub fn new(key: impl Into<String>, version: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            language: Language {
                name: key.clone(),
                key,
                version: version.into(),
                dependencies: Vec::new(),
                classifiers: Vec::new(),
                datatypes: Vec::new(),
            },
        }
    }

    fn reference(&self) -> LanguageRef {
        self.language.reference()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.language.name = name.into();
        self
    }

    pub fn depends_on(mut self, other: &Language) -> Self {
        self.language.dependencies.push(other.reference());
        self
    }

    pub fn concept(
        self,
        key: &str,
        f: impl FnOnce(ClassifierBuilder) -> ClassifierBuilder,
    ) -> Self {
        let kind = ClassifierKind::Concept {
            partition: false,
            is_abstract: false,
        };
        self.classifier(key, kind, f)
    }

    pub fn partition_concept(
        self,
        key: &str,
        f: impl FnOnce(ClassifierBuilder) -> ClassifierBuilder,
    ) -> Self {
        let kind = ClassifierKind::Concept {
            partition: true,
            is_abstract: false,
        };
        self.classifier(key, kind, f)
    }

    pub fn abstract_concept(
        self,
        key: &str,
        f: impl FnOnce(ClassifierBuilder) -> ClassifierBuilder,
    ) -> Self {
        let kind = ClassifierKind::Concept {
            partition: false,
            is_abstract: true,
        };
        self.classifier(key, kind, f)
    }

    pub fn annotation(
        self,
        key: &str,
        annotates: impl Into<TypeRef>,
        f: impl FnOnce(ClassifierBuilder) -> ClassifierBuilder,
    ) -> Self {
        let annotates = resolve(&self.reference(), annotates.into());
        let kind = ClassifierKind::Annotation {
            annotates: Some(annotates),
        };
        self.classifier(key, kind, f)
    }

    pub fn interface(
        self,
        key: &str,
        f: impl FnOnce(ClassifierBuilder) -> ClassifierBuilder,
    ) -> Self {
        self.classifier(key, ClassifierKind::Interface, f)
    }

    fn classifier(
        mut self,
        key: &str,
        kind: ClassifierKind,
        f: impl FnOnce(ClassifierBuilder) -> ClassifierBuilder,
    ) -> Self {
        let builder = ClassifierBuilder::new(&self.reference(), key, kind);
        self.language.classifiers.push(f(builder).build());
        self
    }

    pub fn primitive(mut self, key: &str, kind: PrimitiveKind) -> Self {
        let pointer = self.language.pointer(key);
        self.language.datatypes.push(Datatype {
            pointer,
            name: key.to_string(),
            kind: DatatypeKind::Primitive(kind),
        });
        self
    }

    pub fn enumeration(mut self, key: &str, literals: &[&str]) -> Self {
        let pointer = self.language.pointer(key);
        let literals = literals
            .iter()
            .map(|literal| EnumerationLiteral {
                key: literal.to_string(),
                name: literal.to_string(),
            })
            .collect();
        self.language.datatypes.push(Datatype {
            pointer,
            name: key.to_string(),
            kind: DatatypeKind::Enumeration(literals),
        });
        self
    }

    pub fn structured(mut self, key: &str, fields: Vec<(&str, TypeRef)>) -> Self {
        let language = self.reference();
        let pointer = self.language.pointer(key);
        let fields = fields
            .into_iter()
            .map(|(field, datatype)| Field {
                key: field.to_string(),
                name: field.to_string(),
                datatype: resolve(&language, datatype),
            })
            .collect();
        self.language.datatypes.push(Datatype {
            pointer,
            name: key.to_string(),
            kind: DatatypeKind::Structured(fields),
        });
        self
    }

    pub fn build(self) -> Language {
        self.language
    }
}

/// The built-in language every registry starts with.
pub mod builtins {
    use super::*;

    pub const KEY: &str = "LionCore-builtins";
    pub const VERSION: &str = "2024.1";

    pub fn string() -> MetaPointer {
        MetaPointer::new(KEY, VERSION, "LionCore-builtins-String")
    }

    pub fn integer() -> MetaPointer {
        MetaPointer::new(KEY, VERSION, "LionCore-builtins-Integer")
    }

    pub fn boolean() -> MetaPointer {
        MetaPointer::new(KEY, VERSION, "LionCore-builtins-Boolean")
    }

    pub fn json() -> MetaPointer {
        MetaPointer::new(KEY, VERSION, "LionCore-builtins-JSON")
    }

    pub fn inamed() -> MetaPointer {
        MetaPointer::new(KEY, VERSION, "LionCore-builtins-INamed")
    }

    /// `INamed.name`
    pub fn name() -> MetaPointer {
        MetaPointer::new(KEY, VERSION, "LionCore-builtins-INamed-name")
    }

    pub fn language() -> Language {
        LanguageBuilder::new(KEY, VERSION)
            .name("LionCore_builtins")
            .primitive("LionCore-builtins-String", PrimitiveKind::String)
            .primitive("LionCore-builtins-Integer", PrimitiveKind::Integer)
            .primitive("LionCore-builtins-Boolean", PrimitiveKind::Boolean)
            .primitive("LionCore-builtins-JSON", PrimitiveKind::Json)
            .interface("LionCore-builtins-INamed", |c| {
                c.name("INamed")
                    .property("LionCore-builtins-INamed-name", string(), Multiplicity::Single)
            })
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_resolves_local_and_foreign_types() {
        let lang = LanguageBuilder::new("shapes", "1")
            .concept("Shape", |c| {
                c.extends(builtins::inamed())
                    .containment("parts", "Shape", Multiplicity::ZeroOrMore)
            })
            .build();

        let shape = lang.classifier("Shape").unwrap();
        assert_eq!(shape.supertypes, vec![builtins::inamed()]);
        assert_eq!(
            shape.features[0].kind,
            FeatureKind::Containment {
                child_type: MetaPointer::new("shapes", "1", "Shape")
            }
        );
    }

    #[test]
    fn test_multiplicity_flags() {
        assert!(Multiplicity::OneOrMore.is_multiple());
        assert!(Multiplicity::OneOrMore.is_required());
        assert!(!Multiplicity::Optional.is_required());
        assert!(!Multiplicity::Single.is_multiple());
    }
}
