//! # canopy-core
//!
//! The node graph of the Canopy replication store.
//!
//! This crate provides:
//! - MetaPointer-addressed languages and a classifier → feature registry
//! - Property values with version-specific wire conversion
//! - The `FeatureSlots` node storage interface (dynamic and fixed-slot)
//! - The `Forest`: id-indexed nodes with a tagged single-owner edge
//! - The `Change` union every mutation is reported as
//! - Flat serialized chunks and the forest serializer
//!
//! ## Ownership model
//!
//! ```text
//! Owner::None                               partition root, or a free node
//! Owner::Contained { parent, containment, index }
//! Owner::Annotated { parent, index }
//! ```
//!
//! Ownership edges always form a forest. Inserting an owned node anywhere
//! first detaches it from its previous owner; inserting a node below itself
//! fails with `GraphError::CircularContainment`.
//!
//! ## Example
//!
//! ```rust
//! use canopy_core::{builtins, Forest, LanguageBuilder, LanguageRegistry, Multiplicity, Value};
//! use std::sync::Arc;
//!
//! let shapes = LanguageBuilder::new("shapes", "1")
//!     .partition_concept("Geometry", |c| {
//!         c.containment("shapes", "Shape", Multiplicity::ZeroOrMore)
//!     })
//!     .concept("Shape", |c| c.property("name", builtins::string(), Multiplicity::Optional))
//!     .build();
//! let geometry = shapes.pointer("Geometry");
//! let shape = shapes.pointer("Shape");
//! let shapes_feature = shapes.pointer("shapes");
//!
//! let mut registry = LanguageRegistry::new();
//! registry.register(shapes).unwrap();
//!
//! let mut forest: Forest = Forest::new(Arc::new(registry));
//! forest.create_node("geo", &geometry).unwrap();
//! forest.add_partition(&"geo".into()).unwrap();
//! forest.create_node("line", &shape).unwrap();
//! forest
//!     .insert(&"geo".into(), &shapes_feature, 0, vec![Value::Node("line".into())])
//!     .unwrap();
//!
//! assert_eq!(forest.children(&"geo".into(), &shapes_feature).unwrap().len(), 1);
//! ```

pub mod change;
pub mod chunk;
pub mod error;
pub mod forest;
pub mod id;
pub mod language;
pub mod meta;
pub mod node;
pub mod registry;
pub mod serialize;
pub mod slots;
pub mod value;

pub use change::{Change, Edit, Item, Notification, Position, Slot, SlotKind, Topology};
pub use chunk::{
    SerializedChunk, SerializedContainment, SerializedNode, SerializedProperty,
    SerializedReference, UsedLanguage,
};
pub use error::{GraphError, Result};
pub use forest::Forest;
pub use id::NodeId;
pub use language::{
    builtins, Classifier, ClassifierBuilder, ClassifierKind, Datatype, DatatypeKind,
    EnumerationLiteral, Feature, FeatureKind, Field, Language, LanguageBuilder, LanguageRef,
    Multiplicity, PrimitiveKind, TypeRef,
};
pub use meta::MetaPointer;
pub use node::{Node, Owner};
pub use registry::{ClassifierInfo, LanguageRegistry};
pub use serialize::subtree_eq;
pub use slots::{DynamicSlots, FeatureSlots, FixedSlots};
pub use value::{FeatureValue, PropertyValue, ReferenceEntry, SerializationFormat, Value};
