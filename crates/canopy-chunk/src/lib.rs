//! # canopy-chunk
//!
//! Deserialization of flat node chunks into a [`canopy_core::Forest`].
//!
//! A chunk arriving from another replica, a file or a hand-written test may
//! be malformed: unknown classifiers, unparsable property strings, dangling
//! child ids, references to nodes that do not exist, or ownership edges that
//! form a cycle. Each anomaly is routed through a caller-supplied policy:
//!
//! - [`DeserializerHandler`]: skip, substitute or fail per node and value
//! - [`HealingHandler`]: which edge of a detected ownership cycle to sever
//!
//! Exactly one edge is severed per cycle, at the moment the cycle closes, so
//! the result is acyclic after a single pass.

pub mod deserializer;
pub mod error;
pub mod handler;
pub mod healing;

pub use deserializer::{Deserialized, Deserializer, DeserializerConfig};
pub use error::{DeserializationError, Result};
pub use handler::{
    DeserializerHandler, Issue, LenientHandler, OwnerConflict, Report, Resolution, StrictHandler,
};
pub use healing::{CycleResolution, DropConflictingEdge, HealingHandler, KeepNewEdge, RejectCycles};
