//! Ownership-cycle healing policies.
//!
//! While a chunk's ownership edges are installed, an edge `parent → child`
//! closes a cycle when `child` is already an ancestor of `parent`. The
//! [`HealingHandler`] decides which single edge of that cycle goes:
//!
//! ```text
//! child → x → … → parent      existing chain
//! parent → child              incoming edge
//!
//! DropEdge   the incoming edge is ignored
//! KeepEdge   child → x is severed, the incoming edge is installed
//! Reject     deserialization fails
//! ```
//!
//! A node containing itself loses that edge under `DropEdge` and `KeepEdge`
//! alike; `Reject` still fails.

use canopy_core::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleResolution {
    DropEdge,
    KeepEdge,
    Reject,
}

pub trait HealingHandler {
    fn resolve(&mut self, child: &NodeId, parent: &NodeId) -> CycleResolution;
}

impl<F> HealingHandler for F
where
    F: FnMut(&NodeId, &NodeId) -> CycleResolution,
{
    fn resolve(&mut self, child: &NodeId, parent: &NodeId) -> CycleResolution {
        self(child, parent)
    }
}

/// The edge that would close the cycle is dropped; the earlier chain stays.
#[derive(Clone, Copy, Debug, Default)]
pub struct DropConflictingEdge;

impl HealingHandler for DropConflictingEdge {
    fn resolve(&mut self, _child: &NodeId, _parent: &NodeId) -> CycleResolution {
        CycleResolution::DropEdge
    }
}

/// The later edge wins.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeepNewEdge;

impl HealingHandler for KeepNewEdge {
    fn resolve(&mut self, _child: &NodeId, _parent: &NodeId) -> CycleResolution {
        CycleResolution::KeepEdge
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RejectCycles;

impl HealingHandler for RejectCycles {
    fn resolve(&mut self, _child: &NodeId, _parent: &NodeId) -> CycleResolution {
        CycleResolution::Reject
    }
}
