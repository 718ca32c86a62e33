//! Contract-violation errors (spec §7, category 1).
//!
//! Missing-data and resource-exhaustion are deliberately *not* modeled
//! here — they surface as `Option`/empty results or a `panic!`
//! (allocation failure), per spec. This enum exists only for violations
//! that are worth surfacing as a typed `Result` rather than a debug-only
//! assertion: the ones detected at a well-defined construction boundary
//! rather than deep inside a hot loop.

use crate::registry::ComponentTypeId;
use thiserror::Error;

#[derive(Error, Debug, Eq, PartialEq)]
pub enum ContractError {
    /// `add_component` called for a type the entity already has. Only ever
    /// returned from `World::add_component_checked`; the primary
    /// `add_component`/`add_component_with` API instead documents this as a
    /// debug-assert — in release it overwrites the existing slot in place
    /// rather than risk a second, unreachable dense entry.
    #[error("entity already has component {0:?}")]
    DuplicateComponent(ComponentTypeId),

    /// Raised by `DependencyGraph::finalize` when the edges registered so
    /// far contain a cycle.
    #[error("system dependency graph contains a cycle")]
    CyclicDependency,

    /// Two systems registered with the same id.
    #[error("a system is already registered under this id")]
    DuplicateSystemId,
}
