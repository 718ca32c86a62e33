//! Dependency-graph driven async system scheduler. Builds on
//! `legion_core`'s `World`: a `System` reads/writes through the `&World` its
//! `update` is handed, and `AsyncSystemsManager` derives safe parallelism
//! from each system's declared component filter.

pub mod graph;
pub mod pool;
pub mod system;

pub mod prelude {
    pub use crate::graph::{DependencyGraph, NodeId, NodeState, Tracer};
    pub use crate::pool::{GroupId, ThreadPool};
    pub use crate::system::{AsyncSystemsManager, ComponentFilter, System, SystemId};
}
