//! Sparse-set entity-component-system runtime with an asynchronous system
//! scheduler. The entity store, component storage, and combined view live
//! in `legion_core`; the dependency graph, thread pool, and scheduler live
//! in `legion_systems`. This crate just re-exports both under one prelude.

pub use legion_core::*;
pub use legion_systems::*;

pub mod prelude {
    pub use legion_core::prelude::*;
    pub use legion_systems::prelude::*;
}
