//! Sparse-set entity store: entities, per-type component storage, the
//! component descriptor registry, and the combined view over several
//! stores. The async system scheduler built on top of this lives in the
//! sibling `legion-systems` crate.

pub mod command;
pub mod cons;
pub mod entity;
pub mod error;
pub mod registry;
pub mod stack;
pub mod storage;
pub mod view;
pub mod world;

pub mod prelude {
    pub use crate::cons::{ComponentTuple, OptionalComponentTuple};
    pub use crate::entity::{AllocatorKind, Entity, OptionalEntity};
    pub use crate::error::ContractError;
    pub use crate::registry::{Component, ComponentTypeId, Registry};
    pub use crate::stack::LockFreeStack;
    pub use crate::view::CombinedView;
    pub use crate::world::World;
}
