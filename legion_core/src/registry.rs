//! Component descriptors and the process-wide registry of them.
//!
//! The spec treats the component-type-id as a parameter of the whole type
//! family (any hashable/orderable key). In Rust the type itself already *is*
//! a stable, hashable, orderable key via [`std::any::TypeId`], so
//! `ComponentTypeId` is a thin newtype over it rather than a second,
//! user-supplied key space — see DESIGN.md for the Open Question this
//! resolves.

use std::any::{type_name, TypeId};
use std::fmt;

/// Marker trait for anything that can be attached to an entity.
///
/// Analogous to the teacher's `Component` bound in `storage.rs`: `'static`
/// so it can be named by `TypeId`, `Send + Sync` so entity stores can be
/// handed off between threads.
pub trait Component: 'static + Send + Sync {}
impl<T> Component for T where T: 'static + Send + Sync {}

/// Stable identifier for a registered component type.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(TypeId, &'static str);

impl ComponentTypeId {
    pub fn of<T: Component>() -> Self { ComponentTypeId(TypeId::of::<T>(), type_name::<T>()) }
}

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.1) }
}

/// Size/align/constructor/copy/destructor description of a component type,
/// as named by spec §4.B. In a systems language these would be raw function
/// pointers over an untyped buffer; here the "descriptor" is the
/// monomorphized set of closures that know how to build and clone an empty
/// or populated [`crate::storage::Storage<T>`], type-erased behind
/// `Box<dyn ComponentStore>` (see `storage.rs`).
pub struct ComponentDescriptor {
    type_id: ComponentTypeId,
    new_storage: fn() -> Box<dyn crate::storage::ComponentStore>,
}

impl ComponentDescriptor {
    pub fn of<T: Component + Clone>() -> Self {
        ComponentDescriptor {
            type_id: ComponentTypeId::of::<T>(),
            new_storage: crate::storage::Storage::<T>::new_boxed,
        }
    }

    pub fn type_id(&self) -> ComponentTypeId { self.type_id }

    pub(crate) fn construct_storage(&self) -> Box<dyn crate::storage::ComponentStore> { (self.new_storage)() }
}

impl fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ComponentDescriptor").field("type_id", &self.type_id).finish()
    }
}

/// Process-lifetime, read-mostly registry of component descriptors.
///
/// Built once before any [`crate::world::World`] is used and then shared by
/// reference (an `Arc`) between every store that needs it, per spec §5
/// ("Component descriptor registry: read-mostly ... no internal locking
/// required"). Registration itself does take a lock so two threads can
/// register distinct types concurrently without racing, but steady-state
/// lookups never block.
#[derive(Default)]
pub struct Registry {
    descriptors: parking_lot::RwLock<fxhash::FxHashMap<ComponentTypeId, ComponentDescriptor>>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }

    /// Idempotent: registering the same type twice is a no-op.
    pub fn register<T: Component + Clone>(&self) {
        let id = ComponentTypeId::of::<T>();
        let mut descriptors = self.descriptors.write();
        descriptors.entry(id).or_insert_with(ComponentDescriptor::of::<T>);
    }

    pub(crate) fn construct_storage(&self, id: ComponentTypeId) -> Box<dyn crate::storage::ComponentStore> {
        let descriptors = self.descriptors.read();
        descriptors
            .get(&id)
            .unwrap_or_else(|| panic!("component type {:?} was never registered", id))
            .construct_storage()
    }

    pub fn is_registered(&self, id: ComponentTypeId) -> bool { self.descriptors.read().contains_key(&id) }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Registry").field("len", &self.descriptors.read().len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Pos(f32, f32);

    #[test]
    fn register_is_idempotent() {
        let registry = Registry::new();
        registry.register::<Pos>();
        registry.register::<Pos>();
        assert!(registry.is_registered(ComponentTypeId::of::<Pos>()));
    }

    #[test]
    fn construct_storage_after_register() {
        let registry = Registry::new();
        registry.register::<Pos>();
        let storage = registry.construct_storage(ComponentTypeId::of::<Pos>());
        assert_eq!(storage.len(), 0);
    }

    #[test]
    #[should_panic]
    fn construct_storage_without_register_panics() {
        let registry = Registry::new();
        registry.construct_storage(ComponentTypeId::of::<Pos>());
    }

    #[test]
    fn concurrent_registration_is_race_free() {
        use std::sync::Arc;
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry.register::<Pos>();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(registry.is_registered(ComponentTypeId::of::<Pos>()));
    }
}
