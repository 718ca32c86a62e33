//! Per-type dense component storage (spec §4.C).
//!
//! Each registered component type `T` gets one `Storage<T>`: a packed
//! `dense: Vec<T>` of values, a parallel `owners: Vec<Entity>`, and a
//! `sparse` map from an entity's raw id to its index in `dense`. Removing a
//! component swap-removes the last element into the hole, so iteration order
//! is unspecified and may change after any structural mutation — exactly the
//! contract spec §4.C and §3 describe.
//!
//! The entity store only ever touches a type-erased `Box<dyn ComponentStore>`
//! (spec Design Notes §9: "a runtime `HashMap<type_id, Storage>`"); typed
//! access happens through `downcast_rs` at the public API boundary in
//! `world.rs`.

use crate::entity::Entity;
use downcast_rs::{impl_downcast, Downcast};
use fxhash::FxHashMap;

/// Type-erased handle to a single type's storage, held by [`crate::world::World`].
///
/// Every method here operates in terms of [`Entity`] only; the typed
/// `insert`/`get`/`iter` API lives on [`Storage<T>`] and is reached by
/// downcasting at the call site in `world.rs`.
pub trait ComponentStore: Downcast + Send + Sync {
    /// Number of live components in this storage. `O(1)`.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool { self.len() == 0 }

    fn contains(&self, raw_id: u32) -> bool;

    /// Swap-removes `entity`'s component, if present. Returns whether a
    /// component was actually removed.
    fn remove(&mut self, entity: Entity) -> bool;

    /// Every owning entity, in dense order (unspecified but stable until
    /// the next structural mutation).
    fn owners(&self) -> &[Entity];

    /// A fresh, empty storage of the same underlying type.
    fn new_empty_like(&self) -> Box<dyn ComponentStore>;

    /// Deep-copies `source_entity`'s component out of `other` and inserts it
    /// here under `dest_entity` (the same id, for `World::override_by`; a
    /// different one, for `World::transfer_entity_to`). Panics if the
    /// concrete types don't match or `other` doesn't have `source_entity`,
    /// both of which would be caller bugs.
    fn copy_one_from(&mut self, other: &dyn ComponentStore, source_entity: Entity, dest_entity: Entity);

    /// Type-erased borrow of `entity`'s component, for `World::get_all_entity_components`.
    fn get_any(&self, entity: Entity) -> Option<&dyn std::any::Any>;
}
impl_downcast!(ComponentStore);

/// Typed, packed storage for one component type.
pub struct Storage<T> {
    sparse: FxHashMap<u32, usize>,
    dense: Vec<T>,
    owners: Vec<Entity>,
}

impl<T> Default for Storage<T> {
    fn default() -> Self {
        Storage {
            sparse: FxHashMap::default(),
            dense: Vec::new(),
            owners: Vec::new(),
        }
    }
}

impl<T: crate::registry::Component + Clone> Storage<T> {
    pub(crate) fn new_boxed() -> Box<dyn ComponentStore> { Box::new(Self::default()) }
}

impl<T: crate::registry::Component> Storage<T> {
    pub fn new() -> Self { Self::default() }

    /// Appends `value` for `entity`. Calling this when `entity` already has
    /// a component here is a contract violation (spec §7): debug builds
    /// assert; release builds overwrite the existing slot in place rather
    /// than risk a second, unreachable dense entry, keeping the
    /// invariant `len(dense) == len(owners)` and every `sparse` index valid.
    pub fn insert(&mut self, entity: Entity, value: T) -> &mut T {
        debug_assert!(
            !self.sparse.contains_key(&entity.raw_id()),
            "entity {:?} already has this component",
            entity
        );
        if let Some(&index) = self.sparse.get(&entity.raw_id()) {
            self.dense[index] = value;
            return &mut self.dense[index];
        }
        let index = self.dense.len();
        self.sparse.insert(entity.raw_id(), index);
        self.dense.push(value);
        self.owners.push(entity);
        &mut self.dense[index]
    }

    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.sparse.get(&entity.raw_id()).map(|&i| &self.dense[i])
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        let dense = &mut self.dense;
        self.sparse.get(&entity.raw_id()).map(move |&i| &mut dense[i])
    }

    pub fn iter(&self) -> &[T] { &self.dense }

    pub fn iter_with_entities(&self) -> (&[Entity], &[T]) { (&self.owners, &self.dense) }

    /// Swap-remove restoring the three-way `(sparse, owners, dense)`
    /// invariant: the last element takes the removed slot, and `sparse` is
    /// updated for whichever owner was relocated.
    fn remove_typed(&mut self, entity: Entity) -> bool {
        let index = match self.sparse.remove(&entity.raw_id()) {
            Some(index) => index,
            None => return false,
        };
        let last = self.dense.len() - 1;
        self.dense.swap_remove(index);
        self.owners.swap_remove(index);
        if index != last {
            let moved_owner = self.owners[index];
            self.sparse.insert(moved_owner.raw_id(), index);
        }
        true
    }
}

impl<T: crate::registry::Component + Clone> ComponentStore for Storage<T> {
    fn len(&self) -> usize { self.dense.len() }

    fn contains(&self, raw_id: u32) -> bool { self.sparse.contains_key(&raw_id) }

    fn remove(&mut self, entity: Entity) -> bool { self.remove_typed(entity) }

    fn owners(&self) -> &[Entity] { &self.owners }

    fn new_empty_like(&self) -> Box<dyn ComponentStore> { Box::new(Storage::<T>::default()) }

    fn copy_one_from(&mut self, other: &dyn ComponentStore, source_entity: Entity, dest_entity: Entity) {
        let other = other
            .downcast_ref::<Storage<T>>()
            .expect("copy_one_from called with mismatched concrete storage types");
        let value = other
            .get(source_entity)
            .expect("copy_one_from: source entity missing component")
            .clone();
        self.insert(dest_entity, value);
    }

    fn get_any(&self, entity: Entity) -> Option<&dyn std::any::Any> {
        self.get(entity).map(|v| v as &dyn std::any::Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Pos(f32, f32);

    fn ent(id: u32) -> Entity { Entity::new(id, std::num::Wrapping(1)) }

    #[test]
    fn insert_and_get() {
        let mut storage = Storage::<Pos>::new();
        let e = ent(0);
        storage.insert(e, Pos(1., 2.));
        assert_eq!(storage.get(e), Some(&Pos(1., 2.)));
    }

    #[test]
    fn remove_last_element_is_simple_pop() {
        let mut storage = Storage::<Pos>::new();
        let e0 = ent(0);
        storage.insert(e0, Pos(1., 1.));
        assert!(ComponentStore::remove(&mut storage, e0));
        assert_eq!(storage.get(e0), None);
        assert_eq!(storage.len(), 0);
    }

    #[test]
    fn remove_non_last_swaps_correctly() {
        let mut storage = Storage::<Pos>::new();
        let e0 = ent(0);
        let e1 = ent(1);
        let e2 = ent(2);
        storage.insert(e0, Pos(0., 0.));
        storage.insert(e1, Pos(1., 1.));
        storage.insert(e2, Pos(2., 2.));

        assert!(ComponentStore::remove(&mut storage, e0));

        // e2 (the former last element) should now be findable wherever it landed.
        assert_eq!(storage.get(e1), Some(&Pos(1., 1.)));
        assert_eq!(storage.get(e2), Some(&Pos(2., 2.)));
        assert_eq!(storage.get(e0), None);
        assert_eq!(storage.len(), 2);

        let (owners, dense) = storage.iter_with_entities();
        for (owner, value) in owners.iter().zip(dense.iter()) {
            assert_eq!(storage.get(*owner), Some(value));
        }
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut storage = Storage::<Pos>::new();
        assert!(!ComponentStore::remove(&mut storage, ent(5)));
    }

    #[test]
    fn remove_only_entity_then_iterate_empty() {
        let mut storage = Storage::<Pos>::new();
        let e = ent(0);
        storage.insert(e, Pos(9., 9.));
        ComponentStore::remove(&mut storage, e);
        assert!(storage.iter().is_empty());
    }

    #[test]
    fn copy_one_from_deep_copies_value() {
        let mut src = Storage::<Pos>::new();
        let e = ent(0);
        src.insert(e, Pos(3., 4.));

        let mut dst = Storage::<Pos>::new();
        ComponentStore::copy_one_from(&mut dst, &src, e, e);
        assert_eq!(dst.get(e), Some(&Pos(3., 4.)));

        let e2 = ent(1);
        let mut dst2 = Storage::<Pos>::new();
        ComponentStore::copy_one_from(&mut dst2, &src, e, e2);
        assert_eq!(dst2.get(e2), Some(&Pos(3., 4.)));
        assert_eq!(dst2.get(e), None);
    }
}
