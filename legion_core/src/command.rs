//! Scheduled-actions queue (spec §4.D "Scheduled actions").
//!
//! Grounded on the teacher's own command-buffer idea of staging mutations
//! so they can be issued from inside an iteration (`for_each`) without
//! invalidating the iteration itself. Unlike the teacher's `CommandBuffer`
//! (which replays arbitrary closures against a `World`), this queue only
//! ever stages two shapes of op — add and remove — each carrying the
//! minimum it needs to replay in FIFO order.
//!
//! Staged component values live in a small per-type `Storage<T>` arena
//! (`staging`) so that the `&mut T` handed back from `schedule_add` stays
//! valid until `execute` drains it, exactly the "stable arena" the spec's
//! Design Notes call for.

use crate::entity::Entity;
use crate::registry::{Component, ComponentTypeId};
use crate::storage::Storage;
use crate::world::World;
use fxhash::FxHashMap;

enum Op {
    Add(Entity, ComponentTypeId),
    Remove(Entity, ComponentTypeId),
}

#[derive(Default)]
pub struct CommandQueue {
    ops: Vec<Op>,
    staging: FxHashMap<ComponentTypeId, Box<dyn crate::storage::ComponentStore>>,
}

impl CommandQueue {
    pub fn new() -> Self { Self::default() }

    pub fn is_empty(&self) -> bool { self.ops.is_empty() }

    /// Stages `value` for `entity` and returns a handle into the staging
    /// arena. The value is not visible to the world until `execute` runs.
    pub fn schedule_add<T: Component + Clone>(&mut self, entity: Entity, value: T) -> &mut T {
        let type_id = ComponentTypeId::of::<T>();
        self.ops.push(Op::Add(entity, type_id));
        let store = self.staging.entry(type_id).or_insert_with(Storage::<T>::new_boxed);
        let storage = store
            .downcast_mut::<Storage<T>>()
            .expect("staging storage type mismatch");
        storage.insert(entity, value)
    }

    pub fn schedule_remove<T: Component>(&mut self, entity: Entity) {
        self.ops.push(Op::Remove(entity, ComponentTypeId::of::<T>()));
    }

    /// Applies every staged op, in FIFO submission order, against `world`.
    pub fn execute(&mut self, world: &mut World) {
        for op in self.ops.drain(..) {
            match op {
                Op::Add(entity, type_id) => {
                    if let Some(staged) = self.staging.get(&type_id) {
                        world.adopt_staged_component(type_id, staged.as_ref(), entity);
                    }
                }
                Op::Remove(entity, type_id) => {
                    world.remove_component_by_id(entity, type_id);
                }
            }
        }
        self.staging.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use std::sync::Arc;

    #[derive(Clone, Debug, PartialEq, Default)]
    struct Transform(f32, f32);

    #[derive(Clone, Debug, PartialEq, Default)]
    struct Movement {
        mv: (f32, f32),
    }

    #[test]
    fn scheduled_add_and_remove_apply_in_fifo_order() {
        let registry = Arc::new(Registry::new());
        let mut world = World::new(registry);
        let e = world.add_entity();
        world.add_component::<Transform>(e);

        let mut queue = CommandQueue::new();
        queue.schedule_remove::<Transform>(e);
        queue.schedule_add(e, Movement { mv: (2., 3.) });
        queue.execute(&mut world);

        assert!(!world.does_entity_have_component::<Transform>(e));
        assert_eq!(world.get_component::<Movement>(e), Some(&Movement { mv: (2., 3.) }));
    }
}
