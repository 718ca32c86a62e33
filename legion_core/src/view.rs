//! Combined view across several entity stores (spec §4.E).
//!
//! A `CombinedView` owns no store; it borrows each `(World, extra)` pair for
//! as long as the view lives and iterates them in registration order,
//! handing the per-store `extra` value back to the caller's closure
//! alongside each matching component tuple. Typical `extra` uses: a
//! per-store transform offset, a source/replica tag, anything the caller
//! wants attached to "which store did this come from" without threading it
//! through the component set itself.

use crate::entity::Entity;
use crate::world::World;

pub struct CombinedView<'a, X = ()> {
    entries: Vec<(&'a World, X)>,
}

impl<'a, X> Default for CombinedView<'a, X> {
    fn default() -> Self { CombinedView { entries: Vec::new() } }
}

impl<'a, X> CombinedView<'a, X> {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, world: &'a World, extra: X) -> &mut Self {
        self.entries.push((world, extra));
        self
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn for_each_component_set<Tuple, F>(&'a self, mut f: F)
    where
        Tuple: crate::cons::ComponentTuple<'a>,
        F: FnMut(&'a X, Tuple::Refs),
    {
        for (world, extra) in &self.entries {
            crate::cons::for_each::<Tuple>(world, |_, refs| f(extra, refs));
        }
    }

    pub fn for_each_component_set_with_entity<Tuple, F>(&'a self, mut f: F)
    where
        Tuple: crate::cons::ComponentTuple<'a>,
        F: FnMut(&'a X, Entity, Tuple::Refs),
    {
        for (world, extra) in &self.entries {
            crate::cons::for_each::<Tuple>(world, |entity, refs| f(extra, entity, refs));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::AllocatorKind;
    use crate::registry::Registry;
    use std::sync::Arc;

    #[derive(Clone, Copy, Debug, PartialEq, Default)]
    struct Pos(f32);

    fn world() -> World { World::with_allocator_kind(Arc::new(Registry::new()), AllocatorKind::Recycling) }

    #[test]
    fn combined_view_iterates_every_store_in_order_with_its_extra() {
        let mut a = world();
        let ea = a.add_entity();
        a.add_component_with(ea, Pos(1.));
        let mut b = world();
        let eb = b.add_entity();
        b.add_component_with(eb, Pos(2.));

        let mut view = CombinedView::new();
        view.push(&a, "store-a");
        view.push(&b, "store-b");

        let mut seen = Vec::new();
        view.for_each_component_set::<(Pos,), _>(|tag, (p,)| seen.push((*tag, p.0)));

        assert_eq!(seen, vec![("store-a", 1.), ("store-b", 2.)]);
    }
}
