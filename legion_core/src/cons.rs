//! Variadic component-type tuples.
//!
//! The teacher generates its `QuerySet` tuple impls with a `paste!`-driven
//! macro over an opaque `Cons` list (`cons.rs`, `impl_queryset_tuple!` in
//! `system.rs`). The entity store's `get_components<T...>` /
//! `for_each_component_set<T...>` family needs the same shape of "one impl
//! per tuple arity" but only over a fixed, small set of type parameters, so
//! a flat `macro_rules!` over literal idents does the job without pulling
//! in `paste`.
//!
//! `ComponentTuple` resolves the "driver" iteration algorithm from spec
//! §4.D: the smallest storage among the requested types is picked by
//! `World` and walked directly; every other type is then a sparse-set
//! membership lookup per element, via the type-erased [`ComponentStore`]
//! so no per-arity dispatch logic is needed here.

use crate::entity::Entity;
use crate::registry::{Component, ComponentTypeId};
use crate::storage::ComponentStore;
use crate::world::World;
use smallvec::SmallVec;

/// A tuple of component types `(T1, ..., Tn)`, all borrowed mutably.
///
/// Implemented for tuples of arity 1 through 8, matching the bound the
/// teacher's own `impl_queryset_tuple!` invocations stop at in practice for
/// hot-path query shapes (few systems touch more than a handful of
/// component types at once).
pub trait ComponentTuple<'a>: Sized {
    type Refs: 'a;

    /// Type ids of every member, in declaration order. `World` uses this to
    /// pick the smallest backing storage as the iteration driver.
    fn type_ids() -> SmallVec<[ComponentTypeId; 8]>;

    /// # Safety
    /// The caller must ensure no other live borrow (mutable or shared)
    /// exists into any of these component types for the duration of the
    /// returned references. `World` enforces this at its own call sites by
    /// never handing out two overlapping `ComponentTuple` fetches at once.
    unsafe fn fetch(world: &'a World, entity: Entity) -> Option<Self::Refs>;
}

macro_rules! impl_component_tuple {
    ( $( $t:ident ),+ ) => {
        impl<'a, $( $t: Component + Clone ),+> ComponentTuple<'a> for ( $( $t, )+ ) {
            type Refs = ( $( &'a mut $t, )+ );

            fn type_ids() -> SmallVec<[ComponentTypeId; 8]> {
                smallvec::smallvec![ $( ComponentTypeId::of::<$t>() ),+ ]
            }

            unsafe fn fetch(world: &'a World, entity: Entity) -> Option<Self::Refs> {
                Some(( $( world.storage_mut::<$t>()?.get_mut(entity)?, )+ ))
            }
        }
    };
}

impl_component_tuple!(A);
impl_component_tuple!(A, B);
impl_component_tuple!(A, B, C);
impl_component_tuple!(A, B, C, D);
impl_component_tuple!(A, B, C, D, E);
impl_component_tuple!(A, B, C, D, E, F);
impl_component_tuple!(A, B, C, D, E, F, G);
impl_component_tuple!(A, B, C, D, E, F, G, H);

/// A tuple of component types `(T1, ..., Tn)` fetched independently: unlike
/// [`ComponentTuple`], a missing member doesn't drop the whole tuple, it
/// just comes back as `None` in that slot. Backs `World::get_entity_components`.
pub trait OptionalComponentTuple<'a>: Sized {
    type Refs: 'a;

    /// # Safety
    /// Same contract as [`ComponentTuple::fetch`].
    unsafe fn fetch_optional(world: &'a World, entity: Entity) -> Self::Refs;
}

macro_rules! impl_optional_component_tuple {
    ( $( $t:ident ),+ ) => {
        impl<'a, $( $t: Component + Clone ),+> OptionalComponentTuple<'a> for ( $( $t, )+ ) {
            type Refs = ( $( Option<&'a mut $t>, )+ );

            unsafe fn fetch_optional(world: &'a World, entity: Entity) -> Self::Refs {
                ( $( world.storage_mut::<$t>().and_then(|s| s.get_mut(entity)), )+ )
            }
        }
    };
}

impl_optional_component_tuple!(A);
impl_optional_component_tuple!(A, B);
impl_optional_component_tuple!(A, B, C);
impl_optional_component_tuple!(A, B, C, D);
impl_optional_component_tuple!(A, B, C, D, E);
impl_optional_component_tuple!(A, B, C, D, E, F);
impl_optional_component_tuple!(A, B, C, D, E, F, G);
impl_optional_component_tuple!(A, B, C, D, E, F, G, H);

/// Runs `f(entity, refs)` for every live entity that has every member of
/// `Tuple`. Picks whichever of `Tuple::type_ids()` names the smallest
/// registered storage and walks its owners, probing the rest by sparse
/// lookup — the "driver" algorithm from spec §4.D.
pub fn for_each<'a, Tuple: ComponentTuple<'a>>(world: &'a World, mut f: impl FnMut(Entity, Tuple::Refs)) {
    let type_ids = Tuple::type_ids();
    let driver = type_ids
        .iter()
        .min_by_key(|id| world.storage_len_by_id(**id))
        .copied();
    let driver = match driver {
        Some(d) => d,
        None => return,
    };
    let owners: SmallVec<[Entity; 64]> = match world.storage_by_id(driver) {
        Some(store) => store.owners().to_vec().into(),
        None => return,
    };
    for entity in owners {
        if let Some(refs) = unsafe { Tuple::fetch(world, entity) } {
            f(entity, refs);
        }
    }
}
