//! Entity identifiers and the allocator that hands them out.
//!
//! An [`Entity`] is a dense `raw_id` plus a `version` that is bumped every
//! time the slot is recycled, so a stale handle never compares equal to the
//! entity that now lives in its slot.

use std::fmt;
use std::num::Wrapping;

pub(crate) type RawId = u32;
pub(crate) type Version = Wrapping<u32>;

/// A handle to an entity inside one [`crate::world::World`].
///
/// `Entity` values are only meaningful relative to the store that produced
/// them; comparing entities from two different stores is well-defined but
/// never meaningfully "the same" object.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Entity {
    raw_id: RawId,
    version: Version,
}

impl Entity {
    pub(crate) fn new(raw_id: RawId, version: Version) -> Self { Entity { raw_id, version } }

    /// The dense slot index. Stable across relocations within a storage
    /// (storages relocate *components*, never the entity's own raw id).
    pub fn raw_id(self) -> u32 { self.raw_id }

    pub(crate) fn version(self) -> Version { self.version }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}#{}", self.raw_id, self.version.0) }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}#{}", self.raw_id, self.version.0) }
}

/// An [`Entity`] that may or may not be present; avoids the double option of
/// `Option<Option<Entity>>` at call sites that track "last known entity".
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct OptionalEntity {
    entity: Option<Entity>,
}

impl OptionalEntity {
    pub const NONE: OptionalEntity = OptionalEntity { entity: None };

    pub fn some(entity: Entity) -> Self { OptionalEntity { entity: Some(entity) } }

    pub fn is_valid(self) -> bool { self.entity.is_some() }

    pub fn get(self) -> Option<Entity> { self.entity }
}

impl From<Entity> for OptionalEntity {
    fn from(entity: Entity) -> Self { OptionalEntity::some(entity) }
}

/// Strategy used by [`EntityAllocator`] to produce `raw_id`s.
///
/// `Recycling` is the default: freed slots are handed back out with their
/// version incremented. `Incremental` never reuses a slot; `raw_id` is
/// strictly monotonic and `version` stays at zero. The incremental variant
/// trades memory (slots for dead entities are never reclaimed) for entities
/// whose `raw_id` alone is a stable, ever-increasing handle.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AllocatorKind {
    Recycling,
    Incremental,
}

/// Allocates and recycles [`Entity`] ids for a single [`crate::world::World`].
///
/// This is intentionally simple (a single growable slab plus a free list)
/// rather than the teacher's block-allocator-shared-across-worlds design:
/// spec entity stores are single-threaded, independently owned objects, so
/// there is no cross-store allocator to share.
#[derive(Debug)]
pub(crate) struct EntityAllocator {
    kind: AllocatorKind,
    versions: Vec<Version>,
    free: Vec<RawId>,
}

impl EntityAllocator {
    pub fn new(kind: AllocatorKind) -> Self {
        EntityAllocator {
            kind,
            versions: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn kind(&self) -> AllocatorKind { self.kind }

    pub fn allocate(&mut self) -> Entity {
        match self.kind {
            AllocatorKind::Recycling => {
                if let Some(raw_id) = self.free.pop() {
                    let version = self.versions[raw_id as usize];
                    return Entity::new(raw_id, version);
                }
                let raw_id = self.versions.len() as RawId;
                self.versions.push(Wrapping(1));
                Entity::new(raw_id, Wrapping(1))
            }
            AllocatorKind::Incremental => {
                let raw_id = self.versions.len() as RawId;
                self.versions.push(Wrapping(0));
                Entity::new(raw_id, Wrapping(0))
            }
        }
    }

    /// Registers a caller-supplied entity as live without generating a new
    /// id. Used by `World::add_existing_unsafe`. The caller is responsible
    /// for ensuring `entity` was not already live in this store.
    pub fn register_existing(&mut self, entity: Entity) {
        let idx = entity.raw_id as usize;
        if idx >= self.versions.len() {
            self.versions.resize(idx + 1, Wrapping(0));
        }
        self.versions[idx] = entity.version;
    }

    pub fn is_current(&self, entity: Entity) -> bool {
        self.versions
            .get(entity.raw_id as usize)
            .map_or(false, |v| *v == entity.version)
    }

    pub fn free(&mut self, entity: Entity) {
        let idx = entity.raw_id as usize;
        if let AllocatorKind::Recycling = self.kind {
            self.versions[idx] += Wrapping(1);
            self.free.push(entity.raw_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recycled_slot_gets_new_version() {
        let mut alloc = EntityAllocator::new(AllocatorKind::Recycling);
        let a = alloc.allocate();
        alloc.free(a);
        let b = alloc.allocate();
        assert_eq!(a.raw_id(), b.raw_id());
        assert_ne!(a, b);
        assert!(!alloc.is_current(a));
        assert!(alloc.is_current(b));
    }

    #[test]
    fn incremental_never_reuses_raw_id() {
        let mut alloc = EntityAllocator::new(AllocatorKind::Incremental);
        let a = alloc.allocate();
        alloc.free(a);
        let b = alloc.allocate();
        assert_ne!(a.raw_id(), b.raw_id());
        assert_eq!(b.version(), Wrapping(0));
    }

    #[test]
    fn register_existing_extends_slab() {
        let mut alloc = EntityAllocator::new(AllocatorKind::Recycling);
        let e = Entity::new(41, Wrapping(3));
        alloc.register_existing(e);
        assert!(alloc.is_current(e));
    }

    #[test]
    fn optional_entity_roundtrip() {
        let mut alloc = EntityAllocator::new(AllocatorKind::Recycling);
        let e = alloc.allocate();
        let opt = OptionalEntity::some(e);
        assert!(opt.is_valid());
        assert_eq!(opt.get(), Some(e));
        assert!(!OptionalEntity::NONE.is_valid());
    }
}
