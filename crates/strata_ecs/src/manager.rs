use std::sync::atomic::{AtomicUsize, Ordering};

use strata_utils::hash::HashMap;

use crate::archetype::{Archetype, ArchetypeGraph, ArchetypeId, ArchetypeSnapshot, PackedLocation};
use crate::chunk::{ChunkPool, CHUNK_SIZE};
use crate::component::{ComponentId, Components};
use crate::entity::Entity;
use crate::error::EcsError;
use crate::mask::ComponentMask;

/// Tuning for [`ArchetypeManager::cleanup_empty_archetypes`].
///
/// Archetype *objects* are never destroyed in this crate's arena-of-indices design (an
/// `ArchetypeId` must stay valid for the process lifetime, since it is used as a dense `Vec`
/// index throughout) — cleanup instead releases the chunk memory of archetypes that have stayed
/// empty across `min_empty_duration` consecutive calls, which is the part of "archetype cleanup"
/// that actually reclaims resources. `min_archetypes_to_keep` is accepted for API parity with the
/// source design but has no effect under this scheme, since no archetype is ever removed from the
/// index.
#[derive(Clone, Copy, Debug)]
pub struct CleanupOptions {
    pub min_empty_duration: u32,
    pub min_archetypes_to_keep: usize,
    pub max_archetypes_to_remove: usize,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            min_empty_duration: 1,
            min_archetypes_to_keep: 1,
            max_archetypes_to_remove: usize::MAX,
        }
    }
}

/// Point-in-time snapshot of one archetype's size, returned by
/// [`ArchetypeManager::archetype_stats`].
#[derive(Clone, Copy, Debug)]
pub struct ArchetypeStats {
    pub id: ArchetypeId,
    pub mask: ComponentMask,
    pub entity_count: usize,
    pub chunk_count: usize,
    pub memory_bytes: usize,
}

#[derive(Clone, Copy)]
struct EntityLocation {
    archetype: ArchetypeId,
    packed: PackedLocation,
}

/// Orchestrates archetype storage: owns every [`Archetype`] ever created, the chunk pool they
/// draw from, the archetype graph cache, and the entity -> (archetype, slot) location map.
///
/// This is the layer `World` delegates to for every structural operation (spawn, despawn,
/// add/remove component, query). Archetypes, once created, are never removed — only emptied —
/// so an `ArchetypeId` is stable for the process lifetime.
pub struct ArchetypeManager {
    pool: ChunkPool,
    archetypes: Vec<Archetype>,
    by_mask: HashMap<ComponentMask, ArchetypeId>,
    graph: ArchetypeGraph,
    locations: Vec<Option<EntityLocation>>,
    /// Bumped whenever the archetype topology changes (a new archetype is materialized, or a
    /// snapshot is loaded). A query caching its matched-archetype list by this value can skip
    /// re-scanning when it hasn't moved.
    structural_change_counter: AtomicUsize,
}

impl ArchetypeManager {
    pub fn new(pool: ChunkPool) -> Self {
        let mut manager = Self {
            pool,
            archetypes: Vec::new(),
            by_mask: HashMap::default(),
            graph: ArchetypeGraph::new(),
            locations: Vec::new(),
            structural_change_counter: AtomicUsize::new(0),
        };
        manager.archetype_for_mask(ComponentMask::EMPTY, &Components::new());
        manager
    }

    pub fn structural_change_counter(&self) -> usize {
        self.structural_change_counter.load(Ordering::Relaxed)
    }

    fn location_slot(&mut self, id: u32) -> &mut Option<EntityLocation> {
        let idx = id as usize;
        if self.locations.len() <= idx {
            self.locations.resize(idx + 1, None);
        }
        &mut self.locations[idx]
    }

    fn location_of(&self, entity: Entity) -> Option<EntityLocation> {
        self.locations.get(entity.id() as usize).copied().flatten()
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.location_of(entity).is_some()
    }

    pub fn archetype(&self, id: ArchetypeId) -> &Archetype {
        &self.archetypes[id.index()]
    }

    pub fn archetypes(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    pub fn archetype_slice(&self) -> &[Archetype] {
        &self.archetypes
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    pub fn graph_edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn archetype_for_mask(&mut self, mask: ComponentMask, components: &Components) -> ArchetypeId {
        if let Some(&id) = self.by_mask.get(&mask) {
            return id;
        }
        let id = ArchetypeId(self.archetypes.len() as u32);
        tracing::info!(archetype = id.0, ?mask, "materialized new archetype");
        self.archetypes.push(Archetype::new(id, mask, components));
        self.by_mask.insert(mask, id);
        self.structural_change_counter.fetch_add(1, Ordering::Relaxed);
        id
    }

    pub fn archetype_memory_usage(&self) -> usize {
        self.archetypes.iter().map(Archetype::memory_usage).sum()
    }

    pub fn archetype_stats(&self) -> Vec<ArchetypeStats> {
        self.archetypes
            .iter()
            .map(|a| ArchetypeStats {
                id: a.id(),
                mask: a.mask(),
                entity_count: a.len(),
                chunk_count: a.chunk_count(),
                memory_bytes: a.chunk_count() * CHUNK_SIZE,
            })
            .collect()
    }

    /// Releases chunk storage (not the archetype object itself — see [`CleanupOptions`]) for
    /// archetypes that have been observed empty for `options.min_empty_duration` consecutive
    /// calls, longest-empty first, capped at `options.max_archetypes_to_remove` per call. Never
    /// touches the root (empty-mask) archetype. Returns the number of archetypes whose chunks
    /// were released.
    pub fn cleanup_empty_archetypes(&mut self, options: CleanupOptions) -> usize {
        let mut candidates = Vec::new();
        for (idx, archetype) in self.archetypes.iter_mut().enumerate().skip(1) {
            archetype.note_cleanup_pass();
            if archetype.empty_streak() >= options.min_empty_duration && archetype.chunk_count() > 0 {
                candidates.push(idx);
            }
        }
        candidates.sort_by_key(|&idx| std::cmp::Reverse(self.archetypes[idx].empty_streak()));
        candidates.truncate(options.max_archetypes_to_remove);

        for &idx in &candidates {
            self.archetypes[idx].release_empty_chunks(&mut self.pool);
            self.archetypes[idx].reset_empty_streak();
        }
        if !candidates.is_empty() {
            tracing::debug!(released = candidates.len(), "cleanup_empty_archetypes released chunk storage");
        }
        candidates.len()
    }

    /// Redistributes entities out of each archetype's least-filled chunk into its other chunks,
    /// releasing chunks drained to zero. Repairs the entity-location map for every entity moved.
    pub fn coalesce_chunks(&mut self) {
        for idx in 0..self.archetypes.len() {
            let repairs = self.archetypes[idx].coalesce_chunks(&mut self.pool);
            for (entity, packed) in repairs {
                if let Some(slot) = self.locations.get_mut(entity.id() as usize).and_then(|s| s.as_mut()) {
                    slot.packed = packed;
                }
            }
        }
    }

    /// Reconstructs an archetype from a previously-written [`ArchetypeSnapshot`] and registers
    /// every entity it contains in the location map. Does not touch the [`crate::entity::EntityPool`] —
    /// restoring which ids/versions are valid is the host's responsibility, since that bookkeeping
    /// lives outside the archetype-level serialization boundary this method covers.
    pub fn load_snapshot(
        &mut self,
        snapshot: &ArchetypeSnapshot,
        components: &Components,
    ) -> Result<ArchetypeId, EcsError> {
        let mask = Archetype::resolve_snapshot_mask(snapshot, components)?;
        if let Some(&existing) = self.by_mask.get(&mask) {
            return Ok(existing);
        }

        let id = ArchetypeId(self.archetypes.len() as u32);
        let archetype = Archetype::read_snapshot(id, snapshot, &mut self.pool, components)?;

        for chunk_idx in 0..archetype.chunk_count() {
            for (slot, &entity) in archetype.chunk_entities(chunk_idx).iter().enumerate() {
                let packed = archetype.pack_location(chunk_idx, slot as u32);
                *self.location_slot(entity.id()) = Some(EntityLocation { archetype: id, packed });
            }
        }

        self.by_mask.insert(mask, id);
        self.archetypes.push(archetype);
        self.structural_change_counter.fetch_add(1, Ordering::Relaxed);
        tracing::info!(archetype = id.0, ?mask, "loaded archetype from snapshot");
        Ok(id)
    }

    /// Places a freshly-allocated `entity` into the empty archetype, default-constructing
    /// nothing (it carries no components yet).
    pub fn spawn_empty(&mut self, entity: Entity) -> Result<(), EcsError> {
        let empty = self.by_mask[&ComponentMask::EMPTY];
        let packed = self.archetypes[empty.index()].add_entity(&mut self.pool, entity)?;
        *self.location_slot(entity.id()) = Some(EntityLocation {
            archetype: empty,
            packed,
        });
        Ok(())
    }

    /// Removes `entity` from storage entirely, dropping its current components.
    pub fn despawn(&mut self, entity: Entity) -> Result<(), EcsError> {
        let loc = self
            .location_of(entity)
            .ok_or(EcsError::InvalidEntity(entity))?;
        let archetype = &mut self.archetypes[loc.archetype.index()];
        if let Some(moved) = archetype.remove_entity(loc.packed) {
            if let Some(slot) = self.locations.get_mut(moved.id() as usize).and_then(|s| s.as_mut()) {
                slot.packed = loc.packed;
            }
        }
        *self.location_slot(entity.id()) = None;
        Ok(())
    }

    pub fn get_component<T>(&self, entity: Entity, id: ComponentId) -> Option<&T> {
        let loc = self.location_of(entity)?;
        self.archetypes[loc.archetype.index()].get_component(loc.packed, id)
    }

    pub fn get_component_mut<T>(&mut self, entity: Entity, id: ComponentId) -> Option<&mut T> {
        let loc = self.location_of(entity)?;
        self.archetypes[loc.archetype.index()].get_component_mut(loc.packed, id)
    }

    pub fn has_component(&self, entity: Entity, id: ComponentId) -> bool {
        self.location_of(entity)
            .is_some_and(|loc| self.archetypes[loc.archetype.index()].has_component(id))
    }

    pub fn archetype_mask_of(&self, entity: Entity) -> Option<ComponentMask> {
        self.location_of(entity)
            .map(|loc| self.archetypes[loc.archetype.index()].mask())
    }

    /// Moves `entity` from its current archetype into `dst_mask`, transferring every component
    /// shared by both masks and default-constructing the rest of `dst_mask`'s components.
    /// `skip_default_construct`, when set, names a dst-only component the caller will initialize
    /// itself right after this call returns (used by `add_component` for the newly-added
    /// component, so it is constructed exactly once via the caller-supplied value instead of
    /// being default-constructed and immediately overwritten). `take_removed`, when set, names a
    /// src-only component the archetype is about to drop as part of this move (used by
    /// `remove_component`); instead of dropping it, `take_removed`'s callback is invoked with the
    /// live component's bytes — *after* the destination archetype has already accepted the entity,
    /// so a failed move (destination pool exhaustion) never extracts a value it can't place
    /// anywhere, leaving the source slot fully intact and still owned by `entity`.
    fn move_to_mask(
        &mut self,
        entity: Entity,
        dst_mask: ComponentMask,
        components: &Components,
        skip_default_construct: Option<ComponentId>,
        mut take_removed: Option<(ComponentId, &mut dyn FnMut(*const u8))>,
    ) -> Result<PackedLocation, EcsError> {
        let src_loc = self
            .location_of(entity)
            .ok_or(EcsError::InvalidEntity(entity))?;
        let dst_archetype_id = self.archetype_for_mask(dst_mask, components);

        if dst_archetype_id == src_loc.archetype {
            return Ok(src_loc.packed);
        }

        // Borrow the source and destination archetypes independently: Rust's aliasing rules
        // don't let us hold `&mut` to two elements of the same `Vec` at once, so split explicitly.
        let src_idx = src_loc.archetype.index();
        let dst_idx = dst_archetype_id.index();
        let (src_archetype, dst_archetype): (&mut Archetype, &mut Archetype) = if src_idx < dst_idx {
            let (a, b) = self.archetypes.split_at_mut(dst_idx);
            (&mut a[src_idx], &mut b[0])
        } else {
            let (a, b) = self.archetypes.split_at_mut(src_idx);
            (&mut b[0], &mut a[dst_idx])
        };

        let dst_packed = dst_archetype.add_entity_no_construct(&mut self.pool, entity)?;

        for dst_id in dst_archetype.component_ids().collect::<Vec<_>>() {
            if !src_archetype.has_component(dst_id) && Some(dst_id) != skip_default_construct {
                dst_archetype.default_construct_component(dst_packed, dst_id);
            }
        }

        let moved_tail = src_archetype.take_entity(src_loc.packed, |comp_id, ptr| {
            if dst_archetype.has_component(comp_id) {
                let dst_ptr = dst_archetype.raw_component_ptr(dst_packed, comp_id);
                let size = components.descriptor(comp_id).layout.size();
                // SAFETY: `dst_ptr` is a freshly reserved, uninitialized slot of the same
                // component type and size as `ptr`'s source; the two chunks are distinct
                // allocations so the ranges cannot overlap.
                unsafe { std::ptr::copy_nonoverlapping(ptr.as_ptr(), dst_ptr, size) };
                true
            } else if let Some((take_id, callback)) = take_removed.as_mut() {
                if comp_id == *take_id {
                    callback(ptr.as_ptr());
                    true
                } else {
                    false
                }
            } else {
                false
            }
        });

        if let Some(moved_entity) = moved_tail {
            if let Some(slot) = self.locations.get_mut(moved_entity.id() as usize).and_then(|s| s.as_mut()) {
                slot.packed = src_loc.packed;
            }
        }

        *self.location_slot(entity.id()) = Some(EntityLocation {
            archetype: dst_archetype_id,
            packed: dst_packed,
        });

        Ok(dst_packed)
    }

    /// Adds component `id` (type `T`) to `entity`, moving it to the archetype `current mask | id`
    /// and writing `value` into the new slot. Errors if `entity` already has that component.
    pub fn add_component<T>(
        &mut self,
        entity: Entity,
        id: ComponentId,
        value: T,
        components: &Components,
    ) -> Result<(), EcsError> {
        let current_mask = self
            .archetype_mask_of(entity)
            .ok_or(EcsError::InvalidEntity(entity))?;
        if current_mask.test(id) {
            return Err(EcsError::DuplicateComponent(entity));
        }

        let src_archetype = self.location_of(entity).unwrap().archetype;
        let dst_mask = if let Some(cached) = self.graph.get_add_edge(src_archetype, id) {
            self.archetypes[cached.index()].mask()
        } else {
            current_mask.with(id)
        };

        let packed = self.move_to_mask(entity, dst_mask, components, Some(id), None)?;
        let dst_archetype = self.location_of(entity).unwrap().archetype;
        self.graph.set_add_edge(src_archetype, id, dst_archetype);
        self.graph.set_remove_edge(dst_archetype, id, src_archetype);

        self.archetypes[dst_archetype.index()].write_component(packed, id, value);
        Ok(())
    }

    /// Removes component `id` (type `T`) from `entity`, moving it to the archetype
    /// `current mask & !id` and returning the removed value. Errors if `entity` does not have
    /// that component.
    pub fn remove_component<T>(
        &mut self,
        entity: Entity,
        id: ComponentId,
        components: &Components,
    ) -> Result<T, EcsError> {
        let current_mask = self
            .archetype_mask_of(entity)
            .ok_or(EcsError::InvalidEntity(entity))?;
        if !current_mask.test(id) {
            return Err(EcsError::MissingComponent(entity));
        }

        let src_archetype = self.location_of(entity).unwrap().archetype;
        let dst_mask = if let Some(cached) = self.graph.get_remove_edge(src_archetype, id) {
            self.archetypes[cached.index()].mask()
        } else {
            current_mask.without(id)
        };

        // `removed` is populated by `move_to_mask`'s visit closure only once the destination
        // archetype has already accepted the entity — if the move fails before that point (e.g.
        // destination pool exhaustion), this closure never runs, the source slot is never read,
        // and `entity` is left exactly as it was, satisfying the side-effect-free-on-error
        // contract even for a component whose removal would otherwise have to destruct it first.
        let mut removed: std::mem::MaybeUninit<T> = std::mem::MaybeUninit::uninit();
        let mut take = |src: *const u8| {
            // SAFETY: `src` points at `entity`'s live, initialized `T` slot, handed to us by
            // `take_entity` in place of dropping it; `removed` is written to exactly once.
            unsafe { src.cast::<T>().copy_to_nonoverlapping(removed.as_mut_ptr(), 1) };
        };
        self.move_to_mask(entity, dst_mask, components, None, Some((id, &mut take)))?;
        // SAFETY: `take` ran exactly once during the call above, since `id` is present in
        // `src_archetype`'s mask and absent from `dst_mask` by construction.
        let value = unsafe { removed.assume_init() };

        let dst_archetype = self.location_of(entity).unwrap().archetype;
        self.graph.set_remove_edge(src_archetype, id, dst_archetype);
        self.graph.set_add_edge(dst_archetype, id, src_archetype);
        Ok(value)
    }

    /// Releases every chunk left empty by prior removals across every archetype.
    pub fn release_empty_chunks(&mut self) {
        for archetype in &mut self.archetypes {
            archetype.release_empty_chunks(&mut self.pool);
        }
    }

    pub fn chunk_pool_stats(&self) -> crate::chunk::ChunkPoolStats {
        self.pool.stats()
    }
}

impl Drop for ArchetypeManager {
    fn drop(&mut self) {
        for archetype in &mut self.archetypes {
            archetype.drop_all_entities(&mut self.pool);
        }
    }
}
