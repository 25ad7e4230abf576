mod graph;
mod snapshot;

pub use graph::ArchetypeGraph;
pub use snapshot::{ArchetypeSnapshot, ChunkSnapshot};

use std::ptr::{self, NonNull};

use strata_ptr::{OwningPtr, Ptr, PtrMut};

use crate::chunk::{ChunkPool, CHUNK_SIZE};
use crate::component::{ComponentDescriptor, ComponentId, Components};
use crate::entity::Entity;
use crate::error::EcsError;
use crate::mask::ComponentMask;

/// Dense, arena-style identifier for an [`Archetype`] owned by an
/// [`crate::manager::ArchetypeManager`]. Stable for the lifetime of the archetype (archetypes are
/// never removed once created, only emptied).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// `(chunk_index << shift) | entity_index_within_chunk`. The shift/mask pair is cached on the
/// owning [`Archetype`] since entities-per-chunk is always a power of two.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PackedLocation(u32);

impl PackedLocation {
    pub const INVALID: Self = Self(u32::MAX);

    pub fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }

    fn decode(self, shift: u32, mask: u32) -> (usize, u32) {
        ((self.0 >> shift) as usize, self.0 & mask)
    }
}

struct ArchetypeComponent {
    id: ComponentId,
    offset: usize,
    size: usize,
    default_construct: unsafe fn(PtrMut),
    drop_in_place: Option<unsafe fn(OwningPtr)>,
}

struct ChunkHandle {
    ptr: NonNull<u8>,
    count: u32,
}

/// Chunk-based, struct-of-arrays storage for every entity sharing one exact set of component
/// types. Each chunk is a single fixed-size buffer obtained from a [`ChunkPool`]; within it, a
/// dense `Entity` array is followed by one densely-packed array per component, each aligned to
/// that component's natural alignment.
///
/// There is no in-chunk header: chunk bookkeeping (`count`, the owning pointer) lives in the
/// [`ChunkHandle`] kept alongside the archetype, so the full `CHUNK_SIZE` budget is available to
/// the entity and component arrays.
pub struct Archetype {
    id: ArchetypeId,
    mask: ComponentMask,
    components: Vec<ArchetypeComponent>,
    entities_per_chunk: u32,
    chunk_shift: u32,
    chunk_mask: u32,
    chunks: Vec<ChunkHandle>,
    first_non_full: usize,
    /// Consecutive [`crate::manager::ArchetypeManager::cleanup_empty_archetypes`] passes this
    /// archetype has been observed fully empty. Reset to 0 the moment it gains an entity.
    empty_streak: u32,
}

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

fn fits(n: u32, descriptors: &[&ComponentDescriptor]) -> Option<Vec<usize>> {
    let mut offset = n as usize * std::mem::size_of::<u32>();
    let mut offsets = Vec::with_capacity(descriptors.len());
    for desc in descriptors {
        offset = align_up(offset, desc.layout.align());
        offsets.push(offset);
        offset += n as usize * desc.layout.size();
    }
    if offset <= CHUNK_SIZE {
        Some(offsets)
    } else {
        None
    }
}

/// Finds the largest power-of-two entity count whose entity array plus every component array
/// fits inside `CHUNK_SIZE`, along with the resulting per-component offsets.
fn compute_layout(descriptors: &[&ComponentDescriptor]) -> (u32, Vec<usize>) {
    let mut n: u32 = 1;
    let mut offsets = fits(n, descriptors).unwrap_or_default();
    while let Some(next_offsets) = fits(n * 2, descriptors) {
        n *= 2;
        offsets = next_offsets;
        if n >= (1 << 24) {
            break;
        }
    }
    if offsets.is_empty() && !descriptors.is_empty() {
        // Pathological: even a single entity's worth of components doesn't fit in one chunk.
        // This is a configuration error, not a runtime condition the spec expects to be hit.
        debug_assert!(
            false,
            "component set is too large to fit any entities in a single chunk"
        );
        offsets = descriptors.iter().map(|d| d.layout.size()).collect();
    }
    (n, offsets)
}

impl Archetype {
    pub(crate) fn new(id: ArchetypeId, mask: ComponentMask, components: &Components) -> Self {
        let mut descriptors: Vec<&ComponentDescriptor> =
            mask.iter().map(|cid| components.descriptor(cid)).collect();
        descriptors.sort_by_key(|d| d.id);

        let (entities_per_chunk, offsets) = compute_layout(&descriptors);

        let archetype_components = descriptors
            .iter()
            .zip(offsets.iter())
            .map(|(desc, &offset)| ArchetypeComponent {
                id: desc.id,
                offset,
                size: desc.layout.size(),
                default_construct: desc.default_construct,
                drop_in_place: desc.drop_in_place,
            })
            .collect();

        Self {
            id,
            mask,
            components: archetype_components,
            entities_per_chunk,
            chunk_shift: entities_per_chunk.trailing_zeros(),
            chunk_mask: entities_per_chunk - 1,
            chunks: Vec::new(),
            first_non_full: 0,
            empty_streak: 0,
        }
    }

    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Monotonic creation-order tag: archetypes are never recycled, so an `ArchetypeId`'s own
    /// index already serves as the "generation" the source design tracks as a separate counter.
    pub fn generation(&self) -> u64 {
        self.id.0 as u64
    }

    pub fn memory_usage(&self) -> usize {
        self.chunks.len() * CHUNK_SIZE
    }

    pub fn mask(&self) -> ComponentMask {
        self.mask
    }

    pub fn has_component(&self, id: ComponentId) -> bool {
        self.mask.test(id)
    }

    pub fn component_ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.components.iter().map(|c| c.id)
    }

    pub fn len(&self) -> usize {
        self.chunks.iter().map(|c| c.count as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn component_pos(&self, id: ComponentId) -> Option<usize> {
        self.components.binary_search_by_key(&id, |c| c.id).ok()
    }

    fn raw_ptr(&self, chunk_idx: usize, entity_idx: u32, comp: &ArchetypeComponent) -> NonNull<u8> {
        let base = self.chunks[chunk_idx].ptr;
        let offset = comp.offset + entity_idx as usize * comp.size;
        // SAFETY: `offset` was computed by `compute_layout` to stay within `CHUNK_SIZE`.
        unsafe { NonNull::new_unchecked(base.as_ptr().add(offset)) }
    }

    fn entity_ptr(&self, chunk_idx: usize, entity_idx: u32) -> NonNull<u32> {
        let base = self.chunks[chunk_idx].ptr;
        let offset = entity_idx as usize * std::mem::size_of::<u32>();
        // SAFETY: entity slots occupy the first `entities_per_chunk * 4` bytes of the chunk.
        unsafe { NonNull::new_unchecked(base.as_ptr().add(offset)).cast() }
    }

    fn entity_at(&self, chunk_idx: usize, entity_idx: u32) -> Entity {
        // SAFETY: every occupied slot (`entity_idx < chunks[chunk_idx].count`) holds a valid bit
        // pattern written by `write_entity`.
        Entity::from_bits(unsafe { self.entity_ptr(chunk_idx, entity_idx).as_ptr().read() })
    }

    fn write_entity(&mut self, chunk_idx: usize, entity_idx: u32, entity: Entity) {
        // SAFETY: within bounds of the entity array for this chunk.
        unsafe {
            self.entity_ptr(chunk_idx, entity_idx)
                .as_ptr()
                .write(entity.to_bits())
        };
    }

    /// Slice of the entities packed into `chunk_idx`, in slot order.
    pub fn chunk_entities(&self, chunk_idx: usize) -> &[Entity] {
        let count = self.chunks[chunk_idx].count as usize;
        let ptr = self.entity_ptr(chunk_idx, 0).as_ptr().cast::<Entity>();
        // SAFETY: `count` slots are initialized, `Entity` is `#[repr(transparent)]` over `u32`.
        unsafe { std::slice::from_raw_parts(ptr, count) }
    }

    pub(crate) fn component_slice<T>(&self, chunk_idx: usize, id: ComponentId) -> Option<&[T]> {
        let pos = self.component_pos(id)?;
        let comp = &self.components[pos];
        let count = self.chunks[chunk_idx].count as usize;
        let ptr = self.raw_ptr(chunk_idx, 0, comp).as_ptr().cast::<T>();
        // SAFETY: caller-provided `T` matches the descriptor this `ComponentId` was registered
        // with, guaranteed by the registry-mediated construction of every query/view.
        Some(unsafe { std::slice::from_raw_parts(ptr, count) })
    }

    pub(crate) fn component_slice_mut<T>(&mut self, chunk_idx: usize, id: ComponentId) -> Option<&mut [T]> {
        let pos = self.component_pos(id)?;
        let comp = &self.components[pos];
        let count = self.chunks[chunk_idx].count as usize;
        let ptr = self.raw_ptr(chunk_idx, 0, comp).as_ptr().cast::<T>();
        // SAFETY: see `component_slice`; exclusive borrow of `self` upholds uniqueness.
        Some(unsafe { std::slice::from_raw_parts_mut(ptr, count) })
    }

    fn find_free_chunk(&mut self) -> Option<usize> {
        self.chunks[self.first_non_full..]
            .iter()
            .position(|c| c.count < self.entities_per_chunk)
            .map(|rel| rel + self.first_non_full)
    }

    pub(crate) fn pack_location(&self, chunk_idx: usize, entity_idx: u32) -> PackedLocation {
        PackedLocation(((chunk_idx as u32) << self.chunk_shift) | entity_idx)
    }

    fn alloc_slot(&mut self, pool: &mut ChunkPool) -> Result<(usize, u32), EcsError> {
        if let Some(idx) = self.find_free_chunk() {
            let slot = self.chunks[idx].count;
            return Ok((idx, slot));
        }
        let ptr = pool.acquire()?;
        self.chunks.push(ChunkHandle { ptr, count: 0 });
        let idx = self.chunks.len() - 1;
        Ok((idx, 0))
    }

    fn default_construct_slot(&mut self, chunk_idx: usize, entity_idx: u32) {
        for comp in &self.components {
            let raw = self.raw_ptr(chunk_idx, entity_idx, comp);
            // SAFETY: slot is freshly allocated, uninitialized, and sized for this component.
            unsafe { (comp.default_construct)(PtrMut::new(raw)) };
        }
    }

    /// Allocates a slot, default-constructs every component, and records `entity` there.
    pub fn add_entity(&mut self, pool: &mut ChunkPool, entity: Entity) -> Result<PackedLocation, EcsError> {
        let (chunk_idx, entity_idx) = self.alloc_slot(pool)?;
        self.write_entity(chunk_idx, entity_idx, entity);
        self.default_construct_slot(chunk_idx, entity_idx);
        self.chunks[chunk_idx].count += 1;
        if self.chunks[chunk_idx].count == self.entities_per_chunk && chunk_idx == self.first_non_full {
            self.first_non_full += 1;
        }
        self.empty_streak = 0;
        Ok(self.pack_location(chunk_idx, entity_idx))
    }

    /// Like [`Archetype::add_entity`] but leaves every component slot uninitialized — callers
    /// (archetype transitions) are responsible for constructing or moving a value into each slot
    /// before the entity is observable.
    pub(crate) fn add_entity_no_construct(
        &mut self,
        pool: &mut ChunkPool,
        entity: Entity,
    ) -> Result<PackedLocation, EcsError> {
        let (chunk_idx, entity_idx) = self.alloc_slot(pool)?;
        self.write_entity(chunk_idx, entity_idx, entity);
        self.chunks[chunk_idx].count += 1;
        if self.chunks[chunk_idx].count == self.entities_per_chunk && chunk_idx == self.first_non_full {
            self.first_non_full += 1;
        }
        self.empty_streak = 0;
        Ok(self.pack_location(chunk_idx, entity_idx))
    }

    pub(crate) fn default_construct_component(&mut self, loc: PackedLocation, id: ComponentId) {
        let (ci, ei) = loc.decode(self.chunk_shift, self.chunk_mask);
        let Some(pos) = self.component_pos(id) else {
            return;
        };
        let comp_ptr = self.raw_ptr(ci, ei, &self.components[pos]);
        // SAFETY: slot is reserved for this component and currently uninitialized.
        unsafe { (self.components[pos].default_construct)(PtrMut::new(comp_ptr)) };
    }

    pub(crate) fn write_component<T>(&mut self, loc: PackedLocation, id: ComponentId, value: T) {
        let (ci, ei) = loc.decode(self.chunk_shift, self.chunk_mask);
        let Some(pos) = self.component_pos(id) else {
            return;
        };
        let ptr = self.raw_ptr(ci, ei, &self.components[pos]);
        // SAFETY: `T` is the type this `ComponentId` was registered under; slot is reserved and
        // currently uninitialized (no-construct path) or the caller is replacing a live value
        // through `set_component`, which drops the old value first.
        unsafe { ptr.as_ptr().cast::<T>().write(value) };
    }

    pub fn get_component<T>(&self, loc: PackedLocation, id: ComponentId) -> Option<&T> {
        let (ci, ei) = loc.decode(self.chunk_shift, self.chunk_mask);
        let pos = self.component_pos(id)?;
        let ptr = self.raw_ptr(ci, ei, &self.components[pos]);
        // SAFETY: see `write_component`.
        Some(unsafe { &*ptr.as_ptr().cast::<T>() })
    }

    pub fn get_component_mut<T>(&mut self, loc: PackedLocation, id: ComponentId) -> Option<&mut T> {
        let (ci, ei) = loc.decode(self.chunk_shift, self.chunk_mask);
        let pos = self.component_pos(id)?;
        let ptr = self.raw_ptr(ci, ei, &self.components[pos]);
        // SAFETY: see `write_component`; exclusive borrow of `self` upholds uniqueness.
        Some(unsafe { &mut *ptr.as_ptr().cast::<T>() })
    }

    pub(crate) fn set_component<T>(&mut self, loc: PackedLocation, id: ComponentId, value: T) {
        if let Some(slot) = self.get_component_mut::<T>(loc, id) {
            *slot = value;
        }
    }

    /// Raw pointer to the slot reserved for component `id` at `loc`. Used by
    /// `ArchetypeManager::move_to_mask` to byte-copy a component's value across archetypes
    /// without going through a typed accessor on either side.
    pub(crate) fn raw_component_ptr(&self, loc: PackedLocation, id: ComponentId) -> *mut u8 {
        let (ci, ei) = loc.decode(self.chunk_shift, self.chunk_mask);
        let pos = self
            .component_pos(id)
            .expect("raw_component_ptr called for a component this archetype does not have");
        self.raw_ptr(ci, ei, &self.components[pos]).as_ptr()
    }

    fn component_ptr(&self, chunk_idx: usize, entity_idx: u32, comp: &ArchetypeComponent) -> Ptr<'_> {
        // SAFETY: slot is live (caller only calls this on occupied indices within count).
        unsafe { Ptr::new(self.raw_ptr(chunk_idx, entity_idx, comp)) }
    }

    fn component_ptr_mut(
        &self,
        chunk_idx: usize,
        entity_idx: u32,
        comp: &ArchetypeComponent,
    ) -> PtrMut<'_> {
        // SAFETY: same as `component_ptr`; exclusivity is the caller's responsibility.
        unsafe { PtrMut::new(self.raw_ptr(chunk_idx, entity_idx, comp)) }
    }

    fn owning_ptr(&self, chunk_idx: usize, entity_idx: u32, comp: &ArchetypeComponent) -> OwningPtr<'_> {
        // SAFETY: caller guarantees the slot is live and will never be read again afterwards.
        unsafe { OwningPtr::new(self.raw_ptr(chunk_idx, entity_idx, comp)) }
    }

    /// Removes the entity at `loc` via swap-with-last-slot, calling `visit` once per live
    /// component beforehand.
    ///
    /// `visit` returns `true` to take ownership of a component's current bytes (the caller has
    /// copied them out, typically into a destination archetype's slot) — in that case this
    /// archetype will not run that component's destructor. Returning `false` drops it normally.
    ///
    /// Returns the entity that was moved into `loc` to keep storage dense, if any.
    pub(crate) fn take_entity(
        &mut self,
        loc: PackedLocation,
        mut visit: impl FnMut(ComponentId, Ptr<'_>) -> bool,
    ) -> Option<Entity> {
        let (ci, ei) = loc.decode(self.chunk_shift, self.chunk_mask);

        for i in 0..self.components.len() {
            let comp_ptr = self.component_ptr(ci, ei, &self.components[i]);
            let taken = visit(self.components[i].id, comp_ptr);
            if !taken {
                if let Some(drop_fn) = self.components[i].drop_in_place {
                    let owning = self.owning_ptr(ci, ei, &self.components[i]);
                    // SAFETY: slot `(ci, ei)` is live and is about to be overwritten or vacated.
                    unsafe { drop_fn(owning) };
                }
            }
        }

        let last = self.chunks[ci].count - 1;
        let moved = if ei != last {
            for i in 0..self.components.len() {
                let src = self.raw_ptr(ci, last, &self.components[i]);
                let dst = self.raw_ptr(ci, ei, &self.components[i]);
                let size = self.components[i].size;
                // SAFETY: both pointers are within the same chunk's component array, disjoint
                // slots, `size` bytes each.
                unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), size) };
            }
            let moved_entity = self.entity_at(ci, last);
            self.write_entity(ci, ei, moved_entity);
            Some(moved_entity)
        } else {
            None
        };

        if ei != last {
            for i in 0..self.components.len() {
                if let Some(drop_fn) = self.components[i].drop_in_place {
                    let owning = self.owning_ptr(ci, last, &self.components[i]);
                    // SAFETY: `last`'s bytes were just duplicated into `ei`; this drops the
                    // now-stale duplicate left behind at the vacated tail slot.
                    unsafe { drop_fn(owning) };
                }
            }
        }

        self.chunks[ci].count -= 1;
        if ci < self.first_non_full {
            self.first_non_full = ci;
        }
        moved
    }

    /// Removes the entity at `loc`, dropping every component. Returns the entity moved into
    /// `loc` to keep storage dense, if any.
    pub fn remove_entity(&mut self, loc: PackedLocation) -> Option<Entity> {
        self.take_entity(loc, |_, _| false)
    }

    /// Bulk-add a span of freshly-created entities, pre-reserving the chunk capacity the whole
    /// span needs before constructing any of them so the batch never interleaves a mid-loop
    /// `pool.acquire()` with default-construction. A size-0 span is a no-op.
    pub fn add_entities(
        &mut self,
        pool: &mut ChunkPool,
        entities: &[Entity],
    ) -> Result<Vec<PackedLocation>, EcsError> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let free_in_existing: u64 = self.chunks[self.first_non_full..]
            .iter()
            .map(|c| (self.entities_per_chunk - c.count) as u64)
            .sum();
        let needed = entities.len() as u64;
        if needed > free_in_existing {
            let mut short = needed - free_in_existing;
            while short > 0 {
                let ptr = pool.acquire()?;
                self.chunks.push(ChunkHandle { ptr, count: 0 });
                short = short.saturating_sub(self.entities_per_chunk as u64);
            }
        }
        entities.iter().map(|&e| self.add_entity(pool, e)).collect()
    }

    /// Bulk-remove a span of locations in one pass. Within each chunk, locations are processed
    /// highest-slot-first so every swap-removal's "moved" slot is one not itself due for removal
    /// later in the same batch — the same ordering `coalesce_chunks` relies on for its own
    /// redistribution loop. Returns `(moved_entity, new_location)` repairs for the caller's
    /// entity-location map. Unless `defer_cleanup` is set, chunks left fully empty by the batch
    /// are released immediately; a caller removing from several archetypes in a row can set it
    /// and release once at the end instead of per archetype. A size-0 span is a no-op.
    pub fn remove_entities(
        &mut self,
        pool: &mut ChunkPool,
        locations: &[PackedLocation],
        defer_cleanup: bool,
    ) -> Vec<(Entity, PackedLocation)> {
        if locations.is_empty() {
            return Vec::new();
        }
        let mut sorted = locations.to_vec();
        sorted.sort_by_key(|loc| std::cmp::Reverse(loc.decode(self.chunk_shift, self.chunk_mask)));

        let mut repairs = Vec::with_capacity(sorted.len());
        for loc in sorted {
            if let Some(moved) = self.remove_entity(loc) {
                repairs.push((moved, loc));
            }
        }
        if !defer_cleanup {
            self.release_empty_chunks(pool);
        }
        repairs
    }

    /// Bulk-moves entities already present in `src` into `self`, the batched counterpart of
    /// looping `ArchetypeManager::move_to_mask` once per entity for a shared mask transition.
    /// Every component `self` and `src` both have is byte-copied across; components only `self`
    /// has are default-constructed; components only `src` has are dropped. `src_locations` is
    /// consumed highest-chunk-slot-first per `src` chunk, mirroring `remove_entities`, so `src`'s
    /// own swap-removals stay consistent within the batch.
    ///
    /// Returns the new `self`-side location for each input entity (same order as `entities`),
    /// plus `(moved_entity, new_location)` repairs for entities left behind in `src` by its
    /// swap-removals — the caller still owns the entity-location map and must apply both. A
    /// size-0 span is a no-op.
    pub fn batch_move_entities_from(
        &mut self,
        pool: &mut ChunkPool,
        src: &mut Archetype,
        entities: &[Entity],
        src_locations: &[PackedLocation],
    ) -> Result<(Vec<PackedLocation>, Vec<(Entity, PackedLocation)>), EcsError> {
        debug_assert_eq!(entities.len(), src_locations.len());
        if entities.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let mut order: Vec<usize> = (0..entities.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(src_locations[i].decode(src.chunk_shift, src.chunk_mask)));

        let mut dst_locations = vec![PackedLocation::INVALID; entities.len()];
        let mut src_repairs = Vec::new();
        let dst_ids: Vec<ComponentId> = self.component_ids().collect();

        for i in order {
            let entity = entities[i];
            let src_loc = src_locations[i];
            let dst_loc = self.add_entity_no_construct(pool, entity)?;

            for &dst_id in &dst_ids {
                if !src.has_component(dst_id) {
                    self.default_construct_component(dst_loc, dst_id);
                }
            }

            let moved_tail = src.take_entity(src_loc, |comp_id, ptr| {
                if let Some(pos) = self.component_pos(comp_id) {
                    let dst_ptr = self.raw_component_ptr(dst_loc, comp_id);
                    let size = self.components[pos].size;
                    // SAFETY: `dst_ptr` is a freshly reserved, uninitialized slot of the same
                    // component type and size as `ptr`'s source; `self` and `src` are distinct
                    // archetypes backed by distinct chunk allocations.
                    unsafe { ptr::copy_nonoverlapping(ptr.as_ptr(), dst_ptr, size) };
                    true
                } else {
                    false
                }
            });
            if let Some(moved_entity) = moved_tail {
                src_repairs.push((moved_entity, src_loc));
            }
            dst_locations[i] = dst_loc;
        }

        Ok((dst_locations, src_repairs))
    }

    /// Vectorized assignment: writes a clone of `value` into every given location's slot for
    /// component `id`, resolving the component's offset once instead of per-call as
    /// `set_component` does. Locations for a component `self` doesn't carry are silently
    /// skipped, matching `set_component`'s existing no-op behavior for that case.
    pub fn batch_set_component<T: Clone>(&mut self, locations: &[PackedLocation], id: ComponentId, value: T) {
        let Some(pos) = self.component_pos(id) else {
            return;
        };
        for &loc in locations {
            let (ci, ei) = loc.decode(self.chunk_shift, self.chunk_mask);
            let ptr = self.raw_ptr(ci, ei, &self.components[pos]);
            // SAFETY: `T` is the type this `ComponentId` was registered under; slot is live.
            unsafe { *ptr.as_ptr().cast::<T>() = value.clone() };
        }
    }

    /// Drops every live component in every chunk and releases the chunks back to `pool`. Used
    /// only when tearing down the whole storage (see `ArchetypeManager`'s `Drop` impl) — normal
    /// entity removal goes through [`Archetype::take_entity`].
    pub(crate) fn drop_all_entities(&mut self, pool: &mut ChunkPool) {
        for chunk_idx in 0..self.chunks.len() {
            let count = self.chunks[chunk_idx].count;
            for entity_idx in 0..count {
                for i in 0..self.components.len() {
                    if let Some(drop_fn) = self.components[i].drop_in_place {
                        let owning = self.owning_ptr(chunk_idx, entity_idx, &self.components[i]);
                        // SAFETY: slot is live and this is the only place it will ever be dropped.
                        unsafe { drop_fn(owning) };
                    }
                }
            }
        }
        for chunk in self.chunks.drain(..) {
            pool.release(chunk.ptr);
        }
        self.first_non_full = 0;
    }

    /// Releases every chunk that is now fully empty back to `pool`, compacting the chunk list.
    pub fn release_empty_chunks(&mut self, pool: &mut ChunkPool) {
        let mut i = 0;
        while i < self.chunks.len() {
            if self.chunks[i].count == 0 {
                pool.release(self.chunks[i].ptr);
                self.chunks.remove(i);
            } else {
                i += 1;
            }
        }
        self.first_non_full = self.chunks.iter().position(|c| c.count < self.entities_per_chunk).unwrap_or(self.chunks.len());
    }

    pub(crate) fn empty_streak(&self) -> u32 {
        self.empty_streak
    }

    pub(crate) fn note_cleanup_pass(&mut self) {
        if self.is_empty() {
            self.empty_streak += 1;
        } else {
            self.empty_streak = 0;
        }
    }

    pub(crate) fn reset_empty_streak(&mut self) {
        self.empty_streak = 0;
    }

    /// Picks the least-filled chunk (if at least two chunks exist and any holds entities) and
    /// redistributes its entities into other chunks with spare capacity, releasing it once
    /// drained. Entities that find no room elsewhere are left in place. Returns `(entity,
    /// new_location)` repairs for the caller's entity-location map.
    ///
    /// A lone remaining chunk with no entities is released outright — trivially "coalesced"
    /// since there is nothing left to redistribute.
    pub(crate) fn coalesce_chunks(&mut self, pool: &mut ChunkPool) -> Vec<(Entity, PackedLocation)> {
        if self.chunks.len() == 1 && self.chunks[0].count == 0 {
            pool.release(self.chunks[0].ptr);
            self.chunks.clear();
            self.first_non_full = 0;
            return Vec::new();
        }
        if self.chunks.len() < 2 {
            return Vec::new();
        }
        let Some(victim) = self
            .chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.count > 0)
            .min_by_key(|(_, c)| c.count)
            .map(|(i, _)| i)
        else {
            return Vec::new();
        };

        let mut repairs = Vec::new();
        while self.chunks[victim].count > 0 {
            let last = self.chunks[victim].count - 1;
            let Some(dst_chunk) = (0..self.chunks.len())
                .find(|&i| i != victim && self.chunks[i].count < self.entities_per_chunk)
            else {
                break;
            };

            let entity = self.entity_at(victim, last);
            let dst_idx = self.chunks[dst_chunk].count;
            for i in 0..self.components.len() {
                let src = self.raw_ptr(victim, last, &self.components[i]);
                let dst = self.raw_ptr(dst_chunk, dst_idx, &self.components[i]);
                let size = self.components[i].size;
                // SAFETY: `victim` and `dst_chunk` are distinct chunk allocations; `dst_idx` is a
                // reserved, previously-unoccupied slot in `dst_chunk`.
                unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), size) };
            }
            self.write_entity(dst_chunk, dst_idx, entity);
            self.chunks[dst_chunk].count += 1;
            self.chunks[victim].count -= 1;
            repairs.push((entity, self.pack_location(dst_chunk, dst_idx)));
        }

        if self.chunks[victim].count == 0 {
            pool.release(self.chunks[victim].ptr);
            self.chunks.remove(victim);
        }
        self.first_non_full = self
            .chunks
            .iter()
            .position(|c| c.count < self.entities_per_chunk)
            .unwrap_or(self.chunks.len());
        repairs
    }

    /// Captures this archetype's live data as a byte-level [`ArchetypeSnapshot`]. See the type's
    /// docs for the serialization contract this realizes.
    pub fn write_snapshot(&self, components: &Components) -> ArchetypeSnapshot {
        let descriptors = self
            .components
            .iter()
            .map(|c| {
                let d = components.descriptor(c.id);
                (d.hash, d.version)
            })
            .collect();

        let chunks = (0..self.chunks.len())
            .map(|ci| {
                let count = self.chunks[ci].count;
                let entities = self.chunk_entities(ci).iter().map(|e| e.to_bits()).collect();
                let components = self
                    .components
                    .iter()
                    .map(|comp| {
                        let base = self.raw_ptr(ci, 0, comp);
                        let len = count as usize * comp.size;
                        // SAFETY: slots `[0, count)` of this component's array are initialized;
                        // `len` bytes starting at `base` stay within the chunk.
                        unsafe { std::slice::from_raw_parts(base.as_ptr(), len).to_vec() }
                    })
                    .collect();
                ChunkSnapshot { count, entities, components }
            })
            .collect();

        ArchetypeSnapshot {
            descriptors,
            entities_per_chunk: self.entities_per_chunk,
            chunks,
        }
    }

    /// Resolves a snapshot's `(hash, version)` descriptor list against `components`, returning the
    /// mask it describes. Errors if a hash is unknown or a version predates the descriptor's
    /// `min_supported_version`.
    pub(crate) fn resolve_snapshot_mask(
        snapshot: &ArchetypeSnapshot,
        components: &Components,
    ) -> Result<ComponentMask, EcsError> {
        let mut mask = ComponentMask::EMPTY;
        for &(hash, version) in &snapshot.descriptors {
            let cid = components
                .id_by_hash(hash)
                .ok_or(EcsError::UnknownComponentHash(hash))?;
            let descriptor = components.descriptor(cid);
            if version < descriptor.min_supported_version {
                return Err(EcsError::UnsupportedComponentVersion {
                    found: version,
                    min: descriptor.min_supported_version,
                });
            }
            mask.set(cid);
        }
        Ok(mask)
    }

    /// Rebuilds an archetype from a previously-written [`ArchetypeSnapshot`], acquiring fresh
    /// chunks from `pool` and byte-copying each chunk's component arrays back in. Entities-per-chunk
    /// is recomputed from the resolved component set rather than trusted from the snapshot, since
    /// it is a pure function of layout and must match what this binary would compute fresh.
    pub(crate) fn read_snapshot(
        id: ArchetypeId,
        snapshot: &ArchetypeSnapshot,
        pool: &mut ChunkPool,
        components: &Components,
    ) -> Result<Self, EcsError> {
        let mask = Self::resolve_snapshot_mask(snapshot, components)?;
        let mut archetype = Self::new(id, mask, components);

        for chunk_snapshot in &snapshot.chunks {
            let chunk_ptr = pool.acquire()?;
            let chunk_idx = archetype.chunks.len();
            archetype.chunks.push(ChunkHandle { ptr: chunk_ptr, count: 0 });

            for (slot, &bits) in chunk_snapshot.entities.iter().enumerate() {
                archetype.write_entity(chunk_idx, slot as u32, Entity::from_bits(bits));
            }
            for (pos, comp) in archetype.components.iter().enumerate() {
                let bytes = &chunk_snapshot.components[pos];
                let base = archetype.raw_ptr(chunk_idx, 0, comp);
                // SAFETY: `bytes.len()` is `chunk_snapshot.count as usize * comp.size` by
                // construction of `write_snapshot`; `base` starts this chunk's freshly acquired,
                // zeroed component array, large enough by the same layout computation.
                unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), base.as_ptr(), bytes.len()) };
            }
            archetype.chunks[chunk_idx].count = chunk_snapshot.count;
        }
        archetype.first_non_full = archetype
            .chunks
            .iter()
            .position(|c| c.count < archetype.entities_per_chunk)
            .unwrap_or(archetype.chunks.len());

        Ok(archetype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkPoolConfig;
    use crate::entity::EntityPool;

    #[derive(Default, Clone, Copy, PartialEq, Debug)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Default, Clone, Copy, PartialEq, Debug)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }

    fn make_entities(pool: &mut EntityPool, n: u32) -> Vec<Entity> {
        (0..n).map(|_| pool.create().unwrap()).collect()
    }

    #[test]
    fn add_entities_is_noop_on_empty_span() {
        let components = Components::new();
        let mut pool = ChunkPool::new(ChunkPoolConfig::default());
        let mut archetype = Archetype::new(ArchetypeId(0), ComponentMask::EMPTY, &components);
        assert_eq!(archetype.add_entities(&mut pool, &[]).unwrap(), Vec::new());
        assert_eq!(archetype.chunk_count(), 0);
    }

    #[test]
    fn add_entities_preallocates_and_constructs_every_slot() {
        let mut components = Components::new();
        let pos_id = components.register::<Position>().unwrap();
        let mask = ComponentMask::EMPTY.with(pos_id);
        let mut pool = ChunkPool::new(ChunkPoolConfig::default());
        let mut archetype = Archetype::new(ArchetypeId(0), mask, &components);
        let mut entity_pool = EntityPool::default();
        let entities = make_entities(&mut entity_pool, 50);

        let locations = archetype.add_entities(&mut pool, &entities).unwrap();
        assert_eq!(locations.len(), 50);
        assert_eq!(archetype.len(), 50);
        for &loc in &locations {
            assert_eq!(archetype.get_component::<Position>(loc, pos_id), Some(&Position::default()));
        }
    }

    #[test]
    fn remove_entities_repairs_swapped_slots_and_releases_empty_chunks() {
        let mut components = Components::new();
        let pos_id = components.register::<Position>().unwrap();
        let mask = ComponentMask::EMPTY.with(pos_id);
        let mut pool = ChunkPool::new(ChunkPoolConfig::default());
        let mut archetype = Archetype::new(ArchetypeId(0), mask, &components);
        let mut entity_pool = EntityPool::default();
        let entities = make_entities(&mut entity_pool, 5);
        let locations = archetype.add_entities(&mut pool, &entities).unwrap();

        // Remove the first three; the last two slots get swapped down to fill the gaps.
        let removed: Vec<PackedLocation> = locations[0..3].to_vec();
        let repairs = archetype.remove_entities(&mut pool, &removed, false);
        assert_eq!(archetype.len(), 2);
        for (moved_entity, new_loc) in &repairs {
            assert!(entities[3..].contains(moved_entity));
            assert!(new_loc.is_valid());
        }
        assert_eq!(archetype.chunk_count(), 1, "slots still in use, chunk must stay allocated");

        let remaining: Vec<PackedLocation> = (0..archetype.len() as u32)
            .map(|i| archetype.pack_location(0, i))
            .collect();
        archetype.remove_entities(&mut pool, &remaining, false);
        assert_eq!(archetype.len(), 0);
        assert_eq!(archetype.chunk_count(), 0, "defer_cleanup=false must release the drained chunk");
    }

    #[test]
    fn batch_move_entities_from_copies_shared_components_and_drops_the_rest() {
        let mut components = Components::new();
        let pos_id = components.register::<Position>().unwrap();
        let vel_id = components.register::<Velocity>().unwrap();
        let mut pool = ChunkPool::new(ChunkPoolConfig::default());

        let src_mask = ComponentMask::EMPTY.with(pos_id).with(vel_id);
        let dst_mask = ComponentMask::EMPTY.with(pos_id);
        let mut src = Archetype::new(ArchetypeId(0), src_mask, &components);
        let mut dst = Archetype::new(ArchetypeId(1), dst_mask, &components);

        let mut entity_pool = EntityPool::default();
        let entities = make_entities(&mut entity_pool, 4);
        let src_locations: Vec<PackedLocation> = entities
            .iter()
            .map(|&e| src.add_entity(&mut pool, e).unwrap())
            .collect();
        for (i, &loc) in src_locations.iter().enumerate() {
            src.set_component(loc, pos_id, Position { x: i as f32, y: 0.0 });
        }

        let (dst_locations, src_repairs) = dst
            .batch_move_entities_from(&mut pool, &mut src, &entities, &src_locations)
            .unwrap();

        assert_eq!(dst_locations.len(), 4);
        assert_eq!(dst.len(), 4);
        assert_eq!(src.len(), 0);
        for repair in &src_repairs {
            assert!(entities.contains(&repair.0));
        }
        let mut xs: Vec<i32> = dst_locations
            .iter()
            .map(|&loc| dst.get_component::<Position>(loc, pos_id).unwrap().x as i32)
            .collect();
        xs.sort_unstable();
        assert_eq!(xs, vec![0, 1, 2, 3]);
    }

    #[test]
    fn batch_set_component_writes_every_location() {
        let mut components = Components::new();
        let pos_id = components.register::<Position>().unwrap();
        let mask = ComponentMask::EMPTY.with(pos_id);
        let mut pool = ChunkPool::new(ChunkPoolConfig::default());
        let mut archetype = Archetype::new(ArchetypeId(0), mask, &components);
        let mut entity_pool = EntityPool::default();
        let entities = make_entities(&mut entity_pool, 3);
        let locations = archetype.add_entities(&mut pool, &entities).unwrap();

        archetype.batch_set_component(&locations, pos_id, Position { x: 7.0, y: 9.0 });
        for &loc in &locations {
            assert_eq!(
                archetype.get_component::<Position>(loc, pos_id),
                Some(&Position { x: 7.0, y: 9.0 })
            );
        }
    }
}
