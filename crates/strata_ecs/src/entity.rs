use std::collections::VecDeque;
use std::fmt;

use crate::error::EcsError;

const ID_BITS: u32 = 24;
const ID_MASK: u32 = (1 << ID_BITS) - 1;
const MAX_ID: u32 = ID_MASK;

/// A packed 32-bit entity identifier: a 24-bit index and an 8-bit generation ("version").
///
/// `Entity::NULL` (id 0, version 0) is never produced by [`EntityPool::create`] — the pool's
/// first live id carries version 1 — so it is safe to use as a sentinel in component data.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Entity(u32);

impl Entity {
    pub const NULL: Entity = Entity(0);

    #[inline]
    fn pack(id: u32, version: u8) -> Self {
        debug_assert!(id <= MAX_ID, "entity index overflowed 24 bits");
        Self(((version as u32) << ID_BITS) | (id & ID_MASK))
    }

    #[inline]
    pub fn id(self) -> u32 {
        self.0 & ID_MASK
    }

    #[inline]
    pub fn version(self) -> u8 {
        (self.0 >> ID_BITS) as u8
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    /// Packs the raw bits back into an `Entity`. Exposed for serialization round-tripping;
    /// does not validate that the id/version pair is currently alive in any pool.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn to_bits(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.id(), self.version())
    }
}

/// Construction-time tuning for an [`EntityPool`].
#[derive(Clone, Copy, Debug)]
pub struct EntityPoolConfig {
    /// Number of ids per lazily-allocated segment. Must be a power of two.
    pub entities_per_segment: u32,
    /// Segments with zero live entities beyond this count are eligible for release; their
    /// residual free ids are dropped from circulation (an accepted, bounded id-space leak).
    pub max_empty_segments: usize,
    /// Whether emptied segments are ever released at all.
    pub auto_release: bool,
}

impl Default for EntityPoolConfig {
    fn default() -> Self {
        Self {
            entities_per_segment: 1 << 16,
            max_empty_segments: 2,
            auto_release: true,
        }
    }
}

struct Segment {
    versions: Vec<u8>,
    alive_count: u32,
}

/// Segmented, generational entity id allocator.
///
/// Ids are handed out densely from an ever-increasing counter and recycled through a LIFO free
/// list that carries the *next* version to stamp on reuse. Version 0 is permanently reserved as
/// "dead"; when the 8-bit counter would wrap back to 0 it skips straight to 1 instead, so an id
/// can be reused up to 254 times before a version collision becomes possible.
pub struct EntityPool {
    config: EntityPoolConfig,
    segment_shift: u32,
    segments: Vec<Option<Box<Segment>>>,
    free_list: Vec<Entity>,
    empty_segment_queue: VecDeque<usize>,
    next_id: u32,
    alive_count: u32,
}

impl EntityPool {
    pub fn new(config: EntityPoolConfig) -> Self {
        assert!(
            config.entities_per_segment.is_power_of_two(),
            "entities_per_segment must be a power of two"
        );
        Self {
            segment_shift: config.entities_per_segment.trailing_zeros(),
            config,
            segments: Vec::new(),
            free_list: Vec::new(),
            empty_segment_queue: VecDeque::new(),
            next_id: 0,
            alive_count: 0,
        }
    }

    #[inline]
    fn segment_of(&self, id: u32) -> usize {
        (id >> self.segment_shift) as usize
    }

    #[inline]
    fn local_of(&self, id: u32) -> usize {
        (id & ((1 << self.segment_shift) - 1)) as usize
    }

    fn ensure_segment(&mut self, seg_idx: usize) -> &mut Segment {
        if self.segments.len() <= seg_idx {
            self.segments.resize_with(seg_idx + 1, || None);
        }
        self.segments[seg_idx].get_or_insert_with(|| {
            tracing::debug!(segment = seg_idx, "allocating entity id segment");
            Box::new(Segment {
                versions: vec![0u8; self.config.entities_per_segment as usize],
                alive_count: 0,
            })
        })
    }

    pub fn create(&mut self) -> Result<Entity, EcsError> {
        if let Some(entity) = self.free_list.pop() {
            let seg_idx = self.segment_of(entity.id());
            let local = self.local_of(entity.id());
            let seg = self.ensure_segment(seg_idx);
            seg.versions[local] = entity.version();
            seg.alive_count += 1;
            self.alive_count += 1;
            return Ok(entity);
        }

        let id = self.next_id;
        if id > MAX_ID {
            tracing::warn!("entity id space exhausted");
            return Err(EcsError::ResourceExhaustion("entity id space exhausted"));
        }
        self.next_id += 1;
        let seg_idx = self.segment_of(id);
        let local = self.local_of(id);
        let seg = self.ensure_segment(seg_idx);
        seg.versions[local] = 1;
        seg.alive_count += 1;
        self.alive_count += 1;
        Ok(Entity::pack(id, 1))
    }

    pub fn create_batch(&mut self, count: u32) -> Result<Vec<Entity>, EcsError> {
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            out.push(self.create()?);
        }
        Ok(out)
    }

    pub fn is_valid(&self, entity: Entity) -> bool {
        if entity.is_null() {
            return false;
        }
        let seg_idx = self.segment_of(entity.id());
        let local = self.local_of(entity.id());
        match self.segments.get(seg_idx).and_then(|s| s.as_ref()) {
            Some(seg) => seg.versions[local] == entity.version() && entity.version() != 0,
            None => false,
        }
    }

    pub fn destroy(&mut self, entity: Entity) -> Result<(), EcsError> {
        if !self.is_valid(entity) {
            return Err(EcsError::InvalidEntity(entity));
        }
        let seg_idx = self.segment_of(entity.id());
        let local = self.local_of(entity.id());
        {
            let seg = self.segments[seg_idx].as_mut().unwrap();
            seg.versions[local] = 0;
            seg.alive_count -= 1;
        }
        self.alive_count -= 1;

        let next_version = if entity.version() == u8::MAX {
            1
        } else {
            entity.version() + 1
        };
        self.free_list.push(Entity::pack(entity.id(), next_version));

        if self.config.auto_release && self.segments[seg_idx].as_ref().unwrap().alive_count == 0 {
            self.empty_segment_queue.push_back(seg_idx);
            while self.empty_segment_queue.len() > self.config.max_empty_segments {
                let Some(victim) = self.empty_segment_queue.pop_front() else {
                    break;
                };
                if self.segments[victim].is_none() {
                    continue;
                }
                if self.segments[victim].as_ref().unwrap().alive_count != 0 {
                    // Reused since being queued; nothing to release.
                    continue;
                }
                tracing::debug!(segment = victim, "releasing empty entity id segment");
                self.segments[victim] = None;
                // Ids still sitting in the free list for a released segment are unrecoverable:
                // the segment's version table is gone, so handing one back out would silently
                // resurrect a stale version. Dropping them is the accepted leak.
                self.free_list.retain(|e| self.segment_of(e.id()) != victim);
            }
        }

        Ok(())
    }

    pub fn version_of(&self, id: u32) -> Option<u8> {
        let seg_idx = self.segment_of(id);
        self.segments
            .get(seg_idx)
            .and_then(|s| s.as_ref())
            .map(|s| s.versions[self.local_of(id)])
    }

    pub fn len(&self) -> usize {
        self.alive_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.alive_count == 0
    }

    /// Total ids currently backed by an allocated segment (`allocated segment count *
    /// entities_per_segment`), not the number alive — mirrors `Vec::capacity` vs. `len`.
    pub fn capacity(&self) -> usize {
        self.segments.iter().filter(|s| s.is_some()).count() * self.config.entities_per_segment as usize
    }

    /// Drops every segment, the free list, and the empty-segment release queue, and resets
    /// the id counter to 0. Every previously issued `Entity` becomes invalid — equivalent to
    /// replacing the pool with a fresh one built from the same config.
    pub fn clear(&mut self) {
        self.segments.clear();
        self.free_list.clear();
        self.empty_segment_queue.clear();
        self.next_id = 0;
        self.alive_count = 0;
    }

    /// Eagerly allocates the segments needed to back `n` further ids without triggering a
    /// segment allocation mid-batch, starting from the next id `create` would hand out.
    pub fn reserve(&mut self, n: u32) {
        if n == 0 {
            return;
        }
        let last_id = self.next_id.saturating_add(n - 1).min(MAX_ID);
        for seg_idx in self.segment_of(self.next_id)..=self.segment_of(last_id) {
            self.ensure_segment(seg_idx);
        }
    }

    /// Drops segments from the tail of the segment table that currently hold no live
    /// entities, shrinking the backing `Vec` itself. Only ever trims the tail — an emptied
    /// segment in the middle of the table stays allocated here (releasing it is `destroy`'s
    /// `auto_release` path, which can tombstone a middle segment in place without resizing).
    pub fn shrink_to_fit(&mut self) {
        while matches!(self.segments.last(), Some(Some(seg)) if seg.alive_count == 0) {
            self.segments.pop();
        }
        while matches!(self.segments.last(), Some(None)) {
            self.segments.pop();
        }
        self.segments.shrink_to_fit();
    }

    /// Iterates every currently-alive entity, in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.segments.iter().enumerate().flat_map(move |(seg_idx, seg)| {
            let base = (seg_idx as u32) << self.segment_shift;
            let versions: &[u8] = seg.as_ref().map(|s| s.versions.as_slice()).unwrap_or(&[]);
            versions.iter().enumerate().filter_map(move |(local, &v)| {
                if v == 0 {
                    None
                } else {
                    Some(Entity::pack(base + local as u32, v))
                }
            })
        })
    }
}

impl Default for EntityPool {
    fn default() -> Self {
        Self::new(EntityPoolConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_destroy_round_trip() {
        let mut pool = EntityPool::default();
        let e = pool.create().unwrap();
        assert!(pool.is_valid(e));
        assert_eq!(e.version(), 1);
        pool.destroy(e).unwrap();
        assert!(!pool.is_valid(e));
    }

    #[test]
    fn recycled_id_gets_bumped_version() {
        let mut pool = EntityPool::new(EntityPoolConfig {
            entities_per_segment: 1 << 4,
            ..Default::default()
        });
        let e1 = pool.create().unwrap();
        pool.destroy(e1).unwrap();
        let e2 = pool.create().unwrap();
        assert_eq!(e1.id(), e2.id());
        assert_eq!(e2.version(), e1.version() + 1);
        assert!(!pool.is_valid(e1));
        assert!(pool.is_valid(e2));
    }

    #[test]
    fn version_wraps_skipping_zero() {
        let mut pool = EntityPool::default();
        let mut e = pool.create().unwrap();
        for _ in 0..255 {
            pool.destroy(e).unwrap();
            e = pool.create().unwrap();
        }
        // after 255 recycles starting at version 1, version must have wrapped 255 -> 1, never 0
        assert_ne!(e.version(), 0);
    }

    #[test]
    fn destroying_invalid_entity_errors() {
        let mut pool = EntityPool::default();
        assert_eq!(
            pool.destroy(Entity::NULL),
            Err(EcsError::InvalidEntity(Entity::NULL))
        );
        let e = pool.create().unwrap();
        pool.destroy(e).unwrap();
        assert_eq!(pool.destroy(e), Err(EcsError::InvalidEntity(e)));
    }

    #[test]
    fn empty_segment_is_released_and_its_free_ids_are_lost() {
        let mut pool = EntityPool::new(EntityPoolConfig {
            entities_per_segment: 1 << 4,
            max_empty_segments: 0,
            auto_release: true,
        });
        let entities = pool.create_batch(16).unwrap();
        for e in &entities {
            pool.destroy(*e).unwrap();
        }
        // Segment 0 should have been released immediately (max_empty_segments == 0); its
        // free-list entries are gone, so the next create() must mint a fresh id, not recycle.
        let next = pool.create().unwrap();
        assert!(!entities.contains(&next));
    }

    #[test]
    fn reserve_preallocates_segments_capacity_reports_them() {
        let mut pool = EntityPool::new(EntityPoolConfig {
            entities_per_segment: 1 << 4,
            ..Default::default()
        });
        assert_eq!(pool.capacity(), 0);
        pool.reserve(33);
        // 33 ids starting at 0 span segments 0, 1, 2 (16 ids each).
        assert_eq!(pool.capacity(), 3 * 16);
        for _ in 0..33 {
            pool.create().unwrap();
        }
        assert_eq!(pool.len(), 33);
    }

    #[test]
    fn clear_invalidates_every_entity_and_resets_ids() {
        let mut pool = EntityPool::default();
        let e = pool.create().unwrap();
        pool.clear();
        assert!(!pool.is_valid(e));
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.capacity(), 0);
        let fresh = pool.create().unwrap();
        assert_eq!(fresh.id(), 0);
        assert_eq!(fresh.version(), 1);
    }

    #[test]
    fn shrink_to_fit_drops_trailing_empty_segments_only() {
        let mut pool = EntityPool::new(EntityPoolConfig {
            entities_per_segment: 1 << 4,
            max_empty_segments: usize::MAX,
            auto_release: false,
        });
        let first = pool.create().unwrap();
        pool.reserve(17); // touches segment 1 as well, which stays empty
        assert_eq!(pool.capacity(), 2 * 16);
        pool.shrink_to_fit();
        // Segment 0 still holds `first`; only the trailing empty segment 1 is dropped.
        assert_eq!(pool.capacity(), 16);
        assert!(pool.is_valid(first));
    }
}
