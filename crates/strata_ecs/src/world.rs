use crate::archetype::{ArchetypeId, ArchetypeSnapshot};
use crate::chunk::{ChunkPool, ChunkPoolConfig, ChunkPoolStats};
use crate::component::{Component, Components};
use crate::entity::{Entity, EntityPool, EntityPoolConfig};
use crate::error::EcsError;
use crate::manager::{ArchetypeManager, ArchetypeStats, CleanupOptions};
use crate::query::{Query, View};

/// Construction-time tuning for a [`World`]; forwards to its entity pool and chunk pool configs.
#[derive(Clone, Copy, Debug, Default)]
pub struct WorldConfig {
    pub entity_pool: EntityPoolConfig,
    pub chunk_pool: ChunkPoolConfig,
}

/// The public façade tying the entity pool, component registry, and archetype storage together.
///
/// `World` itself holds no storage logic: every structural method here is a thin, validated
/// wrapper delegating to [`EntityPool`], [`Components`], or [`ArchetypeManager`].
pub struct World {
    entities: EntityPool,
    components: Components,
    archetypes: ArchetypeManager,
}

impl World {
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    pub fn with_config(config: WorldConfig) -> Self {
        Self {
            entities: EntityPool::new(config.entity_pool),
            components: Components::new(),
            archetypes: ArchetypeManager::new(ChunkPool::new(config.chunk_pool)),
        }
    }

    /// Registers `T` for use as a component, if it hasn't been already. Most callers don't need
    /// to call this directly — `add_component`/`spawn_with`/queries register on first use — but
    /// it's exposed so a caller can pre-warm the registry (and fail fast on
    /// [`EcsError::ComponentLimitExceeded`]) before running any gameplay code.
    pub fn register_component<T: Component>(&mut self) -> Result<(), EcsError> {
        self.components.register::<T>()?;
        Ok(())
    }

    pub fn create_entity(&mut self) -> Result<Entity, EcsError> {
        let entity = self.entities.create()?;
        self.archetypes.spawn_empty(entity)?;
        Ok(entity)
    }

    pub fn create_entities(&mut self, count: u32) -> Result<Vec<Entity>, EcsError> {
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            out.push(self.create_entity()?);
        }
        Ok(out)
    }

    pub fn destroy_entity(&mut self, entity: Entity) -> Result<(), EcsError> {
        self.entities.destroy(entity)?;
        self.archetypes.despawn(entity)
    }

    /// Destroys every entity in `entities`, in order. Stops at the first error, leaving already
    /// -destroyed entities destroyed (this crate does not batch-group by source archetype the way
    /// `SPEC_FULL.md`'s `RemoveEntities` does; each destroy is independently atomic instead).
    pub fn destroy_entities(&mut self, entities: &[Entity]) -> Result<(), EcsError> {
        for &entity in entities {
            self.destroy_entity(entity)?;
        }
        Ok(())
    }

    pub fn is_valid(&self, entity: Entity) -> bool {
        self.entities.is_valid(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<(), EcsError> {
        if !self.entities.is_valid(entity) {
            return Err(EcsError::InvalidEntity(entity));
        }
        let id = self.components.register::<T>()?;
        self.archetypes.add_component(entity, id, value, &self.components)
    }

    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<T, EcsError> {
        if !self.entities.is_valid(entity) {
            return Err(EcsError::InvalidEntity(entity));
        }
        let Some(id) = self.components.component_id::<T>() else {
            return Err(EcsError::MissingComponent(entity));
        };
        self.archetypes.remove_component::<T>(entity, id, &self.components)
    }

    /// Adds `T` to every entity in `entities`, zipped with `values` in order. Stops at the first
    /// error; entities already processed keep their new component.
    pub fn add_components_batch<T: Component + Clone>(
        &mut self,
        entities: &[Entity],
        values: &[T],
    ) -> Result<(), EcsError> {
        for (&entity, value) in entities.iter().zip(values) {
            self.add_component(entity, value.clone())?;
        }
        Ok(())
    }

    /// Removes `T` from every entity in `entities`, collecting the removed values in order.
    pub fn remove_components_batch<T: Component>(
        &mut self,
        entities: &[Entity],
    ) -> Result<Vec<T>, EcsError> {
        entities.iter().map(|&entity| self.remove_component::<T>(entity)).collect()
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        match self.components.component_id::<T>() {
            Some(id) => self.archetypes.has_component(entity, id),
            None => false,
        }
    }

    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        let id = self.components.component_id::<T>()?;
        self.archetypes.get_component::<T>(entity, id)
    }

    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let id = self.components.component_id::<T>()?;
        self.archetypes.get_component_mut::<T>(entity, id)
    }

    /// Compiles a query over component shape `Q` (a [`crate::query::Fetch`] implementor, usually
    /// a tuple of `&T`/`&mut T`/[`crate::query::Not`]/[`crate::query::Opt`]). Registers any
    /// component types named in `Q` that aren't registered yet.
    pub fn query<Q: crate::query::Fetch>(&mut self) -> Query<Q> {
        Query::new(&mut self.components)
    }

    /// Builds a [`View`] of every archetype currently matching `query`.
    pub fn view<'w, Q: crate::query::Fetch>(&'w self, query: &'w Query<Q>) -> View<'w, Q> {
        View::new(query, self.archetypes.archetype_slice(), &self.components)
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.archetype_count()
    }

    pub fn archetype_graph_edge_count(&self) -> usize {
        self.archetypes.graph_edge_count()
    }

    /// Number of chunks allocated across every archetype. Exposed mainly for tests/diagnostics
    /// that need to observe chunk-overflow behavior directly.
    pub fn total_chunk_count(&self) -> usize {
        self.archetypes
            .archetype_slice()
            .iter()
            .map(|a| a.chunk_count())
            .sum()
    }

    /// Releases every chunk left fully empty by prior removals back to the chunk pool.
    pub fn release_empty_chunks(&mut self) {
        self.archetypes.release_empty_chunks();
    }

    pub fn chunk_pool_stats(&self) -> ChunkPoolStats {
        self.archetypes.chunk_pool_stats()
    }

    /// Read-only access to the component registry, for introspection (e.g. iterating every
    /// registered [`crate::component::ComponentDescriptor`]).
    pub fn components(&self) -> &Components {
        &self.components
    }

    /// Total chunk memory, in bytes, held across every archetype.
    pub fn archetype_memory_usage(&self) -> usize {
        self.archetypes.archetype_memory_usage()
    }

    /// Per-archetype snapshot of entity/chunk counts and memory usage, for diagnostics.
    pub fn archetype_stats(&self) -> Vec<ArchetypeStats> {
        self.archetypes.archetype_stats()
    }

    /// Releases chunk memory from archetypes that have stayed empty across consecutive cleanup
    /// passes, per `options`. Returns the number of archetypes whose chunks were released.
    ///
    /// Archetype objects themselves are never destroyed — only their chunks are — so
    /// `options.min_archetypes_to_keep` has no effect here; see `DESIGN.md`.
    pub fn cleanup_empty_archetypes(&mut self, options: CleanupOptions) -> usize {
        self.archetypes.cleanup_empty_archetypes(options)
    }

    /// Monotonically increasing counter bumped whenever a new archetype is materialized or a
    /// snapshot is loaded. Cheap way for a caller to detect "did the archetype set change".
    pub fn structural_change_counter(&self) -> usize {
        self.archetypes.structural_change_counter()
    }

    /// Redistributes entities out of each archetype's least-filled chunk into chunks with room,
    /// releasing drained chunks. Unlike `release_empty_chunks`, this can free chunks that are
    /// merely sparse, not just fully empty.
    pub fn coalesce_chunks(&mut self) {
        self.archetypes.coalesce_chunks();
    }

    /// Captures a byte-level snapshot of the archetype holding `id`, for an external serializer
    /// to frame/compress/persist. See [`ArchetypeSnapshot`].
    pub fn write_archetype_snapshot(&self, id: ArchetypeId) -> ArchetypeSnapshot {
        self.archetypes.archetype(id).write_snapshot(&self.components)
    }

    /// Restores an archetype (and its entities' locations) from a snapshot previously produced by
    /// `write_archetype_snapshot`. Component identity is resolved by type hash; a snapshot
    /// referencing an unknown hash or an unsupported version is rejected.
    pub fn read_archetype_snapshot(
        &mut self,
        snapshot: &ArchetypeSnapshot,
    ) -> Result<ArchetypeId, EcsError> {
        self.archetypes.load_snapshot(snapshot, &self.components)
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
