//! Archetype-based entity-component-system storage core.
//!
//! Entities are packed 32-bit ids recycled through a segmented, generational pool
//! ([`entity::EntityPool`]). Components are registered once and described by a
//! [`component::ComponentDescriptor`]; entities sharing an exact component set live together in
//! an [`archetype::Archetype`], a struct-of-arrays store built from fixed-size chunks drawn from
//! a [`chunk::ChunkPool`]. [`manager::ArchetypeManager`] orchestrates archetype transitions and
//! caches them in an [`archetype::ArchetypeGraph`]; [`query`] compiles required/forbidden/any-of
//! component masks into chunk-granularity iteration. [`world::World`] is the façade over all of
//! it.

pub mod archetype;
pub mod chunk;
pub mod component;
pub mod entity;
pub mod error;
mod manager;
pub mod mask;
pub mod query;
pub mod world;

pub use component::Component;
pub use entity::Entity;
pub use error::EcsError;
pub use manager::{ArchetypeStats, CleanupOptions};
pub use world::{World, WorldConfig};
