use thiserror::Error;

use crate::component::ComponentTypeHash;
use crate::entity::Entity;

/// Typed replacement for the sentinel-return error convention (null pointer, `false`, invalid
/// `PackedLocation`) used at every fallible boundary of the core.
///
/// Every variant preserves the side-effect-free-on-error guarantee: an operation that returns
/// `Err` has made no observable change to the world.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EcsError {
    /// The chunk pool or the entity id space is exhausted.
    #[error("resource exhausted: {0}")]
    ResourceExhaustion(&'static str),

    /// The entity is not currently valid (never created, or already destroyed).
    #[error("entity {0:?} is not valid")]
    InvalidEntity(Entity),

    /// `add_component` was called for a component type the entity already owns.
    #[error("entity {0:?} already has this component")]
    DuplicateComponent(Entity),

    /// `remove_component` (or `get_component`) was called for a component type the entity
    /// does not own.
    #[error("entity {0:?} does not have this component")]
    MissingComponent(Entity),

    /// The component registry is already at `MAX_COMPONENTS` distinct types.
    #[error("component type limit reached")]
    ComponentLimitExceeded,

    /// An archetype snapshot referenced a component hash the local registry has never seen.
    #[error("unknown component hash {0:#x}")]
    UnknownComponentHash(ComponentTypeHash),

    /// An archetype snapshot named a component version below the descriptor's
    /// `min_supported_version`.
    #[error("component version {found} is older than the minimum supported version {min}")]
    UnsupportedComponentVersion { found: u32, min: u32 },
}
