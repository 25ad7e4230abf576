use std::alloc::Layout;
use std::any::{type_name, Any, TypeId};

use strata_ptr::{OwningPtr, PtrMut};
use strata_utils::hash::HashMap;

use crate::error::EcsError;
use crate::mask::MAX_COMPONENTS;

/// Process-local, dense identifier for a registered component type. Stable for the lifetime of
/// the owning [`Components`] registry, not across processes — use [`ComponentTypeHash`] for that.
pub type ComponentId = u16;

/// A 64-bit FNV-1a hash of the component's Rust type name, stable across runs on the same
/// compiler/target (it is *not* a stable cross-version ABI identifier — renaming or moving a
/// component type changes it).
pub type ComponentTypeHash = u64;

const FNV_OFFSET_BASIS: u64 = 14695981039346656037;
const FNV_PRIME: u64 = 1099511628211;

const fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

fn type_hash<T: ?Sized + Any>() -> ComponentTypeHash {
    fnv1a(type_name::<T>().as_bytes())
}

/// Marker trait for types that may be stored as components.
///
/// `Default` is required so archetypes can default-construct a component slot when an entity is
/// moved into an archetype that didn't previously carry it (see [`crate::archetype::Archetype`]).
/// Blanket-implemented, matching the ergonomics of `hecs::Component` — any `'static` value that
/// is `Send + Sync + Default` is automatically usable as a component, no derive required.
pub trait Component: Send + Sync + Default + 'static {}

impl<T: Send + Sync + Default + 'static> Component for T {}

/// Per-type metadata captured once at registration and reused by every archetype that stores the
/// type: layout for chunk packing, and the two pieces of type-specific glue a byte-oriented
/// archetype storage cannot synthesize itself (default-construction and drop).
///
/// Move is deliberately *not* part of this descriptor: in Rust, moving a value is always exactly
/// a `memcpy` of `layout.size()` bytes followed by not running the source's destructor, so the
/// generic archetype code performs it directly with [`std::ptr::copy_nonoverlapping`] rather than
/// dispatching through a per-type function pointer as the original C++ descriptor does.
pub struct ComponentDescriptor {
    pub id: ComponentId,
    pub hash: ComponentTypeHash,
    pub name: &'static str,
    pub layout: Layout,
    /// Bumped manually by callers that version their own component definitions; defaults to 1.
    pub version: u32,
    /// Oldest version this descriptor will still accept when deserializing a snapshot.
    pub min_supported_version: u32,
    pub(crate) default_construct: unsafe fn(PtrMut),
    pub(crate) drop_in_place: Option<unsafe fn(OwningPtr)>,
}

impl ComponentDescriptor {
    fn new<T: Component>(id: ComponentId) -> Self {
        Self {
            id,
            hash: type_hash::<T>(),
            name: type_name::<T>(),
            layout: Layout::new::<T>(),
            version: 1,
            min_supported_version: 1,
            default_construct: default_construct_ptr::<T>,
            drop_in_place: if std::mem::needs_drop::<T>() {
                Some(drop_ptr::<T>)
            } else {
                None
            },
        }
    }
}

unsafe fn default_construct_ptr<T: Component>(dst: PtrMut) {
    // SAFETY: caller guarantees `dst` points at `size_of::<T>()` writable, correctly aligned,
    // uninitialized bytes belonging to a slot registered under this descriptor's `ComponentId`.
    unsafe { dst.as_ptr().cast::<T>().write(T::default()) }
}

unsafe fn drop_ptr<T: Component>(ptr: OwningPtr) {
    // SAFETY: caller guarantees `ptr` owns a live, initialized `T` it will never read again.
    unsafe { ptr.drop_as::<T>() }
}

/// Registry of every component type known to a [`crate::world::World`].
///
/// Registration is idempotent: calling `register::<T>()` twice returns the same id. Ids are
/// assigned densely starting at 0 and are never reused, so `MAX_COMPONENTS` bounds the total
/// number of *distinct types ever registered*, not the number alive at once.
#[derive(Default)]
pub struct Components {
    descriptors: Vec<ComponentDescriptor>,
    by_type: HashMap<TypeId, ComponentId>,
    by_hash: HashMap<ComponentTypeHash, ComponentId>,
}

impl Components {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Component>(&mut self) -> Result<ComponentId, EcsError> {
        if let Some(&id) = self.by_type.get(&TypeId::of::<T>()) {
            return Ok(id);
        }
        if self.descriptors.len() >= MAX_COMPONENTS {
            return Err(EcsError::ComponentLimitExceeded);
        }
        let id = self.descriptors.len() as ComponentId;
        let descriptor = ComponentDescriptor::new::<T>(id);
        tracing::debug!(
            component = descriptor.name,
            id,
            hash = format_args!("{:#x}", descriptor.hash),
            "registered component type"
        );
        self.by_hash.insert(descriptor.hash, id);
        self.by_type.insert(TypeId::of::<T>(), id);
        self.descriptors.push(descriptor);
        Ok(id)
    }

    pub fn component_id<T: Component>(&self) -> Option<ComponentId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    pub fn id_by_hash(&self, hash: ComponentTypeHash) -> Option<ComponentId> {
        self.by_hash.get(&hash).copied()
    }

    pub fn descriptor(&self, id: ComponentId) -> &ComponentDescriptor {
        &self.descriptors[id as usize]
    }

    /// Every registered descriptor, in registration (ascending id) order. Backs
    /// `World::components()` introspection.
    pub fn descriptors(&self) -> impl Iterator<Item = &ComponentDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Position {
        #[allow(dead_code)]
        x: f32,
        #[allow(dead_code)]
        y: f32,
    }

    #[derive(Default)]
    struct Velocity(#[allow(dead_code)] f32, #[allow(dead_code)] f32);

    #[test]
    fn register_is_idempotent() {
        let mut components = Components::new();
        let a = components.register::<Position>().unwrap();
        let b = components.register::<Position>().unwrap();
        assert_eq!(a, b);
        assert_eq!(components.len(), 1);
    }

    #[test]
    fn distinct_types_get_distinct_ids_and_hashes() {
        let mut components = Components::new();
        let pos = components.register::<Position>().unwrap();
        let vel = components.register::<Velocity>().unwrap();
        assert_ne!(pos, vel);
        assert_ne!(
            components.descriptor(pos).hash,
            components.descriptor(vel).hash
        );
        assert_eq!(components.id_by_hash(components.descriptor(pos).hash), Some(pos));
    }

    #[test]
    fn hash_is_stable_for_same_type() {
        assert_eq!(type_hash::<Position>(), type_hash::<Position>());
    }

    #[test]
    fn exhausting_component_limit_errors() {
        // Exercise the limit directly against the constant rather than registering
        // `MAX_COMPONENTS` distinct monomorphized types.
        let mut components = Components::new();
        for _ in 0..MAX_COMPONENTS {
            components.descriptors.push(ComponentDescriptor {
                id: components.descriptors.len() as ComponentId,
                hash: 0,
                name: "filler",
                layout: Layout::new::<u8>(),
                version: 1,
                min_supported_version: 1,
                default_construct: default_construct_ptr::<u8>,
                drop_in_place: None,
            });
        }
        assert_eq!(
            components.register::<Position>(),
            Err(EcsError::ComponentLimitExceeded)
        );
    }
}
