use crate::component::ComponentTypeHash;

/// A single chunk's worth of snapshotted data: the live entity ids and, in parallel with
/// [`ArchetypeSnapshot::descriptors`], each component's raw byte array for this chunk's `count`
/// live slots (`count * descriptor.size` bytes, in slot order).
pub struct ChunkSnapshot {
    pub count: u32,
    pub entities: Vec<u32>,
    pub components: Vec<Vec<u8>>,
}

/// A byte-level capture of one [`super::Archetype`], as consumed by an external serializer (see
/// `SPEC_FULL.md`'s serialization boundary). This crate performs no framing, compression, or
/// checksumming of this structure — it only resolves component identity (by hash) and exposes the
/// raw arrays; turning it into a wire format is the host's job.
pub struct ArchetypeSnapshot {
    /// `(type hash, version)` per component, sorted by the writing archetype's component id —
    /// the same order as [`ChunkSnapshot::components`].
    pub descriptors: Vec<(ComponentTypeHash, u32)>,
    pub entities_per_chunk: u32,
    pub chunks: Vec<ChunkSnapshot>,
}
