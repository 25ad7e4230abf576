use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::EcsError;

/// Fixed size of every chunk handed out by [`ChunkPool`]. Archetypes size their entity/component
/// arrays to fit inside this budget.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Alignment every chunk is guaranteed to satisfy — a cache line, generous enough for any
/// component's natural alignment to be honored by sub-offsets within the chunk.
pub const CHUNK_ALIGN: usize = 64;

/// Construction-time tuning for a [`ChunkPool`].
#[derive(Clone, Copy, Debug)]
pub struct ChunkPoolConfig {
    pub chunks_per_slab: usize,
    pub max_chunks: usize,
    /// Slabs to allocate eagerly at construction, before the first `acquire`.
    pub prewarm_slabs: usize,
    /// Requests huge-page-backed slabs from the OS when available. Purely advisory: the
    /// portable `std::alloc` backend used here has no huge-page syscall binding, so this is
    /// accepted and logged but otherwise inert. See `SPEC_FULL.md` for the rationale.
    pub use_huge_pages: bool,
}

impl Default for ChunkPoolConfig {
    fn default() -> Self {
        Self {
            chunks_per_slab: 64,
            max_chunks: 4096,
            prewarm_slabs: 0,
            use_huge_pages: true,
        }
    }
}

/// Point-in-time snapshot of [`ChunkPool`] activity.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChunkPoolStats {
    pub total_chunks: usize,
    pub free_chunks: usize,
    pub acquire_count: usize,
    pub release_count: usize,
    pub slab_allocations: usize,
    pub failed_acquires: usize,
}

struct Slab {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: `Slab` only holds an owned heap allocation; the pool that owns the `Slab` already
// requires external synchronization for anything but the relaxed stat counters below.
unsafe impl Send for Slab {}

/// Slab allocator handing out fixed `CHUNK_SIZE`, `CHUNK_ALIGN`-aligned buffers.
///
/// Mutation (acquire/release/slab growth) assumes single-threaded, cooperative access, same as
/// the rest of the core — the pool is not internally locked. The six statistics counters are
/// still kept as relaxed atomics so a caller can snapshot them from another thread without
/// synchronizing with the owning thread, matching the source design's stated model of "atomics
/// only for statistics".
pub struct ChunkPool {
    config: ChunkPoolConfig,
    slabs: Vec<Slab>,
    free_list: Vec<NonNull<u8>>,
    total_chunks: AtomicUsize,
    free_chunks: AtomicUsize,
    acquire_count: AtomicUsize,
    release_count: AtomicUsize,
    slab_allocations: AtomicUsize,
    failed_acquires: AtomicUsize,
}

// SAFETY: see `Slab`'s Send impl; `ChunkPool` is used behind `&mut` for everything but stats.
unsafe impl Send for ChunkPool {}

impl ChunkPool {
    pub fn new(config: ChunkPoolConfig) -> Self {
        let mut pool = Self {
            config,
            slabs: Vec::new(),
            free_list: Vec::new(),
            total_chunks: AtomicUsize::new(0),
            free_chunks: AtomicUsize::new(0),
            acquire_count: AtomicUsize::new(0),
            release_count: AtomicUsize::new(0),
            slab_allocations: AtomicUsize::new(0),
            failed_acquires: AtomicUsize::new(0),
        };
        for _ in 0..config.prewarm_slabs {
            let _ = pool.allocate_slab();
        }
        pool
    }

    pub fn acquire(&mut self) -> Result<NonNull<u8>, EcsError> {
        if let Some(ptr) = self.free_list.pop() {
            // SAFETY: `ptr` came from a slab allocation of at least `CHUNK_SIZE` bytes.
            unsafe { ptr::write_bytes(ptr.as_ptr(), 0, CHUNK_SIZE) };
            self.free_chunks.fetch_sub(1, Ordering::Relaxed);
            self.acquire_count.fetch_add(1, Ordering::Relaxed);
            return Ok(ptr);
        }

        let total = self.total_chunks.load(Ordering::Relaxed);
        if total < self.config.max_chunks {
            self.allocate_slab()?;
            return self.acquire();
        }

        self.failed_acquires.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(max_chunks = self.config.max_chunks, "chunk pool exhausted");
        Err(EcsError::ResourceExhaustion("chunk pool exhausted"))
    }

    pub fn acquire_batch(&mut self, count: usize) -> Result<Vec<NonNull<u8>>, EcsError> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.acquire()?);
        }
        Ok(out)
    }

    pub fn release(&mut self, ptr: NonNull<u8>) {
        debug_assert!(self.owns_chunk(ptr), "releasing a chunk this pool did not hand out");
        self.free_list.push(ptr);
        self.free_chunks.fetch_add(1, Ordering::Relaxed);
        self.release_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn owns_chunk(&self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        self.slabs.iter().any(|slab| {
            let start = slab.ptr.as_ptr() as usize;
            let end = start + slab.layout.size();
            addr >= start && addr < end && (addr - start) % CHUNK_SIZE == 0
        })
    }

    pub fn stats(&self) -> ChunkPoolStats {
        ChunkPoolStats {
            total_chunks: self.total_chunks.load(Ordering::Relaxed),
            free_chunks: self.free_chunks.load(Ordering::Relaxed),
            acquire_count: self.acquire_count.load(Ordering::Relaxed),
            release_count: self.release_count.load(Ordering::Relaxed),
            slab_allocations: self.slab_allocations.load(Ordering::Relaxed),
            failed_acquires: self.failed_acquires.load(Ordering::Relaxed),
        }
    }

    fn allocate_slab(&mut self) -> Result<(), EcsError> {
        let total = self.total_chunks.load(Ordering::Relaxed);
        let remaining = self.config.max_chunks.saturating_sub(total);
        let n = self.config.chunks_per_slab.min(remaining).max(1);
        if n == 0 || total >= self.config.max_chunks {
            return Err(EcsError::ResourceExhaustion("chunk pool exhausted"));
        }

        let layout = Layout::from_size_align(n * CHUNK_SIZE, CHUNK_ALIGN)
            .expect("chunk slab layout is always valid");
        // SAFETY: `layout` has non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(EcsError::ResourceExhaustion("allocator returned null"))?;

        for i in 0..n {
            // SAFETY: `i * CHUNK_SIZE` stays within the `n * CHUNK_SIZE`-byte allocation.
            let chunk_ptr = unsafe { NonNull::new_unchecked(ptr.as_ptr().add(i * CHUNK_SIZE)) };
            self.free_list.push(chunk_ptr);
        }

        self.total_chunks.fetch_add(n, Ordering::Relaxed);
        self.free_chunks.fetch_add(n, Ordering::Relaxed);
        self.slab_allocations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(chunks = n, "allocated chunk pool slab");
        if self.config.use_huge_pages {
            tracing::debug!("huge pages requested but not supported by the portable allocator backend");
        }
        self.slabs.push(Slab { ptr, layout });
        Ok(())
    }
}

impl Drop for ChunkPool {
    fn drop(&mut self) {
        for slab in &self.slabs {
            // SAFETY: `slab.ptr`/`slab.layout` are exactly as returned by `alloc_zeroed`.
            unsafe { dealloc(slab.ptr.as_ptr(), slab.layout) };
        }
    }
}

impl Default for ChunkPool {
    fn default() -> Self {
        Self::new(ChunkPoolConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_zeroes_and_release_recycles() {
        let mut pool = ChunkPool::new(ChunkPoolConfig {
            chunks_per_slab: 2,
            max_chunks: 2,
            prewarm_slabs: 0,
            use_huge_pages: false,
        });
        let a = pool.acquire().unwrap();
        unsafe {
            *a.as_ptr() = 0xAB;
        }
        pool.release(a);
        let b = pool.acquire().unwrap();
        assert_eq!(unsafe { *b.as_ptr() }, 0);
        assert!(pool.owns_chunk(b));
    }

    #[test]
    fn exhausting_max_chunks_errors() {
        let mut pool = ChunkPool::new(ChunkPoolConfig {
            chunks_per_slab: 1,
            max_chunks: 1,
            prewarm_slabs: 0,
            use_huge_pages: false,
        });
        let _a = pool.acquire().unwrap();
        assert_eq!(
            pool.acquire(),
            Err(EcsError::ResourceExhaustion("chunk pool exhausted"))
        );
        let stats = pool.stats();
        assert_eq!(stats.failed_acquires, 1);
        assert_eq!(stats.total_chunks, 1);
    }

    #[test]
    fn stats_reflect_acquire_and_release_counts() {
        let mut pool = ChunkPool::new(ChunkPoolConfig {
            chunks_per_slab: 4,
            max_chunks: 16,
            prewarm_slabs: 0,
            use_huge_pages: false,
        });
        let chunks = pool.acquire_batch(4).unwrap();
        for c in chunks {
            pool.release(c);
        }
        let stats = pool.stats();
        assert_eq!(stats.acquire_count, 4);
        assert_eq!(stats.release_count, 4);
        assert_eq!(stats.free_chunks, stats.total_chunks);
    }
}
