//! The heap owns every byte of address space this crate ever reserves:
//! the arena it carves chunks from, the treap of free chunks, the
//! address-to-slab map, and the per-class `free`/`full` slab lists that
//! the sweep driver walks. Allocation through a size-class pool is
//! layered on top in `pool.rs`; this module is the ground floor.
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::addr_map::AddrMap;
use crate::arena::LinearArena;
use crate::chunk::Chunk;
use crate::class_table::N_SIZE_CLASSES;
use crate::constants::{PAGE_SIZE, SWEEP_COOLDOWN, TOTAL_GC_FACTOR};
use crate::error::{Error, Result};
use crate::list::SlabList;
use crate::mapper::Mapper;
use crate::meta::{FixedAllocator, SliceAllocator};
use crate::slab::Slab;
use crate::treap::Treap;

/// An append-only log of every top-level chunk ever carved straight out
/// of the arena (one entry per `alloc_chunk` growth step, before any
/// splitting), backed by a `SliceAllocator` so the bookkeeping array
/// itself never touches the host heap. Read-only outside of `push`;
/// used for diagnostics (`Heap::all_chunks`).
struct ChunkLog {
    alloc: SliceAllocator<Chunk>,
    base: Option<NonNull<Chunk>>,
    len: usize,
}

unsafe impl Send for ChunkLog {}

impl ChunkLog {
    fn new(mapper: &'static dyn Mapper) -> Self {
        ChunkLog { alloc: SliceAllocator::new(mapper), base: None, len: 0 }
    }

    fn push(&mut self, chunk: Chunk) -> Result<()> {
        let (base, _capacity) = self.alloc.ensure_capacity(self.len + 1, self.len)?;
        unsafe {
            base.as_ptr().add(self.len).write(chunk);
        }
        self.base = Some(base);
        self.len += 1;
        Ok(())
    }

    fn snapshot(&self) -> Vec<Chunk> {
        match self.base {
            Some(base) => unsafe { std::slice::from_raw_parts(base.as_ptr(), self.len).to_vec() },
            None => Vec::new(),
        }
    }
}

/// Embedder-supplied tunables, passed to `create`.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Fraction of a slab's elements allocated before the pool
    /// attempts to grow it ahead of exhaustion. Must be in `(0, 1]`.
    pub load_factor: f64,
    /// Bytes requested per heap-region growth step.
    pub region_step: usize,
    /// Bytes requested per metadata-region growth step.
    pub metadata_region_size: usize,
    /// Name of a registered mapper to use instead of the process
    /// default.
    pub mapper_name: Option<String>,
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig {
            load_factor: 0.6,
            region_step: crate::constants::REGION_SIZE,
            metadata_region_size: crate::constants::METADATA_REGION_SIZE,
            mapper_name: None,
        }
    }
}

/// A read-only snapshot of heap occupancy, assembled by walking
/// existing structures under their respective locks. Diagnostics only:
/// taking one never changes allocator state.
#[derive(Debug, Clone)]
pub struct Status {
    pub total_capacity: usize,
    pub free_capacity: usize,
    pub per_class_free_slabs: Vec<usize>,
    pub per_class_full_slabs: Vec<usize>,
}

pub struct Heap {
    mapper: &'static dyn Mapper,
    pub config: HeapConfig,
    arena: Mutex<LinearArena>,
    treap: Mutex<Treap>,
    addr_map: AddrMap,
    slab_meta: FixedAllocator<Slab>,
    chunk_log: Mutex<ChunkLog>,
    pub(crate) free_lists: Vec<SlabList>,
    pub(crate) full_lists: Vec<SlabList>,
    total_capacity: AtomicUsize,
    free_capacity: AtomicUsize,
    sweep_ctl: AtomicBool,
    sweep_index: AtomicUsize,
    last_sweep: Mutex<Instant>,
}

impl Heap {
    pub fn new(config: HeapConfig) -> Result<Self> {
        if !(config.load_factor > 0.0 && config.load_factor <= 1.0) {
            return Err(Error::InvalidArgument("load_factor must be in (0, 1]"));
        }

        let mapper = crate::mapper::get_mapper(config.mapper_name.as_deref())
            .map_err(|_| Error::InvalidArgument("unknown named mapper"))?;

        let metadata_region_size = config.metadata_region_size;
        Ok(Heap {
            mapper,
            config,
            arena: Mutex::new(LinearArena::new(mapper)),
            treap: Mutex::new(Treap::new(mapper)),
            addr_map: AddrMap::new(),
            slab_meta: FixedAllocator::new(mapper, metadata_region_size),
            chunk_log: Mutex::new(ChunkLog::new(mapper)),
            free_lists: (0..N_SIZE_CLASSES).map(|_| SlabList::new()).collect(),
            full_lists: (0..N_SIZE_CLASSES).map(|_| SlabList::new()).collect(),
            total_capacity: AtomicUsize::new(0),
            free_capacity: AtomicUsize::new(0),
            sweep_ctl: AtomicBool::new(false),
            sweep_index: AtomicUsize::new(0),
            last_sweep: Mutex::new(Instant::now() - SWEEP_COOLDOWN),
        })
    }

    /// Finds or carves out a `pages`-page chunk from the free treap,
    /// growing the arena when no free chunk is large enough.
    pub fn alloc_chunk(&self, pages: usize) -> Result<Chunk> {
        let mut treap = self.treap.lock().unwrap();

        if let Some(found) = treap.find_and_remove(pages) {
            let (taken, remainder) = found.split(pages);
            if let Some(remainder) = remainder {
                treap.insert(remainder)?;
            }
            return Ok(taken);
        }

        let want_bytes = (pages * PAGE_SIZE).max(self.config.region_step);
        let mut arena = self.arena.lock().unwrap();
        if arena.remaining() < want_bytes {
            arena.expand(PAGE_SIZE)?;
        }
        let base = arena.alloc(want_bytes, PAGE_SIZE)?;
        drop(arena);

        let whole = Chunk::new(base.as_ptr() as usize, want_bytes / PAGE_SIZE);
        self.chunk_log.lock().unwrap().push(whole)?;

        let (taken, remainder) = whole.split(pages);
        if let Some(remainder) = remainder {
            treap.insert(remainder)?;
        }
        Ok(taken)
    }

    /// Every top-level chunk ever carved out of the arena, in growth
    /// order. Diagnostics only.
    pub fn all_chunks(&self) -> Vec<Chunk> {
        self.chunk_log.lock().unwrap().snapshot()
    }

    /// Allocates and registers a fresh small-object slab for `class`.
    pub fn alloc_slab(&self, pages: usize, class: usize) -> Result<*mut Slab> {
        let chunk = self.alloc_chunk(pages)?;
        let node_ptr = self.slab_meta.alloc()?;
        unsafe {
            node_ptr.as_ptr().write(Slab::new(class, chunk, self.config.load_factor));
        }
        let slab_ptr = node_ptr.as_ptr();

        self.addr_map.set_range(chunk.start_addr, chunk.npages, slab_ptr);
        self.total_capacity.fetch_add(chunk.size_bytes(), Ordering::Relaxed);
        Ok(slab_ptr)
    }

    /// Allocates a single class-0 slab covering exactly `pages`, for
    /// objects too large for any size class. Pushed straight into
    /// class 0's `full` list since it's already at capacity.
    pub fn alloc_raw_slab(&self, pages: usize) -> Result<*mut Slab> {
        let chunk = self.alloc_chunk(pages)?;
        let node_ptr = self.slab_meta.alloc()?;
        unsafe {
            node_ptr.as_ptr().write(Slab::new_raw(chunk));
        }
        let slab_ptr = node_ptr.as_ptr();

        self.addr_map.set_range(chunk.start_addr, chunk.npages, slab_ptr);
        self.total_capacity.fetch_add(chunk.size_bytes(), Ordering::Relaxed);
        self.full_lists[0].push_front(slab_ptr);
        Ok(slab_ptr)
    }

    pub fn resolve(&self, addr: usize) -> Option<*mut Slab> {
        self.addr_map.lookup(addr)
    }

    /// Marks the element owning `addr` as freed and opportunistically
    /// triggers a sweep pass. An address this heap never handed out is
    /// logged and otherwise ignored, matching the source's posture of
    /// never letting `free` fail a caller outright.
    pub fn free(&self, addr: usize) -> Result<()> {
        let slab_ptr = match self.resolve(addr) {
            Some(ptr) => ptr,
            None => {
                log::warn!("free: address {:#x} is not owned by this heap", addr);
                return Ok(());
            }
        };

        let slab = unsafe { &*slab_ptr };
        let index = slab.object_index(addr);
        slab.mark(index);
        self.free_capacity.fetch_add(slab.element_size, Ordering::Relaxed);

        self.maybe_sweep();
        Ok(())
    }

    pub fn status(&self) -> Status {
        Status {
            total_capacity: self.total_capacity.load(Ordering::Relaxed),
            free_capacity: self.free_capacity.load(Ordering::Relaxed),
            per_class_free_slabs: self.free_lists.iter().map(|l| l.iter_snapshot().len()).collect(),
            per_class_full_slabs: self.full_lists.iter().map(|l| l.iter_snapshot().len()).collect(),
        }
    }

    fn maybe_sweep(&self) {
        let total = self.total_capacity.load(Ordering::Relaxed) as f64;
        let free = self.free_capacity.load(Ordering::Relaxed) as f64;
        if total <= 0.0 || free < total * TOTAL_GC_FACTOR {
            return;
        }

        {
            let last = self.last_sweep.lock().unwrap();
            if last.elapsed() < SWEEP_COOLDOWN {
                return;
            }
        }

        if self
            .sweep_ctl
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.sweep())) {
            log::error!("panic during sweep pass: {:?}", panic);
        }

        self.sweep_index.store(0, Ordering::Relaxed);
        *self.last_sweep.lock().unwrap() = Instant::now();
        self.sweep_ctl.store(false, Ordering::Release);
    }

    /// Walks every size class once, reclaiming any `full`-list slab
    /// whose every slot has been marked freed since the last pass.
    pub fn sweep(&self) {
        loop {
            let class = self.sweep_index.fetch_add(1, Ordering::AcqRel);
            if class >= N_SIZE_CLASSES {
                break;
            }
            self.sweep_class(class);
        }
    }

    fn sweep_class(&self, class: usize) {
        let candidates = self.full_lists[class].iter_snapshot();
        for slab_ptr in candidates {
            let slab = unsafe { &*slab_ptr };
            if !slab.is_eligible_for_sweep() {
                continue;
            }
            if !self.full_lists[class].remove(slab_ptr) {
                continue; // raced with another sweeper or a demotion
            }
            self.reclaim_slab(class, slab_ptr, slab);
        }
    }

    fn reclaim_slab(&self, class: usize, slab_ptr: *mut Slab, slab: &Slab) {
        let reclaimed_bytes = slab.n_elements * slab.element_size;
        self.free_capacity.fetch_sub(reclaimed_bytes, Ordering::Relaxed);

        if class == 0 {
            self.addr_map.clear_range(slab.chunk.start_addr, slab.chunk.npages);
            self.total_capacity.fetch_sub(slab.chunk.size_bytes(), Ordering::Relaxed);
            let mut treap = self.treap.lock().unwrap();
            if let Err(e) = treap.insert(slab.chunk) {
                log::error!("sweep: failed to return chunk to the treap: {}", e);
            }
            // slab control block is never individually freed; its
            // meta-region storage outlives this slab's last use.
        } else {
            slab.reclaim_all();
            self.free_lists[class].push_front(slab_ptr);
        }
    }

    pub fn mapper(&self) -> &'static dyn Mapper {
        self.mapper
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_heap() -> Heap {
        let _ = env_logger::try_init();
        Heap::new(HeapConfig {
            mapper_name: Some("file".to_string()),
            ..HeapConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn alloc_chunk_splits_oversized_free_chunks() {
        let heap = test_heap();
        let a = heap.alloc_chunk(1).unwrap();
        let b = heap.alloc_chunk(1).unwrap();
        assert_ne!(a.start_addr, b.start_addr);
    }

    #[test]
    fn rejects_load_factor_outside_unit_interval() {
        assert!(Heap::new(HeapConfig { load_factor: 0.0, ..HeapConfig::default() }).is_err());
        assert!(Heap::new(HeapConfig { load_factor: 1.5, ..HeapConfig::default() }).is_err());
    }

    #[test]
    fn resolve_misses_addresses_never_handed_out() {
        let heap = test_heap();
        assert!(heap.resolve(0xdead_beef).is_none());
    }

    #[test]
    fn alloc_slab_registers_every_page_in_the_address_map() {
        let heap = test_heap();
        let slab_ptr = heap.alloc_slab(1, 1).unwrap();
        let slab = unsafe { &*slab_ptr };

        assert_eq!(heap.resolve(slab.chunk.start_addr), Some(slab_ptr));
        assert_eq!(heap.resolve(slab.chunk.end_addr() - 1), Some(slab_ptr));
    }

    #[test]
    fn free_on_unresolved_address_is_a_harmless_noop() {
        let heap = test_heap();
        assert!(heap.free(0xdead_beef).is_ok());
    }

    #[test]
    fn sweep_returns_a_fully_freed_small_slab_to_the_free_list() {
        let heap = test_heap();
        let slab_ptr = heap.alloc_slab(1, 1).unwrap();
        let slab = unsafe { &*slab_ptr };
        heap.full_lists[1].push_front(slab_ptr);

        let mut addrs = Vec::new();
        while let Some(idx) = slab.next_free_fast().or_else(|| slab.next_free_slow()) {
            addrs.push(slab.base_addr_of(idx));
        }
        assert!(slab.is_full());

        for addr in &addrs {
            heap.free(*addr).unwrap();
        }
        heap.sweep();

        assert!(heap.free_lists[1].iter_snapshot().contains(&slab_ptr));
        assert!(!heap.full_lists[1].iter_snapshot().contains(&slab_ptr));
    }

    #[test]
    fn sweep_returns_a_freed_large_chunk_to_the_treap() {
        let heap = test_heap();
        let slab_ptr = heap.alloc_raw_slab(2).unwrap();
        let slab = unsafe { &*slab_ptr };
        let addr = slab.chunk.start_addr;

        heap.free(addr).unwrap();
        heap.sweep();

        assert!(heap.resolve(addr).is_none());
        let reused = heap.alloc_chunk(2).unwrap();
        assert_eq!(reused.start_addr, addr);
    }

    #[test]
    fn status_reports_capacity_and_slab_counts() {
        let heap = test_heap();
        heap.alloc_slab(1, 1).unwrap();
        let status = heap.status();
        assert!(status.total_capacity > 0);
        assert_eq!(status.per_class_free_slabs.len(), N_SIZE_CLASSES);
        assert_eq!(status.per_class_full_slabs.len(), N_SIZE_CLASSES);
    }

    #[test]
    fn all_chunks_records_one_entry_per_growth_step() {
        let heap = test_heap();
        assert!(heap.all_chunks().is_empty());

        heap.alloc_chunk(1).unwrap();
        assert_eq!(heap.all_chunks().len(), 1);

        // Served from the remainder of the first growth chunk; no new entry.
        heap.alloc_chunk(1).unwrap();
        assert_eq!(heap.all_chunks().len(), 1);
    }
}
