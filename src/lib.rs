//! An off-heap, size-classed slab allocator: objects are served from
//! dedicated mmap'd regions rather than the host's heap, bucketed into
//! compile-time size classes (`class_table`) to bound internal
//! fragmentation, and only ever reclaimed in bulk once a whole slab's
//! worth of slots have been freed (`heap::sweep`).
mod addr_map;
mod arena;
mod bitmap;
mod chunk;
mod class_table;
mod constants;
mod error;
mod file_backed_mapper;
mod heap;
mod list;
mod map;
mod mapper;
mod meta;
mod pool;
mod slab;
mod string_alloc;
mod treap;

pub use constants::{class_for_size, MAX_SMALL_SIZE, N_SIZE_CLASSES, PAGE_SIZE, REGION_SIZE, TOTAL_GC_FACTOR};
pub use error::{Error, Result};
pub use file_backed_mapper::set_file_backed_slab_directory;
pub use heap::{HeapConfig, Status};
pub use mapper::{register_mapper, Mapper};
pub use string_alloc::{ArrayHeader, StringView};

use heap::Heap;
use pool::Pool;

/// A single off-heap allocator instance.
///
/// Construction leaks its `Heap` and `Pool` for the process lifetime,
/// the same "boxed and never torn down mid-life" discipline the rest
/// of this crate relies on (see `DESIGN.md`, "Cyclic heap <-> slab
/// references").
pub struct Allocator {
    heap: &'static Heap,
    pool: &'static Pool,
}

impl Allocator {
    /// Builds a fresh allocator. `config.load_factor` must be in
    /// `(0, 1]`; see `HeapConfig`.
    pub fn create(config: HeapConfig) -> Result<Allocator> {
        let heap: &'static Heap = Box::leak(Box::new(Heap::new(config)?));
        let pool: &'static Pool = Box::leak(Box::new(Pool::new(heap)));
        Ok(Allocator { heap, pool })
    }

    /// Returns the page size this allocator's geometry is built on.
    pub fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    /// Allocates `size` zeroed bytes, rounded up to the smallest size
    /// class (or the class-0 large-object path) that can hold it.
    /// Returns the base address of the allocation.
    pub fn alloc(&'static self, size: usize) -> Result<usize> {
        if size == 0 {
            return Err(Error::InvalidArgument("alloc size must be at least 1"));
        }

        if size <= MAX_SMALL_SIZE {
            let class = class_for_size(size);
            let addr = self.pool.alloc(class)?;
            unsafe {
                std::ptr::write_bytes(addr as *mut u8, 0, class_table::CLASS_TO_SIZE[class] as usize);
            }
            Ok(addr)
        } else {
            let pages = (size + PAGE_SIZE - 1) / PAGE_SIZE;
            let slab_ptr = self.heap.alloc_raw_slab(pages)?;
            let slab = unsafe { &*slab_ptr };
            let addr = slab.chunk.start_addr;
            unsafe {
                std::ptr::write_bytes(addr as *mut u8, 0, slab.chunk.size_bytes());
            }
            Ok(addr)
        }
    }

    /// Allocates `pages` worth of raw, unstructured address space
    /// through the class-0 fast path, bypassing size classes entirely.
    pub fn alloc_raw(&'static self, pages: usize) -> Result<(usize, usize)> {
        if pages == 0 {
            return Err(Error::InvalidArgument("alloc_raw pages must be at least 1"));
        }

        let slab_ptr = self.heap.alloc_raw_slab(pages)?;
        let slab = unsafe { &*slab_ptr };
        Ok((slab.chunk.start_addr, slab.chunk.npages))
    }

    /// Releases a previously-returned address. An address this
    /// allocator never handed out is logged and otherwise ignored
    /// rather than surfaced as an error (see `DESIGN.md`).
    pub fn free(&self, addr: usize) -> Result<()> {
        self.heap.free(addr)
    }

    /// A read-only snapshot of capacity and per-class slab counts.
    /// Diagnostics only; never mutates allocator state.
    pub fn status(&self) -> Status {
        self.heap.status()
    }
}
