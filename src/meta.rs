//! Metadata allocators: the core's own control structures (slab blocks,
//! treap nodes, the heap's chunk vector) are carved out of dedicated
//! mmap'd meta-regions rather than the host's heap, so they share the
//! same "never returned to the OS mid-lifetime" discipline as
//! everything else in this crate.
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::Result;
use crate::mapper::Mapper;

/// Serves `T`-sized, `T`-aligned offsets out of one meta-region at a
/// time by CAS-advancing an internal cursor. When the remaining space
/// drops below one element, acquires a new meta-region under a lock,
/// discarding the old one for *new* allocations (existing pointers
/// into it stay valid until process end).
pub struct FixedAllocator<T> {
    mapper: &'static dyn Mapper,
    region_size: usize,
    state: Mutex<FixedState>,
    cursor: AtomicUsize,
    limit: AtomicUsize,
    _marker: PhantomData<T>,
}

struct FixedState {
    // Kept only so the region is not dropped; its memory stays mapped
    // for the process lifetime.
    regions: Vec<(NonNull<std::ffi::c_void>, usize)>,
}

unsafe impl<T> Send for FixedAllocator<T> {}
unsafe impl<T> Sync for FixedAllocator<T> {}

impl<T> FixedAllocator<T> {
    pub fn new(mapper: &'static dyn Mapper, region_size: usize) -> Self {
        FixedAllocator {
            mapper,
            region_size,
            state: Mutex::new(FixedState { regions: Vec::new() }),
            cursor: AtomicUsize::new(0),
            limit: AtomicUsize::new(0),
            _marker: PhantomData,
        }
    }

    /// Returns a zeroed, `T`-aligned slot.
    pub fn alloc(&self) -> Result<NonNull<T>> {
        let elem_size = std::mem::size_of::<T>().max(std::mem::align_of::<T>());

        loop {
            let cur = self.cursor.load(Ordering::Acquire);
            let lim = self.limit.load(Ordering::Acquire);

            if cur + elem_size <= lim {
                if self
                    .cursor
                    .compare_exchange(cur, cur + elem_size, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Ok(unsafe { NonNull::new_unchecked(cur as *mut T) });
                }
                continue;
            }

            self.grow(elem_size)?;
        }
    }

    fn grow(&self, elem_size: usize) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        // Another thread may have already grown while we waited.
        let lim = self.limit.load(Ordering::Acquire);
        let cur = self.cursor.load(Ordering::Acquire);
        if cur + elem_size <= lim {
            return Ok(());
        }

        let region_size = self.region_size.max(elem_size);
        let (base, reserved) = self.mapper.reserve(region_size)?;
        self.mapper.allocate_meta(base, reserved)?;

        let base_addr = base.as_ptr() as usize;
        self.cursor.store(base_addr, Ordering::Release);
        self.limit.store(base_addr + reserved, Ordering::Release);
        state.regions.push((base, reserved));

        Ok(())
    }
}

/// The growing variant for contiguous arrays (used for the heap's
/// vector of all chunks). `grow` always requests at least double the
/// current capacity, bounding blow-up at 2x per call.
pub struct SliceAllocator<T> {
    mapper: &'static dyn Mapper,
    inner: Mutex<SliceState<T>>,
}

struct SliceState<T> {
    base: Option<NonNull<T>>,
    capacity: usize,
}

unsafe impl<T> Send for SliceAllocator<T> {}
unsafe impl<T> Sync for SliceAllocator<T> {}

impl<T: Copy> SliceAllocator<T> {
    pub fn new(mapper: &'static dyn Mapper) -> Self {
        SliceAllocator {
            mapper,
            inner: Mutex::new(SliceState {
                base: None,
                capacity: 0,
            }),
        }
    }

    /// Ensures the backing array can hold at least `new_len` elements,
    /// copying `old_len` live elements into the new backing if it
    /// grows. Returns the (possibly unchanged) base pointer and
    /// capacity.
    pub fn ensure_capacity(&self, new_len: usize, old_len: usize) -> Result<(NonNull<T>, usize)> {
        let mut state = self.inner.lock().unwrap();

        if new_len <= state.capacity {
            return Ok((state.base.unwrap(), state.capacity));
        }

        let new_capacity = (state.capacity * 2).max(new_len).max(16);
        let elem_size = std::mem::size_of::<T>();
        let bytes = new_capacity * elem_size;

        let (region, reserved) = self.mapper.reserve(bytes)?;
        self.mapper.allocate_meta(region, reserved)?;
        let new_base = region.cast::<T>();

        if let Some(old_base) = state.base {
            unsafe {
                std::ptr::copy_nonoverlapping(old_base.as_ptr(), new_base.as_ptr(), old_len);
            }
        }

        state.base = Some(new_base);
        state.capacity = reserved / elem_size;

        Ok((new_base, state.capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    struct Small {
        a: u64,
        b: u64,
    }

    #[test]
    fn fixed_allocator_serves_distinct_slots() {
        let mapper = crate::mapper::get_mapper(None).unwrap();
        let alloc: FixedAllocator<Small> = FixedAllocator::new(mapper, 4096);

        let a = alloc.alloc().unwrap();
        let b = alloc.alloc().unwrap();
        assert_ne!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn fixed_allocator_grows_across_regions() {
        let mapper = crate::mapper::get_mapper(None).unwrap();
        let alloc: FixedAllocator<Small> = FixedAllocator::new(mapper, mapper.page_size());

        let mut ptrs = Vec::new();
        for _ in 0..10_000 {
            ptrs.push(alloc.alloc().unwrap().as_ptr() as usize);
        }
        let unique: std::collections::HashSet<_> = ptrs.iter().collect();
        assert_eq!(unique.len(), ptrs.len());
    }

    #[test]
    fn slice_allocator_doubles_capacity() {
        let mapper = crate::mapper::get_mapper(None).unwrap();
        let alloc: SliceAllocator<u64> = SliceAllocator::new(mapper);

        let (_, cap1) = alloc.ensure_capacity(1, 0).unwrap();
        assert!(cap1 >= 16);

        let (_, cap2) = alloc.ensure_capacity(cap1 + 1, cap1).unwrap();
        assert!(cap2 >= cap1 * 2);
    }
}
