//! `Slab` is the control block for one page run dedicated to a single
//! size class.
//!
//! Its allocation bitmap follows the source's convention directly: a
//! set bit means the slot is *free*, not allocated, so the 64-bit
//! `alloc_cache` window can be consumed by trailing-zero-count without
//! an inversion. Freeing an object does not touch that bitmap at all;
//! it only sets a bit in the independent mark bitmap. A slab is only
//! reclaimed in bulk, once every one of its (already fully-allocated)
//! slots has been marked freed — a sweep transplants the mark bitmap
//! into the allocation bitmap wholesale rather than touching individual
//! bits, which is what lets `free` stay lock-free on the fast path.
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::bitmap::{trailing_zeros_64, GcBits};
use crate::chunk::Chunk;
use crate::class_table::{CLASS_TO_DIVMAGIC, CLASS_TO_SIZE};
use crate::constants::DivMagic;

pub struct Slab {
    pub class: usize,
    pub chunk: Chunk,
    pub element_size: usize,
    pub n_elements: usize,
    /// `floor(n_elements * load_factor)`, precomputed at construction:
    /// `need_grow` fires once `allocated` reaches this count.
    extension_point: usize,
    /// Bit `i` set means element `i` is free.
    alloc_bits: GcBits,
    /// Bit `i` set means element `i` has been freed since the last sweep.
    mark_bits: GcBits,
    allocated: AtomicUsize,
    cursor: Mutex<AllocCursor>,
    /// Intrusive singly-linked list pointer, owned by whichever
    /// per-class list currently holds this slab.
    pub next: AtomicPtr<Slab>,
}

struct AllocCursor {
    /// Bit offset of the next word to refill from.
    word_offset: usize,
    /// Cached window of `alloc_bits`: a 1 bit means free.
    cache: u64,
}

impl Slab {
    pub fn new(class: usize, chunk: Chunk, load_factor: f64) -> Self {
        debug_assert!(class > 0, "class 0 has no slab, it is served from the treap");

        let element_size = CLASS_TO_SIZE[class] as usize;
        let n_elements = chunk.size_bytes() / element_size;
        Self::with_element_size(class, chunk, element_size, n_elements, load_factor)
    }

    /// Builds a one-element slab for a large, class-0 object: the
    /// whole chunk is a single slot, already allocated at construction
    /// since it's handed to its caller immediately.
    pub fn new_raw(chunk: Chunk) -> Self {
        let element_size = chunk.size_bytes();
        let slab = Self::with_element_size(0, chunk, element_size, 1, 1.0);
        slab.alloc_bits.clear_marked(0); // the sole slot starts allocated, not free
        slab.allocated.store(1, Ordering::Relaxed);
        slab
    }

    fn with_element_size(
        class: usize,
        chunk: Chunk,
        element_size: usize,
        n_elements: usize,
        load_factor: f64,
    ) -> Self {
        Slab {
            class,
            chunk,
            element_size,
            n_elements,
            extension_point: (n_elements as f64 * load_factor).floor() as usize,
            alloc_bits: GcBits::new_all_free(n_elements),
            mark_bits: GcBits::new(n_elements),
            allocated: AtomicUsize::new(0),
            cursor: Mutex::new(AllocCursor { word_offset: 0, cache: !0u64 }),
            next: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    /// `(alloc_count+1) * element_size >= PAGE_SIZE * pages`: whether
    /// one more allocation would exceed what the slab's run of pages can
    /// hold. For classes whose size evenly divides the run this is one
    /// element earlier than `allocated == n_elements`.
    pub fn is_full(&self) -> bool {
        let allocated = self.allocated.load(Ordering::Acquire);
        (allocated + 1) * self.element_size >= self.chunk.size_bytes()
    }

    pub fn need_grow(&self) -> bool {
        self.allocated.load(Ordering::Acquire) >= self.extension_point
    }

    /// Consumes a bit from the currently cached free window without
    /// touching the bitmap directly. Returns `None` once the cached
    /// window is exhausted; the caller should fall back to
    /// `next_free_slow`.
    pub fn next_free_fast(&self) -> Option<usize> {
        let mut cursor = self.cursor.lock().unwrap();
        if cursor.cache == 0 {
            return None;
        }

        let bit = trailing_zeros_64(cursor.cache) as usize;
        let index = cursor.word_offset + bit;
        if index >= self.n_elements {
            return None;
        }

        cursor.cache &= cursor.cache - 1;
        self.alloc_bits.clear_marked(index);
        self.allocated.fetch_add(1, Ordering::AcqRel);
        Some(index)
    }

    /// Scans forward from the last refilled word, refilling the
    /// cursor's cache until a free bit is found or the slab is
    /// exhausted.
    pub fn next_free_slow(&self) -> Option<usize> {
        let mut cursor = self.cursor.lock().unwrap();

        let mut word_offset = round_down_64(cursor.word_offset);
        loop {
            if word_offset >= self.n_elements {
                cursor.word_offset = self.n_elements;
                cursor.cache = 0;
                return None;
            }

            let window = self.alloc_bits.refill_alloc_cache(word_offset);
            if window != 0 {
                let bit = trailing_zeros_64(window) as usize;
                let index = word_offset + bit;
                if index >= self.n_elements {
                    cursor.word_offset = self.n_elements;
                    cursor.cache = 0;
                    return None;
                }

                self.alloc_bits.clear_marked(index);
                self.allocated.fetch_add(1, Ordering::AcqRel);
                cursor.word_offset = word_offset;
                cursor.cache = window & (window - 1);
                return Some(index);
            }

            word_offset += 64;
        }
    }

    /// Index of the element that owns `addr`, which must fall inside
    /// this slab's chunk.
    pub fn object_index(&self, addr: usize) -> usize {
        debug_assert!(addr >= self.chunk.start_addr && addr < self.chunk.end_addr());
        if self.class == 0 {
            return 0;
        }
        let offset = (addr - self.chunk.start_addr) as u64;
        divide(offset, &CLASS_TO_DIVMAGIC[self.class]) as usize
    }

    pub fn base_addr_of(&self, index: usize) -> usize {
        self.chunk.start_addr + index * self.element_size
    }

    /// Records that `index` has been freed, for the next sweep to
    /// honor. Does not touch the allocation bitmap.
    pub fn mark(&self, index: usize) {
        self.mark_bits.set_marked(index);
    }

    pub fn is_marked(&self, index: usize) -> bool {
        self.mark_bits.is_marked(index)
    }

    /// A slab is only swept as a unit: every slot must currently be
    /// allocated (it's sitting in the class's `full` list, so this
    /// should already hold) and every slot must have been marked freed
    /// since the last sweep.
    pub fn is_eligible_for_sweep(&self) -> bool {
        self.allocated.load(Ordering::Acquire) == self.n_elements
            && self.mark_bits.popcount(self.n_elements) == self.n_elements
    }

    /// Transplants the mark bitmap into the allocation bitmap (every
    /// slot becomes free in one move), resets the mark bitmap, and
    /// rewinds the cursor so the next `next_free_slow` rescans from
    /// the start. Caller must have already confirmed
    /// `is_eligible_for_sweep`.
    pub fn reclaim_all(&self) {
        self.alloc_bits.copy_from(&self.mark_bits);
        self.mark_bits.clear_all();
        self.allocated.store(0, Ordering::Release);

        let mut cursor = self.cursor.lock().unwrap();
        cursor.word_offset = 0;
        cursor.cache = self.alloc_bits.refill_alloc_cache(0);
    }
}

fn round_down_64(x: usize) -> usize {
    x & !63
}

fn divide(offset: u64, magic: &DivMagic) -> u64 {
    if magic.base_mask != 0 {
        offset >> magic.shift
    } else if magic.add {
        let t = (offset * magic.mul as u64) >> 32;
        (((offset - t) >> 1) + t) >> (magic.shift2 - 1)
    } else {
        (offset * magic.mul as u64) >> (32 + magic.shift2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PAGE_SIZE;

    fn slab_for_class(class: usize, pages: usize) -> Slab {
        Slab::new(class, Chunk::new(0, pages), 0.6)
    }

    fn exhaust(slab: &Slab) {
        while slab.next_free_fast().or_else(|| slab.next_free_slow()).is_some() {}
    }

    #[test]
    fn allocates_distinct_indices_until_full() {
        let slab = slab_for_class(1, 1); // class 1: size 8
        let mut seen = std::collections::HashSet::new();

        loop {
            let idx = match slab.next_free_fast().or_else(|| slab.next_free_slow()) {
                Some(i) => i,
                None => break,
            };
            assert!(seen.insert(idx), "duplicate index {}", idx);
        }

        assert_eq!(seen.len(), slab.n_elements);
        assert!(slab.is_full());
    }

    #[test]
    fn object_index_matches_offset_math() {
        let slab = slab_for_class(20, 2);
        let size = slab.element_size;

        for i in 0..slab.n_elements {
            let addr = slab.chunk.start_addr + i * size;
            assert_eq!(slab.object_index(addr), i);
        }
    }

    #[test]
    fn not_eligible_until_every_allocated_slot_is_marked() {
        let slab = slab_for_class(1, 1);
        let a = slab.next_free_slow().unwrap();
        let b = slab.next_free_slow().unwrap();

        slab.mark(a);
        assert!(!slab.is_eligible_for_sweep()); // b unmarked, and slab isn't even full yet

        exhaust(&slab);
        assert!(!slab.is_eligible_for_sweep()); // only a is marked

        for i in 0..slab.n_elements {
            slab.mark(i);
        }
        let _ = b;
        assert!(slab.is_eligible_for_sweep());
    }

    #[test]
    fn reclaim_all_frees_every_slot_and_resets_cursor() {
        let slab = slab_for_class(1, 1);
        exhaust(&slab);
        for i in 0..slab.n_elements {
            slab.mark(i);
        }
        assert!(slab.is_eligible_for_sweep());

        slab.reclaim_all();
        assert!(!slab.is_full());
        assert_eq!(slab.mark_bits.popcount(slab.n_elements), 0);

        let mut reused = std::collections::HashSet::new();
        while let Some(idx) = slab.next_free_fast().or_else(|| slab.next_free_slow()) {
            reused.insert(idx);
        }
        assert_eq!(reused.len(), slab.n_elements);
    }

    #[test]
    fn new_raw_starts_allocated_as_a_single_slot() {
        let slab = Slab::new_raw(Chunk::new(0, 3));
        assert_eq!(slab.n_elements, 1);
        assert!(slab.is_full());
        assert_eq!(slab.object_index(slab.chunk.start_addr), 0);
    }

    #[test]
    fn element_size_matches_class_table() {
        let slab = slab_for_class(5, 1);
        assert_eq!(slab.element_size, CLASS_TO_SIZE[5] as usize);
        assert_eq!(slab.n_elements, PAGE_SIZE / slab.element_size);
    }
}
