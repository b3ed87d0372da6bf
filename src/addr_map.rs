//! Resolves an arbitrary address back to the `Slab` that owns it.
//!
//! A flat array indexed by page number would need one entry per page
//! across the entire address space the process might ever reserve,
//! which is wasteful when most of that space is never touched. Instead
//! this follows the two-level scheme common to copying and
//! page-granularity collectors: a sparse top level, keyed by the high
//! bits of the address and populated lazily, pointing at dense second
//! -level tables that each cover a contiguous slice of pages.
use std::collections::HashMap;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Mutex;

use crate::constants::PAGE_SIZE;
use crate::slab::Slab;

const PAGE_SHIFT: u32 = PAGE_SIZE.trailing_zeros();
/// Each second-level table covers `2^L2_BITS` consecutive pages.
const L2_BITS: u32 = 10;
const L2_SIZE: usize = 1 << L2_BITS;

pub struct AddrMap {
    l1: Mutex<HashMap<usize, Box<[AtomicPtr<Slab>]>>>,
}

impl AddrMap {
    pub fn new() -> Self {
        AddrMap { l1: Mutex::new(HashMap::new()) }
    }

    fn l1_key(addr: usize) -> usize {
        addr >> (PAGE_SHIFT + L2_BITS)
    }

    fn l2_index(addr: usize) -> usize {
        (addr >> PAGE_SHIFT) & (L2_SIZE - 1)
    }

    /// Records that every page in `[start_addr, start_addr + npages *
    /// PAGE_SIZE)` is owned by `slab`.
    pub fn set_range(&self, start_addr: usize, npages: usize, slab: *mut Slab) {
        let mut l1 = self.l1.lock().unwrap();

        for page in 0..npages {
            let addr = start_addr + page * PAGE_SIZE;
            let table = l1
                .entry(Self::l1_key(addr))
                .or_insert_with(|| (0..L2_SIZE).map(|_| AtomicPtr::new(ptr::null_mut())).collect());
            table[Self::l2_index(addr)].store(slab, Ordering::Release);
        }
    }

    /// Clears ownership for a page range, e.g. after a class-0 chunk
    /// is coalesced back into the treap.
    pub fn clear_range(&self, start_addr: usize, npages: usize) {
        let l1 = self.l1.lock().unwrap();

        for page in 0..npages {
            let addr = start_addr + page * PAGE_SIZE;
            if let Some(table) = l1.get(&Self::l1_key(addr)) {
                table[Self::l2_index(addr)].store(ptr::null_mut(), Ordering::Release);
            }
        }
    }

    /// Returns the slab owning `addr`, or `None` if the page was never
    /// handed out to a slab (e.g. it belongs to a large-object chunk
    /// served directly from the treap, or was never reserved at all).
    pub fn lookup(&self, addr: usize) -> Option<*mut Slab> {
        let l1 = self.l1.lock().unwrap();
        let table = l1.get(&Self::l1_key(addr))?;
        let slot = table[Self::l2_index(addr)].load(Ordering::Acquire);
        if slot.is_null() {
            None
        } else {
            Some(slot)
        }
    }
}

impl Default for AddrMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    fn leak_slab(start_addr: usize) -> *mut Slab {
        Box::into_raw(Box::new(Slab::new(1, Chunk::new(start_addr, 1), 0.6)))
    }

    #[test]
    fn lookup_misses_before_any_range_is_set() {
        let map = AddrMap::new();
        assert!(map.lookup(0x1000).is_none());
    }

    #[test]
    fn set_range_resolves_every_covered_page() {
        let map = AddrMap::new();
        let slab = leak_slab(0);

        map.set_range(0, 4, slab);
        for page in 0..4 {
            assert_eq!(map.lookup(page * PAGE_SIZE), Some(slab));
        }
        assert!(map.lookup(4 * PAGE_SIZE).is_none());
    }

    #[test]
    fn clear_range_resets_lookups() {
        let map = AddrMap::new();
        let slab = leak_slab(0);

        map.set_range(0, 2, slab);
        map.clear_range(0, 2);

        assert!(map.lookup(0).is_none());
        assert!(map.lookup(PAGE_SIZE).is_none());
    }

    #[test]
    fn ranges_spanning_an_l2_boundary_both_resolve() {
        let map = AddrMap::new();
        let boundary_page = (1usize << L2_BITS) - 1;
        let start = boundary_page * PAGE_SIZE;
        let slab = leak_slab(start);

        map.set_range(start, 2, slab);
        assert_eq!(map.lookup(start), Some(slab));
        assert_eq!(map.lookup(start + PAGE_SIZE), Some(slab));
    }
}
