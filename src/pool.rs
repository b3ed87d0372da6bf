//! The size-class pool is the allocation fast path: for each class, a
//! small vector of "active" slabs published as an immutable snapshot
//! behind an atomic pointer, so readers walk a frozen `Vec` without
//! ever taking a lock, and a generation word that doubles as both a
//! growth-in-flight latch and an "active vector changed under you"
//! signal for structural writers. A background pre-growth task is
//! triggered as the head nears its load factor.
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crate::class_table::CLASS_TO_ALLOC_NPAGES;
use crate::error::Result;
use crate::heap::Heap;
use crate::slab::Slab;

/// An immutable, already-published view of one class's active slabs.
/// Never mutated after construction; structural changes build a new
/// `ActiveSnapshot` and swap the class's pointer to it. Old snapshots
/// are never reclaimed, matching the rest of this crate's "leak for
/// process lifetime" ownership discipline (see `Heap`'s `&'static dyn
/// Mapper`) — the slabs they reference are heap-owned and outlive them
/// regardless.
struct ActiveSnapshot {
    slabs: Vec<*mut Slab>,
}

unsafe impl Sync for ActiveSnapshot {}

struct ClassPool {
    active: AtomicPtr<ActiveSnapshot>,
    /// Even: idle. Odd: a background grow is in flight. Every
    /// transition (grow completing, or a change to the published
    /// active vector) bumps this by one, so a reader can detect "the
    /// vector moved since I last looked" even when the parity
    /// round-trips back to even.
    generation: AtomicU64,
}

unsafe impl Send for ClassPool {}
unsafe impl Sync for ClassPool {}

pub struct Pool {
    heap: &'static Heap,
    classes: Vec<ClassPool>,
}

impl Pool {
    pub fn new(heap: &'static Heap) -> Self {
        Pool {
            heap,
            classes: (0..crate::class_table::N_SIZE_CLASSES)
                .map(|_| ClassPool {
                    active: AtomicPtr::new(Box::leak(Box::new(ActiveSnapshot { slabs: Vec::new() }))),
                    generation: AtomicU64::new(0),
                })
                .collect(),
        }
    }

    /// Serves one element of `class`, growing the pool as needed.
    /// Requires a `'static` receiver: a background grow task borrows
    /// `self` for the duration of its (detached) lifetime, which is
    /// only sound if `Pool` itself is never deallocated — true once an
    /// embedder's `create()` call leaks it alongside its `Heap`.
    pub fn alloc(&'static self, class: usize) -> Result<usize> {
        let class_pool = &self.classes[class];

        loop {
            let snapshot_ptr = class_pool.active.load(Ordering::Acquire);
            let snapshot = unsafe { &*snapshot_ptr };

            let mut served = None;
            for (i, &slab_ptr) in snapshot.slabs.iter().enumerate() {
                let slab = unsafe { &*slab_ptr };
                if let Some(idx) = slab.next_free_fast().or_else(|| slab.next_free_slow()) {
                    served = Some((i, slab_ptr, idx));
                    break;
                }
            }

            if let Some((i, slab_ptr, idx)) = served {
                let slab = unsafe { &*slab_ptr };
                let addr = slab.base_addr_of(idx);

                if slab.need_grow() {
                    self.try_async_grow(class);
                }

                if i > 0 {
                    // Publish a snapshot with the exhausted head demoted. If
                    // the pointer moved since we read it (another thread
                    // already grew or demoted), leave it to whoever won that
                    // race; this allocation is valid either way.
                    let mut new_slabs = snapshot.slabs.clone();
                    let exhausted_head = new_slabs.remove(0);
                    let new_snapshot = Box::leak(Box::new(ActiveSnapshot { slabs: new_slabs }));
                    if class_pool
                        .active
                        .compare_exchange(snapshot_ptr, new_snapshot, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        class_pool.generation.fetch_add(1, Ordering::AcqRel);
                        self.heap.full_lists[class].push_front(exhausted_head);
                    }
                }

                return Ok(addr);
            }

            if let Some(slab_ptr) = self.heap.free_lists[class].pop_front() {
                if !self.publish_with(class_pool, snapshot_ptr, slab_ptr) {
                    // Lost the race to publish; don't strand the slab we
                    // just popped off the heap's free list.
                    self.heap.free_lists[class].push_front(slab_ptr);
                }
                continue;
            }

            let pages = CLASS_TO_ALLOC_NPAGES[class] as usize;
            let slab_ptr = self.heap.alloc_slab(pages, class)?;
            self.publish_append(class_pool, slab_ptr);
        }
    }

    /// Publishes a snapshot with `slab_ptr` appended, succeeding only if
    /// `class_pool`'s pointer still equals `expected`. Returns whether
    /// the swap succeeded.
    fn publish_with(&self, class_pool: &ClassPool, expected: *mut ActiveSnapshot, slab_ptr: *mut Slab) -> bool {
        let current = unsafe { &*expected };
        let mut new_slabs = current.slabs.clone();
        new_slabs.push(slab_ptr);
        let new_snapshot = Box::leak(Box::new(ActiveSnapshot { slabs: new_slabs }));

        let ok = class_pool
            .active
            .compare_exchange(expected, new_snapshot, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if ok {
            class_pool.generation.fetch_add(1, Ordering::AcqRel);
        }
        ok
    }

    /// Appends `slab_ptr` to `class_pool`'s active vector, retrying
    /// against the freshest snapshot until the swap succeeds. Used when
    /// the slab must not be lost (it was just freshly allocated, not
    /// borrowed back from a list we could push onto again).
    fn publish_append(&self, class_pool: &ClassPool, slab_ptr: *mut Slab) {
        loop {
            let current_ptr = class_pool.active.load(Ordering::Acquire);
            if self.publish_with(class_pool, current_ptr, slab_ptr) {
                return;
            }
        }
    }

    /// Hands off growth of `class` to a detached background thread,
    /// serialised by a CAS on the generation word so at most one grow
    /// is in flight per class at a time.
    fn try_async_grow(&'static self, class: usize) {
        let class_pool = &self.classes[class];

        let gen = class_pool.generation.load(Ordering::Acquire);
        if gen % 2 != 0 {
            return;
        }
        if class_pool
            .generation
            .compare_exchange(gen, gen + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        std::thread::spawn(move || {
            let pages = CLASS_TO_ALLOC_NPAGES[class] as usize;
            match self.heap.alloc_slab(pages, class) {
                Ok(slab_ptr) => self.publish_append(&self.classes[class], slab_ptr),
                Err(e) => {
                    log::error!("background growth for class {} failed: {}", class, e);
                }
            }
            self.classes[class].generation.fetch_add(1, Ordering::AcqRel);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;
    use proptest::collection::vec;
    use proptest::prelude::*;

    fn leaked_heap() -> &'static Heap {
        Box::leak(Box::new(
            Heap::new(HeapConfig { mapper_name: Some("file".to_string()), ..HeapConfig::default() }).unwrap(),
        ))
    }

    fn leaked_pool(heap: &'static Heap) -> &'static Pool {
        Box::leak(Box::new(Pool::new(heap)))
    }

    #[test]
    fn alloc_serves_distinct_addresses_for_one_class() {
        let pool = leaked_pool(leaked_heap());
        let a = pool.alloc(1).unwrap();
        let b = pool.alloc(1).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn alloc_grows_past_a_single_slabs_capacity() {
        let pool = leaked_pool(leaked_heap());
        let class = 1;
        let n = crate::class_table::CLASS_TO_ALLOC_NPAGES[class] as usize * crate::constants::PAGE_SIZE
            / crate::class_table::CLASS_TO_SIZE[class] as usize;

        let mut seen = std::collections::HashSet::new();
        for _ in 0..(n + 5) {
            seen.insert(pool.alloc(class).unwrap());
        }
        assert_eq!(seen.len(), n + 5);
    }

    #[test]
    fn exhausted_head_is_demoted_to_the_heaps_full_list() {
        let heap = leaked_heap();
        let pool = leaked_pool(heap);
        let class = 1;
        let n = crate::class_table::CLASS_TO_ALLOC_NPAGES[class] as usize * crate::constants::PAGE_SIZE
            / crate::class_table::CLASS_TO_SIZE[class] as usize;

        for _ in 0..n {
            pool.alloc(class).unwrap();
        }
        // Next alloc should grow a second slab without losing the first.
        pool.alloc(class).unwrap();
        assert!(!heap.full_lists[class].is_empty() || heap.status().per_class_full_slabs[class] > 0);
    }

    proptest! {
        // Bulk-allocate, then free and re-allocate in a random-ish
        // order; every live address must stay unique throughout.
        #[test]
        fn random_order_keeps_addresses_unique(indices in vec(0..20usize, 1..80)) {
            let alloc = crate::Allocator::create(crate::HeapConfig {
                mapper_name: Some("file".to_string()),
                ..crate::HeapConfig::default()
            }).unwrap();
            let alloc: &'static crate::Allocator = Box::leak(Box::new(alloc));

            let slots: &mut Vec<Option<usize>> = Box::leak(Box::new(Vec::new()));
            slots.resize(20, None);

            for index in indices {
                if let Some(addr) = slots[index].take() {
                    alloc.free(addr).unwrap();
                } else {
                    let addr = alloc.alloc(16).unwrap();
                    prop_assert!(slots.iter().all(|s| *s != Some(addr)));
                    slots[index] = Some(addr);
                }
            }

            for slot in slots.iter_mut() {
                if let Some(addr) = slot.take() {
                    alloc.free(addr).unwrap();
                }
            }
        }
    }
}
