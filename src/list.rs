//! An intrusive singly-linked list of `Slab`s, threaded through each
//! slab's own `next` pointer. A pool keeps one `SlabList` of slabs with
//! spare capacity ("free") and one of slabs that are known full
//! ("full") per size class; slabs move between the two as they fill up
//! and as sweeping reclaims space.
use std::ptr;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use crate::slab::Slab;

pub struct SlabList {
    head: Mutex<*mut Slab>,
}

unsafe impl Send for SlabList {}
unsafe impl Sync for SlabList {}

impl SlabList {
    pub fn new() -> Self {
        SlabList { head: Mutex::new(ptr::null_mut()) }
    }

    /// Pushes `slab` to the front of the list.
    pub fn push_front(&self, slab: *mut Slab) {
        let mut head = self.head.lock().unwrap();
        unsafe {
            (*slab).next.store(*head, Ordering::Release);
        }
        *head = slab;
    }

    /// Removes and returns the slab at the front of the list, if any.
    pub fn pop_front(&self) -> Option<*mut Slab> {
        let mut head = self.head.lock().unwrap();
        if head.is_null() {
            return None;
        }

        let slab = *head;
        unsafe {
            *head = (*slab).next.load(Ordering::Acquire);
            (*slab).next.store(ptr::null_mut(), Ordering::Release);
        }
        Some(slab)
    }

    /// Unlinks `slab` from the list. `slab` must currently be a member;
    /// this is an O(n) scan, used only on the cold sweep/demotion path.
    pub fn remove(&self, slab: *mut Slab) -> bool {
        let mut head = self.head.lock().unwrap();

        if *head == slab {
            unsafe {
                *head = (*slab).next.load(Ordering::Acquire);
                (*slab).next.store(ptr::null_mut(), Ordering::Release);
            }
            return true;
        }

        let mut cur = *head;
        unsafe {
            while !cur.is_null() {
                let next = (*cur).next.load(Ordering::Acquire);
                if next == slab {
                    let after = (*slab).next.load(Ordering::Acquire);
                    (*cur).next.store(after, Ordering::Release);
                    (*slab).next.store(ptr::null_mut(), Ordering::Release);
                    return true;
                }
                cur = next;
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.head.lock().unwrap().is_null()
    }

    /// Snapshot of every slab currently linked, front to back. Used by
    /// invariant checks and `status()`; not on any allocation fast
    /// path.
    pub fn iter_snapshot(&self) -> Vec<*mut Slab> {
        let head = self.head.lock().unwrap();
        let mut out = Vec::new();
        let mut cur = *head;
        unsafe {
            while !cur.is_null() {
                out.push(cur);
                cur = (*cur).next.load(Ordering::Acquire);
            }
        }
        out
    }
}

impl Default for SlabList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    fn leak_slab(class: usize, pages: usize, start_addr: usize) -> *mut Slab {
        Box::into_raw(Box::new(Slab::new(class, Chunk::new(start_addr, pages), 0.6)))
    }

    #[test]
    fn push_and_pop_is_lifo() {
        let list = SlabList::new();
        let a = leak_slab(1, 1, 0);
        let b = leak_slab(1, 1, crate::constants::PAGE_SIZE);

        list.push_front(a);
        list.push_front(b);

        assert_eq!(list.pop_front(), Some(b));
        assert_eq!(list.pop_front(), Some(a));
        assert_eq!(list.pop_front(), None);
    }

    #[test]
    fn remove_from_middle() {
        let list = SlabList::new();
        let a = leak_slab(1, 1, 0);
        let b = leak_slab(1, 1, crate::constants::PAGE_SIZE);
        let c = leak_slab(1, 1, crate::constants::PAGE_SIZE * 2);

        list.push_front(a);
        list.push_front(b);
        list.push_front(c);

        assert!(list.remove(b));
        let remaining = list.iter_snapshot();
        assert_eq!(remaining, vec![c, a]);
        assert!(!list.remove(b));
    }

    #[test]
    fn snapshot_matches_push_order() {
        let list = SlabList::new();
        assert!(list.is_empty());

        let a = leak_slab(1, 1, 0);
        list.push_front(a);
        assert!(!list.is_empty());
        assert_eq!(list.iter_snapshot(), vec![a]);
    }
}
