//! A probabilistically-balanced BST keyed by `(npages, start_addr)`,
//! used by the heap to find a best-fit free chunk. Nodes are allocated
//! from a dedicated fixed-size meta-allocator and never individually
//! freed; `remove_node` unlinks a node from the tree but its storage
//! stays mapped until process end, matching the slab control blocks it
//! sits alongside.
use std::ptr;

use crate::chunk::Chunk;
use crate::meta::FixedAllocator;

struct Node {
    chunk: Chunk,
    priority: u32,
    left: *mut Node,
    right: *mut Node,
    parent: *mut Node,
}

/// A treap is not `Sync` on its own; the heap protects every mutating
/// operation with its own lock, per the concurrency model in
/// SPEC_FULL.md §5.
pub struct Treap {
    root: *mut Node,
    node_alloc: FixedAllocator<Node>,
}

unsafe impl Send for Treap {}

impl Treap {
    /// Creates an empty treap with its own dedicated node allocator.
    pub fn new(mapper: &'static dyn crate::mapper::Mapper) -> Self {
        Treap {
            root: ptr::null_mut(),
            node_alloc: FixedAllocator::new(mapper, crate::constants::METADATA_REGION_SIZE),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_null()
    }

    /// Inserts `chunk` into the treap.
    pub fn insert(&mut self, chunk: Chunk) -> crate::error::Result<()> {
        let node_ptr = self.node_alloc.alloc()?;
        unsafe {
            node_ptr.as_ptr().write(Node {
                chunk,
                priority: rand::random(),
                left: ptr::null_mut(),
                right: ptr::null_mut(),
                parent: ptr::null_mut(),
            });
        }
        let node = node_ptr.as_ptr();

        unsafe {
            self.root = bst_insert(self.root, node);
            fixup_after_insert(&mut self.root, node);
        }
        Ok(())
    }

    /// Returns the smallest chunk with `npages >= pages`
    /// (tie-broken by lowest `start_addr`), removing it from the treap.
    pub fn find_and_remove(&mut self, pages: usize) -> Option<Chunk> {
        let found = self.find_node(pages)?;
        let chunk = unsafe { (*found).chunk };
        unsafe {
            self.root = remove_node(self.root, found);
        }
        Some(chunk)
    }

    fn find_node(&self, pages: usize) -> Option<*mut Node> {
        let mut best: *mut Node = ptr::null_mut();
        let mut cur = self.root;

        unsafe {
            while !cur.is_null() {
                if (*cur).chunk.npages >= pages {
                    if best.is_null()
                        || (*cur).chunk.npages < (*best).chunk.npages
                        || ((*cur).chunk.npages == (*best).chunk.npages
                            && (*cur).chunk.start_addr < (*best).chunk.start_addr)
                    {
                        best = cur;
                    }
                    cur = (*cur).left;
                } else {
                    cur = (*cur).right;
                }
            }
        }

        if best.is_null() {
            None
        } else {
            Some(best)
        }
    }

    /// In-order traversal of every live chunk, for invariant checks.
    pub fn in_order(&self) -> Vec<Chunk> {
        let mut out = Vec::new();
        unsafe { in_order_walk(self.root, &mut out) };
        out
    }
}

fn key_less(a: &Chunk, b: &Chunk) -> bool {
    (a.npages, a.start_addr) < (b.npages, b.start_addr)
}

unsafe fn bst_insert(root: *mut Node, node: *mut Node) -> *mut Node {
    if root.is_null() {
        return node;
    }

    if key_less(&(*node).chunk, &(*root).chunk) {
        let l = bst_insert((*root).left, node);
        (*root).left = l;
        (*l).parent = root;
    } else {
        let r = bst_insert((*root).right, node);
        (*root).right = r;
        (*r).parent = root;
    }
    root
}

unsafe fn rotate_left(root: &mut *mut Node, x: *mut Node) {
    let y = (*x).right;
    (*x).right = (*y).left;
    if !(*y).left.is_null() {
        (*(*y).left).parent = x;
    }
    (*y).parent = (*x).parent;
    if (*x).parent.is_null() {
        *root = y;
    } else if (*(*x).parent).left == x {
        (*(*x).parent).left = y;
    } else {
        (*(*x).parent).right = y;
    }
    (*y).left = x;
    (*x).parent = y;
}

unsafe fn rotate_right(root: &mut *mut Node, x: *mut Node) {
    let y = (*x).left;
    (*x).left = (*y).right;
    if !(*y).right.is_null() {
        (*(*y).right).parent = x;
    }
    (*y).parent = (*x).parent;
    if (*x).parent.is_null() {
        *root = y;
    } else if (*(*x).parent).left == x {
        (*(*x).parent).left = y;
    } else {
        (*(*x).parent).right = y;
    }
    (*y).right = x;
    (*x).parent = y;
}

unsafe fn fixup_after_insert(root: &mut *mut Node, node: *mut Node) {
    while !(*node).parent.is_null() && (*(*node).parent).priority > (*node).priority {
        let parent = (*node).parent;
        if (*parent).left == node {
            rotate_right(root, parent);
        } else {
            rotate_left(root, parent);
        }
    }
}

unsafe fn remove_node(root: *mut Node, node: *mut Node) -> *mut Node {
    let mut root = root;

    // Rotate the node down to a leaf, then splice it out.
    while !(*node).left.is_null() || !(*node).right.is_null() {
        if (*node).left.is_null() {
            rotate_left(&mut root, node);
        } else if (*node).right.is_null() {
            rotate_right(&mut root, node);
        } else if (*(*node).left).priority < (*(*node).right).priority {
            rotate_right(&mut root, node);
        } else {
            rotate_left(&mut root, node);
        }
    }

    let parent = (*node).parent;
    if parent.is_null() {
        root = ptr::null_mut();
    } else if (*parent).left == node {
        (*parent).left = ptr::null_mut();
    } else {
        (*parent).right = ptr::null_mut();
    }

    root
}

unsafe fn in_order_walk(node: *mut Node, out: &mut Vec<Chunk>) {
    if node.is_null() {
        return;
    }
    in_order_walk((*node).left, out);
    out.push((*node).chunk);
    in_order_walk((*node).right, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_treap() -> Treap {
        Treap::new(crate::mapper::get_mapper(None).unwrap())
    }

    #[test]
    fn insert_and_find_best_fit() {
        let mut treap = new_treap();
        treap.insert(Chunk::new(0, 4)).unwrap();
        treap.insert(Chunk::new(crate::constants::PAGE_SIZE * 4, 8)).unwrap();
        treap.insert(Chunk::new(crate::constants::PAGE_SIZE * 12, 2)).unwrap();

        let found = treap.find_and_remove(3).unwrap();
        assert_eq!(found.npages, 4);
        assert_eq!(found.start_addr, 0);
    }

    #[test]
    fn tie_break_favours_lowest_address() {
        let mut treap = new_treap();
        treap.insert(Chunk::new(crate::constants::PAGE_SIZE * 100, 4)).unwrap();
        treap.insert(Chunk::new(0, 4)).unwrap();

        let found = treap.find_and_remove(4).unwrap();
        assert_eq!(found.start_addr, 0);
    }

    #[test]
    fn in_order_traversal_is_sorted_and_disjoint() {
        let mut treap = new_treap();
        for i in 0..20 {
            treap
                .insert(Chunk::new(crate::constants::PAGE_SIZE * (i * 10), (i % 5 + 1) as usize))
                .unwrap();
        }

        let chunks = treap.in_order();
        for w in chunks.windows(2) {
            assert!(
                w[0].npages < w[1].npages
                    || (w[0].npages == w[1].npages && w[0].start_addr < w[1].start_addr)
            );
        }
    }

    #[test]
    fn find_and_remove_drains_the_treap() {
        let mut treap = new_treap();
        for i in 0..10 {
            treap.insert(Chunk::new(crate::constants::PAGE_SIZE * (i * 10), 1)).unwrap();
        }

        for _ in 0..10 {
            assert!(treap.find_and_remove(1).is_some());
        }
        assert!(treap.is_empty());
        assert!(treap.find_and_remove(1).is_none());
    }
}
