//! A monotonically advancing bump allocator over mmap'd address space.
//!
//! `LinearArena` owns a sequence of raw regions obtained through a
//! `Mapper` and serves aligned sub-ranges out of them, committing
//! physical pages lazily as the cursor advances. It is not internally
//! synchronised: callers (the heap) serialise access with their own
//! lock.
use std::ffi::c_void;
use std::ptr::NonNull;

use crate::error::{Error, Result};
use crate::mapper::Mapper;

/// Reservation step sizes tried in order by `expand`, largest first.
const ARENA_SIZES: [usize; 2] = [512 << 20, 256 << 20];

pub struct LinearArena {
    mapper: &'static dyn Mapper,
    next: usize,
    mapped: usize,
    end: usize,
}

impl std::fmt::Debug for LinearArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinearArena")
            .field("next", &self.next)
            .field("mapped", &self.mapped)
            .field("end", &self.end)
            .finish()
    }
}

impl LinearArena {
    /// Creates an arena with nothing reserved yet; the first `expand`
    /// call performs the initial reservation.
    pub fn new(mapper: &'static dyn Mapper) -> Self {
        LinearArena {
            mapper,
            next: 0,
            mapped: 0,
            end: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.end.saturating_sub(self.next)
    }

    /// Rounds `next` up to `align`, fails with `OutOfReservation` if
    /// the result would exceed `end`, advances `next`, and lazily
    /// commits up to the new page-aligned `next`.
    pub fn alloc(&mut self, size: usize, align: usize) -> Result<NonNull<c_void>> {
        debug_assert!(align.is_power_of_two());

        let p = round_up(self.next, align);
        if p.checked_add(size).map_or(true, |end| end > self.end) {
            return Err(Error::OutOfReservation);
        }

        self.next = p + size;

        let page_size = self.mapper.page_size();
        let p_end = round_up(self.next, page_size);
        if p_end > self.mapped {
            let base = NonNull::new(self.mapped as *mut c_void).unwrap();
            self.mapper.allocate_meta(base, p_end - self.mapped)?;
            self.mapped = p_end;
        }

        Ok(NonNull::new(p as *mut c_void).unwrap())
    }

    /// Attempts a sequence of reservation sizes via `reserve_aligned`.
    ///
    /// `reserve`/`reserve_region` pass no placement hint to `mmap`, so a
    /// freshly-reserved range lands at an address of the kernel's
    /// choosing, unrelated to the arena's current `end`. Treating that
    /// range as an in-place extension of the old reservation would let
    /// `alloc` hand out addresses spanning an unreserved gap between the
    /// two. Every successful reservation therefore replaces the arena
    /// wholesale rather than being appended to it, abandoning whatever
    /// tail remained in the previous reservation.
    pub fn expand(&mut self, align: usize) -> Result<()> {
        let mut last_err = Error::OutOfMemory(0);

        for &size in ARENA_SIZES.iter() {
            match self.reserve_aligned(size, align) {
                Ok((base, reserved)) => {
                    let base = base.as_ptr() as usize;
                    self.next = base;
                    self.mapped = base;
                    self.end = base + reserved;
                    return Ok(());
                }
                Err(e) => last_err = e,
            }
        }

        Err(last_err)
    }

    /// Reserves `size+align` bytes, returns the aligned sub-range, and
    /// releases the unaligned head and tail.
    fn reserve_aligned(&self, size: usize, align: usize) -> Result<(NonNull<c_void>, usize)> {
        let (base, reserved) = self.mapper.reserve(size + align)?;
        let p = base.as_ptr() as usize;

        if p & (align - 1) == 0 {
            return Ok((base, reserved));
        }

        let p_aligned = round_up(p, align);
        let head = p_aligned - p;
        if head > 0 {
            self.mapper
                .release(base, head)
                .map_err(|_| Error::Internal("failed to release unaligned head"))?;
        }

        let end = p_aligned + size;
        let tail = (p + size + align) - end;
        if tail > 0 {
            let tail_base = NonNull::new(end as *mut c_void).unwrap();
            self.mapper
                .release(tail_base, tail)
                .map_err(|_| Error::Internal("failed to release unaligned tail"))?;
        }

        Ok((NonNull::new(p_aligned as *mut c_void).unwrap(), size))
    }
}

fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_then_alloc() {
        let mapper = crate::mapper::get_mapper(None).unwrap();
        let mut arena = LinearArena::new(mapper);

        arena.expand(mapper.page_size()).unwrap();
        assert!(arena.remaining() > 0);

        let a = arena.alloc(64, 8).unwrap();
        let b = arena.alloc(64, 8).unwrap();
        assert_ne!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn alloc_before_expand_fails() {
        let mapper = crate::mapper::get_mapper(None).unwrap();
        let mut arena = LinearArena::new(mapper);

        assert!(matches!(arena.alloc(8, 8), Err(Error::OutOfReservation)));
    }

    #[test]
    fn round_up_is_idempotent() {
        assert_eq!(round_up(0, 8), 0);
        assert_eq!(round_up(1, 8), 8);
        assert_eq!(round_up(8, 8), 8);
        assert_eq!(round_up(9, 8), 16);
    }
}
