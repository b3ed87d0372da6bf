//! Dense bit arrays used by a slab: the allocation bitmap (consulted
//! on the fast path) and the GC-mark bitmap (set on free, consumed on
//! sweep). Bit `i` corresponds to the object at `slab.base +
//! i*element_size`.
use std::sync::atomic::{AtomicU8, Ordering};

// deBruijn sequence for 64-bit trailing-zero count by multiply-shift,
// same construction as the source's `Ctz64`.
const DEBRUIJN64: u64 = 0x03f7_9d71_b4ca_8b09;

#[rustfmt::skip]
const DEBRUIJN_IDX64: [u8; 64] = [
    0, 1, 56, 2, 57, 49, 28, 3, 61, 58, 42, 50, 38, 29, 17, 4,
    62, 47, 59, 15, 43, 51, 36, 30, 22, 18, 12, 5, 25, 63, 60, 41,
    37, 16, 46, 14, 35, 21, 11, 24, 40, 45, 13, 34, 20, 10, 39, 44,
    33, 19, 9, 32, 8, 31, 7, 6, 55, 54, 53, 52, 27, 26, 23, 48,
];

/// Count of trailing zero bits in `x`, via deBruijn multiply-shift.
/// Returns 64 if `x == 0`.
pub fn trailing_zeros_64(x: u64) -> u32 {
    if x == 0 {
        return 64;
    }
    let isolated = x & x.wrapping_neg();
    let idx = (isolated.wrapping_mul(DEBRUIJN64)) >> 58;
    DEBRUIJN_IDX64[idx as usize] as u32
}

/// A dense bit array sized to a slab's element count, one byte per 8
/// objects.
pub struct GcBits {
    bytes: Vec<AtomicU8>,
}

impl GcBits {
    pub fn new(n_bits: usize) -> Self {
        let n_bytes = (n_bits + 7) / 8;
        let mut bytes = Vec::with_capacity(n_bytes);
        bytes.resize_with(n_bytes, || AtomicU8::new(0));
        GcBits { bytes }
    }

    fn byte_and_mask(&self, index: usize) -> (&AtomicU8, u8) {
        (&self.bytes[index / 8], 1u8 << (index % 8))
    }

    pub fn is_marked(&self, index: usize) -> bool {
        let (byte, mask) = self.byte_and_mask(index);
        byte.load(Ordering::Relaxed) & mask != 0
    }

    pub fn set_marked(&self, index: usize) {
        let (byte, mask) = self.byte_and_mask(index);
        byte.fetch_or(mask, Ordering::Relaxed);
    }

    pub fn clear_marked(&self, index: usize) {
        let (byte, mask) = self.byte_and_mask(index);
        byte.fetch_and(!mask, Ordering::Relaxed);
    }

    pub fn popcount(&self, n_bits: usize) -> usize {
        let mut count = 0usize;
        for i in 0..n_bits {
            if self.is_marked(i) {
                count += 1;
            }
        }
        count
    }

    pub fn clear_all(&self) {
        for b in &self.bytes {
            b.store(0, Ordering::Relaxed);
        }
    }

    pub fn copy_from(&self, other: &GcBits) {
        for (mine, theirs) in self.bytes.iter().zip(other.bytes.iter()) {
            mine.store(theirs.load(Ordering::Relaxed), Ordering::Relaxed);
        }
    }

    /// Reads 8 consecutive bytes starting at the byte index for
    /// `bit_offset` and builds a little-endian `u64` from them. Used
    /// against a bitmap whose convention is "1 bit means free", so the
    /// result can be consumed directly by a trailing-zero-count scan.
    pub fn refill_alloc_cache(&self, bit_offset: usize) -> u64 {
        let byte_idx = bit_offset / 8;
        let mut buf = [0u8; 8];
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = self
                .bytes
                .get(byte_idx + i)
                .map(|b| b.load(Ordering::Relaxed))
                .unwrap_or(0);
        }
        u64::from_le_bytes(buf)
    }

    /// A bit array where every bit up to `n_bits` starts set (used for
    /// the allocation bitmap, whose "free" convention needs every slot
    /// to start marked free).
    pub fn new_all_free(n_bits: usize) -> Self {
        let bits = GcBits::new(n_bits);
        for i in 0..n_bits {
            bits.set_marked(i);
        }
        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_zeros_matches_naive() {
        for shift in 0..64u32 {
            let x = 1u64 << shift;
            assert_eq!(trailing_zeros_64(x), shift);
        }
        assert_eq!(trailing_zeros_64(0), 64);
        assert_eq!(trailing_zeros_64(0b1100), 2);
    }

    #[test]
    fn mark_and_query() {
        let bits = GcBits::new(80);
        assert!(!bits.is_marked(5));
        bits.set_marked(5);
        assert!(bits.is_marked(5));
        bits.clear_marked(5);
        assert!(!bits.is_marked(5));
    }

    #[test]
    fn refill_alloc_cache_reads_bits_directly() {
        let bits = GcBits::new(128);
        bits.set_marked(0);
        bits.set_marked(3);

        let cache = bits.refill_alloc_cache(0);
        assert_eq!(cache & 1, 1);
        assert_eq!((cache >> 1) & 1, 0);
        assert_eq!((cache >> 3) & 1, 1);
    }

    #[test]
    fn new_all_free_starts_with_every_bit_set() {
        let bits = GcBits::new_all_free(70);
        assert_eq!(bits.popcount(70), 70);
    }

    #[test]
    fn popcount_matches_manual_count() {
        let bits = GcBits::new(100);
        for i in [1, 6, 3, 2, 10, 80] {
            bits.set_marked(i);
        }
        assert_eq!(bits.popcount(100), 6);
    }
}
