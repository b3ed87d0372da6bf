// Generated offline (not by the Rust toolchain) from a geometric size
// schedule and a per-run waste-minimizing page-count search; divide-magic
// constants computed with the standard unsigned-division-by-constant
// algorithm and brute-force verified in `constants::tests`. See DESIGN.md.
use crate::constants::DivMagic;

pub const N_SIZE_CLASSES: usize = 68;

pub const CLASS_TO_SIZE: [u32; N_SIZE_CLASSES] = [
    0, 8, 16, 24, 32, 40, 48, 56, 64, 72, 80, 88, 96, 112, 128, 144, 160, 176, 200, 224, 248, 272,
    304, 336, 376, 416, 464, 512, 576, 640, 704, 784, 864, 960, 1056, 1168, 1296, 1440, 1584,
    1744, 1920, 2112, 2368, 2624, 2944, 3264, 3648, 4032, 4480, 4928, 5440, 6016, 6656, 7360,
    8128, 8960, 9984, 11008, 12288, 13568, 15104, 16640, 18432, 20480, 22528, 24832, 27392, 30208,
];

pub const CLASS_TO_ALLOC_NPAGES: [u32; N_SIZE_CLASSES] = [
    0, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 2, 1, 2, 3, 1, 2, 2, 1, 1, 3, 2, 2, 3, 5, 1, 1, 5, 4, 3, 3, 5, 2, 9, 5, 5,
    3, 10, 7, 4,
];

pub const CLASS_TO_DIVMAGIC: [DivMagic; N_SIZE_CLASSES] = [
    DivMagic { shift: 0, mul: 0, shift2: 0, base_mask: 0, add: false },
    DivMagic { shift: 3, mul: 0, shift2: 0, base_mask: 1, add: false },
    DivMagic { shift: 4, mul: 0, shift2: 0, base_mask: 1, add: false },
    DivMagic { shift: 0, mul: 2863311531, shift2: 4, base_mask: 0, add: false },
    DivMagic { shift: 5, mul: 0, shift2: 0, base_mask: 1, add: false },
    DivMagic { shift: 0, mul: 3435973837, shift2: 5, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 2863311531, shift2: 5, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 613566757, shift2: 6, base_mask: 0, add: true },
    DivMagic { shift: 6, mul: 0, shift2: 0, base_mask: 1, add: false },
    DivMagic { shift: 0, mul: 954437177, shift2: 4, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 3435973837, shift2: 6, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 3123612579, shift2: 6, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 2863311531, shift2: 6, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 613566757, shift2: 7, base_mask: 0, add: true },
    DivMagic { shift: 7, mul: 0, shift2: 0, base_mask: 1, add: false },
    DivMagic { shift: 0, mul: 954437177, shift2: 5, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 3435973837, shift2: 7, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 3123612579, shift2: 7, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 1374389535, shift2: 6, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 613566757, shift2: 8, base_mask: 0, add: true },
    DivMagic { shift: 0, mul: 138547333, shift2: 8, base_mask: 0, add: true },
    DivMagic { shift: 0, mul: 4042322161, shift2: 8, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 2938661835, shift2: 9, base_mask: 0, add: true },
    DivMagic { shift: 0, mul: 2249744775, shift2: 9, base_mask: 0, add: true },
    DivMagic { shift: 0, mul: 2924233053, shift2: 8, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 1321528399, shift2: 7, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 2369637129, shift2: 8, base_mask: 0, add: false },
    DivMagic { shift: 9, mul: 0, shift2: 0, base_mask: 1, add: false },
    DivMagic { shift: 0, mul: 954437177, shift2: 7, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 3435973837, shift2: 9, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 3123612579, shift2: 9, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 1402438301, shift2: 8, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 795364315, shift2: 10, base_mask: 0, add: true },
    DivMagic { shift: 0, mul: 2290649225, shift2: 9, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 1041204193, shift2: 8, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 3235934265, shift2: 11, base_mask: 0, add: true },
    DivMagic { shift: 0, mul: 3393554407, shift2: 10, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 1813430637, shift2: 11, base_mask: 0, add: true },
    DivMagic { shift: 0, mul: 2776544515, shift2: 10, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 748664025, shift2: 11, base_mask: 0, add: true },
    DivMagic { shift: 0, mul: 2290649225, shift2: 10, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 1041204193, shift2: 9, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 3134165325, shift2: 12, base_mask: 0, add: true },
    DivMagic { shift: 0, mul: 3352169597, shift2: 11, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 2987803337, shift2: 11, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 2694881441, shift2: 11, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 527452125, shift2: 12, base_mask: 0, add: true },
    DivMagic { shift: 0, mul: 68174085, shift2: 12, base_mask: 0, add: true },
    DivMagic { shift: 0, mul: 3558687189, shift2: 13, base_mask: 0, add: true },
    DivMagic { shift: 0, mul: 892460737, shift2: 10, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 3233857729, shift2: 12, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 2924233053, shift2: 12, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 1321528399, shift2: 11, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 485518043, shift2: 13, base_mask: 0, add: true },
    DivMagic { shift: 0, mul: 33818641, shift2: 13, base_mask: 0, add: true },
    DivMagic { shift: 0, mul: 3558687189, shift2: 14, base_mask: 0, add: true },
    DivMagic { shift: 0, mul: 2753184165, shift2: 14, base_mask: 0, add: true },
    DivMagic { shift: 0, mul: 799063683, shift2: 11, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 2863311531, shift2: 13, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 891408307, shift2: 14, base_mask: 0, add: true },
    DivMagic { shift: 0, mul: 582368447, shift2: 11, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 4228890877, shift2: 14, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 954437177, shift2: 12, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 3435973837, shift2: 14, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 3123612579, shift2: 14, base_mask: 0, add: false },
    DivMagic { shift: 0, mul: 1372618415, shift2: 15, base_mask: 0, add: true },
    DivMagic { shift: 0, mul: 842937507, shift2: 15, base_mask: 0, add: true },
    DivMagic { shift: 0, mul: 582368447, shift2: 12, base_mask: 0, add: false },
];

/// Largest size served by the small-object path; one byte past this
/// goes through `alloc_raw_slab` (class 0).
pub const MAX_SMALL_SIZE: usize = 30208;

pub const SMALL_STEP: usize = 8;
pub const SMALL_MAX: usize = 1016;
pub const LARGE_STEP: usize = 128;

/// `size_to_class_small[ceil(size / SMALL_STEP)]` for `size in 1..=SMALL_MAX`.
pub const SIZE_TO_CLASS_SMALL: [u8; 128] = [
    1, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 13, 14, 14, 15, 15, 16, 16, 17, 17, 18, 18, 18,
    19, 19, 19, 20, 20, 20, 21, 21, 21, 22, 22, 22, 22, 23, 23, 23, 23, 24, 24, 24, 24, 24, 25, 25,
    25, 25, 25, 26, 26, 26, 26, 26, 26, 27, 27, 27, 27, 27, 27, 28, 28, 28, 28, 28, 28, 28, 28, 29,
    29, 29, 29, 29, 29, 29, 29, 30, 30, 30, 30, 30, 30, 30, 30, 31, 31, 31, 31, 31, 31, 31, 31, 31,
    31, 32, 32, 32, 32, 32, 32, 32, 32, 32, 32, 33, 33, 33, 33, 33, 33, 33, 33, 33, 33, 33, 33, 34,
    34, 34, 34, 34, 34, 34,
];

/// `size_to_class_large[ceil((size - SMALL_MAX) / LARGE_STEP)]` for
/// `size in SMALL_MAX+1 ..= MAX_SMALL_SIZE`.
pub const SIZE_TO_CLASS_LARGE: [u8; 230] = [
    34, 35, 36, 37, 38, 39, 40, 40, 41, 42, 42, 43, 43, 44, 44, 44, 45, 45, 46, 46, 46, 47, 47, 47,
    48, 48, 48, 48, 49, 49, 49, 50, 50, 50, 50, 51, 51, 51, 51, 51, 52, 52, 52, 52, 52, 53, 53, 53,
    53, 53, 54, 54, 54, 54, 54, 54, 55, 55, 55, 55, 55, 55, 55, 56, 56, 56, 56, 56, 56, 56, 56, 57,
    57, 57, 57, 57, 57, 57, 57, 58, 58, 58, 58, 58, 58, 58, 58, 58, 58, 59, 59, 59, 59, 59, 59, 59,
    59, 59, 59, 60, 60, 60, 60, 60, 60, 60, 60, 60, 60, 60, 60, 61, 61, 61, 61, 61, 61, 61, 61, 61,
    61, 61, 61, 62, 62, 62, 62, 62, 62, 62, 62, 62, 62, 62, 62, 62, 62, 63, 63, 63, 63, 63, 63, 63,
    63, 63, 63, 63, 63, 63, 63, 63, 63, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64, 64,
    64, 65, 65, 65, 65, 65, 65, 65, 65, 65, 65, 65, 65, 65, 65, 65, 65, 65, 65, 66, 66, 66, 66, 66,
    66, 66, 66, 66, 66, 66, 66, 66, 66, 66, 66, 66, 66, 66, 66, 67, 67, 67, 67, 67, 67, 67, 67, 67,
    67, 67, 67, 67, 67, 67, 67, 67, 67, 67, 67, 67, 67, 67,
];
