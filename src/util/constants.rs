//! Sizes and limits shared across the crate.

const LOG_BITS_IN_BYTE: u8 = 3;

/// log2 of the number of bytes in a megabyte
pub const LOG_BYTES_IN_MBYTE: u8 = 20;
/// The number of bytes in a megabyte
pub const BYTES_IN_MBYTE: usize = 1 << LOG_BYTES_IN_MBYTE;

/// log2 of the number of bytes in a word
#[cfg(target_pointer_width = "64")]
pub const LOG_BYTES_IN_WORD: u8 = 3;
/// log2 of the number of bytes in a word
#[cfg(target_pointer_width = "32")]
pub const LOG_BYTES_IN_WORD: u8 = 2;
/// The number of bytes in a word
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;
/// log2 of the number of bits in a word
pub const LOG_BITS_IN_WORD: usize = LOG_BITS_IN_BYTE as usize + LOG_BYTES_IN_WORD as usize;
/// The number of bits in a word
pub const BITS_IN_WORD: usize = 1 << LOG_BITS_IN_WORD;

/// Every object occupies at least two words: the forwarding word and one header word.
pub const MIN_OBJECT_WORDS: usize = 2;
/// Objects start at and span multiples of this many bytes, so every gap left in a region can be
/// filled with a dummy object.
pub const OBJECT_ALIGNMENT: usize = MIN_OBJECT_WORDS * BYTES_IN_WORD;

/// The number of distinct object ages the age table tracks.
pub const TABLE_SIZE_AGES: usize = 16;
/// Upper bound for `max_tenuring_threshold`.
pub const MAX_AGE: usize = TABLE_SIZE_AGES - 1;

/// Survivor space is sized as a fraction (1 / SURVIVOR_RATIO) of the young generation.
pub const SURVIVOR_RATIO: usize = 8;

/// log2 of the default task queue capacity on 64-bit platforms.
#[cfg(target_pointer_width = "64")]
pub const LOG_TASKQUEUE_SIZE: usize = 17;
#[cfg(target_pointer_width = "32")]
pub const LOG_TASKQUEUE_SIZE: usize = 14;
/// The default task queue capacity.
pub const TASKQUEUE_SIZE: usize = 1 << LOG_TASKQUEUE_SIZE;

/// Number of elements in one overflow stack segment.
pub const OVERFLOW_SEGMENT_SIZE: usize = 4096;
/// Number of freed overflow stack segments kept for reuse.
pub const OVERFLOW_MAX_CACHE_SIZE: usize = 4;
