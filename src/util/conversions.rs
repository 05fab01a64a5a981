use crate::util::constants::*;

/* Alignment */

pub const fn raw_align_up(val: usize, align: usize) -> usize {
    // See https://github.com/rust-lang/rust/blob/e620d0f337d0643c757bab791fc7d88d63217704/src/libcore/alloc.rs#L192
    val.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
}

pub const fn raw_align_down(val: usize, align: usize) -> usize {
    val & !align.wrapping_sub(1)
}

pub const fn raw_is_aligned(val: usize, align: usize) -> bool {
    val & align.wrapping_sub(1) == 0
}

/* Conversion */

pub const fn bytes_to_words(bytes: usize) -> usize {
    bytes >> LOG_BYTES_IN_WORD
}

pub const fn words_to_bytes(words: usize) -> usize {
    words << LOG_BYTES_IN_WORD
}

/// Round an allocation request up to the object granularity.
pub const fn align_object_words(words: usize) -> usize {
    let words = if words < MIN_OBJECT_WORDS {
        MIN_OBJECT_WORDS
    } else {
        words
    };
    raw_align_up(words, MIN_OBJECT_WORDS)
}

#[cfg(test)]
mod tests {
    use crate::util::conversions::*;

    #[test]
    fn test_raw_align() {
        assert_eq!(raw_align_up(0x123, 0x100), 0x200);
        assert_eq!(raw_align_down(0x123, 0x100), 0x100);
        assert!(raw_is_aligned(0x200, 0x100));
        assert!(!raw_is_aligned(0x201, 0x100));
    }

    #[test]
    fn test_object_words() {
        assert_eq!(align_object_words(0), MIN_OBJECT_WORDS);
        assert_eq!(align_object_words(1), MIN_OBJECT_WORDS);
        assert_eq!(align_object_words(2), 2);
        assert_eq!(align_object_words(3), 4);
        assert_eq!(words_to_bytes(bytes_to_words(64)), 64);
    }
}
