//! Small helpers the standard library does not provide on stable Rust.

/// Calling a `#[cold]` function on one side of a branch is the stable way to tell the compiler
/// which side is rare.
#[cold]
fn cold() {}

/// Hint that `b` is usually true.
#[inline(always)]
pub fn likely(b: bool) -> bool {
    if !b {
        cold();
    }
    b
}

/// Hint that `b` is usually false.
#[inline(always)]
pub fn unlikely(b: bool) -> bool {
    if b {
        cold();
    }
    b
}
