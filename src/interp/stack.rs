//! Stack headroom for nested frames
//!
//! Every `load`/`require` issued from a module body re-enters [`invoke`]
//! several Rust calls deeper, so a chain of nested modules can use far more
//! native stack than plain function calls. Frames are entered through
//! [`ensure_sufficient_stack`], which switches to a freshly allocated
//! segment when the current one runs low. The frame cap then decides how
//! deep execution goes, whatever the size of the thread's stack.
//!
//! [`invoke`]: super::invoke

/// Grow when less than this remains
const RED_ZONE: usize = 128 * 1024;

/// Size of each new segment
const SEGMENT_SIZE: usize = 1024 * 1024;

#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, SEGMENT_SIZE, f)
}

#[inline]
#[cfg(target_arch = "wasm32")]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}
