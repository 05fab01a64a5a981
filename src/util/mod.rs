//! Utilities used by the rest of the crate: addresses, options, queues of buffered pointers,
//! object copying, and the tables that hold roots and weak references.

/// Address and object reference types.
pub mod address;
/// Constants used by the collector.
pub mod constants;
/// Calculation, conversion and rounding for memory related numbers.
pub mod conversions;
/// Per-thread copy contexts and evacuation statistics.
pub mod copy;
/// Wrapper functions for the `log` crate.
pub mod logger;
/// Reserved heap memory and raw word access.
pub mod memory;
/// The forwarding word protocol.
pub mod object_forwarding;
/// Options for the collector.
pub mod options;
/// Per-thread pointer buffers and the sets that collect them.
pub mod ptr_queue;
/// Root handles.
pub mod roots;
/// Rust utilities.
pub mod rust_util;
/// Safepoint synchronization.
pub mod safepoint;
/// Test utilities. We need this module for `MockVM` in criterion benches, which does not include code with `cfg(test)`.
#[cfg(any(test, feature = "mock_test"))]
pub mod test_util;
/// Weak canonicalizing tables.
pub mod weak_table;

pub use self::address::Address;
pub use self::address::ObjectReference;
