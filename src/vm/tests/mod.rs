// All the tests with prefix 'mock_test_' and with the feature 'mock_test' use MockVM and create
// RGC instances. Each test builds its own instance with the fixtures in
// `crate::util::test_util::fixtures`. Instances are leaked, so tests run serially to keep the
// number of reserved heaps and worker threads small.

#[cfg(feature = "mock_test")]
mod mock_test_prelude {
    pub use crate::memory_manager;
    pub use crate::util::test_util::fixtures::*;
    pub use crate::util::test_util::mock_vm::*;
    pub use crate::util::test_util::serial_test;
    pub use crate::vm::*;
    pub use crate::{AllocationError, CycleOutcome};
}

#[cfg(feature = "mock_test")]
mod mock_test_concurrent_cycle;
#[cfg(feature = "mock_test")]
mod mock_test_evacuation_failure;
#[cfg(feature = "mock_test")]
mod mock_test_promotion;
#[cfg(feature = "mock_test")]
mod mock_test_weak_tables;
