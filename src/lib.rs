//! RGC is a toolkit for region-based, concurrent, evacuating garbage collection.
//!
//! It provides the parts such a collector is built from, and two collectors built from them:
//!
//! * work-stealing task queues with overflow stacks and a termination protocol,
//! * a card table and a remembered set fed by a post-write barrier,
//! * SATB logging for concurrent marking,
//! * a load-reference barrier that resolves and evacuates objects in the collection set,
//! * weak canonicalizing tables, root handles and safepoint synchronization,
//! * a generational collector with stop-the-world young collections, and a concurrent
//!   mark-evacuate-update cycle.
//!
//! A VM binding implements the traits in [`vm`] and drives the collector through
//! [`memory_manager`].

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

pub(crate) mod build_info;
pub mod memory_manager;
pub mod plan;
pub mod policy;
mod rgc;
pub mod scheduler;
pub mod util;
pub mod vm;

pub use crate::plan::{AllocationError, CycleOutcome, Mutator, MutatorScope};
pub use crate::rgc::{RGCBuilder, RGC};
