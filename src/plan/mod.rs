//! The collectors and the mutator-side half of the collection protocol.
//!
//! Two collector modes share one heap layout:
//!
//! * Generational: mutators allocate young regions. Young collections evacuate them in a pause,
//!   using the card table to find old-to-young references. Concurrent cycles collect old
//!   regions.
//! * Concurrent: mutators allocate old regions directly and only concurrent cycles run. The
//!   card table is not maintained.

pub mod barriers;
pub mod concurrent;
pub mod gc_state;
pub mod generational;
mod mutator_context;
pub mod satb;
pub(crate) mod tracing;

pub use self::barriers::RegionalBarrier;
pub use self::concurrent::CycleOutcome;
pub use self::generational::YoungCollectionSummary;
pub use self::mutator_context::{AllocationError, Mutator, MutatorScope};
