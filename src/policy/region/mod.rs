//! Region-based heap: regions, the side tables that cover them, and allocation.

pub mod card_table;
pub mod collection_set;
pub mod free_set;
pub mod lab;
pub mod marking_context;
#[allow(clippy::module_inception)]
pub mod region;
pub mod region_space;
pub mod remset;

pub use self::lab::LocalAllocBuffer;
pub use self::region::{Affiliation, Region, RegionState};
pub use self::region_space::RegionSpace;
