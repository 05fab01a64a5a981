//! Memory policies. The collector manages a single region-based space.

pub mod region;
