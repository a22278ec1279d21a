//! Cache Module
//!
//! Bounded query storage: entry metadata, eviction policies, size estimation,
//! statistics and the manager that ties them together.

mod entry;
mod eviction;
mod manager;
mod size;
mod stats;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::CacheEntry;
pub use eviction::{EvictionPolicy, EvictionPriority};
pub use manager::{CacheManager, CacheManagerBuilder, CleanupReport};
pub use size::{
    SerializedSizeEstimator, SizeEstimator, BASE_ENTRY_COST, ELEMENT_SIZE, OPAQUE_DATA_SIZE,
};
pub use stats::CacheStats;
