//! Size estimation for cache entries.
//!
//! Estimates are heuristics, not byte-exact accounting. They only need to be
//! cheap and to grow with the payload.

use crate::query::{CachedQuery, DataFootprint};

/// Fixed overhead charged for every entry.
pub const BASE_ENTRY_COST: usize = 256;

/// Charged per leaf value or map key when data has no JSON form.
pub const ELEMENT_SIZE: usize = 16;

/// Charged for data whose `Serialize` impl fails.
pub const OPAQUE_DATA_SIZE: usize = 1024;

/// Pluggable size estimation strategy.
pub trait SizeEstimator: Send + Sync {
    fn estimate(&self, key: &str, query: &dyn CachedQuery) -> usize;
}

/// Base cost + data size + error message length + key length.
///
/// Data size is the JSON length when the payload has a JSON form, otherwise
/// proportional to its element count.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerializedSizeEstimator;

impl SizeEstimator for SerializedSizeEstimator {
    fn estimate(&self, key: &str, query: &dyn CachedQuery) -> usize {
        let data = match query.data_footprint() {
            DataFootprint::Empty => 0,
            DataFootprint::Serialized(len) => len,
            DataFootprint::Elements(count) => count.saturating_mul(ELEMENT_SIZE),
            DataFootprint::Opaque => OPAQUE_DATA_SIZE,
        };
        let error = query.error_message().map_or(0, |msg| msg.len());
        BASE_ENTRY_COST + data + error + key.len()
    }
}
