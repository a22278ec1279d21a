//! Query Module
//!
//! A single cached item: data/error/status, staleness clock, change stream
//! and expiry timers.

mod cached;
mod elements;
mod handle;
mod state;
mod timers;

pub use cached::{CachedQuery, DataFootprint};
pub use handle::{ExpiryCallback, Query, QueryData, QueryStream};
pub use state::{
    QueryOptions, QuerySnapshot, QueryState, QueryStatus, DEFAULT_CACHE_TIME, DEFAULT_STALE_TIME,
};
