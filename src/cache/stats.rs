//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, evictions and
//! expirations.

use chrono::{DateTime, Utc};
use serde::Serialize;

// == Cache Stats ==
/// Point-in-time snapshot of cache metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Current number of cached queries
    pub query_count: usize,
    /// Sum of estimated entry sizes in bytes
    pub memory_bytes: usize,
    /// Lookups that found a query
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Removals forced by count or memory bounds
    pub evictions: u64,
    /// Removals of disposed or idle stale queries during cleanup
    pub expirations: u64,
    /// Completion time of the last cleanup run
    pub last_cleanup: Option<DateTime<Utc>>,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Ratio ==
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    // == Ratios To Limits ==
    /// Query count relative to `limit`, or 0.0 when unlimited.
    pub fn query_ratio(&self, limit: usize) -> f64 {
        ratio(self.query_count, limit)
    }

    /// Memory usage relative to `limit`, or 0.0 when unlimited.
    pub fn memory_ratio(&self, limit: usize) -> f64 {
        ratio(self.memory_bytes, limit)
    }

    // == Recorders ==
    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }
}

fn ratio(value: usize, limit: usize) -> f64 {
    if limit == 0 {
        0.0
    } else {
        value as f64 / limit as f64
    }
}
