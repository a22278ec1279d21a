//! Cache Entry Module
//!
//! Metadata envelope that the manager keeps next to every cached query for
//! eviction bookkeeping.

use std::sync::Arc;
use std::time::Instant;

use crate::query::CachedQuery;

// == Cache Entry ==
/// A cached query plus its access metadata.
#[derive(Clone)]
pub struct CacheEntry {
    /// The cached query (type-erased)
    pub query: Arc<dyn CachedQuery>,
    /// When the entry was inserted
    pub created_at: Instant,
    /// Last cache hit (or insertion)
    pub last_accessed_at: Instant,
    /// Starts at 1, incremented on every hit
    pub access_count: u64,
    /// Heuristic footprint in bytes
    pub estimated_size_bytes: usize,
    /// Insertion order, breaks ties between equal creation instants
    pub(crate) created_seq: u64,
    /// Access order, breaks ties between equal access instants
    pub(crate) accessed_seq: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry for a freshly inserted query.
    pub fn new(query: Arc<dyn CachedQuery>, estimated_size_bytes: usize, seq: u64) -> Self {
        let now = Instant::now();
        Self {
            query,
            created_at: now,
            last_accessed_at: now,
            access_count: 1,
            estimated_size_bytes,
            created_seq: seq,
            accessed_seq: seq,
        }
    }

    // == Record Access ==
    /// Updates access metadata on a cache hit.
    pub fn record_access(&mut self, seq: u64) {
        self.last_accessed_at = Instant::now();
        self.access_count += 1;
        self.accessed_seq = seq;
    }

    pub fn key(&self) -> &str {
        self.query.key()
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.query.key())
            .field("access_count", &self.access_count)
            .field("estimated_size_bytes", &self.estimated_size_bytes)
            .finish()
    }
}
