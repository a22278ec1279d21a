//! Cache Manager Module
//!
//! Owns the key -> entry table, enforces count and memory bounds through the
//! configured eviction policy, tracks statistics and runs cleanup sweeps.
//!
//! Locking: the table lock may be held while calling into a query, never the
//! other way round.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::cache::{CacheEntry, CacheStats, EvictionPriority, SerializedSizeEstimator, SizeEstimator};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::pressure::MemoryPressureCoordinator;
use crate::query::CachedQuery;
use crate::tasks::spawn_cleanup_task;

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

// == Cleanup Report ==
/// Outcome of one cleanup run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Disposed or idle stale queries removed
    pub expired: usize,
    /// Queries removed to get back under the bounds
    pub evicted: usize,
}

impl CleanupReport {
    pub fn removed(&self) -> usize {
        self.expired + self.evicted
    }
}

#[derive(Debug, Clone, Copy)]
enum Overage {
    Count(usize),
    Bytes(usize),
}

struct CacheTable {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
    seq: u64,
}

impl CacheTable {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn memory_bytes(&self) -> usize {
        self.entries.values().map(|e| e.estimated_size_bytes).sum()
    }
}

// == Cache Manager ==
/// Bounded query cache with pluggable eviction.
pub struct CacheManager {
    id: u64,
    config: CacheConfig,
    estimator: Arc<dyn SizeEstimator>,
    coordinator: Option<Arc<MemoryPressureCoordinator>>,
    /// Reference point for time-based eviction priorities
    origin: Instant,
    table: Mutex<CacheTable>,
    disposed: AtomicBool,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

// == Builder ==
/// Assembles a [`CacheManager`] with a custom estimator or coordinator.
pub struct CacheManagerBuilder {
    config: CacheConfig,
    estimator: Arc<dyn SizeEstimator>,
    coordinator: Option<Arc<MemoryPressureCoordinator>>,
}

impl CacheManagerBuilder {
    /// Replaces the default serialization-based size estimator.
    pub fn estimator(mut self, estimator: Arc<dyn SizeEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Registers with `coordinator` instead of the process-wide one.
    pub fn coordinator(mut self, coordinator: Arc<MemoryPressureCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Skips memory-pressure registration entirely.
    pub fn without_coordinator(mut self) -> Self {
        self.coordinator = None;
        self
    }

    /// Validates the config, registers for memory pressure if enabled and
    /// starts the periodic cleanup task when a runtime is available.
    pub fn build(self) -> Result<Arc<CacheManager>> {
        self.config.validate()?;

        let coordinator = if self.config.enable_memory_pressure_handling {
            self.coordinator
        } else {
            None
        };
        let cleanup_interval = self.config.cleanup_interval;

        let manager = Arc::new(CacheManager {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            config: self.config,
            estimator: self.estimator,
            coordinator,
            origin: Instant::now(),
            table: Mutex::new(CacheTable {
                entries: HashMap::new(),
                stats: CacheStats::new(),
                seq: 0,
            }),
            disposed: AtomicBool::new(false),
            cleanup_task: Mutex::new(None),
        });

        if let Some(coordinator) = &manager.coordinator {
            coordinator.register(&manager);
        }

        if cleanup_interval > Duration::ZERO {
            *manager.cleanup_task.lock() =
                spawn_cleanup_task(Arc::downgrade(&manager), cleanup_interval);
        }

        debug!(
            manager = manager.id,
            policy = %manager.config.eviction_policy,
            max_queries = manager.config.max_queries,
            max_memory_bytes = manager.config.max_memory_bytes,
            "Cache manager created"
        );
        Ok(manager)
    }
}

impl CacheManager {
    // == Constructors ==
    /// Creates a manager using the process-wide memory-pressure coordinator.
    pub fn new(config: CacheConfig) -> Result<Arc<Self>> {
        Self::builder(config).build()
    }

    pub fn builder(config: CacheConfig) -> CacheManagerBuilder {
        CacheManagerBuilder {
            config,
            estimator: Arc::new(SerializedSizeEstimator),
            coordinator: Some(MemoryPressureCoordinator::global()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_disposed() {
            Err(CacheError::Disposed)
        } else {
            Ok(())
        }
    }

    // == Add ==
    /// Inserts or replaces the entry for `key`, then re-enforces the bounds.
    ///
    /// A replaced query is disposed unless it is the same query.
    pub fn add_query(&self, key: impl Into<String>, query: Arc<dyn CachedQuery>) -> Result<()> {
        self.ensure_active()?;
        let key = key.into();
        let mut table = self.table.lock();

        let size = self.estimator.estimate(&key, query.as_ref());
        let seq = table.next_seq();
        let entry = CacheEntry::new(query.clone(), size, seq);
        if let Some(previous) = table.entries.insert(key.clone(), entry) {
            if !previous.query.same_query(query.as_ref()) {
                previous.query.dispose();
            }
        }
        trace!(key = %key, size, "Query added to cache");

        if self.config.has_limits() {
            self.enforce_limits(&mut table, Some(key.as_str()));
        }
        Ok(())
    }

    // == Get ==
    /// Looks up `key`, recording a hit (and access metadata) or a miss.
    pub fn get_query(&self, key: &str) -> Option<Arc<dyn CachedQuery>> {
        let mut table = self.table.lock();
        let seq = table.next_seq();
        match table.entries.get_mut(key) {
            Some(entry) => {
                entry.record_access(seq);
                let query = entry.query.clone();
                table.stats.record_hit();
                Some(query)
            }
            None => {
                table.stats.record_miss();
                None
            }
        }
    }

    // == Get Or Insert ==
    /// Atomic get-or-create. A disposed query left in the table is replaced
    /// and counted as an expiration.
    pub fn get_or_insert_with<F>(&self, key: &str, make: F) -> Result<Arc<dyn CachedQuery>>
    where
        F: FnOnce() -> Arc<dyn CachedQuery>,
    {
        self.ensure_active()?;
        let mut table = self.table.lock();
        let seq = table.next_seq();

        if let Some(entry) = table.entries.get_mut(key) {
            if !entry.query.is_disposed() {
                entry.record_access(seq);
                let query = entry.query.clone();
                table.stats.record_hit();
                debug!(key, "Cache hit");
                return Ok(query);
            }
            table.entries.remove(key);
            table.stats.record_expiration();
        }

        table.stats.record_miss();
        debug!(key, "Cache miss, creating query");
        let query = make();
        let size = self.estimator.estimate(key, query.as_ref());
        table
            .entries
            .insert(key.to_string(), CacheEntry::new(query.clone(), size, seq));

        if self.config.has_limits() {
            self.enforce_limits(&mut table, Some(key));
        }
        Ok(query)
    }

    // == Peek ==
    /// Looks up `key` without touching statistics or access metadata.
    pub fn peek(&self, key: &str) -> Option<Arc<dyn CachedQuery>> {
        self.table.lock().entries.get(key).map(|e| e.query.clone())
    }

    /// Resolves every present key under one lock; absent keys are skipped.
    pub fn peek_many<I, K>(&self, keys: I) -> Vec<Arc<dyn CachedQuery>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let table = self.table.lock();
        keys.into_iter()
            .filter_map(|key| table.entries.get(key.as_ref()).map(|e| e.query.clone()))
            .collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.table.lock().entries.contains_key(key)
    }

    /// Metadata of the entry for `key`, if cached.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.table.lock().entries.get(key).cloned()
    }

    // == Remove ==
    /// Removes and disposes the entry. Returns false if absent.
    pub fn remove_query(&self, key: &str) -> bool {
        let removed = self.table.lock().entries.remove(key);
        match removed {
            Some(entry) => {
                entry.query.dispose();
                debug!(key, "Query removed");
                true
            }
            None => false,
        }
    }

    /// Listener-checked removal requested by a query's expiry timer.
    ///
    /// Removes the entry only if nobody observes it and it is disposed or past
    /// its cache time, so a newer query under the same key survives.
    pub fn expire_if_idle(&self, key: &str) -> bool {
        let mut table = self.table.lock();
        let expired = table.entries.get(key).is_some_and(|entry| {
            !entry.query.has_listeners()
                && (entry.query.is_disposed() || entry.query.is_cache_expired())
        });
        if !expired {
            return false;
        }
        if let Some(entry) = table.entries.remove(key) {
            entry.query.dispose();
            table.stats.record_expiration();
            debug!(key, "Idle query expired");
        }
        true
    }

    // == Clear ==
    /// Disposes every query, empties the table and resets all counters.
    pub fn clear(&self) {
        let mut table = self.table.lock();
        for entry in table.entries.values() {
            entry.query.dispose();
        }
        let count = table.entries.len();
        table.entries.clear();
        table.stats = CacheStats::new();
        debug!(manager = self.id, count, "Cache cleared");
    }

    // == Refresh Entry ==
    /// Re-estimates the size of `key` after its data changed, then
    /// re-enforces the bounds.
    pub fn refresh_entry(&self, key: &str) {
        let mut table = self.table.lock();
        let Some(entry) = table.entries.get_mut(key) else {
            return;
        };
        entry.estimated_size_bytes = self.estimator.estimate(key, entry.query.as_ref());
        if self.config.has_limits() {
            self.enforce_limits(&mut table, Some(key));
        }
    }

    // == Cleanup ==
    /// Removes disposed and idle stale queries, refreshes size estimates and
    /// re-enforces the bounds.
    pub fn cleanup(&self) -> Result<CleanupReport> {
        self.ensure_active()?;
        let mut table = self.table.lock();

        let expired = self.sweep_expired(&mut table);
        for (key, entry) in table.entries.iter_mut() {
            entry.estimated_size_bytes = self.estimator.estimate(key, entry.query.as_ref());
        }
        let evicted = if self.config.has_limits() {
            self.enforce_limits(&mut table, None)
        } else {
            0
        };
        table.stats.last_cleanup = Some(Utc::now());

        let report = CleanupReport { expired, evicted };
        if report.removed() > 0 {
            info!(
                manager = self.id,
                expired, evicted,
                remaining = table.entries.len(),
                "Cache cleanup removed queries"
            );
        } else {
            trace!(manager = self.id, "Cache cleanup: nothing to remove");
        }
        Ok(report)
    }

    // == Stats ==
    /// Returns a snapshot of the current statistics.
    pub fn stats(&self) -> CacheStats {
        let table = self.table.lock();
        let mut stats = table.stats.clone();
        stats.query_count = table.entries.len();
        stats.memory_bytes = table.memory_bytes();
        stats
    }

    /// True if either ratio-to-limit reached the warn threshold.
    pub fn is_near_limit(&self) -> bool {
        let stats = self.stats();
        let threshold = self.config.warn_threshold;
        stats.query_ratio(self.config.max_queries) >= threshold
            || stats.memory_ratio(self.config.max_memory_bytes) >= threshold
    }

    pub fn keys(&self) -> Vec<String> {
        self.table.lock().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().entries.is_empty()
    }

    // == Dispose ==
    /// Stops the cleanup task, unregisters from memory pressure and clears.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.cleanup_task.lock().take() {
            handle.abort();
        }
        if let Some(coordinator) = &self.coordinator {
            coordinator.unregister(self);
        }
        self.clear();
        debug!(manager = self.id, "Cache manager disposed");
    }

    // == Internals ==
    fn sweep_expired(&self, table: &mut CacheTable) -> usize {
        let expired: Vec<String> = table
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.query.is_disposed()
                    || (!entry.query.has_listeners() && entry.query.is_stale())
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = table.entries.remove(key) {
                entry.query.dispose();
                table.stats.record_expiration();
            }
        }
        expired.len()
    }

    /// Memory first, then count, each with a fresh priority ordering.
    ///
    /// `incoming` is the key whose insert or update triggered enforcement; it
    /// is never chosen as a victim of its own write.
    fn enforce_limits(&self, table: &mut CacheTable, incoming: Option<&str>) -> usize {
        let mut evicted = 0;

        let max_memory = self.config.max_memory_bytes;
        if max_memory > 0 {
            let used = table.memory_bytes();
            if used > max_memory {
                evicted += self.evict(table, Overage::Bytes(used - max_memory), incoming);
            }
        }

        let max_queries = self.config.max_queries;
        if max_queries > 0 && table.entries.len() > max_queries {
            let excess = table.entries.len() - max_queries;
            evicted += self.evict(table, Overage::Count(excess), incoming);
        }

        evicted
    }

    fn evict(&self, table: &mut CacheTable, overage: Overage, incoming: Option<&str>) -> usize {
        let policy = self.config.eviction_policy;
        let mut candidates: Vec<(EvictionPriority, String)> = table
            .entries
            .iter()
            .filter(|(key, _)| incoming != Some(key.as_str()))
            .map(|(key, entry)| (policy.priority(entry, self.origin), key.clone()))
            .filter(|(priority, _)| priority.is_evictable())
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        let mut remaining = match overage {
            Overage::Count(n) | Overage::Bytes(n) => n,
        };
        let mut evicted = 0;

        for (_, key) in candidates {
            if remaining == 0 {
                break;
            }
            let protected = table
                .entries
                .get(&key)
                .is_some_and(|entry| entry.query.has_listeners());
            if protected {
                trace!(key = %key, "Skipping observed query during eviction");
                continue;
            }
            if let Some(entry) = table.entries.remove(&key) {
                entry.query.dispose();
                table.stats.record_eviction();
                evicted += 1;
                remaining = match overage {
                    Overage::Count(_) => remaining - 1,
                    Overage::Bytes(_) => remaining.saturating_sub(entry.estimated_size_bytes),
                };
                debug!(key = %key, %policy, "Evicted query");
            }
        }

        if remaining > 0 {
            debug!(
                manager = self.id,
                ?overage,
                "Cache remains over its limit; remaining queries are protected"
            );
        }
        evicted
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_task.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EvictionPolicy;
    use crate::query::{Query, QueryOptions, QueryStatus};

    fn config() -> CacheConfig {
        CacheConfig::unlimited()
            .with_memory_pressure_handling(false)
            .with_cleanup_interval(Duration::ZERO)
    }

    fn manager(config: CacheConfig) -> Arc<CacheManager> {
        CacheManager::builder(config).without_coordinator().build().unwrap()
    }

    fn query(key: &str) -> Query<String> {
        Query::new(key, QueryOptions::default())
    }

    fn add(manager: &CacheManager, q: &Query<String>) {
        manager.add_query(q.key(), Arc::new(q.clone())).unwrap();
    }

    #[test]
    fn test_manager_new() {
        let manager = manager(config());
        assert!(manager.is_empty());
        assert_eq!(manager.stats(), CacheStats::new());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let result = CacheManager::builder(config().with_warn_threshold(2.0))
            .without_coordinator()
            .build();
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_get_records_hits_and_misses() {
        let manager = manager(config());
        add(&manager, &query("a"));

        assert!(manager.get_query("a").is_some());
        assert!(manager.get_query("a").is_some());
        assert!(manager.get_query("missing").is_none());

        let stats = manager.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.query_count, 1);
        assert_eq!(manager.entry("a").unwrap().access_count, 3);
    }

    #[test]
    fn test_peek_does_not_touch_stats() {
        let manager = manager(config());
        add(&manager, &query("a"));

        assert!(manager.peek("a").is_some());
        assert!(manager.peek("b").is_none());
        assert_eq!(manager.peek_many(["a", "b"]).len(), 1);

        let stats = manager.stats();
        assert_eq!(stats.hits + stats.misses, 0);
        assert_eq!(manager.entry("a").unwrap().access_count, 1);
    }

    #[test]
    fn test_replace_disposes_previous_query() {
        let manager = manager(config());
        let first = query("a");
        let second = query("a");
        add(&manager, &first);
        add(&manager, &first);
        assert!(!first.is_disposed());

        add(&manager, &second);
        assert!(first.is_disposed());
        assert!(!second.is_disposed());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_disposes_query() {
        let manager = manager(config());
        let q = query("a");
        add(&manager, &q);

        assert!(manager.remove_query("a"));
        assert!(!manager.remove_query("a"));
        assert!(q.is_disposed());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_get_or_insert_replaces_disposed_query() {
        let manager = manager(config());
        let stale = query("a");
        add(&manager, &stale);
        stale.dispose();

        let fresh = manager
            .get_or_insert_with("a", || Arc::new(query("a")))
            .unwrap();

        assert!(!fresh.is_disposed());
        let stats = manager.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_clear_disposes_and_resets_counters() {
        let manager = manager(config().with_max_queries(1).with_eviction_policy(EvictionPolicy::Lru));
        let a = query("a");
        let b = query("b");
        add(&manager, &a);
        add(&manager, &b);
        manager.get_query("b");
        manager.get_query("zzz");
        assert_eq!(manager.stats().evictions, 1);

        manager.clear();

        assert!(a.is_disposed());
        assert!(b.is_disposed());
        let stats = manager.stats();
        assert_eq!(stats.query_count, 0);
        assert_eq!((stats.hits, stats.misses, stats.evictions, stats.expirations), (0, 0, 0, 0));
    }

    #[test]
    fn test_lfu_insert_never_evicts_the_new_entry() {
        let manager = manager(config().with_max_queries(2).with_eviction_policy(EvictionPolicy::Lfu));
        let (a, b, c) = (query("a"), query("b"), query("c"));
        add(&manager, &a);
        add(&manager, &b);
        manager.get_query("a");

        let inserted = manager
            .get_or_insert_with("c", || Arc::new(c.clone()))
            .unwrap();

        assert!(!inserted.is_disposed());
        assert!(!c.is_disposed());
        assert!(b.is_disposed());
        assert!(manager.contains_key("a"));
        assert_eq!(manager.stats().evictions, 1);

        c.set_data("value".to_string());
        manager.refresh_entry("c");
        assert!(manager.contains_key("c"));
        assert!(!c.is_disposed());
    }

    #[test]
    fn test_ttl_insert_of_empty_query_survives_full_cache() {
        let manager = manager(config().with_max_queries(2).with_eviction_policy(EvictionPolicy::Ttl));
        let (a, b) = (query("a"), query("b"));
        a.set_data("a".to_string());
        b.set_data("b".to_string());
        add(&manager, &a);
        add(&manager, &b);

        // No data yet, so stale
        let c = query("c");
        add(&manager, &c);

        assert!(!c.is_disposed());
        assert!(manager.contains_key("c"));
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.stats().evictions, 1);
    }

    #[test]
    fn test_readding_same_query_keeps_it_alive() {
        let manager = manager(config());
        let q = query("a");
        add(&manager, &q);
        add(&manager, &q);

        assert!(!q.is_disposed());
        q.set_data("still live".to_string());
        assert_eq!(q.status(), QueryStatus::Success);
    }

    #[test]
    fn test_lru_eviction_keeps_recently_used() {
        let manager = manager(config().with_max_queries(3).with_eviction_policy(EvictionPolicy::Lru));
        let queries: Vec<_> = (1..=5).map(|i| query(&format!("q{}", i))).collect();

        // q4 and q5 go in first and are never touched again
        add(&manager, &queries[3]);
        add(&manager, &queries[4]);
        add(&manager, &queries[0]);
        add(&manager, &queries[1]);
        add(&manager, &queries[2]);
        for key in ["q1", "q2", "q3"] {
            manager.get_query(key);
        }

        assert_eq!(manager.len(), 3);
        assert!(manager.contains_key("q1"));
        assert!(manager.contains_key("q2"));
        assert!(manager.contains_key("q3"));
        assert!(!manager.contains_key("q4"));
        assert!(queries[3].is_disposed());
        assert_eq!(manager.stats().evictions, 2);
    }

    #[tokio::test]
    async fn test_observed_query_is_never_evicted() {
        let manager = manager(config().with_max_queries(2).with_eviction_policy(EvictionPolicy::Lru));
        let oldest = query("oldest");
        let _stream = oldest.watch();
        add(&manager, &oldest);
        add(&manager, &query("middle"));
        add(&manager, &query("newest"));

        assert_eq!(manager.len(), 2);
        assert!(manager.contains_key("oldest"));
        assert!(!manager.contains_key("middle"));
        assert!(manager.contains_key("newest"));
    }

    #[tokio::test]
    async fn test_cache_may_stay_over_limit_when_all_observed() {
        let manager = manager(config().with_max_queries(1).with_eviction_policy(EvictionPolicy::Lru));
        let a = query("a");
        let b = query("b");
        let _sa = a.watch();
        let _sb = b.watch();
        add(&manager, &a);
        add(&manager, &b);

        assert_eq!(manager.len(), 2);
        assert_eq!(manager.stats().evictions, 0);
    }

    #[test]
    fn test_none_policy_limits_are_advisory() {
        let manager = manager(config().with_max_queries(1).with_eviction_policy(EvictionPolicy::None));
        add(&manager, &query("a"));
        add(&manager, &query("b"));
        add(&manager, &query("c"));

        assert_eq!(manager.len(), 3);
        assert!(manager.is_near_limit());
    }

    #[test]
    fn test_lfu_evicts_least_accessed() {
        let manager = manager(config().with_max_queries(2).with_eviction_policy(EvictionPolicy::Lfu));
        add(&manager, &query("a"));
        add(&manager, &query("b"));
        manager.get_query("a");
        manager.get_query("a");
        manager.get_query("b");

        add(&manager, &query("c"));

        assert!(manager.contains_key("a"));
        assert!(!manager.contains_key("b"));
        assert!(manager.contains_key("c"));
    }

    #[test]
    fn test_ttl_evicts_stale_before_fresh() {
        let manager = manager(config().with_max_queries(2).with_eviction_policy(EvictionPolicy::Ttl));
        let fresh_a = query("fresh_a");
        fresh_a.set_data("a".to_string());
        let fresh_b = query("fresh_b");
        fresh_b.set_data("b".to_string());
        add(&manager, &fresh_a);
        add(&manager, &query("stale"));
        add(&manager, &fresh_b);

        assert!(!manager.contains_key("stale"));
        assert!(manager.contains_key("fresh_a"));
        assert!(manager.contains_key("fresh_b"));
    }

    #[test]
    fn test_memory_limit_evicts_until_under_budget() {
        let manager = manager(config().with_max_memory(2_000).with_eviction_policy(EvictionPolicy::Lrc));
        for i in 0..3 {
            let q = query(&format!("blob{}", i));
            q.set_data("x".repeat(500));
            add(&manager, &q);
        }

        let stats = manager.stats();
        assert!(stats.memory_bytes <= 2_000);
        assert_eq!(stats.evictions, 1);
        assert!(!manager.contains_key("blob0"));
    }

    #[test]
    fn test_refresh_entry_reestimates_and_enforces() {
        let manager = manager(config().with_max_memory(1_500).with_eviction_policy(EvictionPolicy::Lru));
        let a = query("a");
        let b = query("b");
        add(&manager, &a);
        add(&manager, &b);
        let before = manager.entry("b").unwrap().estimated_size_bytes;

        b.set_data("y".repeat(1_200));
        manager.refresh_entry("b");

        assert!(!manager.contains_key("a"));
        assert!(manager.entry("b").unwrap().estimated_size_bytes > before);
    }

    #[test]
    fn test_cleanup_counts_expirations_not_evictions() {
        let manager = manager(config());
        let disposed = query("disposed");
        let fresh = query("fresh");
        fresh.set_data("value".to_string());
        add(&manager, &disposed);
        add(&manager, &fresh);
        disposed.dispose();

        let report = manager.cleanup().unwrap();

        assert_eq!(report, CleanupReport { expired: 1, evicted: 0 });
        let stats = manager.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.evictions, 0);
        assert!(stats.last_cleanup.is_some());
        assert!(manager.contains_key("fresh"));
    }

    #[tokio::test]
    async fn test_cleanup_keeps_observed_stale_queries() {
        let manager = manager(config());
        let observed = query("observed");
        let _stream = observed.watch();
        add(&manager, &observed);
        add(&manager, &query("idle"));

        let report = manager.cleanup().unwrap();

        assert_eq!(report.expired, 1);
        assert!(manager.contains_key("observed"));
        assert_eq!(observed.status(), QueryStatus::Idle);
    }

    #[test]
    fn test_expire_if_idle_respects_cache_time() {
        let manager = manager(config());
        let short: Query<String> = Query::new(
            "short",
            QueryOptions::default().with_cache_time(Duration::from_millis(10)),
        );
        add(&manager, &short);
        add(&manager, &query("long"));

        std::thread::sleep(Duration::from_millis(30));

        assert!(manager.expire_if_idle("short"));
        assert!(!manager.expire_if_idle("long"));
        assert!(!manager.expire_if_idle("missing"));
        assert_eq!(manager.stats().expirations, 1);
        assert!(short.is_disposed());
    }

    #[test]
    fn test_is_near_limit() {
        let manager = manager(config().with_max_queries(4).with_warn_threshold(0.75).with_eviction_policy(EvictionPolicy::Lru));
        add(&manager, &query("a"));
        add(&manager, &query("b"));
        assert!(!manager.is_near_limit());

        add(&manager, &query("c"));
        assert!(manager.is_near_limit());
    }

    #[test]
    fn test_unlimited_is_never_near_limit() {
        let manager = manager(config());
        for i in 0..50 {
            add(&manager, &query(&format!("q{}", i)));
        }
        assert!(!manager.is_near_limit());
    }

    #[test]
    fn test_dispose_clears_and_rejects_operations() {
        let manager = manager(config());
        let q = query("a");
        add(&manager, &q);

        manager.dispose();
        manager.dispose();

        assert!(manager.is_disposed());
        assert!(q.is_disposed());
        assert!(manager.is_empty());
        assert!(matches!(manager.cleanup(), Err(CacheError::Disposed)));
        assert!(matches!(
            manager.add_query("b", Arc::new(query("b"))),
            Err(CacheError::Disposed)
        ));
    }
}
