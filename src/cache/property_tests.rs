//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check bounds, statistics and query state invariants over
//! random operation sequences.

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheManager, EvictionPolicy};
use crate::config::CacheConfig;
use crate::error::QueryError;
use crate::query::{Query, QueryOptions, QueryStatus};

// == Test Configuration ==
const TEST_MAX_QUERIES: usize = 8;

// == Strategies ==
/// Small key space so operations collide often
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-l]{1,2}".prop_map(|s| s)
}

fn policy_strategy() -> impl Strategy<Value = EvictionPolicy> {
    prop_oneof![
        Just(EvictionPolicy::Lru),
        Just(EvictionPolicy::Lrc),
        Just(EvictionPolicy::Lfu),
        Just(EvictionPolicy::Ttl),
    ]
}

#[derive(Debug, Clone)]
enum CacheOp {
    Add { key: String },
    Get { key: String },
    Remove { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        key_strategy().prop_map(|key| CacheOp::Add { key }),
        key_strategy().prop_map(|key| CacheOp::Get { key }),
        key_strategy().prop_map(|key| CacheOp::Remove { key }),
    ]
}

#[derive(Debug, Clone)]
enum QueryOp {
    Loading,
    Data(u32),
    Error(String),
    Invalidate,
}

fn query_op_strategy() -> impl Strategy<Value = QueryOp> {
    prop_oneof![
        Just(QueryOp::Loading),
        any::<u32>().prop_map(QueryOp::Data),
        "[a-z]{1,12}".prop_map(QueryOp::Error),
        Just(QueryOp::Invalidate),
    ]
}

fn manager(policy: EvictionPolicy) -> Arc<CacheManager> {
    CacheManager::builder(
        CacheConfig::default()
            .with_max_queries(TEST_MAX_QUERIES)
            .with_max_memory(0)
            .with_eviction_policy(policy)
            .with_cleanup_interval(Duration::ZERO),
    )
    .without_coordinator()
    .build()
    .unwrap()
}

fn new_query(key: &str) -> Arc<Query<String>> {
    Arc::new(Query::new(key, QueryOptions::default()))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Without subscribers, the query count never exceeds the bound and the
    // key just written always survives its own insertion.
    #[test]
    fn prop_count_bound_holds(
        policy in policy_strategy(),
        ops in prop::collection::vec(cache_op_strategy(), 1..60)
    ) {
        let manager = manager(policy);

        for op in ops {
            match op {
                CacheOp::Add { key } => {
                    let query = new_query(&key);
                    manager.add_query(key.clone(), query.clone()).unwrap();
                    prop_assert!(manager.contains_key(&key), "New query evicted on insert");
                    prop_assert!(!query.is_disposed());
                }
                CacheOp::Get { key } => {
                    manager.get_query(&key);
                }
                CacheOp::Remove { key } => {
                    manager.remove_query(&key);
                }
            }
            prop_assert!(manager.len() <= TEST_MAX_QUERIES, "Query count exceeded bound");
        }
    }

    // Hits and misses reflect exactly the lookups performed.
    #[test]
    fn prop_statistics_accuracy(ops in prop::collection::vec(cache_op_strategy(), 1..60)) {
        let manager = manager(EvictionPolicy::Lru);
        let mut expected_hits: u64 = 0;
        let mut expected_misses: u64 = 0;

        for op in ops {
            match op {
                CacheOp::Add { key } => {
                    manager.add_query(key.clone(), new_query(&key)).unwrap();
                }
                CacheOp::Get { key } => match manager.get_query(&key) {
                    Some(_) => expected_hits += 1,
                    None => expected_misses += 1,
                },
                CacheOp::Remove { key } => {
                    manager.remove_query(&key);
                }
            }
        }

        let stats = manager.stats();
        prop_assert_eq!(stats.hits, expected_hits, "Hits mismatch");
        prop_assert_eq!(stats.misses, expected_misses, "Misses mismatch");
        prop_assert_eq!(stats.query_count, manager.len(), "Query count mismatch");
    }

    // Evicted and removed queries are always disposed; cached ones never are.
    #[test]
    fn prop_only_cached_queries_are_live(keys in prop::collection::vec(key_strategy(), 1..40)) {
        let manager = manager(EvictionPolicy::Lrc);
        let mut created = Vec::new();

        for key in keys {
            let query = new_query(&key);
            manager.add_query(key.clone(), query.clone()).unwrap();
            created.push(query);
        }

        for query in created {
            let cached = manager
                .peek(query.key())
                .is_some_and(|q| std::ptr::addr_eq(Arc::as_ptr(&q), Arc::as_ptr(&query)));
            prop_assert_eq!(cached, !query.is_disposed());
        }
    }

    // Data and error are never set together, whatever the transition order.
    #[test]
    fn prop_data_error_mutually_exclusive(ops in prop::collection::vec(query_op_strategy(), 1..40)) {
        let query: Query<u32> = Query::new("prop", QueryOptions::default());

        for op in ops {
            match op {
                QueryOp::Loading => query.set_loading(),
                QueryOp::Data(value) => {
                    query.set_data(value);
                    prop_assert_eq!(query.status(), QueryStatus::Success);
                    prop_assert_eq!(query.data().map(|d| *d), Some(value));
                }
                QueryOp::Error(message) => {
                    query.set_error(QueryError::msg(message));
                    prop_assert_eq!(query.status(), QueryStatus::Error);
                }
                QueryOp::Invalidate => {
                    query.invalidate();
                    prop_assert!(query.is_stale());
                }
            }
            let state = query.state();
            prop_assert!(!(state.data.is_some() && state.error.is_some()));
        }
    }
}
