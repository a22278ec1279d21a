//! Query Cache - A reactive in-memory query cache
//!
//! Caches results of asynchronous fetches under string keys, tracks
//! staleness, deduplicates concurrent fetches and bounds memory with
//! pluggable eviction policies.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod pressure;
pub mod query;
pub mod tasks;

pub use cache::{CacheManager, CacheStats, CleanupReport, EvictionPolicy};
pub use client::{default_client, dispose_default_client, FetchOptions, QueryClient};
pub use config::CacheConfig;
pub use error::{CacheError, QueryError, Result};
pub use pressure::{MemoryPressureCoordinator, PressureInfo, PressureOutcome};
pub use query::{Query, QueryData, QueryOptions, QuerySnapshot, QueryState, QueryStatus};
pub use tasks::spawn_cleanup_task;
