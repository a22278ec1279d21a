//! Configuration Module
//!
//! Cache policy objects: size/memory bounds, eviction policy, cleanup cadence
//! and the four canonical presets. Values can also be loaded from environment
//! variables with preset fallbacks.

use std::env;
use std::time::Duration;

use crate::cache::EvictionPolicy;
use crate::error::{CacheError, Result};

const MIB: usize = 1024 * 1024;

/// Cache manager configuration.
///
/// A manager takes its config by value and never mutates it afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of cached queries (0 = unlimited)
    pub max_queries: usize,
    /// Approximate memory budget in bytes (0 = unlimited)
    pub max_memory_bytes: usize,
    /// Strategy used to pick victims when a bound is exceeded
    pub eviction_policy: EvictionPolicy,
    /// Register the manager with the memory-pressure coordinator
    pub enable_memory_pressure_handling: bool,
    /// Interval of the periodic cleanup task (zero disables it)
    pub cleanup_interval: Duration,
    /// Ratio-to-limit at which the cache reports itself near its limit, in (0, 1]
    pub warn_threshold: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_queries: 100,
            max_memory_bytes: 50 * MIB,
            eviction_policy: EvictionPolicy::Lru,
            enable_memory_pressure_handling: true,
            cleanup_interval: Duration::from_secs(5 * 60),
            warn_threshold: 0.8,
        }
    }
}

impl CacheConfig {
    // == Presets ==
    /// Higher bounds for applications with many concurrent views.
    pub fn large_application() -> Self {
        Self {
            max_queries: 1000,
            max_memory_bytes: 200 * MIB,
            eviction_policy: EvictionPolicy::Lru,
            enable_memory_pressure_handling: true,
            cleanup_interval: Duration::from_secs(10 * 60),
            warn_threshold: 0.85,
        }
    }

    /// Tight bounds and an early warning threshold.
    pub fn compact() -> Self {
        Self {
            max_queries: 25,
            max_memory_bytes: 10 * MIB,
            eviction_policy: EvictionPolicy::Lfu,
            enable_memory_pressure_handling: true,
            cleanup_interval: Duration::from_secs(60),
            warn_threshold: 0.7,
        }
    }

    /// No bounds and no policy-driven eviction.
    pub fn unlimited() -> Self {
        Self {
            max_queries: 0,
            max_memory_bytes: 0,
            eviction_policy: EvictionPolicy::None,
            enable_memory_pressure_handling: false,
            cleanup_interval: Duration::from_secs(10 * 60),
            warn_threshold: 1.0,
        }
    }

    // == Builder Setters ==
    pub fn with_max_queries(mut self, max_queries: usize) -> Self {
        self.max_queries = max_queries;
        self
    }

    pub fn with_max_memory(mut self, max_memory_bytes: usize) -> Self {
        self.max_memory_bytes = max_memory_bytes;
        self
    }

    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    pub fn with_memory_pressure_handling(mut self, enabled: bool) -> Self {
        self.enable_memory_pressure_handling = enabled;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_warn_threshold(mut self, threshold: f64) -> Self {
        self.warn_threshold = threshold;
        self
    }

    // == Limits ==
    /// True if either bound is configured.
    pub fn has_limits(&self) -> bool {
        self.max_queries > 0 || self.max_memory_bytes > 0
    }

    // == Validate ==
    /// Rejects a warn threshold outside (0, 1].
    pub fn validate(&self) -> Result<()> {
        if !(self.warn_threshold > 0.0 && self.warn_threshold <= 1.0) {
            return Err(CacheError::InvalidConfig(format!(
                "warn_threshold must be in (0, 1], got {}",
                self.warn_threshold
            )));
        }
        Ok(())
    }

    // == From Env ==
    /// Creates a config from environment variables, falling back to the
    /// default preset for anything missing or unparsable.
    ///
    /// # Environment Variables
    /// - `QUERY_CACHE_MAX_QUERIES` - Maximum cached queries (default: 100)
    /// - `QUERY_CACHE_MAX_MEMORY_BYTES` - Memory budget (default: 50 MiB)
    /// - `QUERY_CACHE_EVICTION_POLICY` - none, lru, lrc, lfu or ttl (default: lru)
    /// - `QUERY_CACHE_MEMORY_PRESSURE` - true/false (default: true)
    /// - `QUERY_CACHE_CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 300)
    /// - `QUERY_CACHE_WARN_THRESHOLD` - Near-limit ratio (default: 0.8)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_queries: env_parse("QUERY_CACHE_MAX_QUERIES").unwrap_or(defaults.max_queries),
            max_memory_bytes: env_parse("QUERY_CACHE_MAX_MEMORY_BYTES")
                .unwrap_or(defaults.max_memory_bytes),
            eviction_policy: env_parse("QUERY_CACHE_EVICTION_POLICY")
                .unwrap_or(defaults.eviction_policy),
            enable_memory_pressure_handling: env_parse("QUERY_CACHE_MEMORY_PRESSURE")
                .unwrap_or(defaults.enable_memory_pressure_handling),
            cleanup_interval: env_parse("QUERY_CACHE_CLEANUP_INTERVAL")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cleanup_interval),
            warn_threshold: env_parse::<f64>("QUERY_CACHE_WARN_THRESHOLD")
                .filter(|t| *t > 0.0 && *t <= 1.0)
                .unwrap_or(defaults.warn_threshold),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
