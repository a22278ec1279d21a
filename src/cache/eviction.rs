//! Eviction Policy Module
//!
//! Pure strategies mapping an entry's metadata to a sortable priority.
//! Lower priority is evicted first; an infinite priority is never evicted.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::cache::CacheEntry;

// == Eviction Policy ==
/// Victim selection strategy used when a bound is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Never evict; limits are advisory
    None,
    /// Least recently used
    Lru,
    /// Least recently created
    Lrc,
    /// Least frequently used
    Lfu,
    /// Stale first, then oldest update
    Ttl,
}

impl EvictionPolicy {
    /// Computes the eviction priority of `entry`.
    ///
    /// `origin` is the manager's creation instant; timestamps are expressed as
    /// milliseconds since then.
    pub fn priority(&self, entry: &CacheEntry, origin: Instant) -> EvictionPriority {
        match self {
            EvictionPolicy::None => EvictionPriority::new(f64::INFINITY, entry.created_seq),
            EvictionPolicy::Lru => EvictionPriority::new(
                millis_since(origin, entry.last_accessed_at),
                entry.accessed_seq,
            ),
            EvictionPolicy::Lrc => EvictionPriority::new(
                millis_since(origin, entry.created_at),
                entry.created_seq,
            ),
            EvictionPolicy::Lfu => {
                EvictionPriority::new(entry.access_count as f64, entry.accessed_seq)
            }
            EvictionPolicy::Ttl => {
                if entry.query.is_stale() {
                    return EvictionPriority::new(f64::NEG_INFINITY, entry.created_seq);
                }
                let age_ms = entry
                    .query
                    .data_age()
                    .map_or(0.0, |age| age.as_secs_f64() * 1000.0);
                EvictionPriority::new(-age_ms, entry.created_seq)
            }
        }
    }
}

fn millis_since(origin: Instant, at: Instant) -> f64 {
    at.saturating_duration_since(origin).as_secs_f64() * 1000.0
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvictionPolicy::None => "none",
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lrc => "lrc",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Ttl => "ttl",
        };
        f.write_str(name)
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(EvictionPolicy::None),
            "lru" => Ok(EvictionPolicy::Lru),
            "lrc" => Ok(EvictionPolicy::Lrc),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "ttl" => Ok(EvictionPolicy::Ttl),
            other => Err(format!("unknown eviction policy '{}'", other)),
        }
    }
}

// == Eviction Priority ==
/// Total order over entries: primary value, then an insertion/access
/// sequence number for entries whose timestamps collide.
#[derive(Debug, Clone, Copy)]
pub struct EvictionPriority {
    pub value: f64,
    pub tie_breaker: u64,
}

impl EvictionPriority {
    pub fn new(value: f64, tie_breaker: u64) -> Self {
        Self { value, tie_breaker }
    }

    /// Entries with an infinite priority are never chosen as victims.
    pub fn is_evictable(&self) -> bool {
        self.value != f64::INFINITY
    }
}

impl PartialEq for EvictionPriority {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EvictionPriority {}

impl PartialOrd for EvictionPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EvictionPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value
            .total_cmp(&other.value)
            .then(self.tie_breaker.cmp(&other.tie_breaker))
    }
}
