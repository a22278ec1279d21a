//! Query State Module
//!
//! Status enum, per-query options and the snapshot type carried by change
//! notifications.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::QueryError;

/// Default window after which fetched data is considered stale.
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(5 * 60);

/// Default inactivity window before an unused query may be removed.
pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(10 * 60);

// == Query Status ==
/// Lifecycle status of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryStatus::Idle => "idle",
            QueryStatus::Loading => "loading",
            QueryStatus::Success => "success",
            QueryStatus::Error => "error",
        };
        f.write_str(name)
    }
}

// == Query Options ==
/// Timing configuration bound to a query at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// `None` means data never goes stale once set.
    pub stale_time: Option<Duration>,
    pub cache_time: Duration,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_time: Some(DEFAULT_STALE_TIME),
            cache_time: DEFAULT_CACHE_TIME,
        }
    }
}

impl QueryOptions {
    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    pub fn never_stale(mut self) -> Self {
        self.stale_time = None;
        self
    }

    pub fn with_cache_time(mut self, cache_time: Duration) -> Self {
        self.cache_time = cache_time;
        self
    }
}

// == Query State ==
/// The observable state of a query.
///
/// `data` and `error` are never both set.
#[derive(Debug)]
pub struct QueryState<T> {
    pub status: QueryStatus,
    pub data: Option<Arc<T>>,
    pub error: Option<QueryError>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Monotonic twin of `last_updated`, used for staleness
    pub(crate) updated_at: Option<Instant>,
}

impl<T> QueryState<T> {
    pub(crate) fn idle() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            last_updated: None,
            updated_at: None,
        }
    }

    /// Stale if never updated, or if `stale_time` is set and has elapsed.
    ///
    /// With no `stale_time` data never goes stale, but a query that was never
    /// updated still reports stale.
    pub fn is_stale(&self, stale_time: Option<Duration>) -> bool {
        match (self.updated_at, stale_time) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(at), Some(window)) => at.elapsed() > window,
        }
    }

    /// Time since the last data/error commit.
    pub fn age(&self) -> Option<Duration> {
        self.updated_at.map(|at| at.elapsed())
    }

    pub(crate) fn mark_updated(&mut self) {
        self.updated_at = Some(Instant::now());
        self.last_updated = Some(Utc::now());
    }

    pub(crate) fn clear_updated(&mut self) {
        self.updated_at = None;
        self.last_updated = None;
    }
}

impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        Self {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            last_updated: self.last_updated,
            updated_at: self.updated_at,
        }
    }
}

// == Query Snapshot ==
/// A consistent view of a query emitted on every change notification.
#[derive(Debug)]
pub struct QuerySnapshot<T> {
    pub key: String,
    pub state: QueryState<T>,
    /// Staleness evaluated when the notification was received
    pub is_stale: bool,
}

impl<T> QuerySnapshot<T> {
    pub fn status(&self) -> QueryStatus {
        self.state.status
    }

    pub fn data(&self) -> Option<&Arc<T>> {
        self.state.data.as_ref()
    }

    pub fn error(&self) -> Option<&QueryError> {
        self.state.error.as_ref()
    }
}

impl<T> Clone for QuerySnapshot<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            state: self.state.clone(),
            is_stale: self.is_stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = QueryOptions::default();
        assert_eq!(options.stale_time, Some(Duration::from_secs(300)));
        assert_eq!(options.cache_time, Duration::from_secs(600));
    }

    #[test]
    fn test_options_builders() {
        let options = QueryOptions::default()
            .with_stale_time(Duration::from_millis(50))
            .with_cache_time(Duration::from_secs(1));
        assert_eq!(options.stale_time, Some(Duration::from_millis(50)));
        assert_eq!(options.cache_time, Duration::from_secs(1));
        assert_eq!(options.never_stale().stale_time, None);
    }

    #[test]
    fn test_idle_state_is_stale_regardless_of_stale_time() {
        let state: QueryState<u32> = QueryState::idle();
        assert!(state.is_stale(Some(DEFAULT_STALE_TIME)));
        assert!(state.is_stale(None));
        assert!(state.age().is_none());
    }

    #[test]
    fn test_updated_state_without_stale_time_never_stale() {
        let mut state: QueryState<u32> = QueryState::idle();
        state.mark_updated();
        assert!(!state.is_stale(None));
        assert!(!state.is_stale(Some(Duration::from_secs(60))));
        assert!(state.last_updated.is_some());

        state.clear_updated();
        assert!(state.is_stale(None));
        assert!(state.last_updated.is_none());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(QueryStatus::Idle.to_string(), "idle");
        assert_eq!(QueryStatus::Error.to_string(), "error");
    }
}
