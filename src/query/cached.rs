//! Type-erased view of a query, as seen by the cache manager.
//!
//! The manager stores queries of many payload types in one table; it only
//! needs liveness, staleness and size information plus the ability to
//! invalidate and dispose. The client recovers the typed handle through
//! `as_any`.

use std::any::Any;
use std::time::Duration;

use super::elements::count_elements;
use super::handle::{Query, QueryData};
use super::state::QueryStatus;

/// Serialized footprint of a query's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFootprint {
    /// No data stored
    Empty,
    /// Length of the canonical JSON serialization
    Serialized(usize),
    /// Not representable as JSON; number of leaf values and map keys
    Elements(usize),
    /// Data present but its `Serialize` impl fails
    Opaque,
}

/// Object-safe operations the cache manager performs on a query.
pub trait CachedQuery: Send + Sync {
    fn key(&self) -> &str;
    fn status(&self) -> QueryStatus;
    fn is_stale(&self) -> bool;
    fn is_disposed(&self) -> bool;
    fn has_listeners(&self) -> bool;
    fn is_cache_expired(&self) -> bool;
    /// Time since the last data/error commit
    fn data_age(&self) -> Option<Duration>;
    fn data_footprint(&self) -> DataFootprint;
    fn error_message(&self) -> Option<String>;
    fn invalidate(&self);
    fn dispose(&self);
    /// True if `other` is a handle to this same query, regardless of which
    /// `Arc` wraps it.
    fn same_query(&self, other: &dyn CachedQuery) -> bool;
    fn as_any(&self) -> &dyn Any;
}

impl<T: QueryData> CachedQuery for Query<T> {
    fn key(&self) -> &str {
        Query::key(self)
    }

    fn status(&self) -> QueryStatus {
        Query::status(self)
    }

    fn is_stale(&self) -> bool {
        Query::is_stale(self)
    }

    fn is_disposed(&self) -> bool {
        Query::is_disposed(self)
    }

    fn has_listeners(&self) -> bool {
        Query::has_listeners(self)
    }

    fn is_cache_expired(&self) -> bool {
        Query::is_cache_expired(self)
    }

    fn data_age(&self) -> Option<Duration> {
        Query::data_age(self)
    }

    fn data_footprint(&self) -> DataFootprint {
        match Query::data(self) {
            None => DataFootprint::Empty,
            Some(data) => match serde_json::to_vec(&*data) {
                Ok(bytes) => DataFootprint::Serialized(bytes.len()),
                Err(_) => count_elements(&*data)
                    .map_or(DataFootprint::Opaque, DataFootprint::Elements),
            },
        }
    }

    fn error_message(&self) -> Option<String> {
        Query::error(self).map(|err| err.to_string())
    }

    fn invalidate(&self) {
        Query::invalidate(self)
    }

    fn dispose(&self) {
        Query::dispose(self)
    }

    fn same_query(&self, other: &dyn CachedQuery) -> bool {
        other
            .as_any()
            .downcast_ref::<Query<T>>()
            .is_some_and(|other| self.ptr_eq(other))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::query::QueryOptions;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn test_footprint_tracks_data() {
        let q: Query<Vec<u32>> = Query::new("numbers", QueryOptions::default());
        assert_eq!(q.data_footprint(), DataFootprint::Empty);

        q.set_data(vec![1, 2, 3]);
        assert_eq!(q.data_footprint(), DataFootprint::Serialized("[1,2,3]".len()));
    }

    #[test]
    fn test_non_json_data_counts_elements() {
        // JSON object keys must be strings
        let q: Query<HashMap<(u8, u8), u8>> = Query::new("pairs", QueryOptions::default());
        q.set_data(HashMap::from([((1, 2), 3), ((4, 5), 6)]));
        assert_eq!(q.data_footprint(), DataFootprint::Elements(6));
    }

    #[test]
    fn test_same_query_ignores_wrapping_arc() {
        let q: Query<String> = Query::new("name", QueryOptions::default());
        let first: Arc<dyn CachedQuery> = Arc::new(q.clone());
        let second: Arc<dyn CachedQuery> = Arc::new(q.clone());
        let other: Arc<dyn CachedQuery> = Arc::new(Query::<String>::new("name", QueryOptions::default()));
        let other_type: Arc<dyn CachedQuery> = Arc::new(Query::<u64>::new("name", QueryOptions::default()));

        assert!(first.same_query(second.as_ref()));
        assert!(!first.same_query(other.as_ref()));
        assert!(!first.same_query(other_type.as_ref()));
    }

    #[test]
    fn test_downcast_through_trait_object() {
        let q: Query<String> = Query::new("name", QueryOptions::default());
        let erased: Arc<dyn CachedQuery> = Arc::new(q.clone());

        assert!(erased.as_any().downcast_ref::<Query<String>>().is_some());
        assert!(erased.as_any().downcast_ref::<Query<u64>>().is_none());

        erased.dispose();
        assert!(q.is_disposed());
    }

    #[test]
    fn test_error_message() {
        let q: Query<String> = Query::new("name", QueryOptions::default());
        q.set_error(QueryError::msg("not found"));
        assert_eq!(CachedQuery::error_message(&q), Some("not found".to_string()));
    }
}
