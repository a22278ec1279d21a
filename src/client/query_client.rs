//! Query Client Module
//!
//! Orchestrates fetching on top of the cache manager: get-or-create of typed
//! queries, fresh-data short-circuit, in-flight deduplication, atomic
//! multi-key invalidation and mutations with post-success invalidation.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, warn};

use super::in_flight::{InFlightTable, SharedFetch};
use crate::cache::{CacheManager, CacheStats, CleanupReport};
use crate::config::CacheConfig;
use crate::error::{CacheError, QueryError, Result};
use crate::query::{CachedQuery, ExpiryCallback, Query, QueryData, QueryOptions, QueryStream};

// == Fetch Options ==
/// Per-call fetch settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Options for a query created by this call; the client defaults apply
    /// when unset. An existing query keeps its own options.
    pub query: Option<QueryOptions>,
    /// Fetch even if fresh data is cached.
    pub force_refetch: bool,
}

impl FetchOptions {
    pub fn with_query_options(mut self, options: QueryOptions) -> Self {
        self.query = Some(options);
        self
    }

    pub fn force(mut self) -> Self {
        self.force_refetch = true;
        self
    }
}

// == Query Client ==
/// Entry point for application code and UI bindings.
pub struct QueryClient {
    cache: Arc<CacheManager>,
    in_flight: Arc<InFlightTable>,
    defaults: QueryOptions,
    disposed: AtomicBool,
}

impl QueryClient {
    // == Constructors ==
    /// Creates a client backed by a new cache manager.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Ok(Self::with_manager(CacheManager::new(config)?))
    }

    /// Creates a client on top of an existing manager.
    pub fn with_manager(cache: Arc<CacheManager>) -> Self {
        Self {
            cache,
            in_flight: Arc::new(InFlightTable::default()),
            defaults: QueryOptions::default(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Sets the options used for queries created without explicit options.
    pub fn with_query_defaults(mut self, defaults: QueryOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn cache_manager(&self) -> &Arc<CacheManager> {
        &self.cache
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

    // == Get Query ==
    /// Returns the query for `key`, creating it with the client defaults.
    pub fn get_query<T: QueryData>(&self, key: &str) -> Result<Query<T>> {
        self.get_query_with(key, self.defaults)
    }

    /// Returns the query for `key`, creating it with `options` if absent.
    pub fn get_query_with<T: QueryData>(&self, key: &str, options: QueryOptions) -> Result<Query<T>> {
        self.ensure_active()?;
        let cache = Arc::downgrade(&self.cache);
        let erased = self.cache.get_or_insert_with(key, || {
            let on_expire: ExpiryCallback = Arc::new(move |key: &str| {
                if let Some(cache) = cache.upgrade() {
                    cache.expire_if_idle(key);
                }
            });
            Arc::new(Query::<T>::with_expiry_callback(key, options, on_expire))
        })?;
        downcast(key, erased.as_ref())
    }

    // == Fetch ==
    /// Returns fresh cached data or runs `fetch_fn`, sharing one run among
    /// all concurrent callers for the same key.
    pub async fn fetch_query<T, F, Fut, E>(&self, key: &str, fetch_fn: F) -> Result<Arc<T>>
    where
        T: QueryData,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        self.fetch_query_with(key, FetchOptions::default(), fetch_fn).await
    }

    /// Like [`fetch_query`](Self::fetch_query) but always runs (or joins) a fetch.
    pub async fn refetch_query<T, F, Fut, E>(&self, key: &str, fetch_fn: F) -> Result<Arc<T>>
    where
        T: QueryData,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        self.fetch_query_with(key, FetchOptions::default().force(), fetch_fn)
            .await
    }

    /// Warms the cache. A fetch failure is recorded on the query and logged
    /// instead of being returned.
    pub async fn prefetch_query<T, F, Fut, E>(&self, key: &str, fetch_fn: F) -> Result<()>
    where
        T: QueryData,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        match self.fetch_query::<T, _, _, _>(key, fetch_fn).await {
            Ok(_) => Ok(()),
            Err(CacheError::Fetch { source, .. }) => {
                debug!(key, error = %source, "Prefetch failed");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn fetch_query_with<T, F, Fut, E>(
        &self,
        key: &str,
        options: FetchOptions,
        fetch_fn: F,
    ) -> Result<Arc<T>>
    where
        T: QueryData,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let query = self.get_query_with::<T>(key, options.query.unwrap_or(self.defaults))?;

        if !options.force_refetch {
            let state = query.state();
            if let Some(data) = &state.data {
                if !state.is_stale(query.options().stale_time) {
                    debug!(key, "Serving fresh cached data");
                    return Ok(data.clone());
                }
            }
        }

        let (fetch, started) = self.in_flight.join_or_start(key, |id| {
            query.set_loading();
            self.spawn_fetch(key, id, query.clone(), fetch_fn)
        })?;
        if !started {
            debug!(key, "Joining in-flight fetch");
        }
        fetch.await
    }

    /// Runs the fetch as its own task so it settles even if every caller
    /// stops waiting.
    fn spawn_fetch<T, F, Fut, E>(&self, key: &str, id: u64, query: Query<T>, fetch_fn: F) -> SharedFetch<T>
    where
        T: QueryData,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        debug!(key, "Starting fetch");
        let cache = Arc::downgrade(&self.cache);
        let in_flight = self.in_flight.clone();
        let task_key = key.to_string();

        let task = tokio::spawn(async move {
            let result = match fetch_fn().await {
                Ok(value) => {
                    let data = Arc::new(value);
                    // No-op if the query was removed meanwhile
                    query.set_shared_data(data.clone());
                    Ok(data)
                }
                Err(err) => {
                    let err = QueryError::new(err);
                    query.set_error(err.clone());
                    Err(CacheError::Fetch {
                        key: task_key.clone(),
                        source: err,
                    })
                }
            };
            if let Some(cache) = cache.upgrade() {
                cache.refresh_entry(&task_key);
            }
            in_flight.settle(&task_key, id);
            result
        });

        let in_flight = self.in_flight.clone();
        let join_key = key.to_string();
        task.map(move |joined| match joined {
            Ok(result) => result,
            Err(err) => {
                warn!(key = %join_key, error = %err, "Fetch task did not complete");
                in_flight.settle(&join_key, id);
                Err(CacheError::Internal(format!(
                    "fetch task for '{}' did not complete: {}",
                    join_key, err
                )))
            }
        })
        .boxed()
        .shared()
    }

    // == Direct Data Access ==
    /// Commits `value` without fetching, creating the query if needed.
    pub fn set_query_data<T: QueryData>(&self, key: &str, value: T) -> Result<()> {
        let query = self.get_query::<T>(key)?;
        query.set_data(value);
        self.cache.refresh_entry(key);
        Ok(())
    }

    /// Cached data for `key`, if any. Never creates a query.
    pub fn get_query_data<T: QueryData>(&self, key: &str) -> Result<Option<Arc<T>>> {
        self.ensure_active()?;
        match self.cache.peek(key) {
            Some(erased) => Ok(downcast::<T>(key, erased.as_ref())?.data()),
            None => Ok(None),
        }
    }

    // == Invalidation ==
    /// Invalidates `key` if it exists. Returns whether it did.
    pub fn invalidate_query(&self, key: &str) -> Result<bool> {
        Ok(self.invalidate_queries([key])? == 1)
    }

    /// Resolves every existing query first, then invalidates them all.
    /// Missing keys are skipped. Returns the number invalidated.
    pub fn invalidate_queries<I, K>(&self, keys: I) -> Result<usize>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        self.ensure_active()?;
        let queries = self.cache.peek_many(keys);
        for query in &queries {
            query.invalidate();
        }
        debug!(count = queries.len(), "Invalidated queries");
        Ok(queries.len())
    }

    // == Mutate ==
    /// Runs `mutation_fn(variables)` and, only if it succeeds, invalidates
    /// `invalidate` atomically.
    pub async fn mutate<V, R, F, Fut, E, I, K>(
        &self,
        key: &str,
        mutation_fn: F,
        variables: V,
        invalidate: I,
    ) -> Result<R>
    where
        F: FnOnce(V) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        E: Into<anyhow::Error>,
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        self.ensure_active()?;
        let keys: Vec<String> = invalidate
            .into_iter()
            .map(|k| k.as_ref().to_string())
            .collect();

        match mutation_fn(variables).await {
            Ok(result) => {
                let count = self.invalidate_queries(&keys)?;
                debug!(key, invalidated = count, "Mutation succeeded");
                Ok(result)
            }
            Err(err) => {
                let source = QueryError::new(err);
                debug!(key, error = %source, "Mutation failed, nothing invalidated");
                Err(CacheError::Mutation {
                    key: key.to_string(),
                    source,
                })
            }
        }
    }

    // == Removal ==
    /// Removes and disposes the query and forgets its in-flight marker.
    ///
    /// A running fetch is not cancelled; its result lands on the disposed
    /// query and is discarded.
    pub fn remove_query(&self, key: &str) -> Result<bool> {
        self.ensure_active()?;
        self.in_flight.remove(key);
        Ok(self.cache.remove_query(key))
    }

    /// Disposes every query and forgets all in-flight markers.
    pub fn clear(&self) -> Result<()> {
        self.ensure_active()?;
        self.cache.clear();
        self.in_flight.clear();
        Ok(())
    }

    // == Watch ==
    /// Change stream for `key`, creating the query if needed.
    pub fn watch_query<T: QueryData>(&self, key: &str) -> Result<QueryStream<T>> {
        Ok(self.get_query::<T>(key)?.watch())
    }

    // == Pass-through ==
    pub fn cleanup(&self) -> Result<CleanupReport> {
        self.ensure_active()?;
        self.cache.cleanup()
    }

    pub fn cache_stats(&self) -> Result<CacheStats> {
        self.ensure_active()?;
        Ok(self.cache.stats())
    }

    pub fn is_cache_near_limit(&self) -> Result<bool> {
        self.ensure_active()?;
        Ok(self.cache.is_near_limit())
    }

    /// True while a fetch for `key` is in flight.
    pub fn is_fetching(&self, key: &str) -> bool {
        self.in_flight.contains(key)
    }

    // == Dispose ==
    /// Disposes the cache manager (and every query). Idempotent; all later
    /// calls fail with [`CacheError::Disposed`].
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cache.dispose();
        self.in_flight.clear();
        debug!("Query client disposed");
    }
}

fn downcast<T: QueryData>(key: &str, erased: &dyn CachedQuery) -> Result<Query<T>> {
    erased
        .as_any()
        .downcast_ref::<Query<T>>()
        .cloned()
        .ok_or_else(|| CacheError::TypeMismatch {
            key: key.to_string(),
        })
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("cache", &self.cache)
            .field("in_flight", &self.in_flight.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
