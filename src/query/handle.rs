//! Query Module
//!
//! The per-key state machine: `idle -> loading -> {success, error}`,
//! `success/error -> idle` through `invalidate`, and a one-way transition to
//! disposed from any state.
//!
//! Every transition is applied under a single lock together with the change
//! notification, so a subscriber never observes a half-applied state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::state::{QueryOptions, QuerySnapshot, QueryState, QueryStatus};
use super::timers;
use crate::error::QueryError;

/// Payload types a query can hold.
///
/// `Serialize` is used only to estimate the payload's cache footprint.
pub trait QueryData: Serialize + Send + Sync + 'static {}

impl<T: Serialize + Send + Sync + 'static> QueryData for T {}

/// Invoked with the query key when the cache-time timer elapses while the
/// query has no subscribers.
pub type ExpiryCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Change-notification stream of a query. Ends when the query is disposed.
pub type QueryStream<T> = BoxStream<'static, QuerySnapshot<T>>;

// == Query ==
/// A cheaply cloneable handle to one cached item.
pub struct Query<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    key: String,
    options: QueryOptions,
    created_at: Instant,
    disposed: AtomicBool,
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    state: QueryState<T>,
    /// Dropped on dispose, which closes every subscriber stream
    notifier: Option<watch::Sender<QueryState<T>>>,
    stale_timer: Option<JoinHandle<()>>,
    expiry_timer: Option<JoinHandle<()>>,
    on_expire: Option<ExpiryCallback>,
}

impl<T> Inner<T> {
    fn notify(&self) {
        if let Some(tx) = &self.notifier {
            tx.send_replace(self.state.clone());
        }
    }

    fn listener_count(&self) -> usize {
        self.notifier.as_ref().map_or(0, |tx| tx.receiver_count())
    }
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: QueryData> Query<T> {
    // == Constructors ==
    /// Creates an idle query with no expiry callback.
    pub fn new(key: impl Into<String>, options: QueryOptions) -> Self {
        Self::build(key.into(), options, None)
    }

    /// Creates an idle query that reports cache-time expiry through `on_expire`.
    pub fn with_expiry_callback(
        key: impl Into<String>,
        options: QueryOptions,
        on_expire: ExpiryCallback,
    ) -> Self {
        Self::build(key.into(), options, Some(on_expire))
    }

    fn build(key: String, options: QueryOptions, on_expire: Option<ExpiryCallback>) -> Self {
        let (notifier, _) = watch::channel(QueryState::idle());
        Self {
            shared: Arc::new(Shared {
                key,
                options,
                created_at: Instant::now(),
                disposed: AtomicBool::new(false),
                inner: Mutex::new(Inner {
                    state: QueryState::idle(),
                    notifier: Some(notifier),
                    stale_timer: None,
                    expiry_timer: None,
                    on_expire,
                }),
            }),
        }
    }

    // == Accessors ==
    pub fn key(&self) -> &str {
        &self.shared.key
    }

    pub fn options(&self) -> QueryOptions {
        self.shared.options
    }

    pub fn created_at(&self) -> Instant {
        self.shared.created_at
    }

    /// A consistent copy of the current state.
    pub fn state(&self) -> QueryState<T> {
        self.shared.inner.lock().state.clone()
    }

    pub fn status(&self) -> QueryStatus {
        self.shared.inner.lock().state.status
    }

    pub fn data(&self) -> Option<Arc<T>> {
        self.shared.inner.lock().state.data.clone()
    }

    pub fn error(&self) -> Option<QueryError> {
        self.shared.inner.lock().state.error.clone()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.shared.inner.lock().state.last_updated
    }

    pub fn has_data(&self) -> bool {
        self.shared.inner.lock().state.data.is_some()
    }

    pub fn is_stale(&self) -> bool {
        self.shared
            .inner
            .lock()
            .state
            .is_stale(self.shared.options.stale_time)
    }

    /// Time since the last data/error commit.
    pub fn data_age(&self) -> Option<Duration> {
        self.shared.inner.lock().state.age()
    }

    /// True once the cache time has elapsed since the last commit (or since
    /// creation if nothing was ever committed).
    pub fn is_cache_expired(&self) -> bool {
        let idle_since = self
            .shared
            .inner
            .lock()
            .state
            .updated_at
            .unwrap_or(self.shared.created_at);
        idle_since.elapsed() >= self.shared.options.cache_time
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// True if both handles refer to the same query.
    pub fn ptr_eq(&self, other: &Query<T>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Number of open change streams.
    pub fn listener_count(&self) -> usize {
        self.shared.inner.lock().listener_count()
    }

    pub fn has_listeners(&self) -> bool {
        self.listener_count() > 0
    }

    // == Transitions ==
    /// Marks the query as loading.
    pub fn set_loading(&self) {
        self.transition(|inner| inner.state.status = QueryStatus::Loading);
    }

    /// Commits fresh data, clearing any previous error.
    pub fn set_data(&self, value: T) {
        self.set_shared_data(Arc::new(value));
    }

    /// Commits data that is already shared with a caller.
    pub fn set_shared_data(&self, data: Arc<T>) {
        let weak = Arc::downgrade(&self.shared);
        let options = self.shared.options;
        self.transition(move |inner| {
            inner.state.data = Some(data);
            inner.state.error = None;
            inner.state.status = QueryStatus::Success;
            inner.state.mark_updated();
            Self::restart_stale_timer(inner, &weak, options.stale_time);
            Self::restart_expiry_timer(inner, &weak, options.cache_time);
        });
    }

    /// Records a failure, clearing any previous data.
    pub fn set_error(&self, err: impl Into<QueryError>) {
        let err = err.into();
        let weak = Arc::downgrade(&self.shared);
        let cache_time = self.shared.options.cache_time;
        self.transition(move |inner| {
            inner.state.data = None;
            inner.state.error = Some(err);
            inner.state.status = QueryStatus::Error;
            inner.state.mark_updated();
            timers::cancel(&mut inner.stale_timer);
            Self::restart_expiry_timer(inner, &weak, cache_time);
        });
    }

    /// Returns the query to idle and forgets when it was updated. The last
    /// data or error stays readable while a refetch is pending.
    pub fn invalidate(&self) {
        self.transition(|inner| {
            inner.state.status = QueryStatus::Idle;
            inner.state.clear_updated();
            timers::cancel(&mut inner.stale_timer);
        });
    }

    /// Cancels timers, closes the change stream and drops the expiry
    /// callback. Idempotent; every later transition is a no-op.
    pub fn dispose(&self) {
        let mut inner = self.shared.inner.lock();
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        timers::cancel(&mut inner.stale_timer);
        timers::cancel(&mut inner.expiry_timer);
        inner.notifier = None;
        inner.on_expire = None;
        trace!(key = %self.shared.key, "Query disposed");
    }

    // == Watch ==
    /// Subscribes to change notifications.
    ///
    /// Only changes after the call are emitted; read `state()` for the
    /// current value. A disposed query yields an empty stream.
    ///
    /// The stream delivers the latest state, not every transition: a
    /// subscriber that polls after several transitions sees one snapshot of
    /// the newest state (e.g. `success` without the `loading` before it).
    /// Consecutive snapshots are still in commit order.
    pub fn watch(&self) -> QueryStream<T> {
        let rx = {
            let inner = self.shared.inner.lock();
            match &inner.notifier {
                Some(tx) => tx.subscribe(),
                None => return stream::empty().boxed(),
            }
        };
        let key = self.shared.key.clone();
        let stale_time = self.shared.options.stale_time;

        stream::unfold(rx, move |mut rx| {
            let key = key.clone();
            async move {
                rx.changed().await.ok()?;
                let state = (*rx.borrow_and_update()).clone();
                let is_stale = state.is_stale(stale_time);
                Some((QuerySnapshot { key, state, is_stale }, rx))
            }
        })
        .boxed()
    }

    // == Internals ==
    fn transition<F>(&self, apply: F)
    where
        F: FnOnce(&mut Inner<T>),
    {
        let mut inner = self.shared.inner.lock();
        // Checked under the lock so a concurrent dispose cannot interleave
        if self.is_disposed() {
            trace!(key = %self.shared.key, "Ignoring transition on disposed query");
            return;
        }
        apply(&mut inner);
        inner.notify();
    }

    fn restart_stale_timer(
        inner: &mut Inner<T>,
        weak: &Weak<Shared<T>>,
        stale_time: Option<Duration>,
    ) {
        timers::cancel(&mut inner.stale_timer);
        let Some(stale_time) = stale_time else {
            return;
        };
        let weak = weak.clone();
        inner.stale_timer = timers::schedule(stale_time, move || {
            if let Some(shared) = weak.upgrade() {
                Query { shared }.notify_stale();
            }
        });
    }

    fn restart_expiry_timer(inner: &mut Inner<T>, weak: &Weak<Shared<T>>, cache_time: Duration) {
        timers::cancel(&mut inner.expiry_timer);
        let weak = weak.clone();
        inner.expiry_timer = timers::schedule(cache_time, move || {
            if let Some(shared) = weak.upgrade() {
                Query { shared }.on_cache_time_elapsed();
            }
        });
    }

    /// Staleness is derived, not stored; subscribers just get a nudge.
    fn notify_stale(&self) {
        let mut inner = self.shared.inner.lock();
        if self.is_disposed() {
            return;
        }
        inner.stale_timer = None;
        if let Some(tx) = &inner.notifier {
            tx.send_modify(|_| {});
        }
    }

    fn on_cache_time_elapsed(&self) {
        let callback = {
            let mut inner = self.shared.inner.lock();
            if self.is_disposed() {
                return;
            }
            inner.expiry_timer = None;
            if inner.listener_count() > 0 {
                trace!(key = %self.shared.key, "Cache time elapsed but query is observed");
                return;
            }
            inner.on_expire.clone()
        };
        if let Some(callback) = callback {
            debug!(key = %self.shared.key, "Cache time elapsed, requesting removal");
            callback(&self.shared.key);
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        timers::cancel(&mut inner.stale_timer);
        timers::cancel(&mut inner.expiry_timer);
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("Query")
            .field("key", &self.shared.key)
            .field("status", &inner.state.status)
            .field("disposed", &self.shared.disposed.load(Ordering::Acquire))
            .finish()
    }
}
