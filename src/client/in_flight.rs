//! In-flight fetch table used for request deduplication.
//!
//! Each key maps to at most one shared fetch. Entries carry a generation id
//! so a fetch that settles after its key was removed (and possibly refetched)
//! never clears the newer entry.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;

use crate::error::{CacheError, Result};

/// A fetch that any number of callers can await for the same outcome.
pub(crate) type SharedFetch<T> = Shared<BoxFuture<'static, Result<Arc<T>>>>;

struct InFlightEntry {
    id: u64,
    /// `SharedFetch<T>` for the payload type the key was fetched with
    fetch: Box<dyn Any + Send + Sync>,
}

#[derive(Default)]
pub(crate) struct InFlightTable {
    entries: Mutex<HashMap<String, InFlightEntry>>,
    next_id: AtomicU64,
}

impl InFlightTable {
    /// Joins the fetch already running for `key`, or starts one with
    /// `start(id)` while holding the table lock.
    ///
    /// Returns the shared fetch and whether this call started it.
    pub(crate) fn join_or_start<T, F>(&self, key: &str, start: F) -> Result<(SharedFetch<T>, bool)>
    where
        T: Send + Sync + 'static,
        F: FnOnce(u64) -> SharedFetch<T>,
    {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(key) {
            let fetch = entry
                .fetch
                .downcast_ref::<SharedFetch<T>>()
                .cloned()
                .ok_or_else(|| CacheError::TypeMismatch {
                    key: key.to_string(),
                })?;
            return Ok((fetch, false));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let fetch = start(id);
        entries.insert(
            key.to_string(),
            InFlightEntry {
                id,
                fetch: Box::new(fetch.clone()),
            },
        );
        Ok((fetch, true))
    }

    /// Clears the marker for `key` if it still belongs to fetch `id`.
    pub(crate) fn settle(&self, key: &str, id: u64) {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|entry| entry.id == id) {
            entries.remove(key);
        }
    }

    pub(crate) fn remove(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
