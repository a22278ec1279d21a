//! Error types for the query cache
//!
//! Provides unified error handling using thiserror. Failures raised by
//! caller-supplied fetch and mutation functions are carried as `anyhow`
//! errors behind an `Arc`, so the same failure can be stored on a query and
//! handed to every caller that joined the fetch.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

// == Query Error ==
/// A shareable failure produced by a fetch or mutation function.
#[derive(Clone)]
pub struct QueryError(Arc<anyhow::Error>);

impl QueryError {
    /// Wraps any error convertible into `anyhow::Error`.
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }

    /// Builds an error from a plain message.
    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    /// Returns the underlying `anyhow` error.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    /// True if both handles point at the same failure.
    pub fn same_as(&self, other: &QueryError) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl fmt::Debug for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl std::error::Error for QueryError {}

impl From<anyhow::Error> for QueryError {
    fn from(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }
}

// == Cache Error Enum ==
/// Unified error type for the query cache.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Operation invoked on a disposed client or cache manager
    #[error("Invalid state: the query cache has been disposed")]
    Disposed,

    /// Key is already registered with a different payload type
    #[error("Type mismatch: query '{key}' holds a different data type")]
    TypeMismatch { key: String },

    /// The fetch function for a key failed
    #[error("Fetch failed for '{key}': {source}")]
    Fetch { key: String, source: QueryError },

    /// A mutation function failed; no invalidation was performed
    #[error("Mutation '{key}' failed: {source}")]
    Mutation { key: String, source: QueryError },

    /// Configuration values out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error (e.g. a fetch task panicked)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Returns the stored fetch/mutation failure, if this error carries one.
    pub fn query_error(&self) -> Option<&QueryError> {
        match self {
            CacheError::Fetch { source, .. } | CacheError::Mutation { source, .. } => Some(source),
            _ => None,
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the query cache.
pub type Result<T> = std::result::Result<T, CacheError>;
