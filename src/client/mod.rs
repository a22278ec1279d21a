//! Client Module
//!
//! The `QueryClient` façade, its in-flight deduplication table and the
//! process-wide default instance.

mod global;
mod in_flight;
mod query_client;

pub use global::{default_client, dispose_default_client};
pub use query_client::{FetchOptions, QueryClient};
