//! Process-wide default client.
//!
//! Created lazily with `CacheConfig::default()` on first use. Tests and
//! multi-tenant code should construct their own [`QueryClient`].

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::info;

use super::QueryClient;
use crate::config::CacheConfig;
use crate::error::Result;

static DEFAULT_CLIENT: Lazy<Mutex<Option<Arc<QueryClient>>>> = Lazy::new(|| Mutex::new(None));

/// Returns the default client, creating it if needed.
pub fn default_client() -> Result<Arc<QueryClient>> {
    let mut slot = DEFAULT_CLIENT.lock();
    if let Some(client) = slot.as_ref() {
        return Ok(client.clone());
    }
    let client = Arc::new(QueryClient::new(CacheConfig::default())?);
    *slot = Some(client.clone());
    info!("Default query client created");
    Ok(client)
}

/// Disposes the default client. The next [`default_client`] call creates a
/// fresh one. Returns false if none existed.
pub fn dispose_default_client() -> bool {
    let client = DEFAULT_CLIENT.lock().take();
    match client {
        Some(client) => {
            client.dispose();
            info!("Default query client disposed");
            true
        }
        None => false,
    }
}
