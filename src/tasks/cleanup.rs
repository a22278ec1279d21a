//! Periodic Cleanup Task
//!
//! Background task that periodically sweeps a cache manager.

use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::cache::CacheManager;

/// Spawns a background task that runs `cleanup()` on the manager every
/// `interval`.
///
/// The task holds only a weak reference and exits once the manager is
/// dropped or disposed. Returns `None` when no tokio runtime is current.
///
/// # Example
/// ```ignore
/// let handle = spawn_cleanup_task(Arc::downgrade(&manager), Duration::from_secs(60));
/// // Later, during shutdown:
/// if let Some(handle) = handle { handle.abort(); }
/// ```
pub fn spawn_cleanup_task(
    manager: Weak<CacheManager>,
    interval: Duration,
) -> Option<JoinHandle<()>> {
    let Ok(runtime) = Handle::try_current() else {
        debug!("No tokio runtime available, periodic cleanup disabled");
        return None;
    };

    Some(runtime.spawn(async move {
        debug!("Starting cache cleanup task with interval of {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            let Some(manager) = manager.upgrade() else {
                trace!("Cache manager dropped, stopping cleanup task");
                break;
            };

            match manager.cleanup() {
                Ok(report) if report.removed() > 0 => {
                    info!(
                        "Periodic cleanup: removed {} expired and {} evicted queries",
                        report.expired, report.evicted
                    );
                }
                Ok(_) => debug!("Periodic cleanup: nothing to remove"),
                Err(_) => {
                    debug!("Cache manager disposed, stopping cleanup task");
                    break;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::CacheConfig;
    use crate::query::{Query, QueryOptions};

    fn manager_with_interval(interval: Duration) -> Arc<CacheManager> {
        CacheManager::builder(
            CacheConfig::unlimited()
                .with_memory_pressure_handling(false)
                .with_cleanup_interval(interval),
        )
        .without_coordinator()
        .build()
        .unwrap()
    }

    #[test]
    fn test_no_task_outside_runtime() {
        let manager = manager_with_interval(Duration::ZERO);
        assert!(spawn_cleanup_task(Arc::downgrade(&manager), Duration::from_millis(10)).is_none());
    }

    #[tokio::test]
    async fn test_cleanup_task_removes_stale_queries() {
        let manager = manager_with_interval(Duration::from_millis(50));
        let idle: Query<String> = Query::new("idle", QueryOptions::default());
        manager.add_query("idle", Arc::new(idle.clone())).unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!manager.contains_key("idle"), "Stale query should have been cleaned up");
        assert!(idle.is_disposed());
        assert!(manager.stats().last_cleanup.is_some());
    }

    #[tokio::test]
    async fn test_cleanup_task_preserves_fresh_queries() {
        let manager = manager_with_interval(Duration::from_millis(50));
        let fresh: Query<String> = Query::new("fresh", QueryOptions::default());
        fresh.set_data("value".to_string());
        manager.add_query("fresh", Arc::new(fresh)).unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(manager.contains_key("fresh"), "Fresh query should not be removed");
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_when_manager_dropped() {
        let manager = manager_with_interval(Duration::ZERO);
        let handle = spawn_cleanup_task(Arc::downgrade(&manager), Duration::from_millis(10)).unwrap();

        drop(manager);
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(handle.is_finished(), "Task should exit once the manager is gone");
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let manager = manager_with_interval(Duration::ZERO);
        let handle = spawn_cleanup_task(Arc::downgrade(&manager), Duration::from_secs(1)).unwrap();

        handle.abort();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
