//! Scheduled task handles owned by a query.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

/// Runs `task` once after `delay` on the current tokio runtime.
///
/// Returns `None` when called outside a runtime; the timer is then skipped.
pub(crate) fn schedule<F>(delay: Duration, task: F) -> Option<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        })),
        Err(_) => {
            trace!("No tokio runtime available, timer not scheduled");
            None
        }
    }
}

/// Aborts a previously scheduled timer, if any.
pub(crate) fn cancel(timer: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = timer.take() {
        handle.abort();
    }
}
