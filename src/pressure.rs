//! Memory Pressure Module
//!
//! Registry of live cache managers that broadcasts a cleanup request when an
//! external source reports memory pressure. The coordinator does not detect
//! pressure itself.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::CacheManager;

static GLOBAL_COORDINATOR: Lazy<Arc<MemoryPressureCoordinator>> =
    Lazy::new(|| Arc::new(MemoryPressureCoordinator::new()));

/// Aggregated view across registered managers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PressureInfo {
    pub manager_count: usize,
    pub total_queries: usize,
    pub total_memory_bytes: usize,
    pub managers_near_limit: usize,
    pub is_under_pressure: bool,
}

/// Result of one pressure broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PressureOutcome {
    /// Managers whose cleanup completed
    pub cleaned: usize,
    /// Managers whose cleanup failed or panicked
    pub failed: usize,
    /// Queries removed across all managers
    pub removed: usize,
}

/// Process-wide (or test-local) registry of cache managers.
#[derive(Debug, Default)]
pub struct MemoryPressureCoordinator {
    managers: Mutex<HashMap<u64, Weak<CacheManager>>>,
}

impl MemoryPressureCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lazily created process-wide coordinator.
    pub fn global() -> Arc<Self> {
        GLOBAL_COORDINATOR.clone()
    }

    /// Adds `manager` to the registry. Idempotent.
    pub fn register(&self, manager: &Arc<CacheManager>) {
        let mut managers = self.managers.lock();
        if managers.insert(manager.id(), Arc::downgrade(manager)).is_none() {
            debug!(manager = manager.id(), "Registered for memory pressure");
        }
    }

    /// Removes `manager` from the registry. Idempotent.
    pub fn unregister(&self, manager: &CacheManager) {
        if self.managers.lock().remove(&manager.id()).is_some() {
            debug!(manager = manager.id(), "Unregistered from memory pressure");
        }
    }

    pub fn is_registered(&self, manager: &CacheManager) -> bool {
        self.managers.lock().contains_key(&manager.id())
    }

    /// Live registered managers; dropped ones are pruned.
    fn live_managers(&self) -> Vec<Arc<CacheManager>> {
        let mut managers = self.managers.lock();
        managers.retain(|_, weak| weak.strong_count() > 0);
        managers.values().filter_map(Weak::upgrade).collect()
    }

    pub fn manager_count(&self) -> usize {
        self.live_managers().len()
    }

    // == Trigger ==
    /// Runs `cleanup()` on every registered manager. One manager failing
    /// (or panicking) does not stop the others.
    pub fn trigger_memory_pressure(&self) -> PressureOutcome {
        let mut outcome = PressureOutcome::default();

        for manager in self.live_managers() {
            match catch_unwind(AssertUnwindSafe(|| manager.cleanup())) {
                Ok(Ok(report)) => {
                    outcome.cleaned += 1;
                    outcome.removed += report.removed();
                }
                Ok(Err(err)) => {
                    outcome.failed += 1;
                    warn!(manager = manager.id(), error = %err, "Cleanup failed under memory pressure");
                }
                Err(_) => {
                    outcome.failed += 1;
                    warn!(manager = manager.id(), "Cleanup panicked under memory pressure");
                }
            }
        }

        info!(
            cleaned = outcome.cleaned,
            failed = outcome.failed,
            removed = outcome.removed,
            "Memory pressure handled"
        );
        outcome
    }

    // == Pressure Info ==
    pub fn pressure_info(&self) -> PressureInfo {
        let mut info = PressureInfo::default();
        for manager in self.live_managers() {
            let stats = manager.stats();
            info.manager_count += 1;
            info.total_queries += stats.query_count;
            info.total_memory_bytes += stats.memory_bytes;
            if manager.is_near_limit() {
                info.managers_near_limit += 1;
            }
        }
        info.is_under_pressure = info.managers_near_limit > 0;
        info
    }
}
