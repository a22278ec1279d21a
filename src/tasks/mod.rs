//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a cache is alive.
//!
//! # Tasks
//! - Cleanup: sweeps expired queries and re-enforces bounds at configured intervals

mod cleanup;

pub use cleanup::spawn_cleanup_task;
