//! Query Cache driver
//!
//! Runs a small simulated workload against a `QueryClient` and keeps the
//! cache alive until shutdown, logging statistics along the way.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use query_cache::{CacheConfig, MemoryPressureCoordinator, QueryClient, QueryOptions};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Todo {
    id: u32,
    title: String,
    done: bool,
}

/// Stands in for a remote API call.
async fn load_todos(count: u32) -> anyhow::Result<Vec<Todo>> {
    tokio::time::sleep(Duration::from_millis(25)).await;
    Ok((1..=count)
        .map(|id| Todo {
            id,
            title: format!("todo #{}", id),
            done: id % 3 == 0,
        })
        .collect())
}

async fn complete_todo(id: u32) -> anyhow::Result<u32> {
    tokio::time::sleep(Duration::from_millis(10)).await;
    if id == 0 {
        anyhow::bail!("todo 0 does not exist");
    }
    Ok(id)
}

/// Main entry point for the query cache driver.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the query client
/// 4. Run the simulated workload
/// 5. Wait for Ctrl+C/SIGTERM, then flush under memory pressure and dispose
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "query_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting query cache driver");

    let config = CacheConfig::from_env();
    info!(
        "Configuration loaded: max_queries={}, max_memory_bytes={}, policy={}, cleanup_interval={}s",
        config.max_queries,
        config.max_memory_bytes,
        config.eviction_policy,
        config.cleanup_interval.as_secs()
    );

    let client = Arc::new(
        QueryClient::new(config)?
            .with_query_defaults(QueryOptions::default().with_stale_time(Duration::from_secs(30))),
    );

    run_workload(&client).await?;

    shutdown_signal().await;

    let outcome = MemoryPressureCoordinator::global().trigger_memory_pressure();
    info!(removed = outcome.removed, "Flushed cache before shutdown");
    client.dispose();

    info!("Shutdown complete");
    Ok(())
}

async fn run_workload(client: &Arc<QueryClient>) -> anyhow::Result<()> {
    // Concurrent fetches of one key share a single load
    let (first, second) = tokio::join!(
        client.fetch_query("todos", || load_todos(20)),
        client.fetch_query("todos", || load_todos(20)),
    );
    let (first, second) = (first?, second?);
    info!(
        count = first.len(),
        shared = Arc::ptr_eq(&first, &second),
        "Loaded todos"
    );

    for page in 1..=5u32 {
        client
            .prefetch_query(&format!("todos/page/{}", page), move || load_todos(page * 4))
            .await?;
    }

    let mut updates = client.watch_query::<Vec<Todo>>("todos")?;
    let watcher = tokio::spawn(async move {
        use futures::StreamExt;
        while let Some(snapshot) = updates.next().await {
            info!(key = %snapshot.key, status = %snapshot.status(), stale = snapshot.is_stale, "Query changed");
        }
    });

    let done = client
        .mutate("complete-todo", complete_todo, 3, ["todos", "todos/page/1"])
        .await?;
    info!(id = done, "Completed todo");

    if let Err(err) = client
        .mutate("complete-todo", complete_todo, 0, ["todos"])
        .await
    {
        warn!(error = %err, "Mutation rejected");
    }

    client.refetch_query("todos", || load_todos(20)).await?;

    let stats = client.cache_stats()?;
    info!(
        queries = stats.query_count,
        memory_bytes = stats.memory_bytes,
        hit_ratio = stats.hit_ratio(),
        "Cache statistics"
    );
    let pressure = MemoryPressureCoordinator::global().pressure_info();
    info!(
        managers = pressure.manager_count,
        under_pressure = pressure.is_under_pressure,
        "Memory pressure info"
    );

    // The watch stream ends once the client is disposed
    drop(watcher);
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
