//! Flowtrack Daemon - Background activity sync agent
//!
//! This binary runs as a user service and handles:
//! - Periodic fetching from the local activity source
//! - Privacy transformation and durable queuing
//! - Batch delivery to the remote ingestion API with retry
//! - Graceful shutdown with a final queue flush on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon wires the adapter crates to the sync engine and hands the
//! engine to a scheduler. The scheduler loop is controlled by a
//! `CancellationToken` triggered on receipt of SIGTERM or SIGINT.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use flowtrack_core::config::Config;
use flowtrack_core::domain::AgentVersion;
use flowtrack_core::ports::{IQueueStore, IntegrityStatus};
use flowtrack_remote::IngestClient;
use flowtrack_source::ActivitySourceClient;
use flowtrack_store::{DatabasePool, SqliteQueueStore};
use flowtrack_sync::{SyncEngine, SyncScheduler};

/// Opens the queue store, rebuilding it empty if the file is damaged.
///
/// Losing the offline queue is preferable to an agent that can never start
/// again; the rebuild is logged loudly and checkpoints re-anchor on the
/// next cycle's backfill window.
async fn open_store(config: &Config, db_path: &Path) -> Result<Arc<SqliteQueueStore>> {
    match DatabasePool::new(db_path).await {
        Ok(pool) => {
            let store = SqliteQueueStore::new(pool.pool().clone(), config.queue.max_queue_size);
            match store.integrity_check().await? {
                IntegrityStatus::Ok => return Ok(Arc::new(store)),
                IntegrityStatus::Corrupt(detail) => {
                    warn!(detail, "Queue store failed integrity check");
                    pool.close().await;
                }
            }
        }
        Err(e) => warn!(error = %e, "Queue store unreadable"),
    }

    error!(
        path = %db_path.display(),
        "Rebuilding corrupt queue store; undelivered events are lost"
    );
    std::fs::remove_file(db_path).ok();
    // WAL sidecars would resurrect pages of the old file.
    std::fs::remove_file(db_path.with_extension("db-wal")).ok();
    std::fs::remove_file(db_path.with_extension("db-shm")).ok();

    let pool = DatabasePool::new(db_path)
        .await
        .context("Failed to recreate queue store after corruption")?;
    Ok(Arc::new(SqliteQueueStore::new(
        pool.pool().clone(),
        config.queue.max_queue_size,
    )))
}

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::default_path();
    let config = Config::load_or_default(&config_path);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!(
        config_path = %config_path.display(),
        "Flowtrack daemon starting (flowtrackd)"
    );

    for issue in config.validate() {
        warn!(field = %issue.field, message = %issue.message, "Configuration issue, using anyway");
    }
    if config.remote.api_token.is_none() {
        warn!("No API token configured; deliveries will be refused until one is set");
    }

    let agent_version: AgentVersion = env!("CARGO_PKG_VERSION")
        .parse()
        .context("Package version is not a valid agent version")?;

    let store = open_store(&config, &Config::default_db_path()).await?;
    let source = Arc::new(ActivitySourceClient::new(&config.source));
    let sink = Arc::new(IngestClient::new(&config.remote, agent_version));

    let engine = Arc::new(
        SyncEngine::new(source, sink, store, config.clone(), agent_version)
            .await
            .context("Failed to initialize sync engine")?,
    );

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let scheduler = SyncScheduler::new(
        Arc::clone(&engine),
        config.sync.interval_seconds,
        config.sync.drain_interval_seconds,
        shutdown_token,
    );

    let result = scheduler.run().await;

    match &result {
        Ok(()) => info!("Flowtrack daemon shut down gracefully"),
        Err(e) => error!(error = %e, "Flowtrack daemon exiting with error"),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_child_propagation() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_package_version_parses_as_agent_version() {
        let version: AgentVersion = env!("CARGO_PKG_VERSION").parse().unwrap();
        assert!(version >= AgentVersion::new(0, 1, 0));
    }

    #[test]
    fn test_default_paths_are_non_empty() {
        assert!(!Config::default_path().as_os_str().is_empty());
        assert!(!Config::default_db_path().as_os_str().is_empty());
    }

    #[tokio::test]
    async fn test_open_store_rebuilds_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("queue.db");
        std::fs::write(&db_path, b"definitely not a sqlite database").unwrap();

        let store = open_store(&Config::default(), &db_path).await.unwrap();

        assert_eq!(store.depth().await.unwrap(), 0);
        assert!(matches!(
            store.integrity_check().await.unwrap(),
            IntegrityStatus::Ok
        ));
    }

    #[tokio::test]
    async fn test_open_store_accepts_fresh_path() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("queue.db");

        let store = open_store(&Config::default(), &db_path).await.unwrap();

        assert_eq!(store.depth().await.unwrap(), 0);
        assert!(db_path.exists());
    }
}
