//! Interval-driven scheduler
//!
//! Drives the engine on two independent cadences: the live sync cycle and
//! the shorter retry-drain pass. Shutdown is cooperative: a cancellation
//! token lets an in-flight cycle finish its bounded network call, then a
//! final flush drains what it can before returning.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::SyncEngine;

/// Runs the engine's live cycle and retry-drain pass on timers
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    sync_interval: Duration,
    drain_interval: Duration,
    shutdown: CancellationToken,
}

impl SyncScheduler {
    /// Creates a scheduler over an engine
    #[must_use]
    pub fn new(
        engine: Arc<SyncEngine>,
        sync_interval_seconds: u64,
        drain_interval_seconds: u64,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            sync_interval: Duration::from_secs(sync_interval_seconds),
            drain_interval: Duration::from_secs(drain_interval_seconds),
            shutdown,
        }
    }

    /// Runs until the shutdown token fires, then performs one final flush.
    ///
    /// An engine error fails the scheduler only when it is a storage
    /// fault; those propagate to the daemon as fatal.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut sync_tick = tokio::time::interval(self.sync_interval);
        let mut drain_tick = tokio::time::interval(self.drain_interval);
        sync_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        drain_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // The first tick of a tokio interval fires immediately; let the
        // drain tick pass once so startup runs a live cycle first.
        drain_tick.tick().await;

        info!(
            sync_interval_secs = self.sync_interval.as_secs(),
            drain_interval_secs = self.drain_interval.as_secs(),
            "Sync scheduler started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, flushing queue");
                    self.engine.flush().await;
                    return Ok(());
                }
                _ = sync_tick.tick() => {
                    debug!("Live sync cycle tick");
                    if let Err(e) = self.engine.run_cycle().await {
                        error!(error = %e, "Sync cycle failed on a storage fault");
                        return Err(e);
                    }
                }
                _ = drain_tick.tick() => {
                    debug!("Retry drain tick");
                    if let Err(e) = self.engine.run_drain().await {
                        error!(error = %e, "Retry drain failed on a storage fault");
                        return Err(e);
                    }
                }
            }
        }
    }
}
