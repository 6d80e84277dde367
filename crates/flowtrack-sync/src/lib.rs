//! Flowtrack Sync - Engine and scheduling
//!
//! The orchestration layer between the ports:
//! - **SyncEngine** - the per-cycle state machine (fetch, transform, send,
//!   reconcile) plus the retry-drain pass over the offline queue
//! - **RetryPolicy** - exponential backoff with bounded jitter
//! - **SyncScheduler** - interval-driven loop with graceful shutdown
//! - **StatusSnapshot** - observable engine state over a watch channel

pub mod backoff;
pub mod engine;
pub mod scheduler;
pub mod status;

pub use backoff::RetryPolicy;
pub use engine::SyncEngine;
pub use scheduler::SyncScheduler;
pub use status::{EnginePhase, StatusSnapshot};
