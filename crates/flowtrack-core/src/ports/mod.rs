//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the trait boundaries the sync engine depends on; their
//! implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`ISourceReader`] - Local activity-data provider (bucket discovery, incremental fetch)
//! - [`IRemoteSink`] - Remote ingestion API (batch send, heartbeat, version signals)
//! - [`IQueueStore`] - Durable queue and checkpoint persistence

pub mod queue_store;
pub mod remote_sink;
pub mod source_reader;

pub use queue_store::{IQueueStore, IntegrityStatus};
pub use remote_sink::{BatchOutcome, BatchResponse, HeartbeatAck, IRemoteSink};
pub use source_reader::{ISourceReader, SourceBucket};
