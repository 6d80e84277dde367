//! Domain entities and business logic
//!
//! Core domain types for Flowtrack:
//! - Newtypes for type-safe identifiers and validated values
//! - Raw and sanitized event types
//! - Per-bucket sync checkpoints
//! - Durable queue items
//! - Clock-skew tracking
//! - Domain and engine error types

pub mod checkpoint;
pub mod clock;
pub mod errors;
pub mod event;
pub mod newtypes;
pub mod queue_item;

// Re-export commonly used types
pub use checkpoint::Checkpoint;
pub use clock::{ClockState, SKEW_WARN_THRESHOLD};
pub use errors::{DomainError, SyncError};
pub use event::{BucketKind, RawEvent, SanitizedEvent};
pub use newtypes::{AgentVersion, BucketId, EventKey, QueueItemId};
pub use queue_item::QueueItem;
