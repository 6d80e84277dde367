//! Source reader port (driven/secondary port)
//!
//! Interface to the local activity-data provider. The primary
//! implementation talks to an ActivityWatch-style server on localhost, but
//! the trait is provider-agnostic.
//!
//! ## Design Notes
//!
//! - `fetch_since` must be idempotent: calling twice with the same cursor
//!   may return overlapping or identical results. The sync engine, not the
//!   reader, is responsible for dedup.
//! - Reader failures surface as [`SyncError::SourceUnavailable`], which the
//!   engine treats as "skip this cycle, retry next cycle". The local
//!   source process being down is an expected transient condition, never
//!   fatal.

use chrono::{DateTime, Utc};

use crate::domain::errors::SyncError;
use crate::domain::event::{BucketKind, RawEvent};
use crate::domain::newtypes::BucketId;

/// A discovered source bucket (port-level DTO)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBucket {
    /// Bucket identifier, unique per source installation
    pub id: BucketId,
    /// Categorized bucket type
    pub kind: BucketKind,
    /// Hostname reported by the source, for diagnostics
    pub hostname: String,
}

/// Port trait for reading activity events from the local source
#[async_trait::async_trait]
pub trait ISourceReader: Send + Sync {
    /// Discovers the buckets the source currently exposes.
    async fn list_buckets(&self) -> Result<Vec<SourceBucket>, SyncError>;

    /// Fetches events for `bucket` observed strictly after `since`, up to
    /// `limit`, ordered oldest first. Finite; overlap with previous calls
    /// is allowed.
    async fn fetch_since(
        &self,
        bucket: &BucketId,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RawEvent>, SyncError>;

    /// Cheap health probe against the source.
    async fn is_available(&self) -> bool;
}
