//! Flowtrack Store - Durable SQLite persistence
//!
//! Implements the `IQueueStore` port on SQLite:
//! - **DatabasePool** - WAL-mode connection pool with schema migration
//! - **SqliteQueueStore** - durable outbound queue, checkpoints, meta table
//!
//! The store is the crash-safety anchor of the agent: events live here from
//! the moment they are sanitized until the remote confirms them, and
//! checkpoints only advance in the same transaction that removes the rows
//! they cover.

pub mod pool;
pub mod queue;

pub use pool::DatabasePool;
pub use queue::SqliteQueueStore;

/// Errors from the SQLite store layer
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::QueryFailed(err.to_string())
    }
}
