//! Flowtrack Remote - Ingestion API adapter
//!
//! Implements the `IRemoteSink` port against the Flowtrack ingestion API.
//! Every wire-level condition maps to a [`BatchOutcome`] variant so the
//! sync engine can reason about delivery with one exhaustive match.

pub mod client;

pub use client::IngestClient;
