//! Flowtrack Source - Local activity source adapter
//!
//! Implements the `ISourceReader` port against an ActivityWatch-style HTTP
//! server on localhost. The source is treated as untrusted input: missing
//! fields, unknown bucket types, and a dead server all degrade gracefully
//! rather than failing the daemon.

pub mod client;

pub use client::ActivitySourceClient;
