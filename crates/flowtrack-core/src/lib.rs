//! Flowtrack Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `RawEvent`, `SanitizedEvent`, `Checkpoint`, `QueueItem`, `ClockState`
//! - **Port definitions** - Traits for adapters: `ISourceReader`, `IRemoteSink`, `IQueueStore`
//! - **Privacy transformer** - Deterministic raw-to-sanitized event mapping
//! - **Configuration** - Typed config with YAML loading and validation
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no external I/O.
//! Ports define trait interfaces that adapter crates implement. The sync
//! engine crate orchestrates domain entities through port interfaces.

pub mod config;
pub mod domain;
pub mod ports;
pub mod privacy;
