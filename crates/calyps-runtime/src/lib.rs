//! `calyps-runtime` – the synchronization engine.
//!
//! Wires the link and twin crates into the operations a home-automation host
//! calls.
//!
//! # Modules
//!
//! - [`discovery`] – one-shot inventory refresh with bounded, jittered retry.
//! - [`dispatcher`] – sends `STOP`/`LEVEL` commands, predicting motion
//!   before the box confirms it.
//! - [`live`] – feeds decoded socket events into the twins.
//! - [`engine`] – [`SyncEngine`], the facade the host holds.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber with an optional OTLP span exporter.

pub mod discovery;
pub mod dispatcher;
pub mod engine;
pub mod live;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod scripted;

pub use discovery::{DiscoveryConfig, DiscoveryReport};
pub use engine::{EngineConfig, SyncEngine};
pub use live::LiveStats;
pub use telemetry::{TracerProviderGuard, init_tracing};
