//! `calyps-twin` – local model of the shutters known to the box.
//!
//! # Modules
//!
//! - [`twin`] – [`DeviceTwin`], the record kept for one shutter.
//! - [`motion`] – the pure motion inference rule.
//! - [`registry`] – [`DeviceRegistry`], one twin per identity with an
//!   event-key index.
//! - [`tracker`] – [`TwinTracker`], the shared handle every writer goes
//!   through; owns the revert-to-stopped timers and publishes changes.

pub mod motion;
pub mod registry;
pub mod tracker;
pub mod twin;

pub use motion::{MOTION_REVERT_DELAY, Verdict, infer};
pub use registry::{DeviceRegistry, Upsert};
pub use tracker::TwinTracker;
pub use twin::DeviceTwin;
