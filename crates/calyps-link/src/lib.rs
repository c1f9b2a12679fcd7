//! `calyps-link` – wire-level plumbing towards the CalypsHome box.
//!
//! Knows how to talk to the box but nothing about what a twin is.
//!
//! # Modules
//!
//! - [`transport`] – [`Transport`] trait and the pooled, keep-alive
//!   [`HttpTransport`] that POSTs url-form-encoded requests.
//! - [`inventory`] – decodes the `getObjects` JSON body into
//!   [`InventoryRecord`]s, rejecting bad records one by one.
//! - [`frame`] – the space-separated line protocol of the event socket:
//!   fragment decoding, level events, login and heartbeat frames, and the
//!   [`EventKey`] join key.
//! - [`channel`] – [`EventChannel`], the self-healing event socket client.
//! - [`backoff`] – exponential backoff with full jitter shared by discovery
//!   and reconnects.
//! - [`bus`] – [`ChangeBus`], the broadcast channel twin snapshots are
//!   published on.

pub mod backoff;
pub mod bus;
pub mod channel;
pub mod frame;
pub mod inventory;
pub mod transport;

pub use backoff::{Backoff, BackoffPolicy};
pub use bus::ChangeBus;
pub use channel::{ChannelConfig, EventChannel};
pub use frame::{EventKey, LevelEvent};
pub use inventory::{Inventory, InventoryRecord};
pub use transport::{HttpTransport, HttpTransportConfig, Transport};
