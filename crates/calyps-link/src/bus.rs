//! Broadcast channel for twin change notifications.
//!
//! Uses [`tokio::sync::broadcast`] so every subscriber sees every snapshot
//! and a slow subscriber never blocks the engine.  A subscriber that falls
//! more than the channel capacity behind loses the oldest snapshots and is
//! told so via `RecvError::Lagged`; since each snapshot is a full state, the
//! next one it receives is still authoritative.

use calyps_types::TwinChange;
use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity.
const DEFAULT_CAPACITY: usize = 256;

/// Shared change bus. Clones share the same channel.
#[derive(Clone, Debug)]
pub struct ChangeBus {
    sender: broadcast::Sender<TwinChange>,
}

impl ChangeBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a snapshot.
    ///
    /// Returns the number of subscribers that received it; `0` when nobody
    /// listens, which is normal before the host subscribes.
    pub fn publish(&self, change: TwinChange) -> usize {
        match self.sender.send(change) {
            Ok(n) => n,
            Err(broadcast::error::SendError(change)) => {
                trace!(device = %change.identity, "change published with no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TwinChange> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
