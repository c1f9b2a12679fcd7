//! Live pump – feeds decoded socket events into the twins.

use calyps_link::LevelEvent;
use calyps_twin::TwinTracker;
use tokio::sync::mpsc;
use tracing::debug;

/// Counters of one pump run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveStats {
    pub applied: u64,
    /// Events whose key matched no twin.
    pub dropped: u64,
}

/// Apply every event from `events` to `tracker` until the sender side closes.
pub async fn pump(mut events: mpsc::Receiver<LevelEvent>, tracker: TwinTracker) -> LiveStats {
    let mut stats = LiveStats::default();
    while let Some(event) = events.recv().await {
        if tracker.apply_level_event(&event) {
            stats.applied += 1;
        } else {
            stats.dropped += 1;
        }
    }
    debug!(applied = stats.applied, dropped = stats.dropped, "live event pump stopped");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use calyps_link::{EventKey, InventoryRecord};
    use calyps_types::{Level, MotionState};

    #[tokio::test(start_paused = true)]
    async fn applies_known_keys_and_drops_the_rest() {
        let tracker = TwinTracker::default();
        tracker.apply_inventory(&[InventoryRecord {
            identity: "12".into(),
            event_key: EventKey::new("devices/shutter/12/"),
            display_name: "Kitchen".into(),
            manufacturer: None,
            level: Level::new(30).unwrap(),
        }]);

        let (tx, rx) = mpsc::channel(8);
        let pump = tokio::spawn(pump(rx, tracker.clone()));
        for (key, level) in [("devices/shutter/12", 60), ("devices/shutter/77", 10)] {
            tx.send(LevelEvent {
                key: EventKey::new(key),
                level: Level::new(level).unwrap(),
            })
            .await
            .unwrap();
        }
        drop(tx);

        let stats = pump.await.unwrap();
        assert_eq!(stats, LiveStats { applied: 1, dropped: 1 });
        let snap = tracker.snapshot("12").unwrap();
        assert_eq!(snap.current_level.get(), 60);
        assert_eq!(snap.motion, MotionState::Increasing);
        assert_eq!(tracker.len(), 1);
    }
}
