//! [`DeviceTwin`] – the in-memory mirror of one shutter.

use calyps_link::{EventKey, InventoryRecord};
use calyps_types::{Level, MotionState, TwinChange};
use chrono::Utc;
use tokio::task::AbortHandle;

/// Local record of one shutter.
///
/// Level and motion fields are only written by
/// [`TwinTracker`](crate::TwinTracker); descriptive fields follow the latest
/// inventory.
#[derive(Debug)]
pub struct DeviceTwin {
    pub identity: String,
    pub event_key: EventKey,
    pub display_name: String,
    pub manufacturer: Option<String>,
    pub current_level: Level,
    pub target_level: Level,
    pub motion: MotionState,
    /// Bumped on every render; a revert timer only applies to its own generation.
    pub(crate) motion_generation: u64,
    /// The pending revert-to-stopped timer, if any.
    pub(crate) revert: Option<AbortHandle>,
}

impl DeviceTwin {
    pub fn from_record(record: &InventoryRecord) -> Self {
        Self {
            identity: record.identity.clone(),
            event_key: record.event_key.clone(),
            display_name: record.display_name.clone(),
            manufacturer: record.manufacturer.clone(),
            current_level: record.level,
            target_level: record.level,
            motion: MotionState::Stopped,
            motion_generation: 0,
            revert: None,
        }
    }

    /// Refresh descriptive fields from an inventory record.
    ///
    /// A manufacturer missing from the record keeps the known one.  Levels are
    /// left to the tracker.
    pub fn describe(&mut self, record: &InventoryRecord) {
        self.event_key = record.event_key.clone();
        self.display_name = record.display_name.clone();
        if record.manufacturer.is_some() {
            self.manufacturer = record.manufacturer.clone();
        }
    }

    /// `true` while a revert timer is armed.
    pub fn has_pending_revert(&self) -> bool {
        self.revert.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn snapshot(&self) -> TwinChange {
        TwinChange {
            identity: self.identity.clone(),
            display_name: self.display_name.clone(),
            manufacturer: self.manufacturer.clone(),
            current_level: self.current_level,
            target_level: self.target_level,
            motion: self.motion,
            observed_at: Utc::now(),
        }
    }

    pub(crate) fn cancel_revert(&mut self) {
        if let Some(handle) = self.revert.take() {
            handle.abort();
        }
    }
}

impl Drop for DeviceTwin {
    fn drop(&mut self) {
        self.cancel_revert();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(manufacturer: Option<&str>) -> InventoryRecord {
        InventoryRecord {
            identity: "12".into(),
            event_key: EventKey::new("devices/shutter/12/"),
            display_name: "Kitchen".into(),
            manufacturer: manufacturer.map(str::to_string),
            level: Level::new(40).unwrap(),
        }
    }

    #[test]
    fn new_twin_is_stopped_at_inventory_level() {
        let twin = DeviceTwin::from_record(&record(Some("Profalux")));
        assert_eq!(twin.current_level.get(), 40);
        assert_eq!(twin.target_level.get(), 40);
        assert_eq!(twin.motion, MotionState::Stopped);
        assert!(!twin.has_pending_revert());
    }

    #[test]
    fn describe_keeps_known_manufacturer() {
        let mut twin = DeviceTwin::from_record(&record(Some("Profalux")));
        let mut renamed = record(None);
        renamed.display_name = "Kitchen west".into();
        twin.describe(&renamed);
        assert_eq!(twin.display_name, "Kitchen west");
        assert_eq!(twin.manufacturer.as_deref(), Some("Profalux"));
    }

    #[test]
    fn snapshot_mirrors_twin() {
        let twin = DeviceTwin::from_record(&record(None));
        let change = twin.snapshot();
        assert_eq!(change.identity, "12");
        assert_eq!(change.display_name, "Kitchen");
        assert_eq!(change.motion, MotionState::Stopped);
    }
}
