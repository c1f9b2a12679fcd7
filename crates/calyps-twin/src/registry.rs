//! [`DeviceRegistry`] – one [`DeviceTwin`] per identity.
//!
//! Twins are keyed by inventory identity and also indexed by [`EventKey`]
//! so live events, which use a different name-space, find their twin in one
//! lookup.  Twins are never removed.

use std::collections::HashMap;

use calyps_link::{EventKey, InventoryRecord};

use crate::twin::DeviceTwin;

/// Whether an inventory record created a twin or refreshed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    twins: HashMap<String, DeviceTwin>,
    by_key: HashMap<EventKey, String>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the twin for `record`, or refresh its descriptive fields.
    ///
    /// Levels of an existing twin are not touched here.
    pub fn upsert(&mut self, record: &InventoryRecord) -> Upsert {
        match self.twins.get_mut(&record.identity) {
            Some(twin) => {
                if twin.event_key != record.event_key {
                    self.by_key.remove(&twin.event_key);
                }
                twin.describe(record);
                self.by_key
                    .insert(record.event_key.clone(), record.identity.clone());
                Upsert::Updated
            }
            None => {
                self.twins
                    .insert(record.identity.clone(), DeviceTwin::from_record(record));
                self.by_key
                    .insert(record.event_key.clone(), record.identity.clone());
                Upsert::Created
            }
        }
    }

    pub fn get(&self, identity: &str) -> Option<&DeviceTwin> {
        self.twins.get(identity)
    }

    pub fn get_mut(&mut self, identity: &str) -> Option<&mut DeviceTwin> {
        self.twins.get_mut(identity)
    }

    /// Identity of the twin reporting under `key`.
    pub fn identity_for(&self, key: &EventKey) -> Option<&str> {
        self.by_key.get(key).map(String::as_str)
    }

    pub fn find_by_event_key_mut(&mut self, key: &EventKey) -> Option<&mut DeviceTwin> {
        let identity = self.by_key.get(key)?;
        self.twins.get_mut(identity)
    }

    pub fn len(&self) -> usize {
        self.twins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.twins.is_empty()
    }

    /// Twins sorted by identity.
    pub fn iter_sorted(&self) -> Vec<&DeviceTwin> {
        let mut twins: Vec<&DeviceTwin> = self.twins.values().collect();
        twins.sort_by(|a, b| a.identity.cmp(&b.identity));
        twins
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calyps_types::Level;

    fn record(id: &str, key: &str, level: i64) -> InventoryRecord {
        InventoryRecord {
            identity: id.into(),
            event_key: EventKey::new(key),
            display_name: format!("Shutter {id}"),
            manufacturer: None,
            level: Level::new(level).unwrap(),
        }
    }

    #[test]
    fn upsert_never_duplicates() {
        let mut reg = DeviceRegistry::new();
        assert_eq!(reg.upsert(&record("1", "k/1/", 10)), Upsert::Created);
        assert_eq!(reg.upsert(&record("1", "k/1/", 10)), Upsert::Updated);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn lookup_by_event_key() {
        let mut reg = DeviceRegistry::new();
        reg.upsert(&record("1", "k/1/", 10));
        reg.upsert(&record("2", "k/2/", 20));

        let key = EventKey::from_level_topic("k/2/level").unwrap();
        assert_eq!(reg.identity_for(&key), Some("2"));
        assert_eq!(reg.find_by_event_key_mut(&key).unwrap().identity, "2");
        assert!(reg.identity_for(&EventKey::new("k/3")).is_none());
    }

    #[test]
    fn changed_event_key_moves_the_index() {
        let mut reg = DeviceRegistry::new();
        reg.upsert(&record("1", "old/1/", 10));
        reg.upsert(&record("1", "new/1/", 10));
        assert!(reg.identity_for(&EventKey::new("old/1")).is_none());
        assert_eq!(reg.identity_for(&EventKey::new("new/1")), Some("1"));
    }

    #[test]
    fn iteration_is_sorted() {
        let mut reg = DeviceRegistry::new();
        reg.upsert(&record("b", "k/b", 0));
        reg.upsert(&record("a", "k/a", 0));
        let ids: Vec<&str> = reg.iter_sorted().iter().map(|t| t.identity.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }
}
