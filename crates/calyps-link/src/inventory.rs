//! Decoding of the `getObjects` inventory response.
//!
//! ```json
//! {"objects": [
//!   {"id": "12", "name": "Kitchen", "type": "Rolling_Shutter",
//!    "eventId": "devices/shutter/12/",
//!    "status": [{"name": "level", "value": "40"},
//!               {"name": "manufacturer_name", "value": "Profalux"}]}
//! ]}
//! ```
//!
//! A body that is not JSON, or has no `objects` array, fails as a whole.  A
//! single object that cannot be trusted is reported in
//! [`Inventory::rejected`] and does not spoil its siblings.

use calyps_types::{Level, ProtocolError};
use serde_json::Value;

use crate::frame::EventKey;

/// Object type the engine manages; also the request filter.
pub const SHUTTER_TYPE: &str = "Rolling_Shutter";

/// One shutter as described by the inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryRecord {
    pub identity: String,
    pub event_key: EventKey,
    pub display_name: String,
    pub manufacturer: Option<String>,
    pub level: Level,
}

/// Outcome of decoding one inventory body.
#[derive(Debug, Default)]
pub struct Inventory {
    pub records: Vec<InventoryRecord>,
    /// Objects that were skipped, with the identity when it could be read.
    pub rejected: Vec<(Option<String>, ProtocolError)>,
    /// Objects of another type.
    pub ignored: usize,
}

/// Decode an inventory body.
///
/// # Errors
///
/// [`ProtocolError::MalformedJson`] when the body is not JSON and
/// [`ProtocolError::MissingField`] when it has no `objects` array.
pub fn parse_inventory(body: &str) -> Result<Inventory, ProtocolError> {
    let root: Value =
        serde_json::from_str(body).map_err(|e| ProtocolError::MalformedJson(e.to_string()))?;
    let objects = root
        .get("objects")
        .and_then(Value::as_array)
        .ok_or_else(|| ProtocolError::MissingField("objects".into()))?;

    let mut inventory = Inventory::default();
    for object in objects {
        match parse_object(object) {
            Ok(Some(record)) => inventory.records.push(record),
            Ok(None) => inventory.ignored += 1,
            Err(e) => {
                let identity = object.get("id").and_then(text);
                inventory.rejected.push((identity, e));
            }
        }
    }
    Ok(inventory)
}

fn parse_object(object: &Value) -> Result<Option<InventoryRecord>, ProtocolError> {
    if let Some(kind) = object.get("type").and_then(Value::as_str) {
        if kind != SHUTTER_TYPE {
            return Ok(None);
        }
    }

    let identity = object
        .get("id")
        .and_then(text)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProtocolError::MissingField("id".into()))?;
    let event_key = object
        .get("eventId")
        .and_then(text)
        .map(EventKey::new)
        .filter(|key| !key.as_str().is_empty())
        .ok_or_else(|| ProtocolError::MissingField("eventId".into()))?;
    let display_name = object
        .get("name")
        .and_then(text)
        .unwrap_or_else(|| identity.clone());

    let status = object.get("status").and_then(Value::as_array);
    let status_value = |name: &str| {
        status?
            .iter()
            .find(|entry| entry.get("name").and_then(Value::as_str) == Some(name))
            .and_then(|entry| entry.get("value"))
    };

    let level = status_value("level")
        .ok_or_else(|| ProtocolError::MissingField("status.level".into()))
        .and_then(level_from_value)?;
    let manufacturer = status_value("manufacturer_name").and_then(text);

    Ok(Some(InventoryRecord {
        identity,
        event_key,
        display_name,
        manufacturer,
        level,
    }))
}

/// The box sends levels as strings (`"40"`) but numbers are accepted too.
fn level_from_value(value: &Value) -> Result<Level, ProtocolError> {
    match value {
        Value::String(s) => Level::parse(s),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| ProtocolError::InvalidLevel(n.to_string()))
            .and_then(Level::new),
        other => Err(ProtocolError::InvalidLevel(other.to_string())),
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{"objects": [
        {"id": "12", "name": "Kitchen", "type": "Rolling_Shutter", "eventId": "devices/shutter/12/",
         "status": [{"name": "level", "value": "40"}, {"name": "manufacturer_name", "value": "Profalux"}]},
        {"id": 13, "name": "Bedroom", "type": "Rolling_Shutter", "eventId": "devices/shutter/13/",
         "status": [{"name": "level", "value": 0}]},
        {"id": "7", "name": "Porch light", "type": "Light", "eventId": "devices/light/7/", "status": []}
    ]}"#;

    #[test]
    fn decodes_shutters_and_ignores_other_types() {
        let inv = parse_inventory(BODY).unwrap();
        assert_eq!(inv.records.len(), 2);
        assert_eq!(inv.ignored, 1);
        assert!(inv.rejected.is_empty());

        let kitchen = &inv.records[0];
        assert_eq!(kitchen.identity, "12");
        assert_eq!(kitchen.display_name, "Kitchen");
        assert_eq!(kitchen.manufacturer.as_deref(), Some("Profalux"));
        assert_eq!(kitchen.level.get(), 40);
        assert_eq!(kitchen.event_key, EventKey::new("devices/shutter/12"));

        let bedroom = &inv.records[1];
        assert_eq!(bedroom.identity, "13");
        assert_eq!(bedroom.level, Level::MIN);
        assert_eq!(bedroom.manufacturer, None);
    }

    #[test]
    fn malformed_body_fails_as_a_whole() {
        assert!(matches!(parse_inventory("<html>"), Err(ProtocolError::MalformedJson(_))));
        assert!(matches!(
            parse_inventory(r#"{"items": []}"#),
            Err(ProtocolError::MissingField(f)) if f == "objects"
        ));
    }

    #[test]
    fn bad_records_are_rejected_individually() {
        let body = r#"{"objects": [
            {"id": "1", "eventId": "k/1/", "status": [{"name": "level", "value": "250"}]},
            {"id": "2", "status": [{"name": "level", "value": "20"}]},
            {"id": "3", "eventId": "k/3/", "status": []},
            {"id": "4", "eventId": "k/4/", "status": [{"name": "level", "value": "60"}]}
        ]}"#;
        let inv = parse_inventory(body).unwrap();

        assert_eq!(inv.records.len(), 1);
        assert_eq!(inv.records[0].identity, "4");
        assert_eq!(inv.records[0].display_name, "4");
        assert_eq!(inv.rejected.len(), 3);
        assert_eq!(inv.rejected[0], (Some("1".into()), ProtocolError::LevelOutOfRange(250)));
        assert_eq!(inv.rejected[1].1, ProtocolError::MissingField("eventId".into()));
        assert_eq!(inv.rejected[2].1, ProtocolError::MissingField("status.level".into()));
    }

    #[test]
    fn empty_inventory_is_valid() {
        let inv = parse_inventory(r#"{"objects": []}"#).unwrap();
        assert!(inv.records.is_empty());
    }
}
