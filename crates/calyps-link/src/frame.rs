//! Line protocol spoken on the box's event socket.
//!
//! Every text frame is a list of space-separated fragments.  A fragment that
//! starts with `@` carries base64 text and must be decoded before use.
//! Fragment 6 is the event key; when it ends with `/level`, fragment 7 is the
//! shutter's new level.
//!
//! ```text
//! p1 42 /_web / event 1700000000 @ZGV2aWNlcy9zaHV0dGVyLzEyL2xldmVs 55
//! │                                └── event key (base64) ──────────┘ └ level
//! ```

use std::time::Instant;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use calyps_types::{Level, ProtocolError};
use chrono::Utc;

/// Sent once, right after the socket is up.
pub const LOGIN_FRAME: &str = "p1 1 _web / login";

/// Suffix of event keys that report a shutter level.
pub const LEVEL_SUFFIX: &str = "/level";

/// Zero-based index of the event key fragment.
pub const KEY_FRAGMENT: usize = 6;

/// Zero-based index of the value fragment.
pub const VALUE_FRAGMENT: usize = 7;

/// Sequence number of the first heartbeat; the login frame uses 1.
pub const FIRST_HEARTBEAT_SEQ: u64 = 3;

/// Key correlating event-socket traffic with an inventory object.
///
/// The inventory carries it as `eventId` (for example `devices/shutter/12/`)
/// and the socket reports levels under `<eventId>level`.  Both sides are
/// normalised by trimming trailing slashes, so `devices/shutter/12/` and
/// `devices/shutter/12/level` meet at `devices/shutter/12`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey(String);

impl EventKey {
    /// Normalise an inventory `eventId`.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().trim_end_matches('/').to_string())
    }

    /// Map a socket event key to the twin key it reports on.
    ///
    /// Returns `None` for keys that are not level updates.
    pub fn from_level_topic(topic: &str) -> Option<Self> {
        let stem = topic.strip_suffix(LEVEL_SUFFIX)?;
        let key = Self::new(stem);
        (!key.0.is_empty()).then_some(key)
    }

    /// Socket event key under which this twin's level is reported.
    pub fn level_topic(&self) -> String {
        format!("{}{}", self.0, LEVEL_SUFFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A decoded "level changed" event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelEvent {
    pub key: EventKey,
    pub level: Level,
}

/// Decode one fragment: `@`-prefixed fragments are base64, others are literal.
pub fn decode_fragment(fragment: &str) -> Result<Vec<u8>, ProtocolError> {
    match fragment.strip_prefix('@') {
        Some(encoded) => STANDARD
            .decode(encoded)
            .map_err(|e| ProtocolError::InvalidFragment {
                fragment: fragment.to_string(),
                details: e.to_string(),
            }),
        None => Ok(fragment.as_bytes().to_vec()),
    }
}

fn decode_text(fragment: &str) -> Result<String, ProtocolError> {
    String::from_utf8(decode_fragment(fragment)?).map_err(|e| ProtocolError::InvalidFragment {
        fragment: fragment.to_string(),
        details: e.to_string(),
    })
}

/// Parse a socket frame.
///
/// * `Ok(Some(_))` – a level update.
/// * `Ok(None)` – a frame this engine does not care about, including frames
///   too short to carry an event key.
/// * `Err(_)` – a level update that cannot be trusted (bad base64, missing or
///   out-of-range level).
pub fn parse_level_event(text: &str) -> Result<Option<LevelEvent>, ProtocolError> {
    let fragments: Vec<&str> = text.trim_end_matches(['\r', '\n']).split(' ').collect();

    let Some(raw_key) = fragments.get(KEY_FRAGMENT) else {
        return Ok(None);
    };
    let topic = decode_text(raw_key)?;
    let Some(key) = EventKey::from_level_topic(&topic) else {
        return Ok(None);
    };

    let raw_value = fragments
        .get(VALUE_FRAGMENT)
        .ok_or(ProtocolError::MissingFragment(VALUE_FRAGMENT))?;
    let level = Level::parse(&decode_text(raw_value)?)?;

    Ok(Some(LevelEvent { key, level }))
}

/// Build a heartbeat frame.
pub fn heartbeat_frame(seq: u64, unix_secs: i64, uptime_secs: u64) -> String {
    format!("p1 {seq} /_web / event {unix_secs} event/system/gateway/uptime {uptime_secs}")
}

/// Heartbeat state of one socket session.
///
/// Owned by the session, so every new connection starts a fresh sequence and
/// measures uptime from its own connect instant.
#[derive(Debug)]
pub struct Heartbeat {
    next_seq: u64,
    connected_at: Instant,
}

impl Heartbeat {
    pub fn start() -> Self {
        Self {
            next_seq: FIRST_HEARTBEAT_SEQ,
            connected_at: Instant::now(),
        }
    }

    /// Produce the next frame and advance the sequence.
    pub fn next_frame(&mut self) -> String {
        let seq = self.next_seq;
        self.next_seq += 1;
        heartbeat_frame(
            seq,
            Utc::now().timestamp(),
            self.connected_at.elapsed().as_secs(),
        )
    }
}
