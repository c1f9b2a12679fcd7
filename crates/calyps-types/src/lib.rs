use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Position of a shutter on the box's 0–100 scale.
///
/// The scale is treated as an opaque ordinal: `0` and `100` are the two end
/// stops and nothing else is assumed about their physical meaning.  A `Level`
/// can only be built from an in-range value, so a twin can never hold a
/// corrupted position.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "u8")]
pub struct Level(u8);

impl Level {
    /// Lower end stop.
    pub const MIN: Level = Level(0);
    /// Upper end stop.
    pub const MAX: Level = Level(100);

    /// Build a level, rejecting anything outside `0..=100`.
    pub fn new(value: i64) -> Result<Self, ProtocolError> {
        if (0..=100).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(ProtocolError::LevelOutOfRange(value))
        }
    }

    /// Parse a level as it appears on the wire (`"42"`, ` 42 `).
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let value = raw
            .trim()
            .parse::<i64>()
            .map_err(|_| ProtocolError::InvalidLevel(raw.to_string()))?;
        Self::new(value)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn is_min(self) -> bool {
        self == Self::MIN
    }

    pub fn is_max(self) -> bool {
        self == Self::MAX
    }
}

impl TryFrom<i64> for Level {
    type Error = ProtocolError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Level> for u8 {
    fn from(level: Level) -> Self {
        level.0
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction a shutter is believed to be travelling in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MotionState {
    #[default]
    Stopped,
    Increasing,
    Decreasing,
}

impl MotionState {
    pub fn as_str(self) -> &'static str {
        match self {
            MotionState::Stopped => "STOPPED",
            MotionState::Increasing => "INCREASING",
            MotionState::Decreasing => "DECREASING",
        }
    }

    pub fn is_moving(self) -> bool {
        self != MotionState::Stopped
    }
}

impl fmt::Display for MotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user intent forwarded to the box's `command` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "args")]
pub enum ShutterCommand {
    /// Halt the motor wherever it currently is.
    Stop,
    /// Travel to the given level.
    Level(Level),
}

impl ShutterCommand {
    /// Value of the `action` form field.
    pub fn action(&self) -> &'static str {
        match self {
            ShutterCommand::Stop => "STOP",
            ShutterCommand::Level(_) => "LEVEL",
        }
    }

    /// JSON object carried in the `args` form field, if the action takes one.
    ///
    /// The box expects the level as a string: `{"level":"42"}`.
    pub fn args(&self) -> Option<serde_json::Value> {
        match self {
            ShutterCommand::Stop => None,
            ShutterCommand::Level(level) => Some(json!({ "level": level.to_string() })),
        }
    }
}

/// Snapshot of a twin, published after every mutation so the host can render it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwinChange {
    pub identity: String,
    pub display_name: String,
    pub manufacturer: Option<String>,
    pub current_level: Level,
    pub target_level: Level,
    pub motion: MotionState,
    pub observed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of a single request/response exchange with the box.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection to {url} failed: {details}")]
    Connection { url: String, details: String },

    /// The box drops idle pooled connections without notice; the next request
    /// on such a connection fails with a reset.
    #[error("connection to {url} was reset")]
    ConnectionReset { url: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("unreadable response body from {url}: {details}")]
    Body { url: String, details: String },
}

impl TransportError {
    /// `true` for failures that say nothing about the box's health.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::ConnectionReset { .. })
    }
}

/// A record or message that does not match the expected wire shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    #[error("missing field `{0}`")]
    MissingField(String),

    #[error("level {0} is outside 0..=100")]
    LevelOutOfRange(i64),

    #[error("`{0}` is not a level")]
    InvalidLevel(String),

    #[error("fragment `{fragment}` cannot be decoded: {details}")]
    InvalidFragment { fragment: String, details: String },

    #[error("message has no fragment at index {0}")]
    MissingFragment(usize),
}

/// Failures of the live event socket.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("cannot connect to {url}: {details}")]
    Connect { url: String, details: String },

    #[error("socket error: {0}")]
    Socket(String),

    #[error("connection closed by peer")]
    Closed,

    /// The endpoint or sub-protocol cannot even be turned into a request.
    #[error("invalid event-channel endpoint: {0}")]
    InvalidEndpoint(String),
}

impl ChannelError {
    /// Only local configuration mistakes stop the reconnect loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChannelError::InvalidEndpoint(_))
    }
}

/// Umbrella error returned by the engine's public operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalypsError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("event channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("discovery gave up after {attempts} attempt(s): {last_error}")]
    DiscoveryExhausted { attempts: u32, last_error: String },

    #[error("no device with identity `{0}`")]
    UnknownDevice(String),

    #[error("configuration error: {0}")]
    Config(String),
}
