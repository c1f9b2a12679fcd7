//! Configuration Vault – reads/writes `~/.calyps/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use calyps_link::BackoffPolicy;
use calyps_runtime::EngineConfig;
use calyps_types::CalypsError;

/// Persisted user configuration stored in `~/.calyps/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the CalypsHome box.
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// How long a shutter is assumed to keep moving without news.
    #[serde(default = "default_motion_revert_secs")]
    pub motion_revert_secs: u64,

    #[serde(default = "default_discovery_attempts")]
    pub discovery_attempts: u32,

    #[serde(default = "default_discovery_initial_delay_ms")]
    pub discovery_initial_delay_ms: u64,

    #[serde(default = "default_discovery_max_delay_secs")]
    pub discovery_max_delay_secs: u64,

    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub reconnect_initial_delay_ms: u64,

    #[serde(default = "default_reconnect_max_delay_secs")]
    pub reconnect_max_delay_secs: u64,

    /// Sub-protocol requested on the event socket.
    #[serde(default = "default_channel_protocol")]
    pub channel_protocol: String,
}

fn default_url() -> String {
    "http://calypshome.local".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_heartbeat_interval_secs() -> u64 {
    20
}
fn default_motion_revert_secs() -> u64 {
    11
}
fn default_discovery_attempts() -> u32 {
    10
}
fn default_discovery_initial_delay_ms() -> u64 {
    1_000
}
fn default_discovery_max_delay_secs() -> u64 {
    180
}
fn default_reconnect_initial_delay_ms() -> u64 {
    1_000
}
fn default_reconnect_max_delay_secs() -> u64 {
    60
}
fn default_channel_protocol() -> String {
    calyps_link::channel::DEFAULT_PROTOCOL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: default_url(),
            request_timeout_secs: default_request_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            motion_revert_secs: default_motion_revert_secs(),
            discovery_attempts: default_discovery_attempts(),
            discovery_initial_delay_ms: default_discovery_initial_delay_ms(),
            discovery_max_delay_secs: default_discovery_max_delay_secs(),
            reconnect_initial_delay_ms: default_reconnect_initial_delay_ms(),
            reconnect_max_delay_secs: default_reconnect_max_delay_secs(),
            channel_protocol: default_channel_protocol(),
        }
    }
}

impl Config {
    /// Engine settings for this configuration.
    ///
    /// Zero attempts or zero timeouts are raised to one.
    pub fn engine_config(&self) -> Result<EngineConfig, CalypsError> {
        let mut engine = EngineConfig::for_box(&self.url)?;

        engine.transport.request_timeout = Duration::from_secs(self.request_timeout_secs.max(1));

        let floor = engine.discovery.backoff.min_delay;
        engine.discovery.backoff = BackoffPolicy {
            initial_delay: Duration::from_millis(self.discovery_initial_delay_ms),
            max_delay: Duration::from_secs(self.discovery_max_delay_secs),
            min_delay: floor,
            max_attempts: Some(self.discovery_attempts.max(1)),
        };

        engine.channel.protocol = self.channel_protocol.clone();
        engine.channel.heartbeat_interval = Duration::from_secs(self.heartbeat_interval_secs.max(1));
        engine.channel.reconnect = BackoffPolicy {
            initial_delay: Duration::from_millis(self.reconnect_initial_delay_ms),
            max_delay: Duration::from_secs(self.reconnect_max_delay_secs),
            min_delay: engine.channel.reconnect.min_delay,
            max_attempts: None,
        };

        engine.motion_revert = Duration::from_secs(self.motion_revert_secs.max(1));
        Ok(engine)
    }
}

/// Return the path to `~/.calyps/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".calyps").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `CALYPS_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `CALYPS_URL` | `url` |
/// | `CALYPS_REQUEST_TIMEOUT_SECS` | `request_timeout_secs` |
/// | `CALYPS_HEARTBEAT_SECS` | `heartbeat_interval_secs` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("CALYPS_URL")
        && !v.trim().is_empty()
    {
        cfg.url = v.trim().to_string();
    }
    if let Ok(v) = std::env::var("CALYPS_REQUEST_TIMEOUT_SECS")
        && let Ok(secs) = v.trim().parse::<u64>()
    {
        cfg.request_timeout_secs = secs;
    }
    if let Ok(v) = std::env::var("CALYPS_HEARTBEAT_SECS")
        && let Ok(secs) = v.trim().parse::<u64>()
    {
        cfg.heartbeat_interval_secs = secs;
    }
}

/// Save the config to disk, creating `~/.calyps/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.discovery_attempts, 10);
        assert_eq!(loaded.motion_revert_secs, 11);
        assert_eq!(loaded.channel_protocol, "lws-mirror-protocol");
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "url = \"http://10.0.0.9\"\nmotion_revert_secs = 15\n").unwrap();

        let cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.motion_revert_secs, 15);
        assert_eq!(cfg.discovery_attempts, 10);
        assert_eq!(cfg.reconnect_max_delay_secs, 60);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "url = [").unwrap();
        assert!(load_from(&path).unwrap_err().contains("parse"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn config_path_points_to_calyps_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".calyps"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn engine_config_carries_settings() {
        let cfg = Config {
            url: "http://192.168.1.20/index.html".into(),
            request_timeout_secs: 5,
            discovery_attempts: 3,
            motion_revert_secs: 0,
            ..Config::default()
        };
        let engine = cfg.engine_config().unwrap();
        assert_eq!(engine.transport.request_timeout, Duration::from_secs(5));
        assert_eq!(engine.discovery.backoff.max_attempts, Some(3));
        assert_eq!(engine.channel.url, "ws://192.168.1.20/");
        assert_eq!(engine.channel.heartbeat_interval, Duration::from_secs(20));
        assert_eq!(engine.channel.reconnect.max_attempts, None);
        assert_eq!(engine.motion_revert, Duration::from_secs(1));
    }

    #[test]
    fn engine_config_rejects_bad_url() {
        let cfg = Config {
            url: "calypshome".into(),
            ..Config::default()
        };
        assert!(cfg.engine_config().is_err());
    }

    #[test]
    fn env_overrides() {
        // SAFETY: the only test touching these variables.
        unsafe {
            std::env::set_var("CALYPS_URL", "http://box.lan");
            std::env::set_var("CALYPS_REQUEST_TIMEOUT_SECS", "7");
            std::env::set_var("CALYPS_HEARTBEAT_SECS", "soon");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.url, "http://box.lan");
        assert_eq!(cfg.request_timeout_secs, 7);
        assert_eq!(cfg.heartbeat_interval_secs, 20);
        unsafe {
            std::env::remove_var("CALYPS_URL");
            std::env::remove_var("CALYPS_REQUEST_TIMEOUT_SECS");
            std::env::remove_var("CALYPS_HEARTBEAT_SECS");
        }
    }
}
