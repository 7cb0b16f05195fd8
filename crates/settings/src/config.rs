//! Configuration types

use std::net::SocketAddr;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use sockbridge_core::{DEFAULT_SECRET, PASSWORD_ENV};

use crate::{default_settings_path, Result, SettingsError};

/// Smallest and largest chunk size, in KiB
const CHUNK_KB_RANGE: std::ops::RangeInclusive<usize> = 1..=1024;

/// Largest inbound frame queue per session
const MAX_CHANNEL_DEPTH: usize = 65536;

/// Largest inbound WebSocket message, in KiB (1 GiB)
const MAX_MESSAGE_KB: usize = 1024 * 1024;

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Relay server settings
    #[serde(default)]
    pub server: ServerSettings,

    /// CONNECT proxy settings
    #[serde(default)]
    pub client: ClientSettings,
}

impl Settings {
    /// Load settings from the default path, or create defaults
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from a specific path, or create defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let settings: Settings =
                serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            info!("Loaded settings from {:?}", path);
            Ok(settings)
        } else {
            Ok(Self::default())
        }
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Apply the `PASSWORD` environment variable
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides from an arbitrary lookup
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(password) = lookup(PASSWORD_ENV).filter(|p| !p.is_empty()) {
            self.server.password = password.clone();
            self.client.password = password;
        }
    }

    /// Check every section
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.client.validate()
    }
}

/// Relay server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Listen address
    #[serde(default = "default_server_listen")]
    pub listen: String,

    /// Shared secret expected in `X-Password`
    #[serde(default = "default_password")]
    pub password: String,

    /// Destination dial timeout in seconds
    #[serde(default = "default_timeout")]
    pub connect_timeout_secs: u64,

    /// Bytes per TCP read, in KiB
    #[serde(default = "default_chunk_kb")]
    pub chunk_kb: usize,

    /// Inbound frames buffered per session
    #[serde(default = "default_channel_depth")]
    pub channel_depth: usize,

    /// Time allowed for the closing handshake, in milliseconds
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,

    /// Largest inbound WebSocket message, in KiB
    #[serde(default = "default_max_message_kb")]
    pub max_message_kb: usize,
}

fn default_server_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_password() -> String {
    DEFAULT_SECRET.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_chunk_kb() -> usize {
    64
}

fn default_channel_depth() -> usize {
    32
}

fn default_close_grace_ms() -> u64 {
    2000
}

fn default_max_message_kb() -> usize {
    16 * 1024
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: default_server_listen(),
            password: default_password(),
            connect_timeout_secs: default_timeout(),
            chunk_kb: default_chunk_kb(),
            channel_depth: default_channel_depth(),
            close_grace_ms: default_close_grace_ms(),
            max_message_kb: default_max_message_kb(),
        }
    }
}

impl ServerSettings {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .map_err(|_| SettingsError::Invalid(format!("listen address: {}", self.listen)))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    pub fn chunk_size(&self) -> Result<usize> {
        kib_to_bytes("chunk_kb", self.chunk_kb)
    }

    pub fn max_message_size(&self) -> Result<usize> {
        kib_to_bytes("max_message_kb", self.max_message_kb)
    }

    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        if self.password.is_empty() {
            return Err(SettingsError::Invalid("server password is empty".to_string()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(SettingsError::Invalid("connect_timeout_secs must be > 0".to_string()));
        }
        validate_chunk_kb(self.chunk_kb)?;
        if self.channel_depth == 0 || self.channel_depth > MAX_CHANNEL_DEPTH {
            return Err(SettingsError::Invalid(format!(
                "channel_depth must be 1-{}, got {}",
                MAX_CHANNEL_DEPTH, self.channel_depth
            )));
        }
        if self.max_message_kb == 0 || self.max_message_kb > MAX_MESSAGE_KB {
            return Err(SettingsError::Invalid(format!(
                "max_message_kb must be 1-{}, got {}",
                MAX_MESSAGE_KB, self.max_message_kb
            )));
        }
        Ok(())
    }
}

/// CONNECT proxy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Local proxy port
    #[serde(default = "default_client_port")]
    pub listen_port: u16,

    /// Relay address, `host[:port][/path]`
    #[serde(default)]
    pub relay: String,

    /// Shared secret sent in `X-Password`
    #[serde(default = "default_password")]
    pub password: String,

    /// Bytes per TCP read (one WebSocket frame), in KiB
    #[serde(default = "default_chunk_kb")]
    pub chunk_kb: usize,

    /// Relay handshake timeout in seconds
    #[serde(default = "default_timeout")]
    pub dial_timeout_secs: u64,

    /// Use `ws://` instead of `wss://`
    #[serde(default)]
    pub insecure: bool,
}

fn default_client_port() -> u16 {
    8080
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            listen_port: default_client_port(),
            relay: String::new(),
            password: default_password(),
            chunk_kb: default_chunk_kb(),
            dial_timeout_secs: default_timeout(),
            insecure: false,
        }
    }
}

impl ClientSettings {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn chunk_size(&self) -> Result<usize> {
        kib_to_bytes("chunk_kb", self.chunk_kb)
    }

    /// An empty relay is allowed here; the `connect` command requires one.
    pub fn validate(&self) -> Result<()> {
        if self.listen_port == 0 {
            return Err(SettingsError::Invalid("listen_port must be 1-65535".to_string()));
        }
        if !self.relay.is_empty() {
            validate_relay(&self.relay)?;
        }
        validate_chunk_kb(self.chunk_kb)?;
        if self.dial_timeout_secs == 0 {
            return Err(SettingsError::Invalid("dial_timeout_secs must be > 0".to_string()));
        }
        Ok(())
    }
}

fn kib_to_bytes(name: &str, kib: usize) -> Result<usize> {
    kib.checked_mul(1024)
        .ok_or_else(|| SettingsError::Invalid(format!("{} is too large: {}", name, kib)))
}

fn validate_chunk_kb(chunk_kb: usize) -> Result<()> {
    if !CHUNK_KB_RANGE.contains(&chunk_kb) {
        return Err(SettingsError::Invalid(format!(
            "chunk_kb must be {}-{}, got {}",
            CHUNK_KB_RANGE.start(),
            CHUNK_KB_RANGE.end(),
            chunk_kb
        )));
    }
    Ok(())
}

/// Relay addresses accepted by the `connect` command
static RELAY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9.-]+(:\d+)?(/.*)?$").expect("relay pattern is valid")
});

/// Check a relay address of the form `host[:port][/path]`.
///
/// The host is letters, digits, `.` and `-`. A port, when present, must
/// also fit in `1..=65535`.
pub fn validate_relay(relay: &str) -> Result<()> {
    let invalid = || SettingsError::Invalid(format!("relay address: {}", relay));

    let captures = RELAY_PATTERN.captures(relay).ok_or_else(invalid)?;
    if let Some(port) = captures.get(1) {
        match port.as_str()[1..].parse::<u16>() {
            Ok(p) if p > 0 => {}
            _ => return Err(invalid()),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("sockbridge-settings-{}-{}", std::process::id(), name))
            .join("settings.json")
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.listen, "0.0.0.0:8080");
        assert_eq!(settings.server.password, DEFAULT_SECRET);
        assert_eq!(settings.server.connect_timeout(), Duration::from_secs(30));
        assert_eq!(settings.server.chunk_size().unwrap(), 64 * 1024);
        assert_eq!(settings.server.max_message_size().unwrap(), 16 * 1024 * 1024);
        assert_eq!(settings.client.listen_port, 8080);
        assert_eq!(settings.client.password, DEFAULT_SECRET);
        assert!(settings.client.relay.is_empty());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_env_password_overrides_both() {
        let mut settings = Settings::default();
        settings.apply_env_with(|key| (key == "PASSWORD").then(|| "s3cret".to_string()));
        assert_eq!(settings.server.password, "s3cret");
        assert_eq!(settings.client.password, "s3cret");
    }

    #[test]
    fn test_empty_env_password_is_ignored() {
        let mut settings = Settings::default();
        settings.apply_env_with(|_| Some(String::new()));
        assert_eq!(settings.server.password, DEFAULT_SECRET);

        settings.apply_env_with(|_| None);
        assert_eq!(settings.client.password, DEFAULT_SECRET);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"server": {"listen": "127.0.0.1:9000"}, "client": {"relay": "relay.example.com"}}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.server.listen_addr().unwrap().port(), 9000);
        assert_eq!(settings.server.password, DEFAULT_SECRET);
        assert_eq!(settings.client.relay, "relay.example.com");
        assert_eq!(settings.client.chunk_kb, 64);
    }

    #[test]
    fn test_chunk_range() {
        let mut settings = Settings::default();
        settings.client.chunk_kb = 0;
        assert!(settings.validate().is_err());
        settings.client.chunk_kb = 1025;
        assert!(settings.validate().is_err());
        settings.client.chunk_kb = 1024;
        assert!(settings.validate().is_ok());

        settings.server.chunk_kb = 2048;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_channel_depth_bounds() {
        let mut settings = Settings::default();
        settings.server.channel_depth = 0;
        assert!(settings.validate().is_err());
        settings.server.channel_depth = 65537;
        assert!(settings.validate().is_err());
        settings.server.channel_depth = usize::MAX;
        assert!(settings.validate().is_err());
        settings.server.channel_depth = 65536;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_max_message_bounds() {
        let mut settings = Settings::default();
        settings.server.max_message_kb = 1024 * 1024 + 1;
        assert!(settings.validate().is_err());
        settings.server.max_message_kb = 1024 * 1024;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_size_helpers_do_not_overflow() {
        let mut server = ServerSettings::default();
        server.max_message_kb = usize::MAX;
        assert!(matches!(server.max_message_size(), Err(SettingsError::Invalid(_))));
        server.chunk_kb = usize::MAX;
        assert!(server.chunk_size().is_err());

        let mut client = ClientSettings::default();
        client.chunk_kb = usize::MAX;
        assert!(client.chunk_size().is_err());
    }

    #[test]
    fn test_invalid_listen() {
        let mut settings = Settings::default();
        settings.server.listen = "not an address".to_string();
        assert!(matches!(settings.validate(), Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn test_validate_relay() {
        assert!(validate_relay("relay.example.com").is_ok());
        assert!(validate_relay("relay-1.example.com:8443").is_ok());
        assert!(validate_relay("relay.example.com/tunnel/ws").is_ok());
        assert!(validate_relay("10.0.0.1:80/").is_ok());

        assert!(validate_relay("").is_err());
        assert!(validate_relay(":443").is_err());
        assert!(validate_relay("relay.example.com:").is_err());
        assert!(validate_relay("relay.example.com:abc").is_err());
        assert!(validate_relay("relay.example.com:70000").is_err());
        assert!(validate_relay("wss://relay.example.com").is_err());
        assert!(validate_relay("relay_example.com").is_err());
        assert!(validate_relay("relay example.com").is_err());
    }

    #[test]
    fn test_validate_relay_port_range() {
        assert!(validate_relay("relay.example.com:1").is_ok());
        assert!(validate_relay("relay.example.com:65535/ws").is_ok());

        // Digits match the address pattern but are still out of range
        assert!(validate_relay("relay.example.com:0").is_err());
        assert!(validate_relay("relay.example.com:65536").is_err());
        assert!(validate_relay("relay.example.com:99999999999").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("roundtrip");
        let mut settings = Settings::default();
        settings.server.password = "from-file".to_string();
        settings.client.relay = "relay.example.com:8443".to_string();
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.server.password, "from-file");
        assert_eq!(loaded.client.relay, "relay.example.com:8443");

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let path = temp_path("missing");
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.server.listen, "0.0.0.0:8080");
    }

    #[test]
    fn test_load_bad_json() {
        let path = temp_path("bad");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(Settings::load_from(&path), Err(SettingsError::ParseError(_))));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
