//! Sockbridge Settings
//!
//! Configuration for the relay server and the CONNECT proxy client.
//!
//! ## Sources, lowest to highest precedence
//!
//! - Built-in defaults
//! - JSON settings file
//! - `PASSWORD` environment variable (both secrets)
//! - Command-line flags (applied by the binary)
//!
//! ## Usage
//!
//! ```no_run
//! use sockbridge_settings::Settings;
//!
//! let mut settings = Settings::load_or_default()?;
//! settings.apply_env();
//! settings.validate()?;
//!
//! let listen = settings.server.listen_addr()?;
//! # let _ = listen;
//! # Ok::<(), sockbridge_settings::SettingsError>(())
//! ```

mod config;

pub use config::{validate_relay, ClientSettings, ServerSettings, Settings};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("Failed to create config directory: {0}")]
    CreateDirError(std::io::Error),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Get the default settings file path
///
/// `$XDG_CONFIG_HOME/sockbridge/settings.json`, falling back to
/// `$HOME/.config/sockbridge/settings.json`, then the working directory.
pub fn default_settings_path() -> PathBuf {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")));

    match base {
        Some(base) => base.join("sockbridge").join("settings.json"),
        None => PathBuf::from("sockbridge.json"),
    }
}
