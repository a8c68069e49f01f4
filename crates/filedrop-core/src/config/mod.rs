//! Configuration management for filedrop.
//!
//! This module handles loading, saving, and managing filedrop configuration.
//! Command-line flags override values loaded from the file.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/filedrop/config.toml` |
//! | macOS | `~/Library/Application Support/Filedrop/config.toml` |
//! | Windows | `%APPDATA%\Filedrop\config.toml` |
//!
//! ## Example
//!
//! ```toml
//! [server]
//! port = 5001
//! save_dir = "received_files"
//! max_connections = 8
//! header_timeout = "30s"
//!
//! [sender]
//! connect_timeout = "10s"
//! reply_timeout = "5m"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct for filedrop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Receiver service settings
    pub server: ServerConfig,
    /// Sender settings
    pub sender: SenderConfig,
}

/// Receiver service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Directory received files are written to
    pub save_dir: PathBuf,
    /// Connections handled at once (1 = strictly sequential)
    pub max_connections: usize,
    /// Listen backlog
    pub backlog: i32,
    /// Bounded read size for body chunks
    pub chunk_size: usize,
    /// How long a new connection may take to send its header
    #[serde(with = "humantime_serde")]
    pub header_timeout: Duration,
    /// How long a connection may stay silent mid-body, and the reply write deadline
    #[serde(with = "humantime_serde")]
    pub io_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            save_dir: PathBuf::from(crate::DEFAULT_SAVE_DIRECTORY),
            max_connections: crate::DEFAULT_MAX_CONNECTIONS,
            backlog: crate::DEFAULT_BACKLOG,
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            header_timeout: Duration::from_secs(30),
            io_timeout: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    /// Resolve `host:port` into a socket address.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if the host is not an IP address.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip = self.host.parse().map_err(|e| {
            Error::ConfigError(format!("invalid listen host '{}': {e}", self.host))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Sender configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Receiver port
    pub port: u16,
    /// Chunk size for reading and sending the body
    pub chunk_size: usize,
    /// Connect deadline
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Deadline for each header or chunk write
    #[serde(with = "humantime_serde")]
    pub io_timeout: Duration,
    /// How long to wait for the receiver's verdict after the last chunk
    #[serde(with = "humantime_serde")]
    pub reply_timeout: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_PORT,
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(60),
            reply_timeout: Duration::from_secs(300),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file.
    ///
    /// Creates the parent directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        std::fs::write(path, self.to_toml()?)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Render the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "filedrop", "Filedrop")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.strip_suffix("ms")
            .map(|millis| {
                millis
                    .parse()
                    .map(Duration::from_millis)
                    .map_err(serde::de::Error::custom)
            })
            .or_else(|| {
                s.strip_suffix('s').map(|secs| {
                    secs.parse()
                        .map(Duration::from_secs)
                        .map_err(serde::de::Error::custom)
                })
            })
            .or_else(|| {
                s.strip_suffix('m').map(|mins| {
                    mins.parse::<u64>()
                        .map(|m| Duration::from_secs(m * 60))
                        .map_err(serde::de::Error::custom)
                })
            })
            .unwrap_or_else(|| Err(serde::de::Error::custom("invalid duration format")))
    }
}
