//! Configuration for the session manager
//!
//! The manager receives everything it needs as plain configuration values;
//! it never reads or persists settings on its own. Connection options that
//! are policy rather than configuration (clean session, keep-alive, connect
//! timeout, transport-level auto-reconnect off) are fixed constants here.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Keep-alive interval applied to every connection.
pub const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// How long a connect attempt may wait for the broker's acknowledgement
/// before the manager declares the attempt failed.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Session manager configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Broker address: `tcp://` / `mqtt://` for plain TCP, `ssl://` / `mqtts://` for TLS
    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    /// Base client identifier; a unique suffix is appended on every connect
    /// attempt. Empty means the manager synthesizes the whole identifier.
    #[serde(default)]
    pub client_id: String,

    /// Default topic filter for the demo subscriber
    #[serde(default = "default_topic")]
    pub subscribe_topic: String,

    /// Default topic for the demo publisher
    #[serde(default = "default_topic")]
    pub publish_topic: String,

    /// Default message body for the demo publisher
    #[serde(default = "default_message")]
    pub message: String,

    /// Environment variable containing the broker username
    #[serde(default)]
    pub username_env: Option<String>,

    /// Environment variable containing the broker password
    #[serde(default)]
    pub password_env: Option<String>,
}

fn default_broker_url() -> String {
    "tcp://mqtt.eclipseprojects.io:1883".to_string()
}

fn default_topic() -> String {
    "test/topic".to_string()
}

fn default_message() -> String {
    "Hello MQTT!".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            client_id: String::new(),
            subscribe_topic: default_topic(),
            publish_topic: default_topic(),
            message: default_message(),
            username_env: None,
            password_env: None,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Broker username resolved from the configured environment variable
    pub fn username(&self) -> Option<String> {
        self.username_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }

    /// Broker password resolved from the configured environment variable
    pub fn password(&self) -> Option<String> {
        self.password_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
}
