//! Configuration module for strandline
//!
//! JSON configuration for acceptors and connectors.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address an acceptor listens on
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Default end point for connectors
    #[serde(default)]
    pub target: Option<String>,

    #[serde(default)]
    pub acceptor: AcceptorConfig,

    #[serde(default)]
    pub connector: ConnectorConfig,
}

fn default_listen() -> String {
    "127.0.0.1:0".to_string()
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            target: None,
            acceptor: AcceptorConfig::default(),
            connector: ConnectorConfig::default(),
        }
    }
}

/// Acceptor options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptorConfig {
    /// Disable Nagle's algorithm on accepted streams
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

fn default_nodelay() -> bool {
    true
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            nodelay: default_nodelay(),
        }
    }
}

/// Connector options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Deadline for opening a stream, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Disable Nagle's algorithm on dialed streams
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl ConnectorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            nodelay: default_nodelay(),
        }
    }
}
