//! Configuration types.
//!
//! On the device these values are compile-time constants; on Linux they are
//! loaded from a JSON file. Every field has a default so a missing or partial
//! configuration file still yields a runnable server.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read configuration: {0}")]
    Read(#[from] std::io::Error),

    /// Configuration data is invalid.
    #[error("configuration data is invalid: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Host name announced to the network and used as the default push job.
    pub hostname: String,

    /// Value of the `Server` response header.
    pub server_header: String,

    /// TCP port the web server listens on.
    pub port: u16,

    /// Namespace prefix for all exported metric names.
    pub metrics_namespace: String,

    /// Gzip decompression window size as a negative power-of-two exponent.
    ///
    /// Has to be at least as large as the window used when the assets were
    /// compressed. Valid range is -8 to -15; out-of-range values are clamped.
    pub gzip_window_bits: i8,

    /// Metrics push configuration.
    pub push: PushConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hostname: "wifi-thermometer".to_string(),
            server_header: "ThermoWeb".to_string(),
            port: 8080,
            metrics_namespace: "thermo".to_string(),
            gzip_window_bits: -10,
            push: PushConfig::default(),
        }
    }
}

impl Config {
    /// Parse a configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }
}

/// Configuration for the outbound metrics push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PushConfig {
    /// Whether metrics are pushed at all.
    pub enabled: bool,

    /// Push gateway host.
    pub addr: String,

    /// Push gateway port.
    pub port: u16,

    /// Seconds between push attempts.
    pub interval_secs: u64,

    /// Job label; the hostname is used when empty.
    pub job: String,

    /// Instance label; the local address is used when empty.
    pub instance: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: String::new(),
            port: 9091,
            interval_secs: 30,
            job: String::new(),
            instance: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.metrics_namespace, "thermo");
        assert_eq!(config.gzip_window_bits, -10);
        assert_eq!(config.push.port, 9091);
        assert!(!config.push.enabled);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = Config::from_json(r#"{"port": 9000, "push": {"enabled": true, "addr": "10.0.0.2"}}"#)
            .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.hostname, "wifi-thermometer");
        assert!(config.push.enabled);
        assert_eq!(config.push.addr, "10.0.0.2");
        assert_eq!(config.push.interval_secs, 30);
    }
}
