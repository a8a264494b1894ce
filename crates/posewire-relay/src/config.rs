// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay configuration.
//!
//! Loaded from TOML or built from command line arguments.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use thiserror::Error;

use posewire::DEFAULT_PORT;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay name (for identification in logs).
    #[serde(default = "default_name")]
    pub name: String,

    /// Address to listen on.
    #[serde(default = "default_listen_address")]
    pub listen_address: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest frame a peer may send before it is disconnected (bytes).
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Outgoing backlog per peer before frames to it are dropped (bytes).
    #[serde(default = "default_max_pending_bytes")]
    pub max_pending_bytes: usize,

    /// Connections beyond this are refused.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,

    /// Enable TCP_NODELAY on accepted connections.
    #[serde(default = "default_true")]
    pub nodelay: bool,

    /// Statistics reporting interval (seconds, 0 to disable).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_name() -> String {
    "posewire-relay".to_string()
}

fn default_listen_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_frame_size() -> usize {
    64 * 1024
}

fn default_max_pending_bytes() -> usize {
    1024 * 1024
}

fn default_max_peers() -> usize {
    64
}

fn default_true() -> bool {
    true
}

fn default_stats_interval() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            listen_address: default_listen_address(),
            port: default_port(),
            max_frame_size: default_max_frame_size(),
            max_pending_bytes: default_max_pending_bytes(),
            max_peers: default_max_peers(),
            nodelay: true,
            stats_interval_secs: default_stats_interval(),
            log_level: default_log_level(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loopback relay on an OS-assigned port, for tests and local runs.
    pub fn loopback() -> Self {
        Self {
            listen_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            stats_interval_secs: 0,
            ..Default::default()
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.port)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Must hold a full control frame plus an identity line.
        const MIN_FRAME_SIZE: usize = 1024;

        if self.max_frame_size < MIN_FRAME_SIZE {
            return Err(ConfigError::Invalid(format!(
                "max_frame_size must be at least {} bytes, got {}",
                MIN_FRAME_SIZE, self.max_frame_size
            )));
        }
        if self.max_pending_bytes < self.max_frame_size {
            return Err(ConfigError::Invalid(format!(
                "max_pending_bytes ({}) is smaller than max_frame_size ({})",
                self.max_pending_bytes, self.max_frame_size
            )));
        }
        if self.max_peers == 0 {
            return Err(ConfigError::Invalid("max_peers must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 6969);
        assert_eq!(config.listen_addr().to_string(), "0.0.0.0:6969");
        assert!(config.validate().is_ok());
        assert!(RelayConfig::loopback().validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = RelayConfig::default();
        config.max_frame_size = 100;
        assert!(config.validate().is_err());

        let mut config = RelayConfig::default();
        config.max_pending_bytes = config.max_frame_size - 1;
        assert!(config.validate().is_err());

        let mut config = RelayConfig::default();
        config.max_peers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"lab\"\nport = 7000\nmax_peers = 4").unwrap();

        let config = RelayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.name, "lab");
        assert_eq!(config.port, 7000);
        assert_eq!(config.max_peers, 4);
        assert_eq!(config.max_frame_size, 64 * 1024);
        assert!(config.nodelay);
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_frame_size = 10").unwrap();
        assert!(matches!(
            RelayConfig::from_file(file.path()),
            Err(ConfigError::Invalid(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a port\"").unwrap();
        assert!(matches!(
            RelayConfig::from_file(file.path()),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = RelayConfig {
            name: "bench".into(),
            port: 7100,
            ..Default::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let back: RelayConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
