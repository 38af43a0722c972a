// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry server configuration.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Registry server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port to listen on (default: 2181, 0 picks a free port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Entries not refreshed by a heartbeat within this window are dropped
    #[serde(default = "default_lease_duration")]
    pub lease_duration_ms: u64,

    /// How often the lease checker runs
    #[serde(default = "default_lease_check_interval")]
    pub lease_check_interval_ms: u64,

    /// Maximum number of connected sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Maximum number of published entries per session
    #[serde(default = "default_max_entries")]
    pub max_entries_per_session: usize,

    /// Maximum message size (bytes)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    2181
}

fn default_lease_duration() -> u64 {
    30_000
}

fn default_lease_check_interval() -> u64 {
    1_000
}

fn default_max_sessions() -> usize {
    1000
}

fn default_max_entries() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    16 * 1024 * 1024 // 16 MB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            lease_duration_ms: default_lease_duration(),
            lease_check_interval_ms: default_lease_check_interval(),
            max_sessions: default_max_sessions(),
            max_entries_per_session: default_max_entries(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn lease_check_interval(&self) -> Duration {
        Duration::from_millis(self.lease_check_interval_ms)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lease_duration_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "lease_duration_ms cannot be 0".into(),
            ));
        }
        if self.lease_check_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "lease_check_interval_ms cannot be 0".into(),
            ));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::InvalidValue("max_sessions cannot be 0".into()));
        }
        if self.max_entries_per_session == 0 {
            return Err(ConfigError::InvalidValue(
                "max_entries_per_session cannot be 0".into(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::InvalidValue(
                "max_message_size cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
