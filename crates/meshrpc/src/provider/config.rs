// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Provider configuration.

use crate::codec::DEFAULT_MAX_FRAME_SIZE;
use std::time::Duration;

/// Configuration for a [`Provider`](super::Provider).
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Interface to bind (the port comes from `listen`).
    pub bind_host: String,

    /// Host published to the registry. Defaults to the bound IP, which is
    /// only useful to remote consumers when `bind_host` is a routable address.
    pub advertise_host: Option<String>,

    /// Maximum frame body size accepted from consumers.
    pub max_frame_size: usize,

    /// Upper bound on how long `close` waits for in-flight dispatches.
    pub drain_timeout: Duration,

    /// Connections beyond this count are refused (0 = unlimited).
    pub max_connections: usize,

    /// Per-connection queue of responses waiting to be written.
    pub outbound_queue: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            advertise_host: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            drain_timeout: Duration::from_secs(10),
            max_connections: 0,
            outbound_queue: 256,
        }
    }
}

impl ProviderConfig {
    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    pub fn with_advertise_host(mut self, host: impl Into<String>) -> Self {
        self.advertise_host = Some(host.into());
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.bind_host.is_empty() {
            return Err("bind_host cannot be empty");
        }
        if self.max_frame_size == 0 {
            return Err("max_frame_size must be > 0");
        }
        if self.outbound_queue == 0 {
            return Err("outbound_queue must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProviderConfig::default();
        assert_eq!(config.bind_host, "127.0.0.1");
        assert!(config.advertise_host.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let config = ProviderConfig::default().with_bind_host("");
        assert!(config.validate().is_err());

        let config = ProviderConfig {
            outbound_queue: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
