// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry client configuration.

use std::time::Duration;

/// Configuration for connecting to a `meshrpc-registry` server.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Registry server address (host:port).
    pub server_address: String,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Maximum wait for the answer to a single registry request.
    pub request_timeout: Duration,

    /// Heartbeat interval (to keep lease alive).
    pub heartbeat_interval: Duration,

    /// Interval at which subscriptions re-resolve their key, covering any
    /// missed push notification.
    pub poll_interval: Duration,

    /// First reconnect delay after disconnection; doubles up to `max_reconnect_delay`.
    pub reconnect_delay: Duration,

    pub max_reconnect_delay: Duration,

    /// Enable automatic reconnection on disconnect.
    pub auto_reconnect: bool,

    /// Maximum message size.
    pub max_message_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:2181".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(10),
            poll_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            auto_reconnect: true,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

impl RegistryConfig {
    /// Create a new configuration with the given server address.
    pub fn new(server_address: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            ..Default::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn without_auto_reconnect(mut self) -> Self {
        self.auto_reconnect = false;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.server_address.is_empty() {
            return Err("server_address cannot be empty");
        }
        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be > 0");
        }
        if self.request_timeout.is_zero() {
            return Err("request_timeout must be > 0");
        }
        if self.heartbeat_interval.is_zero() {
            return Err("heartbeat_interval must be > 0");
        }
        if self.poll_interval.is_zero() {
            return Err("poll_interval must be > 0");
        }
        if self.max_message_size == 0 {
            return Err("max_message_size must be > 0");
        }
        Ok(())
    }
}
