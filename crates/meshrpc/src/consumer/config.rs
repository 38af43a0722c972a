// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Consumer configuration.

use crate::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::metadata::CallAttributes;
use std::time::Duration;

/// Address selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectorKind {
    #[default]
    RoundRobin,
    FirstAvailable,
}

/// Configuration for a [`Consumer`](super::Consumer).
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Call timeout when neither method nor service declares one.
    pub default_timeout: Duration,

    /// Extra attempts when neither method nor service declares a count.
    pub default_retries: u32,

    pub connect_timeout: Duration,

    /// Multiplexed connections kept per provider address.
    pub connections_per_address: usize,

    pub max_frame_size: usize,

    /// Idle time after which a connection sends a heartbeat.
    pub heartbeat_interval: Duration,

    /// Per-connection queue of frames waiting to be written.
    pub outbound_queue: usize,

    pub selector: SelectorKind,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(3),
            default_retries: 2,
            connect_timeout: Duration::from_secs(3),
            connections_per_address: 1,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            heartbeat_interval: Duration::from_secs(60),
            outbound_queue: 256,
            selector: SelectorKind::RoundRobin,
        }
    }
}

impl ConsumerConfig {
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_default_retries(mut self, retries: u32) -> Self {
        self.default_retries = retries;
        self
    }

    pub fn with_connections_per_address(mut self, count: usize) -> Self {
        self.connections_per_address = count;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_selector(mut self, selector: SelectorKind) -> Self {
        self.selector = selector;
        self
    }

    /// Fallback attributes for calls whose descriptor declares none.
    pub fn default_attributes(&self) -> CallAttributes {
        CallAttributes {
            timeout: self.default_timeout,
            retries: self.default_retries,
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.default_timeout.is_zero() {
            return Err("default_timeout must be > 0");
        }
        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be > 0");
        }
        if self.connections_per_address == 0 {
            return Err("connections_per_address must be > 0");
        }
        if self.heartbeat_interval.is_zero() {
            return Err("heartbeat_interval must be > 0");
        }
        if self.max_frame_size == 0 || self.outbound_queue == 0 {
            return Err("max_frame_size and outbound_queue must be > 0");
        }
        Ok(())
    }
}
