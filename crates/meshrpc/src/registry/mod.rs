// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry clients.
//!
//! Providers publish their address under a [`ServiceKey`]; consumers resolve
//! and watch the address set of the keys they call. Two backends implement
//! [`Registry`]:
//!
//! - [`RegistryClient`] talks to a `meshrpc-registry` server over TCP.
//! - [`MemoryRegistry`] keeps everything in-process (single binary setups, tests).
//!
//! # Example
//!
//! ```ignore
//! use meshrpc::registry::{Registry, RegistryClient, RegistryConfig};
//!
//! let registry = RegistryClient::new(RegistryConfig::default())?;
//! registry.connect().await?;
//! let addrs = registry.resolve_addresses(&key).await?;
//! ```

mod client;
mod config;
mod memory;
pub mod protocol;
mod table;

pub use client::RegistryClient;
pub use config::RegistryConfig;
pub use memory::MemoryRegistry;
pub use table::{ServiceTable, SessionId};

use crate::error::RpcResult;
use crate::metadata::ServiceKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A provider address published under a service key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub key: ServiceKey,
    /// `host:port` the provider accepts connections on.
    pub address: String,
    pub pid: u32,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RegistryEntry {
    pub fn new(key: ServiceKey, address: impl Into<String>, pid: u32) -> Self {
        Self {
            key,
            address: address.into(),
            pid,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }
}

/// Callback fired with the full, current address set of a key.
///
/// Delivery is at-least-once: the same set may be delivered twice.
pub type AddressListener = Arc<dyn Fn(&ServiceKey, &[String]) + Send + Sync>;

/// Handle returned by [`Registry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Coordination backend contract.
#[async_trait]
pub trait Registry: Send + Sync + 'static {
    /// Establish the session. Fails with `RegistryUnavailable` when the backend
    /// cannot be reached within the connect timeout.
    async fn connect(&self) -> RpcResult<()>;

    /// Publish a provider address. Publishing the same entry again is a no-op.
    async fn publish(&self, entry: RegistryEntry) -> RpcResult<()>;

    /// Remove a previously published address.
    async fn unpublish(&self, key: &ServiceKey, address: &str) -> RpcResult<()>;

    /// Current live addresses for `key`. Empty means "no providers right now".
    async fn resolve_addresses(&self, key: &ServiceKey) -> RpcResult<Vec<String>>;

    /// Watch the address set of `key`. The listener is invoked with the current
    /// set once the subscription is in place and after every change.
    async fn subscribe(
        &self,
        key: &ServiceKey,
        listener: AddressListener,
    ) -> RpcResult<SubscriptionId>;

    async fn unsubscribe(&self, id: SubscriptionId) -> RpcResult<()>;

    /// Release the session. Safe to call when `connect` never succeeded.
    async fn destroy(&self);
}
