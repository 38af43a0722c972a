// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Consumer (client) engine.
//!
//! For each call the consumer resolves the key's providers through the
//! registry (cached and kept fresh by a subscription), selects one, sends
//! the request over a pooled connection and waits for the matching response.
//! Timeouts and connection failures are retried against another address,
//! up to the method's retry count.
//!
//! ```ignore
//! let consumer = Consumer::new(ConsumerConfig::default(), registry, binder)?;
//! let sum = consumer.invoke(&key, "add", vec![json!(1), json!(2)]).await?;
//! consumer.close().await;
//! ```

mod channel;
mod config;
mod pool;
mod selector;

pub use config::{ConsumerConfig, SelectorKind};
pub use selector::{FirstAvailable, RoundRobin, Selector};

use crate::codec::RequestPacket;
use crate::error::{RpcError, RpcResult};
use crate::metadata::{CallAttributes, MetadataBinder, ServiceKey};
use crate::registry::{AddressListener, Registry, SubscriptionId};
use parking_lot::Mutex;
use pool::ConnectionPool;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// RPC consumer.
pub struct Consumer {
    config: Arc<ConsumerConfig>,
    registry: Arc<dyn Registry>,
    binder: Arc<MetadataBinder>,
    selector: Arc<dyn Selector>,
    pool: ConnectionPool,
    /// Last known addresses per key, fed by registry notifications
    addresses: Arc<Mutex<HashMap<ServiceKey, Vec<String>>>>,
    subscriptions: tokio::sync::Mutex<HashMap<ServiceKey, SubscriptionId>>,
    closed: AtomicBool,
}

impl Consumer {
    pub fn new(
        config: ConsumerConfig,
        registry: Arc<dyn Registry>,
        binder: Arc<MetadataBinder>,
    ) -> RpcResult<Self> {
        config
            .validate()
            .map_err(|e| RpcError::Config(e.to_string()))?;

        let config = Arc::new(config);
        Ok(Self {
            selector: config.selector.build(),
            pool: ConnectionPool::new(config.clone()),
            config,
            registry,
            binder,
            addresses: Arc::new(Mutex::new(HashMap::new())),
            subscriptions: tokio::sync::Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Replace the configured selection policy.
    pub fn with_selector(mut self, selector: Arc<dyn Selector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Open connections, across all provider addresses.
    pub fn connection_count(&self) -> usize {
        self.pool.len()
    }

    /// Call `method` on `key` with positional parameters.
    pub async fn invoke(
        &self,
        key: &ServiceKey,
        method: &str,
        params: Vec<Value>,
    ) -> RpcResult<Value> {
        if self.is_closed() {
            return Err(RpcError::Cancelled);
        }

        let attrs = self.attributes(key, method);
        let mut tried: Vec<String> = Vec::new();
        let mut attempt = 0;

        loop {
            match self.attempt(key, method, &params, attrs.timeout, &mut tried).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < attrs.retries && !self.is_closed() => {
                    attempt += 1;
                    debug!(
                        "Retrying {}#{} ({}/{}): {}",
                        key, method, attempt, attrs.retries, e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Call `method` with named arguments, ordered by the method's declared
    /// parameters. Fails before sending when an argument is missing or
    /// unknown.
    pub async fn invoke_named(
        &self,
        key: &ServiceKey,
        method: &str,
        mut args: Map<String, Value>,
    ) -> RpcResult<Value> {
        let descriptor = self
            .binder
            .lookup(key)
            .ok_or_else(|| RpcError::ServiceNotFound(format!("{} is not registered", key)))?;
        let declared = descriptor.method(method).ok_or_else(|| {
            RpcError::ServiceNotFound(format!("{} has no method {}", key, method))
        })?;

        let mut params = Vec::with_capacity(declared.parameters.len());
        for spec in &declared.parameters {
            let value = args.remove(&spec.name).ok_or_else(|| {
                RpcError::InvalidArguments(format!(
                    "missing argument {} for {}#{}",
                    spec.name, key, method
                ))
            })?;
            params.push(value);
        }
        if let Some(extra) = args.keys().next() {
            return Err(RpcError::InvalidArguments(format!(
                "unknown argument {} for {}#{}",
                extra, key, method
            )));
        }

        self.invoke(key, method, params).await
    }

    fn attributes(&self, key: &ServiceKey, method: &str) -> CallAttributes {
        let defaults = self.config.default_attributes();
        match self.binder.lookup(key) {
            Some(descriptor) => descriptor.attributes(method, defaults),
            None => defaults,
        }
    }

    async fn attempt(
        &self,
        key: &ServiceKey,
        method: &str,
        params: &[Value],
        timeout: Duration,
        tried: &mut Vec<String>,
    ) -> RpcResult<Value> {
        let addresses = self.resolve(key).await?;

        // Prefer addresses not tried yet by this call.
        let fresh: Vec<String> = addresses
            .iter()
            .filter(|a| !tried.contains(a))
            .cloned()
            .collect();
        let candidates = if fresh.is_empty() { &addresses } else { &fresh };
        let address = self
            .selector
            .select(key, candidates)
            .cloned()
            .ok_or_else(|| RpcError::NoProvider(key.clone()))?;
        tried.push(address.clone());

        let channel = self.pool.checkout(&address).await?;
        let request = RequestPacket::new(key, method, params.to_vec());
        match channel.call(request, timeout).await {
            Ok(response) => response.into_result(),
            Err(e) => {
                if matches!(e, RpcError::Connection(_)) {
                    self.pool.evict(&channel);
                }
                Err(e)
            }
        }
    }

    /// Addresses for `key`: the cached set, else a fresh registry lookup.
    async fn resolve(&self, key: &ServiceKey) -> RpcResult<Vec<String>> {
        if let Some(cached) = self.addresses.lock().get(key) {
            if !cached.is_empty() {
                return Ok(cached.clone());
            }
        }

        self.watch(key).await;

        let addresses = self.registry.resolve_addresses(key).await?;
        if addresses.is_empty() {
            return Err(RpcError::NoProvider(key.clone()));
        }
        self.addresses.lock().insert(key.clone(), addresses.clone());
        Ok(addresses)
    }

    /// Subscribe to `key` once, so the cache follows the registry.
    async fn watch(&self, key: &ServiceKey) {
        let mut subscriptions = self.subscriptions.lock().await;
        if subscriptions.contains_key(key) || self.is_closed() {
            return;
        }

        let cache = self.addresses.clone();
        let listener: AddressListener = Arc::new(move |key: &ServiceKey, addrs: &[String]| {
            debug!("{} now has {} providers", key, addrs.len());
            cache.lock().insert(key.clone(), addrs.to_vec());
        });

        match self.registry.subscribe(key, listener).await {
            Ok(id) => {
                subscriptions.insert(key.clone(), id);
            }
            Err(e) => warn!("Cannot watch {}, falling back to lookups: {}", key, e),
        }
    }

    /// Fail all pending calls with `Cancelled`, close pooled connections and
    /// drop registry subscriptions. A second call is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.pool.close();

        let subscriptions: Vec<SubscriptionId> = self
            .subscriptions
            .lock()
            .await
            .drain()
            .map(|(_, id)| id)
            .collect();
        for id in subscriptions {
            if let Err(e) = self.registry.unsubscribe(id).await {
                warn!("Failed to unsubscribe: {}", e);
            }
        }
        self.addresses.lock().clear();

        info!("Consumer closed");
    }
}
