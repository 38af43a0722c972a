// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process registry backend.

use super::table::{ServiceTable, SessionId};
use super::{AddressListener, Registry, RegistryEntry, SubscriptionId};
use crate::error::{RpcError, RpcResult};
use crate::metadata::ServiceKey;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const LOCAL_SESSION: SessionId = 0;

/// Registry living entirely inside the process.
///
/// Useful when provider and consumer share a binary, and in tests: failure
/// detection can be simulated with [`expire`](Self::expire) and
/// [`fail_address`](Self::fail_address).
pub struct MemoryRegistry {
    inner: Mutex<Inner>,
    reachable: bool,
    connected: AtomicBool,
}

#[derive(Default)]
struct Inner {
    table: ServiceTable,
    listeners: HashMap<SubscriptionId, (ServiceKey, AddressListener)>,
    next_subscription: u64,
}

type Notification = (AddressListener, ServiceKey, Vec<String>);

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            reachable: true,
            connected: AtomicBool::new(false),
        }
    }

    /// A registry whose backend can never be reached.
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new()
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn entry_count(&self) -> usize {
        self.inner.lock().table.entry_count()
    }

    /// Drop entries not refreshed within `lease`, notifying watchers.
    pub fn expire(&self, lease: Duration) -> Vec<ServiceKey> {
        let (changed, pending) = {
            let mut inner = self.inner.lock();
            let changed = inner.table.remove_expired(lease);
            let pending = inner.notifications(&changed);
            (changed, pending)
        };
        fire(pending);
        changed
    }

    /// Remove an address under every key, as a failed liveness check would.
    pub fn fail_address(&self, address: &str) -> Vec<ServiceKey> {
        let (changed, pending) = {
            let mut inner = self.inner.lock();
            let changed = inner.table.remove_address(address);
            let pending = inner.notifications(&changed);
            (changed, pending)
        };
        if !changed.is_empty() {
            tracing::info!("Removed failed provider {} from {} keys", address, changed.len());
        }
        fire(pending);
        changed
    }

    fn ensure_reachable(&self) -> RpcResult<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(RpcError::RegistryUnavailable(
                "in-memory registry marked unreachable".into(),
            ))
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn notifications(&self, keys: &[ServiceKey]) -> Vec<Notification> {
        let mut out = Vec::new();
        for key in keys {
            let addresses = self.table.addresses(key);
            for (watched, listener) in self.listeners.values() {
                if watched == key {
                    out.push((listener.clone(), key.clone(), addresses.clone()));
                }
            }
        }
        out
    }
}

/// Invoke listeners outside the lock so they may call back into the registry.
fn fire(pending: Vec<Notification>) {
    for (listener, key, addresses) in pending {
        listener(&key, &addresses);
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn connect(&self) -> RpcResult<()> {
        self.ensure_reachable()?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, entry: RegistryEntry) -> RpcResult<()> {
        self.ensure_reachable()?;
        let pending = {
            let mut inner = self.inner.lock();
            let key = entry.key.clone();
            if inner.table.upsert(LOCAL_SESSION, entry) {
                inner.notifications(std::slice::from_ref(&key))
            } else {
                Vec::new()
            }
        };
        fire(pending);
        Ok(())
    }

    async fn unpublish(&self, key: &ServiceKey, address: &str) -> RpcResult<()> {
        self.ensure_reachable()?;
        let pending = {
            let mut inner = self.inner.lock();
            if inner.table.remove(key, address).is_some() {
                inner.notifications(std::slice::from_ref(key))
            } else {
                Vec::new()
            }
        };
        fire(pending);
        Ok(())
    }

    async fn resolve_addresses(&self, key: &ServiceKey) -> RpcResult<Vec<String>> {
        self.ensure_reachable()?;
        Ok(self.inner.lock().table.addresses(key))
    }

    async fn subscribe(
        &self,
        key: &ServiceKey,
        listener: AddressListener,
    ) -> RpcResult<SubscriptionId> {
        self.ensure_reachable()?;
        let (id, addresses) = {
            let mut inner = self.inner.lock();
            inner.next_subscription += 1;
            let id = SubscriptionId(inner.next_subscription);
            inner.listeners.insert(id, (key.clone(), listener.clone()));
            (id, inner.table.addresses(key))
        };
        listener(key, &addresses);
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> RpcResult<()> {
        self.inner.lock().listeners.remove(&id);
        Ok(())
    }

    async fn destroy(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.inner.lock().listeners.clear();
        }
    }
}
