// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection pool keyed by provider address.
//!
//! Channels are multiplexed, so checkout hands out a shared handle and there
//! is nothing to check back in; broken channels are evicted instead.

use super::channel::Channel;
use super::config::ConsumerConfig;
use crate::error::{RpcError, RpcResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

pub(crate) struct ConnectionPool {
    config: Arc<ConsumerConfig>,
    inner: Mutex<PoolInner>,
    next: AtomicUsize,
}

#[derive(Default)]
struct PoolInner {
    channels: HashMap<String, Vec<Arc<Channel>>>,
    closed: bool,
}

impl ConnectionPool {
    pub(crate) fn new(config: Arc<ConsumerConfig>) -> Self {
        Self {
            config,
            inner: Mutex::new(PoolInner::default()),
            next: AtomicUsize::new(0),
        }
    }

    /// A live channel to `address`, opening one if the address is below its
    /// connection quota.
    pub(crate) async fn checkout(&self, address: &str) -> RpcResult<Arc<Channel>> {
        if let Some(channel) = self.existing(address)? {
            return Ok(channel);
        }

        let channel = Channel::connect(address, &self.config).await?;

        let mut inner = self.inner.lock();
        if inner.closed {
            channel.close();
            return Err(RpcError::Cancelled);
        }
        let list = inner.channels.entry(address.to_string()).or_default();
        list.retain(|c| !c.is_closed());
        if list.len() < self.config.connections_per_address {
            list.push(channel.clone());
        } else {
            // Lost a race with another checkout; use the pooled one.
            channel.close();
            let n = self.next.fetch_add(1, Ordering::Relaxed);
            return Ok(list[n % list.len()].clone());
        }
        Ok(channel)
    }

    fn existing(&self, address: &str) -> RpcResult<Option<Arc<Channel>>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(RpcError::Cancelled);
        }
        let Some(list) = inner.channels.get_mut(address) else {
            return Ok(None);
        };
        list.retain(|c| !c.is_closed());
        if list.len() < self.config.connections_per_address {
            return Ok(None);
        }
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Ok(Some(list[n % list.len()].clone()))
    }

    /// Remove a channel that failed.
    pub(crate) fn evict(&self, channel: &Arc<Channel>) {
        let mut inner = self.inner.lock();
        if let Some(list) = inner.channels.get_mut(channel.address()) {
            list.retain(|c| !Arc::ptr_eq(c, channel));
            if list.is_empty() {
                inner.channels.remove(channel.address());
            }
        }
        debug!("Evicted channel to {}", channel.address());
        channel.close();
    }

    /// Close every channel; later checkouts fail with `Cancelled`.
    pub(crate) fn close(&self) {
        let channels = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            std::mem::take(&mut inner.channels)
        };
        for channel in channels.into_values().flatten() {
            channel.close();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().channels.values().map(Vec::len).sum()
    }
}
