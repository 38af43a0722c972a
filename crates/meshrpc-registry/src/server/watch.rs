// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Watch routing.
//!
//! Sessions subscribe to service keys; whenever the address set of a key
//! changes, a `notify` with the full current set is queued on every
//! watching session's outbound channel.

use meshrpc::registry::protocol::RegistryMessage;
use meshrpc::registry::SessionId;
use meshrpc::ServiceKey;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::debug;

/// Watch statistics.
#[derive(Debug, Default, Clone)]
pub struct WatchStats {
    /// Notifications queued to sessions.
    pub notifications_sent: u64,
    /// Notifications dropped because a session's queue was full or closed.
    pub notifications_dropped: u64,
}

/// Watching sessions indexed by key.
#[derive(Default)]
pub struct WatchRouter {
    /// Outbound channel of each connected session.
    sessions: HashMap<SessionId, mpsc::Sender<RegistryMessage>>,
    /// key -> sessions watching it
    watchers: HashMap<ServiceKey, HashSet<SessionId>>,
    stats: WatchStats,
}

impl WatchRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session's outbound channel.
    pub fn register(&mut self, session: SessionId, tx: mpsc::Sender<RegistryMessage>) {
        self.sessions.insert(session, tx);
    }

    /// Forget a session and all its watches.
    pub fn unregister(&mut self, session: SessionId) {
        self.sessions.remove(&session);
        self.watchers.retain(|_, sessions| {
            sessions.remove(&session);
            !sessions.is_empty()
        });
    }

    pub fn subscribe(&mut self, key: ServiceKey, session: SessionId) {
        self.watchers.entry(key).or_default().insert(session);
    }

    pub fn unsubscribe(&mut self, key: &ServiceKey, session: SessionId) {
        if let Some(sessions) = self.watchers.get_mut(key) {
            sessions.remove(&session);
            if sessions.is_empty() {
                self.watchers.remove(key);
            }
        }
    }

    /// Queue `notify` for every watcher of `key`. Returns how many sessions
    /// were notified.
    pub fn notify(&mut self, key: &ServiceKey, addresses: &[String]) -> usize {
        let Some(sessions) = self.watchers.get(key) else {
            return 0;
        };

        let mut sent = 0;
        for session in sessions {
            let Some(tx) = self.sessions.get(session) else {
                continue;
            };
            let msg = RegistryMessage::Notify {
                key: key.clone(),
                addresses: addresses.to_vec(),
            };
            // Watchers fall back to polling when a push is lost.
            match tx.try_send(msg) {
                Ok(()) => {
                    self.stats.notifications_sent += 1;
                    sent += 1;
                }
                Err(e) => {
                    debug!("Dropping notify for {} to session {}: {}", key, session, e);
                    self.stats.notifications_dropped += 1;
                }
            }
        }
        sent
    }

    pub fn stats(&self) -> &WatchStats {
        &self.stats
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn watcher_count(&self, key: &ServiceKey) -> usize {
        self.watchers.get(key).map_or(0, HashSet::len)
    }
}
