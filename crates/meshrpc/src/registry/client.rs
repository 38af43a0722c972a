// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP registry client.
//!
//! One background session task owns the socket. API calls hand it a
//! [`RegistryMessage`] tagged with a fresh sequence number and wait for the
//! matching answer. The task also sends lease heartbeats, re-resolves watched
//! keys every `poll_interval` (covering lost pushes), and on disconnect
//! reconnects with capped exponential backoff, replaying everything this
//! client published or watched.

use super::config::RegistryConfig;
use super::protocol::{RegistryCodec, RegistryMessage};
use super::{AddressListener, Registry, RegistryEntry, SubscriptionId};
use crate::error::{RpcError, RpcResult};
use crate::metadata::ServiceKey;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Connection = Framed<TcpStream, RegistryCodec>;

/// Registry client for a `meshrpc-registry` server.
pub struct RegistryClient {
    config: RegistryConfig,
    shared: Arc<Shared>,
    session: Mutex<Option<SessionHandle>>,
}

/// State shared between the API side and the session task.
#[derive(Default)]
struct Shared {
    seq: AtomicU64,
    next_subscription: AtomicU64,
    /// Entries to replay after a reconnect
    published: Mutex<BTreeMap<(ServiceKey, String), RegistryEntry>>,
    /// API calls waiting for the answer to a sequence number
    replies: Mutex<HashMap<u64, oneshot::Sender<RpcResult<RegistryMessage>>>>,
    listeners: Mutex<HashMap<SubscriptionId, (ServiceKey, AddressListener)>>,
}

impl Shared {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn watched_keys(&self) -> BTreeSet<ServiceKey> {
        self.listeners
            .lock()
            .values()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Answer the API call waiting on `seq`, if it is still waiting.
    fn reply(&self, seq: u64, result: RpcResult<RegistryMessage>) {
        if let Some(tx) = self.replies.lock().remove(&seq) {
            // The caller may have given up in the meantime.
            drop(tx.send(result));
        }
    }

    fn listeners_for(&self, key: &ServiceKey) -> Vec<AddressListener> {
        self.listeners
            .lock()
            .values()
            .filter(|(watched, _)| watched == key)
            .map(|(_, listener)| listener.clone())
            .collect()
    }
}

struct SessionHandle {
    commands: mpsc::Sender<RegistryMessage>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Session-originated requests awaiting an answer.
enum Pending {
    /// Periodic re-resolve of a watched key.
    Poll,
    /// Publication or subscription replayed after reconnect.
    Replay,
}

enum Exit {
    Cancelled,
    Disconnected(String),
}

impl RegistryClient {
    /// Create a new client. No connection is made until [`Registry::connect`].
    pub fn new(config: RegistryConfig) -> RpcResult<Self> {
        config
            .validate()
            .map_err(|e| RpcError::Config(e.to_string()))?;

        Ok(Self {
            config,
            shared: Arc::new(Shared::default()),
            session: Mutex::new(None),
        })
    }

    /// Check if a session task is running.
    pub fn is_connected(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    async fn request(&self, build: impl FnOnce(u64) -> RegistryMessage) -> RpcResult<RegistryMessage> {
        let commands = self
            .session
            .lock()
            .as_ref()
            .map(|s| s.commands.clone())
            .ok_or_else(|| RpcError::RegistryUnavailable("not connected".into()))?;

        let seq = self.shared.next_seq();
        let (tx, rx) = oneshot::channel();
        self.shared.replies.lock().insert(seq, tx);
        if commands.send(build(seq)).await.is_err() {
            self.shared.replies.lock().remove(&seq);
            return Err(RpcError::RegistryUnavailable(
                "registry session closed".into(),
            ));
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::RegistryUnavailable(
                "registry connection lost".into(),
            )),
            Err(_) => {
                self.shared.replies.lock().remove(&seq);
                Err(RpcError::RegistryUnavailable(format!(
                    "registry request timed out after {:?}",
                    self.config.request_timeout
                )))
            }
        }
    }

    async fn expect_ack(&self, build: impl FnOnce(u64) -> RegistryMessage) -> RpcResult<()> {
        match self.request(build).await? {
            RegistryMessage::Ack { .. } => Ok(()),
            other => Err(RpcError::Protocol(format!(
                "unexpected registry answer: {:?}",
                other
            ))),
        }
    }
}

async fn open(config: &RegistryConfig) -> RpcResult<Connection> {
    let stream = tokio::time::timeout(
        config.connect_timeout,
        TcpStream::connect(&config.server_address),
    )
    .await
    .map_err(|_| {
        RpcError::RegistryUnavailable(format!(
            "connect to {} timed out after {:?}",
            config.server_address, config.connect_timeout
        ))
    })?
    .map_err(|e| {
        RpcError::RegistryUnavailable(format!("connect to {}: {}", config.server_address, e))
    })?;

    stream.set_nodelay(true).ok();
    Ok(Framed::new(
        stream,
        RegistryCodec::new(config.max_message_size),
    ))
}

#[async_trait]
impl Registry for RegistryClient {
    async fn connect(&self) -> RpcResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        let conn = open(&self.config).await?;
        info!("Connected to registry at {}", self.config.server_address);

        let (commands, rx) = mpsc::channel(256);
        let cancel = CancellationToken::new();
        let session = Session {
            config: self.config.clone(),
            shared: self.shared.clone(),
            cancel: cancel.clone(),
            commands: rx,
            pending: HashMap::new(),
            delivered: HashMap::new(),
        };
        let task = tokio::spawn(session.run(conn));

        let previous = self.session.lock().replace(SessionHandle {
            commands,
            cancel,
            task,
        });
        if let Some(old) = previous {
            old.cancel.cancel();
        }
        Ok(())
    }

    async fn publish(&self, entry: RegistryEntry) -> RpcResult<()> {
        let replay = entry.clone();
        self.expect_ack(|seq| RegistryMessage::Publish { seq, entry })
            .await?;
        // Only acknowledged entries are replayed after a reconnect.
        self.shared
            .published
            .lock()
            .insert((replay.key.clone(), replay.address.clone()), replay);
        Ok(())
    }

    async fn unpublish(&self, key: &ServiceKey, address: &str) -> RpcResult<()> {
        self.shared
            .published
            .lock()
            .remove(&(key.clone(), address.to_string()));
        self.expect_ack(|seq| RegistryMessage::Unpublish {
            seq,
            key: key.clone(),
            address: address.to_string(),
        })
        .await
    }

    async fn resolve_addresses(&self, key: &ServiceKey) -> RpcResult<Vec<String>> {
        match self
            .request(|seq| RegistryMessage::Resolve {
                seq,
                key: key.clone(),
            })
            .await?
        {
            RegistryMessage::Addresses { addresses, .. } => Ok(addresses),
            other => Err(RpcError::Protocol(format!(
                "unexpected registry answer: {:?}",
                other
            ))),
        }
    }

    async fn subscribe(
        &self,
        key: &ServiceKey,
        listener: AddressListener,
    ) -> RpcResult<SubscriptionId> {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed) + 1);
        let first_for_key = {
            let mut listeners = self.shared.listeners.lock();
            let first = !listeners.values().any(|(watched, _)| watched == key);
            listeners.insert(id, (key.clone(), listener.clone()));
            first
        };

        if first_for_key {
            // The server answers with an ack, then pushes the current set.
            let result = self
                .expect_ack(|seq| RegistryMessage::Subscribe {
                    seq,
                    key: key.clone(),
                })
                .await;
            if let Err(e) = result {
                self.shared.listeners.lock().remove(&id);
                return Err(e);
            }
        } else {
            let addresses = self.resolve_addresses(key).await?;
            listener(key, &addresses);
        }

        debug!("Subscribed to {} ({:?})", key, id);
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> RpcResult<()> {
        let last_for_key = {
            let mut listeners = self.shared.listeners.lock();
            match listeners.remove(&id) {
                Some((key, _)) => {
                    if listeners.values().any(|(watched, _)| *watched == key) {
                        None
                    } else {
                        Some(key)
                    }
                }
                None => None,
            }
        };

        match last_for_key {
            Some(key) => {
                self.expect_ack(|seq| RegistryMessage::Unsubscribe { seq, key })
                    .await
            }
            None => Ok(()),
        }
    }

    async fn destroy(&self) {
        let handle = self.session.lock().take();
        let Some(handle) = handle else {
            return;
        };

        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            warn!("Registry session task failed: {}", e);
        }
        self.shared.listeners.lock().clear();
        info!("Registry session to {} released", self.config.server_address);
    }
}

impl Drop for RegistryClient {
    fn drop(&mut self) {
        if let Some(handle) = self.session.get_mut().take() {
            handle.cancel.cancel();
        }
    }
}

/// Background task owning the registry connection.
struct Session {
    config: RegistryConfig,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    commands: mpsc::Receiver<RegistryMessage>,
    pending: HashMap<u64, Pending>,
    /// Last address set handed to listeners, per key
    delivered: HashMap<ServiceKey, Vec<String>>,
}

impl Session {
    async fn run(mut self, conn: Connection) {
        let mut conn = Some(conn);

        loop {
            if let Some(c) = conn.take() {
                match self.drive(c).await {
                    Exit::Cancelled => break,
                    Exit::Disconnected(reason) => {
                        warn!(
                            "Registry connection to {} lost: {}",
                            self.config.server_address, reason
                        );
                        self.fail_pending();
                        if !self.config.auto_reconnect {
                            break;
                        }
                    }
                }
            }

            match self.reconnect().await {
                Some(c) => conn = Some(c),
                None => break,
            }
        }

        self.fail_pending();
        debug!("Registry session ended");
    }

    /// Serve one live connection until it breaks or the session is cancelled.
    async fn drive(&mut self, mut conn: Connection) -> Exit {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    if let Err(e) = conn.send(RegistryMessage::Leave).await {
                        debug!("Failed to send leave: {}", e);
                    }
                    return Exit::Cancelled;
                }
                cmd = self.commands.recv() => {
                    let Some(msg) = cmd else {
                        // Client dropped without destroy.
                        conn.send(RegistryMessage::Leave).await.ok();
                        return Exit::Cancelled;
                    };
                    if let Err(e) = conn.send(msg).await {
                        return Exit::Disconnected(e.to_string());
                    }
                }
                frame = conn.next() => match frame {
                    Some(Ok(msg)) => self.handle_incoming(msg),
                    Some(Err(e)) => return Exit::Disconnected(e.to_string()),
                    None => return Exit::Disconnected("closed by server".into()),
                },
                _ = heartbeat.tick() => {
                    if let Err(e) = conn.send(RegistryMessage::Heartbeat).await {
                        return Exit::Disconnected(e.to_string());
                    }
                }
                _ = poll.tick() => {
                    for key in self.shared.watched_keys() {
                        let seq = self.shared.next_seq();
                        self.pending.insert(seq, Pending::Poll);
                        if let Err(e) = conn.send(RegistryMessage::Resolve { seq, key }).await {
                            return Exit::Disconnected(e.to_string());
                        }
                    }
                }
            }
        }
    }

    fn handle_incoming(&mut self, msg: RegistryMessage) {
        if let RegistryMessage::Notify { key, addresses } = msg {
            self.deliver(key, addresses, true);
            return;
        }

        let Some(seq) = msg.seq() else {
            debug!("Ignoring unexpected registry message: {:?}", msg);
            return;
        };

        if self.shared.replies.lock().contains_key(&seq) {
            let result = match msg {
                RegistryMessage::Error { code, message, .. } => Err(
                    RpcError::RegistryUnavailable(format!(
                        "registry rejected request ({}): {}",
                        code, message
                    )),
                ),
                other => Ok(other),
            };
            self.shared.reply(seq, result);
            return;
        }

        match self.pending.remove(&seq) {
            Some(Pending::Poll) => {
                if let RegistryMessage::Addresses { key, addresses, .. } = msg {
                    self.deliver(key, addresses, false);
                }
            }
            Some(Pending::Replay) => {
                if let RegistryMessage::Error { code, message, .. } = msg {
                    warn!("Registry refused replayed request ({}): {}", code, message);
                }
            }
            None => debug!("Answer for unknown or abandoned registry seq {}", seq),
        }
    }

    /// Hand an address set to the key's listeners. Polled sets are only
    /// delivered when they differ from the last delivery.
    fn deliver(&mut self, key: ServiceKey, addresses: Vec<String>, force: bool) {
        if !force && self.delivered.get(&key) == Some(&addresses) {
            return;
        }
        for listener in self.shared.listeners_for(&key) {
            listener(&key, &addresses);
        }
        self.delivered.insert(key, addresses);
    }

    fn fail_pending(&mut self) {
        self.pending.clear();
        let waiting: Vec<_> = self.shared.replies.lock().drain().collect();
        for (_, tx) in waiting {
            drop(tx.send(Err(RpcError::RegistryUnavailable(
                "registry connection lost".into(),
            ))));
        }
    }

    /// Reconnect with backoff, answering API calls with `RegistryUnavailable`
    /// meanwhile. Returns `None` when the session is cancelled.
    async fn reconnect(&mut self) -> Option<Connection> {
        let mut delay = self.config.reconnect_delay;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                cmd = self.commands.recv() => match cmd {
                    Some(msg) => {
                        if let Some(seq) = msg.seq() {
                            self.shared.reply(seq, Err(RpcError::RegistryUnavailable(
                                "reconnecting to registry".into(),
                            )));
                        }
                        continue;
                    }
                    None => return None,
                },
                _ = tokio::time::sleep(delay) => {}
            }

            match open(&self.config).await {
                Ok(mut conn) => {
                    info!("Reconnected to registry at {}", self.config.server_address);
                    match self.replay(&mut conn).await {
                        Ok(()) => return Some(conn),
                        Err(e) => warn!("Replay after reconnect failed: {}", e),
                    }
                }
                Err(e) => debug!("Registry reconnect failed: {}", e),
            }

            delay = (delay * 2).min(self.config.max_reconnect_delay);
        }
    }

    /// Re-publish entries and re-subscribe keys on a fresh connection.
    async fn replay(&mut self, conn: &mut Connection) -> RpcResult<()> {
        let entries: Vec<RegistryEntry> = self.shared.published.lock().values().cloned().collect();
        for entry in entries {
            let seq = self.shared.next_seq();
            self.pending.insert(seq, Pending::Replay);
            conn.send(RegistryMessage::Publish { seq, entry }).await?;
        }

        self.delivered.clear();
        for key in self.shared.watched_keys() {
            let seq = self.shared.next_seq();
            self.pending.insert(seq, Pending::Replay);
            conn.send(RegistryMessage::Subscribe { seq, key }).await?;
        }
        Ok(())
    }
}
