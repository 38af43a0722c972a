// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry server core implementation.

use crate::config::ServerConfig;
use futures::{SinkExt, StreamExt};
use meshrpc::codec::CodecError;
use meshrpc::registry::protocol::{
    RegistryCodec, RegistryMessage, ERR_INVALID, ERR_MAX_ENTRIES, ERR_MAX_SESSIONS,
};
use meshrpc::registry::{ServiceTable, SessionId};
use meshrpc::ServiceKey;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub mod watch;

pub use watch::{WatchRouter, WatchStats};

type Transport = Framed<TcpStream, RegistryCodec>;

/// What the connection loop does after a message.
enum Flow {
    Continue,
    Leave,
}

/// Registry server - address publication and change notification.
#[derive(Clone)]
pub struct RegistryServer {
    config: Arc<ServerConfig>,
    table: Arc<RwLock<ServiceTable>>,
    watch: Arc<RwLock<WatchRouter>>,
    shutdown: CancellationToken,
    running: Arc<AtomicBool>,
    next_session: Arc<AtomicU64>,
    sessions: Arc<AtomicUsize>,
}

impl RegistryServer {
    /// Create a new registry server.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        Ok(Self {
            config: Arc::new(config),
            table: Arc::new(RwLock::new(ServiceTable::new())),
            watch: Arc::new(RwLock::new(WatchRouter::new())),
            shutdown: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
            next_session: Arc::new(AtomicU64::new(1)),
            sessions: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = SocketAddr::new(self.config.bind_address, self.config.port);
        TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(format!("{}: {}", addr, e)))
    }

    /// Bind and serve until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until [`shutdown`](Self::shutdown).
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        info!("Registry server listening on {}", listener.local_addr()?);

        // Lease checker
        let server = self.clone();
        let lease_duration = self.config.lease_duration();
        let check_interval = self.config.lease_check_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let changed = server.table.write().await.remove_expired(lease_duration);
                        if !changed.is_empty() {
                            info!("Lease expired for entries under {} keys", changed.len());
                            server.notify_changed(&changed).await;
                        }
                    }
                    _ = server.shutdown.cancelled() => {
                        debug!("Lease checker shutting down");
                        break;
                    }
                }
            }
        });

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => self.admit(stream, peer_addr),
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn admit(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let active = self.sessions.fetch_add(1, Ordering::SeqCst);
        let server = self.clone();

        if active >= self.config.max_sessions {
            self.sessions.fetch_sub(1, Ordering::SeqCst);
            warn!("Max sessions reached, rejecting {}", peer_addr);
            let max_message_size = self.config.max_message_size;
            tokio::spawn(async move {
                let mut transport = Framed::new(stream, RegistryCodec::new(max_message_size));
                if let Err(e) = transport
                    .send(RegistryMessage::Error {
                        seq: None,
                        code: ERR_MAX_SESSIONS,
                        message: "Max sessions reached".into(),
                    })
                    .await
                {
                    debug!("Failed to send rejection to {}: {}", peer_addr, e);
                }
            });
            return;
        }

        let session = self.next_session.fetch_add(1, Ordering::SeqCst);
        info!("New session {} from {}", session, peer_addr);
        tokio::spawn(async move {
            if let Err(e) = server.handle_connection(stream, peer_addr, session).await {
                warn!("Session {} ({}) error: {}", session, peer_addr, e);
            }
            server.sessions.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Handle a client session.
    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        session: SessionId,
    ) -> Result<(), ServerError> {
        let mut transport = Framed::new(stream, RegistryCodec::new(self.config.max_message_size));

        // Notifications for this session are queued here by the watch router.
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<RegistryMessage>(100);
        self.watch.write().await.register(session, outbound_tx);

        let result = loop {
            tokio::select! {
                frame = transport.next() => {
                    match frame {
                        Some(Ok(msg)) => {
                            match self.process_message(&mut transport, session, msg).await {
                                Ok(Flow::Continue) => {}
                                Ok(Flow::Leave) => {
                                    info!("Session {} left", session);
                                    break Ok(());
                                }
                                Err(e) => break Err(e),
                            }
                        }
                        Some(Err(e)) => {
                            warn!("Read error from {}: {}", peer_addr, e);
                            break Ok(());
                        }
                        None => {
                            info!("Connection closed: {}", peer_addr);
                            break Ok(());
                        }
                    }
                }
                Some(msg) = outbound_rx.recv() => {
                    if let Err(e) = transport.send(msg).await {
                        warn!("Failed to send notify to {}: {}", peer_addr, e);
                        break Ok(());
                    }
                }
                _ = self.shutdown.cancelled() => {
                    debug!("Session {} shutting down", session);
                    break Ok(());
                }
            }
        };

        self.watch.write().await.unregister(session);
        let changed = self.table.write().await.remove_session(session);
        if !changed.is_empty() {
            info!(
                "Removed entries of session {} under {} keys",
                session,
                changed.len()
            );
            self.notify_changed(&changed).await;
        }

        result
    }

    /// Process a received message.
    async fn process_message(
        &self,
        transport: &mut Transport,
        session: SessionId,
        msg: RegistryMessage,
    ) -> Result<Flow, ServerError> {
        // Any traffic renews the session's lease.
        self.table.write().await.touch_session(session);

        match msg {
            RegistryMessage::Publish { seq, entry } => {
                debug!("Publish {} at {}", entry.key, entry.address);
                let key = entry.key.clone();

                let changed = {
                    let mut table = self.table.write().await;
                    let owned = table.session_entry_count(session);
                    let refresh = table
                        .entries(&key)
                        .iter()
                        .any(|e| e.address == entry.address);
                    if owned >= self.config.max_entries_per_session && !refresh {
                        drop(table);
                        warn!("Max entries reached for session {}", session);
                        transport
                            .send(RegistryMessage::Error {
                                seq: Some(seq),
                                code: ERR_MAX_ENTRIES,
                                message: "Max entries per session reached".into(),
                            })
                            .await?;
                        return Ok(Flow::Continue);
                    }
                    table.upsert(session, entry)
                };

                transport.send(RegistryMessage::Ack { seq }).await?;
                if changed {
                    self.notify_changed(&[key]).await;
                }
            }

            RegistryMessage::Unpublish { seq, key, address } => {
                debug!("Unpublish {} at {}", key, address);
                let removed = self.table.write().await.remove(&key, &address).is_some();
                transport.send(RegistryMessage::Ack { seq }).await?;
                if removed {
                    self.notify_changed(&[key]).await;
                }
            }

            RegistryMessage::Resolve { seq, key } => {
                let addresses = self.table.read().await.addresses(&key);
                transport
                    .send(RegistryMessage::Addresses {
                        seq,
                        key,
                        addresses,
                    })
                    .await?;
            }

            RegistryMessage::Subscribe { seq, key } => {
                debug!("Session {} watches {}", session, key);
                self.watch.write().await.subscribe(key.clone(), session);
                transport.send(RegistryMessage::Ack { seq }).await?;

                // Current state right after the ack.
                let addresses = self.table.read().await.addresses(&key);
                transport
                    .send(RegistryMessage::Notify { key, addresses })
                    .await?;
            }

            RegistryMessage::Unsubscribe { seq, key } => {
                self.watch.write().await.unsubscribe(&key, session);
                transport.send(RegistryMessage::Ack { seq }).await?;
            }

            RegistryMessage::Heartbeat => {}

            RegistryMessage::Leave => return Ok(Flow::Leave),

            RegistryMessage::Error { code, message, .. } => {
                warn!("Received error from client: {} - {}", code, message);
            }

            other => {
                debug!("Unexpected message from session {}: {:?}", session, other);
                transport
                    .send(RegistryMessage::Error {
                        seq: other.seq(),
                        code: ERR_INVALID,
                        message: "Unexpected message".into(),
                    })
                    .await?;
            }
        }

        Ok(Flow::Continue)
    }

    async fn notify_changed(&self, keys: &[ServiceKey]) {
        let table = self.table.read().await;
        let mut watch = self.watch.write().await;
        for key in keys {
            let addresses = table.addresses(key);
            let sent = watch.notify(key, &addresses);
            debug!("Notified {} watchers of {} ({} addresses)", sent, key, addresses.len());
        }
    }

    /// Signal the server to shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Check if server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of connected sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Number of published entries across all keys.
    pub async fn entry_count(&self) -> usize {
        self.table.read().await.entry_count()
    }

    pub async fn addresses(&self, key: &ServiceKey) -> Vec<String> {
        self.table.read().await.addresses(key)
    }

    pub async fn watch_stats(&self) -> WatchStats {
        self.watch.read().await.stats().clone()
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<CodecError> for ServerError {
    fn from(e: CodecError) -> Self {
        Self::Protocol(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshrpc::registry::RegistryEntry;
    use std::time::Duration;

    fn config() -> ServerConfig {
        ServerConfig {
            bind_address: "127.0.0.1".parse().unwrap(),
            port: 0,
            ..Default::default()
        }
    }

    async fn start(config: ServerConfig) -> (RegistryServer, SocketAddr) {
        let server = RegistryServer::new(config).unwrap();
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let runner = server.clone();
        tokio::spawn(async move { runner.serve(listener).await });
        (server, addr)
    }

    async fn client(addr: SocketAddr) -> Transport {
        let stream = TcpStream::connect(addr).await.unwrap();
        Framed::new(stream, RegistryCodec::new(1024 * 1024))
    }

    async fn recv(transport: &mut Transport) -> RegistryMessage {
        tokio::time::timeout(Duration::from_secs(2), transport.next())
            .await
            .expect("timed out waiting for message")
            .expect("connection closed")
            .unwrap()
    }

    fn key() -> ServiceKey {
        ServiceKey::new("com.acme.Calculator", "", "1.0.0")
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = RegistryServer::new(ServerConfig {
            max_sessions: 0,
            ..Default::default()
        });
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn test_publish_resolve() {
        let (server, addr) = start(config()).await;
        let mut conn = client(addr).await;

        conn.send(RegistryMessage::Publish {
            seq: 1,
            entry: RegistryEntry::new(key(), "10.0.0.1:20880", 1),
        })
        .await
        .unwrap();
        assert_eq!(recv(&mut conn).await, RegistryMessage::Ack { seq: 1 });

        conn.send(RegistryMessage::Resolve { seq: 2, key: key() })
            .await
            .unwrap();
        assert_eq!(
            recv(&mut conn).await,
            RegistryMessage::Addresses {
                seq: 2,
                key: key(),
                addresses: vec!["10.0.0.1:20880".into()],
            }
        );

        assert_eq!(server.entry_count().await, 1);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_subscribe_receives_current_then_changes() {
        let (server, addr) = start(config()).await;
        let mut watcher = client(addr).await;
        let mut publisher = client(addr).await;

        watcher
            .send(RegistryMessage::Subscribe { seq: 1, key: key() })
            .await
            .unwrap();
        assert_eq!(recv(&mut watcher).await, RegistryMessage::Ack { seq: 1 });
        assert_eq!(
            recv(&mut watcher).await,
            RegistryMessage::Notify {
                key: key(),
                addresses: vec![]
            }
        );

        publisher
            .send(RegistryMessage::Publish {
                seq: 1,
                entry: RegistryEntry::new(key(), "10.0.0.2:20880", 2),
            })
            .await
            .unwrap();
        assert_eq!(recv(&mut publisher).await, RegistryMessage::Ack { seq: 1 });
        assert_eq!(
            recv(&mut watcher).await,
            RegistryMessage::Notify {
                key: key(),
                addresses: vec!["10.0.0.2:20880".into()]
            }
        );

        // Publisher disconnect withdraws its entries.
        drop(publisher);
        assert_eq!(
            recv(&mut watcher).await,
            RegistryMessage::Notify {
                key: key(),
                addresses: vec![]
            }
        );
        server.shutdown();
    }

    #[tokio::test]
    async fn test_max_entries_per_session() {
        let (server, addr) = start(ServerConfig {
            max_entries_per_session: 1,
            ..config()
        })
        .await;
        let mut conn = client(addr).await;

        conn.send(RegistryMessage::Publish {
            seq: 1,
            entry: RegistryEntry::new(key(), "10.0.0.1:1", 1),
        })
        .await
        .unwrap();
        assert_eq!(recv(&mut conn).await, RegistryMessage::Ack { seq: 1 });

        conn.send(RegistryMessage::Publish {
            seq: 2,
            entry: RegistryEntry::new(key(), "10.0.0.1:2", 1),
        })
        .await
        .unwrap();
        match recv(&mut conn).await {
            RegistryMessage::Error { seq, code, .. } => {
                assert_eq!(seq, Some(2));
                assert_eq!(code, ERR_MAX_ENTRIES);
            }
            other => panic!("Wrong message type: {:?}", other),
        }

        // Refreshing an owned entry is still allowed.
        conn.send(RegistryMessage::Publish {
            seq: 3,
            entry: RegistryEntry::new(key(), "10.0.0.1:1", 1),
        })
        .await
        .unwrap();
        assert_eq!(recv(&mut conn).await, RegistryMessage::Ack { seq: 3 });
        server.shutdown();
    }

    #[tokio::test]
    async fn test_unexpected_message_answers_invalid() {
        let (server, addr) = start(config()).await;
        let mut conn = client(addr).await;

        conn.send(RegistryMessage::Ack { seq: 9 }).await.unwrap();
        match recv(&mut conn).await {
            RegistryMessage::Error { seq, code, .. } => {
                assert_eq!(seq, Some(9));
                assert_eq!(code, ERR_INVALID);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
        server.shutdown();
    }

    #[tokio::test]
    async fn test_max_sessions() {
        let (server, addr) = start(ServerConfig {
            max_sessions: 1,
            ..config()
        })
        .await;
        let mut first = client(addr).await;
        first
            .send(RegistryMessage::Resolve { seq: 1, key: key() })
            .await
            .unwrap();
        recv(&mut first).await;

        let mut second = client(addr).await;
        match recv(&mut second).await {
            RegistryMessage::Error { code, .. } => assert_eq!(code, ERR_MAX_SESSIONS),
            other => panic!("Wrong message type: {:?}", other),
        }
        server.shutdown();
    }

    #[tokio::test]
    async fn test_serve_twice() {
        let (server, _addr) = start(config()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        assert!(matches!(
            server.serve(listener).await,
            Err(ServerError::AlreadyRunning)
        ));
        server.shutdown();
    }
}
