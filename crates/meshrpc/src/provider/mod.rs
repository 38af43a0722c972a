// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Provider (server) engine.
//!
//! A [`Provider`] binds a TCP port, serves every registered service the
//! resolver has an instance for, and publishes its address for those
//! services to the registry.
//!
//! ```ignore
//! let provider = Provider::new(ProviderConfig::default(), registry, binder, handlers)?;
//! let addr = provider.listen(20880).await?;
//! // ...
//! provider.close().await;
//! ```

mod config;
mod connection;
mod dispatch;
mod handler;

pub use config::ProviderConfig;
pub use dispatch::ResultTransform;
pub use handler::{arg, HandlerMap, InvocationError, MethodRouter, ServiceHandler, ServiceResolver};

use crate::codec::DEFAULT_DUBBO_VERSION;
use crate::error::{RpcError, RpcResult};
use crate::metadata::MetadataBinder;
use crate::registry::{Registry, RegistryEntry};
use connection::ConnectionContext;
use dispatch::Dispatcher;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// RPC provider.
pub struct Provider {
    config: Arc<ProviderConfig>,
    registry: Arc<dyn Registry>,
    binder: Arc<MetadataBinder>,
    resolver: Arc<dyn ServiceResolver>,
    dispatcher: Arc<Dispatcher>,
    pid: u32,
    state: Mutex<State>,
    handoff: ConnectionHandoff,
}

enum State {
    Idle,
    /// `listen` is binding.
    Starting,
    Listening(Running),
}

struct Running {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    accept_task: JoinHandle<()>,
    entries: Vec<RegistryEntry>,
}

impl Provider {
    pub fn new(
        config: ProviderConfig,
        registry: Arc<dyn Registry>,
        binder: Arc<MetadataBinder>,
        resolver: Arc<dyn ServiceResolver>,
    ) -> RpcResult<Self> {
        config
            .validate()
            .map_err(|e| RpcError::Config(e.to_string()))?;

        let dispatcher = Arc::new(Dispatcher::new(binder.clone(), resolver.clone()));
        Ok(Self {
            config: Arc::new(config),
            registry,
            binder,
            resolver,
            dispatcher,
            pid: std::process::id(),
            state: Mutex::new(State::Idle),
            handoff: ConnectionHandoff::default(),
        })
    }

    /// Override the process id published with registry entries.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Install (or clear) the hook applied to every successful result.
    pub fn set_result_transform(&self, transform: Option<ResultTransform>) {
        self.dispatcher.set_transform(transform);
    }

    /// Handle for passing already-accepted sockets into this provider.
    pub fn handoff(&self) -> ConnectionHandoff {
        self.handoff.clone()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock() {
            State::Listening(running) => Some(running.local_addr),
            _ => None,
        }
    }

    pub fn is_listening(&self) -> bool {
        matches!(&*self.state.lock(), State::Listening(_))
    }

    /// Bind `port` (0 picks a free port), start accepting and publish the
    /// served services. Returns the bound address.
    pub async fn listen(&self, port: u16) -> RpcResult<SocketAddr> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, State::Idle) {
                return Err(RpcError::AlreadyRunning);
            }
            *state = State::Starting;
        }

        match self.start(port).await {
            Ok(running) => {
                let addr = running.local_addr;
                *self.state.lock() = State::Listening(running);
                Ok(addr)
            }
            Err(e) => {
                *self.state.lock() = State::Idle;
                Err(e)
            }
        }
    }

    async fn start(&self, port: u16) -> RpcResult<Running> {
        let addr = format!("{}:{}", self.config.bind_host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| RpcError::Bind(format!("{}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let ctx = Arc::new(ConnectionContext {
            dispatcher: self.dispatcher.clone(),
            tracker: tracker.clone(),
            shutdown: shutdown.clone(),
            max_frame_size: self.config.max_frame_size,
            outbound_queue: self.config.outbound_queue,
            max_connections: self.config.max_connections,
            active: AtomicUsize::new(0),
        });

        let (handoff_tx, handoff_rx) = mpsc::unbounded_channel();
        *self.handoff.slot.lock() = Some(handoff_tx);
        let accept_task = tokio::spawn(accept_loop(listener, handoff_rx, ctx));

        info!(
            "TCP server started, pid: {} port: {}",
            self.pid,
            local_addr.port()
        );

        let entries = self.entries(local_addr);
        let mut immediate = Vec::new();
        for (entry, delay) in &entries {
            match delay {
                Some(delay) => {
                    let registry = self.registry.clone();
                    let entry = entry.clone();
                    let delay = *delay;
                    let shutdown = shutdown.clone();
                    tracker.spawn(async move {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = shutdown.cancelled() => return,
                        }
                        publish(&*registry, &entry).await;
                        // close() may have withdrawn entries while the publish was in flight.
                        if shutdown.is_cancelled() {
                            unpublish(&*registry, std::slice::from_ref(&entry)).await;
                        }
                    });
                }
                None => immediate.push(entry.clone()),
            }
        }

        let mut published = Vec::with_capacity(immediate.len());
        for entry in immediate {
            if let Err(e) = self.registry.publish(entry.clone()).await {
                error!("Failed to publish {}: {}", entry.key, e);
                *self.handoff.slot.lock() = None;
                shutdown.cancel();
                if let Err(join) = accept_task.await {
                    warn!("Accept loop failed: {}", join);
                }
                unpublish(&*self.registry, &published).await;
                return Err(e);
            }
            debug!("Published {} at {}", entry.key, entry.address);
            published.push(entry);
        }

        Ok(Running {
            local_addr,
            shutdown,
            tracker,
            accept_task,
            entries: entries.into_iter().map(|(entry, _)| entry).collect(),
        })
    }

    /// Registry entries for every served service, with their publish delay.
    fn entries(&self, local_addr: SocketAddr) -> Vec<(RegistryEntry, Option<Duration>)> {
        let host = match &self.config.advertise_host {
            Some(host) => host.clone(),
            None => {
                if local_addr.ip().is_unspecified() {
                    warn!(
                        "Publishing unspecified address {}; set advertise_host",
                        local_addr.ip()
                    );
                }
                local_addr.ip().to_string()
            }
        };
        let address = format!("{}:{}", host, local_addr.port());

        let mut entries = Vec::new();
        for descriptor in self.binder.services() {
            if self.resolver.resolve(descriptor.key()).is_none() {
                warn!("No instance for {}, not publishing", descriptor.key());
                continue;
            }
            let mut entry = RegistryEntry::new(descriptor.key().clone(), address.clone(), self.pid)
                .with_metadata("methods", descriptor.method_names().join(","))
                .with_metadata("dubbo", DEFAULT_DUBBO_VERSION);
            if let Some(description) = descriptor.description() {
                entry = entry.with_metadata("description", description);
            }
            entries.push((entry, descriptor.delay()));
        }
        entries
    }

    /// Stop accepting, withdraw registry entries and wait (up to
    /// `drain_timeout`) for in-flight calls to be answered. A second call is
    /// a no-op.
    pub async fn close(&self) {
        let running = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, State::Idle) {
                State::Listening(running) => running,
                other => {
                    *state = other;
                    return;
                }
            }
        };

        *self.handoff.slot.lock() = None;
        running.shutdown.cancel();
        if let Err(e) = running.accept_task.await {
            warn!("Accept loop failed: {}", e);
        }

        unpublish(&*self.registry, &running.entries).await;

        running.tracker.close();
        if tokio::time::timeout(self.config.drain_timeout, running.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "Drain timed out after {:?} with {} tasks still running",
                self.config.drain_timeout,
                running.tracker.len()
            );
        }

        info!("TCP server on {} stopped", running.local_addr);
    }
}

async fn publish(registry: &dyn Registry, entry: &RegistryEntry) {
    match registry.publish(entry.clone()).await {
        Ok(()) => debug!("Published {} at {} (delayed)", entry.key, entry.address),
        Err(e) => error!("Failed to publish {}: {}", entry.key, e),
    }
}

/// Withdraw `entries`, carrying on past individual failures.
async fn unpublish(registry: &dyn Registry, entries: &[RegistryEntry]) {
    for entry in entries {
        if let Err(e) = registry.unpublish(&entry.key, &entry.address).await {
            warn!("Failed to unpublish {}: {}", entry.key, e);
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    mut handoff: mpsc::UnboundedReceiver<TcpStream>,
    ctx: Arc<ConnectionContext>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, peer)) => ctx.admit(stream, peer),
                Err(e) => error!("Accept error: {}", e),
            },
            Some(stream) = handoff.recv() => match stream.peer_addr() {
                Ok(peer) => ctx.admit(stream, peer),
                Err(e) => warn!("Dropping handed-off socket: {}", e),
            },
            _ = ctx.shutdown.cancelled() => {
                debug!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Passes ownership of sockets accepted elsewhere (a master process, a
/// sticky-session balancer) into a provider's connection set.
#[derive(Clone, Default)]
pub struct ConnectionHandoff {
    slot: Arc<Mutex<Option<mpsc::UnboundedSender<TcpStream>>>>,
}

impl ConnectionHandoff {
    /// Hand over `stream`. When the provider is not listening the stream is
    /// closed and `false` is returned.
    pub fn resume(&self, stream: TcpStream) -> bool {
        let tx = self.slot.lock().clone();
        match tx {
            Some(tx) => tx.send(stream).is_ok(),
            None => {
                debug!("Provider not listening, closing handed-off socket");
                false
            }
        }
    }
}
