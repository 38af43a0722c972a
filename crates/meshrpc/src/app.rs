// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host application glue.
//!
//! [`RpcApplication`] wires a registry, a provider and an optional consumer
//! into a worker process lifecycle: the host supplies the port, pid and
//! lifecycle hooks, then drives `start` and `stop`.

use crate::consumer::{Consumer, ConsumerConfig};
use crate::error::{RpcError, RpcResult};
use crate::metadata::MetadataBinder;
use crate::provider::{ConnectionHandoff, Provider, ProviderConfig, ServiceResolver};
use crate::registry::Registry;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{error, info};

/// Lifecycle events emitted to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// The provider is listening and its services are published.
    ServerStarted,
    /// Provider and consumer are closed; the registry session is still up.
    ServerStopping,
    /// The registry session is released.
    ServerStopped,
}

/// Callbacks into the host process.
pub trait LifecycleHooks: Send + Sync + 'static {
    fn on_event(&self, event: LifecycleEvent);

    /// Called when `listen` fails, before the error is returned from `start`.
    fn on_listen_error(&self, _error: &RpcError) {}
}

impl<F> LifecycleHooks for F
where
    F: Fn(LifecycleEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: LifecycleEvent) {
        self(event)
    }
}

/// Hooks that ignore everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl LifecycleHooks for NoopHooks {
    fn on_event(&self, _event: LifecycleEvent) {}
}

/// What the host hands to the application.
#[derive(Clone)]
pub struct HostContext {
    pub port: u16,
    pub pid: u32,
    pub hooks: Arc<dyn LifecycleHooks>,
}

impl HostContext {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            pid: std::process::id(),
            hooks: Arc::new(NoopHooks),
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_hooks(mut self, hooks: impl LifecycleHooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }
}

/// Provider and consumer configuration for an application.
#[derive(Debug, Clone, Default)]
pub struct ApplicationConfig {
    pub provider: ProviderConfig,
    /// Build a consumer alongside the provider.
    pub consumer: Option<ConsumerConfig>,
}

impl ApplicationConfig {
    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_consumer(mut self, consumer: ConsumerConfig) -> Self {
        self.consumer = Some(consumer);
        self
    }
}

/// A registry-backed RPC worker.
pub struct RpcApplication {
    context: HostContext,
    registry: Arc<dyn Registry>,
    provider: Provider,
    consumer: Option<Consumer>,
    started: AtomicBool,
}

impl RpcApplication {
    /// Build the provider (and consumer, if configured). Nothing touches the
    /// network until [`start`](Self::start).
    pub fn new(
        context: HostContext,
        config: ApplicationConfig,
        registry: Arc<dyn Registry>,
        binder: Arc<MetadataBinder>,
        resolver: Arc<dyn ServiceResolver>,
    ) -> RpcResult<Self> {
        let provider = Provider::new(config.provider, registry.clone(), binder.clone(), resolver)?
            .with_pid(context.pid);
        let consumer = match config.consumer {
            Some(consumer) => Some(Consumer::new(consumer, registry.clone(), binder)?),
            None => None,
        };

        Ok(Self {
            context,
            registry,
            provider,
            consumer,
            started: AtomicBool::new(false),
        })
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn consumer(&self) -> Option<&Consumer> {
        self.consumer.as_ref()
    }

    /// Post-process every successful result with `(parameters, result)`.
    /// Returning `None` keeps the original result.
    pub fn set_result_transform<F>(&self, transform: F) -> &Self
    where
        F: Fn(&[Value], &Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.provider.set_result_transform(Some(Arc::new(transform)));
        self
    }

    pub fn handoff(&self) -> ConnectionHandoff {
        self.provider.handoff()
    }

    /// Adopt a socket accepted by the host. Closed immediately when the
    /// provider is not listening.
    pub fn resume_connection(&self, stream: TcpStream) -> bool {
        self.provider.handoff().resume(stream)
    }

    /// Connect the registry, listen on the host port and publish.
    ///
    /// Registry and listen failures abort startup; nothing stays published.
    pub async fn start(&self) -> RpcResult<SocketAddr> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RpcError::AlreadyRunning);
        }

        if let Err(e) = self.registry.connect().await {
            error!("Registry connect failed: {}", e);
            self.started.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let addr = match self.provider.listen(self.context.port).await {
            Ok(addr) => addr,
            Err(e) => {
                error!("Listen on port {} failed: {}", self.context.port, e);
                self.context.hooks.on_listen_error(&e);
                self.registry.destroy().await;
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        info!(
            "RPC application started, pid: {} port: {}",
            self.context.pid,
            addr.port()
        );
        self.context.hooks.on_event(LifecycleEvent::ServerStarted);
        Ok(addr)
    }

    /// Drain the provider, close the consumer, release the registry. A
    /// second call is a no-op.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        self.provider.close().await;
        if let Some(consumer) = &self.consumer {
            consumer.close().await;
        }
        self.context.hooks.on_event(LifecycleEvent::ServerStopping);

        self.registry.destroy().await;
        info!("RPC application stopped");
        self.context.hooks.on_event(LifecycleEvent::ServerStopped);
    }
}
