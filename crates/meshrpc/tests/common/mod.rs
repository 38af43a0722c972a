// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared fixtures: a calculator service over loopback TCP with an
//! in-process registry.

#![allow(dead_code)]

use meshrpc::prelude::*;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn calculator_key() -> ServiceKey {
    ServiceKey::new("com.acme.Calculator", "math", "1.0.0")
}

/// Calculator contract. `stall` sleeps 500ms, `sleep` sleeps the given ms.
pub fn calculator_binder() -> MetadataBinder {
    let mut binder = MetadataBinder::new();
    binder
        .register(
            ServiceDescriptor::builder("com.acme.Calculator")
                .group("math")
                .version("1.0.0")
                .description("integer arithmetic")
                .method(
                    MethodDescriptor::new("add")
                        .param("a", "i64")
                        .param("b", "i64"),
                )
                .method(
                    MethodDescriptor::new("div")
                        .param("a", "i64")
                        .param("b", "i64"),
                )
                .method(
                    MethodDescriptor::new("stall")
                        .timeout(Duration::from_millis(50))
                        .retries(2),
                )
                .method(
                    MethodDescriptor::new("sleep")
                        .param("id", "u64")
                        .param("ms", "u64"),
                )
                .method(MethodDescriptor::new("ghost"))
                .build()
                .expect("valid descriptor"),
        )
        .expect("unique service");
    binder
}

/// Implementation of the calculator. `ghost` is declared but not
/// implemented. `stall` invocations are counted.
pub fn calculator_router(stalls: Arc<AtomicUsize>) -> MethodRouter {
    MethodRouter::new()
        .sync_method("add", |p| {
            Ok(json!(arg::<i64>(&p, 0)? + arg::<i64>(&p, 1)?))
        })
        .sync_method("div", |p| {
            let a: i64 = arg(&p, 0)?;
            let b: i64 = arg(&p, 1)?;
            if b == 0 {
                return Err(InvocationError::new("division by zero"));
            }
            Ok(json!(a / b))
        })
        .method("stall", move |_p| {
            let stalls = stalls.clone();
            async move {
                stalls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(Value::Null)
            }
        })
        .method("sleep", |p| async move {
            let id: u64 = arg(&p, 0)?;
            let ms: u64 = arg(&p, 1)?;
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!({ "id": id, "slept": ms }))
        })
}

pub struct Fixture {
    pub registry: Arc<MemoryRegistry>,
    pub binder: Arc<MetadataBinder>,
    pub provider: Provider,
    pub addr: SocketAddr,
    pub stalls: Arc<AtomicUsize>,
}

impl Fixture {
    /// Connect an in-memory registry, start a calculator provider on an
    /// ephemeral port and publish it.
    pub async fn start() -> Self {
        init_tracing();
        let registry = Arc::new(MemoryRegistry::new());
        registry.connect().await.expect("memory registry connects");
        Self::start_on(registry).await
    }

    /// Another provider of the same service on the same registry.
    pub async fn start_on(registry: Arc<MemoryRegistry>) -> Self {
        let binder = Arc::new(calculator_binder());
        let stalls = Arc::new(AtomicUsize::new(0));
        let handlers =
            HandlerMap::new().with(calculator_key(), calculator_router(stalls.clone()));

        let provider = Provider::new(
            ProviderConfig::default().with_drain_timeout(Duration::from_secs(2)),
            registry.clone(),
            binder.clone(),
            Arc::new(handlers),
        )
        .expect("valid provider config");
        let addr = provider.listen(0).await.expect("provider listens");

        Self {
            registry,
            binder,
            provider,
            addr,
            stalls,
        }
    }

    pub fn consumer(&self) -> Consumer {
        self.consumer_with(ConsumerConfig::default())
    }

    pub fn consumer_with(&self, config: ConsumerConfig) -> Consumer {
        Consumer::new(config, self.registry.clone(), self.binder.clone())
            .expect("valid consumer config")
    }
}
