// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Calculator provider and consumer in one process.
//!
//! Uses the in-memory registry by default. Pass a registry address to talk to
//! a running `meshrpc-registry` instead:
//!
//! ```bash
//! cargo run --example calculator
//! cargo run --example calculator -- 127.0.0.1:2181
//! ```

use meshrpc::prelude::*;
use serde_json::{json, Map};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let registry: Arc<dyn Registry> = match std::env::args().nth(1) {
        Some(address) => Arc::new(RegistryClient::new(RegistryConfig::new(address))?),
        None => Arc::new(MemoryRegistry::new()),
    };

    let key = ServiceKey::new("com.acme.Calculator", "math", "1.0.0");
    let mut binder = MetadataBinder::new();
    binder.register(
        ServiceDescriptor::builder("com.acme.Calculator")
            .group("math")
            .version("1.0.0")
            .method(MethodDescriptor::new("add").param("a", "i64").param("b", "i64"))
            .method(
                MethodDescriptor::new("div")
                    .param("a", "i64")
                    .param("b", "i64")
                    .timeout(Duration::from_secs(1)),
            )
            .build()?,
    )?;

    let handlers = HandlerMap::new().with(
        key.clone(),
        MethodRouter::new()
            .sync_method("add", |p| Ok(json!(arg::<i64>(&p, 0)? + arg::<i64>(&p, 1)?)))
            .sync_method("div", |p| {
                let b: i64 = arg(&p, 1)?;
                if b == 0 {
                    return Err("division by zero".into());
                }
                Ok(json!(arg::<i64>(&p, 0)? / b))
            }),
    );

    let app = RpcApplication::new(
        HostContext::new(0).with_hooks(|event: LifecycleEvent| {
            tracing::info!("lifecycle: {:?}", event);
        }),
        ApplicationConfig::default().with_consumer(ConsumerConfig::default()),
        registry,
        Arc::new(binder),
        Arc::new(handlers),
    )?;
    let addr = app.start().await?;
    println!("provider listening on {}", addr);

    if let Some(consumer) = app.consumer() {
        let sum = consumer.invoke(&key, "add", vec![json!(19), json!(23)]).await?;
        println!("add(19, 23) = {}", sum);

        let mut args = Map::new();
        args.insert("a".into(), json!(84));
        args.insert("b".into(), json!(2));
        let quotient = consumer.invoke_named(&key, "div", args).await?;
        println!("div(a=84, b=2) = {}", quotient);

        match consumer.invoke(&key, "div", vec![json!(1), json!(0)]).await {
            Ok(v) => println!("div(1, 0) = {}", v),
            Err(e) => println!("div(1, 0) failed: {}", e),
        }
    }

    app.stop().await;
    Ok(())
}
