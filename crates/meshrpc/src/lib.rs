// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! meshrpc - registry-backed RPC provider/consumer runtime.
//!
//! Providers publish the services they host under a [`ServiceKey`]
//! (interface, group, version) to a registry; consumers resolve and watch
//! those keys, then call methods over multiplexed TCP connections.
//!
//! # Components
//!
//! - [`metadata`] - service descriptors and the [`MetadataBinder`] table
//! - [`codec`] - frame codec for request/response packets
//! - [`registry`] - [`Registry`] trait, TCP client and in-memory backend
//! - [`provider`] - server engine: accept, dispatch, graceful close
//! - [`consumer`] - client engine: resolve, pool, timeouts, retries
//! - [`app`] - host lifecycle glue ([`RpcApplication`])
//!
//! # Example
//!
//! ```ignore
//! use meshrpc::prelude::*;
//! use serde_json::json;
//!
//! let mut binder = MetadataBinder::new();
//! binder.register(
//!     ServiceDescriptor::builder("com.acme.Calculator")
//!         .version("1.0.0")
//!         .method(MethodDescriptor::new("add").param("a", "i64").param("b", "i64"))
//!         .build()?,
//! )?;
//! let key = ServiceKey::new("com.acme.Calculator", "", "1.0.0");
//! let handlers = HandlerMap::new().with(
//!     key.clone(),
//!     MethodRouter::new().sync_method("add", |p| {
//!         Ok(json!(arg::<i64>(&p, 0)? + arg::<i64>(&p, 1)?))
//!     }),
//! );
//!
//! let registry: Arc<dyn Registry> = Arc::new(RegistryClient::new(RegistryConfig::default())?);
//! let app = RpcApplication::new(
//!     HostContext::new(20880),
//!     ApplicationConfig::default().with_consumer(ConsumerConfig::default()),
//!     registry,
//!     Arc::new(binder),
//!     Arc::new(handlers),
//! )?;
//! app.start().await?;
//!
//! let sum = app.consumer().unwrap().invoke(&key, "add", vec![json!(1), json!(2)]).await?;
//! ```

pub mod app;
pub mod codec;
pub mod consumer;
pub mod error;
pub mod metadata;
pub mod provider;
pub mod registry;

pub use app::{ApplicationConfig, HostContext, LifecycleEvent, LifecycleHooks, RpcApplication};
pub use consumer::{Consumer, ConsumerConfig};
pub use error::{RpcError, RpcResult};
pub use metadata::{MetadataBinder, MethodDescriptor, ServiceDescriptor, ServiceKey};
pub use provider::{Provider, ProviderConfig};
pub use registry::{MemoryRegistry, Registry, RegistryClient, RegistryConfig};

/// Commonly used types.
pub mod prelude {
    pub use crate::app::{
        ApplicationConfig, HostContext, LifecycleEvent, LifecycleHooks, RpcApplication,
    };
    pub use crate::consumer::{Consumer, ConsumerConfig, SelectorKind};
    pub use crate::error::{RpcError, RpcResult};
    pub use crate::metadata::{
        MetadataBinder, MethodDescriptor, ParameterSpec, ServiceDescriptor, ServiceKey,
    };
    pub use crate::provider::{
        arg, HandlerMap, InvocationError, MethodRouter, Provider, ProviderConfig,
        ServiceHandler, ServiceResolver,
    };
    pub use crate::registry::{
        MemoryRegistry, Registry, RegistryClient, RegistryConfig, RegistryEntry,
    };
    pub use std::sync::Arc;
}
