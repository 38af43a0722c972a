// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service metadata: descriptors and the binder table.
//!
//! A [`ServiceDescriptor`] is built once at startup for every exported or
//! consumed interface and registered in a [`MetadataBinder`]. The binder is a
//! plain table without I/O. Once registration is done it is wrapped in an
//! `Arc` and shared read-only between the provider and the consumer, so
//! lookups need no locking.

use crate::error::{RpcError, RpcResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Composite service identity: interface name, group and version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub interface: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
}

impl ServiceKey {
    pub fn new(
        interface: impl Into<String>,
        group: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            interface: interface.into(),
            group: group.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.interface, self.version, self.group)
    }
}

/// One declared parameter. Declaration order is wire order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub type_name: String,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// A declared RPC method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: String,
    pub parameters: Vec<ParameterSpec>,
    /// Overrides the service timeout for this method.
    pub timeout: Option<Duration>,
    /// Overrides the service retry count for this method.
    pub retries: Option<u32>,
    pub description: Option<String>,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            timeout: None,
            retries: None,
            description: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.parameters.push(ParameterSpec::new(name, type_name));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Number of declared parameters.
    pub fn arity(&self) -> usize {
        self.parameters.len()
    }
}

/// Effective call attributes after method -> service -> default resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallAttributes {
    pub timeout: Duration,
    pub retries: u32,
}

/// Immutable description of one service contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    key: ServiceKey,
    description: Option<String>,
    /// Delay between `listen` and publishing the provider address.
    delay: Option<Duration>,
    timeout: Option<Duration>,
    retries: Option<u32>,
    methods: HashMap<String, MethodDescriptor>,
}

impl ServiceDescriptor {
    /// Start building a descriptor for `interface` (empty group and version).
    pub fn builder(interface: impl Into<String>) -> ServiceDescriptorBuilder {
        ServiceDescriptorBuilder {
            key: ServiceKey::new(interface, "", ""),
            description: None,
            delay: None,
            timeout: None,
            retries: None,
            methods: Vec::new(),
        }
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.get(name)
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.values()
    }

    /// Sorted method names, as published in registry metadata.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve timeout and retries for `method`, falling back to `defaults`.
    pub fn attributes(&self, method: &str, defaults: CallAttributes) -> CallAttributes {
        let m = self.methods.get(method);
        CallAttributes {
            timeout: m
                .and_then(|m| m.timeout)
                .or(self.timeout)
                .unwrap_or(defaults.timeout),
            retries: m
                .and_then(|m| m.retries)
                .or(self.retries)
                .unwrap_or(defaults.retries),
        }
    }
}

/// Fluent builder replacing the interface/group/version/method annotations.
#[derive(Debug)]
pub struct ServiceDescriptorBuilder {
    key: ServiceKey,
    description: Option<String>,
    delay: Option<Duration>,
    timeout: Option<Duration>,
    retries: Option<u32>,
    methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptorBuilder {
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.key.group = group.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.key.version = version.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    /// Validate and build. Interface and method names must be non-empty and
    /// method names unique.
    pub fn build(self) -> RpcResult<ServiceDescriptor> {
        if self.key.interface.is_empty() {
            return Err(RpcError::Config("interface name cannot be empty".into()));
        }

        let mut methods = HashMap::with_capacity(self.methods.len());
        for method in self.methods {
            if method.name.is_empty() {
                return Err(RpcError::Config(format!(
                    "empty method name on {}",
                    self.key
                )));
            }
            if methods.contains_key(&method.name) {
                return Err(RpcError::Config(format!(
                    "method {} declared twice on {}",
                    method.name, self.key
                )));
            }
            methods.insert(method.name.clone(), method);
        }

        Ok(ServiceDescriptor {
            key: self.key,
            description: self.description,
            delay: self.delay,
            timeout: self.timeout,
            retries: self.retries,
            methods,
        })
    }
}

/// Registration/lookup table of service descriptors.
#[derive(Debug, Default)]
pub struct MetadataBinder {
    services: HashMap<ServiceKey, ServiceDescriptor>,
}

impl MetadataBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Fails if its composite key already exists.
    pub fn register(&mut self, descriptor: ServiceDescriptor) -> RpcResult<()> {
        if self.services.contains_key(descriptor.key()) {
            return Err(RpcError::DuplicateService(descriptor.key().clone()));
        }
        tracing::debug!("Registered service descriptor {}", descriptor.key());
        self.services.insert(descriptor.key().clone(), descriptor);
        Ok(())
    }

    /// Look a descriptor up. Missing keys are `None`, never an error.
    pub fn lookup(&self, key: &ServiceKey) -> Option<&ServiceDescriptor> {
        self.services.get(key)
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
