// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service implementations and how the provider finds them.

use crate::metadata::ServiceKey;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Error returned by a service method. Reported to the caller in-band as a
/// `SERVICE_ERROR` response; the provider keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct InvocationError {
    message: String,
}

impl InvocationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for InvocationError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for InvocationError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for InvocationError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("invalid argument: {}", e))
    }
}

/// A live service instance exposing a set of methods.
#[async_trait]
pub trait ServiceHandler: Send + Sync + 'static {
    /// Whether this instance implements `method`.
    fn has_method(&self, method: &str) -> bool;

    /// Invoke `method` with positional parameters in declared order.
    async fn invoke(&self, method: &str, params: Vec<Value>) -> Result<Value, InvocationError>;
}

/// Deserialize the positional argument at `index`.
pub fn arg<T: DeserializeOwned>(params: &[Value], index: usize) -> Result<T, InvocationError> {
    let value = params
        .get(index)
        .ok_or_else(|| InvocationError::new(format!("missing argument {}", index)))?;
    Ok(serde_json::from_value(value.clone())?)
}

type MethodFn =
    Box<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, InvocationError>> + Send + Sync>;

/// [`ServiceHandler`] assembled from closures, one per method.
///
/// ```ignore
/// let calc = MethodRouter::new()
///     .sync_method("add", |p| Ok(json!(arg::<i64>(&p, 0)? + arg::<i64>(&p, 1)?)))
///     .method("slow", |_| async { Ok(Value::Null) });
/// ```
#[derive(Default)]
pub struct MethodRouter {
    methods: HashMap<String, MethodFn>,
}

impl MethodRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an asynchronous method.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, InvocationError>> + Send + 'static,
    {
        self.methods
            .insert(name.into(), Box::new(move |params| f(params).boxed()));
        self
    }

    /// Add a method that completes without suspending.
    pub fn sync_method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, InvocationError> + Send + Sync + 'static,
    {
        self.methods.insert(
            name.into(),
            Box::new(move |params| futures::future::ready(f(params)).boxed()),
        );
        self
    }

    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl ServiceHandler for MethodRouter {
    fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    async fn invoke(&self, method: &str, params: Vec<Value>) -> Result<Value, InvocationError> {
        match self.methods.get(method) {
            Some(f) => f(params).await,
            None => Err(InvocationError::new(format!("no method {}", method))),
        }
    }
}

/// Resolves the live instance serving a service key.
pub trait ServiceResolver: Send + Sync + 'static {
    fn resolve(&self, key: &ServiceKey) -> Option<Arc<dyn ServiceHandler>>;
}

/// A function-based resolver.
impl<F> ServiceResolver for F
where
    F: Fn(&ServiceKey) -> Option<Arc<dyn ServiceHandler>> + Send + Sync + 'static,
{
    fn resolve(&self, key: &ServiceKey) -> Option<Arc<dyn ServiceHandler>> {
        self(key)
    }
}

/// Fixed key -> instance mapping built at startup.
#[derive(Default, Clone)]
pub struct HandlerMap {
    handlers: HashMap<ServiceKey, Arc<dyn ServiceHandler>>,
}

impl HandlerMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: ServiceKey, handler: impl ServiceHandler) {
        self.handlers.insert(key, Arc::new(handler));
    }

    pub fn with(mut self, key: ServiceKey, handler: impl ServiceHandler) -> Self {
        self.insert(key, handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl ServiceResolver for HandlerMap {
    fn resolve(&self, key: &ServiceKey) -> Option<Arc<dyn ServiceHandler>> {
        self.handlers.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calculator() -> MethodRouter {
        MethodRouter::new()
            .sync_method("add", |p| {
                Ok(json!(arg::<i64>(&p, 0)? + arg::<i64>(&p, 1)?))
            })
            .method("echo", |p| async move { Ok(p.into_iter().next().unwrap_or(Value::Null)) })
    }

    #[tokio::test]
    async fn test_router_dispatch() {
        let calc = calculator();
        assert!(calc.has_method("add"));
        assert!(!calc.has_method("sub"));
        assert_eq!(calc.method_names(), vec!["add", "echo"]);

        let sum = calc.invoke("add", vec![json!(2), json!(3)]).await.unwrap();
        assert_eq!(sum, json!(5));

        let echoed = calc.invoke("echo", vec![json!("hi")]).await.unwrap();
        assert_eq!(echoed, json!("hi"));
    }

    #[tokio::test]
    async fn test_bad_argument_is_invocation_error() {
        let err = calculator()
            .invoke("add", vec![json!("x"), json!(1)])
            .await
            .unwrap_err();
        assert!(err.message().starts_with("invalid argument"));

        let err = calculator().invoke("add", vec![json!(1)]).await.unwrap_err();
        assert_eq!(err.message(), "missing argument 1");
    }

    #[test]
    fn test_handler_map_resolve() {
        let key = ServiceKey::new("com.acme.Calculator", "", "1.0.0");
        let map = HandlerMap::new().with(key.clone(), calculator());
        assert_eq!(map.len(), 1);
        assert!(map.resolve(&key).is_some());
        assert!(map
            .resolve(&ServiceKey::new("com.acme.Calculator", "", "2.0.0"))
            .is_none());
    }

    #[test]
    fn test_closure_resolver() {
        let resolver = |_key: &ServiceKey| -> Option<Arc<dyn ServiceHandler>> { None };
        let key = ServiceKey::new("svc", "", "");
        assert!(ServiceResolver::resolve(&resolver, &key).is_none());
    }
}
