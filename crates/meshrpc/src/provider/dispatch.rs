// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Turns one decoded request into exactly one response.

use super::handler::ServiceResolver;
use crate::codec::{RequestPacket, ResponsePacket, Status};
use crate::metadata::MetadataBinder;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Post-processes `(parameters, raw result)`. Returning `None` keeps the raw
/// result.
pub type ResultTransform = Arc<dyn Fn(&[Value], &Value) -> Option<Value> + Send + Sync>;

pub(crate) struct Dispatcher {
    binder: Arc<MetadataBinder>,
    resolver: Arc<dyn ServiceResolver>,
    transform: RwLock<Option<ResultTransform>>,
}

impl Dispatcher {
    pub(crate) fn new(binder: Arc<MetadataBinder>, resolver: Arc<dyn ServiceResolver>) -> Self {
        Self {
            binder,
            resolver,
            transform: RwLock::new(None),
        }
    }

    pub(crate) fn set_transform(&self, transform: Option<ResultTransform>) {
        *self.transform.write() = transform;
    }

    pub(crate) async fn dispatch(&self, request: RequestPacket) -> ResponsePacket {
        let id = request.request_id;
        let key = request.service_key();

        let handler = match self.binder.lookup(&key) {
            Some(descriptor) => match descriptor.method(&request.method) {
                Some(method) => match self.resolver.resolve(&key) {
                    Some(handler) if handler.has_method(&request.method) => {
                        if method.arity() != request.parameters.len() {
                            return ResponsePacket::error(
                                id,
                                Status::BadRequest,
                                format!(
                                    "method {} on {} expects {} parameters, got {}",
                                    request.method,
                                    key,
                                    method.arity(),
                                    request.parameters.len()
                                ),
                            );
                        }
                        handler
                    }
                    _ => return not_found(&request),
                },
                None => return not_found(&request),
            },
            None => return not_found(&request),
        };

        let transform = self.transform.read().clone();
        let params = transform.as_ref().map(|_| request.parameters.clone());

        debug!("Dispatching {}#{} (id={})", key, request.method, id);
        let invocation = handler.invoke(&request.method, request.parameters);
        let result = match AssertUnwindSafe(invocation).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                warn!("Method {}#{} panicked", key, request.method);
                return ResponsePacket::error(
                    id,
                    Status::ServiceError,
                    format!("method {} panicked", request.method),
                );
            }
        };

        match result {
            Ok(raw) => {
                let body = match (transform, params) {
                    (Some(transform), Some(params)) => transform(&params, &raw).unwrap_or(raw),
                    _ => raw,
                };
                ResponsePacket::ok(id, body)
            }
            Err(e) => {
                debug!("Method {}#{} failed: {}", key, request.method, e);
                ResponsePacket::error(id, Status::ServiceError, e.to_string())
            }
        }
    }
}

fn not_found(request: &RequestPacket) -> ResponsePacket {
    debug!(
        "No service for {}#{}",
        request.service_key(),
        request.method
    );
    ResponsePacket::error(
        request.request_id,
        Status::ServiceNotFound,
        format!(
            "cannot find the method of {} on {}:{}@{}#{}",
            request.method, request.interface, request.version, request.group, request.dubbo_version
        ),
    )
}
