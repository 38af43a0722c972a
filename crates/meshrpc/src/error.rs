// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for meshrpc operations.

use crate::codec::{CodecError, Status};
use crate::metadata::ServiceKey;
use std::time::Duration;
use thiserror::Error;

/// Result type for RPC operations
pub type RpcResult<T> = Result<T, RpcError>;

/// Errors that can occur while running a provider, consumer or registry client.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The registry backend could not be reached.
    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// Malformed frame or protocol desync; the owning connection is closed.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Remote side reported that the service or method does not exist.
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// No response arrived before the call deadline.
    #[error("RPC timed out after {timeout:?}: {key}#{method}")]
    Timeout {
        key: ServiceKey,
        method: String,
        timeout: Duration,
    },

    /// A descriptor with the same composite key is already registered.
    #[error("Duplicate service: {0}")]
    DuplicateService(ServiceKey),

    /// The remote method failed; carries the provider's message.
    #[error("Invocation error: {0}")]
    Invocation(String),

    /// Call arguments do not match the method's declared parameters.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Any other non-OK response status.
    #[error("Remote error {status:?}: {message}")]
    Remote { status: Status, message: String },

    /// The registry currently lists no provider for the key.
    #[error("No provider available for {0}")]
    NoProvider(ServiceKey),

    /// The call was cancelled because the consumer was closed.
    #[error("RPC call cancelled")]
    Cancelled,

    /// Connecting to or talking with a peer failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The provider could not bind its listening socket.
    #[error("Bind error: {0}")]
    Bind(String),

    /// `listen` was called on a provider that is already listening.
    #[error("Provider already running")]
    AlreadyRunning,

    /// Invalid configuration or descriptor.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    /// Map a non-OK response status and its message to an error.
    pub fn from_status(status: Status, message: String) -> Self {
        match status {
            Status::ServiceNotFound => Self::ServiceNotFound(message),
            Status::ServiceError => Self::Invocation(message),
            _ => Self::Remote { status, message },
        }
    }

    /// Whether a fresh attempt against another address may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Connection(_))
    }
}

impl From<CodecError> for RpcError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Protocol(msg) => Self::Protocol(msg),
            CodecError::Io(e) => Self::Io(e),
        }
    }
}
