// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request and response packets carried by frames.

use crate::error::{RpcError, RpcResult};
use crate::metadata::ServiceKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Protocol version tag sent with every request.
pub const DEFAULT_DUBBO_VERSION: &str = "2.0.2";

/// Response status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    Ok = 20,
    ClientTimeout = 30,
    ServerTimeout = 31,
    BadRequest = 40,
    BadResponse = 50,
    ServiceNotFound = 60,
    /// The invoked method failed.
    ServiceError = 70,
    ServerError = 80,
    ClientError = 90,
}

impl Status {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            20 => Self::Ok,
            30 => Self::ClientTimeout,
            31 => Self::ServerTimeout,
            40 => Self::BadRequest,
            50 => Self::BadResponse,
            60 => Self::ServiceNotFound,
            70 => Self::ServiceError,
            80 => Self::ServerError,
            90 => Self::ClientError,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One call. The request id travels in the frame header, the rest in the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPacket {
    #[serde(skip)]
    pub request_id: u64,
    pub dubbo_version: String,
    pub interface: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub group: String,
    pub method: String,
    #[serde(default)]
    pub parameters: Vec<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attachments: BTreeMap<String, String>,
}

impl RequestPacket {
    /// Build a request for `method` on `key`; the id is assigned by the sender.
    pub fn new(key: &ServiceKey, method: impl Into<String>, parameters: Vec<Value>) -> Self {
        Self {
            request_id: 0,
            dubbo_version: DEFAULT_DUBBO_VERSION.to_string(),
            interface: key.interface.clone(),
            version: key.version.clone(),
            group: key.group.clone(),
            method: method.into(),
            parameters,
            attachments: BTreeMap::new(),
        }
    }

    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(&self.interface, &self.group, &self.version)
    }
}

/// Outcome of one call, correlated by `request_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponsePacket {
    pub request_id: u64,
    pub status: Status,
    /// Result value on `Ok`, error message string otherwise.
    pub body: Value,
}

impl ResponsePacket {
    pub fn ok(request_id: u64, body: Value) -> Self {
        Self {
            request_id,
            status: Status::Ok,
            body,
        }
    }

    pub fn error(request_id: u64, status: Status, message: impl Into<String>) -> Self {
        Self {
            request_id,
            status,
            body: Value::String(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Convert into the call result seen by the consumer.
    pub fn into_result(self) -> RpcResult<Value> {
        if self.status == Status::Ok {
            return Ok(self.body);
        }
        let message = match self.body {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Err(RpcError::from_status(self.status, message))
    }
}
