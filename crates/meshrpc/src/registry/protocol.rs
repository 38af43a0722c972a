// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry wire protocol.
//!
//! Length-prefixed JSON, shared by [`RegistryClient`](super::RegistryClient)
//! and the `meshrpc-registry` server.
//!
//! Wire format:
//! ```text
//! +----------------+-------------------+
//! | Length (4B BE) | JSON payload      |
//! +----------------+-------------------+
//! ```
//!
//! Requests carry a `seq` that the server echoes in `ack`, `addresses` or
//! `error`. `notify` is pushed unsolicited to watchers of a key.

use super::RegistryEntry;
use crate::codec::CodecError;
use crate::metadata::ServiceKey;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Server is at its session limit.
pub const ERR_MAX_SESSIONS: u32 = 1;
/// Session is at its entry limit.
pub const ERR_MAX_ENTRIES: u32 = 2;
/// Message not valid in this direction or state.
pub const ERR_INVALID: u32 = 3;

/// Registry protocol message types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RegistryMessage {
    /// Publish (or refresh) a provider address.
    #[serde(rename = "publish")]
    Publish { seq: u64, entry: RegistryEntry },

    /// Withdraw a provider address.
    #[serde(rename = "unpublish")]
    Unpublish {
        seq: u64,
        key: ServiceKey,
        address: String,
    },

    /// Ask for the current address set of a key.
    #[serde(rename = "resolve")]
    Resolve { seq: u64, key: ServiceKey },

    /// Answer to `resolve`.
    #[serde(rename = "addresses")]
    Addresses {
        seq: u64,
        key: ServiceKey,
        addresses: Vec<String>,
    },

    /// Start watching a key.
    #[serde(rename = "subscribe")]
    Subscribe { seq: u64, key: ServiceKey },

    /// Stop watching a key.
    #[serde(rename = "unsubscribe")]
    Unsubscribe { seq: u64, key: ServiceKey },

    /// Success answer to publish/unpublish/subscribe/unsubscribe.
    #[serde(rename = "ack")]
    Ack { seq: u64 },

    /// Pushed to watchers whenever the address set of a key changes.
    #[serde(rename = "notify")]
    Notify {
        key: ServiceKey,
        addresses: Vec<String>,
    },

    /// Keep the session's lease alive.
    #[serde(rename = "heartbeat")]
    Heartbeat,

    /// Session is leaving; its entries are dropped.
    #[serde(rename = "leave")]
    Leave,

    /// Error message.
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        seq: Option<u64>,
        code: u32,
        message: String,
    },
}

impl RegistryMessage {
    /// Sequence number of a request or its answer.
    pub fn seq(&self) -> Option<u64> {
        match self {
            Self::Publish { seq, .. }
            | Self::Unpublish { seq, .. }
            | Self::Resolve { seq, .. }
            | Self::Addresses { seq, .. }
            | Self::Subscribe { seq, .. }
            | Self::Unsubscribe { seq, .. }
            | Self::Ack { seq } => Some(*seq),
            Self::Error { seq, .. } => *seq,
            Self::Notify { .. } | Self::Heartbeat | Self::Leave => None,
        }
    }
}

/// Length-prefixed JSON codec for [`RegistryMessage`].
#[derive(Debug)]
pub struct RegistryCodec {
    inner: LengthDelimitedCodec,
}

impl RegistryCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .big_endian()
                .max_frame_length(max_message_size)
                .new_codec(),
        }
    }
}

impl Decoder for RegistryCodec {
    type Item = RegistryMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RegistryMessage>, CodecError> {
        let Some(payload) = self
            .inner
            .decode(src)
            .map_err(|e| CodecError::Protocol(e.to_string()))?
        else {
            return Ok(None);
        };

        if payload.is_empty() {
            return Err(CodecError::Protocol("Empty message".into()));
        }

        serde_json::from_slice(&payload)
            .map(Some)
            .map_err(|e| CodecError::Protocol(format!("Invalid JSON: {}", e)))
    }
}

impl Encoder<RegistryMessage> for RegistryCodec {
    type Error = CodecError;

    fn encode(&mut self, msg: RegistryMessage, dst: &mut BytesMut) -> Result<(), CodecError> {
        let json = serde_json::to_vec(&msg)
            .map_err(|e| CodecError::Protocol(format!("Serialize error: {}", e)))?;
        self.inner
            .encode(Bytes::from(json), dst)
            .map_err(|e| CodecError::Protocol(e.to_string()))
    }
}
