// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame codec.
//!
//! Wire format:
//! ```text
//! +-------------+-----------+------------+-----------------+------------------+-----------+
//! | Magic (2B)  | Flags (1B)| Status (1B)| Request id (8B) | Body length (4B) | Body      |
//! | 0xdabb      |           |            | big-endian      | big-endian       | JSON      |
//! +-------------+-----------+------------+-----------------+------------------+-----------+
//! ```
//!
//! Flags: `0x80` request, `0x40` two-way, `0x20` event (heartbeat), low five
//! bits hold the body serialization id. A frame split across reads decodes
//! to `Ok(None)` until complete; anything malformed is a [`CodecError::Protocol`]
//! after which the stream cannot be trusted.

use super::packet::{RequestPacket, ResponsePacket, Status};
use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

pub const MAGIC: u16 = 0xdabb;
pub const HEADER_LEN: usize = 16;

pub const FLAG_REQUEST: u8 = 0x80;
pub const FLAG_TWO_WAY: u8 = 0x40;
pub const FLAG_EVENT: u8 = 0x20;
const SERIALIZATION_MASK: u8 = 0x1f;

/// Default upper bound for a frame body (8 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Body serialization formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Serialization {
    #[default]
    Json = 6,
}

impl Serialization {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            6 => Some(Self::Json),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }
}

/// One unit on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request(RequestPacket),
    Response(ResponsePacket),
    /// Liveness probe; `reply` is set on the echo.
    Heartbeat { id: u64, reply: bool },
}

/// Codec error types.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encoder/decoder for [`Frame`]s, usable with `tokio_util::codec::Framed`.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
    serialization: Serialization,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            serialization: Serialization::Json,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }

        let magic = u16::from_be_bytes([src[0], src[1]]);
        if magic != MAGIC {
            return Err(CodecError::Protocol(format!("Bad magic: {:#06x}", magic)));
        }

        let body_len = u32::from_be_bytes([src[12], src[13], src[14], src[15]]) as usize;
        if body_len > self.max_frame_size {
            return Err(CodecError::Protocol(format!(
                "Frame too large: {} > {}",
                body_len, self.max_frame_size
            )));
        }

        let frame_len = HEADER_LEN + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let flags = src[2];
        let status = src[3];
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&src[4..12]);
        let id = u64::from_be_bytes(id_bytes);

        src.advance(HEADER_LEN);
        let body = src.split_to(body_len);

        let serialization_id = flags & SERIALIZATION_MASK;
        if Serialization::from_id(serialization_id).is_none() {
            return Err(CodecError::Protocol(format!(
                "Unknown serialization id: {}",
                serialization_id
            )));
        }

        if flags & FLAG_EVENT != 0 {
            return Ok(Some(Frame::Heartbeat {
                id,
                reply: flags & FLAG_REQUEST == 0,
            }));
        }

        if flags & FLAG_REQUEST != 0 {
            let mut request: RequestPacket = serde_json::from_slice(&body)
                .map_err(|e| CodecError::Protocol(format!("Invalid request body: {}", e)))?;
            request.request_id = id;
            return Ok(Some(Frame::Request(request)));
        }

        let status = Status::from_u8(status)
            .ok_or_else(|| CodecError::Protocol(format!("Unknown status: {}", status)))?;
        let body = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body)
                .map_err(|e| CodecError::Protocol(format!("Invalid response body: {}", e)))?
        };

        Ok(Some(Frame::Response(ResponsePacket {
            request_id: id,
            status,
            body,
        })))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        let serialization = self.serialization.id();
        let (flags, status, id, body) = match frame {
            Frame::Request(req) => (
                FLAG_REQUEST | FLAG_TWO_WAY | serialization,
                0u8,
                req.request_id,
                serde_json::to_vec(&req),
            ),
            Frame::Response(resp) => (
                serialization,
                resp.status.as_u8(),
                resp.request_id,
                serde_json::to_vec(&resp.body),
            ),
            Frame::Heartbeat { id, reply } => {
                let flags = if reply {
                    FLAG_EVENT | serialization
                } else {
                    FLAG_REQUEST | FLAG_TWO_WAY | FLAG_EVENT | serialization
                };
                (flags, Status::Ok.as_u8(), id, Ok(Vec::new()))
            }
        };

        let body = body.map_err(|e| CodecError::Protocol(format!("Serialize error: {}", e)))?;
        if body.len() > self.max_frame_size {
            return Err(CodecError::Protocol(format!(
                "Frame too large: {} > {}",
                body.len(),
                self.max_frame_size
            )));
        }

        dst.reserve(HEADER_LEN + body.len());
        dst.put_u16(MAGIC);
        dst.put_u8(flags);
        dst.put_u8(status);
        dst.put_u64(id);
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}
