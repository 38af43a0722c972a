// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire codec for provider/consumer traffic.

mod frame;
mod packet;

pub use frame::{
    CodecError, Frame, FrameCodec, Serialization, DEFAULT_MAX_FRAME_SIZE, FLAG_EVENT,
    FLAG_REQUEST, FLAG_TWO_WAY, HEADER_LEN, MAGIC,
};
pub use packet::{RequestPacket, ResponsePacket, Status, DEFAULT_DUBBO_VERSION};
