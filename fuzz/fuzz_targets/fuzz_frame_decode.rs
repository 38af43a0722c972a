// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use meshrpc::codec::FrameCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let mut codec = FrameCodec::new(64 * 1024);

    // Whole buffer at once, draining every complete frame
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_)) = codec.decode(&mut buf) {}

    // Same bytes split in two reads
    if data.len() > 1 {
        let (head, tail) = data.split_at(data.len() / 2);
        let mut buf = BytesMut::from(head);
        if codec.decode(&mut buf).is_ok() {
            buf.extend_from_slice(tail);
            while let Ok(Some(_)) = codec.decode(&mut buf) {}
        }
    }
});
