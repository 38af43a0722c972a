// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One multiplexed connection to a provider.
//!
//! Any number of calls share the socket. Each gets a fresh request id and a
//! [`PendingCall`] slot; the reader task completes the slot whose id matches
//! an incoming response, in whatever order responses arrive.

use super::config::ConsumerConfig;
use crate::codec::{Frame, FrameCodec, RequestPacket, ResponsePacket};
use crate::error::{RpcError, RpcResult};
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

type Slot = oneshot::Sender<RpcResult<ResponsePacket>>;

/// An in-flight request waiting for its response.
struct PendingCall {
    deadline: Instant,
    slot: Slot,
}

type PendingTable = Arc<DashMap<u64, PendingCall>>;

pub(crate) struct Channel {
    address: String,
    outbound: mpsc::Sender<Frame>,
    pending: PendingTable,
    next_id: Arc<AtomicU64>,
    closed: CancellationToken,
}

impl Channel {
    /// Open a connection and start its reader and writer tasks.
    pub(crate) async fn connect(address: &str, config: &ConsumerConfig) -> RpcResult<Arc<Self>> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                RpcError::Connection(format!(
                    "connect to {} timed out after {:?}",
                    address, config.connect_timeout
                ))
            })?
            .map_err(|e| RpcError::Connection(format!("connect to {}: {}", address, e)))?;
        stream.set_nodelay(true).ok();

        let (sink, frames) = Framed::new(stream, FrameCodec::new(config.max_frame_size)).split();
        let (outbound, outbound_rx) = mpsc::channel(config.outbound_queue);
        let channel = Arc::new(Self {
            address: address.to_string(),
            outbound,
            pending: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            closed: CancellationToken::new(),
        });

        tokio::spawn(write_loop(
            sink,
            outbound_rx,
            channel.address.clone(),
            channel.pending.clone(),
            channel.next_id.clone(),
            channel.closed.clone(),
            config.heartbeat_interval,
        ));
        tokio::spawn(read_loop(
            frames,
            channel.address.clone(),
            channel.pending.clone(),
            channel.closed.clone(),
        ));

        debug!("Opened channel to {}", address);
        Ok(channel)
    }

    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send `request` and wait up to `timeout` for its response.
    ///
    /// On timeout the call's slot is released; a response arriving later is
    /// discarded.
    pub(crate) async fn call(
        &self,
        mut request: RequestPacket,
        timeout: Duration,
    ) -> RpcResult<ResponsePacket> {
        if self.is_closed() {
            return Err(RpcError::Connection(format!(
                "channel to {} is closed",
                self.address
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        request.request_id = id;
        let key = request.service_key();
        let method = request.method.clone();

        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        self.pending.insert(id, PendingCall { deadline, slot: tx });

        let result = tokio::time::timeout_at(deadline, async {
            self.outbound
                .send(Frame::Request(request))
                .await
                .map_err(|_| {
                    RpcError::Connection(format!("channel to {} is closed", self.address))
                })?;
            rx.await
                .map_err(|_| RpcError::Connection(format!("channel to {} dropped", self.address)))?
        })
        .await;

        self.pending.remove(&id);

        match result {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout {
                key,
                method,
                timeout,
            }),
        }
    }

    /// Fail every pending call with `Cancelled` and shut the connection.
    pub(crate) fn close(&self) {
        fail_all(&self.pending, || RpcError::Cancelled);
        self.closed.cancel();
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

fn fail_all(pending: &PendingTable, error: impl Fn() -> RpcError) {
    let ids: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, call)) = pending.remove(&id) {
            drop(call.slot.send(Err(error())));
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<Framed<TcpStream, FrameCodec>, Frame>,
    mut outbound: mpsc::Receiver<Frame>,
    address: String,
    pending: PendingTable,
    next_id: Arc<AtomicU64>,
    closed: CancellationToken,
    heartbeat_interval: Duration,
) {
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            next = tokio::time::timeout(heartbeat_interval, outbound.recv()) => match next {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(_) => {
                    sweep_expired(&pending);
                    let id = next_id.fetch_add(1, Ordering::Relaxed);
                    trace!("Heartbeat to {} (id={})", address, id);
                    Frame::Heartbeat { id, reply: false }
                }
            },
        };

        if let Err(e) = sink.send(frame).await {
            warn!("Write to {} failed: {}", address, e);
            break;
        }
    }

    closed.cancel();
    if let Err(e) = sink.close().await {
        debug!("Closing {}: {}", address, e);
    }
}

async fn read_loop(
    mut frames: SplitStream<Framed<TcpStream, FrameCodec>>,
    address: String,
    pending: PendingTable,
    closed: CancellationToken,
) {
    let reason = loop {
        tokio::select! {
            _ = closed.cancelled() => break "channel closed".to_string(),
            frame = frames.next() => match frame {
                Some(Ok(Frame::Response(response))) => {
                    match pending.remove(&response.request_id) {
                        Some((_, call)) => drop(call.slot.send(Ok(response))),
                        None => debug!(
                            "Late or unknown response id={} from {}",
                            response.request_id, address
                        ),
                    }
                }
                Some(Ok(Frame::Heartbeat { reply: true, .. })) => {}
                Some(Ok(other)) => {
                    break format!("unexpected frame from provider: {:?}", other);
                }
                Some(Err(e)) => break e.to_string(),
                None => break "closed by provider".to_string(),
            },
        }
    };

    debug!("Channel to {} ended: {}", address, reason);
    closed.cancel();
    fail_all(&pending, || {
        RpcError::Connection(format!("connection to {} lost: {}", address, reason))
    });
}

/// Drop slots whose caller stopped waiting without cleaning up.
fn sweep_expired(pending: &PendingTable) {
    let now = Instant::now();
    pending.retain(|_, call| call.deadline > now && !call.slot.is_closed());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ServiceKey;
    use serde_json::json;
    use tokio::net::TcpListener;

    fn request(method: &str) -> RequestPacket {
        RequestPacket::new(&ServiceKey::new("svc", "", "1.0.0"), method, vec![json!(1)])
    }

    /// Provider stub answering requests in reverse arrival order, in pairs.
    async fn reversing_provider() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, FrameCodec::default());
            let mut held = Vec::new();
            while let Some(Ok(frame)) = framed.next().await {
                if let Frame::Request(req) = frame {
                    held.push(req);
                    if held.len() == 2 {
                        for req in held.drain(..).rev() {
                            let body = json!(req.method);
                            framed
                                .send(Frame::Response(ResponsePacket::ok(req.request_id, body)))
                                .await
                                .unwrap();
                        }
                    }
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let addr = reversing_provider().await;
        let channel = Channel::connect(&addr, &ConsumerConfig::default()).await.unwrap();

        let timeout = Duration::from_secs(2);
        let (a, b) = tokio::join!(
            channel.call(request("first"), timeout),
            channel.call(request("second"), timeout)
        );
        assert_eq!(a.unwrap().body, json!("first"));
        assert_eq!(b.unwrap().body, json!("second"));
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_releases_slot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        // accept and never answer
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let channel = Channel::connect(&addr, &ConsumerConfig::default()).await.unwrap();
        let err = channel
            .call(request("stall"), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout { .. }));
        assert_eq!(channel.pending_count(), 0);
        assert!(!channel.is_closed());
    }

    #[tokio::test]
    async fn test_provider_eof_fails_pending() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, FrameCodec::default());
            // read one request, then hang up
            let _ = framed.next().await;
        });

        let channel = Channel::connect(&addr, &ConsumerConfig::default()).await.unwrap();
        let err = channel
            .call(request("doomed"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Connection(_)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_close_cancels_pending() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let channel = Channel::connect(&addr, &ConsumerConfig::default()).await.unwrap();
        let caller = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.call(request("wait"), Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        channel.close();

        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::Cancelled));
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = Channel::connect(&addr, &ConsumerConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RpcError::Connection(_)));
    }
}
