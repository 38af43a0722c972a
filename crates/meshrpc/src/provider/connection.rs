// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Accepted consumer connection.
//!
//! The read loop spawns one dispatch task per request, so a slow method
//! never holds up other requests on the same connection. Responses funnel
//! through a bounded queue into a single writer task and may leave in any
//! order; the request id in each frame does the correlation.

use super::dispatch::Dispatcher;
use crate::codec::{Frame, FrameCodec};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Everything a connection task needs from its provider.
pub(crate) struct ConnectionContext {
    pub dispatcher: Arc<Dispatcher>,
    pub tracker: TaskTracker,
    pub shutdown: CancellationToken,
    pub max_frame_size: usize,
    pub outbound_queue: usize,
    pub max_connections: usize,
    pub active: AtomicUsize,
}

impl ConnectionContext {
    /// Start serving `stream`, or refuse it when at the connection limit.
    pub(crate) fn admit(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        if self.max_connections > 0 && active > self.max_connections {
            self.active.fetch_sub(1, Ordering::SeqCst);
            warn!(
                "Refusing connection from {}: {} connections open",
                peer, self.max_connections
            );
            return;
        }

        debug!("New connection from {}", peer);
        let ctx = self.clone();
        self.tracker.spawn(async move {
            serve(stream, peer, &ctx).await;
            ctx.active.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

async fn serve(stream: TcpStream, peer: SocketAddr, ctx: &Arc<ConnectionContext>) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay on {}: {}", peer, e);
    }
    let (mut sink, mut frames) = Framed::new(stream, FrameCodec::new(ctx.max_frame_size)).split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(ctx.outbound_queue);

    let writer = ctx.tracker.spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = sink.send(frame).await {
                warn!("Failed to write to {}: {}", peer, e);
                return;
            }
        }
        if let Err(e) = sink.close().await {
            debug!("Closing {}: {}", peer, e);
        }
    });

    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(Frame::Request(request))) => {
                    let dispatcher = ctx.dispatcher.clone();
                    let tx = outbound_tx.clone();
                    ctx.tracker.spawn(async move {
                        let response = dispatcher.dispatch(request).await;
                        if tx.send(Frame::Response(response)).await.is_err() {
                            debug!("Connection {} gone before response was written", peer);
                        }
                    });
                }
                Some(Ok(Frame::Heartbeat { id, reply: false })) => {
                    if outbound_tx.send(Frame::Heartbeat { id, reply: true }).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Frame::Heartbeat { reply: true, .. })) => {}
                Some(Ok(Frame::Response(response))) => {
                    warn!(
                        "Unexpected response (id={}) from consumer {}, closing",
                        response.request_id, peer
                    );
                    break;
                }
                Some(Err(e)) => {
                    warn!("Protocol error from {}, closing: {}", peer, e);
                    break;
                }
                None => {
                    info!("Connection closed: {}", peer);
                    break;
                }
            },
            _ = ctx.shutdown.cancelled() => {
                debug!("Connection {} draining for shutdown", peer);
                break;
            }
        }
    }

    // Writer exits once every dispatch task has dropped its sender.
    drop(outbound_tx);
    if let Err(e) = writer.await {
        warn!("Writer task for {} failed: {}", peer, e);
    }
}
