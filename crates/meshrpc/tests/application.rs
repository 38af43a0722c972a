// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host lifecycle glue: start/stop, result transform and socket handoff.

mod common;

use common::{calculator_binder, calculator_key, calculator_router};
use futures::{SinkExt, StreamExt};
use meshrpc::codec::{Frame, FrameCodec, RequestPacket, Status, DEFAULT_MAX_FRAME_SIZE};
use meshrpc::prelude::*;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

fn application(registry: Arc<MemoryRegistry>, events: Arc<Mutex<Vec<LifecycleEvent>>>) -> RpcApplication {
    common::init_tracing();
    let handlers = HandlerMap::new().with(
        calculator_key(),
        calculator_router(Arc::new(AtomicUsize::new(0))),
    );
    RpcApplication::new(
        HostContext::new(0)
            .with_pid(4242)
            .with_hooks(move |event: LifecycleEvent| events.lock().push(event)),
        ApplicationConfig::default().with_consumer(ConsumerConfig::default()),
        registry,
        Arc::new(calculator_binder()),
        Arc::new(handlers),
    )
    .unwrap()
}

/// A connected pair, as a master process would accept it.
async fn accepted_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap())
        .await
        .unwrap();
    let (server, _) = listener.accept().await.unwrap();
    (client, server)
}

#[tokio::test]
async fn test_start_call_stop() {
    let registry = Arc::new(MemoryRegistry::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    let app = application(registry.clone(), events.clone());

    let addr = app.start().await.unwrap();
    assert!(registry.is_connected());
    let entries = registry.resolve_addresses(&calculator_key()).await.unwrap();
    assert_eq!(entries, vec![addr.to_string()]);

    app.set_result_transform(|_params: &[Value], result: &Value| {
        result.as_i64().map(|n| json!(n * 10))
    });
    let consumer = app.consumer().unwrap();
    let value = consumer
        .invoke(&calculator_key(), "add", vec![json!(1), json!(2)])
        .await
        .unwrap();
    assert_eq!(value, json!(30));

    app.stop().await;
    assert!(!registry.is_connected());
    assert!(consumer.is_closed());
    assert_eq!(
        *events.lock(),
        vec![
            LifecycleEvent::ServerStarted,
            LifecycleEvent::ServerStopping,
            LifecycleEvent::ServerStopped,
        ]
    );
}

#[tokio::test]
async fn test_handed_off_socket_is_served() {
    let registry = Arc::new(MemoryRegistry::new());
    let app = application(registry, Arc::default());
    app.start().await.unwrap();

    let (client, server) = accepted_pair().await;
    assert!(app.resume_connection(server));

    let mut conn = Framed::new(client, FrameCodec::new(DEFAULT_MAX_FRAME_SIZE));
    let mut request = RequestPacket::new(&calculator_key(), "add", vec![json!(5), json!(6)]);
    request.request_id = 9;
    conn.send(Frame::Request(request)).await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(2), conn.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match reply {
        Frame::Response(response) => {
            assert_eq!(response.request_id, 9);
            assert_eq!(response.status, Status::Ok);
            assert_eq!(response.body, json!(11));
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    app.stop().await;
}

#[tokio::test]
async fn test_handoff_after_stop_closes_socket() {
    let registry = Arc::new(MemoryRegistry::new());
    let app = application(registry, Arc::default());
    app.start().await.unwrap();
    app.stop().await;

    let (client, server) = accepted_pair().await;
    assert!(!app.resume_connection(server));

    let mut conn = Framed::new(client, FrameCodec::new(DEFAULT_MAX_FRAME_SIZE));
    let next = tokio::time::timeout(Duration::from_secs(2), conn.next())
        .await
        .unwrap();
    assert!(next.is_none(), "socket should be closed");
}

#[tokio::test]
async fn test_heartbeat_echo() {
    let registry = Arc::new(MemoryRegistry::new());
    let app = application(registry, Arc::default());
    let addr = app.start().await.unwrap();

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut conn = Framed::new(stream, FrameCodec::new(DEFAULT_MAX_FRAME_SIZE));
    conn.send(Frame::Heartbeat { id: 3, reply: false })
        .await
        .unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(2), conn.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply, Frame::Heartbeat { id: 3, reply: true });

    app.stop().await;
}

#[tokio::test]
async fn test_garbage_closes_connection() {
    use tokio::io::AsyncWriteExt;

    let registry = Arc::new(MemoryRegistry::new());
    let app = application(registry, Arc::default());
    let addr = app.start().await.unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&[0u8; 32]).await.unwrap();
    let mut conn = Framed::new(stream, FrameCodec::new(DEFAULT_MAX_FRAME_SIZE));
    let next = tokio::time::timeout(Duration::from_secs(2), conn.next())
        .await
        .unwrap();
    // EOF, or a reset if unread bytes were still queued.
    assert!(
        !matches!(next, Some(Ok(_))),
        "desynced connection should be closed"
    );

    app.stop().await;
}
