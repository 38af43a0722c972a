// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Provider and consumer talking over loopback TCP.

mod common;

use common::{calculator_key, Fixture};
use meshrpc::prelude::*;
use serde_json::{json, Map, Value};

#[tokio::test]
async fn test_call_dispatches_to_handler() {
    let fixture = Fixture::start().await;
    let consumer = fixture.consumer();

    let sum = consumer
        .invoke(&calculator_key(), "add", vec![json!(2), json!(40)])
        .await
        .expect("add succeeds");
    assert_eq!(sum, json!(42));
    assert_eq!(consumer.connection_count(), 1);

    // The pooled connection is reused.
    let quotient = consumer
        .invoke(&calculator_key(), "div", vec![json!(9), json!(3)])
        .await
        .unwrap();
    assert_eq!(quotient, json!(3));
    assert_eq!(consumer.connection_count(), 1);

    consumer.close().await;
    fixture.provider.close().await;
}

#[tokio::test]
async fn test_named_arguments_follow_declared_order() {
    let fixture = Fixture::start().await;
    let consumer = fixture.consumer();

    let mut args = Map::new();
    args.insert("b".into(), json!(4));
    args.insert("a".into(), json!(20));
    let quotient = consumer
        .invoke_named(&calculator_key(), "div", args)
        .await
        .unwrap();
    assert_eq!(quotient, json!(5));

    let mut missing = Map::new();
    missing.insert("a".into(), json!(1));
    let err = consumer
        .invoke_named(&calculator_key(), "div", missing)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::InvalidArguments(_)));

    consumer.close().await;
    fixture.provider.close().await;
}

#[tokio::test]
async fn test_unknown_method_reports_service_not_found() {
    let fixture = Fixture::start().await;
    let consumer = fixture.consumer();

    let err = consumer
        .invoke(&calculator_key(), "mul", vec![json!(2), json!(3)])
        .await
        .unwrap_err();
    match err {
        RpcError::ServiceNotFound(message) => assert_eq!(
            message,
            "cannot find the method of mul on com.acme.Calculator:1.0.0@math#2.0.2"
        ),
        other => panic!("unexpected error: {other}"),
    }

    // Declared but not implemented by the instance.
    let err = consumer
        .invoke(&calculator_key(), "ghost", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::ServiceNotFound(_)));

    // The connection survives in-band failures.
    let sum = consumer
        .invoke(&calculator_key(), "add", vec![json!(1), json!(1)])
        .await
        .unwrap();
    assert_eq!(sum, json!(2));

    consumer.close().await;
    fixture.provider.close().await;
}

#[tokio::test]
async fn test_unregistered_version_reports_service_not_found() {
    let fixture = Fixture::start().await;
    let consumer = fixture.consumer();

    // Same interface, different version: nobody publishes it.
    let other = ServiceKey::new("com.acme.Calculator", "math", "2.0.0");
    let err = consumer
        .invoke(&other, "add", vec![json!(1), json!(2)])
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::NoProvider(_)));

    consumer.close().await;
    fixture.provider.close().await;
}

#[tokio::test]
async fn test_handler_failures_are_in_band() {
    let fixture = Fixture::start().await;
    let consumer = fixture.consumer();

    let err = consumer
        .invoke(&calculator_key(), "div", vec![json!(1), json!(0)])
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Invocation(ref m) if m == "division by zero"));

    let err = consumer
        .invoke(&calculator_key(), "add", vec![json!(1)])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RpcError::Remote {
            status: meshrpc::codec::Status::BadRequest,
            ..
        }
    ));

    let err = consumer
        .invoke(&calculator_key(), "add", vec![json!("x"), json!(1)])
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Invocation(_)));

    consumer.close().await;
    fixture.provider.close().await;
}

#[tokio::test]
async fn test_result_transform() {
    let fixture = Fixture::start().await;
    fixture
        .provider
        .set_result_transform(Some(Arc::new(|params: &[Value], result: &Value| {
            // Wrap add results, keep everything else.
            if params.len() == 2 && result.is_i64() {
                Some(json!({ "params": params, "result": result }))
            } else {
                None
            }
        })));
    let consumer = fixture.consumer();

    let wrapped = consumer
        .invoke(&calculator_key(), "add", vec![json!(1), json!(2)])
        .await
        .unwrap();
    assert_eq!(wrapped, json!({ "params": [1, 2], "result": 3 }));

    let raw = consumer
        .invoke(&calculator_key(), "sleep", vec![json!(7), json!(0)])
        .await
        .unwrap();
    assert_eq!(raw, json!({ "id": 7, "slept": 0 }));

    consumer.close().await;
    fixture.provider.close().await;
}

#[tokio::test]
async fn test_close_twice_is_noop() {
    let fixture = Fixture::start().await;
    let consumer = fixture.consumer();
    consumer
        .invoke(&calculator_key(), "add", vec![json!(1), json!(2)])
        .await
        .unwrap();

    consumer.close().await;
    consumer.close().await;
    assert!(consumer.is_closed());
    assert_eq!(consumer.connection_count(), 0);

    let err = consumer
        .invoke(&calculator_key(), "add", vec![json!(1), json!(2)])
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Cancelled));

    fixture.provider.close().await;
    fixture.provider.close().await;
    assert!(!fixture.provider.is_listening());
    assert!(fixture
        .registry
        .resolve_addresses(&calculator_key())
        .await
        .unwrap()
        .is_empty());
}
