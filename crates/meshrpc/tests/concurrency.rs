// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Many concurrent calls; every response must reach its own caller.

mod common;

use common::{calculator_key, Fixture};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hundred_calls_on_distinct_connections() {
    let fixture = Fixture::start().await;

    let mut calls = Vec::new();
    for id in 0..100u64 {
        let consumer = fixture.consumer();
        let sleep_ms = fastrand::u64(0..=20);
        calls.push(tokio::spawn(async move {
            let result = consumer
                .invoke(&calculator_key(), "sleep", vec![json!(id), json!(sleep_ms)])
                .await;
            consumer.close().await;
            (id, sleep_ms, result)
        }));
    }

    for call in calls {
        let (id, sleep_ms, result) = call.await.unwrap();
        assert_eq!(
            result.expect("call succeeds"),
            json!({ "id": id, "slept": sleep_ms })
        );
    }

    fixture.provider.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multiplexed_calls_complete_out_of_order() {
    let fixture = Fixture::start().await;
    let consumer = Arc::new(fixture.consumer());

    // Longest sleeps first, so responses come back reversed.
    let mut calls = Vec::new();
    for id in 0..50u64 {
        let consumer = consumer.clone();
        let sleep_ms = 100 - id * 2;
        calls.push(tokio::spawn(async move {
            let result = consumer
                .invoke(&calculator_key(), "sleep", vec![json!(id), json!(sleep_ms)])
                .await;
            (id, sleep_ms, result)
        }));
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    for call in calls {
        let (id, sleep_ms, result) = call.await.unwrap();
        assert_eq!(result.unwrap(), json!({ "id": id, "slept": sleep_ms }));
    }
    assert_eq!(consumer.connection_count(), 1);

    consumer.close().await;
    fixture.provider.close().await;
}
