// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Address publication, withdrawal and failover through the registry.

mod common;

use common::{calculator_key, Fixture};
use meshrpc::prelude::*;
use serde_json::json;
use std::time::Duration;

async fn wait_for_addresses(registry: &MemoryRegistry, expected: usize) -> Vec<String> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let addresses = registry.resolve_addresses(&calculator_key()).await.unwrap();
        if addresses.len() == expected {
            return addresses;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {expected} addresses, have {addresses:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_published_address_resolves() {
    let fixture = Fixture::start().await;

    let addresses = wait_for_addresses(&fixture.registry, 1).await;
    assert_eq!(addresses, vec![fixture.addr.to_string()]);

    fixture.provider.close().await;
    wait_for_addresses(&fixture.registry, 0).await;
}

#[tokio::test]
async fn test_failed_provider_leaves_resolution() {
    let first = Fixture::start().await;
    let second = Fixture::start_on(first.registry.clone()).await;
    wait_for_addresses(&first.registry, 2).await;

    let changed = first.registry.fail_address(&first.addr.to_string());
    assert_eq!(changed, vec![calculator_key()]);
    assert_eq!(
        wait_for_addresses(&first.registry, 1).await,
        vec![second.addr.to_string()]
    );

    first.provider.close().await;
    second.provider.close().await;
}

#[tokio::test]
async fn test_consumer_follows_provider_departure() {
    let first = Fixture::start().await;
    let second = Fixture::start_on(first.registry.clone()).await;
    let consumer = first.consumer();

    // Round robin spreads calls over both providers.
    for i in 0..4 {
        let sum = consumer
            .invoke(&calculator_key(), "add", vec![json!(i), json!(1)])
            .await
            .unwrap();
        assert_eq!(sum, json!(i + 1));
    }
    assert_eq!(consumer.connection_count(), 2);

    // The first provider withdraws; calls keep working on the second.
    first.provider.close().await;
    for i in 0..4 {
        let sum = consumer
            .invoke(&calculator_key(), "add", vec![json!(i), json!(2)])
            .await
            .unwrap();
        assert_eq!(sum, json!(i + 2));
    }

    // Nobody left.
    second.provider.close().await;
    let err = consumer
        .invoke(&calculator_key(), "add", vec![json!(1), json!(2)])
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::NoProvider(_)));

    // A new provider shows up and is picked up again.
    let third = Fixture::start_on(first.registry.clone()).await;
    let sum = consumer
        .invoke(&calculator_key(), "add", vec![json!(20), json!(22)])
        .await
        .unwrap();
    assert_eq!(sum, json!(42));

    consumer.close().await;
    third.provider.close().await;
}

#[tokio::test]
async fn test_unreachable_registry_fails_calls() {
    let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::unreachable());
    let consumer = Consumer::new(
        ConsumerConfig::default(),
        registry,
        Arc::new(common::calculator_binder()),
    )
    .unwrap();

    let err = consumer
        .invoke(&calculator_key(), "add", vec![json!(1), json!(2)])
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::RegistryUnavailable(_)));
    consumer.close().await;
}
