//! Scenario: Accrual Client Over Real HTTP
//!
//! # Invariant under test
//! One `fetch` call is one bounded conversation with the authority:
//! - 200 decodes, and REGISTERED is normalized to NEW before returning.
//! - 204 is a final NotFound; no retry will invent the order.
//! - 429 and 5xx are retried with backoff until the attempt budget runs out.
//! - Anything else (bad body, off-protocol status) is final on first sight.
//!
//! Runs against an in-process mock server; no real network.

use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;

use mart_accrual::{AccrualClient, AccrualError, AccrualSettings, HttpAccrualClient};
use mart_money::Money;
use mart_schemas::OrderStatus;

const NUMBER: &str = "12345678903";

/// Tight schedule so the retry tests finish quickly.
fn fast_settings() -> AccrualSettings {
    AccrualSettings {
        request_timeout: Duration::from_millis(500),
        retry_base_delay: Duration::from_millis(10),
        max_attempts: 3,
    }
}

// ---------------------------------------------------------------------------
// Decoding and normalization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn processed_reply_decodes_amount_and_hits_once() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/api/orders/{NUMBER}"));
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"order": NUMBER, "status": "PROCESSED", "accrual": 729.98}));
        })
        .await;

    let client = HttpAccrualClient::with_settings(server.base_url(), fast_settings());
    let reply = client.fetch(NUMBER).await?;

    assert_eq!(reply.number, NUMBER);
    assert_eq!(reply.status, OrderStatus::Processed);
    assert_eq!(reply.accrual, Some(Money::from_minor(729_98)));
    mock.assert_async().await;

    Ok(())
}

#[tokio::test]
async fn registered_reply_is_normalized_to_new() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/api/orders/{NUMBER}"));
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"order": NUMBER, "status": "REGISTERED"}));
        })
        .await;

    let client = HttpAccrualClient::with_settings(server.base_url(), fast_settings());
    let reply = client.fetch(NUMBER).await?;

    assert_eq!(
        reply.status,
        OrderStatus::New,
        "REGISTERED must never escape the client boundary"
    );
    assert_eq!(reply.accrual, None, "an unfinished order carries no amount");

    Ok(())
}

// ---------------------------------------------------------------------------
// Final answers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn no_content_is_a_final_not_found() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/api/orders/{NUMBER}"));
            then.status(204);
        })
        .await;

    let client = HttpAccrualClient::with_settings(server.base_url(), fast_settings());
    let err = client.fetch(NUMBER).await.unwrap_err();

    match err {
        AccrualError::NotFound(number) => assert_eq!(number, NUMBER),
        other => panic!("expected NotFound, got {other:?}"),
    }
    mock.assert_hits_async(1).await;

    Ok(())
}

#[tokio::test]
async fn undecodable_success_body_is_final() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/api/orders/{NUMBER}"));
            then.status(200)
                .header("content-type", "application/json")
                .body("not a reply");
        })
        .await;

    let client = HttpAccrualClient::with_settings(server.base_url(), fast_settings());
    let err = client.fetch(NUMBER).await.unwrap_err();

    match err {
        AccrualError::Decode { number, .. } => assert_eq!(number, NUMBER),
        other => panic!("expected Decode, got {other:?}"),
    }
    mock.assert_hits_async(1).await;

    Ok(())
}

#[tokio::test]
async fn off_protocol_status_is_final() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/api/orders/{NUMBER}"));
            then.status(410);
        })
        .await;

    let client = HttpAccrualClient::with_settings(server.base_url(), fast_settings());
    let err = client.fetch(NUMBER).await.unwrap_err();

    match err {
        AccrualError::Unexpected { status } => assert_eq!(status, 410),
        other => panic!("expected Unexpected, got {other:?}"),
    }
    mock.assert_hits_async(1).await;

    Ok(())
}

// ---------------------------------------------------------------------------
// Retry budget
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rate_limiting_consumes_the_whole_attempt_budget() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/api/orders/{NUMBER}"));
            then.status(429);
        })
        .await;

    let client = HttpAccrualClient::with_settings(server.base_url(), fast_settings());
    let err = client.fetch(NUMBER).await.unwrap_err();

    match err {
        AccrualError::NoAnswer { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(last.contains("429"), "last reason must name the status: {last}");
        }
        other => panic!("expected NoAnswer, got {other:?}"),
    }
    mock.assert_hits_async(3).await;

    Ok(())
}

#[tokio::test]
async fn server_errors_are_retried_like_rate_limits() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/api/orders/{NUMBER}"));
            then.status(503);
        })
        .await;

    let client = HttpAccrualClient::with_settings(server.base_url(), fast_settings());
    let err = client.fetch(NUMBER).await.unwrap_err();

    match err {
        AccrualError::NoAnswer { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected NoAnswer, got {other:?}"),
    }
    mock.assert_hits_async(3).await;

    Ok(())
}

#[tokio::test]
async fn transient_rate_limit_recovers_within_one_call() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let throttled = server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/api/orders/{NUMBER}"));
            then.status(429);
        })
        .await;

    // A wide backoff leaves room to swap the authority's answer between
    // attempt one and attempt two.
    let settings = AccrualSettings {
        request_timeout: Duration::from_millis(500),
        retry_base_delay: Duration::from_millis(300),
        max_attempts: 3,
    };
    let client = HttpAccrualClient::with_settings(server.base_url(), settings);

    let number = NUMBER.to_string();
    let call = tokio::spawn(async move { client.fetch(&number).await });

    // Wait for the first attempt to land on the throttle.
    let mut throttled_hits = 0;
    for _ in 0..200 {
        throttled_hits = throttled.hits_async().await;
        if throttled_hits >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(throttled_hits >= 1, "first attempt must hit the throttle");

    // The authority recovers before the retry fires.
    let healthy = server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/api/orders/{NUMBER}"));
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"order": NUMBER, "status": "PROCESSING"}));
        })
        .await;
    throttled.delete_async().await;

    let reply = call.await??;
    assert_eq!(reply.status, OrderStatus::Processing);
    assert!(
        healthy.hits_async().await >= 1,
        "the retry must reach the recovered authority"
    );

    Ok(())
}
