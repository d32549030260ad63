//! Fixed-window request limiting on the versioned API.

mod common;

use common::*;
use reqwest::StatusCode;
use tcane_marketplace::infra::config::RateLimitConfig;
use tcane_marketplace::infra::ledger::InMemoryLedger;

fn tight() -> RateLimitConfig {
    RateLimitConfig {
        window_secs: 60,
        max_requests: 3,
        max_keys: 100,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn requests_over_the_limit_get_429_with_retry_after() {
    let app = spawn_with(InMemoryLedger::new(), tight()).await;

    for _ in 0..3 {
        let resp = app
            .client
            .get(app.url("/catalog"))
            .header("x-forwarded-for", "10.0.0.1")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = app
        .client
        .get(app.url("/catalog"))
        .header("x-forwarded-for", "10.0.0.1, 172.16.0.1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = resp.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after));
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);

    // other clients keep their own budget
    let resp = app
        .client
        .get(app.url("/catalog"))
        .header("x-forwarded-for", "10.0.0.2")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_is_not_limited() {
    let app = spawn_with(InMemoryLedger::new(), tight()).await;
    for _ in 0..6 {
        let resp = app.client.get(app.url("/health")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn authenticated_callers_are_keyed_by_user() {
    let app = spawn_with(
        InMemoryLedger::new(),
        RateLimitConfig {
            window_secs: 60,
            max_requests: 4,
            max_keys: 100,
        },
    )
    .await;
    // one request spent on registration from the anonymous bucket
    let (token, _) = app.mill("valle").await;

    for _ in 0..4 {
        let (status, _) = app.get("/auth/me", &token).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, _) = app.get("/auth/me", &token).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // the anonymous bucket still has room
    let resp = app.client.get(app.url("/catalog")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
