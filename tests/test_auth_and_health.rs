//! Health probe, registration and session handling over HTTP.

mod common;

use common::*;
use reqwest::{Method, StatusCode};
use serde_json::json;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_reports_the_ledger_network() {
    let app = spawn_app().await;
    let (status, body) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["ledger"], "memory");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn register_login_and_me() {
    let app = spawn_app().await;
    let (mill_token, mill_id) = app.mill("valle").await;

    let (status, body) = app.get("/auth/me", &mill_token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["role"], "mill");
    assert_eq!(body["data"]["profile"]["details"]["id"], mill_id.as_str());
    assert!(body["data"]["user"].get("password_hash").is_none());

    // duplicate email
    let (status, _) = app
        .call(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({ "email": "valle@ingenio.co", "password": PASSWORD, "role": "mill", "profile": mill_json("NIT-other") })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // administrators cannot self-register
    let (status, _) = app
        .call(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({ "email": "root@tcane.co", "password": PASSWORD, "role": "admin", "profile": {} })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.login("VALLE@ingenio.co", PASSWORD).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(body["data"]["token"].as_str().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_password_does_not_touch_last_login() {
    let app = spawn_app().await;
    let (token, _) = app.mill("valle").await;

    let (status, body) = app.login("valle@ingenio.co", "not-the-password").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (_, me) = app.get("/auth/me", &token).await;
    assert!(me["data"]["user"]["last_login_at"].is_null());

    let (status, _) = app.login("valle@ingenio.co", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    let (_, me) = app.get("/auth/me", &token).await;
    assert!(me["data"]["user"]["last_login_at"].is_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn protected_routes_need_a_valid_bearer_token() {
    let app = spawn_app().await;
    let (status, body) = app.call(Method::GET, "/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = app.get("/auth/me", "not-a-jwt").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_json_is_unprocessable() {
    let app = spawn_app().await;
    let resp = app
        .client
        .post(app.url("/auth/login"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deactivated_accounts_lose_access() {
    let app = spawn_app().await;
    let admin = app.admin_token().await;
    let (token, _) = app.mill("valle").await;
    let (_, me) = app.get("/auth/me", &token).await;
    let user_id = me["data"]["user"]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .put(&format!("/users/{}/active", user_id), &admin, json!({ "active": false }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.get("/auth/me", &token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.login("valle@ingenio.co", PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
