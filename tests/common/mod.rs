//! Spins the full router up on an ephemeral port, backed by the in-memory
//! store and ledger, and wraps reqwest with a few JSON helpers.

#![allow(dead_code)]

use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tcane_marketplace::infra::config::{AppConfig, RateLimitConfig};
use tcane_marketplace::infra::ledger::InMemoryLedger;
use tcane_marketplace::storage::MemoryStore;
use tcane_marketplace::transport::http::{create_router, AppState};
use tcane_marketplace::{Marketplace, RateLimiter};
use tokio::task::JoinHandle;

pub const SECRET: &str = "integration-secret-integration-secret";
pub const ADMIN_EMAIL: &str = "admin@tcane.co";
pub const ADMIN_PASSWORD: &str = "admin-password";
pub const PASSWORD: &str = "secreto123";

pub struct TestApp {
    pub base_url: String,
    pub client: reqwest::Client,
    pub ledger: Arc<InMemoryLedger>,
    server: JoinHandle<()>,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.server.abort();
    }
}

pub fn wallet(seed: char) -> String {
    format!("G{}", seed.to_string().repeat(55))
}

pub async fn spawn_app() -> TestApp {
    spawn_with(InMemoryLedger::new(), RateLimitConfig::default()).await
}

pub async fn spawn_with(ledger: InMemoryLedger, rate_limit: RateLimitConfig) -> TestApp {
    let config = AppConfig::in_memory(SECRET);
    let ledger = Arc::new(ledger);
    let market = Marketplace::new(
        Arc::new(MemoryStore::new()),
        ledger.clone(),
        &config.auth,
        config.market.clone(),
    );
    market.seed_admin(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();

    let state = AppState {
        market: Arc::new(market),
        limiter: Arc::new(RateLimiter::new(rate_limit)),
    };
    let router = create_router(state, &config.server.api_prefix());

    // Bind to an ephemeral port so tests can run in parallel.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp {
        base_url: format!("http://127.0.0.1:{}", port),
        client: reqwest::Client::new(),
        ledger,
        server,
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        if path == "/health" {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/api/v1{}", self.base_url, path)
        }
    }

    pub async fn call(&self, method: Method, path: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = self.client.request(method, self.url(path));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status();
        let body = resp.json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn get(&self, path: &str, token: &str) -> (StatusCode, Value) {
        self.call(Method::GET, path, Some(token), None).await
    }

    pub async fn post(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, path, Some(token), Some(body)).await
    }

    pub async fn put(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::PUT, path, Some(token), Some(body)).await
    }

    /// Registers an account and returns `(token, profile id)`.
    pub async fn register(&self, email: &str, role: &str, profile: Value) -> (String, String) {
        let (status, body) = self
            .call(
                Method::POST,
                "/auth/register",
                None,
                Some(json!({ "email": email, "password": PASSWORD, "role": role, "profile": profile })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register {}: {}", email, body);
        let token = body["data"]["token"].as_str().unwrap().to_string();
        let id = body["data"]["profile"]["details"]["id"].as_str().unwrap().to_string();
        (token, id)
    }

    pub async fn login(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": email, "password": password })),
        )
        .await
    }

    pub async fn admin_token(&self) -> String {
        let (status, body) = self.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["data"]["token"].as_str().unwrap().to_string()
    }

    pub async fn mill(&self, tag: &str) -> (String, String) {
        self.register(&format!("{}@ingenio.co", tag), "mill", mill_json(&format!("NIT-{}", tag)))
            .await
    }

    pub async fn farmer(&self, tag: &str, mill_id: &str, wallet_seed: char) -> (String, String) {
        let (token, id) = self
            .register(&format!("{}@finca.co", tag), "farmer", farmer_json(mill_id, &format!("CC-{}", tag)))
            .await;
        let (status, body) = self
            .put("/auth/wallet", &token, json!({ "wallet_address": wallet(wallet_seed) }))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        (token, id)
    }

    pub async fn company(&self, tag: &str, wallet_seed: char) -> (String, String) {
        let (token, id) = self
            .register(&format!("{}@empresa.co", tag), "company", company_json(&format!("NIT-C-{}", tag)))
            .await;
        let (status, body) = self
            .put("/auth/wallet", &token, json!({ "wallet_address": wallet(wallet_seed) }))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        (token, id)
    }

    /// Registers and validates a delivery; returns the production id.
    pub async fn validated_production(&self, mill_token: &str, farmer_id: &str, tonnage: f64) -> String {
        let (status, body) = self
            .post(
                "/productions",
                mill_token,
                json!({
                    "farmer_id": farmer_id,
                    "delivered_on": "2024-03-15",
                    "tonnage": tonnage,
                    "quality": "A",
                    "humidity": 12.0
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        let id = body["data"]["id"].as_str().unwrap().to_string();
        let (status, body) = self
            .post(&format!("/productions/{}/validate", id), mill_token, json!({}))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        id
    }

    /// Mints a validated production; returns the token id.
    pub async fn mint(&self, mill_token: &str, production_id: &str) -> String {
        let (status, body) = self
            .post(&format!("/blockchain/mint/{}", production_id), mill_token, json!({}))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["data"]["token"]["id"].as_str().unwrap().to_string()
    }
}

pub fn mill_json(tax_id: &str) -> Value {
    json!({
        "legal_name": "Ingenio del Valle S.A.",
        "tax_id": tax_id,
        "trade_name": "Ingenio del Valle",
        "location": {
            "municipality": "Palmira",
            "department": "Valle del Cauca",
            "address": "Km 4 via Candelaria"
        },
        "daily_capacity_t": 8000.0,
        "annual_capacity_t": 2000000.0
    })
}

pub fn farmer_json(mill_id: &str, national_id: &str) -> Value {
    json!({
        "mill_id": mill_id,
        "first_name": "Rosa",
        "last_name": "Quintero",
        "national_id": national_id,
        "farm_name": "La Esperanza",
        "location": { "municipality": "Palmira", "department": "Valle del Cauca" },
        "total_hectares": 12.5,
        "cane_hectares": 10.0
    })
}

pub fn company_json(tax_id: &str) -> Value {
    json!({
        "legal_name": "Textiles Andinos S.A.S.",
        "tax_id": tax_id,
        "sector": "manufacturing",
        "size": "medium",
        "location": { "country": "Colombia", "city": "Cali", "address": "Cra 1 # 2-3" }
    })
}
