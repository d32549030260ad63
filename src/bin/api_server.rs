// src/bin/api_server.rs

use std::sync::Arc;
use std::time::Duration;
use tcane_marketplace::infra::{config::AppConfig, telemetry};
use tcane_marketplace::transport;
use tcane_marketplace::{Marketplace, RateLimiter};
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    // --- Configuration ---
    let config = AppConfig::from_env()?;
    tracing::info!(
        bind = %config.server.bind_addr(),
        prefix = %config.server.api_prefix(),
        "configuration loaded"
    );

    // --- Service Initialization ---
    let market = Arc::new(Marketplace::from_config(&config).await?);
    if let Some((email, password)) = &config.auth.seed_admin {
        if market.seed_admin(email, password).await? {
            tracing::info!(%email, "seeded administrator account");
        }
    }

    // --- Rate limiter + background sweep of expired windows ---
    let limiter = Arc::new(RateLimiter::new(config.rate_limit));
    let sweeper = {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(limiter.window().max(Duration::from_secs(1)));
            loop {
                tick.tick().await;
                let dropped = limiter.sweep();
                if dropped > 0 {
                    tracing::debug!(dropped, remaining = limiter.tracked_keys(), "swept rate limit windows");
                }
            }
        })
    };

    let app_state = transport::http::AppState { market, limiter };

    // --- API Server Initialization ---
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let app = transport::http::create_router(app_state, &config.server.api_prefix())
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", transport::http::ApiDoc::openapi()))
        .layer(cors);
    let bind_addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("API server listening on http://{}", listener.local_addr()?);
    tracing::info!("Swagger UI available at /swagger-ui");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }
    sweeper.abort();

    Ok(())
}
