use crate::transport::http::types::{ApiResponse, AppState};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy (store reachable)", body = ApiResponse),
        (status = 503, description = "Service is unhealthy (store unreachable)", body = ApiResponse)
    )
)]
pub async fn healthcheck_handler(State(state): State<AppState>) -> impl IntoResponse {
    let network = state.market.ledger_network().to_string();
    match state.market.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                "tCANE marketplace is running",
                serde_json::json!({ "status": "ok", "ledger": network }),
            )),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse {
                    success: false,
                    message: Some("Service unavailable".into()),
                    data: Some(serde_json::json!({ "status": "unhealthy", "ledger": network })),
                    error: Some(format!("Store ping failed: {}", e)),
                }),
            )
                .into_response()
        }
    }
}
