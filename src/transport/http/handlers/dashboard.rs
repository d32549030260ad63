use crate::error::AppResult;
use crate::transport::http::extract::AuthUser;
use crate::transport::http::types::{respond, ApiResponse, AppState};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;

#[utoipa::path(
    get,
    path = "/api/v1/dashboard",
    responses((status = 200, description = "Dashboard for the caller's role", body = ApiResponse)),
    security(("bearer_auth" = []))
)]
pub async fn dashboard_handler(State(state): State<AppState>, AuthUser(actor): AuthUser) -> AppResult<Response> {
    let dashboard = state.market.dashboard(&actor).await?;
    respond(StatusCode::OK, "Dashboard", &dashboard)
}

#[utoipa::path(
    get,
    path = "/api/v1/dashboard/general",
    responses(
        (status = 200, description = "Marketplace-wide aggregates", body = ApiResponse),
        (status = 403, description = "Administrators only", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn general_dashboard_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> AppResult<Response> {
    let dashboard = state.market.general_dashboard(&actor).await?;
    respond(StatusCode::OK, "General dashboard", &dashboard)
}
