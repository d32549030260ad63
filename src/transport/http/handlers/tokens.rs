use crate::error::AppResult;
use crate::transport::http::extract::AuthUser;
use crate::transport::http::types::{invalid_json, query, respond, ApiResponse, AppState, PriceRequest, TokenQuery};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use uuid::Uuid;

#[utoipa::path(
    get,
    path = "/api/v1/tokens",
    params(TokenQuery),
    responses((status = 200, description = "Paged tokens visible to the caller", body = ApiResponse)),
    security(("bearer_auth" = []))
)]
pub async fn list_tokens_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    q: Result<Query<TokenQuery>, QueryRejection>,
) -> AppResult<Response> {
    let q = query(q)?;
    let page = state.market.list_tokens(&actor, q.filter()?, q.page()).await?;
    respond(StatusCode::OK, "Tokens", &page)
}

#[utoipa::path(
    get,
    path = "/api/v1/tokens/stats",
    responses((status = 200, description = "Token aggregates for the caller", body = ApiResponse)),
    security(("bearer_auth" = []))
)]
pub async fn token_stats_handler(State(state): State<AppState>, AuthUser(actor): AuthUser) -> AppResult<Response> {
    let stats = state.market.token_stats(&actor).await?;
    respond(StatusCode::OK, "Token statistics", &stats)
}

#[utoipa::path(
    get,
    path = "/api/v1/tokens/{id}",
    params(("id" = Uuid, Path, description = "Token id")),
    responses(
        (status = 200, description = "Token", body = ApiResponse),
        (status = 404, description = "Unknown token", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_token_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let token = state.market.get_token(&actor, id).await?;
    respond(StatusCode::OK, "Token", &token)
}

#[utoipa::path(
    put,
    path = "/api/v1/tokens/{id}/price",
    params(("id" = Uuid, Path, description = "Token id")),
    request_body = PriceRequest,
    responses(
        (status = 200, description = "Token repriced (admin)", body = ApiResponse),
        (status = 400, description = "Invalid price or token not listed", body = ApiResponse),
        (status = 409, description = "Token busy with another operation", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_price_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    request: Result<Json<PriceRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(request) = match request {
        Ok(v) => v,
        Err(e) => return Ok(invalid_json(e, r#"{"price_cents": 1200}"#)),
    };
    let token = state.market.update_token_price(&actor, id, request.price_cents).await?;
    respond(StatusCode::OK, "Token price updated", &token)
}

#[utoipa::path(
    post,
    path = "/api/v1/tokens/{id}/retire",
    params(("id" = Uuid, Path, description = "Token id")),
    responses(
        (status = 200, description = "Token burned and retired", body = ApiResponse),
        (status = 400, description = "Token is not sold", body = ApiResponse),
        (status = 403, description = "Token belongs to another company", body = ApiResponse),
        (status = 409, description = "Token busy with another operation", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn retire_token_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let outcome = state.market.retire_token(&actor, id).await?;
    respond(StatusCode::OK, "Token retired", &outcome)
}
