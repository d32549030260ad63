use crate::domain::production::ProductionInput;
use crate::error::AppResult;
use crate::transport::http::extract::AuthUser;
use crate::transport::http::types::{invalid_json, query, respond, ApiResponse, AppState, ProductionQuery, RejectRequest};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use uuid::Uuid;

#[utoipa::path(
    post,
    path = "/api/v1/productions",
    request_body = ProductionInput,
    responses(
        (status = 201, description = "Production registered", body = ApiResponse),
        (status = 400, description = "Outside the mill's reporting limits", body = ApiResponse),
        (status = 403, description = "Caller is not the farmer's mill", body = ApiResponse),
        (status = 404, description = "Unknown farmer", body = ApiResponse),
        (status = 422, description = "Unprocessable entity (invalid JSON body)", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn register_production_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    request: Result<Json<ProductionInput>, JsonRejection>,
) -> AppResult<Response> {
    let Json(input) = match request {
        Ok(v) => v,
        Err(e) => {
            return Ok(invalid_json(
                e,
                r#"{"farmer_id": "...", "delivered_on": "YYYY-MM-DD", "tonnage": 10.5, "humidity": 12.0}"#,
            ))
        }
    };
    let production = state.market.register_production(&actor, input).await?;
    respond(StatusCode::CREATED, "Production registered", &production)
}

#[utoipa::path(
    get,
    path = "/api/v1/productions",
    params(ProductionQuery),
    responses(
        (status = 200, description = "Paged productions visible to the caller", body = ApiResponse),
        (status = 403, description = "Companies have no access", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_productions_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    q: Result<Query<ProductionQuery>, QueryRejection>,
) -> AppResult<Response> {
    let q = query(q)?;
    let page = state.market.list_productions(&actor, q.filter()?, q.page()).await?;
    respond(StatusCode::OK, "Productions", &page)
}

#[utoipa::path(
    get,
    path = "/api/v1/productions/stats",
    params(ProductionQuery),
    responses((status = 200, description = "Aggregates over the caller's productions", body = ApiResponse)),
    security(("bearer_auth" = []))
)]
pub async fn production_stats_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    q: Result<Query<ProductionQuery>, QueryRejection>,
) -> AppResult<Response> {
    let q = query(q)?;
    let stats = state.market.production_stats(&actor, q.filter()?).await?;
    respond(StatusCode::OK, "Production statistics", &stats)
}

#[utoipa::path(
    get,
    path = "/api/v1/productions/{id}",
    params(("id" = Uuid, Path, description = "Production id")),
    responses(
        (status = 200, description = "Production", body = ApiResponse),
        (status = 404, description = "Unknown production", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_production_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let production = state.market.get_production(&actor, id).await?;
    respond(StatusCode::OK, "Production", &production)
}

#[utoipa::path(
    post,
    path = "/api/v1/productions/{id}/validate",
    params(("id" = Uuid, Path, description = "Production id")),
    responses(
        (status = 200, description = "Production validated", body = ApiResponse),
        (status = 400, description = "Production is not in registered", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn validate_production_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let production = state.market.validate_production(&actor, id).await?;
    respond(StatusCode::OK, "Production validated", &production)
}

#[utoipa::path(
    post,
    path = "/api/v1/productions/{id}/reject",
    params(("id" = Uuid, Path, description = "Production id")),
    request_body = RejectRequest,
    responses(
        (status = 200, description = "Production rejected", body = ApiResponse),
        (status = 409, description = "Tokens are being minted", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn reject_production_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    request: Result<Json<RejectRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(request) = match request {
        Ok(v) => v,
        Err(e) => return Ok(invalid_json(e, r#"{"reason": "..."}"#)),
    };
    let production = state.market.reject_production(&actor, id, &request.reason).await?;
    respond(StatusCode::OK, "Production rejected", &production)
}
