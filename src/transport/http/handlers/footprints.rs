use crate::domain::footprint::{FootprintInput, FootprintUpdate};
use crate::error::AppResult;
use crate::transport::http::extract::AuthUser;
use crate::transport::http::types::{invalid_json, query, respond, ApiResponse, AppState, FootprintQuery};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use uuid::Uuid;

#[utoipa::path(
    post,
    path = "/api/v1/footprints",
    request_body = FootprintInput,
    responses(
        (status = 201, description = "Footprint created as draft", body = ApiResponse),
        (status = 400, description = "Invalid year, period or emissions", body = ApiResponse),
        (status = 409, description = "Footprint for this year and period exists", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_footprint_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    request: Result<Json<FootprintInput>, JsonRejection>,
) -> AppResult<Response> {
    let Json(input) = match request {
        Ok(v) => v,
        Err(e) => {
            return Ok(invalid_json(
                e,
                r#"{"year": 2024, "period": "annual", "starts_on": "2024-01-01", "ends_on": "2024-12-31", "emissions": {...}}"#,
            ))
        }
    };
    let footprint = state.market.create_footprint(&actor, input).await?;
    respond(StatusCode::CREATED, "Footprint created", &footprint)
}

#[utoipa::path(
    get,
    path = "/api/v1/footprints",
    params(FootprintQuery),
    responses((status = 200, description = "Footprints visible to the caller", body = ApiResponse)),
    security(("bearer_auth" = []))
)]
pub async fn list_footprints_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    q: Result<Query<FootprintQuery>, QueryRejection>,
) -> AppResult<Response> {
    let q = query(q)?;
    let footprints = state.market.list_footprints(&actor, q.filter()?).await?;
    respond(StatusCode::OK, "Footprints", &footprints)
}

#[utoipa::path(
    get,
    path = "/api/v1/footprints/{id}",
    params(("id" = Uuid, Path, description = "Footprint id")),
    responses(
        (status = 200, description = "Footprint", body = ApiResponse),
        (status = 404, description = "Unknown footprint", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_footprint_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let footprint = state.market.get_footprint(&actor, id).await?;
    respond(StatusCode::OK, "Footprint", &footprint)
}

#[utoipa::path(
    put,
    path = "/api/v1/footprints/{id}",
    params(("id" = Uuid, Path, description = "Footprint id")),
    request_body = FootprintUpdate,
    responses(
        (status = 200, description = "Footprint updated and recomputed", body = ApiResponse),
        (status = 400, description = "Footprint is no longer editable", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_footprint_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    request: Result<Json<FootprintUpdate>, JsonRejection>,
) -> AppResult<Response> {
    let Json(update) = match request {
        Ok(v) => v,
        Err(e) => {
            return Ok(invalid_json(
                e,
                r#"{"emissions": {...}, "activity": {...}, "compensation_pct": 100, "methodology": "..."}"#,
            ))
        }
    };
    let footprint = state.market.update_footprint(&actor, id, update).await?;
    respond(StatusCode::OK, "Footprint updated", &footprint)
}

#[utoipa::path(
    post,
    path = "/api/v1/footprints/{id}/recalculate",
    params(("id" = Uuid, Path, description = "Footprint id")),
    responses((status = 200, description = "Emissions re-derived from activity data", body = ApiResponse)),
    security(("bearer_auth" = []))
)]
pub async fn recalculate_footprint_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let footprint = state.market.recalculate_footprint(&actor, id).await?;
    respond(StatusCode::OK, "Footprint recalculated", &footprint)
}

#[utoipa::path(
    post,
    path = "/api/v1/footprints/{id}/submit",
    params(("id" = Uuid, Path, description = "Footprint id")),
    responses((status = 200, description = "Footprint sent to validation", body = ApiResponse)),
    security(("bearer_auth" = []))
)]
pub async fn submit_footprint_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let footprint = state.market.submit_footprint(&actor, id).await?;
    respond(StatusCode::OK, "Footprint submitted", &footprint)
}

#[utoipa::path(
    post,
    path = "/api/v1/footprints/{id}/verify",
    params(("id" = Uuid, Path, description = "Footprint id")),
    responses((status = 200, description = "Footprint approved (admin)", body = ApiResponse)),
    security(("bearer_auth" = []))
)]
pub async fn verify_footprint_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let footprint = state.market.verify_footprint(&actor, id).await?;
    respond(StatusCode::OK, "Footprint verified", &footprint)
}

#[utoipa::path(
    post,
    path = "/api/v1/footprints/{id}/publish",
    params(("id" = Uuid, Path, description = "Footprint id")),
    responses((status = 200, description = "Footprint published", body = ApiResponse)),
    security(("bearer_auth" = []))
)]
pub async fn publish_footprint_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let footprint = state.market.publish_footprint(&actor, id).await?;
    respond(StatusCode::OK, "Footprint published", &footprint)
}

#[utoipa::path(
    get,
    path = "/api/v1/footprints/{id}/comparison",
    params(("id" = Uuid, Path, description = "Footprint id")),
    responses(
        (status = 200, description = "Change against the previous year", body = ApiResponse),
        (status = 404, description = "No footprint for the previous year", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn compare_footprint_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let comparison = state.market.compare_footprint(&actor, id).await?;
    respond(StatusCode::OK, "Footprint comparison", &comparison)
}
