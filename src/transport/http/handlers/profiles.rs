//! Profiles of the caller and directory listings, plus user administration.

use crate::error::AppResult;
use crate::transport::http::extract::AuthUser;
use crate::transport::http::types::{invalid_json, query, respond, ActiveRequest, ApiResponse, AppState, UserQuery};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[utoipa::path(
    get,
    path = "/api/v1/profile",
    responses((status = 200, description = "The caller's role profile", body = ApiResponse)),
    security(("bearer_auth" = []))
)]
pub async fn get_profile_handler(AuthUser(actor): AuthUser) -> AppResult<Response> {
    respond(StatusCode::OK, "Profile", &actor.profile)
}

#[utoipa::path(
    put,
    path = "/api/v1/profile",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Profile updated", body = ApiResponse),
        (status = 400, description = "Invalid profile update", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_profile_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    request: Result<Json<JsonValue>, JsonRejection>,
) -> AppResult<Response> {
    let Json(update) = match request {
        Ok(v) => v,
        Err(e) => return Ok(invalid_json(e, "a JSON object with profile fields")),
    };
    let profile = state.market.update_profile(&actor, update).await?;
    respond(StatusCode::OK, "Profile updated", &profile)
}

#[utoipa::path(
    get,
    path = "/api/v1/mills",
    responses((status = 200, description = "Active mills", body = ApiResponse))
)]
pub async fn list_mills_handler(State(state): State<AppState>) -> AppResult<Response> {
    let mills = state.market.list_mills().await?;
    respond(StatusCode::OK, "Mills", &mills)
}

#[utoipa::path(
    get,
    path = "/api/v1/farmers",
    responses(
        (status = 200, description = "Farmers visible to the caller", body = ApiResponse),
        (status = 403, description = "Only mills and administrators", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_farmers_handler(State(state): State<AppState>, AuthUser(actor): AuthUser) -> AppResult<Response> {
    let farmers = state.market.list_farmers(&actor).await?;
    respond(StatusCode::OK, "Farmers", &farmers)
}

#[utoipa::path(
    get,
    path = "/api/v1/farmers/{id}",
    params(("id" = Uuid, Path, description = "Farmer profile id")),
    responses(
        (status = 200, description = "Farmer", body = ApiResponse),
        (status = 403, description = "Farmer of another mill", body = ApiResponse),
        (status = 404, description = "Unknown farmer", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_farmer_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let farmer = state.market.get_farmer(&actor, id).await?;
    respond(StatusCode::OK, "Farmer", &farmer)
}

#[utoipa::path(
    get,
    path = "/api/v1/companies",
    responses((status = 200, description = "All companies (admin)", body = ApiResponse)),
    security(("bearer_auth" = []))
)]
pub async fn list_companies_handler(State(state): State<AppState>, AuthUser(actor): AuthUser) -> AppResult<Response> {
    let companies = state.market.list_companies(&actor).await?;
    respond(StatusCode::OK, "Companies", &companies)
}

#[utoipa::path(
    get,
    path = "/api/v1/users",
    params(UserQuery),
    responses((status = 200, description = "Paged users (admin)", body = ApiResponse)),
    security(("bearer_auth" = []))
)]
pub async fn list_users_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    q: Result<Query<UserQuery>, QueryRejection>,
) -> AppResult<Response> {
    let q = query(q)?;
    let users = state.market.list_users(&actor, q.role()?, q.page()).await?;
    respond(StatusCode::OK, "Users", &users)
}

#[utoipa::path(
    get,
    path = "/api/v1/users/stats",
    responses((status = 200, description = "User counts (admin)", body = ApiResponse)),
    security(("bearer_auth" = []))
)]
pub async fn user_stats_handler(State(state): State<AppState>, AuthUser(actor): AuthUser) -> AppResult<Response> {
    let stats = state.market.user_stats(&actor).await?;
    respond(StatusCode::OK, "User statistics", &stats)
}

#[utoipa::path(
    put,
    path = "/api/v1/users/{id}/active",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = ActiveRequest,
    responses(
        (status = 200, description = "Activation changed (admin)", body = ApiResponse),
        (status = 404, description = "Unknown user", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn set_active_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    request: Result<Json<ActiveRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(request) = match request {
        Ok(v) => v,
        Err(e) => return Ok(invalid_json(e, r#"{"active": true}"#)),
    };
    let user = state.market.set_user_active(&actor, id, request.active).await?;
    respond(StatusCode::OK, "User updated", &user)
}

#[utoipa::path(
    put,
    path = "/api/v1/users/{id}/verify-email",
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 200, description = "Email marked verified (admin)", body = ApiResponse)),
    security(("bearer_auth" = []))
)]
pub async fn verify_email_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let user = state.market.verify_email(&actor, id).await?;
    respond(StatusCode::OK, "Email verified", &user)
}
