use crate::app::auth::Registration;
use crate::error::AppResult;
use crate::transport::http::extract::AuthUser;
use crate::transport::http::types::{
    invalid_json, respond, ApiResponse, AppState, ChangePasswordRequest, LoginRequest, RegisterRequest,
    WalletRequest,
};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde_json::json;

#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created, session issued", body = ApiResponse),
        (status = 400, description = "Invalid registration data", body = ApiResponse),
        (status = 403, description = "Administrator accounts cannot self-register", body = ApiResponse),
        (status = 409, description = "Email already registered", body = ApiResponse),
        (status = 422, description = "Unprocessable entity (invalid JSON body)", body = ApiResponse)
    )
)]
pub async fn register_handler(
    State(state): State<AppState>,
    request: Result<Json<RegisterRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(request) = match request {
        Ok(v) => v,
        Err(e) => {
            return Ok(invalid_json(
                e,
                r#"{"email": "...", "password": "...", "role": "farmer|mill|company", "profile": {...}}"#,
            ))
        }
    };
    let session = state
        .market
        .register(Registration {
            email: request.email,
            password: request.password,
            role: request.role,
            profile: request.profile,
        })
        .await?;
    respond(StatusCode::CREATED, "Account registered", &session)
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session issued", body = ApiResponse),
        (status = 401, description = "Bad credentials or deactivated account", body = ApiResponse),
        (status = 422, description = "Unprocessable entity (invalid JSON body)", body = ApiResponse)
    )
)]
pub async fn login_handler(
    State(state): State<AppState>,
    request: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(request) = match request {
        Ok(v) => v,
        Err(e) => return Ok(invalid_json(e, r#"{"email": "...", "password": "..."}"#)),
    };
    let session = state.market.login(&request.email, &request.password).await?;
    respond(StatusCode::OK, "Login successful", &session)
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "The caller's user and profile", body = ApiResponse),
        (status = 401, description = "Missing or invalid token", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn me_handler(AuthUser(actor): AuthUser) -> AppResult<Response> {
    respond(StatusCode::OK, "Current user", &actor)
}

#[utoipa::path(
    put,
    path = "/api/v1/auth/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = ApiResponse),
        (status = 400, description = "New password rejected by policy", body = ApiResponse),
        (status = 401, description = "Current password is wrong", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn change_password_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    request: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(request) = match request {
        Ok(v) => v,
        Err(e) => return Ok(invalid_json(e, r#"{"current_password": "...", "new_password": "..."}"#)),
    };
    state
        .market
        .change_password(&actor, &request.current_password, &request.new_password)
        .await?;
    respond(StatusCode::OK, "Password changed", &json!({ "changed": true }))
}

#[utoipa::path(
    put,
    path = "/api/v1/auth/wallet",
    request_body = WalletRequest,
    responses(
        (status = 200, description = "Wallet address stored", body = ApiResponse),
        (status = 400, description = "Malformed wallet address", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_wallet_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    request: Result<Json<WalletRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(request) = match request {
        Ok(v) => v,
        Err(e) => return Ok(invalid_json(e, r#"{"wallet_address": "G..."}"#)),
    };
    let user = state.market.update_wallet(&actor, &request.wallet_address).await?;
    respond(StatusCode::OK, "Wallet updated", &user)
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    responses((status = 200, description = "Logged out", body = ApiResponse)),
    security(("bearer_auth" = []))
)]
pub async fn logout_handler(State(state): State<AppState>, AuthUser(actor): AuthUser) -> AppResult<Response> {
    state.market.logout(&actor);
    respond(StatusCode::OK, "Logged out", &json!({ "logged_out": true }))
}
