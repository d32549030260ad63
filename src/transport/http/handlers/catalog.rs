use crate::app::catalog::PurchaseInput;
use crate::error::AppResult;
use crate::transport::http::extract::AuthUser;
use crate::transport::http::types::{
    invalid_json, query, respond, ApiResponse, AppState, CatalogQuery, CompensationRequest, PurchaseRequest,
};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;

#[utoipa::path(
    get,
    path = "/api/v1/catalog",
    params(CatalogQuery),
    responses((status = 200, description = "Tokens for sale, cheapest first, with a summary", body = ApiResponse))
)]
pub async fn list_catalog_handler(
    State(state): State<AppState>,
    q: Result<Query<CatalogQuery>, QueryRejection>,
) -> AppResult<Response> {
    let q = query(q)?;
    let catalog = state.market.list_available(q.filter(), q.page()).await?;
    respond(StatusCode::OK, "Catalog", &catalog)
}

#[utoipa::path(
    post,
    path = "/api/v1/catalog/compensation",
    request_body = CompensationRequest,
    responses(
        (status = 200, description = "Cheapest-first selection covering the target", body = ApiResponse),
        (status = 400, description = "Target must be positive", body = ApiResponse)
    )
)]
pub async fn compensation_handler(
    State(state): State<AppState>,
    request: Result<Json<CompensationRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(request) = match request {
        Ok(v) => v,
        Err(e) => return Ok(invalid_json(e, r#"{"target_co2": 25.0}"#)),
    };
    let plan = state.market.compute_compensation(request.target_co2).await?;
    respond(StatusCode::OK, "Compensation plan", &plan)
}

#[utoipa::path(
    post,
    path = "/api/v1/catalog/purchase",
    request_body = PurchaseRequest,
    responses(
        (status = 200, description = "Every token purchased", body = ApiResponse),
        (status = 207, description = "Some tokens could not be transferred", body = ApiResponse),
        (status = 400, description = "Unknown or unavailable tokens, or over budget", body = ApiResponse),
        (status = 403, description = "Only companies can purchase", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn purchase_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    request: Result<Json<PurchaseRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(request) = match request {
        Ok(v) => v,
        Err(e) => return Ok(invalid_json(e, r#"{"token_ids": ["..."], "wallet": "G... (optional)"}"#)),
    };
    let outcome = state
        .market
        .purchase_tokens(
            &actor,
            PurchaseInput {
                token_ids: request.token_ids,
                wallet: request.wallet,
            },
        )
        .await?;
    if outcome.complete() {
        respond(StatusCode::OK, "Purchase completed", &outcome)
    } else {
        respond(StatusCode::MULTI_STATUS, "Purchase partially completed", &outcome)
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/catalog/purchases",
    responses((status = 200, description = "The company's purchased tokens with totals", body = ApiResponse)),
    security(("bearer_auth" = []))
)]
pub async fn purchase_history_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> AppResult<Response> {
    let history = state.market.purchase_history(&actor).await?;
    respond(StatusCode::OK, "Purchase history", &history)
}
