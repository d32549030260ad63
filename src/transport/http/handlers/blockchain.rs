use crate::app::minting::TransferInput;
use crate::error::AppResult;
use crate::transport::http::extract::AuthUser;
use crate::transport::http::types::{
    invalid_json, query, respond, ApiResponse, AppState, TransactionQuery, TransferRequest,
};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use uuid::Uuid;

#[utoipa::path(
    post,
    path = "/api/v1/blockchain/mint/{production_id}",
    params(("production_id" = Uuid, Path, description = "Validated production to tokenize")),
    responses(
        (status = 201, description = "Tokens minted", body = ApiResponse),
        (status = 400, description = "Production not validated or farmer has no wallet", body = ApiResponse),
        (status = 409, description = "Production already tokenized or being minted", body = ApiResponse),
        (status = 500, description = "Ledger failure", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn mint_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(production_id): Path<Uuid>,
) -> AppResult<Response> {
    let outcome = state.market.mint_tokens(&actor, production_id).await?;
    respond(StatusCode::CREATED, "Tokens minted", &outcome)
}

#[utoipa::path(
    post,
    path = "/api/v1/blockchain/transfer",
    request_body = TransferRequest,
    responses(
        (status = 200, description = "Tokens transferred", body = ApiResponse),
        (status = 400, description = "Invalid amount or wallet", body = ApiResponse),
        (status = 403, description = "Caller does not hold the token", body = ApiResponse),
        (status = 409, description = "Token busy with another operation", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn transfer_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    request: Result<Json<TransferRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(request) = match request {
        Ok(v) => v,
        Err(e) => return Ok(invalid_json(e, r#"{"token_id": "...", "to_wallet": "G...", "amount": 1.5}"#)),
    };
    let input = TransferInput {
        token_id: request.token_id,
        to_wallet: request.to_wallet,
        amount: request.amount,
    };
    let outcome = state.market.transfer_token(&actor, input).await?;
    respond(StatusCode::OK, "Tokens transferred", &outcome)
}

#[utoipa::path(
    get,
    path = "/api/v1/blockchain/balance/{wallet}",
    params(("wallet" = String, Path, description = "Wallet address")),
    responses(
        (status = 200, description = "tCANE balance", body = ApiResponse),
        (status = 403, description = "Not the caller's wallet", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn balance_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(wallet): Path<String>,
) -> AppResult<Response> {
    let balance = state.market.balance(&actor, &wallet).await?;
    respond(StatusCode::OK, "Balance", &balance)
}

#[utoipa::path(
    get,
    path = "/api/v1/blockchain/transactions",
    params(TransactionQuery),
    responses((status = 200, description = "Paged transaction records", body = ApiResponse)),
    security(("bearer_auth" = []))
)]
pub async fn transactions_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    q: Result<Query<TransactionQuery>, QueryRejection>,
) -> AppResult<Response> {
    let q = query(q)?;
    let page = state.market.transaction_history(&actor, q.filter()?, q.page()).await?;
    respond(StatusCode::OK, "Transactions", &page)
}

#[utoipa::path(
    post,
    path = "/api/v1/blockchain/distribute/{token_id}",
    params(("token_id" = Uuid, Path, description = "Sold token whose revenue is paid out")),
    responses(
        (status = 200, description = "Every share paid", body = ApiResponse),
        (status = 207, description = "Some shares failed", body = ApiResponse),
        (status = 400, description = "Token has not been sold", body = ApiResponse),
        (status = 409, description = "A distribution for this token is already running", body = ApiResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn distribute_handler(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(token_id): Path<Uuid>,
) -> AppResult<Response> {
    let outcome = state.market.distribute_revenue(&actor, token_id).await?;
    if outcome.all_settled() {
        respond(StatusCode::OK, "Revenue distributed", &outcome)
    } else {
        respond(StatusCode::MULTI_STATUS, "Revenue partially distributed", &outcome)
    }
}
