use crate::error::AppError;
use crate::transport::http::extract::bearer_token;
use crate::transport::http::types::AppState;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

/// Rate-limit key: the user id of a valid session token, else the first
/// `x-forwarded-for` address, else a shared anonymous bucket.
pub fn client_key(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(sub) = bearer_token(headers).and_then(|t| state.market.session_subject(t)) {
        return format!("user:{}", sub);
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(|ip| format!("ip:{}", ip))
        .unwrap_or_else(|| "anonymous".to_string())
}

pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let key = client_key(&state, request.headers());
    match state.limiter.check(&key) {
        Ok(()) => next.run(request).await,
        Err(retry_after_secs) => {
            tracing::warn!(key = %key, retry_after_secs, "rate limit exceeded");
            AppError::RateLimited { retry_after_secs }.into_response()
        }
    }
}
