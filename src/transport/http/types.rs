use crate::app::rate_limit::RateLimiter;
use crate::app::Marketplace;
use crate::domain::footprint::FootprintStatus;
use crate::domain::production::ProductionStatus;
use crate::domain::token::TokenStatus;
use crate::domain::transaction::{TransactionKind, TransactionStatus};
use crate::domain::user::Role;
use crate::domain::PageRequest;
use crate::error::{AppError, AppResult};
use crate::storage::{FootprintFilter, ProductionFilter, TokenFilter, TransactionFilter};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub market: Arc<Marketplace>,
    pub limiter: Arc<RateLimiter>,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub data: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    pub fn success(message: impl Into<String>, data: JsonValue) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Wraps `data` in the success envelope.
pub fn respond<T: Serialize>(status: StatusCode, message: &str, data: &T) -> AppResult<Response> {
    let data = serde_json::to_value(data)
        .map_err(|e| AppError::Internal(format!("failed to serialize response: {}", e)))?;
    Ok((status, Json(ApiResponse::success(message, data))).into_response())
}

pub fn invalid_json(e: JsonRejection, expected: &str) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ApiResponse::failure(
            "Invalid request body",
            format!("Invalid JSON body: {} (expected: {})", e, expected),
        )),
    )
        .into_response()
}

pub fn query<T>(query: Result<Query<T>, QueryRejection>) -> AppResult<T> {
    query
        .map(|Query(q)| q)
        .map_err(|e| AppError::validation(format!("Invalid query string: {}", e)))
}

fn parse_opt<T>(value: Option<&str>) -> AppResult<Option<T>>
where
    T: FromStr,
    AppError: From<T::Err>,
{
    Ok(value.map(T::from_str).transpose()?)
}

// ---- request bodies ----------------------------------------------------

#[derive(Deserialize, Debug, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub role: Role,
    /// Role-specific profile fields.
    #[schema(value_type = Object)]
    pub profile: JsonValue,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct WalletRequest {
    pub wallet_address: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct ActiveRequest {
    pub active: bool,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct RejectRequest {
    pub reason: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct TransferRequest {
    pub token_id: Uuid,
    pub to_wallet: String,
    /// Defaults to the whole token.
    #[serde(default)]
    pub amount: Option<f64>,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct PriceRequest {
    pub price_cents: i64,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct CompensationRequest {
    /// Tonnes of CO2 to compensate.
    pub target_co2: f64,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct PurchaseRequest {
    pub token_ids: Vec<Uuid>,
    #[serde(default)]
    pub wallet: Option<String>,
}

// ---- query strings -----------------------------------------------------

#[derive(Deserialize, Debug, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PageQuery {
    pub fn page(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

#[derive(Deserialize, Debug, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserQuery {
    pub role: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl UserQuery {
    pub fn role(&self) -> AppResult<Option<Role>> {
        parse_opt(self.role.as_deref())
    }

    pub fn page(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

#[derive(Deserialize, Debug, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProductionQuery {
    pub status: Option<String>,
    pub season: Option<String>,
    pub farmer_id: Option<Uuid>,
    pub mill_id: Option<Uuid>,
    /// Earliest delivery date, `YYYY-MM-DD`.
    #[param(value_type = Option<String>)]
    pub from: Option<NaiveDate>,
    #[param(value_type = Option<String>)]
    pub to: Option<NaiveDate>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ProductionQuery {
    pub fn filter(&self) -> AppResult<ProductionFilter> {
        Ok(ProductionFilter {
            farmer_id: self.farmer_id,
            mill_id: self.mill_id,
            status: parse_opt::<ProductionStatus>(self.status.as_deref())?,
            season: self.season.clone(),
            delivered_from: self.from,
            delivered_to: self.to,
        })
    }

    pub fn page(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

#[derive(Deserialize, Debug, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TokenQuery {
    pub status: Option<String>,
    pub season: Option<String>,
    pub production_id: Option<Uuid>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl TokenQuery {
    pub fn filter(&self) -> AppResult<TokenFilter> {
        Ok(TokenFilter {
            statuses: parse_opt::<TokenStatus>(self.status.as_deref())?
                .into_iter()
                .collect(),
            season: self.season.clone(),
            production_id: self.production_id,
            ..TokenFilter::default()
        })
    }

    pub fn page(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

#[derive(Deserialize, Debug, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CatalogQuery {
    pub price_min_cents: Option<i64>,
    pub price_max_cents: Option<i64>,
    pub co2_min: Option<f64>,
    pub co2_max: Option<f64>,
    /// Case-insensitive part of the farm's municipality or department.
    pub region: Option<String>,
    pub season: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl CatalogQuery {
    pub fn filter(&self) -> TokenFilter {
        TokenFilter {
            price_min_cents: self.price_min_cents,
            price_max_cents: self.price_max_cents,
            co2_min: self.co2_min,
            co2_max: self.co2_max,
            region: self.region.clone().filter(|r| !r.trim().is_empty()),
            season: self.season.clone(),
            ..TokenFilter::default()
        }
    }

    pub fn page(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

#[derive(Deserialize, Debug, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TransactionQuery {
    pub kind: Option<String>,
    pub status: Option<String>,
    #[param(value_type = Option<String>)]
    pub from: Option<DateTime<Utc>>,
    #[param(value_type = Option<String>)]
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl TransactionQuery {
    pub fn filter(&self) -> AppResult<TransactionFilter> {
        Ok(TransactionFilter {
            kind: parse_opt::<TransactionKind>(self.kind.as_deref())?,
            status: parse_opt::<TransactionStatus>(self.status.as_deref())?,
            created_from: self.from,
            created_to: self.to,
            involving: None,
        })
    }

    pub fn page(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

#[derive(Deserialize, Debug, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FootprintQuery {
    pub year: Option<i32>,
    pub status: Option<String>,
}

impl FootprintQuery {
    pub fn filter(&self) -> AppResult<FootprintFilter> {
        Ok(FootprintFilter {
            company_id: None,
            year: self.year,
            status: parse_opt::<FootprintStatus>(self.status.as_deref())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_in_query_is_a_validation_error() {
        let q = ProductionQuery {
            status: Some("lost".into()),
            ..ProductionQuery::default()
        };
        assert_eq!(q.filter().unwrap_err().status(), StatusCode::BAD_REQUEST);

        let q = TokenQuery {
            status: Some("available".into()),
            ..TokenQuery::default()
        };
        assert_eq!(q.filter().unwrap().statuses, vec![TokenStatus::Available]);
    }

    #[test]
    fn blank_region_is_ignored() {
        let q = CatalogQuery {
            region: Some("  ".into()),
            ..CatalogQuery::default()
        };
        assert!(q.filter().region.is_none());
    }
}
