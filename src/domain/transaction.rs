//! Audit records for every value movement that touches the ledger.

use crate::domain::{invalid, DomainError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Where and when a ledger call landed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainReceipt {
    pub tx_hash: String,
    pub ledger: u64,
    pub network: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    MintToken,
    TransferToken,
    PurchaseToken,
    BurnToken,
    PaymentFarmer,
    PaymentMill,
    DepositFund,
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 7] = [
        TransactionKind::MintToken,
        TransactionKind::TransferToken,
        TransactionKind::PurchaseToken,
        TransactionKind::BurnToken,
        TransactionKind::PaymentFarmer,
        TransactionKind::PaymentMill,
        TransactionKind::DepositFund,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::MintToken => "mint_token",
            TransactionKind::TransferToken => "transfer_token",
            TransactionKind::PurchaseToken => "purchase_token",
            TransactionKind::BurnToken => "burn_token",
            TransactionKind::PaymentFarmer => "payment_farmer",
            TransactionKind::PaymentMill => "payment_mill",
            TransactionKind::DepositFund => "deposit_fund",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| invalid(format!("unknown transaction kind '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Confirmed,
    Failed,
    Reverted,
    Cancelled,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 6] = [
        TransactionStatus::Pending,
        TransactionStatus::Processing,
        TransactionStatus::Confirmed,
        TransactionStatus::Failed,
        TransactionStatus::Reverted,
        TransactionStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Confirmed => "confirmed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Reverted => "reverted",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_move_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Processing, Confirmed)
                | (Processing, Failed)
                | (Confirmed, Reverted)
                | (Failed, Processing)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| invalid(format!("unknown transaction status '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Tcane,
    Usd,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Tcane => "TCANE",
            Currency::Usd => "USD",
        }
    }
}

impl FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TCANE" => Ok(Currency::Tcane),
            "USD" => Ok(Currency::Usd),
            other => Err(invalid(format!("unknown currency '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptError {
    pub at: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub tx_hash: Option<String>,
    pub ledger: Option<u64>,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub user_id: Option<Uuid>,
    pub token_id: Option<Uuid>,
    pub production_id: Option<Uuid>,
    pub amount: f64,
    pub currency: Currency,
    pub attempts: u32,
    pub max_attempts: u32,
    pub errors: Vec<AttemptError>,
    pub details: JsonValue,
    pub processed_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn pending(kind: TransactionKind, amount: f64, currency: Currency, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: TransactionStatus::Pending,
            tx_hash: None,
            ledger: None,
            from_address: None,
            to_address: None,
            user_id: None,
            token_id: None,
            production_id: None,
            amount,
            currency,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            errors: Vec::new(),
            details: JsonValue::Null,
            processed_at: None,
            confirmed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn between(mut self, from: Option<String>, to: Option<String>) -> Self {
        self.from_address = from;
        self.to_address = to;
        self
    }

    pub fn for_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = details;
        self
    }

    fn transition(&mut self, next: TransactionStatus, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.status.can_move_to(next) {
            return Err(DomainError::Transition {
                entity: "transaction",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Moves to `processing` ahead of a ledger submission and counts the attempt.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.attempts >= self.max_attempts {
            return Err(invalid(format!(
                "transaction {} exhausted its {} attempts",
                self.id, self.max_attempts
            )));
        }
        self.transition(TransactionStatus::Processing, now)?;
        self.attempts += 1;
        self.processed_at = Some(now);
        Ok(())
    }

    pub fn confirm(&mut self, receipt: &ChainReceipt, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(TransactionStatus::Confirmed, now)?;
        self.tx_hash = Some(receipt.tx_hash.clone());
        self.ledger = Some(receipt.ledger);
        self.confirmed_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(TransactionStatus::Failed, now)?;
        self.errors.push(AttemptError {
            at: now,
            message: message.into(),
        });
        Ok(())
    }

    /// Whether the record names this user as initiator or counterparty.
    pub fn involves(&self, user_id: Uuid, wallet: Option<&str>) -> bool {
        self.user_id == Some(user_id)
            || wallet.is_some_and(|w| {
                self.from_address.as_deref() == Some(w) || self.to_address.as_deref() == Some(w)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt() -> ChainReceipt {
        ChainReceipt {
            tx_hash: "f00d".into(),
            ledger: 42,
            network: "memory".into(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn confirm_requires_processing() {
        let mut tx = TransactionRecord::pending(TransactionKind::MintToken, 1.47, Currency::Tcane, Utc::now());
        assert!(tx.confirm(&receipt(), Utc::now()).is_err());
        tx.begin_attempt(Utc::now()).unwrap();
        tx.confirm(&receipt(), Utc::now()).unwrap();
        assert_eq!(tx.status, TransactionStatus::Confirmed);
        assert_eq!(tx.tx_hash.as_deref(), Some("f00d"));
        assert_eq!(tx.ledger, Some(42));
        assert!(tx.confirmed_at.is_some());
    }

    #[test]
    fn failures_are_recorded_and_attempts_bounded() {
        let mut tx = TransactionRecord::pending(TransactionKind::TransferToken, 1.0, Currency::Tcane, Utc::now());
        for i in 0..DEFAULT_MAX_ATTEMPTS {
            tx.begin_attempt(Utc::now()).unwrap();
            tx.fail(format!("rpc timeout {}", i), Utc::now()).unwrap();
        }
        assert_eq!(tx.attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(tx.errors.len(), DEFAULT_MAX_ATTEMPTS as usize);
        assert!(tx.begin_attempt(Utc::now()).is_err());
        assert_eq!(tx.status, TransactionStatus::Failed);
    }

    #[test]
    fn involvement_by_user_or_wallet() {
        let user = Uuid::new_v4();
        let tx = TransactionRecord::pending(TransactionKind::PurchaseToken, 2.0, Currency::Tcane, Utc::now())
            .between(Some("GFROM".into()), Some("GTO".into()));
        assert!(!tx.involves(user, None));
        assert!(tx.involves(user, Some("GTO")));
        assert!(tx.clone().for_user(user).involves(user, None));
    }
}
