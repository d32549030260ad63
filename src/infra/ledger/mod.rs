//! Ledger adapter.
//!
//! The marketplace talks to the token ledger only through [`LedgerClient`].
//! Calls are made once: no retries and no idempotency keys, so callers are
//! responsible for not issuing the same mint twice.

pub mod memory;
pub mod solana;

pub use memory::InMemoryLedger;
pub use solana::SolanaLedger;

use crate::domain::transaction::ChainReceipt;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// tCANE amounts travel as integers with six implied decimals.
pub const TOKEN_DECIMALS: u32 = 6;
const UNIT: f64 = 1_000_000.0;

pub fn to_base_units(quantity: f64) -> u64 {
    (quantity * UNIT).round().max(0.0) as u64
}

pub fn from_base_units(units: u64) -> f64 {
    units as f64 / UNIT
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("ledger configuration error: {0}")]
    Config(String),
    #[error("ledger rpc error: {0}")]
    Rpc(String),
    #[error("ledger rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerReceipt {
    pub tx_hash: String,
    pub ledger: u64,
}

impl LedgerReceipt {
    pub fn into_chain(self, network: &str, now: DateTime<Utc>) -> ChainReceipt {
        ChainReceipt {
            tx_hash: self.tx_hash,
            ledger: self.ledger,
            network: network.to_string(),
            recorded_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintReceipt {
    pub receipt: LedgerReceipt,
    pub ledger_token_id: String,
}

#[derive(Debug, Clone)]
pub struct MintRequest {
    pub production_id: Uuid,
    pub recipient: String,
    pub amount: u64,
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub from: String,
    pub to: String,
    pub amount: u64,
    pub reference: Uuid,
}

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub recipient: String,
    pub amount_cents: u64,
    pub reference: Uuid,
    pub party: &'static str,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Network label recorded next to every receipt.
    fn network(&self) -> &str;

    async fn mint(&self, request: MintRequest) -> Result<MintReceipt, LedgerError>;

    async fn transfer(&self, request: TransferRequest) -> Result<LedgerReceipt, LedgerError>;

    async fn burn(&self, holder: &str, amount: u64) -> Result<LedgerReceipt, LedgerError>;

    /// Records a revenue payout to one of the parties of a sale.
    async fn pay(&self, request: PaymentRequest) -> Result<LedgerReceipt, LedgerError>;

    /// Holder balance in base units.
    async fn balance(&self, holder: &str) -> Result<u64, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_unit_conversion_rounds_to_six_decimals() {
        assert_eq!(to_base_units(14.7), 14_700_000);
        assert_eq!(to_base_units(0.0000004), 0);
        assert_eq!(to_base_units(-3.0), 0);
        assert_eq!(from_base_units(1_470_000), 1.47);
    }
}
