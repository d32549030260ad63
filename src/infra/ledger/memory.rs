//! Process-local ledger. Used when no chain is configured and as the test
//! double for the marketplace services.

use super::{LedgerClient, LedgerError, LedgerReceipt, MintReceipt, MintRequest, PaymentRequest, TransferRequest};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct LedgerState {
    balances: HashMap<String, u64>,
    payments: HashMap<String, u64>,
    supply: u64,
    height: u64,
    mint_calls: usize,
    fail_next: Option<String>,
}

pub struct InMemoryLedger {
    network: String,
    latency: Option<Duration>,
    state: Mutex<LedgerState>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            network: "memory".into(),
            latency: None,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Every call sleeps this long before touching state.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes the next ledger call fail with `message`.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.lock().fail_next = Some(message.into());
    }

    pub fn mint_calls(&self) -> usize {
        self.lock().mint_calls
    }

    pub fn supply(&self) -> u64 {
        self.lock().supply
    }

    pub fn balance_of(&self, wallet: &str) -> u64 {
        self.lock().balances.get(wallet).copied().unwrap_or(0)
    }

    pub fn paid_to(&self, wallet: &str) -> u64 {
        self.lock().payments.get(wallet).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        // a panic while holding the lock leaves plain counters behind; keep going
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Runs `op` against the state, honouring an armed failure, and stamps a
    /// receipt for the new ledger height.
    fn apply<T>(
        &self,
        label: &str,
        op: impl FnOnce(&mut LedgerState) -> Result<T, LedgerError>,
    ) -> Result<(T, LedgerReceipt), LedgerError> {
        let mut state = self.lock();
        if let Some(message) = state.fail_next.take() {
            return Err(LedgerError::Rpc(message));
        }
        let out = op(&mut state)?;
        state.height += 1;
        let digest = Sha256::digest(format!("{}:{}", label, state.height).as_bytes());
        Ok((
            out,
            LedgerReceipt {
                tx_hash: hex::encode(digest),
                ledger: state.height,
            },
        ))
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    fn network(&self) -> &str {
        &self.network
    }

    async fn mint(&self, request: MintRequest) -> Result<MintReceipt, LedgerError> {
        self.pause().await;
        let label = format!("mint:{}", request.production_id);
        let ((), receipt) = self.apply(&label, |state| {
            state.mint_calls += 1;
            if request.amount == 0 {
                return Err(LedgerError::Rejected("cannot mint zero tokens".into()));
            }
            *state.balances.entry(request.recipient.clone()).or_default() += request.amount;
            state.supply += request.amount;
            Ok(())
        })?;
        Ok(MintReceipt {
            receipt,
            ledger_token_id: format!("mem:{}", request.production_id.simple()),
        })
    }

    async fn transfer(&self, request: TransferRequest) -> Result<LedgerReceipt, LedgerError> {
        self.pause().await;
        let label = format!("transfer:{}", request.reference);
        let ((), receipt) = self.apply(&label, |state| {
            let from = state.balances.get(&request.from).copied().unwrap_or(0);
            if from < request.amount {
                return Err(LedgerError::Rejected(format!(
                    "insufficient balance: {} holds {}, needs {}",
                    request.from, from, request.amount
                )));
            }
            state.balances.insert(request.from.clone(), from - request.amount);
            *state.balances.entry(request.to.clone()).or_default() += request.amount;
            Ok(())
        })?;
        Ok(receipt)
    }

    async fn burn(&self, holder: &str, amount: u64) -> Result<LedgerReceipt, LedgerError> {
        self.pause().await;
        let ((), receipt) = self.apply(&format!("burn:{}", holder), |state| {
            let held = state.balances.get(holder).copied().unwrap_or(0);
            if held < amount {
                return Err(LedgerError::Rejected(format!("cannot burn {} from a balance of {}", amount, held)));
            }
            state.balances.insert(holder.to_string(), held - amount);
            state.supply -= amount;
            Ok(())
        })?;
        Ok(receipt)
    }

    async fn pay(&self, request: PaymentRequest) -> Result<LedgerReceipt, LedgerError> {
        self.pause().await;
        let label = format!("pay:{}:{}", request.party, request.reference);
        let ((), receipt) = self.apply(&label, |state| {
            *state.payments.entry(request.recipient.clone()).or_default() += request.amount_cents;
            Ok(())
        })?;
        Ok(receipt)
    }

    async fn balance(&self, holder: &str) -> Result<u64, LedgerError> {
        self.pause().await;
        let mut state = self.lock();
        if let Some(message) = state.fail_next.take() {
            return Err(LedgerError::Rpc(message));
        }
        Ok(state.balances.get(holder).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn mint(recipient: &str, amount: u64) -> MintRequest {
        MintRequest {
            production_id: Uuid::new_v4(),
            recipient: recipient.into(),
            amount,
        }
    }

    #[tokio::test]
    async fn mint_transfer_burn_keep_supply_consistent() {
        let ledger = InMemoryLedger::new();
        let minted = ledger.mint(mint("GA", 5_000_000)).await.unwrap();
        assert!(minted.ledger_token_id.starts_with("mem:"));
        assert_eq!(minted.receipt.tx_hash.len(), 64);

        ledger
            .transfer(TransferRequest {
                from: "GA".into(),
                to: "GB".into(),
                amount: 2_000_000,
                reference: Uuid::new_v4(),
            })
            .await
            .unwrap();
        assert_eq!(ledger.balance("GA").await.unwrap(), 3_000_000);
        assert_eq!(ledger.balance("GB").await.unwrap(), 2_000_000);

        ledger.burn("GB", 2_000_000).await.unwrap();
        assert_eq!(ledger.supply(), 3_000_000);
        assert!(ledger.burn("GB", 1).await.is_err());
    }

    #[tokio::test]
    async fn overdrawn_transfer_is_rejected() {
        let ledger = InMemoryLedger::new();
        let err = ledger
            .transfer(TransferRequest {
                from: "GEMPTY".into(),
                to: "GB".into(),
                amount: 1,
                reference: Uuid::new_v4(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(_)));
    }

    #[tokio::test]
    async fn armed_failure_hits_exactly_one_call() {
        let ledger = InMemoryLedger::new();
        ledger.fail_next("rpc unavailable");
        assert!(matches!(ledger.mint(mint("GA", 1)).await, Err(LedgerError::Rpc(_))));
        assert!(ledger.mint(mint("GA", 1)).await.is_ok());
        assert_eq!(ledger.mint_calls(), 1);
    }

    #[tokio::test]
    async fn payments_accumulate_per_recipient() {
        let ledger = InMemoryLedger::new();
        for _ in 0..2 {
            ledger
                .pay(PaymentRequest {
                    recipient: "GFUND".into(),
                    amount_cents: 150,
                    reference: Uuid::new_v4(),
                    party: "fund",
                })
                .await
                .unwrap();
        }
        assert_eq!(ledger.paid_to("GFUND"), 300);
    }
}
