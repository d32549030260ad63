//! Everything that moves value on the ledger: minting, transfers, balances,
//! the transaction log and revenue distribution.

use super::{Actor, Marketplace};
use crate::domain::production::{Production, ProductionStatus};
use crate::domain::profile::{FarmerStats, MillStats, Profile};
use crate::domain::split::Party;
use crate::domain::token::{Token, TokenStatus};
use crate::domain::transaction::{Currency, TransactionKind, TransactionRecord};
use crate::domain::user::validate_wallet_address;
use crate::domain::{round6, PageRequest, Paged};
use crate::error::{AppError, AppResult};
use crate::infra::ledger::{from_base_units, to_base_units, LedgerError, MintRequest, PaymentRequest, TransferRequest};
use crate::storage::{StatsDelta, TokenFilter, TransactionFilter};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct MintOutcome {
    pub production: Production,
    pub token: Token,
    pub transaction: TransactionRecord,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferInput {
    pub token_id: Uuid,
    pub to_wallet: String,
    /// Defaults to the whole token.
    #[serde(default)]
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    pub token: Token,
    pub transaction: TransactionRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct Balance {
    pub wallet: String,
    pub balance: f64,
    /// `ledger` when read from the network, `database` when reconstructed
    /// from token records after a ledger failure.
    pub source: &'static str,
    pub network: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutState {
    Paid,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayoutOutcome {
    pub party: Party,
    pub state: PayoutState,
    pub amount_cents: i64,
    pub wallet: Option<String>,
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DistributionOutcome {
    pub token_id: Uuid,
    pub production_status: ProductionStatus,
    pub payouts: Vec<PayoutOutcome>,
}

impl DistributionOutcome {
    pub fn all_settled(&self) -> bool {
        self.payouts.iter().all(|p| p.state != PayoutState::Failed)
    }
}

fn payment_kind(party: Party) -> TransactionKind {
    match party {
        Party::Farmer => TransactionKind::PaymentFarmer,
        Party::Mill => TransactionKind::PaymentMill,
        Party::Fund => TransactionKind::DepositFund,
    }
}

fn may_transfer(actor: &Actor, token: &Token) -> bool {
    match &actor.profile {
        Profile::Admin => true,
        Profile::Farmer(f) => token.farmer_id == f.id && token.status.is_listed(),
        Profile::Company(c) => token.owner_company_id == Some(c.id) && token.status == TokenStatus::Sold,
        Profile::Mill(_) => false,
    }
}

impl Marketplace {
    async fn release_claim(&self, production_id: Uuid) {
        if let Err(e) = self.store.release_mint(production_id).await {
            tracing::error!(production_id = %production_id, error = %e, "failed to release mint claim");
        }
    }

    /// Marks a ledger failure on the audit record. The ledger error is what
    /// the caller sees, so a failure to persist is only logged.
    pub(super) async fn record_failure(&self, record: &mut TransactionRecord, error: &LedgerError) {
        if record.fail(error.to_string(), Utc::now()).is_ok() {
            if let Err(e) = self.store.update_transaction(record).await {
                tracing::error!(transaction_id = %record.id, error = %e, "failed to persist transaction failure");
            }
        }
    }

    /// Mints the tCANE tokens of a validated production to the farmer's
    /// wallet. At most one caller wins the claim on a production; the others
    /// get `Conflict` without reaching the ledger.
    pub async fn mint_tokens(&self, actor: &Actor, production_id: Uuid) -> AppResult<MintOutcome> {
        let mut production = self.load_production(production_id).await?;
        match &actor.profile {
            Profile::Admin => {}
            Profile::Mill(m) if m.id == production.mill_id => {}
            _ => return Err(AppError::forbidden("only the owning mill or an administrator can mint")),
        }
        match production.status {
            ProductionStatus::Validated => {}
            ProductionStatus::Registered | ProductionStatus::Rejected => {
                return Err(AppError::validation(format!(
                    "production must be validated before minting (status: {})",
                    production.status
                )))
            }
            _ => {
                return Err(AppError::Conflict(format!(
                    "tokens were already minted for production {}",
                    production.id
                )))
            }
        }
        let farmer = self.load_farmer(production.farmer_id).await?;
        let wallet = self
            .load_user(farmer.user_id)
            .await?
            .wallet_address
            .ok_or_else(|| AppError::validation("the farmer has no wallet address configured"))?;

        let now = Utc::now();
        if !self.store.claim_mint(production.id, now).await? {
            tracing::warn!(production_id = %production.id, "mint refused, production already claimed");
            return Err(AppError::Conflict(format!(
                "tokens for production {} are already minted or being minted",
                production.id
            )));
        }

        let mut record = TransactionRecord::pending(TransactionKind::MintToken, production.tokens_generated, Currency::Tcane, now)
            .between(None, Some(wallet.clone()))
            .for_user(actor.user.id)
            .with_details(json!({
                "co2_equivalent": production.co2_equivalent,
                "tonnage": production.tonnage,
                "season": production.season,
            }));
        record.production_id = Some(production.id);
        let started = record.begin_attempt(now);
        let inserted = match started {
            Ok(()) => self.store.insert_transaction(&record).await.map_err(AppError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = inserted {
            self.release_claim(production.id).await;
            return Err(e);
        }

        let request = MintRequest {
            production_id: production.id,
            recipient: wallet.clone(),
            amount: to_base_units(production.tokens_generated),
        };
        let minted = match self.ledger.mint(request).await {
            Ok(minted) => minted,
            Err(e) => {
                tracing::error!(production_id = %production.id, error = %e, "mint failed on the ledger");
                self.record_failure(&mut record, &e).await;
                self.release_claim(production.id).await;
                return Err(e.into());
            }
        };

        // The ledger has minted from here on; failures below are reported
        // but the claim stays so the production cannot be minted again.
        let now = Utc::now();
        let receipt = minted.receipt.into_chain(self.ledger.network(), now);
        let validity = Duration::days(self.market.token_validity_days);
        let token = Token::minted(&production, minted.ledger_token_id, wallet, receipt.clone(), validity, now);
        self.store.insert_token(&token).await?;

        record.token_id = Some(token.id);
        record.confirm(&receipt, now)?;
        self.store.update_transaction(&record).await?;

        production.mark_tokenized(receipt, now)?;
        self.store.update_production(&production).await?;
        // tokenized productions cannot be claimed again
        self.release_claim(production.id).await;

        let minted_farmer = FarmerStats {
            total_tokens: token.quantity,
            ..FarmerStats::default()
        };
        self.store.add_stats(&StatsDelta::Farmer(farmer.id, minted_farmer)).await?;
        let minted_mill = MillStats {
            total_tokens: token.quantity,
            ..MillStats::default()
        };
        self.store.add_stats(&StatsDelta::Mill(production.mill_id, minted_mill)).await?;

        tracing::info!(
            production_id = %production.id,
            token_id = %token.id,
            quantity = token.quantity,
            tx_hash = %record.tx_hash.as_deref().unwrap_or_default(),
            "tokens minted"
        );
        Ok(MintOutcome {
            production,
            token,
            transaction: record,
        })
    }

    pub async fn transfer_token(&self, actor: &Actor, input: TransferInput) -> AppResult<TransferOutcome> {
        let token_id = input.token_id;
        if !may_transfer(actor, &self.load_token(token_id).await?) {
            return Err(AppError::forbidden("you do not hold this token"));
        }
        let token = self.claim_token(token_id).await?;
        let result = self.transfer_claimed(actor, token, input).await;
        self.release_token(token_id).await;
        result
    }

    async fn transfer_claimed(&self, actor: &Actor, token: Token, input: TransferInput) -> AppResult<TransferOutcome> {
        if !may_transfer(actor, &token) {
            return Err(AppError::forbidden("you do not hold this token"));
        }
        let to = input.to_wallet.trim().to_string();
        validate_wallet_address(&to)?;
        let from = token
            .holder_wallet
            .clone()
            .ok_or_else(|| AppError::validation("token has no holder wallet"))?;
        if from == to {
            return Err(AppError::validation("destination wallet is the current holder"));
        }
        let amount = input.amount.unwrap_or(token.quantity);

        let now = Utc::now();
        let mut updated = token.clone();
        updated.transfer_out(amount, &to, now)?;

        let mut record = TransactionRecord::pending(TransactionKind::TransferToken, amount, Currency::Tcane, now)
            .between(Some(from.clone()), Some(to.clone()))
            .for_user(actor.user.id)
            .with_details(json!({ "token_code": token.code, "partial": amount < token.quantity }));
        record.token_id = Some(token.id);
        record.production_id = Some(token.production_id);
        record.begin_attempt(now)?;
        self.store.insert_transaction(&record).await?;

        let request = TransferRequest {
            from,
            to,
            amount: to_base_units(amount),
            reference: record.id,
        };
        let receipt = match self.ledger.transfer(request).await {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::error!(token_id = %token.id, error = %e, "transfer failed on the ledger");
                self.record_failure(&mut record, &e).await;
                return Err(e.into());
            }
        };
        let now = Utc::now();
        let receipt = receipt.into_chain(self.ledger.network(), now);
        record.confirm(&receipt, now)?;
        self.store.update_transaction(&record).await?;
        self.store.update_token(&updated).await?;
        tracing::info!(token_id = %token.id, amount, "token transferred");
        Ok(TransferOutcome {
            token: updated,
            transaction: record,
        })
    }

    pub async fn balance(&self, actor: &Actor, wallet: &str) -> AppResult<Balance> {
        if !actor.is_admin() && actor.wallet() != Some(wallet) {
            return Err(AppError::forbidden("you can only query your own wallet"));
        }
        let network = self.ledger.network().to_string();
        match self.ledger.balance(wallet).await {
            Ok(units) => Ok(Balance {
                wallet: wallet.to_string(),
                balance: from_base_units(units),
                source: "ledger",
                network,
            }),
            Err(e) => {
                tracing::warn!(wallet, error = %e, "ledger balance unavailable, answering from the database");
                let filter = TokenFilter {
                    statuses: vec![
                        TokenStatus::Minted,
                        TokenStatus::Available,
                        TokenStatus::Reserved,
                        TokenStatus::Sold,
                    ],
                    holder_wallet: Some(wallet.to_string()),
                    ..TokenFilter::default()
                };
                let held: f64 = self.store.all_tokens(&filter).await?.iter().map(|t| t.quantity).sum();
                Ok(Balance {
                    wallet: wallet.to_string(),
                    balance: round6(held),
                    source: "database",
                    network,
                })
            }
        }
    }

    /// Administrators see every record; everyone else only the records they
    /// initiated or whose wallets they own.
    pub async fn transaction_history(
        &self,
        actor: &Actor,
        mut filter: TransactionFilter,
        page: PageRequest,
    ) -> AppResult<Paged<TransactionRecord>> {
        if !actor.is_admin() {
            filter.involving = Some((actor.user.id, actor.user.wallet_address.clone()));
        }
        Ok(self.store.list_transactions(&filter, page).await?)
    }

    /// Pays each party of a sold token its share of the sale. Parties already
    /// paid are skipped, so the call can be repeated after a partial failure.
    pub async fn distribute_revenue(&self, actor: &Actor, token_id: Uuid) -> AppResult<DistributionOutcome> {
        actor.require_admin()?;
        let token = self.claim_token(token_id).await?;
        let result = self.distribute_claimed(actor, token).await;
        self.release_token(token_id).await;
        result
    }

    async fn distribute_claimed(&self, actor: &Actor, mut token: Token) -> AppResult<DistributionOutcome> {
        if token.sale.is_none() {
            return Err(AppError::validation(format!(
                "only sold tokens can be distributed (status: {})",
                token.status
            )));
        }
        let mut production = self.load_production(token.production_id).await?;
        let farmer = self.load_farmer(token.farmer_id).await?;
        let mill = self.load_mill(token.mill_id).await?;
        let farmer_wallet = self.load_user(farmer.user_id).await?.wallet_address;
        let mill_wallet = self.load_user(mill.user_id).await?.wallet_address;

        let mut farmer_income = FarmerStats::default();
        let mut mill_commission = MillStats::default();
        let mut payouts = Vec::with_capacity(Party::ALL.len());
        for party in Party::ALL {
            let payout = token.distribution.payout(party).clone();
            let wallet = match party {
                Party::Farmer => farmer_wallet.clone(),
                Party::Mill => mill_wallet.clone(),
                Party::Fund => self.market.fund_wallet.clone(),
            };
            let mut outcome = PayoutOutcome {
                party,
                state: PayoutState::Skipped,
                amount_cents: payout.amount_cents,
                wallet: wallet.clone(),
                tx_hash: payout.tx_hash.clone(),
                error: None,
            };
            if payout.transferred {
                payouts.push(outcome);
                continue;
            }
            let Some(wallet) = wallet else {
                outcome.state = PayoutState::Failed;
                outcome.error = Some(format!("no wallet configured for the {} share", party.as_str()));
                payouts.push(outcome);
                continue;
            };

            let now = Utc::now();
            let tx_hash = if payout.amount_cents > 0 {
                let mut record = TransactionRecord::pending(
                    payment_kind(party),
                    payout.amount_cents as f64 / 100.0,
                    Currency::Usd,
                    now,
                )
                .between(None, Some(wallet.clone()))
                .for_user(actor.user.id)
                .with_details(json!({
                    "party": party.as_str(),
                    "percentage": payout.percentage,
                    "amount_cents": payout.amount_cents,
                }));
                record.token_id = Some(token.id);
                record.production_id = Some(production.id);
                record.begin_attempt(now)?;
                self.store.insert_transaction(&record).await?;

                let request = PaymentRequest {
                    recipient: wallet.clone(),
                    amount_cents: payout.amount_cents as u64,
                    reference: record.id,
                    party: party.as_str(),
                };
                match self.ledger.pay(request).await {
                    Ok(receipt) => {
                        let receipt = receipt.into_chain(self.ledger.network(), Utc::now());
                        record.confirm(&receipt, Utc::now())?;
                        self.store.update_transaction(&record).await?;
                        Some(receipt.tx_hash)
                    }
                    Err(e) => {
                        tracing::error!(token_id = %token.id, party = party.as_str(), error = %e, "payout failed");
                        self.record_failure(&mut record, &e).await;
                        outcome.state = PayoutState::Failed;
                        outcome.error = Some(e.to_string());
                        payouts.push(outcome);
                        continue;
                    }
                }
            } else {
                None
            };

            let slot = token.distribution.payout_mut(party);
            slot.transferred = true;
            slot.transferred_at = Some(now);
            slot.wallet = Some(wallet);
            slot.tx_hash = tx_hash.clone();
            match party {
                Party::Farmer => farmer_income.total_income_cents += payout.amount_cents,
                Party::Mill => mill_commission.commission_cents += payout.amount_cents,
                Party::Fund => {}
            }
            outcome.state = PayoutState::Paid;
            outcome.tx_hash = tx_hash;
            payouts.push(outcome);
        }

        let now = Utc::now();
        token.updated_at = now;
        self.store.update_token(&token).await?;
        production.record_payouts(&token.distribution, now)?;
        self.store.update_production(&production).await?;
        if farmer_income.total_income_cents > 0 {
            self.store.add_stats(&StatsDelta::Farmer(farmer.id, farmer_income)).await?;
        }
        if mill_commission.commission_cents > 0 {
            self.store.add_stats(&StatsDelta::Mill(mill.id, mill_commission)).await?;
        }
        tracing::info!(token_id = %token.id, production_status = %production.status, "revenue distributed");
        Ok(DistributionOutcome {
            token_id: token.id,
            production_status: production.status,
            payouts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testkit::{kit, kit_with, wallet, Kit};
    use crate::domain::production::fixtures::input;
    use crate::domain::transaction::TransactionStatus;
    use crate::infra::ledger::InMemoryLedger;
    use axum::http::StatusCode;
    use std::time::Duration as StdDuration;

    async fn validated(kit: &Kit, tonnage: f64, farmer_wallet: Option<char>) -> (Actor, Actor, Production) {
        let mill = kit.mill("norte").await;
        let farmer = kit.farmer("rosa", &mill, farmer_wallet).await;
        let p = kit
            .market
            .register_production(&mill, input(farmer.profile.id().unwrap(), tonnage))
            .await
            .unwrap();
        let p = kit.market.validate_production(&mill, p.id).await.unwrap();
        (mill, farmer, p)
    }

    #[tokio::test]
    async fn mint_creates_token_and_confirms_transaction() {
        let kit = kit();
        let (mill, farmer, p) = validated(&kit, 10.0, Some('F')).await;

        let outcome = kit.market.mint_tokens(&mill, p.id).await.unwrap();
        assert_eq!(outcome.production.status, ProductionStatus::Tokenized);
        assert_eq!(outcome.token.status, TokenStatus::Minted);
        assert_eq!(outcome.token.quantity, p.tokens_generated);
        assert!(outcome.token.code.starts_with("tCANE_"));
        assert_eq!(outcome.transaction.status, TransactionStatus::Confirmed);
        assert_eq!(outcome.transaction.attempts, 1);
        assert_eq!(kit.ledger.supply(), to_base_units(p.tokens_generated));

        let balance = kit.market.balance(&farmer, &wallet('F')).await.unwrap();
        assert_eq!(balance.source, "ledger");
        assert_eq!(balance.balance, p.tokens_generated);

        let again = kit.market.mint_tokens(&mill, p.id).await.unwrap_err();
        assert_eq!(again.status(), StatusCode::CONFLICT);
        assert_eq!(kit.ledger.mint_calls(), 1);
    }

    #[tokio::test]
    async fn mint_preconditions() {
        let kit = kit();
        let mill = kit.mill("norte").await;
        let farmer = kit.farmer("rosa", &mill, None).await;
        let p = kit
            .market
            .register_production(&mill, input(farmer.profile.id().unwrap(), 10.0))
            .await
            .unwrap();

        let unvalidated = kit.market.mint_tokens(&mill, p.id).await.unwrap_err();
        assert_eq!(unvalidated.status(), StatusCode::BAD_REQUEST);

        kit.market.validate_production(&mill, p.id).await.unwrap();
        let no_wallet = kit.market.mint_tokens(&mill, p.id).await.unwrap_err();
        assert_eq!(no_wallet.status(), StatusCode::BAD_REQUEST);
        assert!(no_wallet.to_string().contains("wallet"));

        let other = kit.mill("sur").await;
        assert_eq!(kit.market.mint_tokens(&other, p.id).await.unwrap_err().status(), StatusCode::FORBIDDEN);
        assert_eq!(kit.ledger.mint_calls(), 0);
    }

    #[tokio::test]
    async fn ledger_failure_fails_the_transaction_and_frees_the_claim() {
        let kit = kit();
        let (mill, _farmer, p) = validated(&kit, 10.0, Some('F')).await;

        kit.ledger.fail_next("rpc unavailable");
        let err = kit.market.mint_tokens(&mill, p.id).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let admin = kit.admin().await;
        let failed = kit
            .market
            .transaction_history(&admin, TransactionFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(failed.items.len(), 1);
        assert_eq!(failed.items[0].status, TransactionStatus::Failed);
        assert_eq!(failed.items[0].errors.len(), 1);

        let stored = kit.market.get_production(&mill, p.id).await.unwrap();
        assert_eq!(stored.status, ProductionStatus::Validated);
        assert!(kit.market.mint_tokens(&mill, p.id).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_mints_reach_the_ledger_once() {
        let kit = kit_with(InMemoryLedger::new().with_latency(StdDuration::from_millis(50)));
        let (mill, _farmer, p) = validated(&kit, 10.0, Some('F')).await;

        let (a, b) = tokio::join!(kit.market.mint_tokens(&mill, p.id), kit.market.mint_tokens(&mill, p.id));
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(loser.status(), StatusCode::CONFLICT);
        assert_eq!(kit.ledger.mint_calls(), 1);
    }

    #[tokio::test]
    async fn partial_transfer_shrinks_the_token() {
        let kit = kit();
        let (mill, farmer, p) = validated(&kit, 10.0, Some('F')).await;
        let token = kit.market.mint_tokens(&mill, p.id).await.unwrap().token;

        let out = kit
            .market
            .transfer_token(
                &farmer,
                TransferInput {
                    token_id: token.id,
                    to_wallet: wallet('Q'),
                    amount: Some(4.0),
                },
            )
            .await
            .unwrap();
        assert_eq!(out.token.quantity, round6(token.quantity - 4.0));
        assert_eq!(out.token.status, TokenStatus::Minted);
        assert_eq!(out.transaction.kind, TransactionKind::TransferToken);

        let too_much = kit
            .market
            .transfer_token(
                &farmer,
                TransferInput {
                    token_id: token.id,
                    to_wallet: wallet('Q'),
                    amount: Some(100.0),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(too_much.status(), StatusCode::BAD_REQUEST);

        let history = kit
            .market
            .transaction_history(&farmer, TransactionFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(history.total, 2);
    }

    #[tokio::test]
    async fn balance_falls_back_to_token_records() {
        let kit = kit();
        let (mill, farmer, p) = validated(&kit, 10.0, Some('F')).await;
        kit.market.mint_tokens(&mill, p.id).await.unwrap();

        kit.ledger.fail_next("timeout");
        let balance = kit.market.balance(&farmer, &wallet('F')).await.unwrap();
        assert_eq!(balance.source, "database");
        assert_eq!(balance.balance, p.tokens_generated);

        let err = kit.market.balance(&mill, &wallet('F')).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }
}
