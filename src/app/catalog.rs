//! Token catalog, compensation planning, purchases and the token registry.

use super::{Actor, Marketplace};
use crate::domain::compensation::{plan_compensation, CompensationPlan, Offer};
use crate::domain::profile::{Company, CompanyStats, Profile};
use crate::domain::token::{Token, TokenStats, TokenStatus};
use crate::domain::transaction::{Currency, TransactionKind, TransactionRecord};
use crate::domain::user::validate_wallet_address;
use crate::domain::{round6, PageRequest, Paged};
use crate::error::{AppError, AppResult};
use crate::infra::ledger::{to_base_units, TransferRequest};
use crate::storage::{StatsDelta, TokenFilter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

pub const MAX_TOKENS_PER_PURCHASE: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct CatalogSummary {
    pub count: u64,
    pub total_co2: f64,
    pub avg_price_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogPage {
    pub tokens: Paged<Token>,
    pub summary: CatalogSummary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseInput {
    pub token_ids: Vec<Uuid>,
    /// Defaults to the buyer's registered wallet.
    #[serde(default)]
    pub wallet: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseLine {
    pub token_id: Uuid,
    pub success: bool,
    pub quantity: f64,
    pub co2_equivalent: f64,
    pub cost_cents: i64,
    pub transaction_id: Option<Uuid>,
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseOutcome {
    pub wallet: String,
    pub purchased: u64,
    pub failed: u64,
    pub total_quantity: f64,
    pub total_co2: f64,
    pub total_cost_cents: i64,
    pub lines: Vec<PurchaseLine>,
}

impl PurchaseOutcome {
    pub fn complete(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseHistory {
    pub tokens: Vec<Token>,
    pub total_quantity: f64,
    pub total_co2: f64,
    pub total_spent_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetireOutcome {
    pub token: Token,
    pub transaction: TransactionRecord,
}

fn scoped(actor: &Actor, mut filter: TokenFilter) -> TokenFilter {
    match &actor.profile {
        Profile::Farmer(f) => filter.farmer_id = Some(f.id),
        Profile::Mill(m) => filter.mill_id = Some(m.id),
        Profile::Company(c) => filter.owner_company_id = Some(c.id),
        Profile::Admin => {}
    }
    filter
}

impl Marketplace {
    /// Listed, unexpired tokens, cheapest first, with a summary of the whole
    /// match set.
    pub async fn list_available(&self, filter: TokenFilter, page: PageRequest) -> AppResult<CatalogPage> {
        let listed = TokenFilter::listed(Utc::now());
        let filter = TokenFilter {
            statuses: listed.statuses,
            unexpired_at: listed.unexpired_at,
            order: listed.order,
            ..filter
        };
        let tokens = self.store.all_tokens(&filter).await?;
        let count = tokens.len() as u64;
        let total_co2 = round6(tokens.iter().map(|t| t.co2_equivalent).sum());
        let avg_price_cents = if count > 0 {
            (tokens.iter().map(|t| t.price_cents as f64).sum::<f64>() / count as f64).round() as i64
        } else {
            0
        };
        Ok(CatalogPage {
            tokens: Paged::from_all(tokens, page),
            summary: CatalogSummary {
                count,
                total_co2,
                avg_price_cents,
            },
        })
    }

    pub async fn compute_compensation(&self, target_co2: f64) -> AppResult<CompensationPlan> {
        let tokens = self.store.all_tokens(&TokenFilter::listed(Utc::now())).await?;
        let offers = tokens
            .into_iter()
            .map(|t| Offer {
                token_id: t.id,
                code: t.code,
                co2_equivalent: t.co2_equivalent,
                quantity: t.quantity,
                price_cents: t.price_cents,
                value_cents: t.value_cents,
            })
            .collect();
        Ok(plan_compensation(target_co2, offers)?)
    }

    /// Buys listed tokens for the calling company. Tokens are transferred one
    /// after the other; a ledger failure on one token does not undo the
    /// tokens already bought.
    pub async fn purchase_tokens(&self, actor: &Actor, input: PurchaseInput) -> AppResult<PurchaseOutcome> {
        let company = self.load_company(actor.as_company()?.id).await?;
        if input.token_ids.is_empty() || input.token_ids.len() > MAX_TOKENS_PER_PURCHASE {
            return Err(AppError::validation(format!(
                "a purchase must name between 1 and {} tokens",
                MAX_TOKENS_PER_PURCHASE
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = input.token_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(AppError::validation(format!("token {} is listed twice", dup)));
        }
        let wallet = input
            .wallet
            .as_deref()
            .or(actor.wallet())
            .map(|w| w.trim().to_string())
            .ok_or_else(|| AppError::validation("a destination wallet is required"))?;
        validate_wallet_address(&wallet)?;

        let now = Utc::now();
        let mut tokens = Vec::with_capacity(input.token_ids.len());
        for id in &input.token_ids {
            let Some(mut token) = self.store.token(*id).await? else {
                return Err(AppError::validation(format!("token {} does not exist", id)));
            };
            if token.expire_if_due(now) {
                self.mark_expired(token.id, now).await?;
                return Err(AppError::validation(format!("token {} has expired", id)));
            }
            if !token.status.is_listed() {
                return Err(AppError::validation(format!(
                    "token {} is not for sale (status: {})",
                    id, token.status
                )));
            }
            tokens.push(token);
        }
        let quantity: f64 = tokens.iter().map(|t| t.quantity).sum();
        let cost: i64 = tokens.iter().map(|t| t.value_cents).sum();
        let max_price = tokens.iter().map(|t| t.price_cents).max().unwrap_or_default();
        company.check_purchase(quantity, cost, max_price)?;

        let mut outcome = PurchaseOutcome {
            wallet: wallet.clone(),
            purchased: 0,
            failed: 0,
            total_quantity: 0.0,
            total_co2: 0.0,
            total_cost_cents: 0,
            lines: Vec::with_capacity(tokens.len()),
        };
        for token in tokens {
            let line = self.purchase_one(actor, &company, token, &wallet).await?;
            if line.success {
                outcome.purchased += 1;
                outcome.total_quantity = round6(outcome.total_quantity + line.quantity);
                outcome.total_co2 = round6(outcome.total_co2 + line.co2_equivalent);
                outcome.total_cost_cents += line.cost_cents;
            } else {
                outcome.failed += 1;
            }
            outcome.lines.push(line);
        }
        tracing::info!(
            company_id = %company.id,
            purchased = outcome.purchased,
            failed = outcome.failed,
            cost_cents = outcome.total_cost_cents,
            "purchase processed"
        );
        Ok(outcome)
    }

    /// Persists the expiry of a listed token past its validity. Skipped when
    /// another operation holds the token.
    async fn mark_expired(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<()> {
        if !self.store.claim_token(id, now).await? {
            return Ok(());
        }
        let result = match self.store.token(id).await {
            Ok(Some(mut token)) => {
                if token.expire_if_due(now) {
                    self.store.update_token(&token).await
                } else {
                    Ok(())
                }
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        self.release_token(id).await;
        Ok(result?)
    }

    async fn purchase_one(
        &self,
        actor: &Actor,
        company: &Company,
        token: Token,
        wallet: &str,
    ) -> AppResult<PurchaseLine> {
        let mut line = PurchaseLine {
            token_id: token.id,
            success: false,
            quantity: token.quantity,
            co2_equivalent: token.co2_equivalent,
            cost_cents: token.value_cents,
            transaction_id: None,
            tx_hash: None,
            error: None,
        };
        // another buyer may hold or have taken it since the batch was checked
        let token = match self.claim_token(token.id).await {
            Ok(current) if current.status.is_listed() => current,
            Ok(_) => {
                self.release_token(token.id).await;
                line.error = Some("token is no longer available".into());
                return Ok(line);
            }
            Err(AppError::Conflict(_)) => {
                line.error = Some("token is being bought by someone else".into());
                return Ok(line);
            }
            Err(e) => return Err(e),
        };
        let result = self.sell_claimed(actor, company, token, wallet, &mut line).await;
        self.release_token(line.token_id).await;
        result.map(|()| line)
    }

    async fn sell_claimed(
        &self,
        actor: &Actor,
        company: &Company,
        mut token: Token,
        wallet: &str,
        line: &mut PurchaseLine,
    ) -> AppResult<()> {
        let Some(from) = token.holder_wallet.clone() else {
            line.error = Some("token has no holder wallet".into());
            return Ok(());
        };

        let now = Utc::now();
        let mut record = TransactionRecord::pending(TransactionKind::PurchaseToken, token.quantity, Currency::Tcane, now)
            .between(Some(from.clone()), Some(wallet.to_string()))
            .for_user(actor.user.id)
            .with_details(json!({
                "company_id": company.id,
                "price_cents": token.price_cents,
                "value_cents": token.value_cents,
                "co2_equivalent": token.co2_equivalent,
            }));
        record.token_id = Some(token.id);
        record.production_id = Some(token.production_id);
        record.begin_attempt(now)?;
        self.store.insert_transaction(&record).await?;
        line.transaction_id = Some(record.id);

        let request = TransferRequest {
            from,
            to: wallet.to_string(),
            amount: to_base_units(token.quantity),
            reference: record.id,
        };
        let receipt = match self.ledger.transfer(request).await {
            Ok(receipt) => receipt.into_chain(self.ledger.network(), Utc::now()),
            Err(e) => {
                tracing::error!(token_id = %token.id, error = %e, "purchase transfer failed");
                self.record_failure(&mut record, &e).await;
                line.error = Some(e.to_string());
                return Ok(());
            }
        };
        let now = Utc::now();
        record.confirm(&receipt, now)?;
        self.store.update_transaction(&record).await?;
        token.sell(company.id, wallet, &receipt.tx_hash, now)?;
        self.store.update_token(&token).await?;

        let bought = CompanyStats {
            tokens_purchased: token.quantity,
            co2_compensated_t: token.co2_equivalent,
            total_spent_cents: token.value_cents,
            transaction_count: 1,
        };
        self.store.add_stats(&StatsDelta::Company(company.id, bought)).await?;

        line.success = true;
        line.quantity = token.quantity;
        line.co2_equivalent = token.co2_equivalent;
        line.cost_cents = token.value_cents;
        line.tx_hash = Some(receipt.tx_hash);
        Ok(())
    }

    pub async fn purchase_history(&self, actor: &Actor) -> AppResult<PurchaseHistory> {
        let company = actor.as_company()?;
        let filter = TokenFilter {
            statuses: vec![TokenStatus::Sold, TokenStatus::Retired],
            owner_company_id: Some(company.id),
            ..TokenFilter::default()
        };
        let tokens = self.store.all_tokens(&filter).await?;
        Ok(PurchaseHistory {
            total_quantity: round6(tokens.iter().map(|t| t.quantity).sum()),
            total_co2: round6(tokens.iter().map(|t| t.co2_equivalent).sum()),
            total_spent_cents: tokens
                .iter()
                .map(|t| t.sale.as_ref().map_or(t.value_cents, |s| s.value_cents))
                .sum(),
            tokens,
        })
    }

    /// Burns a sold token held by the calling company.
    pub async fn retire_token(&self, actor: &Actor, token_id: Uuid) -> AppResult<RetireOutcome> {
        let company = actor.as_company()?;
        if self.load_token(token_id).await?.owner_company_id != Some(company.id) {
            return Err(AppError::forbidden("this token belongs to another company"));
        }
        let token = self.claim_token(token_id).await?;
        let result = self.retire_claimed(actor, company, token).await;
        self.release_token(token_id).await;
        result
    }

    async fn retire_claimed(&self, actor: &Actor, company: &Company, mut token: Token) -> AppResult<RetireOutcome> {
        if token.owner_company_id != Some(company.id) {
            return Err(AppError::forbidden("this token belongs to another company"));
        }
        if token.status != TokenStatus::Sold {
            return Err(AppError::validation(format!("a {} token cannot be retired", token.status)));
        }
        let holder = token
            .holder_wallet
            .clone()
            .ok_or_else(|| AppError::validation("token has no holder wallet"))?;

        let now = Utc::now();
        let mut record = TransactionRecord::pending(TransactionKind::BurnToken, token.quantity, Currency::Tcane, now)
            .between(Some(holder.clone()), None)
            .for_user(actor.user.id)
            .with_details(json!({ "co2_equivalent": token.co2_equivalent }));
        record.token_id = Some(token.id);
        record.production_id = Some(token.production_id);
        record.begin_attempt(now)?;
        self.store.insert_transaction(&record).await?;

        let receipt = match self.ledger.burn(&holder, to_base_units(token.quantity)).await {
            Ok(receipt) => receipt.into_chain(self.ledger.network(), Utc::now()),
            Err(e) => {
                tracing::error!(token_id = %token.id, error = %e, "burn failed on the ledger");
                self.record_failure(&mut record, &e).await;
                return Err(e.into());
            }
        };
        let now = Utc::now();
        record.confirm(&receipt, now)?;
        self.store.update_transaction(&record).await?;
        token.retire(now)?;
        self.store.update_token(&token).await?;
        tracing::info!(token_id = %token.id, co2 = token.co2_equivalent, "token retired");
        Ok(RetireOutcome {
            token,
            transaction: record,
        })
    }

    pub async fn update_token_price(&self, actor: &Actor, token_id: Uuid, price_cents: i64) -> AppResult<Token> {
        actor.require_admin()?;
        let mut token = self.claim_token(token_id).await?;
        let result = match token.set_price(price_cents, actor.user.id, Utc::now()) {
            Ok(()) => self.store.update_token(&token).await.map_err(AppError::from),
            Err(e) => Err(e.into()),
        };
        self.release_token(token_id).await;
        result?;
        tracing::info!(token_id = %token.id, price_cents, "token repriced");
        Ok(token)
    }

    pub async fn list_tokens(&self, actor: &Actor, filter: TokenFilter, page: PageRequest) -> AppResult<Paged<Token>> {
        Ok(self.store.list_tokens(&scoped(actor, filter), page).await?)
    }

    pub async fn get_token(&self, actor: &Actor, id: Uuid) -> AppResult<Token> {
        let token = self.load_token(id).await?;
        let allowed = match &actor.profile {
            Profile::Admin => true,
            Profile::Farmer(f) => token.farmer_id == f.id,
            Profile::Mill(m) => token.mill_id == m.id,
            Profile::Company(c) => token.owner_company_id == Some(c.id) || token.status.is_listed(),
        };
        if !allowed {
            return Err(AppError::forbidden("no access to this token"));
        }
        Ok(token)
    }

    pub async fn token_stats(&self, actor: &Actor) -> AppResult<TokenStats> {
        let tokens = self.store.all_tokens(&scoped(actor, TokenFilter::default())).await?;
        Ok(TokenStats::from_records(&tokens))
    }
}
