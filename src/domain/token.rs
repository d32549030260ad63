//! tCANE carbon-credit tokens.

use crate::domain::production::{token_value_cents, Production};
use crate::domain::split::Distribution;
use crate::domain::transaction::ChainReceipt;
use crate::domain::{invalid, round6, DomainError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

pub const DEFAULT_VALIDITY_DAYS: i64 = 5 * 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Generated,
    Minted,
    Available,
    /// Moved in full to a wallet outside the marketplace.
    Reserved,
    Sold,
    Retired,
    Expired,
}

impl TokenStatus {
    pub const ALL: [TokenStatus; 7] = [
        TokenStatus::Generated,
        TokenStatus::Minted,
        TokenStatus::Available,
        TokenStatus::Reserved,
        TokenStatus::Sold,
        TokenStatus::Retired,
        TokenStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Generated => "generated",
            TokenStatus::Minted => "minted",
            TokenStatus::Available => "available",
            TokenStatus::Reserved => "reserved",
            TokenStatus::Sold => "sold",
            TokenStatus::Retired => "retired",
            TokenStatus::Expired => "expired",
        }
    }

    /// States a company can buy from.
    pub fn is_listed(&self) -> bool {
        matches!(self, TokenStatus::Minted | TokenStatus::Available)
    }

    pub fn can_move_to(&self, next: TokenStatus) -> bool {
        use TokenStatus::*;
        matches!(
            (self, next),
            (Generated, Minted)
                | (Minted, Available)
                | (Minted, Reserved)
                | (Minted, Sold)
                | (Minted, Expired)
                | (Available, Reserved)
                | (Available, Sold)
                | (Available, Expired)
                | (Sold, Retired)
        )
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TokenStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| invalid(format!("unknown token status '{}'", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price_cents: i64,
    pub changed_at: DateTime<Utc>,
    pub changed_by: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleInfo {
    pub company_id: Uuid,
    pub wallet: String,
    pub price_cents: i64,
    pub value_cents: i64,
    pub tx_hash: String,
    pub sold_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: Uuid,
    pub code: String,
    /// Identifier assigned by the ledger; set only after a successful mint.
    pub ledger_token_id: Option<String>,
    pub production_id: Uuid,
    pub farmer_id: Uuid,
    pub mill_id: Uuid,
    pub owner_company_id: Option<Uuid>,
    pub holder_wallet: Option<String>,
    pub quantity: f64,
    pub co2_equivalent: f64,
    pub base_price_cents: i64,
    pub price_cents: i64,
    pub value_cents: i64,
    pub season: String,
    pub status: TokenStatus,
    pub minted_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
    pub chain: Option<ChainReceipt>,
    pub sale: Option<SaleInfo>,
    pub distribution: Distribution,
    pub price_history: Vec<PricePoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn token_code(production_id: Uuid, now: DateTime<Utc>) -> String {
    format!("tCANE_{}_{}", production_id.simple(), now.timestamp_millis())
}

impl Token {
    /// The token record for a production whose mint the ledger just confirmed.
    pub fn minted(
        production: &Production,
        ledger_token_id: String,
        holder_wallet: String,
        receipt: ChainReceipt,
        validity: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: token_code(production.id, now),
            ledger_token_id: Some(ledger_token_id),
            production_id: production.id,
            farmer_id: production.farmer_id,
            mill_id: production.mill_id,
            owner_company_id: None,
            holder_wallet: Some(holder_wallet),
            quantity: production.tokens_generated,
            co2_equivalent: production.co2_equivalent,
            base_price_cents: production.token_price_cents,
            price_cents: production.token_price_cents,
            value_cents: production.value_cents,
            season: production.season.clone(),
            status: TokenStatus::Minted,
            minted_at: Some(now),
            expires_at: now + validity,
            retired_at: None,
            chain: Some(receipt),
            sale: None,
            distribution: production.distribution.clone(),
            price_history: vec![PricePoint {
                price_cents: production.token_price_cents,
                changed_at: now,
                changed_by: None,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: TokenStatus, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.status.can_move_to(next) {
            return Err(DomainError::Transition {
                entity: "token",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Moves a listed token past its expiry into `expired`. Returns whether
    /// anything changed.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_listed() && self.is_expired(now) {
            self.status = TokenStatus::Expired;
            self.updated_at = now;
            return true;
        }
        false
    }

    /// Reprices the token. A minted token becomes `available` on its first
    /// repricing.
    pub fn set_price(&mut self, price_cents: i64, changed_by: Uuid, now: DateTime<Utc>) -> Result<(), DomainError> {
        if price_cents <= 0 {
            return Err(invalid("price must be greater than zero"));
        }
        if !self.status.is_listed() {
            return Err(invalid(format!("a {} token cannot be repriced", self.status)));
        }
        if self.status == TokenStatus::Minted {
            self.transition(TokenStatus::Available, now)?;
        }
        if price_cents != self.price_cents {
            self.price_history.push(PricePoint {
                price_cents,
                changed_at: now,
                changed_by: Some(changed_by),
            });
        }
        self.price_cents = price_cents;
        self.value_cents = token_value_cents(self.quantity, price_cents);
        self.distribution = self.distribution.rebased(self.value_cents);
        self.updated_at = now;
        Ok(())
    }

    /// Takes `amount` out of the current holding. A partial transfer shrinks
    /// the token; a full one hands it to the new wallet, moving a listed
    /// token to `reserved` and leaving a sold one `sold`.
    ///
    /// The value and revenue split of a sold token belong to its sale and are
    /// left untouched, paid shares included.
    pub fn transfer_out(&mut self, amount: f64, to_wallet: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.status.is_listed() && self.status != TokenStatus::Sold {
            return Err(invalid(format!("a {} token cannot be transferred", self.status)));
        }
        if !(amount > 0.0) {
            return Err(invalid("transfer amount must be greater than zero"));
        }
        if amount > self.quantity + 1e-9 {
            return Err(invalid(format!(
                "transfer amount {} exceeds the token quantity {}",
                amount, self.quantity
            )));
        }
        let remaining = round6(self.quantity - amount);
        if remaining <= 0.0 {
            if self.status == TokenStatus::Sold {
                self.updated_at = now;
            } else {
                self.transition(TokenStatus::Reserved, now)?;
            }
            self.holder_wallet = Some(to_wallet.to_string());
            return Ok(());
        }
        let ratio = remaining / self.quantity;
        self.quantity = remaining;
        self.co2_equivalent = round6(self.co2_equivalent * ratio);
        if self.status != TokenStatus::Sold {
            self.value_cents = token_value_cents(remaining, self.price_cents);
            self.distribution = self.distribution.rebased(self.value_cents);
        }
        self.updated_at = now;
        Ok(())
    }

    /// Records the sale to a company. The distribution is recomputed from the
    /// sale value with the percentages fixed when the token was created.
    pub fn sell(&mut self, company_id: Uuid, wallet: &str, tx_hash: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(TokenStatus::Sold, now)?;
        self.owner_company_id = Some(company_id);
        self.holder_wallet = Some(wallet.to_string());
        self.distribution = self.distribution.rebased(self.value_cents);
        self.sale = Some(SaleInfo {
            company_id,
            wallet: wallet.to_string(),
            price_cents: self.price_cents,
            value_cents: self.value_cents,
            tx_hash: tx_hash.to_string(),
            sold_at: now,
        });
        Ok(())
    }

    pub fn retire(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(TokenStatus::Retired, now)?;
        self.retired_at = Some(now);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatusTally {
    pub count: u64,
    pub quantity: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TokenStats {
    pub count: u64,
    pub total_quantity: f64,
    pub total_co2: f64,
    pub total_value_cents: i64,
    pub by_status: BTreeMap<TokenStatus, StatusTally>,
}

impl TokenStats {
    pub fn from_records(tokens: &[Token]) -> Self {
        let mut stats = TokenStats::default();
        for t in tokens {
            stats.count += 1;
            stats.total_quantity += t.quantity;
            stats.total_co2 += t.co2_equivalent;
            stats.total_value_cents += t.value_cents;
            let tally = stats.by_status.entry(t.status).or_default();
            tally.count += 1;
            tally.quantity = round6(tally.quantity + t.quantity);
        }
        stats.total_quantity = round6(stats.total_quantity);
        stats.total_co2 = round6(stats.total_co2);
        stats
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::domain::production::{fixtures::input, Tokenomics};

    pub fn receipt() -> ChainReceipt {
        ChainReceipt {
            tx_hash: "9f2c".into(),
            ledger: 1,
            network: "memory".into(),
            recorded_at: Utc::now(),
        }
    }

    pub fn minted_token(tonnage: f64) -> Token {
        let now = Utc::now();
        let production = Production::register(input(Uuid::new_v4(), tonnage), Uuid::new_v4(), &Tokenomics::default(), now);
        Token::minted(
            &production,
            "mem-1".into(),
            "GFARMER".into(),
            receipt(),
            Duration::days(DEFAULT_VALIDITY_DAYS),
            now,
        )
    }
}
