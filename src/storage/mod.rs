//! Persistence behind the [`MarketStore`] trait.
//!
//! `PgMarketStore` is the production backend; `MemoryStore` keeps everything
//! in process and backs the test suite and the zero-dependency dev server.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgMarketStore;

use crate::domain::footprint::{CarbonFootprint, FootprintStatus};
use crate::domain::production::{Production, ProductionStatus};
use crate::domain::profile::{Company, CompanyStats, Farmer, FarmerStats, Mill, MillStats, Profile};
use crate::domain::token::{Token, TokenStatus};
use crate::domain::transaction::{TransactionKind, TransactionRecord, TransactionStatus};
use crate::domain::user::{Role, User};
use crate::domain::{PageRequest, Paged};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

/// A token claim older than this is considered abandoned and can be taken
/// over, so a crashed request cannot lock a token forever.
pub const TOKEN_CLAIM_TTL_SECS: i64 = 300;

pub fn token_claim_stale_before(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::seconds(TOKEN_CLAIM_TTL_SECS)
}

/// Counter increments for one profile, added by the store to whatever it
/// currently holds.
#[derive(Debug, Clone, PartialEq)]
pub enum StatsDelta {
    Farmer(Uuid, FarmerStats),
    Mill(Uuid, MillStats),
    Company(Uuid, CompanyStats),
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness rule was violated.
    #[error("{0}")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("stored record could not be decoded: {0}")]
    Corrupt(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Default)]
pub struct ProductionFilter {
    pub farmer_id: Option<Uuid>,
    pub mill_id: Option<Uuid>,
    pub status: Option<ProductionStatus>,
    pub season: Option<String>,
    pub delivered_from: Option<NaiveDate>,
    pub delivered_to: Option<NaiveDate>,
}

impl ProductionFilter {
    pub fn matches(&self, p: &Production) -> bool {
        self.farmer_id.map_or(true, |id| p.farmer_id == id)
            && self.mill_id.map_or(true, |id| p.mill_id == id)
            && self.status.map_or(true, |s| p.status == s)
            && self.season.as_deref().map_or(true, |s| p.season == s)
            && self.delivered_from.map_or(true, |d| p.delivered_on >= d)
            && self.delivered_to.map_or(true, |d| p.delivered_on <= d)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TokenOrder {
    #[default]
    Newest,
    /// Lowest unit price first; the catalog ordering.
    Cheapest,
}

#[derive(Debug, Clone, Default)]
pub struct TokenFilter {
    /// Empty means any status.
    pub statuses: Vec<TokenStatus>,
    pub farmer_id: Option<Uuid>,
    pub mill_id: Option<Uuid>,
    pub owner_company_id: Option<Uuid>,
    pub production_id: Option<Uuid>,
    pub holder_wallet: Option<String>,
    pub price_min_cents: Option<i64>,
    pub price_max_cents: Option<i64>,
    pub co2_min: Option<f64>,
    pub co2_max: Option<f64>,
    pub season: Option<String>,
    /// Case-insensitive match against the farmer's municipality or department.
    pub region: Option<String>,
    /// Only tokens whose expiry lies after this instant.
    pub unexpired_at: Option<DateTime<Utc>>,
    pub order: TokenOrder,
}

impl TokenFilter {
    pub fn listed(now: DateTime<Utc>) -> Self {
        Self {
            statuses: vec![TokenStatus::Minted, TokenStatus::Available],
            unexpired_at: Some(now),
            order: TokenOrder::Cheapest,
            ..Self::default()
        }
    }

    /// Every criterion except `region`, which needs the farmer record.
    pub fn matches(&self, t: &Token) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&t.status))
            && self.farmer_id.map_or(true, |id| t.farmer_id == id)
            && self.mill_id.map_or(true, |id| t.mill_id == id)
            && self.owner_company_id.map_or(true, |id| t.owner_company_id == Some(id))
            && self.production_id.map_or(true, |id| t.production_id == id)
            && self
                .holder_wallet
                .as_deref()
                .map_or(true, |w| t.holder_wallet.as_deref() == Some(w))
            && self.price_min_cents.map_or(true, |v| t.price_cents >= v)
            && self.price_max_cents.map_or(true, |v| t.price_cents <= v)
            && self.co2_min.map_or(true, |v| t.co2_equivalent >= v)
            && self.co2_max.map_or(true, |v| t.co2_equivalent <= v)
            && self.season.as_deref().map_or(true, |s| t.season == s)
            && self.unexpired_at.map_or(true, |now| t.expires_at > now)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub kind: Option<TransactionKind>,
    pub status: Option<TransactionStatus>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    /// Restricts to records initiated by this user or touching this wallet.
    pub involving: Option<(Uuid, Option<String>)>,
}

impl TransactionFilter {
    pub fn matches(&self, t: &TransactionRecord) -> bool {
        self.kind.map_or(true, |k| t.kind == k)
            && self.status.map_or(true, |s| t.status == s)
            && self.created_from.map_or(true, |d| t.created_at >= d)
            && self.created_to.map_or(true, |d| t.created_at <= d)
            && self
                .involving
                .as_ref()
                .map_or(true, |(user, wallet)| t.involves(*user, wallet.as_deref()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FootprintFilter {
    pub company_id: Option<Uuid>,
    pub year: Option<i32>,
    pub status: Option<FootprintStatus>,
}

impl FootprintFilter {
    pub fn matches(&self, f: &CarbonFootprint) -> bool {
        self.company_id.map_or(true, |id| f.company_id == id)
            && self.year.map_or(true, |y| f.year == y)
            && self.status.map_or(true, |s| f.status == s)
    }
}

#[async_trait]
pub trait MarketStore: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    // accounts -------------------------------------------------------------

    /// Inserts a user together with its profile, atomically.
    async fn insert_account(&self, user: &User, profile: &Profile) -> StoreResult<()>;
    async fn user_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn update_user(&self, user: &User) -> StoreResult<()>;
    async fn list_users(&self, role: Option<Role>) -> StoreResult<Vec<User>>;

    /// The profile owned by `user`. Admins always get `Profile::Admin`.
    async fn profile_of(&self, user: &User) -> StoreResult<Profile>;
    /// Writes every profile field except the stats counters, which only
    /// change through [`MarketStore::add_stats`].
    async fn save_profile(&self, profile: &Profile) -> StoreResult<()>;
    async fn add_stats(&self, delta: &StatsDelta) -> StoreResult<()>;
    async fn farmer(&self, id: Uuid) -> StoreResult<Option<Farmer>>;
    async fn mill(&self, id: Uuid) -> StoreResult<Option<Mill>>;
    async fn company(&self, id: Uuid) -> StoreResult<Option<Company>>;
    async fn list_farmers(&self, mill_id: Option<Uuid>) -> StoreResult<Vec<Farmer>>;
    async fn list_mills(&self) -> StoreResult<Vec<Mill>>;
    async fn list_companies(&self) -> StoreResult<Vec<Company>>;

    // productions ----------------------------------------------------------

    async fn insert_production(&self, production: &Production) -> StoreResult<()>;
    async fn production(&self, id: Uuid) -> StoreResult<Option<Production>>;
    /// Writes the production without touching its mint claim.
    async fn update_production(&self, production: &Production) -> StoreResult<()>;
    /// Like `update_production`, but only while nobody holds the mint claim.
    /// Returns `false` when the claim is taken.
    async fn update_production_unclaimed(&self, production: &Production) -> StoreResult<bool>;
    async fn list_productions(&self, filter: &ProductionFilter, page: PageRequest) -> StoreResult<Paged<Production>>;
    async fn all_productions(&self, filter: &ProductionFilter) -> StoreResult<Vec<Production>>;

    /// Atomically marks a `validated`, unclaimed production as being minted.
    /// Returns `false` when another caller already holds the claim or the
    /// production is not in `validated`.
    async fn claim_mint(&self, production_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool>;
    async fn release_mint(&self, production_id: Uuid) -> StoreResult<()>;

    // tokens ---------------------------------------------------------------

    /// Fails with `Conflict` when a token already exists for the production.
    async fn insert_token(&self, token: &Token) -> StoreResult<()>;
    async fn token(&self, id: Uuid) -> StoreResult<Option<Token>>;
    async fn update_token(&self, token: &Token) -> StoreResult<()>;

    /// Atomically marks a token as busy with a ledger operation. Returns
    /// `false` when the token does not exist or holds a claim younger than
    /// [`TOKEN_CLAIM_TTL_SECS`].
    async fn claim_token(&self, token_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool>;
    async fn release_token(&self, token_id: Uuid) -> StoreResult<()>;
    async fn list_tokens(&self, filter: &TokenFilter, page: PageRequest) -> StoreResult<Paged<Token>>;
    async fn all_tokens(&self, filter: &TokenFilter) -> StoreResult<Vec<Token>>;

    // transactions ---------------------------------------------------------

    async fn insert_transaction(&self, record: &TransactionRecord) -> StoreResult<()>;
    async fn update_transaction(&self, record: &TransactionRecord) -> StoreResult<()>;
    async fn list_transactions(&self, filter: &TransactionFilter, page: PageRequest) -> StoreResult<Paged<TransactionRecord>>;
    async fn all_transactions(&self, filter: &TransactionFilter) -> StoreResult<Vec<TransactionRecord>>;

    // footprints -----------------------------------------------------------

    /// Fails with `Conflict` on a second footprint for the same company, year
    /// and period.
    async fn insert_footprint(&self, footprint: &CarbonFootprint) -> StoreResult<()>;
    async fn footprint(&self, id: Uuid) -> StoreResult<Option<CarbonFootprint>>;
    async fn update_footprint(&self, footprint: &CarbonFootprint) -> StoreResult<()>;
    async fn list_footprints(&self, filter: &FootprintFilter) -> StoreResult<Vec<CarbonFootprint>>;
}
