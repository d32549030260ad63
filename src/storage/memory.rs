//! In-process store. Enforces the same uniqueness rules as the Postgres
//! schema so both backends fail the same way.

use super::{
    token_claim_stale_before, FootprintFilter, MarketStore, ProductionFilter, StatsDelta, StoreError, StoreResult,
    TokenFilter, TokenOrder, TransactionFilter,
};
use crate::domain::footprint::CarbonFootprint;
use crate::domain::production::{Production, ProductionStatus};
use crate::domain::profile::{Company, Farmer, Mill, Profile};
use crate::domain::token::Token;
use crate::domain::transaction::TransactionRecord;
use crate::domain::user::{Role, User};
use crate::domain::{PageRequest, Paged};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    farmers: HashMap<Uuid, Farmer>,
    mills: HashMap<Uuid, Mill>,
    companies: HashMap<Uuid, Company>,
    productions: HashMap<Uuid, Production>,
    tokens: HashMap<Uuid, Token>,
    token_claims: HashMap<Uuid, DateTime<Utc>>,
    transactions: HashMap<Uuid, TransactionRecord>,
    footprints: HashMap<Uuid, CarbonFootprint>,
}

impl Tables {
    fn check_profile_unique(&self, profile: &Profile) -> StoreResult<()> {
        match profile {
            Profile::Farmer(f) => {
                if self
                    .farmers
                    .values()
                    .any(|o| o.id != f.id && o.national_id == f.national_id)
                {
                    return Err(StoreError::Conflict(format!(
                        "a farmer with national id {} already exists",
                        f.national_id
                    )));
                }
            }
            Profile::Mill(m) => {
                if self.mills.values().any(|o| o.id != m.id && o.tax_id == m.tax_id) {
                    return Err(StoreError::Conflict(format!("a mill with tax id {} already exists", m.tax_id)));
                }
            }
            Profile::Company(c) => {
                if self.companies.values().any(|o| o.id != c.id && o.tax_id == c.tax_id) {
                    return Err(StoreError::Conflict(format!(
                        "a company with tax id {} already exists",
                        c.tax_id
                    )));
                }
            }
            Profile::Admin => {}
        }
        Ok(())
    }

    /// Carries the stored counters over to an incoming profile.
    fn keep_stats(&self, profile: &Profile) -> Profile {
        let mut profile = profile.clone();
        match &mut profile {
            Profile::Farmer(f) => {
                if let Some(old) = self.farmers.get(&f.id) {
                    f.stats = old.stats.clone();
                }
            }
            Profile::Mill(m) => {
                if let Some(old) = self.mills.get(&m.id) {
                    m.stats = old.stats.clone();
                }
            }
            Profile::Company(c) => {
                if let Some(old) = self.companies.get(&c.id) {
                    c.stats = old.stats.clone();
                }
            }
            Profile::Admin => {}
        }
        profile
    }

    fn put_profile(&mut self, profile: &Profile) {
        match profile {
            Profile::Farmer(f) => {
                self.farmers.insert(f.id, f.clone());
            }
            Profile::Mill(m) => {
                self.mills.insert(m.id, m.clone());
            }
            Profile::Company(c) => {
                self.companies.insert(c.id, c.clone());
            }
            Profile::Admin => {}
        }
    }

    fn token_matches(&self, filter: &TokenFilter, token: &Token) -> bool {
        if !filter.matches(token) {
            return false;
        }
        match &filter.region {
            None => true,
            Some(region) => self
                .farmers
                .get(&token.farmer_id)
                .is_some_and(|f| f.location.matches_region(region)),
        }
    }

    fn tokens_matching(&self, filter: &TokenFilter) -> Vec<Token> {
        let mut tokens: Vec<Token> = self
            .tokens
            .values()
            .filter(|t| self.token_matches(filter, t))
            .cloned()
            .collect();
        match filter.order {
            TokenOrder::Newest => tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            TokenOrder::Cheapest => tokens.sort_by(|a, b| {
                a.price_cents
                    .cmp(&b.price_cents)
                    .then(b.created_at.cmp(&a.created_at))
            }),
        }
        tokens
    }
}

fn newest_first<T>(mut items: Vec<T>, created: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    items.sort_by_key(|item| std::cmp::Reverse(created(item)));
    items
}

fn missing(what: &str, id: Uuid) -> StoreError {
    StoreError::NotFound(format!("{} {}", what, id))
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MarketStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn insert_account(&self, user: &User, profile: &Profile) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        if t.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict(format!("email {} is already registered", user.email)));
        }
        t.check_profile_unique(profile)?;
        t.users.insert(user.id, user.clone());
        t.put_profile(profile);
        Ok(())
    }

    async fn user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let t = self.tables.lock().await;
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        match t.users.get_mut(&user.id) {
            Some(slot) => {
                *slot = user.clone();
                Ok(())
            }
            None => Err(missing("user", user.id)),
        }
    }

    async fn list_users(&self, role: Option<Role>) -> StoreResult<Vec<User>> {
        let t = self.tables.lock().await;
        let users = t
            .users
            .values()
            .filter(|u| role.map_or(true, |r| u.role == r))
            .cloned()
            .collect();
        Ok(newest_first(users, |u: &User| u.created_at))
    }

    async fn profile_of(&self, user: &User) -> StoreResult<Profile> {
        let t = self.tables.lock().await;
        let profile = match user.role {
            Role::Admin => Some(Profile::Admin),
            Role::Farmer => t
                .farmers
                .values()
                .find(|f| f.user_id == user.id)
                .cloned()
                .map(Profile::Farmer),
            Role::Mill => t.mills.values().find(|m| m.user_id == user.id).cloned().map(Profile::Mill),
            Role::Company => t
                .companies
                .values()
                .find(|c| c.user_id == user.id)
                .cloned()
                .map(Profile::Company),
        };
        profile.ok_or_else(|| StoreError::NotFound(format!("{} profile of user {}", user.role, user.id)))
    }

    async fn save_profile(&self, profile: &Profile) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        t.check_profile_unique(profile)?;
        let profile = t.keep_stats(profile);
        t.put_profile(&profile);
        Ok(())
    }

    async fn add_stats(&self, delta: &StatsDelta) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        match delta {
            StatsDelta::Farmer(id, d) => {
                let farmer = t.farmers.get_mut(id).ok_or_else(|| missing("farmer", *id))?;
                farmer.stats.add(d);
            }
            StatsDelta::Mill(id, d) => {
                let mill = t.mills.get_mut(id).ok_or_else(|| missing("mill", *id))?;
                mill.stats.add(d);
            }
            StatsDelta::Company(id, d) => {
                let company = t.companies.get_mut(id).ok_or_else(|| missing("company", *id))?;
                company.stats.add(d);
            }
        }
        Ok(())
    }

    async fn farmer(&self, id: Uuid) -> StoreResult<Option<Farmer>> {
        Ok(self.tables.lock().await.farmers.get(&id).cloned())
    }

    async fn mill(&self, id: Uuid) -> StoreResult<Option<Mill>> {
        Ok(self.tables.lock().await.mills.get(&id).cloned())
    }

    async fn company(&self, id: Uuid) -> StoreResult<Option<Company>> {
        Ok(self.tables.lock().await.companies.get(&id).cloned())
    }

    async fn list_farmers(&self, mill_id: Option<Uuid>) -> StoreResult<Vec<Farmer>> {
        let t = self.tables.lock().await;
        let farmers = t
            .farmers
            .values()
            .filter(|f| mill_id.map_or(true, |m| f.mill_id == m))
            .cloned()
            .collect();
        Ok(newest_first(farmers, |f: &Farmer| f.created_at))
    }

    async fn list_mills(&self) -> StoreResult<Vec<Mill>> {
        let t = self.tables.lock().await;
        Ok(newest_first(t.mills.values().cloned().collect(), |m: &Mill| m.created_at))
    }

    async fn list_companies(&self) -> StoreResult<Vec<Company>> {
        let t = self.tables.lock().await;
        Ok(newest_first(t.companies.values().cloned().collect(), |c: &Company| c.created_at))
    }

    async fn insert_production(&self, production: &Production) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        t.productions.insert(production.id, production.clone());
        Ok(())
    }

    async fn production(&self, id: Uuid) -> StoreResult<Option<Production>> {
        Ok(self.tables.lock().await.productions.get(&id).cloned())
    }

    async fn update_production(&self, production: &Production) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        match t.productions.get_mut(&production.id) {
            Some(slot) => {
                let claimed_at = slot.mint_claimed_at;
                *slot = production.clone();
                slot.mint_claimed_at = claimed_at;
                Ok(())
            }
            None => Err(missing("production", production.id)),
        }
    }

    async fn update_production_unclaimed(&self, production: &Production) -> StoreResult<bool> {
        let mut t = self.tables.lock().await;
        let Some(slot) = t.productions.get_mut(&production.id) else {
            return Err(missing("production", production.id));
        };
        if slot.mint_claimed_at.is_some() {
            return Ok(false);
        }
        *slot = production.clone();
        slot.mint_claimed_at = None;
        Ok(true)
    }

    async fn list_productions(&self, filter: &ProductionFilter, page: PageRequest) -> StoreResult<Paged<Production>> {
        Ok(Paged::from_all(self.all_productions(filter).await?, page))
    }

    async fn all_productions(&self, filter: &ProductionFilter) -> StoreResult<Vec<Production>> {
        let t = self.tables.lock().await;
        let rows = t.productions.values().filter(|p| filter.matches(p)).cloned().collect();
        Ok(newest_first(rows, |p: &Production| p.created_at))
    }

    async fn claim_mint(&self, production_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut t = self.tables.lock().await;
        let Some(production) = t.productions.get_mut(&production_id) else {
            return Ok(false);
        };
        if production.status != ProductionStatus::Validated || production.mint_claimed_at.is_some() {
            return Ok(false);
        }
        production.mint_claimed_at = Some(now);
        Ok(true)
    }

    async fn release_mint(&self, production_id: Uuid) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        if let Some(production) = t.productions.get_mut(&production_id) {
            production.mint_claimed_at = None;
        }
        Ok(())
    }

    async fn insert_token(&self, token: &Token) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        if t.tokens.values().any(|o| o.production_id == token.production_id) {
            return Err(StoreError::Conflict(format!(
                "production {} already has a token",
                token.production_id
            )));
        }
        if t.tokens.values().any(|o| o.code == token.code) {
            return Err(StoreError::Conflict(format!("token code {} already exists", token.code)));
        }
        t.tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn token(&self, id: Uuid) -> StoreResult<Option<Token>> {
        Ok(self.tables.lock().await.tokens.get(&id).cloned())
    }

    async fn update_token(&self, token: &Token) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        match t.tokens.get_mut(&token.id) {
            Some(slot) => {
                *slot = token.clone();
                Ok(())
            }
            None => Err(missing("token", token.id)),
        }
    }

    async fn claim_token(&self, token_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut t = self.tables.lock().await;
        if !t.tokens.contains_key(&token_id) {
            return Ok(false);
        }
        let stale_before = token_claim_stale_before(now);
        if t.token_claims.get(&token_id).map_or(false, |at| *at >= stale_before) {
            return Ok(false);
        }
        t.token_claims.insert(token_id, now);
        Ok(true)
    }

    async fn release_token(&self, token_id: Uuid) -> StoreResult<()> {
        self.tables.lock().await.token_claims.remove(&token_id);
        Ok(())
    }

    async fn list_tokens(&self, filter: &TokenFilter, page: PageRequest) -> StoreResult<Paged<Token>> {
        let t = self.tables.lock().await;
        Ok(Paged::from_all(t.tokens_matching(filter), page))
    }

    async fn all_tokens(&self, filter: &TokenFilter) -> StoreResult<Vec<Token>> {
        Ok(self.tables.lock().await.tokens_matching(filter))
    }

    async fn insert_transaction(&self, record: &TransactionRecord) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        t.transactions.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_transaction(&self, record: &TransactionRecord) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        match t.transactions.get_mut(&record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(missing("transaction", record.id)),
        }
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> StoreResult<Paged<TransactionRecord>> {
        Ok(Paged::from_all(self.all_transactions(filter).await?, page))
    }

    async fn all_transactions(&self, filter: &TransactionFilter) -> StoreResult<Vec<TransactionRecord>> {
        let t = self.tables.lock().await;
        let rows = t.transactions.values().filter(|r| filter.matches(r)).cloned().collect();
        Ok(newest_first(rows, |r: &TransactionRecord| r.created_at))
    }

    async fn insert_footprint(&self, footprint: &CarbonFootprint) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        if t.footprints.values().any(|o| {
            o.company_id == footprint.company_id && o.year == footprint.year && o.period == footprint.period
        }) {
            return Err(StoreError::Conflict(format!(
                "a {} footprint for {} already exists",
                footprint.period.as_str(),
                footprint.year
            )));
        }
        t.footprints.insert(footprint.id, footprint.clone());
        Ok(())
    }

    async fn footprint(&self, id: Uuid) -> StoreResult<Option<CarbonFootprint>> {
        Ok(self.tables.lock().await.footprints.get(&id).cloned())
    }

    async fn update_footprint(&self, footprint: &CarbonFootprint) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        match t.footprints.get_mut(&footprint.id) {
            Some(slot) => {
                *slot = footprint.clone();
                Ok(())
            }
            None => Err(missing("footprint", footprint.id)),
        }
    }

    async fn list_footprints(&self, filter: &FootprintFilter) -> StoreResult<Vec<CarbonFootprint>> {
        let t = self.tables.lock().await;
        let mut rows: Vec<CarbonFootprint> = t.footprints.values().filter(|f| filter.matches(f)).cloned().collect();
        rows.sort_by(|a, b| b.year.cmp(&a.year).then(b.created_at.cmp(&a.created_at)));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::production::{fixtures::input, Tokenomics};
    use crate::domain::profile::{fixtures::*, CompanyStats, MillStats, ProfileInput};
    use crate::storage::TOKEN_CLAIM_TTL_SECS;
    use crate::domain::token::fixtures::minted_token;

    fn account(role: Role, email: &str, profile: serde_json::Value) -> (User, Profile) {
        let now = Utc::now();
        let user = User::new(email.into(), "$argon2id$stub".into(), role, now);
        let profile = ProfileInput::from_json(role, profile)
            .unwrap()
            .into_profile(user.id, now);
        (user, profile)
    }

    #[tokio::test]
    async fn duplicate_email_and_tax_id_conflict() {
        let store = MemoryStore::new();
        let (user, profile) = account(Role::Mill, "mill@example.com", mill_json("900-1"));
        store.insert_account(&user, &profile).await.unwrap();

        let (same_email, p2) = account(Role::Mill, "mill@example.com", mill_json("900-2"));
        assert!(matches!(
            store.insert_account(&same_email, &p2).await,
            Err(StoreError::Conflict(_))
        ));
        let (other, same_tax) = account(Role::Mill, "other@example.com", mill_json("900-1"));
        assert!(matches!(
            store.insert_account(&other, &same_tax).await,
            Err(StoreError::Conflict(_))
        ));
        // the failed inserts left nothing behind
        assert!(store.user_by_email("other@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn profile_is_found_by_owning_user() {
        let store = MemoryStore::new();
        let (user, profile) = account(Role::Company, "co@example.com", company_json("800-1"));
        store.insert_account(&user, &profile).await.unwrap();
        let loaded = store.profile_of(&user).await.unwrap();
        assert_eq!(loaded.id(), profile.id());
    }

    #[tokio::test]
    async fn mint_claim_is_granted_once() {
        let store = MemoryStore::new();
        let mut production = Production::register(input(Uuid::new_v4(), 10.0), Uuid::new_v4(), &Tokenomics::default(), Utc::now());
        store.insert_production(&production).await.unwrap();
        // registered productions cannot be claimed
        assert!(!store.claim_mint(production.id, Utc::now()).await.unwrap());

        production.validate(Uuid::new_v4(), Utc::now()).unwrap();
        store.update_production(&production).await.unwrap();
        assert!(store.claim_mint(production.id, Utc::now()).await.unwrap());
        assert!(!store.claim_mint(production.id, Utc::now()).await.unwrap());

        store.release_mint(production.id).await.unwrap();
        assert!(store.claim_mint(production.id, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn production_writes_leave_the_mint_claim_alone() {
        let store = MemoryStore::new();
        let mut production = Production::register(input(Uuid::new_v4(), 10.0), Uuid::new_v4(), &Tokenomics::default(), Utc::now());
        production.validate(Uuid::new_v4(), Utc::now()).unwrap();
        store.insert_production(&production).await.unwrap();
        assert!(store.claim_mint(production.id, Utc::now()).await.unwrap());

        // a copy read before the claim must not clear it
        store.update_production(&production).await.unwrap();
        let stored = store.production(production.id).await.unwrap().unwrap();
        assert!(stored.mint_claimed_at.is_some());

        production.reject("late", Utc::now()).unwrap();
        assert!(!store.update_production_unclaimed(&production).await.unwrap());
        let stored = store.production(production.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProductionStatus::Validated);

        store.release_mint(production.id).await.unwrap();
        assert!(store.update_production_unclaimed(&production).await.unwrap());
        let stored = store.production(production.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProductionStatus::Rejected);
    }

    #[tokio::test]
    async fn token_claim_is_exclusive_until_released_or_stale() {
        let store = MemoryStore::new();
        let token = minted_token(10.0);
        store.insert_token(&token).await.unwrap();
        assert!(!store.claim_token(Uuid::new_v4(), Utc::now()).await.unwrap());

        let now = Utc::now();
        assert!(store.claim_token(token.id, now).await.unwrap());
        assert!(!store.claim_token(token.id, now).await.unwrap());
        store.release_token(token.id).await.unwrap();
        assert!(store.claim_token(token.id, now).await.unwrap());

        let later = now + chrono::Duration::seconds(TOKEN_CLAIM_TTL_SECS + 1);
        assert!(store.claim_token(token.id, later).await.unwrap());
    }

    #[tokio::test]
    async fn stats_are_added_and_survive_profile_saves() {
        let store = MemoryStore::new();
        let (user, profile) = account(Role::Company, "co@example.com", company_json("800-1"));
        store.insert_account(&user, &profile).await.unwrap();
        let Profile::Company(stale) = profile else { unreachable!() };

        let delta = CompanyStats {
            tokens_purchased: 1.5,
            co2_compensated_t: 1.5,
            total_spent_cents: 1_500,
            transaction_count: 1,
        };
        store.add_stats(&StatsDelta::Company(stale.id, delta.clone())).await.unwrap();
        store.add_stats(&StatsDelta::Company(stale.id, delta)).await.unwrap();

        let mut renamed = stale.clone();
        renamed.legal_name = "Renamed SAS".into();
        store.save_profile(&Profile::Company(renamed)).await.unwrap();

        let stored = store.company(stale.id).await.unwrap().unwrap();
        assert_eq!(stored.legal_name, "Renamed SAS");
        assert_eq!(stored.stats.transaction_count, 2);
        assert_eq!(stored.stats.total_spent_cents, 3_000);
        assert_eq!(stored.stats.tokens_purchased, 3.0);
        assert!(matches!(
            store.add_stats(&StatsDelta::Mill(Uuid::new_v4(), MillStats::default())).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn second_token_for_a_production_conflicts() {
        let store = MemoryStore::new();
        let token = minted_token(10.0);
        store.insert_token(&token).await.unwrap();

        let mut again = minted_token(10.0);
        again.production_id = token.production_id;
        assert!(matches!(store.insert_token(&again).await, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn catalog_filter_orders_cheapest_first_and_hides_expired() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut cheap = minted_token(5.0);
        cheap.price_cents = 500;
        let mut pricey = minted_token(5.0);
        pricey.price_cents = 2_000;
        let mut expired = minted_token(5.0);
        expired.price_cents = 100;
        expired.expires_at = now - chrono::Duration::days(1);
        for t in [&cheap, &pricey, &expired] {
            store.insert_token(t).await.unwrap();
        }

        let listed = store.all_tokens(&TokenFilter::listed(now)).await.unwrap();
        let prices: Vec<_> = listed.iter().map(|t| t.price_cents).collect();
        assert_eq!(prices, vec![500, 2_000]);

        let page = store
            .list_tokens(&TokenFilter::listed(now), PageRequest::new(Some(2), Some(1)))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].price_cents, 2_000);
    }
}
