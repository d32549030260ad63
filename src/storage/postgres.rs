//! PostgreSQL backend.
//!
//! Columns that are filtered, joined or constrained are stored as scalars;
//! the full record lives in a `doc` JSONB column next to them. Users are the
//! exception: their password hash never leaves the `users` row as JSON.

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
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        role TEXT NOT NULL,
        wallet_address TEXT,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        email_verified BOOLEAN NOT NULL DEFAULT FALSE,
        last_login_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS mills (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL UNIQUE REFERENCES users(id),
        tax_id TEXT NOT NULL UNIQUE,
        created_at TIMESTAMPTZ NOT NULL,
        doc JSONB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS farmers (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL UNIQUE REFERENCES users(id),
        mill_id UUID NOT NULL REFERENCES mills(id),
        national_id TEXT NOT NULL UNIQUE,
        municipality TEXT NOT NULL,
        department TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        doc JSONB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS companies (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL UNIQUE REFERENCES users(id),
        tax_id TEXT NOT NULL UNIQUE,
        created_at TIMESTAMPTZ NOT NULL,
        doc JSONB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS productions (
        id UUID PRIMARY KEY,
        farmer_id UUID NOT NULL REFERENCES farmers(id),
        mill_id UUID NOT NULL REFERENCES mills(id),
        status TEXT NOT NULL,
        season TEXT NOT NULL,
        delivered_on DATE NOT NULL,
        mint_claimed_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        doc JSONB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS tokens (
        id UUID PRIMARY KEY,
        code TEXT NOT NULL UNIQUE,
        production_id UUID NOT NULL UNIQUE REFERENCES productions(id),
        farmer_id UUID NOT NULL,
        mill_id UUID NOT NULL,
        owner_company_id UUID,
        status TEXT NOT NULL,
        price_cents BIGINT NOT NULL,
        co2_equivalent DOUBLE PRECISION NOT NULL,
        season TEXT NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        claimed_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        doc JSONB NOT NULL
    )",
    "ALTER TABLE tokens ADD COLUMN IF NOT EXISTS claimed_at TIMESTAMPTZ",
    "CREATE TABLE IF NOT EXISTS transactions (
        id UUID PRIMARY KEY,
        kind TEXT NOT NULL,
        status TEXT NOT NULL,
        user_id UUID,
        from_address TEXT,
        to_address TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        doc JSONB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS footprints (
        id UUID PRIMARY KEY,
        company_id UUID NOT NULL REFERENCES companies(id),
        year INTEGER NOT NULL,
        period TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        doc JSONB NOT NULL,
        UNIQUE (company_id, year, period)
    )",
    "CREATE INDEX IF NOT EXISTS productions_mill_idx ON productions (mill_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS tokens_status_idx ON tokens (status, price_cents)",
    "CREATE INDEX IF NOT EXISTS transactions_created_idx ON transactions (created_at DESC)",
];

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => StoreError::Conflict(match db.constraint() {
                Some(constraint) => format!("duplicate value violates {}", constraint),
                None => db.message().to_string(),
            }),
            sqlx::Error::RowNotFound => StoreError::NotFound("row".into()),
            _ => StoreError::Database(e.to_string()),
        }
    }
}

fn doc<T: DeserializeOwned>(row: &PgRow) -> StoreResult<T> {
    let Json(value) = row.try_get::<Json<T>, _>("doc")?;
    Ok(value)
}

fn docs<T: DeserializeOwned>(rows: &[PgRow]) -> StoreResult<Vec<T>> {
    rows.iter().map(doc).collect()
}

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    let role: String = row.try_get("role")?;
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        role: role
            .parse::<Role>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        wallet_address: row.try_get("wallet_address")?,
        active: row.try_get("active")?,
        email_verified: row.try_get("email_verified")?,
        last_login_at: row.try_get("last_login_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn production_from_row(row: &PgRow) -> StoreResult<Production> {
    let mut production: Production = doc(row)?;
    production.mint_claimed_at = row.try_get("mint_claimed_at")?;
    Ok(production)
}

fn expect_one(affected: u64, what: &str, id: Uuid) -> StoreResult<()> {
    if affected == 0 {
        return Err(StoreError::NotFound(format!("{} {}", what, id)));
    }
    Ok(())
}

fn push_page(qb: &mut QueryBuilder<'_, Postgres>, page: PageRequest) {
    qb.push(" LIMIT ")
        .push_bind(page.limit as i64)
        .push(" OFFSET ")
        .push_bind(page.offset() as i64);
}

fn production_query(select: &str, filter: &ProductionFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(select);
    qb.push(" FROM productions WHERE TRUE");
    if let Some(id) = filter.farmer_id {
        qb.push(" AND farmer_id = ").push_bind(id);
    }
    if let Some(id) = filter.mill_id {
        qb.push(" AND mill_id = ").push_bind(id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(season) = &filter.season {
        qb.push(" AND season = ").push_bind(season.clone());
    }
    if let Some(from) = filter.delivered_from {
        qb.push(" AND delivered_on >= ").push_bind(from);
    }
    if let Some(to) = filter.delivered_to {
        qb.push(" AND delivered_on <= ").push_bind(to);
    }
    qb
}

fn token_query(select: &str, filter: &TokenFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(select);
    qb.push(" FROM tokens WHERE TRUE");
    if !filter.statuses.is_empty() {
        let statuses: Vec<String> = filter.statuses.iter().map(|s| s.as_str().to_string()).collect();
        qb.push(" AND status = ANY(").push_bind(statuses).push(")");
    }
    if let Some(id) = filter.farmer_id {
        qb.push(" AND farmer_id = ").push_bind(id);
    }
    if let Some(id) = filter.mill_id {
        qb.push(" AND mill_id = ").push_bind(id);
    }
    if let Some(id) = filter.owner_company_id {
        qb.push(" AND owner_company_id = ").push_bind(id);
    }
    if let Some(id) = filter.production_id {
        qb.push(" AND production_id = ").push_bind(id);
    }
    if let Some(wallet) = &filter.holder_wallet {
        qb.push(" AND doc->>'holder_wallet' = ").push_bind(wallet.clone());
    }
    if let Some(v) = filter.price_min_cents {
        qb.push(" AND price_cents >= ").push_bind(v);
    }
    if let Some(v) = filter.price_max_cents {
        qb.push(" AND price_cents <= ").push_bind(v);
    }
    if let Some(v) = filter.co2_min {
        qb.push(" AND co2_equivalent >= ").push_bind(v);
    }
    if let Some(v) = filter.co2_max {
        qb.push(" AND co2_equivalent <= ").push_bind(v);
    }
    if let Some(season) = &filter.season {
        qb.push(" AND season = ").push_bind(season.clone());
    }
    if let Some(now) = filter.unexpired_at {
        qb.push(" AND expires_at > ").push_bind(now);
    }
    if let Some(region) = &filter.region {
        let pattern = format!("%{}%", region);
        qb.push(" AND EXISTS (SELECT 1 FROM farmers f WHERE f.id = tokens.farmer_id AND (f.municipality ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR f.department ILIKE ")
            .push_bind(pattern)
            .push("))");
    }
    qb
}

fn token_order(order: TokenOrder) -> &'static str {
    match order {
        TokenOrder::Newest => " ORDER BY created_at DESC",
        TokenOrder::Cheapest => " ORDER BY price_cents ASC, created_at DESC",
    }
}

fn transaction_query(select: &str, filter: &TransactionFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(select);
    qb.push(" FROM transactions WHERE TRUE");
    if let Some(kind) = filter.kind {
        qb.push(" AND kind = ").push_bind(kind.as_str());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(from) = filter.created_from {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.created_to {
        qb.push(" AND created_at <= ").push_bind(to);
    }
    if let Some((user_id, wallet)) = &filter.involving {
        qb.push(" AND (user_id = ").push_bind(*user_id);
        if let Some(wallet) = wallet {
            qb.push(" OR from_address = ")
                .push_bind(wallet.clone())
                .push(" OR to_address = ")
                .push_bind(wallet.clone());
        }
        qb.push(")");
    }
    qb
}

#[derive(Clone)]
pub struct PgMarketStore {
    pool: PgPool,
}

impl PgMarketStore {
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates every table and index that does not exist yet.
    pub async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!(statements = SCHEMA.len(), "database schema ensured");
        Ok(())
    }

    async fn count(&self, mut qb: QueryBuilder<'static, Postgres>) -> StoreResult<u64> {
        let total: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(total.max(0) as u64)
    }

    /// Reads a profile document under a row lock, applies `change` and writes
    /// it back in the same transaction.
    async fn locked_doc_update<T, F>(&self, table: &str, id: Uuid, change: F) -> StoreResult<()>
    where
        T: DeserializeOwned + Serialize + Send + Sync,
        F: FnOnce(&mut T) + Send,
    {
        let select = format!("SELECT doc FROM {} WHERE id = $1 FOR UPDATE", table);
        let update = format!("UPDATE {} SET doc = $2 WHERE id = $1", table);
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&select)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", table, id)))?;
        let mut record: T = doc(&row)?;
        change(&mut record);
        sqlx::query(&update)
            .bind(id)
            .bind(Json(&record))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn insert_profile(tx: &mut sqlx::Transaction<'_, Postgres>, profile: &Profile) -> StoreResult<()> {
    match profile {
        Profile::Farmer(f) => {
            sqlx::query(
                "INSERT INTO farmers (id, user_id, mill_id, national_id, municipality, department, created_at, doc)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(f.id)
            .bind(f.user_id)
            .bind(f.mill_id)
            .bind(&f.national_id)
            .bind(&f.location.municipality)
            .bind(&f.location.department)
            .bind(f.created_at)
            .bind(Json(f))
            .execute(&mut **tx)
            .await?;
        }
        Profile::Mill(m) => {
            sqlx::query("INSERT INTO mills (id, user_id, tax_id, created_at, doc) VALUES ($1, $2, $3, $4, $5)")
                .bind(m.id)
                .bind(m.user_id)
                .bind(&m.tax_id)
                .bind(m.created_at)
                .bind(Json(m))
                .execute(&mut **tx)
                .await?;
        }
        Profile::Company(c) => {
            sqlx::query("INSERT INTO companies (id, user_id, tax_id, created_at, doc) VALUES ($1, $2, $3, $4, $5)")
                .bind(c.id)
                .bind(c.user_id)
                .bind(&c.tax_id)
                .bind(c.created_at)
                .bind(Json(c))
                .execute(&mut **tx)
                .await?;
        }
        Profile::Admin => {}
    }
    Ok(())
}

#[async_trait]
impl MarketStore for PgMarketStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_account(&self, user: &User, profile: &Profile) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, role, wallet_address, active, email_verified,
                                last_login_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(&user.wallet_address)
        .bind(user.active)
        .bind(user.email_verified)
        .bind(user.last_login_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await?;
        insert_profile(&mut tx, profile).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, wallet_address = $3, active = $4, email_verified = $5,
                              last_login_at = $6, updated_at = $7
             WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.password_hash)
        .bind(&user.wallet_address)
        .bind(user.active)
        .bind(user.email_verified)
        .bind(user.last_login_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        expect_one(result.rows_affected(), "user", user.id)
    }

    async fn list_users(&self, role: Option<Role>) -> StoreResult<Vec<User>> {
        let mut qb = QueryBuilder::new("SELECT * FROM users WHERE TRUE");
        if let Some(role) = role {
            qb.push(" AND role = ").push_bind(role.as_str());
        }
        qb.push(" ORDER BY created_at DESC");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn profile_of(&self, user: &User) -> StoreResult<Profile> {
        let table = match user.role {
            Role::Admin => return Ok(Profile::Admin),
            Role::Farmer => "farmers",
            Role::Mill => "mills",
            Role::Company => "companies",
        };
        let row = sqlx::query(&format!("SELECT doc FROM {} WHERE user_id = $1", table))
            .bind(user.id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("{} profile of user {}", user.role, user.id)))?;
        Ok(match user.role {
            Role::Farmer => Profile::Farmer(doc(&row)?),
            Role::Mill => Profile::Mill(doc(&row)?),
            Role::Company => Profile::Company(doc(&row)?),
            Role::Admin => Profile::Admin,
        })
    }

    async fn save_profile(&self, profile: &Profile) -> StoreResult<()> {
        let result = match profile {
            Profile::Farmer(f) => {
                sqlx::query(
                    "UPDATE farmers SET municipality = $2, department = $3,
                                        doc = jsonb_set($4, '{stats}', doc -> 'stats')
                     WHERE id = $1",
                )
                .bind(f.id)
                .bind(&f.location.municipality)
                .bind(&f.location.department)
                .bind(Json(f))
                .execute(&self.pool)
                .await?
            }
            Profile::Mill(m) => {
                sqlx::query("UPDATE mills SET doc = jsonb_set($2, '{stats}', doc -> 'stats') WHERE id = $1")
                    .bind(m.id)
                    .bind(Json(m))
                    .execute(&self.pool)
                    .await?
            }
            Profile::Company(c) => {
                sqlx::query("UPDATE companies SET doc = jsonb_set($2, '{stats}', doc -> 'stats') WHERE id = $1")
                    .bind(c.id)
                    .bind(Json(c))
                    .execute(&self.pool)
                    .await?
            }
            Profile::Admin => return Ok(()),
        };
        expect_one(result.rows_affected(), "profile", profile.id().unwrap_or_default())
    }

    async fn add_stats(&self, delta: &StatsDelta) -> StoreResult<()> {
        match delta {
            StatsDelta::Farmer(id, d) => self.locked_doc_update("farmers", *id, |f: &mut Farmer| f.stats.add(d)).await,
            StatsDelta::Mill(id, d) => self.locked_doc_update("mills", *id, |m: &mut Mill| m.stats.add(d)).await,
            StatsDelta::Company(id, d) => self.locked_doc_update("companies", *id, |c: &mut Company| c.stats.add(d)).await,
        }
    }

    async fn farmer(&self, id: Uuid) -> StoreResult<Option<Farmer>> {
        let row = sqlx::query("SELECT doc FROM farmers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(doc).transpose()
    }

    async fn mill(&self, id: Uuid) -> StoreResult<Option<Mill>> {
        let row = sqlx::query("SELECT doc FROM mills WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(doc).transpose()
    }

    async fn company(&self, id: Uuid) -> StoreResult<Option<Company>> {
        let row = sqlx::query("SELECT doc FROM companies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(doc).transpose()
    }

    async fn list_farmers(&self, mill_id: Option<Uuid>) -> StoreResult<Vec<Farmer>> {
        let mut qb = QueryBuilder::new("SELECT doc FROM farmers WHERE TRUE");
        if let Some(mill_id) = mill_id {
            qb.push(" AND mill_id = ").push_bind(mill_id);
        }
        qb.push(" ORDER BY created_at DESC");
        let rows = qb.build().fetch_all(&self.pool).await?;
        docs(&rows)
    }

    async fn list_mills(&self) -> StoreResult<Vec<Mill>> {
        let rows = sqlx::query("SELECT doc FROM mills ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        docs(&rows)
    }

    async fn list_companies(&self) -> StoreResult<Vec<Company>> {
        let rows = sqlx::query("SELECT doc FROM companies ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        docs(&rows)
    }

    async fn insert_production(&self, p: &Production) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO productions (id, farmer_id, mill_id, status, season, delivered_on, mint_claimed_at, created_at, doc)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(p.id)
        .bind(p.farmer_id)
        .bind(p.mill_id)
        .bind(p.status.as_str())
        .bind(&p.season)
        .bind(p.delivered_on)
        .bind(p.mint_claimed_at)
        .bind(p.created_at)
        .bind(Json(p))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn production(&self, id: Uuid) -> StoreResult<Option<Production>> {
        let row = sqlx::query("SELECT doc, mint_claimed_at FROM productions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(production_from_row).transpose()
    }

    async fn update_production(&self, p: &Production) -> StoreResult<()> {
        let result = sqlx::query("UPDATE productions SET status = $2, doc = $3 WHERE id = $1")
            .bind(p.id)
            .bind(p.status.as_str())
            .bind(Json(p))
            .execute(&self.pool)
            .await?;
        expect_one(result.rows_affected(), "production", p.id)
    }

    async fn update_production_unclaimed(&self, p: &Production) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE productions SET status = $2, doc = $3 WHERE id = $1 AND mint_claimed_at IS NULL",
        )
        .bind(p.id)
        .bind(p.status.as_str())
        .bind(Json(p))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.production(p.id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("production {}", p.id))),
        }
    }

    async fn list_productions(&self, filter: &ProductionFilter, page: PageRequest) -> StoreResult<Paged<Production>> {
        let total = self.count(production_query("SELECT COUNT(*)", filter)).await?;
        let mut qb = production_query("SELECT doc, mint_claimed_at", filter);
        qb.push(" ORDER BY created_at DESC");
        push_page(&mut qb, page);
        let rows = qb.build().fetch_all(&self.pool).await?;
        let items = rows.iter().map(production_from_row).collect::<StoreResult<Vec<_>>>()?;
        Ok(Paged::new(items, total, page))
    }

    async fn all_productions(&self, filter: &ProductionFilter) -> StoreResult<Vec<Production>> {
        let mut qb = production_query("SELECT doc, mint_claimed_at", filter);
        qb.push(" ORDER BY created_at DESC");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(production_from_row).collect()
    }

    async fn claim_mint(&self, production_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE productions SET mint_claimed_at = $2
             WHERE id = $1 AND status = $3 AND mint_claimed_at IS NULL",
        )
        .bind(production_id)
        .bind(now)
        .bind(ProductionStatus::Validated.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_mint(&self, production_id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE productions SET mint_claimed_at = NULL WHERE id = $1")
            .bind(production_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_token(&self, t: &Token) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO tokens (id, code, production_id, farmer_id, mill_id, owner_company_id, status,
                                 price_cents, co2_equivalent, season, expires_at, created_at, doc)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(t.id)
        .bind(&t.code)
        .bind(t.production_id)
        .bind(t.farmer_id)
        .bind(t.mill_id)
        .bind(t.owner_company_id)
        .bind(t.status.as_str())
        .bind(t.price_cents)
        .bind(t.co2_equivalent)
        .bind(&t.season)
        .bind(t.expires_at)
        .bind(t.created_at)
        .bind(Json(t))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn token(&self, id: Uuid) -> StoreResult<Option<Token>> {
        let row = sqlx::query("SELECT doc FROM tokens WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(doc).transpose()
    }

    async fn update_token(&self, t: &Token) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE tokens SET owner_company_id = $2, status = $3, price_cents = $4, co2_equivalent = $5,
                               expires_at = $6, doc = $7
             WHERE id = $1",
        )
        .bind(t.id)
        .bind(t.owner_company_id)
        .bind(t.status.as_str())
        .bind(t.price_cents)
        .bind(t.co2_equivalent)
        .bind(t.expires_at)
        .bind(Json(t))
        .execute(&self.pool)
        .await?;
        expect_one(result.rows_affected(), "token", t.id)
    }

    async fn claim_token(&self, token_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE tokens SET claimed_at = $2
             WHERE id = $1 AND (claimed_at IS NULL OR claimed_at < $3)",
        )
        .bind(token_id)
        .bind(now)
        .bind(token_claim_stale_before(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_token(&self, token_id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE tokens SET claimed_at = NULL WHERE id = $1")
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_tokens(&self, filter: &TokenFilter, page: PageRequest) -> StoreResult<Paged<Token>> {
        let total = self.count(token_query("SELECT COUNT(*)", filter)).await?;
        let mut qb = token_query("SELECT doc", filter);
        qb.push(token_order(filter.order));
        push_page(&mut qb, page);
        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(Paged::new(docs(&rows)?, total, page))
    }

    async fn all_tokens(&self, filter: &TokenFilter) -> StoreResult<Vec<Token>> {
        let mut qb = token_query("SELECT doc", filter);
        qb.push(token_order(filter.order));
        let rows = qb.build().fetch_all(&self.pool).await?;
        docs(&rows)
    }

    async fn insert_transaction(&self, r: &TransactionRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO transactions (id, kind, status, user_id, from_address, to_address, created_at, doc)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(r.id)
        .bind(r.kind.as_str())
        .bind(r.status.as_str())
        .bind(r.user_id)
        .bind(&r.from_address)
        .bind(&r.to_address)
        .bind(r.created_at)
        .bind(Json(r))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_transaction(&self, r: &TransactionRecord) -> StoreResult<()> {
        let result = sqlx::query("UPDATE transactions SET status = $2, doc = $3 WHERE id = $1")
            .bind(r.id)
            .bind(r.status.as_str())
            .bind(Json(r))
            .execute(&self.pool)
            .await?;
        expect_one(result.rows_affected(), "transaction", r.id)
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> StoreResult<Paged<TransactionRecord>> {
        let total = self.count(transaction_query("SELECT COUNT(*)", filter)).await?;
        let mut qb = transaction_query("SELECT doc", filter);
        qb.push(" ORDER BY created_at DESC");
        push_page(&mut qb, page);
        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(Paged::new(docs(&rows)?, total, page))
    }

    async fn all_transactions(&self, filter: &TransactionFilter) -> StoreResult<Vec<TransactionRecord>> {
        let mut qb = transaction_query("SELECT doc", filter);
        qb.push(" ORDER BY created_at DESC");
        let rows = qb.build().fetch_all(&self.pool).await?;
        docs(&rows)
    }

    async fn insert_footprint(&self, f: &CarbonFootprint) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO footprints (id, company_id, year, period, status, created_at, doc)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(f.id)
        .bind(f.company_id)
        .bind(f.year)
        .bind(f.period.as_str())
        .bind(f.status.as_str())
        .bind(f.created_at)
        .bind(Json(f))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn footprint(&self, id: Uuid) -> StoreResult<Option<CarbonFootprint>> {
        let row = sqlx::query("SELECT doc FROM footprints WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(doc).transpose()
    }

    async fn update_footprint(&self, f: &CarbonFootprint) -> StoreResult<()> {
        let result = sqlx::query("UPDATE footprints SET status = $2, doc = $3 WHERE id = $1")
            .bind(f.id)
            .bind(f.status.as_str())
            .bind(Json(f))
            .execute(&self.pool)
            .await?;
        expect_one(result.rows_affected(), "footprint", f.id)
    }

    async fn list_footprints(&self, filter: &FootprintFilter) -> StoreResult<Vec<CarbonFootprint>> {
        let mut qb = QueryBuilder::new("SELECT doc FROM footprints WHERE TRUE");
        if let Some(id) = filter.company_id {
            qb.push(" AND company_id = ").push_bind(id);
        }
        if let Some(year) = filter.year {
            qb.push(" AND year = ").push_bind(year);
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        qb.push(" ORDER BY year DESC, created_at DESC");
        let rows = qb.build().fetch_all(&self.pool).await?;
        docs(&rows)
    }
}
