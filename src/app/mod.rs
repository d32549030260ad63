//! Application services.
//!
//! [`Marketplace`] owns the injected store and ledger and exposes one method
//! per operation. Every method that needs an identity takes the caller's
//! [`Actor`] and checks role and ownership before touching either backend.

pub mod accounts;
pub mod auth;
pub mod catalog;
pub mod dashboard;
pub mod footprint;
pub mod minting;
pub mod production;
pub mod rate_limit;

use crate::domain::production::Production;
use crate::domain::profile::{Company, Farmer, Mill, Profile};
use crate::domain::token::Token;
use crate::domain::user::{Role, User};
use crate::error::{AppError, AppResult};
use crate::infra::config::{AppConfig, AuthConfig, LedgerConfig, MarketConfig, StorageConfig};
use crate::infra::ledger::{InMemoryLedger, LedgerClient, SolanaLedger};
use crate::storage::{MarketStore, MemoryStore, PgMarketStore};
use auth::SessionKeys;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// The authenticated caller of an operation.
#[derive(Debug, Clone, Serialize)]
pub struct Actor {
    pub user: User,
    pub profile: Profile,
}

impl Actor {
    pub fn role(&self) -> Role {
        self.user.role
    }

    pub fn is_admin(&self) -> bool {
        self.user.is_admin()
    }

    pub fn require_admin(&self) -> AppResult<()> {
        if !self.is_admin() {
            return Err(AppError::forbidden("this operation is reserved to administrators"));
        }
        Ok(())
    }

    pub fn as_farmer(&self) -> AppResult<&Farmer> {
        match &self.profile {
            Profile::Farmer(f) => Ok(f),
            _ => Err(AppError::forbidden("this operation is reserved to farmers")),
        }
    }

    pub fn as_mill(&self) -> AppResult<&Mill> {
        match &self.profile {
            Profile::Mill(m) => Ok(m),
            _ => Err(AppError::forbidden("this operation is reserved to mills")),
        }
    }

    pub fn as_company(&self) -> AppResult<&Company> {
        match &self.profile {
            Profile::Company(c) => Ok(c),
            _ => Err(AppError::forbidden("this operation is reserved to companies")),
        }
    }

    pub fn wallet(&self) -> Option<&str> {
        self.user.wallet_address.as_deref()
    }
}

pub struct Marketplace {
    store: Arc<dyn MarketStore>,
    ledger: Arc<dyn LedgerClient>,
    sessions: SessionKeys,
    market: MarketConfig,
}

impl Marketplace {
    pub fn new(
        store: Arc<dyn MarketStore>,
        ledger: Arc<dyn LedgerClient>,
        auth: &AuthConfig,
        market: MarketConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            sessions: SessionKeys::new(&auth.jwt_secret, auth.jwt_expiry_secs),
            market,
        }
    }

    /// Builds the backends named by the configuration. Postgres gets its
    /// schema created before the service is handed out.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn MarketStore> = match &config.storage {
            StorageConfig::Postgres { url, max_connections } => {
                let store = PgMarketStore::connect(url, *max_connections).await?;
                store.migrate().await?;
                Arc::new(store)
            }
            StorageConfig::Memory => {
                tracing::warn!("DATABASE_URL not set, using the in-memory store");
                Arc::new(MemoryStore::new())
            }
        };
        let ledger: Arc<dyn LedgerClient> = match &config.ledger {
            LedgerConfig::Solana(solana) => Arc::new(SolanaLedger::from_config(solana)?),
            LedgerConfig::Memory => Arc::new(InMemoryLedger::new()),
        };
        tracing::info!(network = ledger.network(), "ledger backend ready");
        Ok(Self::new(store, ledger, &config.auth, config.market.clone()))
    }

    pub fn market(&self) -> &MarketConfig {
        &self.market
    }

    pub fn ledger_network(&self) -> &str {
        self.ledger.network()
    }

    pub async fn ping(&self) -> AppResult<()> {
        self.store.ping().await?;
        Ok(())
    }

    async fn load_production(&self, id: Uuid) -> AppResult<Production> {
        self.store
            .production(id)
            .await?
            .ok_or_else(|| AppError::not_found("production", id))
    }

    async fn load_token(&self, id: Uuid) -> AppResult<Token> {
        self.store
            .token(id)
            .await?
            .ok_or_else(|| AppError::not_found("token", id))
    }

    /// Claims a token for an operation that goes through the ledger and
    /// returns its state as of the claim. Fails with `Conflict` while another
    /// operation holds the token. Every successful call must be paired with
    /// `release_token`.
    async fn claim_token(&self, id: Uuid) -> AppResult<Token> {
        if !self.store.claim_token(id, Utc::now()).await? {
            self.load_token(id).await?;
            tracing::warn!(token_id = %id, "token claim refused, another operation is in flight");
            return Err(AppError::Conflict(format!("token {} is busy with another operation", id)));
        }
        match self.load_token(id).await {
            Ok(token) => Ok(token),
            Err(e) => {
                self.release_token(id).await;
                Err(e)
            }
        }
    }

    async fn release_token(&self, id: Uuid) {
        if let Err(e) = self.store.release_token(id).await {
            tracing::error!(token_id = %id, error = %e, "failed to release token claim");
        }
    }

    async fn load_farmer(&self, id: Uuid) -> AppResult<Farmer> {
        self.store
            .farmer(id)
            .await?
            .ok_or_else(|| AppError::not_found("farmer", id))
    }

    async fn load_mill(&self, id: Uuid) -> AppResult<Mill> {
        self.store
            .mill(id)
            .await?
            .ok_or_else(|| AppError::not_found("mill", id))
    }

    async fn load_company(&self, id: Uuid) -> AppResult<Company> {
        self.store
            .company(id)
            .await?
            .ok_or_else(|| AppError::not_found("company", id))
    }

    async fn load_user(&self, id: Uuid) -> AppResult<User> {
        self.store
            .user_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("user", id))
    }
}

#[cfg(test)]
pub(crate) mod testkit {
    //! Service-level fixtures shared by the app unit tests.

    use super::*;
    use crate::domain::profile::fixtures::{company_json, farmer_json, mill_json};
    use crate::domain::user::validate_wallet_address;
    use crate::infra::config::AppConfig;
    use auth::{Registration, Session};
    use serde_json::Value as JsonValue;

    pub const SECRET: &str = "unit-test-secret-unit-test-secret!!";

    pub struct Kit {
        pub market: Marketplace,
        pub ledger: Arc<InMemoryLedger>,
    }

    /// Deterministic wallet address derived from a seed character.
    pub fn wallet(seed: char) -> String {
        let w = format!("G{}", seed.to_string().repeat(55));
        debug_assert!(validate_wallet_address(&w).is_ok());
        w
    }

    pub fn kit() -> Kit {
        kit_with(InMemoryLedger::new())
    }

    pub fn kit_with(ledger: InMemoryLedger) -> Kit {
        let config = AppConfig::in_memory(SECRET);
        let ledger = Arc::new(ledger);
        let market = Marketplace::new(
            Arc::new(MemoryStore::new()),
            ledger.clone(),
            &config.auth,
            config.market.clone(),
        );
        Kit { market, ledger }
    }

    impl Kit {
        pub async fn register(&self, email: &str, role: Role, profile: JsonValue) -> Actor {
            let session: Session = self
                .market
                .register(Registration {
                    email: email.to_string(),
                    password: "secreto123".to_string(),
                    role,
                    profile,
                })
                .await
                .unwrap();
            self.market.authenticate(&session.token).await.unwrap()
        }

        pub async fn mill(&self, tag: &str) -> Actor {
            self.register(&format!("{}@ingenio.co", tag), Role::Mill, mill_json(&format!("NIT-{}", tag)))
                .await
        }

        pub async fn farmer(&self, tag: &str, mill: &Actor, wallet_seed: Option<char>) -> Actor {
            let mill_id = mill.profile.id().unwrap();
            let actor = self
                .register(&format!("{}@finca.co", tag), Role::Farmer, farmer_json(mill_id, &format!("CC-{}", tag)))
                .await;
            match wallet_seed {
                Some(seed) => {
                    self.market.update_wallet(&actor, &wallet(seed)).await.unwrap();
                    self.refresh(&actor).await
                }
                None => actor,
            }
        }

        pub async fn company(&self, tag: &str, wallet_seed: char) -> Actor {
            let actor = self
                .register(&format!("{}@empresa.co", tag), Role::Company, company_json(&format!("NIT-C-{}", tag)))
                .await;
            self.market.update_wallet(&actor, &wallet(wallet_seed)).await.unwrap();
            self.refresh(&actor).await
        }

        pub async fn admin(&self) -> Actor {
            self.market
                .seed_admin("admin@tcane.co", "admin-password")
                .await
                .unwrap();
            let session = self.market.login("admin@tcane.co", "admin-password").await.unwrap();
            self.market.authenticate(&session.token).await.unwrap()
        }

        /// Reloads the actor after its user or profile changed.
        pub async fn refresh(&self, actor: &Actor) -> Actor {
            let user = self.market.store.user_by_id(actor.user.id).await.unwrap().unwrap();
            let profile = self.market.store.profile_of(&user).await.unwrap();
            Actor { user, profile }
        }
    }
}
