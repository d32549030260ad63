//! Centralized configuration (environment variables + defaults).

use crate::domain::production::{Tokenomics, DEFAULT_CO2_FACTOR, DEFAULT_TOKEN_PRICE_CENTS};
use crate::domain::split::RevenueSplit;
use crate::domain::token::DEFAULT_VALIDITY_DAYS;
use std::env;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

fn var(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub api_version: String,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn api_prefix(&self) -> String {
        format!("/api/{}", self.api_version)
    }
}

#[derive(Debug, Clone)]
pub enum StorageConfig {
    Postgres { url: String, max_connections: u32 },
    Memory,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiry_secs: u64,
    pub seed_admin: Option<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct SolanaConfig {
    pub rpc_url: String,
    pub program_id: String,
    pub keypair_path: String,
    pub network: String,
}

#[derive(Debug, Clone)]
pub enum LedgerConfig {
    Solana(SolanaConfig),
    Memory,
}

#[derive(Debug, Clone)]
pub struct MarketConfig {
    pub tokenomics: Tokenomics,
    pub fund_wallet: Option<String>,
    pub token_validity_days: i64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            tokenomics: Tokenomics::default(),
            fund_wallet: None,
            token_validity_days: DEFAULT_VALIDITY_DAYS,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
    pub max_keys: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 15 * 60,
            max_requests: 100,
            max_keys: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub ledger: LedgerConfig,
    pub market: MarketConfig,
    pub rate_limit: RateLimitConfig,
}

pub const MIN_JWT_SECRET_LEN: usize = 32;

impl AppConfig {
    /// Reads the whole configuration. `.env` is honoured when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let server = ServerConfig {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed("PORT", 3000u16)?,
            api_version: var("API_VERSION").unwrap_or_else(|| "v1".into()),
        };

        let storage = match var("DATABASE_URL") {
            Some(url) => StorageConfig::Postgres {
                url,
                max_connections: parsed("DATABASE_MAX_CONNECTIONS", 5u32)?,
            },
            None => StorageConfig::Memory,
        };

        let jwt_secret = var("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: "JWT_SECRET",
                value: "<redacted>".into(),
                reason: format!("must be at least {} characters", MIN_JWT_SECRET_LEN),
            });
        }
        let auth = AuthConfig {
            jwt_secret,
            jwt_expiry_secs: parsed("JWT_EXPIRES_IN_SECS", 24 * 60 * 60u64)?,
            seed_admin: var("ADMIN_EMAIL").zip(var("ADMIN_PASSWORD")),
        };

        let ledger = match var("LEDGER_BACKEND").as_deref().unwrap_or("memory") {
            "memory" => LedgerConfig::Memory,
            "solana" => LedgerConfig::Solana(SolanaConfig {
                rpc_url: var("SOLANA_RPC_URL").ok_or(ConfigError::Missing("SOLANA_RPC_URL"))?,
                program_id: var("SOLANA_PROGRAM_ID").ok_or(ConfigError::Missing("SOLANA_PROGRAM_ID"))?,
                keypair_path: var("SOLANA_KEYPAIR_PATH").unwrap_or_else(|| "~/.config/solana/id.json".into()),
                network: var("SOLANA_NETWORK").unwrap_or_else(|| "devnet".into()),
            }),
            other => {
                return Err(ConfigError::Invalid {
                    name: "LEDGER_BACKEND",
                    value: other.to_string(),
                    reason: "expected 'solana' or 'memory'".into(),
                })
            }
        };

        let split = RevenueSplit::new(
            parsed("FARMER_SHARE_PCT", 70u8)?,
            parsed("MILL_SHARE_PCT", 20u8)?,
            parsed("FUND_SHARE_PCT", 10u8)?,
        )
        .map_err(|e| ConfigError::Invalid {
            name: "FARMER_SHARE_PCT/MILL_SHARE_PCT/FUND_SHARE_PCT",
            value: String::new(),
            reason: e.to_string(),
        })?;
        let token_price_cents = parsed("TCANE_BASE_PRICE_CENTS", DEFAULT_TOKEN_PRICE_CENTS)?;
        let co2_factor = parsed("CO2_FACTOR_PER_TONNE", DEFAULT_CO2_FACTOR)?;
        if token_price_cents <= 0 || !(co2_factor > 0.0) {
            return Err(ConfigError::Invalid {
                name: "TCANE_BASE_PRICE_CENTS/CO2_FACTOR_PER_TONNE",
                value: format!("{}/{}", token_price_cents, co2_factor),
                reason: "must be positive".into(),
            });
        }
        let market = MarketConfig {
            tokenomics: Tokenomics {
                co2_factor,
                token_price_cents,
                split,
            },
            fund_wallet: var("FUND_WALLET"),
            token_validity_days: parsed("TOKEN_VALIDITY_DAYS", DEFAULT_VALIDITY_DAYS)?,
        };

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            window_secs: parsed("RATE_LIMIT_WINDOW_SECS", defaults.window_secs)?.max(1),
            max_requests: parsed("RATE_LIMIT_MAX_REQUESTS", defaults.max_requests)?.max(1),
            max_keys: parsed("RATE_LIMIT_MAX_KEYS", defaults.max_keys)?.max(1),
        };

        Ok(Self {
            server,
            storage,
            auth,
            ledger,
            market,
            rate_limit,
        })
    }

    /// A self-contained configuration: in-memory store and ledger.
    pub fn in_memory(jwt_secret: impl Into<String>) -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 0,
                api_version: "v1".into(),
            },
            storage: StorageConfig::Memory,
            auth: AuthConfig {
                jwt_secret: jwt_secret.into(),
                jwt_expiry_secs: 3600,
                seed_admin: None,
            },
            ledger: LedgerConfig::Memory,
            market: MarketConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}
