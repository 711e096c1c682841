//! Configuration management using environment variables
//!
//! # Security
//!
//! This module enforces security requirements for sensitive configuration:
//! - JWT_SECRET must be at least 32 characters (256 bits of entropy) in release builds
//! - Payment secrets are wrapped in [`secrecy::Secret`] and never printed
//! - Payment settings are optional at load time and validated on use, so a
//!   missing value surfaces as [`ConfigError`] instead of a silent skip

use crate::error::{Error, Result};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::sync::Arc;
use thiserror::Error as ThisError;
use validator::ValidateUrl;

/// Prefix for per-chain EVM RPC endpoints (e.g. `EVM_RPC_URL_POLYGON`)
pub const EVM_RPC_ENV_PREFIX: &str = "EVM_RPC_URL_";

/// Default UTxO indexer endpoint
pub const DEFAULT_BLOCKFROST_URL: &str = "https://cardano-mainnet.blockfrost.io/api/v0";

/// Default spot price endpoint for the UTxO ledger's native asset
pub const DEFAULT_PRICE_API_URL: &str =
    "https://api.coingecko.com/api/v3/simple/price?ids=cardano&vs_currencies=usd";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Redis configuration
    pub redis: RedisConfig,

    /// Server configuration
    pub server: ServerConfig,

    /// Payment rails configuration (shared, validated on use)
    pub payments: Arc<PaymentConfig>,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database host
    pub host: String,

    /// Database port
    pub port: u16,

    /// Database name
    pub name: String,

    /// Database user
    pub user: String,

    /// Database password
    pub password: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections to keep warm
    pub min_connections: u32,

    /// Connection acquire timeout in seconds (fail fast if pool exhausted)
    pub acquire_timeout_secs: u64,

    /// Idle connection timeout in seconds
    pub idle_timeout_secs: u64,

    /// Maximum connection lifetime in seconds
    pub max_lifetime_secs: u64,

    /// SSL mode for database connection
    /// Options: disable, allow, prefer, require, verify-ca, verify-full
    pub ssl_mode: String,
}

impl DatabaseConfig {
    /// Build a PostgreSQL connection URL with SSL mode
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.name, self.ssl_mode
        )
    }
}

/// Redis configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis host
    pub host: String,

    /// Redis port
    pub port: u16,

    /// Redis password (optional)
    pub password: Option<String>,

    /// Direct Redis URL (takes precedence over host/port/password)
    /// Supports both `redis://` and `rediss://` (TLS) schemes
    pub url: Option<String>,
}

impl RedisConfig {
    /// Build a Redis connection URL
    ///
    /// If `url` is set (from REDIS_URL env var), uses that directly.
    /// Otherwise, builds URL from host/port/password components.
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }

        if let Some(password) = &self.password {
            format!("redis://:{}@{}:{}", password, self.host, self.port)
        } else {
            format!("redis://{}:{}", self.host, self.port)
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// JWT secret for authentication
    pub jwt_secret: String,
}

// ============================================================================
// Payment configuration
// ============================================================================

/// Blockchain family a payment settles on
///
/// Accepted on the wire as `EVM`, `SOLANA` (alias `LEDGER_A`) and
/// `CARDANO` (alias `LEDGER_B`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainFamily {
    #[serde(rename = "EVM")]
    Evm,
    #[serde(rename = "SOLANA", alias = "LEDGER_A")]
    Solana,
    #[serde(rename = "CARDANO", alias = "LEDGER_B")]
    Cardano,
}

impl ChainFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainFamily::Evm => "evm",
            ChainFamily::Solana => "solana",
            ChainFamily::Cardano => "cardano",
        }
    }

    /// Environment variable holding this family's treasury address
    pub fn treasury_env_var(&self) -> &'static str {
        match self {
            ChainFamily::Evm => "EVM_TREASURY_ADDRESS",
            ChainFamily::Solana => "SOLANA_TREASURY_ADDRESS",
            ChainFamily::Cardano => "CARDANO_TREASURY_ADDRESS",
        }
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Missing or malformed payment configuration
///
/// Always surfaced to callers as `server_misconfigured`, never as a
/// payment failure.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ConfigError {
    #[error("{0} is not configured")]
    Missing(String),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: String, reason: String },
}

impl ConfigError {
    fn missing(var: impl Into<String>) -> Self {
        ConfigError::Missing(var.into())
    }

    fn invalid(var: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            var: var.into(),
            reason: reason.into(),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::config(err.to_string())
    }
}

/// Validated card gateway settings
#[derive(Clone)]
pub struct StripeSettings {
    pub secret_key: String,
    pub webhook_secret: String,
    pub currency: String,
}

impl fmt::Debug for StripeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripeSettings")
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("currency", &self.currency)
            .finish()
    }
}

/// Validated UTxO indexer settings
#[derive(Clone)]
pub struct IndexerSettings {
    pub base_url: String,
    pub api_key: String,
}

/// Which payment rails have complete configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnabledRails {
    pub card: bool,
    pub evm_chains: Vec<String>,
    pub solana: bool,
    pub cardano: bool,
}

/// Payment rails configuration
///
/// Every field is optional at load time. Handlers call the `require_*`
/// accessors, which fail closed with a [`ConfigError`].
#[derive(Default)]
pub struct PaymentConfig {
    pub stripe_secret_key: Option<Secret<String>>,
    pub stripe_webhook_secret: Option<Secret<String>>,
    pub stripe_currency: String,
    pub evm_treasury: Option<String>,
    pub solana_treasury: Option<String>,
    pub cardano_treasury: Option<String>,
    /// Lowercase chain name -> RPC endpoint
    pub evm_rpc_urls: HashMap<String, String>,
    pub solana_rpc_url: Option<String>,
    pub blockfrost_api_key: Option<Secret<String>>,
    pub blockfrost_base_url: String,
    pub price_api_url: String,
    /// Per-call timeout for chain RPC, indexer and price requests
    pub rpc_timeout_secs: u64,
}

impl fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("stripe_secret_key", &self.stripe_secret_key.is_some())
            .field("stripe_webhook_secret", &self.stripe_webhook_secret.is_some())
            .field("stripe_currency", &self.stripe_currency)
            .field("evm_treasury", &self.evm_treasury)
            .field("solana_treasury", &self.solana_treasury)
            .field("cardano_treasury", &self.cardano_treasury)
            .field("evm_chains", &self.evm_rpc_urls.keys().collect::<Vec<_>>())
            .field("solana_rpc_url", &self.solana_rpc_url.is_some())
            .field("blockfrost_api_key", &self.blockfrost_api_key.is_some())
            .field("rpc_timeout_secs", &self.rpc_timeout_secs)
            .finish()
    }
}

impl PaymentConfig {
    /// Load payment settings from environment variables
    pub fn from_env() -> Result<Self> {
        let evm_rpc_urls = env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix(EVM_RPC_ENV_PREFIX)
                    .filter(|chain| !chain.is_empty() && !value.trim().is_empty())
                    .map(|chain| (chain.to_lowercase(), value.trim().to_string()))
            })
            .collect();

        Ok(Self {
            stripe_secret_key: non_empty_var("STRIPE_SECRET_KEY").map(Secret::new),
            stripe_webhook_secret: non_empty_var("STRIPE_WEBHOOK_SECRET").map(Secret::new),
            stripe_currency: env::var("STRIPE_CURRENCY").unwrap_or_else(|_| "usd".to_string()),
            evm_treasury: non_empty_var("EVM_TREASURY_ADDRESS"),
            solana_treasury: non_empty_var("SOLANA_TREASURY_ADDRESS"),
            cardano_treasury: non_empty_var("CARDANO_TREASURY_ADDRESS"),
            evm_rpc_urls,
            solana_rpc_url: non_empty_var("SOLANA_RPC_URL"),
            blockfrost_api_key: non_empty_var("BLOCKFROST_API_KEY").map(Secret::new),
            blockfrost_base_url: env::var("BLOCKFROST_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BLOCKFROST_URL.to_string()),
            price_api_url: env::var("PRICE_API_URL")
                .unwrap_or_else(|_| DEFAULT_PRICE_API_URL.to_string()),
            rpc_timeout_secs: env::var("CHAIN_RPC_TIMEOUT_SECS")
                .unwrap_or_else(|_| "8".to_string())
                .parse()
                .map_err(|e| Error::config(format!("Invalid CHAIN_RPC_TIMEOUT_SECS: {}", e)))?,
        })
    }

    /// Card gateway keys, with prefix checks
    pub fn require_stripe(&self) -> std::result::Result<StripeSettings, ConfigError> {
        let secret_key = self
            .stripe_secret_key
            .as_ref()
            .ok_or_else(|| ConfigError::missing("STRIPE_SECRET_KEY"))?
            .expose_secret()
            .clone();

        if !secret_key.starts_with("sk_test_") && !secret_key.starts_with("sk_live_") {
            return Err(ConfigError::invalid(
                "STRIPE_SECRET_KEY",
                "must start with sk_test_ or sk_live_",
            ));
        }

        Ok(StripeSettings {
            secret_key,
            webhook_secret: self.require_webhook_secret()?,
            currency: self.stripe_currency.clone(),
        })
    }

    /// Webhook signing secret only (the receiver does not need the API key)
    pub fn require_webhook_secret(&self) -> std::result::Result<String, ConfigError> {
        let secret = self
            .stripe_webhook_secret
            .as_ref()
            .ok_or_else(|| ConfigError::missing("STRIPE_WEBHOOK_SECRET"))?
            .expose_secret();

        if !secret.starts_with("whsec_") {
            return Err(ConfigError::invalid(
                "STRIPE_WEBHOOK_SECRET",
                "must start with whsec_",
            ));
        }

        Ok(secret.clone())
    }

    /// Treasury address receiving payments on a chain family
    pub fn require_treasury(&self, family: ChainFamily) -> std::result::Result<&str, ConfigError> {
        let treasury = match family {
            ChainFamily::Evm => self.evm_treasury.as_deref(),
            ChainFamily::Solana => self.solana_treasury.as_deref(),
            ChainFamily::Cardano => self.cardano_treasury.as_deref(),
        }
        .ok_or_else(|| ConfigError::missing(family.treasury_env_var()))?;

        if family == ChainFamily::Evm && !is_evm_address(treasury) {
            return Err(ConfigError::invalid(
                family.treasury_env_var(),
                "must be a 0x-prefixed 20-byte hex address",
            ));
        }

        Ok(treasury)
    }

    /// RPC endpoint for a named EVM chain
    pub fn require_evm_rpc(&self, chain: &str) -> std::result::Result<&str, ConfigError> {
        let var = format!("{}{}", EVM_RPC_ENV_PREFIX, chain.to_uppercase());
        let url = self
            .evm_rpc_urls
            .get(&chain.to_lowercase())
            .ok_or_else(|| ConfigError::missing(var.clone()))?;
        check_url(&var, url)
    }

    pub fn require_solana_rpc(&self) -> std::result::Result<&str, ConfigError> {
        let url = self
            .solana_rpc_url
            .as_deref()
            .ok_or_else(|| ConfigError::missing("SOLANA_RPC_URL"))?;
        check_url("SOLANA_RPC_URL", url)
    }

    pub fn require_indexer(&self) -> std::result::Result<IndexerSettings, ConfigError> {
        let api_key = self
            .blockfrost_api_key
            .as_ref()
            .ok_or_else(|| ConfigError::missing("BLOCKFROST_API_KEY"))?
            .expose_secret()
            .clone();
        let base_url = check_url("BLOCKFROST_BASE_URL", &self.blockfrost_base_url)?;

        Ok(IndexerSettings {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Summary of fully configured rails (logged at startup)
    pub fn enabled_rails(&self) -> EnabledRails {
        let mut evm_chains: Vec<String> = if self.require_treasury(ChainFamily::Evm).is_ok() {
            self.evm_rpc_urls
                .keys()
                .filter(|chain| self.require_evm_rpc(chain).is_ok())
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        evm_chains.sort();

        EnabledRails {
            card: self.require_stripe().is_ok(),
            evm_chains,
            solana: self.require_treasury(ChainFamily::Solana).is_ok()
                && self.require_solana_rpc().is_ok(),
            cardano: self.require_treasury(ChainFamily::Cardano).is_ok()
                && self.require_indexer().is_ok(),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_url<'a>(var: &str, url: &'a str) -> std::result::Result<&'a str, ConfigError> {
    if url.validate_url() {
        Ok(url)
    } else {
        Err(ConfigError::invalid(var, "must be an absolute URL"))
    }
}

fn is_evm_address(address: &str) -> bool {
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Ok(Self {
            database: DatabaseConfig {
                host: env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: env::var("DB_PORT")
                    .unwrap_or_else(|_| "5432".to_string())
                    .parse()
                    .map_err(|e| Error::config(format!("Invalid DB_PORT: {}", e)))?,
                name: env::var("DB_NAME").unwrap_or_else(|_| "payments".to_string()),
                user: env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string()),
                password: env::var("DB_PASSWORD")
                    .map_err(|_| Error::config("DB_PASSWORD must be set"))?,
                max_connections: env::var("DB_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .map_err(|e| Error::config(format!("Invalid DB_MAX_CONNECTIONS: {}", e)))?,
                min_connections: env::var("DB_MIN_CONNECTIONS")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .map_err(|e| Error::config(format!("Invalid DB_MIN_CONNECTIONS: {}", e)))?,
                acquire_timeout_secs: env::var("DB_ACQUIRE_TIMEOUT")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .map_err(|e| Error::config(format!("Invalid DB_ACQUIRE_TIMEOUT: {}", e)))?,
                idle_timeout_secs: env::var("DB_IDLE_TIMEOUT")
                    .unwrap_or_else(|_| "180".to_string())
                    .parse()
                    .map_err(|e| Error::config(format!("Invalid DB_IDLE_TIMEOUT: {}", e)))?,
                max_lifetime_secs: env::var("DB_MAX_LIFETIME")
                    .unwrap_or_else(|_| "900".to_string())
                    .parse()
                    .map_err(|e| Error::config(format!("Invalid DB_MAX_LIFETIME: {}", e)))?,
                ssl_mode: env::var("DB_SSL_MODE").unwrap_or_else(|_| {
                    if cfg!(debug_assertions) {
                        "prefer".to_string()
                    } else {
                        "verify-full".to_string()
                    }
                }),
            },
            redis: RedisConfig {
                host: env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: env::var("REDIS_PORT")
                    .unwrap_or_else(|_| "6379".to_string())
                    .parse()
                    .map_err(|e| Error::config(format!("Invalid REDIS_PORT: {}", e)))?,
                password: env::var("REDIS_PASSWORD").ok(),
                url: env::var("REDIS_URL").ok(),
            },
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|e| Error::config(format!("Invalid SERVER_PORT: {}", e)))?,
                jwt_secret: Self::load_and_validate_jwt_secret()?,
            },
            payments: Arc::new(PaymentConfig::from_env()?),
        })
    }

    /// Load and validate the JWT secret
    ///
    /// Release builds require at least 32 characters and reject known
    /// placeholder values. Debug builds fall back to a development default
    /// with a warning.
    fn load_and_validate_jwt_secret() -> Result<String> {
        const WEAK_PATTERNS: &[&str] = &["change_me", "changeme", "example", "your_secret"];

        let secret = if cfg!(debug_assertions) {
            env::var("JWT_SECRET").unwrap_or_else(|_| {
                tracing::warn!(
                    "JWT_SECRET not set - using development default. \
                     DO NOT use in production!"
                );
                "dev_secret_change_in_production_32chars".to_string()
            })
        } else {
            env::var("JWT_SECRET").map_err(|_| {
                Error::config("JWT_SECRET environment variable must be set in production")
            })?
        };

        if !cfg!(debug_assertions) {
            if secret.len() < 32 {
                return Err(Error::config(format!(
                    "JWT_SECRET must be at least 32 characters. Current length: {}",
                    secret.len()
                )));
            }

            let secret_lower = secret.to_lowercase();
            if let Some(pattern) = WEAK_PATTERNS.iter().find(|p| secret_lower.contains(*p)) {
                return Err(Error::config(format!(
                    "JWT_SECRET contains weak pattern '{}'",
                    pattern
                )));
            }
        }

        Ok(secret)
    }
}
