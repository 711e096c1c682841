//! Shared library for the payments backend
//!
//! This crate provides common functionality used by the payment gateway:
//! - Database connection pooling and migrations
//! - Error handling types
//! - Configuration management and payment-rail validation
//! - Logging infrastructure
//! - Redis client and attempt limiting

pub mod config;
pub mod db;
pub mod error;
pub mod redis;

// Re-export commonly used types
pub use config::{ChainFamily, Config, ConfigError, PaymentConfig};
pub use db::DbPool;
pub use error::{Error, Result};
pub use redis::{AttemptLimiter, AttemptPolicy, RateLimitResult, RateLimitScope, RateLimiter};

/// Initialize tracing subscriber for structured logging
///
/// Set `LOG_FORMAT=json` for one JSON object per line.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "shared=debug,payment_gateway=debug,info".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
