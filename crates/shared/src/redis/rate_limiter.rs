//! Redis-based attempt limiter with a fixed window
//!
//! Payment entry points cap how often a single user may start a checkout or
//! submit a transaction for verification. Counting happens in a Redis Lua
//! script so concurrent API instances share one counter.
//!
//! # Architecture
//!
//! - **Fixed Window**: one counter per scope per window, expiring with the window
//! - **Atomic Operations**: check-and-increment in a single Lua call
//! - **Graceful Degradation**: fails open if Redis is unavailable
//!
//! # Example
//!
//! ```no_run
//! use shared::redis::{AttemptLimiter, AttemptPolicy, RateLimiter, RateLimitScope};
//!
//! # async fn example(redis_manager: redis::aio::ConnectionManager) -> shared::Result<()> {
//! let limiter = RateLimiter::new(redis_manager);
//! let result = limiter
//!     .check(RateLimitScope::Checkout("user_123".into()), AttemptPolicy::CHECKOUT)
//!     .await?;
//!
//! if !result.allowed {
//!     println!("Rate limited. Retry after: {}", result.retry_after);
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use tracing::{debug, error, warn};

/// Rate limit scope (determines Redis key prefix)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitScope {
    /// Checkout session creation, per user
    Checkout(String),
    /// On-chain verification submissions, per user
    Verification(String),
}

impl RateLimitScope {
    /// Get the Redis key prefix for this scope
    pub fn key_prefix(&self) -> String {
        match self {
            RateLimitScope::Checkout(user_id) => format!("rl:checkout:{}", user_id),
            RateLimitScope::Verification(user_id) => format!("rl:verify:{}", user_id),
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> String {
        match self {
            RateLimitScope::Checkout(user_id) => format!("checkout for user {}", user_id),
            RateLimitScope::Verification(user_id) => format!("verification for user {}", user_id),
        }
    }
}

/// Attempts allowed per window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptPolicy {
    pub limit: i64,
    pub window_seconds: i64,
}

impl AttemptPolicy {
    /// 5 checkout attempts per 10 minutes
    pub const CHECKOUT: AttemptPolicy = AttemptPolicy {
        limit: 5,
        window_seconds: 600,
    };

    /// 20 verification submissions per 10 minutes
    pub const VERIFICATION: AttemptPolicy = AttemptPolicy {
        limit: 20,
        window_seconds: 600,
    };
}

/// Result of a rate limit check
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Current usage in the window (after this request if allowed)
    pub current_usage: i64,
    /// The configured limit
    pub limit: i64,
    /// Unix timestamp when the window resets
    pub reset_at: i64,
    /// Seconds until the window resets
    pub retry_after: i64,
    /// Remaining quota (limit - current_usage)
    pub remaining: i64,
}

impl RateLimitResult {
    /// Create a result from the Lua script response
    fn from_lua_response(response: &[i64], current_time: i64) -> Result<Self> {
        let [allowed, current_usage, limit, reset_at] = response else {
            return Err(Error::internal(format!(
                "Unexpected rate limit script response: {:?}",
                response
            )));
        };

        Ok(Self {
            allowed: *allowed == 1,
            current_usage: *current_usage,
            limit: *limit,
            reset_at: *reset_at,
            retry_after: (reset_at - current_time).max(0),
            remaining: (limit - current_usage).max(0),
        })
    }

    /// Create a "fail-open" result (allows request when Redis is down)
    pub fn fail_open(policy: AttemptPolicy) -> Self {
        let current_time = chrono::Utc::now().timestamp();

        Self {
            allowed: true,
            current_usage: 0,
            limit: policy.limit,
            reset_at: current_time + policy.window_seconds,
            retry_after: 0,
            remaining: policy.limit,
        }
    }
}

/// Counts attempts against a per-scope policy
///
/// Implemented by [`RateLimiter`]; handlers depend on the trait so tests can
/// substitute an in-memory counter.
#[async_trait]
pub trait AttemptLimiter: Send + Sync {
    async fn check(&self, scope: RateLimitScope, policy: AttemptPolicy)
        -> Result<RateLimitResult>;
}

/// Redis-based rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    /// Redis connection manager
    redis: ConnectionManager,
    /// Lua script for rate limiting
    script: Script,
    /// Whether to fail open (allow requests) when Redis is unavailable
    fail_open: bool,
}

impl RateLimiter {
    /// Lua script source (embedded at compile time)
    const LUA_SCRIPT: &'static str = include_str!("attempt_window.lua");

    /// Create a rate limiter that fails open
    pub fn new(redis: ConnectionManager) -> Self {
        Self::with_fail_open(redis, true)
    }

    pub fn with_fail_open(redis: ConnectionManager, fail_open: bool) -> Self {
        debug!(fail_open = fail_open, "Rate limiter initialized");

        Self {
            redis,
            script: Script::new(Self::LUA_SCRIPT),
            fail_open,
        }
    }
}

#[async_trait]
impl AttemptLimiter for RateLimiter {
    async fn check(
        &self,
        scope: RateLimitScope,
        policy: AttemptPolicy,
    ) -> Result<RateLimitResult> {
        let current_time = chrono::Utc::now().timestamp();

        let mut conn = self.redis.clone();
        let response = self
            .script
            .key(scope.key_prefix())
            .arg(policy.limit)
            .arg(policy.window_seconds)
            .arg(1)
            .arg(current_time)
            .invoke_async::<Vec<i64>>(&mut conn)
            .await;

        match response {
            Ok(response) => {
                let result = RateLimitResult::from_lua_response(&response, current_time)?;

                if result.allowed {
                    debug!(
                        scope = %scope.description(),
                        current_usage = result.current_usage,
                        remaining = result.remaining,
                        "Rate limit check: ALLOWED"
                    );
                } else {
                    warn!(
                        scope = %scope.description(),
                        current_usage = result.current_usage,
                        limit = policy.limit,
                        retry_after = result.retry_after,
                        "Rate limit check: REJECTED"
                    );
                }

                Ok(result)
            }
            Err(e) => {
                error!(
                    scope = %scope.description(),
                    error = %e,
                    "Redis error during rate limit check"
                );

                if self.fail_open {
                    warn!(
                        scope = %scope.description(),
                        "Redis unavailable, failing open (allowing request)"
                    );
                    Ok(RateLimitResult::fail_open(policy))
                } else {
                    Err(Error::Redis(e))
                }
            }
        }
    }
}
