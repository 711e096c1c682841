//! Error types for the payment gateway
//!
//! Every failure a payment entry point can produce maps to exactly one HTTP
//! status and one stable error code. The taxonomy separates client-fixable
//! problems (4xx), integrity violations (409), configuration gaps
//! (`server_misconfigured`) and transient upstream failures (503).

use actix_web::http::StatusCode;
use shared::ConfigError;
use thiserror::Error;

use crate::services::chains::RejectReason;

/// Payment error types
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Malformed or inconsistent input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or invalid caller identity
    #[error("Authentication required")]
    Unauthorized,

    /// Missing or invalid webhook signature
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// The chain has no record of the transaction yet
    #[error("Transaction not found")]
    TransactionNotFound,

    /// The transaction exists but does not pay for this product
    #[error("Payment rejected: {0}")]
    Rejected(RejectReason),

    /// Integrity violation (reused hash, reused key, expired intent)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimited { retry_after: i64 },

    /// Required secret or address is not configured
    #[error("Server misconfigured: {0}")]
    Misconfigured(#[from] ConfigError),

    /// Storage layer failure
    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    /// Chain RPC, indexer or card gateway unreachable
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PaymentError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PaymentError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        PaymentError::Conflict(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        PaymentError::Unavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        PaymentError::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::Validation(_)
            | PaymentError::InvalidSignature(_)
            | PaymentError::Rejected(_) => StatusCode::BAD_REQUEST,
            PaymentError::Unauthorized => StatusCode::UNAUTHORIZED,
            PaymentError::ProductNotFound(_) | PaymentError::TransactionNotFound => {
                StatusCode::NOT_FOUND
            }
            PaymentError::Conflict(_) => StatusCode::CONFLICT,
            PaymentError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            PaymentError::Misconfigured(_)
            | PaymentError::Storage(_)
            | PaymentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PaymentError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable machine-readable code for the response body
    pub fn error_code(&self) -> &'static str {
        match self {
            PaymentError::Validation(_) => "validation_error",
            PaymentError::Unauthorized => "unauthorized",
            PaymentError::InvalidSignature(_) => "invalid_signature",
            PaymentError::ProductNotFound(_) => "product_not_found",
            PaymentError::TransactionNotFound => "transaction_not_found",
            PaymentError::Rejected(_) => "payment_rejected",
            PaymentError::Conflict(_) => "conflict",
            PaymentError::RateLimited { .. } => "rate_limited",
            PaymentError::Misconfigured(_) => "server_misconfigured",
            PaymentError::Storage(_) | PaymentError::Internal(_) => "internal_error",
            PaymentError::Unavailable(_) => "service_unavailable",
        }
    }

    /// Whether resubmitting the same request later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::TransactionNotFound
                | PaymentError::RateLimited { .. }
                | PaymentError::Unavailable(_)
                | PaymentError::Storage(_)
        )
    }

    /// Message safe to return to callers
    ///
    /// Storage and upstream details stay in the logs.
    pub fn safe_message(&self) -> String {
        match self {
            PaymentError::Validation(msg) | PaymentError::Conflict(msg) => msg.clone(),
            PaymentError::Unauthorized => "Authentication required".to_string(),
            PaymentError::InvalidSignature(_) => {
                "Webhook signature verification failed".to_string()
            }
            PaymentError::ProductNotFound(id) => format!("Product {} not found", id),
            PaymentError::TransactionNotFound => {
                "Transaction not found yet; it may still be propagating".to_string()
            }
            PaymentError::Rejected(reason) => reason.to_string(),
            PaymentError::RateLimited { retry_after } => {
                format!("Too many attempts, retry after {} seconds", retry_after)
            }
            PaymentError::Misconfigured(_) => {
                "Payment service is not configured for this request".to_string()
            }
            PaymentError::Storage(_) | PaymentError::Internal(_) => {
                "Internal server error".to_string()
            }
            PaymentError::Unavailable(_) => {
                "Payment network temporarily unavailable, please retry".to_string()
            }
        }
    }

    /// Structured details for the response body
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            PaymentError::Rejected(reason) => Some(reason.details()),
            PaymentError::RateLimited { retry_after } => {
                Some(serde_json::json!({ "retry_after": retry_after }))
            }
            _ => None,
        }
    }
}
