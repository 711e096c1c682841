//! Request and response DTOs for the payment endpoints
//!
//! Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use shared::ChainFamily;
use utoipa::ToSchema;
use validator::Validate;

// ============================================================================
// Checkout
// ============================================================================

/// Request to start a card checkout
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[validate(length(min = 1, max = 128))]
    pub product_id: String,

    /// Client-generated v4 UUID; repeats return the cached result
    #[validate(custom(function = "validate_idempotency_key"))]
    pub idempotency_key: String,

    #[validate(url)]
    pub success_url: String,

    #[validate(url)]
    pub cancel_url: String,
}

/// Checkout result
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    /// `redirect`, `activated` or `completed`
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

// ============================================================================
// On-chain verification
// ============================================================================

/// Request to verify an on-chain payment
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    /// `EVM`, `SOLANA` (alias `LEDGER_A`) or `CARDANO` (alias `LEDGER_B`)
    #[schema(value_type = String, example = "EVM")]
    pub chain_type: ChainFamily,

    /// EVM sub-chain name (e.g. `polygon`); required for `EVM`
    #[validate(length(min = 1, max = 32))]
    pub chain: Option<String>,

    #[validate(length(min = 1, max = 128))]
    pub tx_hash: String,

    #[validate(length(min = 1, max = 128))]
    pub claimed_sender_wallet: String,

    #[validate(length(min = 1, max = 128))]
    pub product_id: String,

    #[validate(custom(function = "validate_idempotency_key"))]
    pub idempotency_key: String,

    /// Invite price in USD; only honoured together with `inviteCodeId`
    #[serde(rename = "amountOverrideUSD")]
    #[schema(value_type = Option<f64>)]
    pub amount_override_usd: Option<serde_json::Number>,

    #[validate(length(min = 1, max = 128))]
    pub invite_code_id: Option<String>,
}

/// Verification result (200 or 202)
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    /// `success` or `pending`
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_confirmations: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl VerifyPaymentResponse {
    pub fn success(tier: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            tier: Some(tier.into()),
            pending_confirmations: None,
            message: None,
        }
    }

    pub fn pending(confirmations_remaining: u64) -> Self {
        Self {
            status: "pending".to_string(),
            tier: None,
            pending_confirmations: Some(confirmations_remaining),
            message: Some(format!(
                "Waiting for {} more confirmation(s); resubmit to check again",
                confirmations_remaining
            )),
        }
    }
}

// ============================================================================
// Webhook
// ============================================================================

/// Webhook acknowledgement
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAckResponse {
    pub received: bool,
    /// `processed`, `duplicate`, `ignored` or `error`
    pub status: String,
}

/// Custom validator for idempotency keys
///
/// Keys must be hyphenated v4 UUIDs.
fn validate_idempotency_key(key: &str) -> Result<(), validator::ValidationError> {
    match uuid::Uuid::parse_str(key) {
        Ok(uuid) if uuid.get_version_num() == 4 && key.len() == 36 => Ok(()),
        _ => {
            let mut err = validator::ValidationError::new("invalid_idempotency_key");
            err.message = Some("idempotencyKey must be a v4 UUID".into());
            Err(err)
        }
    }
}
