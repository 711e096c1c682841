//! Payment domain models
//!
//! Database rows for the catalog, intent ledger, payment records,
//! subscriptions and the webhook event log, plus the parameter structs
//! used to write them. Status columns are stored as text and exposed
//! through the enums below.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use shared::ChainFamily;

/// Intents stop being reusable this long after creation
pub const INTENT_TTL_HOURS: i64 = 24;

/// Product metadata key carrying a one-time credit grant
pub const BONUS_CREDITS_KEY: &str = "bonus_credits";

// ============================================================================
// Status enums
// ============================================================================

/// Catalog entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    OneOff,
    Subscription,
}

impl ProductKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductKind::OneOff => "one_off",
            ProductKind::Subscription => "subscription",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "one_off" => Some(ProductKind::OneOff),
            "subscription" => Some(ProductKind::Subscription),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentStatus {
    Pending,
    Created,
    Completed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "pending",
            IntentStatus::Created => "created",
            IntentStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(IntentStatus::Pending),
            "created" => Some(IntentStatus::Created),
            "completed" => Some(IntentStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

/// Settlement rail a payment arrived through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentRail {
    Card,
    Evm,
    Solana,
    Cardano,
    /// Zero-priced products, no settlement
    Free,
}

impl PaymentRail {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentRail::Card => "card",
            PaymentRail::Evm => "evm",
            PaymentRail::Solana => "solana",
            PaymentRail::Cardano => "cardano",
            PaymentRail::Free => "free",
        }
    }
}

impl From<ChainFamily> for PaymentRail {
    fn from(family: ChainFamily) -> Self {
        match family {
            ChainFamily::Evm => PaymentRail::Evm,
            ChainFamily::Solana => PaymentRail::Solana,
            ChainFamily::Cardano => PaymentRail::Cardano,
        }
    }
}

// ============================================================================
// Database models
// ============================================================================

/// Database model for payment_products table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentProduct {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    pub tier: String,
    pub kind: String,
    pub billing_interval: Option<String>,
    pub metadata: serde_json::Value,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl PaymentProduct {
    pub fn kind(&self) -> ProductKind {
        ProductKind::parse(&self.kind).unwrap_or(ProductKind::OneOff)
    }

    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }

    /// One-time credit grant attached to this product, if any
    pub fn bonus_credits(&self) -> i64 {
        bonus_credits_from(&self.metadata)
    }
}

/// Read a non-negative bonus grant from a metadata object
pub fn bonus_credits_from(metadata: &serde_json::Value) -> i64 {
    metadata
        .get(BONUS_CREDITS_KEY)
        .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .filter(|credits| *credits > 0)
        .unwrap_or(0)
}

/// Database model for payment_intents table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentIntent {
    pub id: String,
    pub idempotency_key: String,
    pub user_id: String,
    pub product_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub rail: String,
    pub checkout_session_id: Option<String>,
    pub checkout_url: Option<String>,
    pub invite_code_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    pub fn status(&self) -> IntentStatus {
        IntentStatus::parse(&self.status).unwrap_or(IntentStatus::Pending)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status() != IntentStatus::Completed && self.expires_at <= now
    }
}

/// Database model for payments table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Payment {
    pub id: String,
    pub user_id: String,
    pub product_id: Option<String>,
    pub rail: String,
    pub provider_payment_id: String,
    pub idempotency_key: Option<String>,
    pub status: String,
    pub amount_cents: i64,
    pub currency: String,
    pub received_micro_usd: Option<i64>,
    pub chain: Option<String>,
    pub wallet_address: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn status(&self) -> PaymentStatus {
        PaymentStatus::parse(&self.status).unwrap_or(PaymentStatus::Pending)
    }
}

/// Database model for subscriptions table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Subscription {
    pub id: String,
    pub provider_sub_id: String,
    pub user_id: String,
    pub product_id: Option<String>,
    pub tier: String,
    pub status: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database model for webhook_events table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WebhookEventRecord {
    pub id: String,
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub processing_error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Write parameters
// ============================================================================

/// Parameters for a new payment intent
#[derive(Debug, Clone)]
pub struct NewIntent {
    pub idempotency_key: String,
    pub user_id: String,
    pub product_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub rail: PaymentRail,
    pub invite_code_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl NewIntent {
    pub fn new(
        idempotency_key: impl Into<String>,
        user_id: impl Into<String>,
        product: &PaymentProduct,
        amount_cents: i64,
        rail: PaymentRail,
    ) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            user_id: user_id.into(),
            product_id: product.id.clone(),
            amount_cents,
            currency: product.currency.clone(),
            rail,
            invite_code_id: None,
            expires_at: Utc::now() + Duration::hours(INTENT_TTL_HOURS),
        }
    }
}

/// Parameters for a new payment record
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub user_id: String,
    pub product_id: Option<String>,
    pub rail: PaymentRail,
    pub provider_payment_id: String,
    pub idempotency_key: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub chain: Option<String>,
    pub wallet_address: Option<String>,
}

/// Parameters for creating or refreshing a subscription
#[derive(Debug, Clone)]
pub struct SubscriptionUpsert {
    pub provider_sub_id: String,
    pub user_id: String,
    pub product_id: Option<String>,
    pub tier: String,
    pub status: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

/// Target entitlement for an account
///
/// `tier` is set, never incremented. `bonus_credits` is added, and only
/// together with a payment that has just transitioned to completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entitlement {
    pub tier: String,
    pub bonus_credits: i64,
}

impl Entitlement {
    pub fn for_product(product: &PaymentProduct) -> Self {
        Self {
            tier: product.tier.clone(),
            bonus_credits: product.bonus_credits(),
        }
    }

    pub fn tier_only(tier: impl Into<String>) -> Self {
        Self {
            tier: tier.into(),
            bonus_credits: 0,
        }
    }
}
