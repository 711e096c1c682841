//! Stripe Checkout gateway
//!
//! Creates hosted Checkout sessions for catalog products. Completion is
//! reported back asynchronously through the webhook receiver, never by the
//! redirect, so the session carries every identifier the webhook handlers
//! need in its metadata.
//!
//! # Idempotency
//!
//! Session creation is sent with the intent's idempotency key as the
//! `Idempotency-Key` header. A retried request that reaches Stripe twice
//! gets the same session back instead of a second one.

use std::collections::HashMap;

use async_trait::async_trait;
use shared::config::StripeSettings;
use stripe::{
    CheckoutSession, CheckoutSessionMode, Client, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData,
    CreateCheckoutSessionLineItemsPriceDataRecurring,
    CreateCheckoutSessionLineItemsPriceDataRecurringInterval,
    CreateCheckoutSessionSubscriptionData, Currency, RequestStrategy,
};
use thiserror::Error;

use crate::models::{PaymentProduct, ProductKind};

/// Metadata keys attached to sessions and subscriptions
pub const META_USER_ID: &str = "user_id";
pub const META_PRODUCT_ID: &str = "product_id";
pub const META_IDEMPOTENCY_KEY: &str = "idempotency_key";
pub const META_TIER: &str = "tier";

/// Errors that can occur during Stripe operations
#[derive(Debug, Error)]
pub enum StripeError {
    #[error("Stripe API error: {0}")]
    ApiError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Everything needed to open a session for one intent
#[derive(Debug, Clone)]
pub struct CheckoutSessionParams {
    pub idempotency_key: String,
    pub user_id: String,
    pub product_id: String,
    pub product_name: String,
    pub tier: String,
    pub amount_cents: i64,
    pub kind: ProductKind,
    /// `month` or `year`; subscriptions only
    pub billing_interval: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutSessionParams {
    pub fn for_product(
        product: &PaymentProduct,
        user_id: &str,
        idempotency_key: &str,
        amount_cents: i64,
        success_url: &str,
        cancel_url: &str,
    ) -> Self {
        Self {
            idempotency_key: idempotency_key.to_string(),
            user_id: user_id.to_string(),
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            tier: product.tier.clone(),
            amount_cents,
            kind: product.kind(),
            billing_interval: product.billing_interval.clone(),
            success_url: success_url.to_string(),
            cancel_url: cancel_url.to_string(),
        }
    }

    /// Identifiers echoed back by every webhook for this session
    pub fn metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            (META_USER_ID.to_string(), self.user_id.clone()),
            (META_PRODUCT_ID.to_string(), self.product_id.clone()),
            (META_IDEMPOTENCY_KEY.to_string(), self.idempotency_key.clone()),
            (META_TIER.to_string(), self.tier.clone()),
        ])
    }
}

/// Result of creating a checkout session
#[derive(Debug, Clone)]
pub struct CheckoutResult {
    /// Stripe session ID
    pub session_id: String,
    /// Checkout URL for redirect
    pub checkout_url: String,
}

/// Hosted checkout provider
#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        params: &CheckoutSessionParams,
    ) -> Result<CheckoutResult, StripeError>;
}

/// Service for Stripe payment operations
#[derive(Clone)]
pub struct StripeService {
    client: Client,
    currency: Currency,
}

impl StripeService {
    pub fn new(settings: &StripeSettings) -> Result<Self, StripeError> {
        let client = Client::new(settings.secret_key.clone());

        let currency = match settings.currency.to_lowercase().as_str() {
            "usd" => Currency::USD,
            "eur" => Currency::EUR,
            "gbp" => Currency::GBP,
            _ => {
                return Err(StripeError::ConfigError(format!(
                    "Unsupported currency: {}",
                    settings.currency
                )))
            }
        };

        Ok(Self { client, currency })
    }
}

fn recurring_interval(
    billing_interval: Option<&str>,
) -> Result<CreateCheckoutSessionLineItemsPriceDataRecurringInterval, StripeError> {
    match billing_interval.unwrap_or("month") {
        "month" => Ok(CreateCheckoutSessionLineItemsPriceDataRecurringInterval::Month),
        "year" => Ok(CreateCheckoutSessionLineItemsPriceDataRecurringInterval::Year),
        other => Err(StripeError::ConfigError(format!(
            "Unsupported billing interval: {}",
            other
        ))),
    }
}

#[async_trait]
impl CheckoutGateway for StripeService {
    async fn create_checkout_session(
        &self,
        params: &CheckoutSessionParams,
    ) -> Result<CheckoutResult, StripeError> {
        if params.amount_cents <= 0 {
            return Err(StripeError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }

        let recurring = match params.kind {
            ProductKind::Subscription => Some(CreateCheckoutSessionLineItemsPriceDataRecurring {
                interval: recurring_interval(params.billing_interval.as_deref())?,
                interval_count: None,
            }),
            ProductKind::OneOff => None,
        };

        let line_items = vec![CreateCheckoutSessionLineItems {
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency: self.currency,
                unit_amount: Some(params.amount_cents),
                recurring,
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: params.product_name.clone(),
                    description: Some(format!("{} plan", params.tier)),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            quantity: Some(1),
            ..Default::default()
        }];

        let metadata = params.metadata();

        let mut create = CreateCheckoutSession::new();
        create.line_items = Some(line_items);
        create.success_url = Some(&params.success_url);
        create.cancel_url = Some(&params.cancel_url);
        create.client_reference_id = Some(&params.user_id);
        create.metadata = Some(metadata.clone());

        match params.kind {
            ProductKind::Subscription => {
                create.mode = Some(CheckoutSessionMode::Subscription);
                // Renewal and cancellation events carry subscription metadata,
                // not the session's
                create.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
                    metadata: Some(metadata),
                    ..Default::default()
                });
            }
            ProductKind::OneOff => {
                create.mode = Some(CheckoutSessionMode::Payment);
            }
        }

        let client = self
            .client
            .clone()
            .with_strategy(RequestStrategy::Idempotent(params.idempotency_key.clone()));

        let session = CheckoutSession::create(&client, create)
            .await
            .map_err(|e| StripeError::ApiError(e.to_string()))?;

        let session_id = session.id.to_string();
        let checkout_url = session
            .url
            .ok_or_else(|| StripeError::MissingField("checkout URL".to_string()))?;

        Ok(CheckoutResult {
            session_id,
            checkout_url,
        })
    }
}
