//! Card checkout orchestration
//!
//! Turns a checkout request into a hosted session URL. The intent ledger
//! makes the request idempotent: a repeated key returns the stored session
//! instead of opening another one, and the gateway call itself carries the
//! same key so a retry after a lost response cannot double-charge either.

use std::sync::Arc;

use shared::{AttemptLimiter, AttemptPolicy, PaymentConfig, RateLimitScope};
use tracing::{error, info};

use super::activation::AccountActivation;
use super::enforce_attempt_limit;
use super::intent_ledger::IntentLedger;
use super::stripe_service::{CheckoutGateway, CheckoutSessionParams, StripeError};
use crate::error::PaymentError;
use crate::middleware::metrics::record_checkout;
use crate::models::{
    CheckoutRequest, CheckoutResponse, IntentStatus, NewIntent, PaymentRail,
};
use crate::repositories::PaymentStore;

/// What the caller should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutOutcome {
    Redirect {
        session_id: String,
        checkout_url: String,
    },
    /// Zero-priced product, activated immediately
    Activated { tier: String },
    /// The key belongs to an intent that has already been paid
    Completed { tier: String },
}

impl From<CheckoutOutcome> for CheckoutResponse {
    fn from(outcome: CheckoutOutcome) -> Self {
        match outcome {
            CheckoutOutcome::Redirect {
                session_id,
                checkout_url,
            } => CheckoutResponse {
                status: "redirect".to_string(),
                checkout_url: Some(checkout_url),
                session_id: Some(session_id),
                tier: None,
            },
            CheckoutOutcome::Activated { tier } => CheckoutResponse {
                status: "activated".to_string(),
                checkout_url: None,
                session_id: None,
                tier: Some(tier),
            },
            CheckoutOutcome::Completed { tier } => CheckoutResponse {
                status: "completed".to_string(),
                checkout_url: None,
                session_id: None,
                tier: Some(tier),
            },
        }
    }
}

#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn PaymentStore>,
    config: Arc<PaymentConfig>,
    limiter: Arc<dyn AttemptLimiter>,
    ledger: IntentLedger,
    activation: AccountActivation,
    gateway: Option<Arc<dyn CheckoutGateway>>,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        config: Arc<PaymentConfig>,
        limiter: Arc<dyn AttemptLimiter>,
        ledger: IntentLedger,
        activation: AccountActivation,
        gateway: Option<Arc<dyn CheckoutGateway>>,
    ) -> Self {
        Self {
            store,
            config,
            limiter,
            ledger,
            activation,
            gateway,
        }
    }

    pub async fn start_checkout(
        &self,
        user_id: &str,
        request: &CheckoutRequest,
    ) -> Result<CheckoutOutcome, PaymentError> {
        enforce_attempt_limit(
            self.limiter.as_ref(),
            RateLimitScope::Checkout(user_id.to_string()),
            AttemptPolicy::CHECKOUT,
        )
        .await?;

        let product = self
            .store
            .find_active_product(&request.product_id)
            .await?
            .ok_or_else(|| PaymentError::ProductNotFound(request.product_id.clone()))?;

        let rail = if product.is_free() {
            PaymentRail::Free
        } else {
            PaymentRail::Card
        };

        let claim = self
            .ledger
            .get_or_create_intent(NewIntent::new(
                &request.idempotency_key,
                user_id,
                &product,
                product.price_cents,
                rail,
            ))
            .await?;
        let intent = claim.into_intent();

        match intent.status() {
            IntentStatus::Completed => {
                record_checkout("cached");
                return Ok(CheckoutOutcome::Completed { tier: product.tier });
            }
            IntentStatus::Created => {
                if let (Some(session_id), Some(checkout_url)) =
                    (intent.checkout_session_id, intent.checkout_url)
                {
                    record_checkout("cached");
                    return Ok(CheckoutOutcome::Redirect {
                        session_id,
                        checkout_url,
                    });
                }
                return Err(PaymentError::internal("Checkout intent has no session"));
            }
            // New, or an earlier attempt never reached the gateway
            IntentStatus::Pending => {}
        }

        if product.is_free() {
            self.activation
                .activate_free(user_id, &product, &request.idempotency_key)
                .await?;
            self.ledger.mark_completed(&request.idempotency_key).await?;
            record_checkout("activated");
            return Ok(CheckoutOutcome::Activated { tier: product.tier });
        }

        self.config.require_stripe()?;
        let gateway = self
            .gateway
            .as_ref()
            .ok_or_else(|| PaymentError::internal("Card gateway not initialised"))?;

        let params = CheckoutSessionParams::for_product(
            &product,
            user_id,
            &request.idempotency_key,
            intent.amount_cents,
            &request.success_url,
            &request.cancel_url,
        );

        let session = gateway
            .create_checkout_session(&params)
            .await
            .map_err(|e| {
                error!(
                    user_id = %user_id,
                    idempotency_key = %request.idempotency_key,
                    error = %e,
                    "Checkout session creation failed"
                );
                record_checkout("gateway_error");
                match e {
                    StripeError::ApiError(_) | StripeError::MissingField(_) => {
                        PaymentError::unavailable("Card gateway unavailable")
                    }
                    StripeError::InvalidAmount(_) | StripeError::ConfigError(_) => {
                        PaymentError::internal(e.to_string())
                    }
                }
            })?;

        self.store
            .mark_intent_created(
                &request.idempotency_key,
                &session.session_id,
                &session.checkout_url,
            )
            .await?;

        info!(
            user_id = %user_id,
            idempotency_key = %request.idempotency_key,
            product_id = %product.id,
            session_id = %session.session_id,
            "Checkout session created"
        );
        record_checkout("redirect");

        Ok(CheckoutOutcome::Redirect {
            session_id: session.session_id,
            checkout_url: session.checkout_url,
        })
    }
}
