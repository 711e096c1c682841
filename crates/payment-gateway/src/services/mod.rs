//! Business logic services for the payment gateway
//!
//! Rails orchestrators ([`CheckoutService`], [`OnChainService`],
//! [`WebhookProcessor`]) sit on top of the shared building blocks: the
//! chain verifiers, the intent ledger and account activation. All state
//! lives in the [`PaymentStore`]; none of these services hold locks.

pub mod activation;
pub mod chains;
pub mod checkout;
pub mod intent_ledger;
pub mod money;
pub mod onchain;
pub mod stripe_service;
pub mod webhook_processor;
pub mod webhook_signature;

use std::sync::Arc;

use shared::{AttemptLimiter, AttemptPolicy, PaymentConfig, RateLimitScope};
use tracing::{error, warn};

use crate::error::PaymentError;
use crate::repositories::PaymentStore;

pub use activation::AccountActivation;
pub use chains::{ChainVerifier, ChainVerifiers, VerificationOutcome, VerificationRequest};
pub use checkout::{CheckoutOutcome, CheckoutService};
pub use intent_ledger::{IntentClaim, IntentLedger};
pub use onchain::{OnChainService, VerifyOutcome};
pub use stripe_service::{CheckoutGateway, CheckoutResult, CheckoutSessionParams, StripeService};
pub use webhook_processor::{WebhookAck, WebhookProcessor};

/// The three payment entry points, wired to one store
#[derive(Clone)]
pub struct PaymentServices {
    pub checkout: CheckoutService,
    pub onchain: OnChainService,
    pub webhooks: WebhookProcessor,
}

impl PaymentServices {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        config: Arc<PaymentConfig>,
        limiter: Arc<dyn AttemptLimiter>,
        verifiers: ChainVerifiers,
        gateway: Option<Arc<dyn CheckoutGateway>>,
    ) -> Self {
        let ledger = IntentLedger::new(store.clone());
        let activation = AccountActivation::new(store.clone());

        Self {
            checkout: CheckoutService::new(
                store.clone(),
                config.clone(),
                limiter.clone(),
                ledger.clone(),
                activation.clone(),
                gateway,
            ),
            onchain: OnChainService::new(
                store.clone(),
                config.clone(),
                limiter,
                verifiers,
                ledger.clone(),
                activation.clone(),
            ),
            webhooks: WebhookProcessor::new(store, config, ledger, activation),
        }
    }
}

/// Count an attempt and reject it once the window is exhausted
///
/// The Redis limiter fails open on its own; an error here means it was
/// configured to fail closed.
pub(crate) async fn enforce_attempt_limit(
    limiter: &dyn AttemptLimiter,
    scope: RateLimitScope,
    policy: AttemptPolicy,
) -> Result<(), PaymentError> {
    let description = scope.description();

    match limiter.check(scope, policy).await {
        Ok(result) if result.allowed => Ok(()),
        Ok(result) => {
            warn!(
                scope = %description,
                limit = result.limit,
                retry_after = result.retry_after,
                "Attempt limit exceeded"
            );
            Err(PaymentError::RateLimited {
                retry_after: result.retry_after,
            })
        }
        Err(e) => {
            error!(scope = %description, error = %e, "Attempt limiter unavailable");
            Err(PaymentError::unavailable("Rate limiter unavailable"))
        }
    }
}
