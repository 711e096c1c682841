//! On-chain payment orchestration
//!
//! A verification request walks through:
//!
//! 1. price resolution, including invite pricing; zero-priced products
//!    activate here without any chain input or configuration
//! 2. input normalization and configuration checks (nothing recorded yet)
//! 3. the intent ledger, which short-circuits completed keys
//! 4. a pending claim on the transaction hash (UNIQUE across all users)
//! 5. the chain verifier, whose outcome settles, keeps, releases or fails
//!    the claim
//!
//! | outcome | claim | response |
//! |---|---|---|
//! | verified | completed + activated | 200 success |
//! | pending confirmations | kept pending | 202 |
//! | not found / sender mismatch | released | 404 / 400 |
//! | failed tx, wrong or short transfer | failed | 400 |
//! | upstream unavailable | released | 503 |
//!
//! A claim outlives the request only once the chain has confirmed the
//! caller sent the transaction, so nobody can park someone else's hash
//! under their own account.

use std::sync::Arc;

use shared::{
    AttemptLimiter, AttemptPolicy, ChainFamily, ConfigError, PaymentConfig, RateLimitScope,
};
use tracing::{info, warn};

use super::activation::AccountActivation;
use super::chains::{
    normalize_address, normalize_tx_hash, ChainVerifiers, VerificationOutcome,
    VerificationRequest,
};
use super::enforce_attempt_limit;
use super::intent_ledger::IntentLedger;
use super::money::{cents_to_micro_usd, usd_to_cents};
use crate::error::PaymentError;
use crate::middleware::metrics::record_verification;
use crate::models::{
    Entitlement, IntentStatus, NewIntent, NewPayment, Payment, PaymentProduct, PaymentRail,
    PaymentStatus, VerifyPaymentRequest, VerifyPaymentResponse,
};
use crate::repositories::PaymentStore;

/// Result of a verification that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Success { tier: String },
    Pending { confirmations_remaining: u64 },
}

impl From<VerifyOutcome> for VerifyPaymentResponse {
    fn from(outcome: VerifyOutcome) -> Self {
        match outcome {
            VerifyOutcome::Success { tier } => VerifyPaymentResponse::success(tier),
            VerifyOutcome::Pending {
                confirmations_remaining,
            } => VerifyPaymentResponse::pending(confirmations_remaining),
        }
    }
}

#[derive(Clone)]
pub struct OnChainService {
    store: Arc<dyn PaymentStore>,
    config: Arc<PaymentConfig>,
    limiter: Arc<dyn AttemptLimiter>,
    verifiers: ChainVerifiers,
    ledger: IntentLedger,
    activation: AccountActivation,
}

impl OnChainService {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        config: Arc<PaymentConfig>,
        limiter: Arc<dyn AttemptLimiter>,
        verifiers: ChainVerifiers,
        ledger: IntentLedger,
        activation: AccountActivation,
    ) -> Self {
        Self {
            store,
            config,
            limiter,
            verifiers,
            ledger,
            activation,
        }
    }

    pub async fn verify(
        &self,
        user_id: &str,
        request: &VerifyPaymentRequest,
    ) -> Result<VerifyOutcome, PaymentError> {
        enforce_attempt_limit(
            self.limiter.as_ref(),
            RateLimitScope::Verification(user_id.to_string()),
            AttemptPolicy::VERIFICATION,
        )
        .await?;

        let family = request.chain_type;
        let product = self
            .store
            .find_active_product(&request.product_id)
            .await?
            .ok_or_else(|| PaymentError::ProductNotFound(request.product_id.clone()))?;
        let amount_cents = self.resolve_amount(&product, request).await?;

        if amount_cents == 0 {
            return self.settle_free(user_id, request, &product).await;
        }

        let chain = match family {
            ChainFamily::Evm => Some(
                request
                    .chain
                    .as_deref()
                    .map(|c| c.trim().to_lowercase())
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| PaymentError::validation("chain is required for EVM"))?,
            ),
            ChainFamily::Solana | ChainFamily::Cardano => None,
        };
        let tx_hash = normalize_tx_hash(family, &request.tx_hash)?;
        let sender = normalize_address(family, &request.claimed_sender_wallet)?;

        let treasury = self.config.require_treasury(family)?;
        let treasury = normalize_address(family, treasury).map_err(|_| {
            PaymentError::Misconfigured(ConfigError::Invalid {
                var: family.treasury_env_var().to_string(),
                reason: "not a valid address".to_string(),
            })
        })?;

        let mut verification = VerificationRequest {
            chain_family: family,
            chain: chain.clone(),
            tx_hash: tx_hash.clone(),
            claimed_sender: sender.clone(),
            expected_micro_usd: 0,
            treasury,
        };
        let verifier = self.verifiers.for_family(family);
        verifier.preflight(&verification)?;

        let rail = PaymentRail::from(family);
        let mut intent = NewIntent::new(
            &request.idempotency_key,
            user_id,
            &product,
            amount_cents,
            rail,
        );
        intent.invite_code_id = request.invite_code_id.clone();
        let claim = self.ledger.get_or_create_intent(intent).await?;

        if claim.intent().status() == IntentStatus::Completed {
            record_verification(family.as_str(), "cached");
            return Ok(VerifyOutcome::Success { tier: product.tier });
        }

        let claimed = NewPayment {
            user_id: user_id.to_string(),
            product_id: Some(product.id.clone()),
            rail,
            provider_payment_id: tx_hash.clone(),
            idempotency_key: Some(request.idempotency_key.clone()),
            amount_cents,
            currency: product.currency.clone(),
            chain: Some(chain.unwrap_or_else(|| family.as_str().to_string())),
            wallet_address: Some(sender),
        };
        let payment = match self.store.insert_pending_payment(claimed).await? {
            Some(payment) => payment,
            None => match self
                .resolve_claim_conflict(user_id, &tx_hash, request, &product)
                .await?
            {
                ClaimConflict::Retry(payment) => payment,
                ClaimConflict::AlreadySettled => {
                    record_verification(family.as_str(), "cached");
                    return Ok(VerifyOutcome::Success { tier: product.tier });
                }
            },
        };

        verification.expected_micro_usd = cents_to_micro_usd(amount_cents);
        let outcome = verifier.verify(&verification).await;

        self.apply_outcome(outcome, &payment, &product, rail, &verification)
            .await
    }

    /// Zero-priced products activate without touching a chain
    async fn settle_free(
        &self,
        user_id: &str,
        request: &VerifyPaymentRequest,
        product: &PaymentProduct,
    ) -> Result<VerifyOutcome, PaymentError> {
        let chain_type = request.chain_type.as_str();
        let mut intent = NewIntent::new(
            &request.idempotency_key,
            user_id,
            product,
            0,
            PaymentRail::Free,
        );
        intent.invite_code_id = request.invite_code_id.clone();
        let claim = self.ledger.get_or_create_intent(intent).await?;

        if claim.intent().status() == IntentStatus::Completed {
            record_verification(chain_type, "cached");
        } else {
            self.activation
                .activate_free(user_id, product, &request.idempotency_key)
                .await?;
            self.ledger.mark_completed(&request.idempotency_key).await?;
            record_verification(chain_type, "free");
        }

        Ok(VerifyOutcome::Success {
            tier: product.tier.clone(),
        })
    }

    /// Price in cents, honouring a live invite code for this product
    async fn resolve_amount(
        &self,
        product: &PaymentProduct,
        request: &VerifyPaymentRequest,
    ) -> Result<i64, PaymentError> {
        let Some(invite_code_id) = &request.invite_code_id else {
            if request.amount_override_usd.is_some() {
                return Err(PaymentError::validation(
                    "amountOverrideUSD requires inviteCodeId",
                ));
            }
            return Ok(product.price_cents);
        };

        let invite_price = self
            .store
            .find_invite_price(invite_code_id, &product.id)
            .await?
            .ok_or_else(|| {
                PaymentError::validation("Invite code is not valid for this product")
            })?;

        if let Some(override_usd) = &request.amount_override_usd {
            let override_cents = usd_to_cents(&override_usd.to_string()).ok_or_else(|| {
                PaymentError::validation(
                    "amountOverrideUSD must be a USD amount with at most two decimals",
                )
            })?;
            if override_cents != invite_price {
                return Err(PaymentError::validation(
                    "amountOverrideUSD does not match the invite price",
                ));
            }
        }

        Ok(invite_price)
    }

    /// The hash or the key is already claimed; decide what that means
    async fn resolve_claim_conflict(
        &self,
        user_id: &str,
        tx_hash: &str,
        request: &VerifyPaymentRequest,
        product: &PaymentProduct,
    ) -> Result<ClaimConflict, PaymentError> {
        if let Some(existing) = self.store.find_payment_by_provider_id(tx_hash).await? {
            if existing.user_id != user_id {
                warn!(
                    tx_hash = %tx_hash,
                    owner = %existing.user_id,
                    user_id = %user_id,
                    status = %existing.status,
                    "Transaction hash resubmitted by a different user"
                );
                return Err(PaymentError::conflict(
                    "Transaction is already claimed by another account",
                ));
            }

            return match existing.status() {
                // Settled under this very request; only the intent lagged
                PaymentStatus::Completed
                    if existing.idempotency_key.as_deref()
                        == Some(request.idempotency_key.as_str())
                        && existing.product_id.as_deref() == Some(product.id.as_str()) =>
                {
                    self.ledger
                        .mark_completed(&request.idempotency_key)
                        .await?;
                    Ok(ClaimConflict::AlreadySettled)
                }
                PaymentStatus::Completed => {
                    warn!(
                        tx_hash = %tx_hash,
                        user_id = %user_id,
                        idempotency_key = %request.idempotency_key,
                        product_id = %product.id,
                        "Settled transaction resubmitted for another request"
                    );
                    Err(PaymentError::conflict(
                        "Transaction already paid for an earlier request",
                    ))
                }
                PaymentStatus::Failed => Err(PaymentError::conflict(format!(
                    "Transaction was already rejected: {}",
                    existing.failure_reason.as_deref().unwrap_or("unknown reason")
                ))),
                PaymentStatus::Pending
                    if existing.idempotency_key.as_deref()
                        == Some(request.idempotency_key.as_str()) =>
                {
                    Ok(ClaimConflict::Retry(existing))
                }
                PaymentStatus::Pending => Err(PaymentError::conflict(
                    "Transaction is being verified under another idempotencyKey",
                )),
            };
        }

        match self
            .store
            .find_payment_by_idempotency_key(&request.idempotency_key)
            .await?
        {
            Some(existing) => {
                warn!(
                    idempotency_key = %request.idempotency_key,
                    tx_hash = %tx_hash,
                    claimed_tx_hash = %existing.provider_payment_id,
                    "Idempotency key reused for a different transaction"
                );
                Err(PaymentError::conflict(
                    "idempotencyKey was already used for a different transaction",
                ))
            }
            None => Err(PaymentError::conflict(
                "Payment claim changed concurrently; resubmit",
            )),
        }
    }

    async fn apply_outcome(
        &self,
        outcome: VerificationOutcome,
        payment: &Payment,
        product: &PaymentProduct,
        rail: PaymentRail,
        request: &VerificationRequest,
    ) -> Result<VerifyOutcome, PaymentError> {
        let chain_type = request.chain_family.as_str();

        match outcome {
            VerificationOutcome::Verified {
                received_micro_usd,
                asset,
            } => {
                let entitlement = Entitlement::for_product(product);
                self.activation
                    .settle(payment, Some(received_micro_usd), &entitlement, rail)
                    .await?;
                if let Some(key) = &payment.idempotency_key {
                    self.ledger.mark_completed(key).await?;
                }
                record_verification(chain_type, "success");
                info!(
                    user_id = %payment.user_id,
                    tx_hash = %request.tx_hash,
                    chain = ?request.chain,
                    asset = %asset,
                    received_micro_usd,
                    "On-chain payment verified"
                );
                Ok(VerifyOutcome::Success {
                    tier: product.tier.clone(),
                })
            }
            VerificationOutcome::Pending {
                confirmations_remaining,
            } => {
                record_verification(chain_type, "pending");
                info!(
                    tx_hash = %request.tx_hash,
                    confirmations_remaining,
                    "Awaiting confirmations"
                );
                Ok(VerifyOutcome::Pending {
                    confirmations_remaining,
                })
            }
            VerificationOutcome::NotFound => {
                self.store.release_pending_payment(&payment.id).await?;
                record_verification(chain_type, "not_found");
                Err(PaymentError::TransactionNotFound)
            }
            VerificationOutcome::Rejected(reason) if reason.is_terminal() => {
                self.store.fail_payment(&payment.id, reason.code()).await?;
                record_verification(chain_type, "rejected");
                info!(
                    user_id = %payment.user_id,
                    tx_hash = %request.tx_hash,
                    reason = reason.code(),
                    "On-chain payment rejected"
                );
                Err(PaymentError::Rejected(reason))
            }
            VerificationOutcome::Rejected(reason) => {
                self.store.release_pending_payment(&payment.id).await?;
                record_verification(chain_type, "rejected");
                warn!(
                    user_id = %payment.user_id,
                    tx_hash = %request.tx_hash,
                    claimed_sender = %request.claimed_sender,
                    reason = reason.code(),
                    "Transaction does not belong to the caller"
                );
                Err(PaymentError::Rejected(reason))
            }
            VerificationOutcome::Unavailable(message) => {
                self.store.release_pending_payment(&payment.id).await?;
                record_verification(chain_type, "unavailable");
                warn!(
                    tx_hash = %request.tx_hash,
                    error = %message,
                    "Chain verification unavailable; claim released"
                );
                Err(PaymentError::Unavailable(message))
            }
        }
    }
}

enum ClaimConflict {
    /// This user's own pending claim under the same key
    Retry(Payment),
    AlreadySettled,
}
