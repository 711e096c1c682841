//! Account activation
//!
//! The single entitlement-setting path shared by every rail. Activation
//! sets the tier to its target value, so calling it twice for the same user
//! is harmless. One-time bonus credits ride only on the pending→completed
//! transition of a payment, which the UNIQUE provider id makes happen once.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::PaymentError;
use crate::middleware::metrics::record_activation;
use crate::models::{
    Entitlement, NewPayment, Payment, PaymentProduct, PaymentRail, PaymentStatus,
};
use crate::repositories::PaymentStore;

#[derive(Clone)]
pub struct AccountActivation {
    store: Arc<dyn PaymentStore>,
}

impl AccountActivation {
    pub fn new(store: Arc<dyn PaymentStore>) -> Self {
        Self { store }
    }

    /// Set the user's tier; idempotent
    ///
    /// `metadata` travels into the log line only; entitlement fields are
    /// never derived from caller-supplied data.
    pub async fn activate(
        &self,
        user_id: &str,
        tier: &str,
        rail: PaymentRail,
        metadata: &serde_json::Value,
    ) -> Result<(), PaymentError> {
        self.store
            .apply_entitlement(user_id, &Entitlement::tier_only(tier))
            .await?;

        record_activation(rail.as_str());
        info!(
            user_id = %user_id,
            tier = %tier,
            rail = rail.as_str(),
            metadata = %metadata,
            "Account activated"
        );
        Ok(())
    }

    /// Drop the user back to the free tier if they still hold `tier`
    pub async fn deactivate(&self, user_id: &str, tier: &str) -> Result<bool, PaymentError> {
        let revoked = self.store.revoke_entitlement(user_id, tier).await?;
        info!(
            user_id = %user_id,
            tier = %tier,
            revoked = revoked,
            "Entitlement revoked"
        );
        Ok(revoked)
    }

    /// Activate a zero-priced product without any settlement
    ///
    /// The zero-amount record is keyed per user and product, so a bonus
    /// attached to a free product is granted once however many
    /// idempotency keys the user presents.
    pub async fn activate_free(
        &self,
        user_id: &str,
        product: &PaymentProduct,
        idempotency_key: &str,
    ) -> Result<Payment, PaymentError> {
        let entitlement = Entitlement::for_product(product);
        let provider_payment_id = format!("free_{}_{}", product.id, user_id);

        let record = NewPayment {
            user_id: user_id.to_string(),
            product_id: Some(product.id.clone()),
            rail: PaymentRail::Free,
            provider_payment_id: provider_payment_id.clone(),
            idempotency_key: Some(idempotency_key.to_string()),
            amount_cents: 0,
            currency: product.currency.clone(),
            chain: None,
            wallet_address: None,
        };

        if let Some(payment) = self
            .store
            .record_completed_payment(record, &entitlement)
            .await?
        {
            self.record_settlement(&payment, &entitlement, PaymentRail::Free);
            return Ok(payment);
        }

        let existing = self
            .store
            .find_payment_by_provider_id(&provider_payment_id)
            .await?
            .filter(|p| p.user_id == user_id && p.status() == PaymentStatus::Completed)
            .ok_or_else(|| {
                PaymentError::conflict("idempotencyKey was already used for another payment")
            })?;

        self.activate(
            user_id,
            &product.tier,
            PaymentRail::Free,
            &serde_json::Value::Null,
        )
        .await?;
        Ok(existing)
    }

    /// Log a payment whose completion transaction also granted `entitlement`
    pub fn record_settlement(
        &self,
        payment: &Payment,
        entitlement: &Entitlement,
        rail: PaymentRail,
    ) {
        record_activation(rail.as_str());
        info!(
            user_id = %payment.user_id,
            payment_id = %payment.id,
            provider_payment_id = %payment.provider_payment_id,
            tier = %entitlement.tier,
            bonus_credits = entitlement.bonus_credits,
            "Payment settled and account activated"
        );
    }

    /// Complete a pending payment and grant its entitlement in one step
    ///
    /// When another request already completed the payment this converges
    /// on the same tier without granting the bonus again.
    pub async fn settle(
        &self,
        payment: &Payment,
        received_micro_usd: Option<i64>,
        entitlement: &Entitlement,
        rail: PaymentRail,
    ) -> Result<Payment, PaymentError> {
        if let Some(completed) = self
            .store
            .complete_payment(&payment.id, received_micro_usd, entitlement)
            .await?
        {
            self.record_settlement(&completed, entitlement, rail);
            return Ok(completed);
        }

        // Lost the race for the pending→completed transition
        let current = self
            .store
            .find_payment_by_provider_id(&payment.provider_payment_id)
            .await?
            .ok_or_else(|| PaymentError::conflict("Payment claim was released; resubmit"))?;

        match current.status() {
            PaymentStatus::Completed if current.user_id == payment.user_id => {
                self.activate(
                    &current.user_id,
                    &entitlement.tier,
                    rail,
                    &serde_json::Value::Null,
                )
                .await?;
                Ok(current)
            }
            PaymentStatus::Completed => {
                warn!(
                    provider_payment_id = %current.provider_payment_id,
                    owner = %current.user_id,
                    user_id = %payment.user_id,
                    "Payment completed for a different user"
                );
                Err(PaymentError::conflict(
                    "Transaction already credited to another account",
                ))
            }
            PaymentStatus::Failed => Err(PaymentError::conflict(format!(
                "Payment already failed: {}",
                current.failure_reason.as_deref().unwrap_or("unknown reason")
            ))),
            PaymentStatus::Pending => Err(PaymentError::internal(
                "Payment still pending after completion attempt",
            )),
        }
    }
}
