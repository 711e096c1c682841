//! Payment intent ledger
//!
//! Collapses repeated requests carrying the same idempotency key into one
//! intent. Concurrent duplicates race on the UNIQUE key: the loser's insert
//! returns nothing and it reads the winner's row instead. No in-process
//! locking is involved, so this holds across any number of instances.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::PaymentError;
use crate::models::{NewIntent, PaymentIntent};
use crate::repositories::PaymentStore;

/// Outcome of claiming an idempotency key
#[derive(Debug, Clone)]
pub enum IntentClaim {
    /// This request created the intent
    Created(PaymentIntent),
    /// The key was already in use by an equivalent request
    Existing(PaymentIntent),
}

impl IntentClaim {
    pub fn intent(&self) -> &PaymentIntent {
        match self {
            IntentClaim::Created(intent) | IntentClaim::Existing(intent) => intent,
        }
    }

    pub fn into_intent(self) -> PaymentIntent {
        match self {
            IntentClaim::Created(intent) | IntentClaim::Existing(intent) => intent,
        }
    }
}

#[derive(Clone)]
pub struct IntentLedger {
    store: Arc<dyn PaymentStore>,
}

impl IntentLedger {
    pub fn new(store: Arc<dyn PaymentStore>) -> Self {
        Self { store }
    }

    /// Return the intent for this key, creating it on first use
    pub async fn get_or_create_intent(
        &self,
        intent: NewIntent,
    ) -> Result<IntentClaim, PaymentError> {
        if let Some(created) = self.store.insert_intent(intent.clone()).await? {
            debug!(
                idempotency_key = %created.idempotency_key,
                user_id = %created.user_id,
                product_id = %created.product_id,
                "Created payment intent"
            );
            return Ok(IntentClaim::Created(created));
        }

        let existing = self
            .store
            .find_intent(&intent.idempotency_key)
            .await?
            .ok_or_else(|| PaymentError::internal("Intent missing after key conflict"))?;

        check_reuse(&existing, &intent, Utc::now())?;

        debug!(
            idempotency_key = %existing.idempotency_key,
            status = %existing.status,
            "Reusing payment intent"
        );
        Ok(IntentClaim::Existing(existing))
    }

    pub async fn mark_completed(&self, idempotency_key: &str) -> Result<(), PaymentError> {
        self.store.mark_intent_completed(idempotency_key).await?;
        Ok(())
    }
}

/// A key may only be replayed by the same user for the same purchase
fn check_reuse(
    existing: &PaymentIntent,
    requested: &NewIntent,
    now: DateTime<Utc>,
) -> Result<(), PaymentError> {
    let same_request = existing.user_id == requested.user_id
        && existing.product_id == requested.product_id
        && existing.amount_cents == requested.amount_cents
        && existing.rail == requested.rail.as_str();

    if !same_request {
        warn!(
            idempotency_key = %existing.idempotency_key,
            owner = %existing.user_id,
            user_id = %requested.user_id,
            "Idempotency key reused with different parameters"
        );
        return Err(PaymentError::conflict(
            "idempotencyKey was already used for a different request",
        ));
    }

    if existing.is_expired(now) {
        return Err(PaymentError::conflict(
            "Payment intent expired; retry with a new idempotencyKey",
        ));
    }

    Ok(())
}
