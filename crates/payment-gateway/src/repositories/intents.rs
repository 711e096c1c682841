//! Payment intent (idempotency ledger) repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use super::PgPaymentStore;
use crate::models::{NewIntent, PaymentIntent};

#[async_trait]
pub trait IntentRepository: Send + Sync {
    /// Insert a new intent; `None` if the idempotency key already exists
    async fn insert_intent(&self, intent: NewIntent) -> Result<Option<PaymentIntent>>;

    async fn find_intent(&self, idempotency_key: &str) -> Result<Option<PaymentIntent>>;

    /// Record the gateway session on a pending intent
    async fn mark_intent_created(
        &self,
        idempotency_key: &str,
        session_id: &str,
        checkout_url: &str,
    ) -> Result<()>;

    async fn mark_intent_completed(&self, idempotency_key: &str) -> Result<()>;
}

#[async_trait]
impl IntentRepository for PgPaymentStore {
    async fn insert_intent(&self, intent: NewIntent) -> Result<Option<PaymentIntent>> {
        let id = Uuid::new_v4().to_string();

        let inserted = sqlx::query_as::<_, PaymentIntent>(
            r#"
            INSERT INTO payment_intents (
                id, idempotency_key, user_id, product_id, amount_cents, currency,
                status, rail, invite_code_id, expires_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8, $9, NOW(), NOW())
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&intent.idempotency_key)
        .bind(&intent.user_id)
        .bind(&intent.product_id)
        .bind(intent.amount_cents)
        .bind(&intent.currency)
        .bind(intent.rail.as_str())
        .bind(&intent.invite_code_id)
        .bind(intent.expires_at)
        .fetch_optional(self.pool())
        .await
        .context("Failed to insert payment intent")?;

        Ok(inserted)
    }

    async fn find_intent(&self, idempotency_key: &str) -> Result<Option<PaymentIntent>> {
        let intent = sqlx::query_as::<_, PaymentIntent>(
            r#"
            SELECT * FROM payment_intents
            WHERE idempotency_key = $1
            "#,
        )
        .bind(idempotency_key)
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch payment intent")?;

        Ok(intent)
    }

    async fn mark_intent_created(
        &self,
        idempotency_key: &str,
        session_id: &str,
        checkout_url: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE payment_intents
            SET status = 'created', checkout_session_id = $2, checkout_url = $3, updated_at = NOW()
            WHERE idempotency_key = $1 AND status = 'pending'
            "#,
        )
        .bind(idempotency_key)
        .bind(session_id)
        .bind(checkout_url)
        .execute(self.pool())
        .await
        .context("Failed to record checkout session")?;

        Ok(())
    }

    async fn mark_intent_completed(&self, idempotency_key: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE payment_intents
            SET status = 'completed', updated_at = NOW()
            WHERE idempotency_key = $1 AND status <> 'completed'
            "#,
        )
        .bind(idempotency_key)
        .execute(self.pool())
        .await
        .context("Failed to complete payment intent")?;

        Ok(())
    }
}
