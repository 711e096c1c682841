//! Payment record repository
//!
//! `provider_payment_id` (gateway session/invoice id or transaction hash)
//! and `idempotency_key` are both UNIQUE. A payment leaves `pending`
//! exactly once; completing it and granting its entitlement share one
//! transaction so a bonus is credited once per settlement.

use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use super::accounts::upsert_entitlement;
use super::PgPaymentStore;
use crate::models::{Entitlement, NewPayment, Payment};

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Claim a provider id for a user; `None` on any uniqueness conflict
    async fn insert_pending_payment(&self, payment: NewPayment) -> Result<Option<Payment>>;

    async fn find_payment_by_provider_id(&self, provider_payment_id: &str)
        -> Result<Option<Payment>>;

    async fn find_payment_by_idempotency_key(&self, idempotency_key: &str)
        -> Result<Option<Payment>>;

    /// Transition a pending payment to completed and grant the entitlement
    ///
    /// `None` when the payment was no longer pending.
    async fn complete_payment(
        &self,
        payment_id: &str,
        received_micro_usd: Option<i64>,
        entitlement: &Entitlement,
    ) -> Result<Option<Payment>>;

    /// Transition a pending payment to failed; `None` when no longer pending
    async fn fail_payment(&self, payment_id: &str, reason: &str) -> Result<Option<Payment>>;

    /// Delete a pending claim that turned out not to belong to its user
    async fn release_pending_payment(&self, payment_id: &str) -> Result<bool>;

    /// Gateway rail: insert completed, or promote the pending row with the
    /// same idempotency key, and grant the entitlement
    ///
    /// `None` when the row was already completed or failed.
    async fn upsert_completed_payment(
        &self,
        payment: NewPayment,
        entitlement: &Entitlement,
    ) -> Result<Option<Payment>>;

    /// Insert an already-settled payment and grant the entitlement
    ///
    /// `None` on any uniqueness conflict (nothing is granted).
    async fn record_completed_payment(
        &self,
        payment: NewPayment,
        entitlement: &Entitlement,
    ) -> Result<Option<Payment>>;

    async fn fail_payment_by_provider_id(
        &self,
        provider_payment_id: &str,
        reason: &str,
    ) -> Result<Option<Payment>>;
}

#[async_trait]
impl PaymentRepository for PgPaymentStore {
    async fn insert_pending_payment(&self, payment: NewPayment) -> Result<Option<Payment>> {
        let id = Uuid::new_v4().to_string();

        let inserted = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (
                id, user_id, product_id, rail, provider_payment_id, idempotency_key,
                status, amount_cents, currency, chain, wallet_address, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8, $9, $10, NOW())
            ON CONFLICT DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&payment.user_id)
        .bind(&payment.product_id)
        .bind(payment.rail.as_str())
        .bind(&payment.provider_payment_id)
        .bind(&payment.idempotency_key)
        .bind(payment.amount_cents)
        .bind(&payment.currency)
        .bind(&payment.chain)
        .bind(&payment.wallet_address)
        .fetch_optional(self.pool())
        .await
        .context("Failed to insert pending payment")?;

        Ok(inserted)
    }

    async fn find_payment_by_provider_id(
        &self,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT * FROM payments
            WHERE provider_payment_id = $1
            "#,
        )
        .bind(provider_payment_id)
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch payment by provider id")?;

        Ok(payment)
    }

    async fn find_payment_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT * FROM payments
            WHERE idempotency_key = $1
            "#,
        )
        .bind(idempotency_key)
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch payment by idempotency key")?;

        Ok(payment)
    }

    async fn complete_payment(
        &self,
        payment_id: &str,
        received_micro_usd: Option<i64>,
        entitlement: &Entitlement,
    ) -> Result<Option<Payment>> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let completed = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = 'completed',
                received_micro_usd = COALESCE($2, received_micro_usd),
                failure_reason = NULL,
                completed_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(payment_id)
        .bind(received_micro_usd)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to complete payment")?;

        if let Some(payment) = &completed {
            upsert_entitlement(&mut *tx, &payment.user_id, entitlement).await?;
        }

        tx.commit().await.context("Failed to commit payment completion")?;

        Ok(completed)
    }

    async fn fail_payment(&self, payment_id: &str, reason: &str) -> Result<Option<Payment>> {
        let failed = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = 'failed', failure_reason = $2, completed_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(payment_id)
        .bind(reason)
        .fetch_optional(self.pool())
        .await
        .context("Failed to fail payment")?;

        Ok(failed)
    }

    async fn release_pending_payment(&self, payment_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM payments
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(payment_id)
        .execute(self.pool())
        .await
        .context("Failed to release pending payment")?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_completed_payment(
        &self,
        payment: NewPayment,
        entitlement: &Entitlement,
    ) -> Result<Option<Payment>> {
        let id = Uuid::new_v4().to_string();
        let mut tx = self
            .pool()
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let completed = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (
                id, user_id, product_id, rail, provider_payment_id, idempotency_key,
                status, amount_cents, currency, chain, wallet_address, created_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'completed', $7, $8, $9, $10, NOW(), NOW())
            ON CONFLICT (idempotency_key) DO UPDATE
            SET status = 'completed',
                provider_payment_id = EXCLUDED.provider_payment_id,
                amount_cents = EXCLUDED.amount_cents,
                completed_at = NOW()
            WHERE payments.status = 'pending'
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&payment.user_id)
        .bind(&payment.product_id)
        .bind(payment.rail.as_str())
        .bind(&payment.provider_payment_id)
        .bind(&payment.idempotency_key)
        .bind(payment.amount_cents)
        .bind(&payment.currency)
        .bind(&payment.chain)
        .bind(&payment.wallet_address)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to upsert completed payment")?;

        if let Some(completed) = &completed {
            upsert_entitlement(&mut *tx, &completed.user_id, entitlement).await?;
        }

        tx.commit().await.context("Failed to commit payment completion")?;

        Ok(completed)
    }

    async fn record_completed_payment(
        &self,
        payment: NewPayment,
        entitlement: &Entitlement,
    ) -> Result<Option<Payment>> {
        let id = Uuid::new_v4().to_string();
        let mut tx = self
            .pool()
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let recorded = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (
                id, user_id, product_id, rail, provider_payment_id, idempotency_key,
                status, amount_cents, currency, chain, wallet_address, created_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'completed', $7, $8, $9, $10, NOW(), NOW())
            ON CONFLICT DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&payment.user_id)
        .bind(&payment.product_id)
        .bind(payment.rail.as_str())
        .bind(&payment.provider_payment_id)
        .bind(&payment.idempotency_key)
        .bind(payment.amount_cents)
        .bind(&payment.currency)
        .bind(&payment.chain)
        .bind(&payment.wallet_address)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to record completed payment")?;

        if let Some(recorded) = &recorded {
            upsert_entitlement(&mut *tx, &recorded.user_id, entitlement).await?;
        }

        tx.commit().await.context("Failed to commit payment record")?;

        Ok(recorded)
    }

    async fn fail_payment_by_provider_id(
        &self,
        provider_payment_id: &str,
        reason: &str,
    ) -> Result<Option<Payment>> {
        let failed = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = 'failed', failure_reason = $2, completed_at = NOW()
            WHERE provider_payment_id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(provider_payment_id)
        .bind(reason)
        .fetch_optional(self.pool())
        .await
        .context("Failed to fail payment")?;

        Ok(failed)
    }
}
