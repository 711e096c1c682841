//! Subscription lifecycle repository (written only from gateway webhooks)

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::PgPaymentStore;
use crate::models::{Subscription, SubscriptionUpsert};

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn upsert_subscription(&self, subscription: SubscriptionUpsert) -> Result<Subscription>;

    async fn find_subscription(&self, provider_sub_id: &str) -> Result<Option<Subscription>>;

    /// Update status and, when given, the billing period of a known subscription
    async fn refresh_subscription(
        &self,
        provider_sub_id: &str,
        status: &str,
        current_period_start: Option<DateTime<Utc>>,
        current_period_end: Option<DateTime<Utc>>,
    ) -> Result<Option<Subscription>>;
}

#[async_trait]
impl SubscriptionRepository for PgPaymentStore {
    async fn upsert_subscription(&self, subscription: SubscriptionUpsert) -> Result<Subscription> {
        let id = Uuid::new_v4().to_string();

        let row = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (
                id, provider_sub_id, user_id, product_id, tier, status,
                current_period_start, current_period_end, cancel_at_period_end,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
            ON CONFLICT (provider_sub_id) DO UPDATE
            SET status = EXCLUDED.status,
                tier = EXCLUDED.tier,
                product_id = COALESCE(EXCLUDED.product_id, subscriptions.product_id),
                current_period_start = COALESCE(EXCLUDED.current_period_start, subscriptions.current_period_start),
                current_period_end = COALESCE(EXCLUDED.current_period_end, subscriptions.current_period_end),
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&subscription.provider_sub_id)
        .bind(&subscription.user_id)
        .bind(&subscription.product_id)
        .bind(&subscription.tier)
        .bind(&subscription.status)
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.cancel_at_period_end)
        .fetch_one(self.pool())
        .await
        .context("Failed to upsert subscription")?;

        Ok(row)
    }

    async fn find_subscription(&self, provider_sub_id: &str) -> Result<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT * FROM subscriptions
            WHERE provider_sub_id = $1
            "#,
        )
        .bind(provider_sub_id)
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch subscription")?;

        Ok(subscription)
    }

    async fn refresh_subscription(
        &self,
        provider_sub_id: &str,
        status: &str,
        current_period_start: Option<DateTime<Utc>>,
        current_period_end: Option<DateTime<Utc>>,
    ) -> Result<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET status = $2,
                current_period_start = COALESCE($3, current_period_start),
                current_period_end = COALESCE($4, current_period_end),
                updated_at = NOW()
            WHERE provider_sub_id = $1
            RETURNING *
            "#,
        )
        .bind(provider_sub_id)
        .bind(status)
        .bind(current_period_start)
        .bind(current_period_end)
        .fetch_optional(self.pool())
        .await
        .context("Failed to refresh subscription")?;

        Ok(subscription)
    }
}
