//! Webhook event log
//!
//! UNIQUE (provider, event_id) is the replay guard: a redelivered event
//! fails the insert and is acknowledged without running handlers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use super::PgPaymentStore;
use crate::models::WebhookEventRecord;

#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Log a first sighting of an event; `None` if already logged
    async fn insert_event(
        &self,
        provider: &str,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<Option<WebhookEventRecord>>;

    async fn mark_event_processed(&self, id: &str) -> Result<()>;

    async fn mark_event_failed(&self, id: &str, error: &str) -> Result<()>;
}

#[async_trait]
impl WebhookEventRepository for PgPaymentStore {
    async fn insert_event(
        &self,
        provider: &str,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<Option<WebhookEventRecord>> {
        let id = Uuid::new_v4().to_string();

        let event = sqlx::query_as::<_, WebhookEventRecord>(
            r#"
            INSERT INTO webhook_events (id, provider, event_id, event_type, payload, received_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (provider, event_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(provider)
        .bind(event_id)
        .bind(event_type)
        .bind(payload)
        .fetch_optional(self.pool())
        .await
        .context("Failed to log webhook event")?;

        Ok(event)
    }

    async fn mark_event_processed(&self, id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET processed = TRUE, processing_error = NULL, processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(self.pool())
        .await
        .context("Failed to mark webhook event processed")?;

        Ok(())
    }

    async fn mark_event_failed(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET processed = FALSE, processing_error = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(self.pool())
        .await
        .context("Failed to record webhook processing error")?;

        Ok(())
    }
}
