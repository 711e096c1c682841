//! Account entitlement updates on the external `profiles` table

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Executor, Postgres};

use super::PgPaymentStore;
use crate::models::Entitlement;

/// Tier every account falls back to
pub const FREE_TIER: &str = "free";

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Set the tier and add any bonus credits
    ///
    /// Setting the same tier twice is a no-op; callers pass bonus credits
    /// only alongside a payment that has just completed.
    async fn apply_entitlement(&self, user_id: &str, entitlement: &Entitlement) -> Result<bool>;

    /// Drop the account back to the free tier if it still holds `tier`
    async fn revoke_entitlement(&self, user_id: &str, tier: &str) -> Result<bool>;
}

/// Entitlement upsert usable inside a payment transaction
pub(crate) async fn upsert_entitlement<'e, E>(
    executor: E,
    user_id: &str,
    entitlement: &Entitlement,
) -> Result<bool>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO profiles (user_id, tier, bonus_credits, tier_updated_at, created_at)
        VALUES ($1, $2, $3, NOW(), NOW())
        ON CONFLICT (user_id) DO UPDATE
        SET tier = EXCLUDED.tier,
            bonus_credits = profiles.bonus_credits + EXCLUDED.bonus_credits,
            tier_updated_at = CASE
                WHEN profiles.tier = EXCLUDED.tier THEN profiles.tier_updated_at
                ELSE NOW()
            END
        "#,
    )
    .bind(user_id)
    .bind(&entitlement.tier)
    .bind(entitlement.bonus_credits)
    .execute(executor)
    .await
    .context("Failed to apply entitlement")?;

    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl AccountRepository for PgPaymentStore {
    async fn apply_entitlement(&self, user_id: &str, entitlement: &Entitlement) -> Result<bool> {
        upsert_entitlement(self.pool(), user_id, entitlement).await
    }

    async fn revoke_entitlement(&self, user_id: &str, tier: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET tier = $3, tier_updated_at = NOW()
            WHERE user_id = $1 AND tier = $2
            "#,
        )
        .bind(user_id)
        .bind(tier)
        .bind(FREE_TIER)
        .execute(self.pool())
        .await
        .context("Failed to revoke entitlement")?;

        Ok(result.rows_affected() > 0)
    }
}
