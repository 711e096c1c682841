//! Product catalog and invite pricing

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::PgPaymentStore;
use crate::models::PaymentProduct;

#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Product open for new purchases
    async fn find_active_product(&self, product_id: &str) -> Result<Option<PaymentProduct>>;

    /// Product regardless of `active`, for settling purchases already paid
    async fn find_product(&self, product_id: &str) -> Result<Option<PaymentProduct>>;

    /// Price of a live invite code for this product, in cents
    async fn find_invite_price(
        &self,
        invite_code_id: &str,
        product_id: &str,
    ) -> Result<Option<i64>>;
}

#[async_trait]
impl ProductRepository for PgPaymentStore {
    async fn find_active_product(&self, product_id: &str) -> Result<Option<PaymentProduct>> {
        let product = sqlx::query_as::<_, PaymentProduct>(
            r#"
            SELECT * FROM payment_products
            WHERE id = $1 AND active = TRUE
            "#,
        )
        .bind(product_id)
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch product")?;

        Ok(product)
    }

    async fn find_product(&self, product_id: &str) -> Result<Option<PaymentProduct>> {
        let product = sqlx::query_as::<_, PaymentProduct>(
            r#"
            SELECT * FROM payment_products
            WHERE id = $1
            "#,
        )
        .bind(product_id)
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch product")?;

        Ok(product)
    }

    async fn find_invite_price(
        &self,
        invite_code_id: &str,
        product_id: &str,
    ) -> Result<Option<i64>> {
        let price = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT price_cents FROM invite_codes
            WHERE id = $1
              AND product_id = $2
              AND active = TRUE
              AND (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
        .bind(invite_code_id)
        .bind(product_id)
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch invite code")?;

        Ok(price)
    }
}
