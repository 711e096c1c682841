//! Repository layer for database access
//!
//! Each repository is an `async_trait` port implemented by
//! [`PgPaymentStore`]. Services receive the union [`PaymentStore`] as a
//! trait object so tests can substitute an in-memory store.
//!
//! Every write that must happen at most once is an
//! `INSERT ... ON CONFLICT DO NOTHING RETURNING *` or a conditional
//! `UPDATE ... WHERE status = 'pending' RETURNING *`. `None` from these
//! methods means another request got there first.

pub mod accounts;
pub mod intents;
pub mod payments;
pub mod products;
pub mod subscriptions;
pub mod webhooks;

use shared::DbPool;

// Re-exports
pub use accounts::AccountRepository;
pub use intents::IntentRepository;
pub use payments::PaymentRepository;
pub use products::ProductRepository;
pub use subscriptions::SubscriptionRepository;
pub use webhooks::WebhookEventRepository;

/// Everything the payment services need from storage
pub trait PaymentStore:
    ProductRepository
    + IntentRepository
    + PaymentRepository
    + WebhookEventRepository
    + SubscriptionRepository
    + AccountRepository
{
}

impl<T> PaymentStore for T where
    T: ProductRepository
        + IntentRepository
        + PaymentRepository
        + WebhookEventRepository
        + SubscriptionRepository
        + AccountRepository
{
}

/// PostgreSQL implementation of every repository
#[derive(Clone)]
pub struct PgPaymentStore {
    pool: DbPool,
}

impl PgPaymentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}
