//! Payment Gateway
//!
//! HTTP server for card checkout, card gateway webhooks and on-chain
//! payment verification.

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use shared::{db, AttemptLimiter, Config, RateLimiter};
use tracing_actix_web::TracingLogger;

use payment_gateway::middleware::{self, metrics, JwtSecret, PrometheusMetrics};
use payment_gateway::repositories::{PaymentStore, PgPaymentStore};
use payment_gateway::routes;
use payment_gateway::services::{
    ChainVerifiers, CheckoutGateway, PaymentServices, StripeService,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    shared::init_tracing();

    tracing::info!("Starting Payment Gateway...");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    metrics::init_metrics().context("Failed to install Prometheus recorder")?;

    // Create database connection pool
    let db_pool = db::create_pool(&config.database)
        .await
        .context("Failed to create database pool")?;

    // Run database migrations
    db::run_migrations(&db_pool)
        .await
        .context("Failed to run database migrations")?;

    db::check_health(&db_pool)
        .await
        .context("Database health check failed")?;

    let redis = shared::redis::create_client(&config.redis.connection_url())
        .await
        .context("Failed to connect to Redis")?;
    let limiter: Arc<dyn AttemptLimiter> = Arc::new(RateLimiter::new(redis));

    let payments = config.payments.clone();
    let rails = payments.enabled_rails();
    tracing::info!(
        card = rails.card,
        evm_chains = ?rails.evm_chains,
        solana = rails.solana,
        cardano = rails.cardano,
        "Payment rails configured"
    );

    // The card rail stays unavailable (server_misconfigured) until both
    // Stripe secrets are set
    let gateway: Option<Arc<dyn CheckoutGateway>> = match payments.require_stripe() {
        Ok(settings) => {
            let stripe: Arc<dyn CheckoutGateway> = Arc::new(
                StripeService::new(&settings).context("Failed to initialise Stripe client")?,
            );
            Some(stripe)
        }
        Err(e) => {
            tracing::warn!(reason = %e, "Card rail disabled");
            None
        }
    };

    let verifiers = ChainVerifiers::from_config(payments.clone())
        .context("Failed to initialise chain verifiers")?;

    let store: Arc<dyn PaymentStore> = Arc::new(PgPaymentStore::new(db_pool.clone()));
    let services = PaymentServices::new(store, payments, limiter, verifiers, gateway);

    let services = web::Data::new(services);
    let jwt_secret = web::Data::new(JwtSecret::new(config.server.jwt_secret.clone()));
    let pool = web::Data::new(db_pool);

    let server_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Payment Gateway listening on {}", server_addr);

    HttpServer::new(move || {
        App::new()
            .wrap(PrometheusMetrics::new())
            .wrap(TracingLogger::default())
            .wrap(middleware::cors())
            .app_data(services.clone())
            .app_data(jwt_secret.clone())
            .app_data(pool.clone())
            .configure(routes::configure)
    })
    .bind(&server_addr)
    .with_context(|| format!("Failed to bind to {}", server_addr))?
    .run()
    .await
    .context("Server error")?;

    Ok(())
}
