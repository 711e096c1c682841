//! Common test utilities for integration tests
//!
//! Provides an in-memory [`PaymentStore`] that enforces the same UNIQUE
//! constraints as the SQL schema, scripted chain verifiers and card
//! gateway, and helpers for JWTs and signed webhook deliveries.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use actix_web::web;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use secrecy::Secret;
use serde_json::{json, Value};
use shared::{AttemptLimiter, AttemptPolicy, PaymentConfig, RateLimitResult, RateLimitScope};
use uuid::Uuid;

use payment_gateway::error::PaymentError;
use payment_gateway::middleware::JwtSecret;
use payment_gateway::models::{
    Entitlement, NewIntent, NewPayment, Payment, PaymentIntent, PaymentProduct, Subscription,
    SubscriptionUpsert, WebhookEventRecord,
};
use payment_gateway::repositories::{
    AccountRepository, IntentRepository, PaymentRepository, ProductRepository,
    SubscriptionRepository, WebhookEventRepository,
};
use payment_gateway::routes;
use payment_gateway::services::chains::evm::evaluate_evm;
use payment_gateway::services::chains::{evm_chain, RejectReason};
use payment_gateway::services::webhook_signature::compute_signature;
use payment_gateway::services::{
    ChainVerifier, ChainVerifiers, CheckoutGateway, CheckoutResult, CheckoutSessionParams,
    PaymentServices, VerificationOutcome, VerificationRequest,
};
use payment_gateway::services::stripe_service::StripeError;

// Test configuration constants
pub const TEST_JWT_SECRET: &str = "test_jwt_secret_for_integration_tests";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_integration_secret";
pub const EVM_TREASURY: &str = "0x2222222222222222222222222222222222222222";
pub const EVM_SENDER: &str = "0x1111111111111111111111111111111111111111";
pub const CARDANO_TREASURY: &str = "addr1q9treasuryw7x3k2m5n8p4r6s0t2u4v6w8x0y2z4a6c8d0e2f";
pub const POLYGON_USDC: &str = "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359";
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

pub const USER_A: &str = "user_a";
pub const USER_B: &str = "user_b";

// ============================================================================
// Configuration
// ============================================================================

/// Payment settings with every rail configured
pub fn test_payment_config() -> PaymentConfig {
    PaymentConfig {
        stripe_secret_key: Some(Secret::new("sk_test_integration".to_string())),
        stripe_webhook_secret: Some(Secret::new(TEST_WEBHOOK_SECRET.to_string())),
        stripe_currency: "usd".to_string(),
        evm_treasury: Some(EVM_TREASURY.to_string()),
        solana_treasury: Some("Treasury8vWqLm3dQ9xZ2nT5yRk7pHcJbGfE4sUaN1X".to_string()),
        cardano_treasury: Some(CARDANO_TREASURY.to_string()),
        evm_rpc_urls: HashMap::from([(
            "polygon".to_string(),
            "https://polygon-rpc.example.com".to_string(),
        )]),
        solana_rpc_url: Some("https://solana-rpc.example.com".to_string()),
        blockfrost_api_key: None,
        blockfrost_base_url: "https://cardano-mainnet.blockfrost.io/api/v0".to_string(),
        price_api_url: "https://prices.example.com".to_string(),
        rpc_timeout_secs: 8,
    }
}

// ============================================================================
// Auth and signature helpers
// ============================================================================

#[derive(Debug, serde::Serialize)]
struct TestClaims {
    sub: String,
    exp: i64,
    iat: i64,
}

/// Generate a JWT valid for one hour
pub fn create_test_jwt(user_id: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = TestClaims {
        sub: user_id.to_string(),
        exp: now + 3600,
        iat: now,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .expect("Failed to create test JWT")
}

pub fn bearer(user_id: &str) -> (String, String) {
    (
        "Authorization".to_string(),
        format!("Bearer {}", create_test_jwt(user_id)),
    )
}

/// `Stripe-Signature` header value for `payload`, signed now
pub fn sign_webhook(payload: &str, secret: &str) -> String {
    let timestamp = Utc::now().timestamp();
    let signature =
        compute_signature(payload.as_bytes(), timestamp, secret).expect("Failed to sign payload");
    format!("t={},v1={}", timestamp, signature)
}

pub fn new_key() -> String {
    Uuid::new_v4().to_string()
}

pub fn evm_hash(seed: u8) -> String {
    format!("0x{}", format!("{:02x}", seed).repeat(32))
}

// ============================================================================
// Catalog fixtures
// ============================================================================

pub fn product(id: &str, price_cents: i64, tier: &str, bonus_credits: i64) -> PaymentProduct {
    PaymentProduct {
        id: id.to_string(),
        name: format!("{} plan", tier),
        price_cents,
        currency: "usd".to_string(),
        tier: tier.to_string(),
        kind: "one_off".to_string(),
        billing_interval: None,
        metadata: json!({ "bonus_credits": bonus_credits }),
        active: true,
        created_at: Utc::now(),
    }
}

pub fn subscription_product(id: &str, price_cents: i64, tier: &str) -> PaymentProduct {
    PaymentProduct {
        kind: "subscription".to_string(),
        billing_interval: Some("month".to_string()),
        metadata: json!({}),
        ..product(id, price_cents, tier, 0)
    }
}

/// Store seeded with the standard catalog
///
/// - `prod_pro`: $10, tier `pro`, 100 bonus credits
/// - `prod_free`: $0, tier `starter`, 50 bonus credits
/// - `prod_business`: $20/month subscription, tier `business`
/// - invite `inv_half` prices `prod_pro` at $5
pub fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::default());
    store.add_product(product("prod_pro", 1000, "pro", 100));
    store.add_product(product("prod_free", 0, "starter", 50));
    store.add_product(subscription_product("prod_business", 2000, "business"));
    store.add_invite("inv_half", "prod_pro", 500);
    store
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub tier: String,
    pub bonus_credits: i64,
}

#[derive(Default)]
struct State {
    products: HashMap<String, PaymentProduct>,
    invites: HashMap<(String, String), i64>,
    intents: Vec<PaymentIntent>,
    payments: Vec<Payment>,
    events: Vec<WebhookEventRecord>,
    subscriptions: Vec<Subscription>,
    profiles: HashMap<String, Profile>,
}

impl State {
    fn payment_conflicts(&self, provider_payment_id: &str, key: Option<&str>) -> bool {
        self.payments.iter().any(|p| {
            p.provider_payment_id == provider_payment_id
                || (key.is_some() && p.idempotency_key.as_deref() == key)
        })
    }

    fn grant(&mut self, user_id: &str, entitlement: &Entitlement) {
        let profile = self
            .profiles
            .entry(user_id.to_string())
            .or_insert_with(|| Profile {
                tier: "free".to_string(),
                bonus_credits: 0,
            });
        profile.tier = entitlement.tier.clone();
        profile.bonus_credits += entitlement.bonus_credits;
    }
}

fn payment_row(payment: NewPayment, status: &str) -> Payment {
    let now = Utc::now();
    Payment {
        id: Uuid::new_v4().to_string(),
        user_id: payment.user_id,
        product_id: payment.product_id,
        rail: payment.rail.as_str().to_string(),
        provider_payment_id: payment.provider_payment_id,
        idempotency_key: payment.idempotency_key,
        status: status.to_string(),
        amount_cents: payment.amount_cents,
        currency: payment.currency,
        received_micro_usd: None,
        chain: payment.chain,
        wallet_address: payment.wallet_address,
        failure_reason: None,
        created_at: now,
        completed_at: (status != "pending").then_some(now),
    }
}

/// [`PaymentStore`] backed by vectors behind a mutex
///
/// Every conditional write checks and mutates under one lock, mirroring
/// the atomicity of the SQL statements it stands in for.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn add_product(&self, product: PaymentProduct) {
        self.state
            .lock()
            .unwrap()
            .products
            .insert(product.id.clone(), product);
    }

    pub fn add_invite(&self, invite_code_id: &str, product_id: &str, price_cents: i64) {
        self.state.lock().unwrap().invites.insert(
            (invite_code_id.to_string(), product_id.to_string()),
            price_cents,
        );
    }

    pub fn payments(&self) -> Vec<Payment> {
        self.state.lock().unwrap().payments.clone()
    }

    pub fn payments_for(&self, provider_payment_id: &str) -> Vec<Payment> {
        self.payments()
            .into_iter()
            .filter(|p| p.provider_payment_id == provider_payment_id)
            .collect()
    }

    pub fn intent(&self, idempotency_key: &str) -> Option<PaymentIntent> {
        self.state
            .lock()
            .unwrap()
            .intents
            .iter()
            .find(|i| i.idempotency_key == idempotency_key)
            .cloned()
    }

    pub fn events(&self) -> Vec<WebhookEventRecord> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn subscription(&self, provider_sub_id: &str) -> Option<Subscription> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .find(|s| s.provider_sub_id == provider_sub_id)
            .cloned()
    }

    pub fn profile(&self, user_id: &str) -> Option<Profile> {
        self.state.lock().unwrap().profiles.get(user_id).cloned()
    }

    pub fn set_profile(&self, user_id: &str, tier: &str) {
        self.state.lock().unwrap().profiles.insert(
            user_id.to_string(),
            Profile {
                tier: tier.to_string(),
                bonus_credits: 0,
            },
        );
    }
}

#[async_trait]
impl ProductRepository for MemoryStore {
    async fn find_active_product(&self, product_id: &str) -> Result<Option<PaymentProduct>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .products
            .get(product_id)
            .filter(|p| p.active)
            .cloned())
    }

    async fn find_product(&self, product_id: &str) -> Result<Option<PaymentProduct>> {
        Ok(self.state.lock().unwrap().products.get(product_id).cloned())
    }

    async fn find_invite_price(
        &self,
        invite_code_id: &str,
        product_id: &str,
    ) -> Result<Option<i64>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .invites
            .get(&(invite_code_id.to_string(), product_id.to_string()))
            .copied())
    }
}

#[async_trait]
impl IntentRepository for MemoryStore {
    async fn insert_intent(&self, intent: NewIntent) -> Result<Option<PaymentIntent>> {
        let mut state = self.state.lock().unwrap();
        if state
            .intents
            .iter()
            .any(|i| i.idempotency_key == intent.idempotency_key)
        {
            return Ok(None);
        }

        let now = Utc::now();
        let row = PaymentIntent {
            id: Uuid::new_v4().to_string(),
            idempotency_key: intent.idempotency_key,
            user_id: intent.user_id,
            product_id: intent.product_id,
            amount_cents: intent.amount_cents,
            currency: intent.currency,
            status: "pending".to_string(),
            rail: intent.rail.as_str().to_string(),
            checkout_session_id: None,
            checkout_url: None,
            invite_code_id: intent.invite_code_id,
            expires_at: intent.expires_at,
            created_at: now,
            updated_at: now,
        };
        state.intents.push(row.clone());
        Ok(Some(row))
    }

    async fn find_intent(&self, idempotency_key: &str) -> Result<Option<PaymentIntent>> {
        Ok(self.intent(idempotency_key))
    }

    async fn mark_intent_created(
        &self,
        idempotency_key: &str,
        session_id: &str,
        checkout_url: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(intent) = state
            .intents
            .iter_mut()
            .find(|i| i.idempotency_key == idempotency_key && i.status == "pending")
        {
            intent.status = "created".to_string();
            intent.checkout_session_id = Some(session_id.to_string());
            intent.checkout_url = Some(checkout_url.to_string());
            intent.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_intent_completed(&self, idempotency_key: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(intent) = state
            .intents
            .iter_mut()
            .find(|i| i.idempotency_key == idempotency_key)
        {
            intent.status = "completed".to_string();
            intent.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn insert_pending_payment(&self, payment: NewPayment) -> Result<Option<Payment>> {
        let mut state = self.state.lock().unwrap();
        if state.payment_conflicts(&payment.provider_payment_id, payment.idempotency_key.as_deref())
        {
            return Ok(None);
        }
        let row = payment_row(payment, "pending");
        state.payments.push(row.clone());
        Ok(Some(row))
    }

    async fn find_payment_by_provider_id(
        &self,
        provider_payment_id: &str,
    ) -> Result<Option<Payment>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .payments
            .iter()
            .find(|p| p.provider_payment_id == provider_payment_id)
            .cloned())
    }

    async fn find_payment_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<Payment>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .payments
            .iter()
            .find(|p| p.idempotency_key.as_deref() == Some(idempotency_key))
            .cloned())
    }

    async fn complete_payment(
        &self,
        payment_id: &str,
        received_micro_usd: Option<i64>,
        entitlement: &Entitlement,
    ) -> Result<Option<Payment>> {
        let mut state = self.state.lock().unwrap();
        let Some(payment) = state
            .payments
            .iter_mut()
            .find(|p| p.id == payment_id && p.status == "pending")
        else {
            return Ok(None);
        };

        payment.status = "completed".to_string();
        if received_micro_usd.is_some() {
            payment.received_micro_usd = received_micro_usd;
        }
        payment.failure_reason = None;
        payment.completed_at = Some(Utc::now());
        let completed = payment.clone();

        state.grant(&completed.user_id, entitlement);
        Ok(Some(completed))
    }

    async fn fail_payment(&self, payment_id: &str, reason: &str) -> Result<Option<Payment>> {
        let mut state = self.state.lock().unwrap();
        Ok(state
            .payments
            .iter_mut()
            .find(|p| p.id == payment_id && p.status == "pending")
            .map(|payment| {
                payment.status = "failed".to_string();
                payment.failure_reason = Some(reason.to_string());
                payment.completed_at = Some(Utc::now());
                payment.clone()
            }))
    }

    async fn release_pending_payment(&self, payment_id: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let before = state.payments.len();
        state
            .payments
            .retain(|p| !(p.id == payment_id && p.status == "pending"));
        Ok(state.payments.len() < before)
    }

    async fn upsert_completed_payment(
        &self,
        payment: NewPayment,
        entitlement: &Entitlement,
    ) -> Result<Option<Payment>> {
        let mut state = self.state.lock().unwrap();

        let existing = state
            .payments
            .iter()
            .position(|p| p.idempotency_key.is_some() && p.idempotency_key == payment.idempotency_key);

        let completed = match existing {
            Some(index) => {
                let row = &mut state.payments[index];
                if row.status != "pending" {
                    return Ok(None);
                }
                row.status = "completed".to_string();
                row.provider_payment_id = payment.provider_payment_id;
                row.amount_cents = payment.amount_cents;
                row.completed_at = Some(Utc::now());
                row.clone()
            }
            None => {
                if state.payment_conflicts(&payment.provider_payment_id, None) {
                    anyhow::bail!("duplicate key value violates unique constraint");
                }
                let row = payment_row(payment, "completed");
                state.payments.push(row.clone());
                row
            }
        };

        state.grant(&completed.user_id, entitlement);
        Ok(Some(completed))
    }

    async fn record_completed_payment(
        &self,
        payment: NewPayment,
        entitlement: &Entitlement,
    ) -> Result<Option<Payment>> {
        let mut state = self.state.lock().unwrap();
        if state.payment_conflicts(&payment.provider_payment_id, payment.idempotency_key.as_deref())
        {
            return Ok(None);
        }
        let row = payment_row(payment, "completed");
        state.payments.push(row.clone());
        state.grant(&row.user_id, entitlement);
        Ok(Some(row))
    }

    async fn fail_payment_by_provider_id(
        &self,
        provider_payment_id: &str,
        reason: &str,
    ) -> Result<Option<Payment>> {
        let mut state = self.state.lock().unwrap();
        Ok(state
            .payments
            .iter_mut()
            .find(|p| p.provider_payment_id == provider_payment_id && p.status == "pending")
            .map(|payment| {
                payment.status = "failed".to_string();
                payment.failure_reason = Some(reason.to_string());
                payment.completed_at = Some(Utc::now());
                payment.clone()
            }))
    }
}

#[async_trait]
impl WebhookEventRepository for MemoryStore {
    async fn insert_event(
        &self,
        provider: &str,
        event_id: &str,
        event_type: &str,
        payload: &Value,
    ) -> Result<Option<WebhookEventRecord>> {
        let mut state = self.state.lock().unwrap();
        if state
            .events
            .iter()
            .any(|e| e.provider == provider && e.event_id == event_id)
        {
            return Ok(None);
        }

        let record = WebhookEventRecord {
            id: Uuid::new_v4().to_string(),
            provider: provider.to_string(),
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            payload: payload.clone(),
            processed: false,
            processing_error: None,
            received_at: Utc::now(),
            processed_at: None,
        };
        state.events.push(record.clone());
        Ok(Some(record))
    }

    async fn mark_event_processed(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(event) = state.events.iter_mut().find(|e| e.id == id) {
            event.processed = true;
            event.processing_error = None;
            event.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_event_failed(&self, id: &str, error: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(event) = state.events.iter_mut().find(|e| e.id == id) {
            event.processed = false;
            event.processing_error = Some(error.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryStore {
    async fn upsert_subscription(&self, subscription: SubscriptionUpsert) -> Result<Subscription> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();

        if let Some(row) = state
            .subscriptions
            .iter_mut()
            .find(|s| s.provider_sub_id == subscription.provider_sub_id)
        {
            row.status = subscription.status;
            row.tier = subscription.tier;
            row.product_id = subscription.product_id.or(row.product_id.take());
            row.current_period_start = subscription
                .current_period_start
                .or(row.current_period_start);
            row.current_period_end = subscription.current_period_end.or(row.current_period_end);
            row.cancel_at_period_end = subscription.cancel_at_period_end;
            row.updated_at = now;
            return Ok(row.clone());
        }

        let row = Subscription {
            id: Uuid::new_v4().to_string(),
            provider_sub_id: subscription.provider_sub_id,
            user_id: subscription.user_id,
            product_id: subscription.product_id,
            tier: subscription.tier,
            status: subscription.status,
            current_period_start: subscription.current_period_start,
            current_period_end: subscription.current_period_end,
            cancel_at_period_end: subscription.cancel_at_period_end,
            created_at: now,
            updated_at: now,
        };
        state.subscriptions.push(row.clone());
        Ok(row)
    }

    async fn find_subscription(&self, provider_sub_id: &str) -> Result<Option<Subscription>> {
        Ok(self.subscription(provider_sub_id))
    }

    async fn refresh_subscription(
        &self,
        provider_sub_id: &str,
        status: &str,
        current_period_start: Option<DateTime<Utc>>,
        current_period_end: Option<DateTime<Utc>>,
    ) -> Result<Option<Subscription>> {
        let mut state = self.state.lock().unwrap();
        Ok(state
            .subscriptions
            .iter_mut()
            .find(|s| s.provider_sub_id == provider_sub_id)
            .map(|row| {
                row.status = status.to_string();
                row.current_period_start = current_period_start.or(row.current_period_start);
                row.current_period_end = current_period_end.or(row.current_period_end);
                row.updated_at = Utc::now();
                row.clone()
            }))
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn apply_entitlement(&self, user_id: &str, entitlement: &Entitlement) -> Result<bool> {
        self.state.lock().unwrap().grant(user_id, entitlement);
        Ok(true)
    }

    async fn revoke_entitlement(&self, user_id: &str, tier: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        match state.profiles.get_mut(user_id) {
            Some(profile) if profile.tier == tier => {
                profile.tier = "free".to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ============================================================================
// Rate limiter
// ============================================================================

/// Limiter that allows every attempt unless told otherwise
#[derive(Default)]
pub struct FakeLimiter {
    deny_with_retry_after: Option<i64>,
    pub checks: AtomicUsize,
}

impl FakeLimiter {
    pub fn denying(retry_after: i64) -> Self {
        Self {
            deny_with_retry_after: Some(retry_after),
            checks: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AttemptLimiter for FakeLimiter {
    async fn check(
        &self,
        _scope: RateLimitScope,
        policy: AttemptPolicy,
    ) -> shared::Result<RateLimitResult> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let mut result = RateLimitResult::fail_open(policy);
        if let Some(retry_after) = self.deny_with_retry_after {
            result.allowed = false;
            result.retry_after = retry_after;
            result.remaining = 0;
            result.current_usage = policy.limit + 1;
        }
        Ok(result)
    }
}

// ============================================================================
// Chain verifiers
// ============================================================================

/// Verifier that always reports the same outcome
pub struct ScriptedVerifier {
    outcome: Mutex<VerificationOutcome>,
    pub calls: AtomicUsize,
}

impl ScriptedVerifier {
    pub fn new(outcome: VerificationOutcome) -> Self {
        Self {
            outcome: Mutex::new(outcome),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_outcome(&self, outcome: VerificationOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainVerifier for ScriptedVerifier {
    fn preflight(&self, _request: &VerificationRequest) -> Result<(), PaymentError> {
        Ok(())
    }

    async fn verify(&self, _request: &VerificationRequest) -> VerificationOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.lock().unwrap().clone()
    }
}

/// Polygon node stand-in: canned transaction and receipt, adjustable head
///
/// Runs the real EVM decoding over the canned RPC results, so amounts,
/// confirmations and sender checks behave as they do against a node.
pub struct PolygonNode {
    tx: Value,
    receipt: Value,
    head: AtomicU64,
    pub calls: AtomicUsize,
}

impl PolygonNode {
    /// Transaction mined in block 100 moving `usdc_units` (6 decimals) to the treasury
    pub fn usdc_transfer(usdc_units: u128, head: u64) -> Self {
        let pad = |address: &str| {
            format!("0x{:0>64}", address.trim_start_matches("0x").to_lowercase())
        };
        Self {
            tx: json!({ "from": EVM_SENDER, "blockNumber": "0x64" }),
            receipt: json!({
                "status": "0x1",
                "blockNumber": "0x64",
                "logs": [{
                    "address": POLYGON_USDC,
                    "topics": [TRANSFER_TOPIC, pad(EVM_SENDER), pad(EVM_TREASURY)],
                    "data": format!("0x{:064x}", usdc_units),
                    "removed": false
                }]
            }),
            head: AtomicU64::new(head),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainVerifier for PolygonNode {
    fn preflight(&self, request: &VerificationRequest) -> Result<(), PaymentError> {
        match request.chain.as_deref().and_then(evm_chain) {
            Some(_) => Ok(()),
            None => Err(PaymentError::Rejected(RejectReason::UnsupportedChain(
                request.chain.clone().unwrap_or_default(),
            ))),
        }
    }

    async fn verify(&self, request: &VerificationRequest) -> VerificationOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(chain) = request.chain.as_deref().and_then(evm_chain) else {
            return VerificationOutcome::Rejected(RejectReason::UnsupportedChain(
                request.chain.clone().unwrap_or_default(),
            ));
        };
        evaluate_evm(
            chain,
            request,
            &self.tx,
            &self.receipt,
            self.head.load(Ordering::SeqCst),
        )
    }
}

pub fn unused_verifier() -> Arc<ScriptedVerifier> {
    Arc::new(ScriptedVerifier::new(VerificationOutcome::Unavailable(
        "not scripted".to_string(),
    )))
}

/// Dispatch table with the given EVM verifier and inert Solana/Cardano ones
pub fn verifiers_with_evm(evm: Arc<dyn ChainVerifier>) -> ChainVerifiers {
    ChainVerifiers::new(evm, unused_verifier(), unused_verifier())
}

// ============================================================================
// Card gateway
// ============================================================================

/// Card gateway that hands out sequential session ids
#[derive(Default)]
pub struct FakeGateway {
    fail: bool,
    pub calls: AtomicUsize,
    pub last_params: Mutex<Option<CheckoutSessionParams>>,
}

impl FakeGateway {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckoutGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        params: &CheckoutSessionParams,
    ) -> Result<CheckoutResult, StripeError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_params.lock().unwrap() = Some(params.clone());

        if self.fail {
            return Err(StripeError::ApiError("connection reset".to_string()));
        }

        let session_id = format!("cs_test_{}", n);
        Ok(CheckoutResult {
            checkout_url: format!("https://checkout.stripe.com/c/pay/{}", session_id),
            session_id,
        })
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub services: PaymentServices,
}

pub fn harness(
    store: Arc<MemoryStore>,
    config: PaymentConfig,
    limiter: Arc<dyn AttemptLimiter>,
    verifiers: ChainVerifiers,
    gateway: Option<Arc<dyn CheckoutGateway>>,
) -> TestHarness {
    let services = PaymentServices::new(
        store.clone(),
        Arc::new(config),
        limiter,
        verifiers,
        gateway,
    );
    TestHarness { store, services }
}

/// Harness with every rail configured and an allow-all limiter
pub fn default_harness(evm: Arc<dyn ChainVerifier>, gateway: Arc<FakeGateway>) -> TestHarness {
    let gateway: Arc<dyn CheckoutGateway> = gateway;
    harness(
        seeded_store(),
        test_payment_config(),
        Arc::new(FakeLimiter::default()),
        verifiers_with_evm(evm),
        Some(gateway),
    )
}

/// App configuration for `App::new().configure(..)`
pub fn app_config(services: PaymentServices) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(web::Data::new(services))
            .app_data(web::Data::new(JwtSecret::new(TEST_JWT_SECRET)));
        routes::configure(cfg);
    }
}
