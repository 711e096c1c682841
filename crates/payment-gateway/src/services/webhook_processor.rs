//! Stripe webhook ingestion
//!
//! ```text
//! received ─┬─ bad signature ───────────────► 400 (nothing logged)
//!           ├─ (provider, event_id) seen ───► 200 duplicate
//!           └─ logged ─► handler ─┬─ ok ────► 200 processed / ignored
//!                                 └─ error ─► 200, error stored on the row
//! ```
//!
//! Handlers may fail and report why; [`WebhookProcessor::ingest`] turns every
//! post-logging outcome into an acknowledgement. The event row keeps the
//! raw payload and the error for out-of-band reprocessing.
//!
//! Event payloads are read as JSON rather than through the typed
//! `stripe::Event` model so that deliveries from newer API versions do not
//! fail to parse.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use shared::PaymentConfig;
use tracing::{debug, error, info, warn};

use super::activation::AccountActivation;
use super::intent_ledger::IntentLedger;
use super::stripe_service::{META_IDEMPOTENCY_KEY, META_PRODUCT_ID, META_USER_ID};
use super::webhook_signature::verify_stripe_signature;
use crate::error::PaymentError;
use crate::middleware::metrics::record_webhook;
use crate::models::{Entitlement, NewPayment, PaymentRail, SubscriptionUpsert};
use crate::repositories::PaymentStore;

/// Provider column value for Stripe events
pub const STRIPE_PROVIDER: &str = "stripe";

/// How a delivery was acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAck {
    Processed,
    /// Already logged; handlers not re-run
    Duplicate,
    /// Event type this service does not act on
    Ignored,
    /// Handler failed; error recorded on the event row
    Failed(String),
}

impl WebhookAck {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookAck::Processed => "processed",
            WebhookAck::Duplicate => "duplicate",
            WebhookAck::Ignored => "ignored",
            WebhookAck::Failed(_) => "error",
        }
    }
}

enum Dispatch {
    Handled,
    Ignored,
}

// ============================================================================
// Event payloads
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: Value,
}

/// A field that is either an id or an expanded object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    fn id(&self) -> &str {
        match self {
            Expandable::Id(id) | Expandable::Object { id } => id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    id: String,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    subscription: Option<Expandable>,
}

impl CheckoutSessionObject {
    fn meta(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn user_id(&self) -> Option<&str> {
        self.meta(META_USER_ID)
            .or(self.client_reference_id.as_deref())
    }
}

#[derive(Debug, Default, Deserialize)]
struct Period {
    #[serde(default)]
    start: Option<i64>,
    #[serde(default)]
    end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct InvoiceLine {
    #[serde(default)]
    period: Option<Period>,
}

#[derive(Debug, Deserialize)]
struct InvoiceLines {
    #[serde(default)]
    data: Vec<InvoiceLine>,
}

#[derive(Debug, Deserialize)]
struct InvoiceParentSubscription {
    #[serde(default)]
    subscription: Option<Expandable>,
}

#[derive(Debug, Deserialize)]
struct InvoiceParent {
    #[serde(default)]
    subscription_details: Option<InvoiceParentSubscription>,
}

#[derive(Debug, Deserialize)]
struct InvoiceObject {
    id: String,
    #[serde(default)]
    subscription: Option<Expandable>,
    /// Newer API versions move the subscription under `parent`
    #[serde(default)]
    parent: Option<InvoiceParent>,
    #[serde(default)]
    amount_paid: i64,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    billing_reason: Option<String>,
    #[serde(default)]
    lines: Option<InvoiceLines>,
}

impl InvoiceObject {
    fn subscription_id(&self) -> Option<&str> {
        self.subscription
            .as_ref()
            .or_else(|| {
                self.parent
                    .as_ref()
                    .and_then(|p| p.subscription_details.as_ref())
                    .and_then(|d| d.subscription.as_ref())
            })
            .map(Expandable::id)
    }

    fn period(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let period = self
            .lines
            .as_ref()
            .and_then(|lines| lines.data.first())
            .and_then(|line| line.period.as_ref());
        match period {
            Some(p) => (timestamp(p.start), timestamp(p.end)),
            None => (None, None),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubscriptionItem {
    #[serde(default)]
    current_period_start: Option<i64>,
    #[serde(default)]
    current_period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItems {
    #[serde(default)]
    data: Vec<SubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
    status: String,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
    #[serde(default)]
    current_period_start: Option<i64>,
    #[serde(default)]
    current_period_end: Option<i64>,
    #[serde(default)]
    cancel_at_period_end: bool,
    #[serde(default)]
    items: Option<SubscriptionItems>,
}

impl SubscriptionObject {
    fn meta(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Billing period, from the subscription or (newer API versions) its first item
    fn period(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let item = self.items.as_ref().and_then(|items| items.data.first());
        let start = self
            .current_period_start
            .or_else(|| item.and_then(|i| i.current_period_start));
        let end = self
            .current_period_end
            .or_else(|| item.and_then(|i| i.current_period_end));
        (timestamp(start), timestamp(end))
    }
}

fn timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|ts| DateTime::from_timestamp(ts, 0))
}

fn parse_object<T: DeserializeOwned>(event: &StripeEvent) -> Result<T, PaymentError> {
    serde_json::from_value(event.data.object.clone()).map_err(|e| {
        PaymentError::validation(format!(
            "Unexpected {} payload: {}",
            event.event_type, e
        ))
    })
}

// ============================================================================
// Processor
// ============================================================================

#[derive(Clone)]
pub struct WebhookProcessor {
    store: Arc<dyn PaymentStore>,
    config: Arc<PaymentConfig>,
    ledger: IntentLedger,
    activation: AccountActivation,
}

impl WebhookProcessor {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        config: Arc<PaymentConfig>,
        ledger: IntentLedger,
        activation: AccountActivation,
    ) -> Self {
        Self {
            store,
            config,
            ledger,
            activation,
        }
    }

    pub async fn ingest(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookAck, PaymentError> {
        self.ingest_at(payload, signature, Utc::now().timestamp())
            .await
    }

    /// Verify, log and handle one delivery
    ///
    /// `Err` only for deliveries that were not logged: bad signature,
    /// missing secret, unreadable envelope or a failed log insert.
    pub async fn ingest_at(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        now: i64,
    ) -> Result<WebhookAck, PaymentError> {
        let signature = signature.ok_or_else(|| {
            warn!("Missing Stripe-Signature header");
            PaymentError::InvalidSignature("missing Stripe-Signature header".to_string())
        })?;

        let secret = self.config.require_webhook_secret()?;

        verify_stripe_signature(payload, signature, &secret, now).map_err(|e| {
            warn!(error = %e, "Webhook signature verification failed");
            PaymentError::InvalidSignature(e.to_string())
        })?;

        // Authentic but unreadable: acknowledge, since a non-2xx answer
        // only makes Stripe redeliver the same bytes
        let parsed = serde_json::from_slice::<Value>(payload)
            .and_then(|raw| StripeEvent::deserialize(&raw).map(|event| (raw, event)));
        let (raw, event) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(error = %e, "Signed webhook body could not be parsed");
                record_webhook("unparseable", WebhookAck::Ignored.as_str());
                return Ok(WebhookAck::Ignored);
            }
        };

        let Some(record) = self
            .store
            .insert_event(STRIPE_PROVIDER, &event.id, &event.event_type, &raw)
            .await?
        else {
            info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Duplicate webhook delivery acknowledged"
            );
            record_webhook(&event.event_type, WebhookAck::Duplicate.as_str());
            return Ok(WebhookAck::Duplicate);
        };

        let ack = match self.dispatch(&event).await {
            Ok(dispatch) => {
                if let Err(e) = self.store.mark_event_processed(&record.id).await {
                    error!(event_id = %event.id, error = %e, "Failed to mark webhook event processed");
                }
                match dispatch {
                    Dispatch::Handled => WebhookAck::Processed,
                    Dispatch::Ignored => {
                        debug!(event_type = %event.event_type, "Ignoring webhook event");
                        WebhookAck::Ignored
                    }
                }
            }
            Err(e) => {
                error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Webhook handler failed"
                );
                let message = e.to_string();
                if let Err(mark_err) = self.store.mark_event_failed(&record.id, &message).await {
                    error!(
                        event_id = %event.id,
                        error = %mark_err,
                        "Failed to record webhook processing error"
                    );
                }
                WebhookAck::Failed(message)
            }
        };

        record_webhook(&event.event_type, ack.as_str());
        Ok(ack)
    }

    async fn dispatch(&self, event: &StripeEvent) -> Result<Dispatch, PaymentError> {
        match event.event_type.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                self.on_checkout_completed(parse_object(event)?).await
            }
            "checkout.session.async_payment_failed" => {
                self.on_checkout_failed(parse_object(event)?).await
            }
            "invoice.paid" => self.on_invoice_paid(parse_object(event)?).await,
            "invoice.payment_failed" => self.on_invoice_failed(parse_object(event)?).await,
            "customer.subscription.created" | "customer.subscription.updated" => {
                self.on_subscription_changed(parse_object(event)?, None)
                    .await
            }
            "customer.subscription.deleted" => {
                self.on_subscription_changed(parse_object(event)?, Some("canceled"))
                    .await
            }
            _ => Ok(Dispatch::Ignored),
        }
    }

    async fn on_checkout_completed(
        &self,
        session: CheckoutSessionObject,
    ) -> Result<Dispatch, PaymentError> {
        let user_id = session
            .user_id()
            .ok_or_else(|| PaymentError::validation("Checkout session has no user_id"))?;
        let product_id = session
            .meta(META_PRODUCT_ID)
            .ok_or_else(|| PaymentError::validation("Checkout session has no product_id"))?;

        // Entitlement comes from the catalog; the product may have been
        // retired since the session was opened
        let product = self
            .store
            .find_product(product_id)
            .await?
            .ok_or_else(|| PaymentError::ProductNotFound(product_id.to_string()))?;
        let entitlement = Entitlement::for_product(&product);
        let idempotency_key = session.meta(META_IDEMPOTENCY_KEY).map(str::to_string);

        let payment = NewPayment {
            user_id: user_id.to_string(),
            product_id: Some(product.id.clone()),
            rail: PaymentRail::Card,
            provider_payment_id: session.id.clone(),
            idempotency_key: idempotency_key.clone(),
            amount_cents: session.amount_total.unwrap_or(product.price_cents),
            currency: session
                .currency
                .clone()
                .unwrap_or_else(|| product.currency.clone()),
            chain: None,
            wallet_address: None,
        };

        // Delayed payment methods complete later via async_payment_succeeded
        if session.payment_status.as_deref() == Some("unpaid") {
            let claimed = self.store.insert_pending_payment(payment).await?;
            info!(
                session_id = %session.id,
                user_id = %user_id,
                recorded = claimed.is_some(),
                "Checkout completed with payment still processing"
            );
            return Ok(Dispatch::Handled);
        }

        let settled = match idempotency_key {
            Some(_) => {
                self.store
                    .upsert_completed_payment(payment, &entitlement)
                    .await?
            }
            None => {
                self.store
                    .record_completed_payment(payment, &entitlement)
                    .await?
            }
        };

        match settled {
            Some(completed) => {
                self.activation
                    .record_settlement(&completed, &entitlement, PaymentRail::Card)
            }
            None => info!(
                session_id = %session.id,
                user_id = %user_id,
                "Checkout session already settled"
            ),
        }

        if let Some(key) = session.meta(META_IDEMPOTENCY_KEY) {
            self.ledger.mark_completed(key).await?;
        }

        if let Some(subscription) = &session.subscription {
            let provider_sub_id = subscription.id();
            // customer.subscription.* may have arrived first with fuller data
            if self.store.find_subscription(provider_sub_id).await?.is_none() {
                self.store
                    .upsert_subscription(SubscriptionUpsert {
                        provider_sub_id: provider_sub_id.to_string(),
                        user_id: user_id.to_string(),
                        product_id: Some(product.id.clone()),
                        tier: product.tier.clone(),
                        status: "active".to_string(),
                        current_period_start: None,
                        current_period_end: None,
                        cancel_at_period_end: false,
                    })
                    .await?;
            }
        }

        Ok(Dispatch::Handled)
    }

    async fn on_checkout_failed(
        &self,
        session: CheckoutSessionObject,
    ) -> Result<Dispatch, PaymentError> {
        let failed = self
            .store
            .fail_payment_by_provider_id(&session.id, "async_payment_failed")
            .await?;

        warn!(
            session_id = %session.id,
            user_id = ?session.user_id(),
            payment_failed = failed.is_some(),
            "Checkout payment failed"
        );
        Ok(Dispatch::Handled)
    }

    async fn on_invoice_paid(&self, invoice: InvoiceObject) -> Result<Dispatch, PaymentError> {
        let Some(provider_sub_id) = invoice.subscription_id() else {
            return Ok(Dispatch::Ignored);
        };

        // The first invoice is settled by checkout.session.completed
        if invoice.billing_reason.as_deref() == Some("subscription_create") {
            debug!(invoice_id = %invoice.id, "Initial subscription invoice");
            return Ok(Dispatch::Ignored);
        }

        let subscription = self
            .store
            .find_subscription(provider_sub_id)
            .await?
            .ok_or_else(|| {
                PaymentError::validation(format!(
                    "Invoice {} references unknown subscription {}",
                    invoice.id, provider_sub_id
                ))
            })?;

        let entitlement = Entitlement::tier_only(subscription.tier.clone());
        let renewal = NewPayment {
            user_id: subscription.user_id.clone(),
            product_id: subscription.product_id.clone(),
            rail: PaymentRail::Card,
            provider_payment_id: invoice.id.clone(),
            idempotency_key: None,
            amount_cents: invoice.amount_paid,
            currency: invoice.currency.clone().unwrap_or_else(|| "usd".to_string()),
            chain: None,
            wallet_address: None,
        };

        match self
            .store
            .record_completed_payment(renewal, &entitlement)
            .await?
        {
            Some(payment) => {
                self.activation
                    .record_settlement(&payment, &entitlement, PaymentRail::Card)
            }
            None => debug!(invoice_id = %invoice.id, "Renewal already recorded"),
        }

        let (start, end) = invoice.period();
        self.store
            .refresh_subscription(provider_sub_id, "active", start, end)
            .await?;

        Ok(Dispatch::Handled)
    }

    async fn on_invoice_failed(&self, invoice: InvoiceObject) -> Result<Dispatch, PaymentError> {
        let Some(provider_sub_id) = invoice.subscription_id() else {
            return Ok(Dispatch::Ignored);
        };

        let updated = self
            .store
            .refresh_subscription(provider_sub_id, "past_due", None, None)
            .await?
            .ok_or_else(|| {
                PaymentError::validation(format!(
                    "Invoice {} references unknown subscription {}",
                    invoice.id, provider_sub_id
                ))
            })?;

        warn!(
            invoice_id = %invoice.id,
            subscription_id = %provider_sub_id,
            user_id = %updated.user_id,
            "Subscription payment failed"
        );
        Ok(Dispatch::Handled)
    }

    /// Upsert the subscription and move the entitlement with its status
    async fn on_subscription_changed(
        &self,
        subscription: SubscriptionObject,
        status_override: Option<&str>,
    ) -> Result<Dispatch, PaymentError> {
        let existing = self.store.find_subscription(&subscription.id).await?;

        let user_id = subscription
            .meta(META_USER_ID)
            .map(str::to_string)
            .or_else(|| existing.as_ref().map(|s| s.user_id.clone()))
            .ok_or_else(|| PaymentError::validation("Subscription has no user_id"))?;

        let product_id = subscription
            .meta(META_PRODUCT_ID)
            .map(str::to_string)
            .or_else(|| existing.as_ref().and_then(|s| s.product_id.clone()));

        let catalog_tier = match &product_id {
            Some(id) => self.store.find_product(id).await?.map(|p| p.tier),
            None => None,
        };
        let tier = catalog_tier
            .or_else(|| existing.as_ref().map(|s| s.tier.clone()))
            .ok_or_else(|| PaymentError::validation("Cannot resolve tier for subscription"))?;

        let status = status_override
            .unwrap_or(subscription.status.as_str())
            .to_string();
        let (start, end) = subscription.period();

        self.store
            .upsert_subscription(SubscriptionUpsert {
                provider_sub_id: subscription.id.clone(),
                user_id: user_id.clone(),
                product_id,
                tier: tier.clone(),
                status: status.clone(),
                current_period_start: start,
                current_period_end: end,
                cancel_at_period_end: subscription.cancel_at_period_end,
            })
            .await?;

        info!(
            subscription_id = %subscription.id,
            user_id = %user_id,
            status = %status,
            "Subscription updated"
        );

        match status.as_str() {
            "active" | "trialing" => {
                self.activation
                    .activate(
                        &user_id,
                        &tier,
                        PaymentRail::Card,
                        &json!({ "subscription_id": subscription.id }),
                    )
                    .await?;
            }
            "canceled" | "unpaid" | "incomplete_expired" => {
                self.activation.deactivate(&user_id, &tier).await?;
            }
            _ => {}
        }

        Ok(Dispatch::Handled)
    }
}
