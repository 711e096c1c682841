//! Payment endpoints
//!
//! Handlers stay thin: authenticate, validate, call the service, map the
//! result. The webhook handler is the exception to normal error flow. Once
//! an event is logged, every outcome is acknowledged with 200 so the
//! provider stops redelivering; handler failures are recorded on the event
//! row instead.

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use tracing::{debug, error};

use super::helpers::{payment_error_response, validate_request};
use crate::middleware::AuthenticatedUser;
use crate::models::{
    CheckoutRequest, CheckoutResponse, ErrorResponse, VerifyPaymentRequest,
    VerifyPaymentResponse, WebhookAckResponse,
};
use crate::services::{PaymentServices, VerifyOutcome, WebhookAck};

pub const STRIPE_SIGNATURE_HEADER: &str = "Stripe-Signature";

// ============================================================================
// Card checkout
// ============================================================================

/// Start a card checkout
///
/// Returns the hosted checkout URL. Repeating the same `idempotencyKey`
/// returns the same session. Zero-priced products are activated at once.
#[utoipa::path(
    post,
    path = "/api/v1/payments/checkout",
    tag = "Payments",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Checkout session or activation", body = CheckoutResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "Product not found", body = ErrorResponse),
        (status = 409, description = "Idempotency key conflict", body = ErrorResponse),
        (status = 429, description = "Too many checkout attempts", body = ErrorResponse),
        (status = 500, description = "Server misconfigured", body = ErrorResponse),
        (status = 503, description = "Card gateway unavailable", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_checkout(
    services: web::Data<PaymentServices>,
    user: AuthenticatedUser,
    req: web::Json<CheckoutRequest>,
) -> impl Responder {
    if let Err(resp) = validate_request(&*req) {
        return resp;
    }

    match services.checkout.start_checkout(&user.user_id, &req).await {
        Ok(outcome) => HttpResponse::Ok().json(CheckoutResponse::from(outcome)),
        Err(e) => payment_error_response(e),
    }
}

// ============================================================================
// Webhook
// ============================================================================

/// Receive a card gateway webhook
///
/// The body is read raw; the signature covers the exact bytes sent.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    tag = "Payments",
    request_body(content = String, description = "Raw webhook payload", content_type = "application/json"),
    params(
        ("Stripe-Signature" = String, Header, description = "Provider signature header")
    ),
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookAckResponse),
        (status = 400, description = "Missing or invalid signature", body = ErrorResponse),
        (status = 405, description = "Method not allowed"),
        (status = 500, description = "Webhook secret not configured", body = ErrorResponse)
    )
)]
pub async fn handle_webhook(
    services: web::Data<PaymentServices>,
    req_http: HttpRequest,
    payload: web::Bytes,
) -> impl Responder {
    let signature = req_http
        .headers()
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());

    match services.webhooks.ingest(&payload, signature).await {
        Ok(ack) => {
            if let WebhookAck::Failed(reason) = &ack {
                error!(reason = %reason, "Webhook acknowledged after handler failure");
            } else {
                debug!(status = ack.as_str(), "Webhook acknowledged");
            }
            HttpResponse::Ok().json(WebhookAckResponse {
                received: true,
                status: ack.as_str().to_string(),
            })
        }
        Err(e) => payment_error_response(e),
    }
}

/// Wrong method on the webhook path
pub async fn webhook_method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed()
        .insert_header(("Allow", "POST"))
        .json(ErrorResponse::new(
            "method_not_allowed",
            "Webhook endpoint only accepts POST",
        ))
}

// ============================================================================
// On-chain verification
// ============================================================================

/// Verify an on-chain payment and activate the account
///
/// Returns 202 while the transaction lacks confirmations; resubmit the
/// same request to check again.
#[utoipa::path(
    post,
    path = "/api/v1/payments/verify",
    tag = "Payments",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment verified, account activated", body = VerifyPaymentResponse),
        (status = 202, description = "Awaiting confirmations", body = VerifyPaymentResponse),
        (status = 400, description = "Invalid request or payment rejected", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "Product or transaction not found", body = ErrorResponse),
        (status = 409, description = "Transaction or idempotency key already used", body = ErrorResponse),
        (status = 429, description = "Too many verification attempts", body = ErrorResponse),
        (status = 500, description = "Server misconfigured", body = ErrorResponse),
        (status = 503, description = "Chain network unavailable", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn verify_payment(
    services: web::Data<PaymentServices>,
    user: AuthenticatedUser,
    req: web::Json<VerifyPaymentRequest>,
) -> impl Responder {
    if let Err(resp) = validate_request(&*req) {
        return resp;
    }

    match services.onchain.verify(&user.user_id, &req).await {
        Ok(outcome @ VerifyOutcome::Success { .. }) => {
            HttpResponse::Ok().json(VerifyPaymentResponse::from(outcome))
        }
        Ok(outcome @ VerifyOutcome::Pending { .. }) => {
            HttpResponse::Accepted().json(VerifyPaymentResponse::from(outcome))
        }
        Err(e) => payment_error_response(e),
    }
}
