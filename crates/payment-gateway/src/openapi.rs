//! OpenAPI Documentation Configuration
//!
//! Generated from the handler annotations with utoipa and served at
//! `/api/v1/openapi.json`.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::handlers;
use crate::handlers::health::HealthResponse;
use crate::models;

/// OpenAPI documentation for the payment gateway
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Payment Gateway API",
        version = "1.0.0",
        description = "Card checkout, card gateway webhooks and on-chain payment verification.\n\n## Authentication\n\nCheckout and verification require `Authorization: Bearer <token>`. The webhook endpoint is authenticated by its `Stripe-Signature` header.\n\n## Idempotency\n\nEvery payment request carries a client-generated v4 UUID `idempotencyKey`. Repeating a key returns the original outcome.",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Development server")
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Payments", description = "Checkout, webhooks and on-chain verification"),
        (name = "Discovery", description = "API discovery and metadata")
    ),
    modifiers(&SecurityAddon),
    paths(
        // Health
        handlers::health_check,
        // Discovery
        handlers::openapi_json,
        // Payments
        handlers::create_checkout,
        handlers::handle_webhook,
        handlers::verify_payment,
    ),
    components(
        schemas(
            models::ErrorResponse,
            models::CheckoutRequest,
            models::CheckoutResponse,
            models::VerifyPaymentRequest,
            models::VerifyPaymentResponse,
            models::WebhookAckResponse,
            HealthResponse,
        )
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);

        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .description(Some("HS256 token issued by the account service"))
                    .build(),
            ),
        );
    }
}
