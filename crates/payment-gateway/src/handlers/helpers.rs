//! Common Handler Helpers
//!
//! Every payment endpoint converts its service result through
//! [`payment_error_response`], so a failure always maps to the same status
//! and error body regardless of which rail produced it.

use actix_web::{http::header, HttpResponse};
use tracing::{error, warn};
use validator::Validate;

use crate::error::PaymentError;
use crate::models::ErrorResponse;

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate a request struct or return 400 Bad Request
pub fn validate_request<T: Validate>(req: &T) -> Result<(), HttpResponse> {
    req.validate().map_err(|e| {
        HttpResponse::BadRequest().json(ErrorResponse::new(
            "validation_error",
            format!("Validation failed: {}", e),
        ))
    })
}

// ============================================================================
// Error Handling Helpers
// ============================================================================

/// Convert a service error into the HTTP response clients see
///
/// Server-side failures are logged with their full cause; the body only
/// ever carries [`PaymentError::safe_message`]. 429 responses also carry a
/// `Retry-After` header.
pub fn payment_error_response(err: PaymentError) -> HttpResponse {
    let status = err.status_code();

    if status.is_server_error() {
        error!(error = %err, code = err.error_code(), "Payment request failed");
    } else {
        warn!(error = %err, code = err.error_code(), "Payment request rejected");
    }

    let body = match err.details() {
        Some(details) => ErrorResponse::with_details(err.error_code(), err.safe_message(), details),
        None => ErrorResponse::new(err.error_code(), err.safe_message()),
    };

    let mut builder = HttpResponse::build(status);
    if let PaymentError::RateLimited { retry_after } = err {
        builder.insert_header((header::RETRY_AFTER, retry_after.max(0).to_string()));
    }
    builder.json(body)
}
