//! Middleware for the payment gateway

pub mod auth;
pub mod metrics;

use actix_cors::Cors;
use actix_web::http;
use std::env;

pub use auth::{AuthenticatedUser, Claims, JwtSecret};
pub use metrics::PrometheusMetrics;

/// Configure CORS middleware
///
/// Browser clients call checkout and verification directly. The webhook
/// path is server-to-server and does not depend on CORS.
pub fn cors() -> Cors {
    // Format: comma-separated list of origins
    // Example: ALLOWED_ORIGINS=https://app.example.com,https://admin.example.com
    let allowed_origins = env::var("ALLOWED_ORIGINS").unwrap_or_default();
    let origins = parse_origins(&allowed_origins);

    Cors::default()
        .allowed_origin_fn(move |origin, _req_head| {
            let origin_str = origin.to_str().unwrap_or("");
            origin_allowed(origin_str, &origins, cfg!(debug_assertions))
        })
        .allowed_methods(vec!["GET", "POST"])
        .allowed_headers(vec![
            http::header::AUTHORIZATION,
            http::header::ACCEPT,
            http::header::CONTENT_TYPE,
        ])
        .max_age(3600)
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn origin_allowed(origin: &str, whitelist: &[String], development: bool) -> bool {
    if development
        && (origin.starts_with("http://localhost") || origin.starts_with("http://127.0.0.1"))
    {
        return true;
    }

    if whitelist.is_empty() {
        if !development {
            tracing::warn!("ALLOWED_ORIGINS not set. Denying all CORS requests in production.");
        }
        return false;
    }

    // Exact match only; "*" is never treated as a wildcard
    whitelist.iter().any(|allowed| origin == allowed)
}
