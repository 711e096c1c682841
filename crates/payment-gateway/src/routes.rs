//! Route configuration for the API

use actix_web::web;

use crate::handlers;
use crate::middleware::metrics::metrics_handler;

/// Configure all routes
///
/// Expects `web::Data<PaymentServices>` and `web::Data<JwtSecret>` in app
/// data; the health check also needs `web::Data<DbPool>`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    // Prometheus scrape endpoint (outside /api/v1)
    cfg.route("/metrics", web::get().to(metrics_handler));

    cfg.service(
        web::scope("/api/v1")
            // Health check endpoint (no auth required)
            .route("/health", web::get().to(handlers::health_check))
            // OpenAPI JSON endpoint (no auth required)
            .route("/openapi.json", web::get().to(handlers::openapi_json))
            .service(
                web::scope("/payments")
                    // Authenticated through the AuthenticatedUser extractor
                    .route("/checkout", web::post().to(handlers::create_checkout))
                    .route("/verify", web::post().to(handlers::verify_payment))
                    // No bearer auth; the body signature authenticates the caller
                    .service(
                        web::resource("/webhook")
                            .route(web::post().to(handlers::handle_webhook))
                            .default_service(web::to(handlers::webhook_method_not_allowed)),
                    ),
            ),
    );
}
