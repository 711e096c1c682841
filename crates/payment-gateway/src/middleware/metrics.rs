//! Prometheus metrics
//!
//! HTTP request metrics are collected by the [`PrometheusMetrics`]
//! middleware. Payment outcomes are recorded by the services through the
//! `record_*` helpers below.
//!
//! # Metrics Exposed
//!
//! - `http_requests_total` / `http_request_duration_seconds` by method,
//!   route pattern and status
//! - `payment_verifications_total` by chain type and outcome
//! - `webhook_events_total` by event type and outcome
//! - `checkout_sessions_total` by outcome
//! - `account_activations_total` by rail

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::{
    future::{ready, Ready},
    sync::Arc,
    time::Instant,
};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder (idempotent)
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PROMETHEUS_HANDLE
        .get_or_try_init(|| {
            let handle = PrometheusBuilder::new().install_recorder()?;

            describe_counter!("http_requests_total", "Total number of HTTP requests processed");
            describe_histogram!(
                "http_request_duration_seconds",
                "HTTP request duration in seconds"
            );
            describe_counter!(
                "payment_verifications_total",
                "On-chain verification attempts by chain type and outcome"
            );
            describe_counter!(
                "webhook_events_total",
                "Gateway webhook deliveries by event type and outcome"
            );
            describe_counter!("checkout_sessions_total", "Checkout requests by outcome");
            describe_counter!("account_activations_total", "Account activations by rail");

            Ok(handle)
        })
        .cloned()
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> HttpResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4; charset=utf-8")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}

// ============================================================================
// Domain counters
// ============================================================================

pub fn record_verification(chain_type: &'static str, outcome: &'static str) {
    counter!(
        "payment_verifications_total",
        "chain_type" => chain_type,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_webhook(event_type: &str, outcome: &'static str) {
    counter!(
        "webhook_events_total",
        "event_type" => event_type.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_checkout(outcome: &'static str) {
    counter!("checkout_sessions_total", "outcome" => outcome).increment(1);
}

pub fn record_activation(rail: &'static str) {
    counter!("account_activations_total", "rail" => rail).increment(1);
}

// ============================================================================
// HTTP middleware
// ============================================================================

/// Request count and latency per route
#[derive(Clone)]
pub struct PrometheusMetrics {
    /// Path prefixes not recorded (scrapes and probes)
    excluded_paths: Arc<Vec<String>>,
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusMetrics {
    pub fn new() -> Self {
        Self {
            excluded_paths: Arc::new(vec!["/metrics".to_string(), "/api/v1/health".to_string()]),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for PrometheusMetrics
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = PrometheusMetricsMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(PrometheusMetricsMiddleware {
            service,
            excluded_paths: self.excluded_paths.clone(),
        }))
    }
}

pub struct PrometheusMetricsMiddleware<S> {
    service: S,
    excluded_paths: Arc<Vec<String>>,
}

impl<S> PrometheusMetricsMiddleware<S> {
    fn is_excluded(&self, path: &str) -> bool {
        self.excluded_paths.iter().any(|p| path.starts_with(p))
    }
}

impl<S, B> Service<ServiceRequest> for PrometheusMetricsMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start = Instant::now();
        let method = req.method().to_string();
        let excluded = self.is_excluded(req.path());

        let fut = self.service.call(req);

        Box::pin(async move {
            let response = fut.await?;

            if !excluded {
                // Route pattern keeps label cardinality bounded
                let route = response
                    .request()
                    .match_pattern()
                    .unwrap_or_else(|| "unmatched".to_string());
                let status = response.status().as_u16().to_string();

                counter!(
                    "http_requests_total",
                    "method" => method.clone(),
                    "route" => route.clone(),
                    "status" => status.clone()
                )
                .increment(1);

                histogram!(
                    "http_request_duration_seconds",
                    "method" => method,
                    "route" => route,
                    "status" => status
                )
                .record(start.elapsed().as_secs_f64());
            }

            Ok(response.map_into_left_body())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{test, web, App};

    async fn ok_handler() -> HttpResponse {
        HttpResponse::Ok().body("ok")
    }

    #[actix_web::test]
    async fn test_excluded_paths() {
        let app = test::init_service(
            App::new()
                .wrap(PrometheusMetrics::new())
                .route("/api/v1/health", web::get().to(ok_handler))
                .route("/api/v1/payments/verify", web::post().to(ok_handler)),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/v1/health").to_request(),
        )
        .await;
        assert!(resp.status().is_success());

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/payments/verify")
                .to_request(),
        )
        .await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_metrics_endpoint_without_recorder() {
        // The recorder is global; only assert the handler answers
        let app = test::init_service(
            App::new().route("/metrics", web::get().to(metrics_handler)),
        )
        .await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request())
            .await;
        assert!(
            resp.status() == StatusCode::OK || resp.status() == StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[::core::prelude::v1::test]
    fn test_domain_counters_without_recorder_are_noops() {
        record_verification("evm", "success");
        record_webhook("checkout.session.completed", "processed");
        record_checkout("redirect");
        record_activation("card");
    }
}
