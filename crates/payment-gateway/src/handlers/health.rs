//! Health check and service endpoints

use actix_web::{web, HttpResponse, Responder};
use serde::Serialize;
use shared::DbPool;
use utoipa::{OpenApi, ToSchema};

use crate::openapi::ApiDoc;

/// Health check response
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub version: String,
}

impl HealthResponse {
    fn from_db(connected: bool) -> Self {
        Self {
            status: if connected { "healthy" } else { "unhealthy" }.to_string(),
            database: if connected { "connected" } else { "disconnected" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse)
    )
)]
pub async fn health_check(pool: web::Data<DbPool>) -> impl Responder {
    let connected = shared::db::check_health(&pool).await.is_ok();
    let response = HealthResponse::from_db(connected);

    if connected {
        HttpResponse::Ok().json(response)
    } else {
        HttpResponse::ServiceUnavailable().json(response)
    }
}

/// OpenAPI JSON endpoint
#[utoipa::path(
    get,
    path = "/api/v1/openapi.json",
    tag = "Discovery",
    responses(
        (status = 200, description = "OpenAPI specification", content_type = "application/json")
    )
)]
pub async fn openapi_json() -> impl Responder {
    HttpResponse::Ok().content_type("application/json").body(
        ApiDoc::openapi()
            .to_json()
            .unwrap_or_else(|_| "{}".to_string()),
    )
}
