//! Caller identity
//!
//! Session management lives upstream; this service only validates the
//! HS256 bearer token it is handed and trusts its `sub` claim as the user
//! id. Handlers take an [`AuthenticatedUser`] argument and never see the
//! request without one.

use actix_web::{
    dev::Payload, error::InternalError, http::header, web, FromRequest, HttpRequest,
    HttpResponse,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};
use tracing::debug;

use crate::models::ErrorResponse;

/// HMAC key used to validate bearer tokens, registered as app data
#[derive(Clone)]
pub struct JwtSecret(String);

impl JwtSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(self.0.as_bytes())
    }
}

/// JWT claims issued by the account service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (user_id)
    pub exp: i64,
    pub iat: i64,
    #[serde(default)]
    pub username: Option<String>,
}

/// The authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

impl AuthenticatedUser {
    /// Validate a raw `Authorization` header value
    pub fn from_bearer(header_value: &str, secret: &JwtSecret) -> Option<Self> {
        let token = header_value
            .strip_prefix("Bearer ")
            .or_else(|| header_value.strip_prefix("bearer "))?
            .trim();
        if token.is_empty() {
            return None;
        }

        let validation = Validation::new(Algorithm::HS256);
        match decode::<Claims>(token, &secret.decoding_key(), &validation) {
            Ok(data) if !data.claims.sub.trim().is_empty() => Some(Self {
                user_id: data.claims.sub,
            }),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "Rejected bearer token");
                None
            }
        }
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let user = req
            .app_data::<web::Data<JwtSecret>>()
            .and_then(|secret| {
                let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
                AuthenticatedUser::from_bearer(value, secret)
            });

        ready(user.ok_or_else(unauthorized))
    }
}

fn unauthorized() -> actix_web::Error {
    InternalError::from_response(
        "unauthorized",
        HttpResponse::Unauthorized().json(ErrorResponse::new(
            "unauthorized",
            "Authentication required",
        )),
    )
    .into()
}
