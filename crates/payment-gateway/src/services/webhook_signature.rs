//! Stripe webhook signature verification
//!
//! The `Stripe-Signature` header looks like `t=1700000000,v1=<hex>,v0=<hex>`.
//! The signed payload is `"{t}.{raw body}"`, HMAC-SHA256 keyed with the full
//! `whsec_...` secret. Verification is done by hand rather than through
//! `stripe::Webhook::construct_event` so that events from newer API versions
//! still verify even when the typed event model cannot parse them.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed delivery (5 minutes)
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature header has no timestamp")]
    MissingTimestamp,

    #[error("signature header has no v1 signature")]
    MissingSignature,

    #[error("signature timestamp outside tolerance ({age}s)")]
    Expired { age: i64 },

    #[error("signature mismatch")]
    Mismatch,

    #[error("webhook secret unusable as HMAC key")]
    InvalidSecret,
}

/// Parsed `Stripe-Signature` header
#[derive(Debug)]
struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_header(header: &str) -> Result<SignatureHeader, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`
pub fn compute_signature(
    payload: &[u8],
    timestamp: i64,
    secret: &str,
) -> Result<String, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a delivery against the raw request body
///
/// Any one of the `v1` entries may match; Stripe sends several while a
/// secret is being rolled.
pub fn verify_stripe_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let parsed = parse_header(header)?;

    let age = now - parsed.timestamp;
    if age.abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::Expired { age });
    }

    let expected = compute_signature(payload, parsed.timestamp, secret)?;
    let matched = parsed
        .signatures
        .iter()
        .any(|candidate| bool::from(candidate.as_bytes().ct_eq(expected.as_bytes())));

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}
