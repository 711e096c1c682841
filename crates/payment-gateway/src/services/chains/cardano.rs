//! Cardano (UTxO) verifier
//!
//! Reads the transaction's spent and created outputs from the Blockfrost
//! indexer. The claimed sender must own one of the spent inputs; the
//! lovelace sent to the treasury is valued at the live ADA spot price.
//!
//! When the price source is down the verifier values ADA at
//! [`FALLBACK_PRICE_MICRO_USD`], which is deliberately low so an outage
//! can only cause a false rejection, never a false acceptance.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use shared::PaymentConfig;
use tracing::{debug, error, warn};

use super::{ChainVerifier, RejectReason, VerificationOutcome, VerificationRequest};
use crate::error::PaymentError;
use crate::services::money::{meets_tolerance, native_units_to_micro_usd, parse_decimal_units};

/// Conservative ADA price used when the spot price is unavailable ($0.25)
pub const FALLBACK_PRICE_MICRO_USD: i64 = 250_000;

const LOVELACE: &str = "lovelace";

// ============================================================================
// Price source
// ============================================================================

/// Spot price of one ADA in micro-USD
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn ada_price_micro_usd(&self) -> Result<i64, String>;
}

/// Simple-price endpoint returning `{"cardano": {"usd": <number>}}`
pub struct CoinGeckoPriceSource {
    http: Client,
    url: String,
}

impl CoinGeckoPriceSource {
    pub fn new(http: Client, url: String) -> Self {
        Self { http, url }
    }
}

#[async_trait]
impl PriceSource for CoinGeckoPriceSource {
    async fn ada_price_micro_usd(&self) -> Result<i64, String> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| e.without_url().to_string())?;

        if !response.status().is_success() {
            return Err(format!("price source returned HTTP {}", response.status().as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| e.without_url().to_string())?;

        parse_price(&body).ok_or_else(|| "price missing from response".to_string())
    }
}

fn parse_price(body: &Value) -> Option<i64> {
    let price = match &body["cardano"]["usd"] {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => return None,
    };
    parse_decimal_units(&price, 6).filter(|micro| *micro > 0)
}

// ============================================================================
// Verifier
// ============================================================================

pub struct CardanoVerifier {
    config: Arc<PaymentConfig>,
    http: Client,
    prices: Arc<dyn PriceSource>,
}

impl CardanoVerifier {
    pub fn new(config: Arc<PaymentConfig>, http: Client, prices: Arc<dyn PriceSource>) -> Self {
        Self {
            config,
            http,
            prices,
        }
    }

    async fn spot_price(&self) -> i64 {
        match self.prices.ada_price_micro_usd().await {
            Ok(price) => price,
            Err(e) => {
                warn!(
                    error = %e,
                    fallback_micro_usd = FALLBACK_PRICE_MICRO_USD,
                    "ADA price unavailable, using fallback price"
                );
                FALLBACK_PRICE_MICRO_USD
            }
        }
    }

    /// Decide the outcome from a Blockfrost `/txs/{hash}/utxos` body
    pub async fn evaluate_utxos(
        &self,
        request: &VerificationRequest,
        utxos: &Value,
    ) -> VerificationOutcome {
        let lovelace = match treasury_lovelace(request, utxos) {
            Ok(lovelace) => lovelace,
            Err(reason) => return VerificationOutcome::Rejected(reason),
        };

        let price = self.spot_price().await;
        let received_micro_usd = native_units_to_micro_usd(lovelace, price);

        debug!(
            tx_hash = %request.tx_hash,
            lovelace = %lovelace,
            price_micro_usd = price,
            received_micro_usd,
            "Cardano treasury output valued"
        );

        if !meets_tolerance(request.expected_micro_usd, received_micro_usd) {
            return VerificationOutcome::Rejected(RejectReason::InsufficientAmount {
                expected_micro_usd: request.expected_micro_usd,
                received_micro_usd,
            });
        }

        VerificationOutcome::Verified {
            received_micro_usd,
            asset: "ADA".to_string(),
        }
    }
}

#[async_trait]
impl ChainVerifier for CardanoVerifier {
    fn preflight(&self, _request: &VerificationRequest) -> Result<(), PaymentError> {
        self.config.require_indexer()?;
        Ok(())
    }

    async fn verify(&self, request: &VerificationRequest) -> VerificationOutcome {
        let indexer = match self.config.require_indexer() {
            Ok(indexer) => indexer,
            Err(e) => return VerificationOutcome::Unavailable(e.to_string()),
        };

        let url = format!("{}/txs/{}/utxos", indexer.base_url, request.tx_hash);
        let response = match self
            .http
            .get(&url)
            .header("project_id", indexer.api_key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(tx_hash = %request.tx_hash, error = %e.without_url(), "Indexer request failed");
                return VerificationOutcome::Unavailable("indexer unreachable".to_string());
            }
        };

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => {
                return VerificationOutcome::NotFound;
            }
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                error!(status = %response.status(), "Indexer rejected the API key");
                return VerificationOutcome::Unavailable("indexer authentication failed".to_string());
            }
            status => {
                warn!(tx_hash = %request.tx_hash, status = %status, "Indexer error");
                return VerificationOutcome::Unavailable(format!(
                    "indexer returned HTTP {}",
                    status.as_u16()
                ));
            }
        }

        let utxos: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                return VerificationOutcome::Unavailable(format!(
                    "malformed indexer response: {}",
                    e.without_url()
                ))
            }
        };

        self.evaluate_utxos(request, &utxos).await
    }
}

/// Lovelace paid to the treasury by a transaction the claimed sender funded
fn treasury_lovelace(request: &VerificationRequest, utxos: &Value) -> Result<u128, RejectReason> {
    let entries = |key: &str| {
        utxos[key]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .to_vec()
    };

    let sender_spent = entries("inputs")
        .iter()
        .any(|input| input["address"].as_str() == Some(request.claimed_sender.as_str()));
    if !sender_spent {
        return Err(RejectReason::SenderMismatch);
    }

    let lovelace: u128 = entries("outputs")
        .iter()
        .filter(|output| output["address"].as_str() == Some(request.treasury.as_str()))
        .flat_map(|output| {
            output["amount"]
                .as_array()
                .map(Vec::as_slice)
                .unwrap_or_default()
                .to_vec()
        })
        .filter(|amount| amount["unit"].as_str() == Some(LOVELACE))
        .filter_map(|amount| amount["quantity"].as_str()?.parse::<u128>().ok())
        .fold(0u128, u128::saturating_add);

    if lovelace == 0 {
        return Err(RejectReason::NoMatchingTransfer);
    }

    Ok(lovelace)
}
