//! Solana verifier
//!
//! Requests the transaction at `finalized` commitment, so there is no
//! pending state. Payment is proven by the treasury's token balance
//! increase between `preTokenBalances` and `postTokenBalances`.
//!
//! Sender attribution is best-effort: a mismatch is logged, not rejected,
//! because the payer's token account does not always show up in the diff.

use std::sync::Arc;

use alloy::primitives::U256;
use async_trait::async_trait;
use serde_json::{json, Value};
use shared::PaymentConfig;
use tracing::{debug, warn};

use super::rpc::JsonRpcClient;
use super::{ChainVerifier, RejectReason, VerificationOutcome, VerificationRequest};
use crate::error::PaymentError;
use crate::services::money::{meets_tolerance, token_units_to_micro_usd};

/// SPL stable tokens accepted as payment: (symbol, mint, decimals)
pub const SOLANA_TOKENS: &[(&str, &str, u8)] = &[
    ("USDC", "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", 6),
    ("USDT", "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY2i4ULTkmLiGdz", 6),
];

pub struct SolanaVerifier {
    config: Arc<PaymentConfig>,
    rpc: Arc<JsonRpcClient>,
}

impl SolanaVerifier {
    pub fn new(config: Arc<PaymentConfig>, rpc: Arc<JsonRpcClient>) -> Self {
        Self { config, rpc }
    }
}

#[async_trait]
impl ChainVerifier for SolanaVerifier {
    fn preflight(&self, _request: &VerificationRequest) -> Result<(), PaymentError> {
        self.config.require_solana_rpc()?;
        Ok(())
    }

    async fn verify(&self, request: &VerificationRequest) -> VerificationOutcome {
        let url = match self.config.require_solana_rpc() {
            Ok(url) => url,
            Err(e) => return VerificationOutcome::Unavailable(e.to_string()),
        };

        let params = json!([
            request.tx_hash,
            {
                "encoding": "jsonParsed",
                "commitment": "finalized",
                "maxSupportedTransactionVersion": 0
            }
        ]);

        let tx = match self.rpc.call(url, "getTransaction", params).await {
            Ok(tx) => tx,
            Err(e) => {
                warn!(tx_hash = %request.tx_hash, error = %e, "Solana RPC call failed");
                return VerificationOutcome::Unavailable(e.to_string());
            }
        };

        let outcome = evaluate_solana(request, &tx);
        debug!(tx_hash = %request.tx_hash, outcome = ?outcome, "Solana verification evaluated");
        outcome
    }
}

/// Decide the outcome from a `getTransaction` result (null when unknown)
pub fn evaluate_solana(request: &VerificationRequest, tx: &Value) -> VerificationOutcome {
    if tx.is_null() {
        return VerificationOutcome::NotFound;
    }

    let meta = &tx["meta"];
    if meta.is_null() {
        return VerificationOutcome::NotFound;
    }
    if !meta["err"].is_null() {
        return VerificationOutcome::Rejected(RejectReason::TransactionFailed);
    }

    if !sender_is_attributed(tx, &request.claimed_sender) {
        warn!(
            tx_hash = %request.tx_hash,
            claimed_sender = %request.claimed_sender,
            "Claimed sender not found among signers or debited accounts; accepting on treasury credit"
        );
    }

    let mut best_received: Option<i64> = None;
    for (symbol, mint, decimals) in SOLANA_TOKENS {
        let pre = owner_balance(&meta["preTokenBalances"], &request.treasury, mint);
        let post = owner_balance(&meta["postTokenBalances"], &request.treasury, mint);
        let Some(delta) = post.checked_sub(pre).filter(|d| *d > 0) else {
            continue;
        };

        let received = token_units_to_micro_usd(U256::from(delta), *decimals);
        if meets_tolerance(request.expected_micro_usd, received) {
            return VerificationOutcome::Verified {
                received_micro_usd: received,
                asset: (*symbol).to_string(),
            };
        }
        best_received = Some(best_received.map_or(received, |best| best.max(received)));
    }

    match best_received {
        Some(received_micro_usd) => VerificationOutcome::Rejected(RejectReason::InsufficientAmount {
            expected_micro_usd: request.expected_micro_usd,
            received_micro_usd,
        }),
        None => VerificationOutcome::Rejected(RejectReason::NoMatchingTransfer),
    }
}

/// Sum of raw token amounts held by `owner` for `mint`
fn owner_balance(balances: &Value, owner: &str, mint: &str) -> u128 {
    balances
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter(|b| b["owner"].as_str() == Some(owner) && b["mint"].as_str() == Some(mint))
        .filter_map(|b| b["uiTokenAmount"]["amount"].as_str()?.parse::<u128>().ok())
        .sum()
}

/// Whether the claimed wallet signed the transaction or had a token
/// balance debited by it
fn sender_is_attributed(tx: &Value, claimed_sender: &str) -> bool {
    let signed = tx["transaction"]["message"]["accountKeys"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .any(|key| {
            key["pubkey"].as_str() == Some(claimed_sender) && key["signer"].as_bool() == Some(true)
        });
    if signed {
        return true;
    }

    let meta = &tx["meta"];
    SOLANA_TOKENS.iter().any(|(_, mint, _)| {
        owner_balance(&meta["postTokenBalances"], claimed_sender, mint)
            < owner_balance(&meta["preTokenBalances"], claimed_sender, mint)
    })
}
