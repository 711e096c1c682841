//! EVM chain verifier
//!
//! Fetches the transaction, its receipt and the chain head concurrently,
//! then looks for ERC-20 `Transfer` logs from a registered stable token to
//! the treasury. The decision itself is the pure [`evaluate_evm`].

use std::sync::Arc;

use alloy::primitives::{keccak256, U256};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use shared::PaymentConfig;
use tracing::{debug, warn};

use super::registry::{evm_chain, EvmChain};
use super::rpc::{parse_quantity, JsonRpcClient};
use super::{ChainVerifier, RejectReason, VerificationOutcome, VerificationRequest};
use crate::error::PaymentError;
use crate::services::money::{meets_tolerance, token_units_to_micro_usd};

/// topic0 of `Transfer(address,address,uint256)`
static TRANSFER_TOPIC: Lazy<String> = Lazy::new(|| {
    format!(
        "0x{}",
        hex::encode(keccak256("Transfer(address,address,uint256)"))
    )
});

pub struct EvmVerifier {
    config: Arc<PaymentConfig>,
    rpc: Arc<JsonRpcClient>,
}

impl EvmVerifier {
    pub fn new(config: Arc<PaymentConfig>, rpc: Arc<JsonRpcClient>) -> Self {
        Self { config, rpc }
    }
}

fn resolve_chain(request: &VerificationRequest) -> Result<&'static EvmChain, RejectReason> {
    let name = request.chain.as_deref().unwrap_or_default();
    evm_chain(name).ok_or_else(|| {
        RejectReason::UnsupportedChain(if name.is_empty() {
            "(none)".to_string()
        } else {
            name.to_string()
        })
    })
}

#[async_trait]
impl ChainVerifier for EvmVerifier {
    fn preflight(&self, request: &VerificationRequest) -> Result<(), PaymentError> {
        let chain = resolve_chain(request).map_err(PaymentError::Rejected)?;
        self.config.require_evm_rpc(chain.name)?;
        Ok(())
    }

    async fn verify(&self, request: &VerificationRequest) -> VerificationOutcome {
        let chain = match resolve_chain(request) {
            Ok(chain) => chain,
            Err(reason) => return VerificationOutcome::Rejected(reason),
        };
        let url = match self.config.require_evm_rpc(chain.name) {
            Ok(url) => url,
            Err(e) => return VerificationOutcome::Unavailable(e.to_string()),
        };

        let hash = json!([request.tx_hash]);
        let (tx, receipt, head) = tokio::join!(
            self.rpc.call(url, "eth_getTransactionByHash", hash.clone()),
            self.rpc.call(url, "eth_getTransactionReceipt", hash),
            self.rpc.call(url, "eth_blockNumber", json!([])),
        );

        let (tx, receipt, head) = match (tx, receipt, head) {
            (Ok(tx), Ok(receipt), Ok(head)) => (tx, receipt, head),
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
                warn!(
                    chain = chain.name,
                    tx_hash = %request.tx_hash,
                    error = %e,
                    "EVM RPC call failed"
                );
                return VerificationOutcome::Unavailable(e.to_string());
            }
        };

        let Some(head) = parse_quantity(&head) else {
            return VerificationOutcome::Unavailable("malformed eth_blockNumber".to_string());
        };

        let outcome = evaluate_evm(chain, request, &tx, &receipt, head);
        debug!(
            chain = chain.name,
            tx_hash = %request.tx_hash,
            head,
            outcome = ?outcome,
            "EVM verification evaluated"
        );
        outcome
    }
}

/// Decide the outcome from raw RPC results
///
/// `tx` and `receipt` are the JSON `result` members (null when unknown).
pub fn evaluate_evm(
    chain: &EvmChain,
    request: &VerificationRequest,
    tx: &Value,
    receipt: &Value,
    head: u64,
) -> VerificationOutcome {
    if tx.is_null() {
        return VerificationOutcome::NotFound;
    }

    // Checked before any pending answer so a claim is never kept for a
    // transaction the caller did not send
    let sender = tx.get("from").and_then(Value::as_str).unwrap_or_default();
    if !sender.eq_ignore_ascii_case(&request.claimed_sender) {
        return VerificationOutcome::Rejected(RejectReason::SenderMismatch);
    }

    if receipt.is_null() {
        // In the mempool, not yet mined
        return VerificationOutcome::Pending {
            confirmations_remaining: chain.min_confirmations,
        };
    }

    if receipt.get("status").and_then(Value::as_str) != Some("0x1") {
        return VerificationOutcome::Rejected(RejectReason::TransactionFailed);
    }

    let Some(block) = receipt.get("blockNumber").and_then(parse_quantity) else {
        return VerificationOutcome::Unavailable("receipt without blockNumber".to_string());
    };
    let confirmations = head.checked_sub(block).map(|d| d + 1).unwrap_or(0);
    if confirmations < chain.min_confirmations {
        return VerificationOutcome::Pending {
            confirmations_remaining: chain.min_confirmations - confirmations,
        };
    }

    let treasury = request.treasury.trim_start_matches("0x").to_lowercase();
    let mut received_micro_usd: i64 = 0;
    let mut assets: Vec<&str> = Vec::new();

    let logs = receipt
        .get("logs")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for log in logs {
        if log.get("removed").and_then(Value::as_bool) == Some(true) {
            continue;
        }
        let Some(token) = log
            .get("address")
            .and_then(Value::as_str)
            .and_then(|address| chain.token(address))
        else {
            continue;
        };
        let Some(topics) = log.get("topics").and_then(Value::as_array) else {
            continue;
        };
        if topics.len() < 3 {
            continue;
        }
        let topic0 = topics[0].as_str().unwrap_or_default();
        if !topic0.eq_ignore_ascii_case(&TRANSFER_TOPIC) {
            continue;
        }
        let recipient = topics[2].as_str().unwrap_or_default();
        if !topic_is_address(recipient, &treasury) {
            continue;
        }
        let Some(amount) = log
            .get("data")
            .and_then(Value::as_str)
            .and_then(|data| data.strip_prefix("0x"))
            .and_then(|data| U256::from_str_radix(data, 16).ok())
        else {
            continue;
        };

        received_micro_usd =
            received_micro_usd.saturating_add(token_units_to_micro_usd(amount, token.decimals));
        if !assets.contains(&token.symbol) {
            assets.push(token.symbol);
        }
    }

    if assets.is_empty() {
        return VerificationOutcome::Rejected(RejectReason::NoMatchingTransfer);
    }

    if !meets_tolerance(request.expected_micro_usd, received_micro_usd) {
        return VerificationOutcome::Rejected(RejectReason::InsufficientAmount {
            expected_micro_usd: request.expected_micro_usd,
            received_micro_usd,
        });
    }

    VerificationOutcome::Verified {
        received_micro_usd,
        asset: assets.join("+"),
    }
}

/// Whether a 32-byte topic holds the given 20-byte address (lowercase hex, no prefix)
fn topic_is_address(topic: &str, address: &str) -> bool {
    let Some(digits) = topic.strip_prefix("0x") else {
        return false;
    };
    digits.len() == 64
        && digits.is_ascii()
        && digits[..24].bytes().all(|b| b == b'0')
        && digits[24..].eq_ignore_ascii_case(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::ChainFamily;

    const SENDER: &str = "0x1111111111111111111111111111111111111111";
    const TREASURY: &str = "0x2222222222222222222222222222222222222222";
    const POLYGON_USDC: &str = "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359";

    fn request(expected_micro_usd: i64) -> VerificationRequest {
        VerificationRequest {
            chain_family: ChainFamily::Evm,
            chain: Some("polygon".to_string()),
            tx_hash: format!("0x{}", "ab".repeat(32)),
            claimed_sender: SENDER.to_string(),
            expected_micro_usd,
            treasury: TREASURY.to_string(),
        }
    }

    fn pad_address(address: &str) -> String {
        format!("0x{:0>64}", address.trim_start_matches("0x").to_lowercase())
    }

    fn transfer_log(token: &str, to: &str, amount: u128) -> Value {
        json!({
            "address": token,
            "topics": [TRANSFER_TOPIC.as_str(), pad_address(SENDER), pad_address(to)],
            "data": format!("0x{:064x}", amount),
            "removed": false
        })
    }

    fn tx() -> Value {
        json!({ "from": "0x1111111111111111111111111111111111111111", "blockNumber": "0x64" })
    }

    fn receipt(logs: Vec<Value>) -> Value {
        json!({ "status": "0x1", "blockNumber": "0x64", "logs": logs })
    }

    fn polygon() -> &'static EvmChain {
        evm_chain("polygon").unwrap()
    }

    #[test]
    fn test_transfer_topic_constant() {
        assert_eq!(
            TRANSFER_TOPIC.as_str(),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_verified_past_minimum_confirmations() {
        // block 100, head 129 -> 30 confirmations
        let outcome = evaluate_evm(
            polygon(),
            &request(10_000_000),
            &tx(),
            &receipt(vec![transfer_log(POLYGON_USDC, TREASURY, 10_000_000)]),
            129,
        );
        assert_eq!(
            outcome,
            VerificationOutcome::Verified {
                received_micro_usd: 10_000_000,
                asset: "USDC".to_string()
            }
        );
    }

    #[test]
    fn test_one_confirmation_short_is_pending() {
        let outcome = evaluate_evm(
            polygon(),
            &request(10_000_000),
            &tx(),
            &receipt(vec![transfer_log(POLYGON_USDC, TREASURY, 10_000_000)]),
            128,
        );
        assert_eq!(
            outcome,
            VerificationOutcome::Pending {
                confirmations_remaining: 1
            }
        );
    }

    #[test]
    fn test_unknown_transaction_is_not_found() {
        let outcome = evaluate_evm(polygon(), &request(1), &Value::Null, &Value::Null, 200);
        assert_eq!(outcome, VerificationOutcome::NotFound);
    }

    #[test]
    fn test_unmined_transaction_is_pending() {
        let outcome = evaluate_evm(polygon(), &request(1), &tx(), &Value::Null, 200);
        assert_eq!(
            outcome,
            VerificationOutcome::Pending {
                confirmations_remaining: 30
            }
        );
    }

    #[test]
    fn test_unmined_transaction_from_other_sender_is_rejected() {
        let mut req = request(1);
        req.claimed_sender = "0x3333333333333333333333333333333333333333".to_string();
        let outcome = evaluate_evm(polygon(), &req, &tx(), &Value::Null, 200);
        assert_eq!(
            outcome,
            VerificationOutcome::Rejected(RejectReason::SenderMismatch)
        );
    }

    #[test]
    fn test_reverted_transaction_is_rejected() {
        let mut failed = receipt(vec![]);
        failed["status"] = json!("0x0");
        let outcome = evaluate_evm(polygon(), &request(1), &tx(), &failed, 200);
        assert_eq!(
            outcome,
            VerificationOutcome::Rejected(RejectReason::TransactionFailed)
        );
    }

    #[test]
    fn test_sender_compare_is_case_insensitive() {
        let mut req = request(10_000_000);
        req.claimed_sender = "0xABCDEFABCDEFABCDEFABCDEFABCDEFABCDEFABCD".to_string();
        let mixed_case_tx = json!({
            "from": "0xabcdefABCDEFabcdefABCDEFabcdefABCDEFabcd",
            "blockNumber": "0x64"
        });
        let outcome = evaluate_evm(
            polygon(),
            &req,
            &mixed_case_tx,
            &receipt(vec![transfer_log(POLYGON_USDC, TREASURY, 10_000_000)]),
            200,
        );
        assert!(matches!(outcome, VerificationOutcome::Verified { .. }));
    }

    #[test]
    fn test_sender_mismatch() {
        let mut req = request(10_000_000);
        req.claimed_sender = "0x3333333333333333333333333333333333333333".to_string();
        let outcome = evaluate_evm(polygon(), &req, &tx(), &receipt(vec![]), 200);
        assert_eq!(
            outcome,
            VerificationOutcome::Rejected(RejectReason::SenderMismatch)
        );
    }

    #[test]
    fn test_tolerance_band() {
        let logs = |amount| receipt(vec![transfer_log(POLYGON_USDC, TREASURY, amount)]);

        let at_98 = evaluate_evm(polygon(), &request(10_000_000), &tx(), &logs(9_800_000), 200);
        assert!(matches!(at_98, VerificationOutcome::Verified { .. }));

        let at_97_9 = evaluate_evm(polygon(), &request(10_000_000), &tx(), &logs(9_790_000), 200);
        assert_eq!(
            at_97_9,
            VerificationOutcome::Rejected(RejectReason::InsufficientAmount {
                expected_micro_usd: 10_000_000,
                received_micro_usd: 9_790_000
            })
        );
    }

    #[test]
    fn test_transfer_to_other_address_is_ignored() {
        let outcome = evaluate_evm(
            polygon(),
            &request(10_000_000),
            &tx(),
            &receipt(vec![transfer_log(
                POLYGON_USDC,
                "0x4444444444444444444444444444444444444444",
                10_000_000,
            )]),
            200,
        );
        assert_eq!(
            outcome,
            VerificationOutcome::Rejected(RejectReason::NoMatchingTransfer)
        );
    }

    #[test]
    fn test_unregistered_token_is_ignored() {
        // Ethereum USDC address is not a polygon token
        let outcome = evaluate_evm(
            polygon(),
            &request(10_000_000),
            &tx(),
            &receipt(vec![transfer_log(
                "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
                TREASURY,
                10_000_000,
            )]),
            200,
        );
        assert_eq!(
            outcome,
            VerificationOutcome::Rejected(RejectReason::NoMatchingTransfer)
        );
    }

    #[test]
    fn test_split_transfers_are_summed() {
        let outcome = evaluate_evm(
            polygon(),
            &request(10_000_000),
            &tx(),
            &receipt(vec![
                transfer_log(POLYGON_USDC, TREASURY, 6_000_000),
                transfer_log("0xc2132D05D31c914a87C6611C10748AEb04B58e8F", TREASURY, 4_000_000),
            ]),
            200,
        );
        assert_eq!(
            outcome,
            VerificationOutcome::Verified {
                received_micro_usd: 10_000_000,
                asset: "USDC+USDT".to_string()
            }
        );
    }

    #[test]
    fn test_topic_address_match() {
        let topic = pad_address(TREASURY);
        assert!(topic_is_address(&topic, "2222222222222222222222222222222222222222"));
        assert!(!topic_is_address("0x1234", "2222222222222222222222222222222222222222"));
    }
}
