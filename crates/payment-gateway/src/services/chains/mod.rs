//! On-chain payment verification
//!
//! One verifier per chain family, all behind [`ChainVerifier`]. The
//! orchestrator picks the verifier for the request's `chainType` from a flat
//! [`ChainVerifiers`] table; each verifier owns its network calls and
//! decoding and reports a [`VerificationOutcome`].
//!
//! Treasury addresses are resolved by the caller and passed in each
//! [`VerificationRequest`], so verifiers hold no ambient wallet state.

pub mod cardano;
pub mod evm;
pub mod registry;
pub mod rpc;
pub mod solana;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use shared::{ChainFamily, PaymentConfig};

use crate::error::PaymentError;

pub use cardano::{CardanoVerifier, CoinGeckoPriceSource, PriceSource};
pub use evm::EvmVerifier;
pub use registry::{evm_chain, EvmChain, StableToken, EVM_CHAINS};
pub use rpc::{JsonRpcClient, RpcError};
pub use solana::SolanaVerifier;

// ============================================================================
// Contract
// ============================================================================

/// Input to a single verification
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub chain_family: ChainFamily,
    /// EVM sub-chain name, lowercase
    pub chain: Option<String>,
    pub tx_hash: String,
    pub claimed_sender: String,
    pub expected_micro_usd: i64,
    pub treasury: String,
}

/// Result of inspecting a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Transfer to the treasury found and within tolerance
    Verified {
        received_micro_usd: i64,
        asset: String,
    },
    /// Included but not yet final
    Pending { confirmations_remaining: u64 },
    Rejected(RejectReason),
    /// Unknown to the node or indexer (may still be propagating)
    NotFound,
    /// Upstream timeout or error; nothing was learned
    Unavailable(String),
}

/// Why a transaction does not pay for the product
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    TransactionFailed,
    SenderMismatch,
    NoMatchingTransfer,
    InsufficientAmount {
        expected_micro_usd: i64,
        received_micro_usd: i64,
    },
    UnsupportedChain(String),
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::TransactionFailed => "transaction_failed",
            RejectReason::SenderMismatch => "sender_mismatch",
            RejectReason::NoMatchingTransfer => "no_matching_transfer",
            RejectReason::InsufficientAmount { .. } => "insufficient_amount",
            RejectReason::UnsupportedChain(_) => "unsupported_chain",
        }
    }

    /// Whether the transaction itself can never pay for the product
    ///
    /// Terminal rejections fail the payment record and burn the hash.
    /// A sender mismatch only says the caller does not own the transaction,
    /// so the claim is released for the real sender.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RejectReason::TransactionFailed
                | RejectReason::NoMatchingTransfer
                | RejectReason::InsufficientAmount { .. }
        )
    }

    pub fn details(&self) -> serde_json::Value {
        match self {
            RejectReason::InsufficientAmount {
                expected_micro_usd,
                received_micro_usd,
            } => serde_json::json!({
                "reason": self.code(),
                "expected_micro_usd": expected_micro_usd,
                "received_micro_usd": received_micro_usd,
                "shortfall_micro_usd": expected_micro_usd.saturating_sub(*received_micro_usd),
            }),
            RejectReason::UnsupportedChain(chain) => serde_json::json!({
                "reason": self.code(),
                "chain": chain,
            }),
            _ => serde_json::json!({ "reason": self.code() }),
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::TransactionFailed => write!(f, "Transaction failed on-chain"),
            RejectReason::SenderMismatch => {
                write!(f, "Transaction was not sent from the claimed wallet")
            }
            RejectReason::NoMatchingTransfer => {
                write!(f, "No supported token transfer to the treasury found")
            }
            RejectReason::InsufficientAmount {
                expected_micro_usd,
                received_micro_usd,
            } => write!(
                f,
                "Insufficient amount: expected {} micro-USD, received {}",
                expected_micro_usd, received_micro_usd
            ),
            RejectReason::UnsupportedChain(chain) => write!(f, "Unsupported chain: {}", chain),
        }
    }
}

/// One verification strategy per chain family
#[async_trait]
pub trait ChainVerifier: Send + Sync {
    /// Reject requests this verifier cannot serve before anything is recorded
    fn preflight(&self, request: &VerificationRequest) -> Result<(), PaymentError>;

    async fn verify(&self, request: &VerificationRequest) -> VerificationOutcome;
}

/// Flat dispatch table keyed by chain family
#[derive(Clone)]
pub struct ChainVerifiers {
    evm: Arc<dyn ChainVerifier>,
    solana: Arc<dyn ChainVerifier>,
    cardano: Arc<dyn ChainVerifier>,
}

impl ChainVerifiers {
    pub fn new(
        evm: Arc<dyn ChainVerifier>,
        solana: Arc<dyn ChainVerifier>,
        cardano: Arc<dyn ChainVerifier>,
    ) -> Self {
        Self {
            evm,
            solana,
            cardano,
        }
    }

    /// Build the production verifiers sharing one RPC client
    pub fn from_config(config: Arc<PaymentConfig>) -> Result<Self, PaymentError> {
        let rpc = Arc::new(JsonRpcClient::new(config.rpc_timeout_secs)?);
        let prices = Arc::new(CoinGeckoPriceSource::new(
            rpc.http().clone(),
            config.price_api_url.clone(),
        ));

        Ok(Self {
            evm: Arc::new(EvmVerifier::new(config.clone(), rpc.clone())),
            solana: Arc::new(SolanaVerifier::new(config.clone(), rpc.clone())),
            cardano: Arc::new(CardanoVerifier::new(config, rpc.http().clone(), prices)),
        })
    }

    pub fn for_family(&self, family: ChainFamily) -> &dyn ChainVerifier {
        match family {
            ChainFamily::Evm => self.evm.as_ref(),
            ChainFamily::Solana => self.solana.as_ref(),
            ChainFamily::Cardano => self.cardano.as_ref(),
        }
    }
}

// ============================================================================
// Input normalization
// ============================================================================

static EVM_TX_HASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("Invalid EVM tx hash regex"));
static EVM_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("Invalid EVM address regex"));
static BASE58_SIGNATURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{64,90}$").expect("Invalid base58 signature regex"));
static BASE58_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").expect("Invalid base58 address regex"));
static HEX_TX_HASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{64}$").expect("Invalid hex tx hash regex"));
static BECH32_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(addr|addr_test)1[02-9ac-hj-np-z]{20,}$").expect("Invalid bech32 address regex"));

/// Validate a transaction hash and return its canonical form
///
/// Hex hashes are lowercased so the same transaction always maps to the
/// same provider payment id.
pub fn normalize_tx_hash(family: ChainFamily, tx_hash: &str) -> Result<String, PaymentError> {
    let tx_hash = tx_hash.trim();
    let valid = match family {
        ChainFamily::Evm => EVM_TX_HASH.is_match(tx_hash),
        ChainFamily::Solana => BASE58_SIGNATURE.is_match(tx_hash),
        ChainFamily::Cardano => HEX_TX_HASH.is_match(tx_hash),
    };

    if !valid {
        return Err(PaymentError::validation(format!(
            "txHash is not a valid {} transaction hash",
            family
        )));
    }

    Ok(match family {
        ChainFamily::Solana => tx_hash.to_string(),
        ChainFamily::Evm | ChainFamily::Cardano => tx_hash.to_lowercase(),
    })
}

/// Validate a wallet address for a chain family
pub fn normalize_address(family: ChainFamily, address: &str) -> Result<String, PaymentError> {
    let address = address.trim();
    let valid = match family {
        ChainFamily::Evm => EVM_ADDRESS.is_match(address),
        ChainFamily::Solana => BASE58_ADDRESS.is_match(address),
        ChainFamily::Cardano => BECH32_ADDRESS.is_match(address),
    };

    if !valid {
        return Err(PaymentError::validation(format!(
            "claimedSenderWallet is not a valid {} address",
            family
        )));
    }

    Ok(match family {
        ChainFamily::Evm => address.to_lowercase(),
        ChainFamily::Solana | ChainFamily::Cardano => address.to_string(),
    })
}
