//! EVM chain registry
//!
//! Supporting another EVM chain is one entry here plus an
//! `EVM_RPC_URL_<CHAIN>` variable; the verifier has no per-chain code.

/// A USD-pegged token accepted as payment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StableToken {
    pub symbol: &'static str,
    /// Checksummed contract address
    pub address: &'static str,
    pub decimals: u8,
}

/// An EVM chain accepted as payment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvmChain {
    pub name: &'static str,
    pub chain_id: u64,
    pub min_confirmations: u64,
    pub tokens: &'static [StableToken],
}

impl EvmChain {
    /// Look up a token by contract address (case-insensitive)
    pub fn token(&self, address: &str) -> Option<&'static StableToken> {
        self.tokens
            .iter()
            .find(|token| token.address.eq_ignore_ascii_case(address))
    }
}

pub static EVM_CHAINS: &[EvmChain] = &[
    EvmChain {
        name: "ethereum",
        chain_id: 1,
        min_confirmations: 12,
        tokens: &[
            StableToken {
                symbol: "USDC",
                address: "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
                decimals: 6,
            },
            StableToken {
                symbol: "USDT",
                address: "0xdAC17F958D2ee523a2206206994597C13D831ec7",
                decimals: 6,
            },
        ],
    },
    EvmChain {
        name: "polygon",
        chain_id: 137,
        min_confirmations: 30,
        tokens: &[
            StableToken {
                symbol: "USDC",
                address: "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359",
                decimals: 6,
            },
            StableToken {
                symbol: "USDC.e",
                address: "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174",
                decimals: 6,
            },
            StableToken {
                symbol: "USDT",
                address: "0xc2132D05D31c914a87C6611C10748AEb04B58e8F",
                decimals: 6,
            },
        ],
    },
    EvmChain {
        name: "base",
        chain_id: 8453,
        min_confirmations: 10,
        tokens: &[StableToken {
            symbol: "USDC",
            address: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            decimals: 6,
        }],
    },
    EvmChain {
        name: "arbitrum",
        chain_id: 42161,
        min_confirmations: 10,
        tokens: &[
            StableToken {
                symbol: "USDC",
                address: "0xaf88d065e77c8cC2239327C5EDb3A432268e5831",
                decimals: 6,
            },
            StableToken {
                symbol: "USDT",
                address: "0xFd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9",
                decimals: 6,
            },
        ],
    },
    EvmChain {
        name: "bsc",
        chain_id: 56,
        min_confirmations: 15,
        tokens: &[
            StableToken {
                symbol: "USDT",
                address: "0x55d398326f99059fF775485246999027B3197955",
                decimals: 18,
            },
            StableToken {
                symbol: "USDC",
                address: "0x8AC76a51cc950d9822D68b83fE1Ad97B32Cd580d",
                decimals: 18,
            },
        ],
    },
];

/// Find a chain by name (case-insensitive)
pub fn evm_chain(name: &str) -> Option<&'static EvmChain> {
    EVM_CHAINS
        .iter()
        .find(|chain| chain.name.eq_ignore_ascii_case(name))
}
