//! Supported EVM chains and their tokens.

use serde::{Deserialize, Serialize};

/// Token symbols tracked by the client.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum TokenSymbol {
    Eth,
    Xdai,
    Celo,
    Olas,
}

impl TokenSymbol {
    /// Number of decimals of the token on every supported chain.
    pub fn decimals(&self) -> u8 {
        18
    }
}

/// An EVM chain the operator can hold wallets and run agents on.
///
/// The string form matches the chain names used by the operate middleware.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Chain {
    Ethereum,
    Gnosis,
    Base,
    #[serde(rename = "optimistic", alias = "optimism")]
    #[strum(to_string = "optimistic", serialize = "optimism")]
    Optimism,
    Mode,
    Celo,
}

impl Chain {
    /// The EIP-155 chain id.
    pub fn chain_id(&self) -> u64 {
        match self {
            Chain::Ethereum => 1,
            Chain::Gnosis => 100,
            Chain::Base => 8453,
            Chain::Optimism => 10,
            Chain::Mode => 34443,
            Chain::Celo => 42220,
        }
    }

    /// The token gas is paid in.
    pub fn native_token(&self) -> TokenSymbol {
        match self {
            Chain::Gnosis => TokenSymbol::Xdai,
            Chain::Celo => TokenSymbol::Celo,
            Chain::Ethereum | Chain::Base | Chain::Optimism | Chain::Mode => TokenSymbol::Eth,
        }
    }

    /// Public RPC endpoint used when no override is configured.
    pub fn public_rpc(&self) -> &'static str {
        match self {
            Chain::Ethereum => "https://ethereum.publicnode.com",
            Chain::Gnosis => "https://gnosis-rpc.publicnode.com",
            Chain::Base => "https://mainnet.base.org",
            Chain::Optimism => "https://mainnet.optimism.io",
            Chain::Mode => "https://rpc.mode.network",
            Chain::Celo => "https://forno.celo.org",
        }
    }

    /// Environment variable that overrides the RPC endpoint of this chain.
    pub fn rpc_env_var(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ETHEREUM_RPC",
            Chain::Gnosis => "GNOSIS_RPC",
            Chain::Base => "BASE_RPC",
            Chain::Optimism => "OPTIMISM_RPC",
            Chain::Mode => "MODE_RPC",
            Chain::Celo => "CELO_RPC",
        }
    }
}
