//! Networks the donation engine knows about and their fixed contract addresses.
//!
//! Chain ids arrive from checkout as plain numbers; configuration is keyed by network
//! name (`[chains.optimism]`). [`Network`] bridges the two.

use alloy::primitives::{Address, address};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Canonical Permit2 deployment, identical on every supported chain.
///
/// Used both as the ERC-20 approval spender and as the EIP-712 verifying contract.
pub const PERMIT2_ADDRESS: Address = address!("0x000000000022D473030F116dDEE9F6B43aC78BA3");

/// Supported EVM networks.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    /// Ethereum mainnet (chain ID 1).
    #[serde(rename = "ethereum")]
    Ethereum,
    /// Ethereum Sepolia testnet (chain ID 11155111).
    #[serde(rename = "sepolia")]
    Sepolia,
    /// OP mainnet (chain ID 10).
    #[serde(rename = "optimism")]
    Optimism,
    /// Arbitrum One (chain ID 42161).
    #[serde(rename = "arbitrum")]
    Arbitrum,
    /// Base mainnet (chain ID 8453).
    #[serde(rename = "base")]
    Base,
    /// Base Sepolia testnet (chain ID 84532).
    #[serde(rename = "base-sepolia")]
    BaseSepolia,
    /// Polygon mainnet (chain ID 137).
    #[serde(rename = "polygon")]
    Polygon,
    /// Celo mainnet (chain ID 42220).
    #[serde(rename = "celo")]
    Celo,
    /// Scroll mainnet (chain ID 534352).
    #[serde(rename = "scroll")]
    Scroll,
    /// zkSync Era (chain ID 324).
    #[serde(rename = "zksync")]
    ZkSync,
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = UnknownNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Network::variants()
            .iter()
            .copied()
            .find(|n| n.name() == s)
            .ok_or_else(|| UnknownNetworkError(s.to_string()))
    }
}

/// Error when a configuration key does not name a known network.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown network: {0}")]
pub struct UnknownNetworkError(pub String);

impl Network {
    /// Return all known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[
            Network::Ethereum,
            Network::Sepolia,
            Network::Optimism,
            Network::Arbitrum,
            Network::Base,
            Network::BaseSepolia,
            Network::Polygon,
            Network::Celo,
            Network::Scroll,
            Network::ZkSync,
        ]
    }

    /// Configuration key of the network.
    pub fn name(&self) -> &'static str {
        match self {
            Network::Ethereum => "ethereum",
            Network::Sepolia => "sepolia",
            Network::Optimism => "optimism",
            Network::Arbitrum => "arbitrum",
            Network::Base => "base",
            Network::BaseSepolia => "base-sepolia",
            Network::Polygon => "polygon",
            Network::Celo => "celo",
            Network::Scroll => "scroll",
            Network::ZkSync => "zksync",
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Ethereum => 1,
            Network::Sepolia => 11155111,
            Network::Optimism => 10,
            Network::Arbitrum => 42161,
            Network::Base => 8453,
            Network::BaseSepolia => 84532,
            Network::Polygon => 137,
            Network::Celo => 42220,
            Network::Scroll => 534352,
            Network::ZkSync => 324,
        }
    }

    pub fn from_chain_id(chain_id: u64) -> Option<Self> {
        Network::variants()
            .iter()
            .copied()
            .find(|n| n.chain_id() == chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_roundtrip() {
        for network in Network::variants() {
            assert_eq!(Network::from_chain_id(network.chain_id()), Some(*network));
        }
    }

    #[test]
    fn test_name_roundtrip() {
        for network in Network::variants() {
            assert_eq!(network.name().parse::<Network>().unwrap(), *network);
        }
        assert!("solana".parse::<Network>().is_err());
    }

    #[test]
    fn test_unknown_chain_id() {
        assert_eq!(Network::from_chain_id(999_999), None);
    }

    #[test]
    fn test_serde_name_matches_display() {
        let json = serde_json::to_string(&Network::BaseSepolia).unwrap();
        assert_eq!(json, "\"base-sepolia\"");
    }
}
