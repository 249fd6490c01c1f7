//! Configuration file parsing for the donation engine.
//!
//! Settings are read from a TOML file (`CONFIG_FILE`, default `donations.toml`).
//! A missing file yields the defaults; a malformed one is an error.
//!
//! ```toml
//! confirmations = 1
//! permit_nonce = "bitmap"
//!
//! [chains.optimism]
//! rpc_url = "https://mainnet.optimism.io"
//! batch_contract = "0x..."
//! confirmations = 2
//! ```

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::network::{Network, PERMIT2_ADDRESS};

/// Complete donation engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DonationConfig {
    /// Permit2 deployment used as approval spender and EIP-712 verifying contract.
    pub permit2_address: Address,
    /// Lifetime of a signed batch permit.
    pub permit_deadline_seconds: u64,
    /// Confirmations to wait for on every transaction, unless a chain overrides it.
    pub confirmations: u64,
    /// Backoff before the single wallet re-synchronisation attempt.
    pub chain_sync_backoff_ms: u64,
    /// How permit nonces are chosen.
    pub permit_nonce: PermitNonce,
    pub gas: GasEstimateConfig,
    pub rpc: RpcConfig,
    /// Base URL of the grants indexer used to resolve project payout addresses.
    pub indexer_url: Option<Url>,
    /// Per-network settings. Key is the network name (e.g. "optimism", "base").
    pub chains: HashMap<String, ChainConfig>,
}

impl Default for DonationConfig {
    fn default() -> Self {
        Self {
            permit2_address: PERMIT2_ADDRESS,
            permit_deadline_seconds: 3600, // 1 hour
            confirmations: 1,
            chain_sync_backoff_ms: 2000,
            permit_nonce: PermitNonce::default(),
            gas: GasEstimateConfig::default(),
            rpc: RpcConfig::default(),
            indexer_url: None,
            chains: HashMap::new(),
        }
    }
}

impl DonationConfig {
    /// Load configuration from a TOML file.
    ///
    /// If the file doesn't exist, returns the default configuration.
    /// If the file exists but is malformed, returns an error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()
    }

    /// Load configuration from environment variable CONFIG_FILE or default path.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "donations.toml".to_string());
        Self::from_file(config_path)
    }

    /// Settings of the chain with the given id, if it is a known and configured network.
    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        let network = Network::from_chain_id(chain_id)?;
        self.chains.get(network.name())
    }

    /// Batch Donations contract per chain id, for every configured network that has one.
    ///
    /// Keys that are not known network names are skipped with a warning.
    pub fn batch_contracts(&self) -> HashMap<u64, Address> {
        self.chains
            .iter()
            .filter_map(|(name, chain)| {
                let network = match name.parse::<Network>() {
                    Ok(network) => network,
                    Err(e) => {
                        tracing::warn!(error = %e, "ignoring chain configuration");
                        return None;
                    }
                };
                chain.batch_contract.map(|addr| (network.chain_id(), addr))
            })
            .collect()
    }

    /// Effective confirmation count for a chain.
    pub fn confirmations_for(&self, chain_id: u64) -> u64 {
        self.chain(chain_id)
            .and_then(|c| c.confirmations)
            .unwrap_or(self.confirmations)
    }
}

/// Strategy for choosing the nonce of a batch permit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PermitNonce {
    /// Random 256-bit value generated client-side.
    #[default]
    Random,
    /// First unused bit of the owner's Permit2 nonce bitmap, read on-chain.
    Bitmap,
}

/// Static gas figures used for the pre-checkout estimate. No RPC call is made.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct GasEstimateConfig {
    pub native_transfer: u64,
    pub erc20_transfer: u64,
    /// Fixed cost of one batch call, charged once per distinct chain.
    pub per_chain_overhead: u64,
}

impl Default for GasEstimateConfig {
    fn default() -> Self {
        Self {
            native_transfer: 21_000,
            erc20_transfer: 95_000,
            per_chain_overhead: 120_000,
        }
    }
}

/// RPC client settings shared by every chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Timeout for individual RPC requests in seconds.
    pub request_timeout_seconds: u64,
    /// Retries for rate-limited requests (0 disables the retry layer).
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub compute_units_per_second: u64,
    /// Receipt wait timeout unless a chain overrides it.
    pub receipt_timeout_seconds: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
            max_retries: 3,
            initial_backoff_ms: 500,
            compute_units_per_second: 300,
            receipt_timeout_seconds: 120,
        }
    }
}

/// Chain-specific configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChainConfig {
    /// JSON-RPC endpoint for reads and transaction submission.
    pub rpc_url: Option<Url>,
    /// Deployed Batch Donations contract. Chains without one cannot receive donations.
    pub batch_contract: Option<Address>,
    /// Confirmation count override.
    #[serde(default)]
    pub confirmations: Option<u64>,
    /// Receipt wait timeout override in seconds.
    #[serde(default)]
    pub receipt_timeout_seconds: Option<u64>,
    /// Override the receipt poll interval in milliseconds.
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

impl ChainConfig {
    pub fn receipt_timeout(&self, rpc: &RpcConfig) -> Duration {
        Duration::from_secs(
            self.receipt_timeout_seconds
                .unwrap_or(rpc.receipt_timeout_seconds),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn test_default_config() {
        let config = DonationConfig::default();
        assert_eq!(config.permit2_address, PERMIT2_ADDRESS);
        assert_eq!(config.permit_deadline_seconds, 3600);
        assert_eq!(config.chain_sync_backoff_ms, 2000);
        assert_eq!(config.permit_nonce, PermitNonce::Random);
        assert_eq!(config.gas.native_transfer, 21_000);
        assert!(config.chains.is_empty());
    }

    #[test]
    fn test_parse_chain_table() {
        let config_str = r#"
confirmations = 2
permit_nonce = "bitmap"

[chains.optimism]
rpc_url = "https://mainnet.optimism.io"
batch_contract = "0x1111111111111111111111111111111111111111"
confirmations = 3

[chains.base]
rpc_url = "https://mainnet.base.org"
"#;

        let config: DonationConfig = toml::from_str(config_str).unwrap();
        assert_eq!(config.permit_nonce, PermitNonce::Bitmap);
        assert_eq!(config.confirmations_for(10), 3);
        assert_eq!(config.confirmations_for(8453), 2);
        assert_eq!(config.confirmations_for(999), 2);

        let contracts = config.batch_contracts();
        assert_eq!(contracts.len(), 1);
        assert_eq!(
            contracts.get(&10),
            Some(&address!("0x1111111111111111111111111111111111111111"))
        );
    }

    #[test]
    fn test_unknown_network_key_is_skipped() {
        let config_str = r#"
[chains.not-a-chain]
batch_contract = "0x1111111111111111111111111111111111111111"
"#;
        let config: DonationConfig = toml::from_str(config_str).unwrap();
        assert!(config.batch_contracts().is_empty());
    }

    #[test]
    fn test_receipt_timeout_override() {
        let config_str = r#"
[rpc]
receipt_timeout_seconds = 60

[chains.arbitrum]
receipt_timeout_seconds = 20
"#;
        let config: DonationConfig = toml::from_str(config_str).unwrap();
        let arbitrum = config.chain(42161).unwrap();
        assert_eq!(arbitrum.receipt_timeout(&config.rpc), Duration::from_secs(20));
        let default_chain = ChainConfig::default();
        assert_eq!(
            default_chain.receipt_timeout(&config.rpc),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = DonationConfig::from_file("/nonexistent/donations.toml").unwrap();
        assert_eq!(config.confirmations, 1);
    }
}
