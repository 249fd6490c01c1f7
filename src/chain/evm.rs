//! Alloy-backed adapters of the wallet and RPC ports.
//!
//! - [`LocalWallet`] signs with a local private key and submits through one filler-composed
//!   provider per chain. Nonces are served by [`PendingNonceManager`], one per chain.
//! - [`RpcClients`] serves read-only calls through lazily built, cached providers.
//!
//! Raw transport errors are categorised into [`DonationError`] here and nowhere else.

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, NonceManager,
    WalletFiller,
};
use alloy::providers::{Identity, PendingTransactionBuilder, Provider, ProviderBuilder, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::TransactionRequest;
use alloy::signers::Signer;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::{Eip712Domain, SolStruct};
use alloy::transports::layers::RetryBackoffLayer;
use alloy::hex;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{Instrument, instrument};
use url::Url;

use crate::chain::{ChainRpcPort, MetaTransaction, ReceiptStatus, WalletPort};
use crate::config::{DonationConfig, RpcConfig};
use crate::contracts::{IERC20, IPermit2};
use crate::donation::permit::PermitBatchTransferFrom;
use crate::error::DonationError;
use crate::network::Network;

/// Combined filler type for gas, blob gas, nonce, and chain ID.
type InnerFiller = JoinFill<
    GasFiller,
    JoinFill<BlobGasFiller, JoinFill<NonceFiller<PendingNonceManager>, ChainIdFiller>>,
>;

/// Provider used for submissions: fillers plus wallet signing over a [`RootProvider`].
pub type InnerProvider = FillProvider<
    JoinFill<JoinFill<Identity, InnerFiller>, WalletFiller<EthereumWallet>>,
    RootProvider,
>;

/// Where and how to reach one chain.
#[derive(Debug, Clone)]
pub struct ChainEndpoint {
    pub url: Url,
    pub receipt_timeout: Duration,
    pub poll_interval_ms: Option<u64>,
}

/// RPC endpoints of every reachable chain, keyed by chain id.
#[derive(Debug, Clone, Default)]
pub struct ChainEndpoints {
    rpc: RpcConfig,
    chains: HashMap<u64, ChainEndpoint>,
}

impl ChainEndpoints {
    /// Endpoints from the `[chains.<network>]` tables, falling back to `RPC_URL_<NETWORK>`
    /// environment variables (e.g. `RPC_URL_BASE_SEPOLIA`).
    pub fn from_config(config: &DonationConfig) -> Self {
        let mut chains = HashMap::new();
        for network in Network::variants() {
            let chain_config = config.chain(network.chain_id()).cloned().unwrap_or_default();
            let url = chain_config.rpc_url.clone().or_else(|| {
                let var = format!("RPC_URL_{}", network.name().to_uppercase().replace('-', "_"));
                let value = std::env::var(&var).ok()?;
                Url::parse(&value)
                    .inspect_err(|e| tracing::warn!(%var, error = %e, "ignoring malformed RPC URL"))
                    .ok()
            });
            let Some(url) = url else {
                continue;
            };
            chains.insert(
                network.chain_id(),
                ChainEndpoint {
                    url,
                    receipt_timeout: chain_config.receipt_timeout(&config.rpc),
                    poll_interval_ms: chain_config.poll_interval_ms,
                },
            );
        }
        Self {
            rpc: config.rpc.clone(),
            chains,
        }
    }

    pub fn with_endpoint(mut self, chain_id: u64, endpoint: ChainEndpoint) -> Self {
        self.chains.insert(chain_id, endpoint);
        self
    }

    pub fn get(&self, chain_id: u64) -> Result<&ChainEndpoint, DonationError> {
        self.chains
            .get(&chain_id)
            .ok_or(DonationError::ClientUnavailable(chain_id))
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.chains.keys().copied()
    }

    /// JSON-RPC client for `chain_id` with request timeout, rate-limit retries and poll interval.
    fn client(&self, chain_id: u64) -> Result<RpcClient, DonationError> {
        let endpoint = self.get(chain_id)?;
        let http_client = alloy::transports::http::reqwest::Client::builder()
            .timeout(Duration::from_secs(self.rpc.request_timeout_seconds))
            .build()
            .map_err(|e| DonationError::Network(format!("failed to build HTTP client: {e}")))?;
        let transport = alloy::transports::http::Http::with_client(http_client, endpoint.url.clone());

        let client = if self.rpc.max_retries > 0 {
            RpcClient::builder()
                .layer(RetryBackoffLayer::new(
                    self.rpc.max_retries,
                    self.rpc.initial_backoff_ms,
                    self.rpc.compute_units_per_second,
                ))
                .transport(transport, false)
        } else {
            RpcClient::new(transport, false)
        };

        Ok(match endpoint.poll_interval_ms {
            Some(poll_ms) => client.with_poll_interval(Duration::from_millis(poll_ms)),
            None => client,
        })
    }
}

/// Submission provider of one chain with the nonce manager its filler uses.
#[derive(Clone, Debug)]
struct ChainProvider {
    inner: InnerProvider,
    nonce_manager: PendingNonceManager,
}

/// Wallet backed by a local private key.
///
/// The wallet tracks the chain it is "connected" to, like a browser wallet does; transactions
/// for another chain are refused until [`WalletPort::switch_chain`] is called.
pub struct LocalWallet {
    signer: PrivateKeySigner,
    endpoints: Arc<ChainEndpoints>,
    providers: DashMap<u64, ChainProvider>,
    current_chain: AtomicU64,
}

impl LocalWallet {
    pub fn new(signer: PrivateKeySigner, endpoints: Arc<ChainEndpoints>, chain_id: u64) -> Self {
        tracing::info!(address = %signer.address(), chain_id, "wallet initialized");
        Self {
            signer,
            endpoints,
            providers: DashMap::new(),
            current_chain: AtomicU64::new(chain_id),
        }
    }

    /// Build from a hex private key (with or without `0x`).
    pub fn from_private_key(
        key: &str,
        endpoints: Arc<ChainEndpoints>,
        chain_id: u64,
    ) -> Result<Self, DonationError> {
        let signer: PrivateKeySigner = key
            .trim()
            .parse()
            .map_err(|_| DonationError::Other("invalid private key".to_string()))?;
        Ok(Self::new(signer, endpoints, chain_id))
    }

    fn provider(&self, chain_id: u64) -> Result<ChainProvider, DonationError> {
        if let Some(provider) = self.providers.get(&chain_id) {
            return Ok(provider.clone());
        }
        let client = self.endpoints.client(chain_id)?;
        let nonce_manager = PendingNonceManager::default();
        // Gas -> BlobGas -> Nonce -> ChainId
        let filler = JoinFill::new(
            GasFiller,
            JoinFill::new(
                BlobGasFiller::default(),
                JoinFill::new(NonceFiller::new(nonce_manager.clone()), ChainIdFiller::default()),
            ),
        );
        let inner = ProviderBuilder::default()
            .filler(filler)
            .wallet(EthereumWallet::from(self.signer.clone()))
            .connect_client(client);
        let provider = ChainProvider {
            inner,
            nonce_manager,
        };
        tracing::info!(chain_id, address = %self.signer.address(), "initialized submission provider");
        self.providers.insert(chain_id, provider.clone());
        Ok(provider)
    }
}

#[async_trait]
impl WalletPort for LocalWallet {
    fn address(&self) -> Option<Address> {
        Some(self.signer.address())
    }

    async fn chain_id(&self) -> Result<u64, DonationError> {
        Ok(self.current_chain.load(Ordering::SeqCst))
    }

    async fn account(&self) -> Result<Address, DonationError> {
        Ok(self.signer.address())
    }

    #[instrument(skip(self))]
    async fn switch_chain(&self, chain_id: u64) -> Result<(), DonationError> {
        let provider = self.provider(chain_id)?;
        let reported = provider
            .inner
            .get_chain_id()
            .instrument(tracing::info_span!("get_chain_id"))
            .await
            .map_err(|e| categorize_transport_error(e, "get_chain_id"))?;
        if reported != chain_id {
            tracing::error!(expected = chain_id, got = reported, "RPC endpoint serves another chain");
            return Err(DonationError::WalletChainMismatch {
                expected: chain_id,
                actual: reported,
            });
        }
        self.current_chain.store(chain_id, Ordering::SeqCst);
        tracing::info!(chain_id, "wallet switched chain");
        Ok(())
    }

    async fn sign_typed_data(
        &self,
        domain: &Eip712Domain,
        permit: &PermitBatchTransferFrom,
    ) -> Result<Bytes, DonationError> {
        let hash = permit.eip712_signing_hash(domain);
        let signature = self
            .signer
            .sign_hash(&hash)
            .await
            .map_err(|e| DonationError::Other(format!("signing failed: {e}")))?;
        Ok(Bytes::from(signature.as_bytes().to_vec()))
    }

    /// Submit `tx` from the local signer, retrying once with a corrected nonce when the node
    /// reports a nonce mismatch.
    async fn send_transaction(&self, tx: MetaTransaction) -> Result<TxHash, DonationError> {
        let current = self.current_chain.load(Ordering::SeqCst);
        if tx.chain_id != current {
            return Err(DonationError::WalletChainMismatch {
                expected: tx.chain_id,
                actual: current,
            });
        }
        let provider = self.provider(tx.chain_id)?;
        let from = self.signer.address();
        let mut txr = TransactionRequest::default()
            .with_to(tx.to)
            .with_from(from)
            .with_input(tx.calldata.clone());
        if !tx.value.is_zero() {
            txr = txr.with_value(tx.value);
        }

        const MAX_NONCE_RETRIES: u32 = 1;
        let mut nonce_retry_count = 0;
        let send_start = std::time::Instant::now();

        let pending_tx = loop {
            match provider.inner.send_transaction(txr.clone()).await {
                Ok(pending) => break pending,
                Err(e) => {
                    let error_str = format!("{e:?}");
                    let is_nonce_error = error_str.contains("nonce too low")
                        || error_str.contains("nonce too high");

                    if is_nonce_error && nonce_retry_count < MAX_NONCE_RETRIES {
                        if let Some(expected_nonce) = parse_expected_nonce_from_error(&error_str) {
                            tracing::warn!(
                                %from,
                                chain_id = tx.chain_id,
                                expected_nonce,
                                "nonce mismatch detected - correcting and retrying"
                            );
                            provider
                                .nonce_manager
                                .set_nonce(from, expected_nonce.saturating_sub(1))
                                .await;
                            nonce_retry_count += 1;
                            continue;
                        }
                    }

                    provider.nonce_manager.reset_nonce(from).await;
                    return Err(categorize_transport_error(error_str, "send_transaction"));
                }
            }
        };

        let hash = *pending_tx.tx_hash();
        tracing::info!(
            %from,
            chain_id = tx.chain_id,
            %hash,
            send_tx_ms = send_start.elapsed().as_millis() as u64,
            "Transaction submitted"
        );
        Ok(hash)
    }

    async fn await_receipt(
        &self,
        chain_id: u64,
        hash: TxHash,
        confirmations: u64,
    ) -> Result<ReceiptStatus, DonationError> {
        let provider = self.provider(chain_id)?;
        let timeout = self.endpoints.get(chain_id)?.receipt_timeout;
        let receipt_start = std::time::Instant::now();

        let watcher = PendingTransactionBuilder::new(provider.inner.root().clone(), hash)
            .with_required_confirmations(confirmations)
            .with_timeout(Some(timeout));

        match watcher.get_receipt().await {
            Ok(receipt) => {
                let status = if receipt.status() {
                    ReceiptStatus::Success
                } else {
                    ReceiptStatus::Reverted
                };
                tracing::info!(
                    chain_id,
                    %hash,
                    ?status,
                    receipt_wait_ms = receipt_start.elapsed().as_millis() as u64,
                    "Transaction mined"
                );
                Ok(status)
            }
            Err(e) => {
                tracing::warn!(
                    chain_id,
                    %hash,
                    receipt_wait_ms = receipt_start.elapsed().as_millis() as u64,
                    error = %e,
                    "Receipt fetch failed"
                );
                provider.nonce_manager.reset_nonce(self.signer.address()).await;
                Err(categorize_transport_error(e, "await_receipt"))
            }
        }
    }
}

/// Read-only providers, built on first use and cached per chain.
pub struct RpcClients {
    endpoints: Arc<ChainEndpoints>,
    providers: DashMap<u64, RootProvider>,
}

impl RpcClients {
    pub fn new(endpoints: Arc<ChainEndpoints>) -> Self {
        Self {
            endpoints,
            providers: DashMap::new(),
        }
    }

    fn provider(&self, chain_id: u64) -> Result<RootProvider, DonationError> {
        if let Some(provider) = self.providers.get(&chain_id) {
            return Ok(provider.clone());
        }
        let provider = RootProvider::new(self.endpoints.client(chain_id)?);
        tracing::debug!(chain_id, "initialized read provider");
        self.providers.insert(chain_id, provider.clone());
        Ok(provider)
    }
}

#[async_trait]
impl ChainRpcPort for RpcClients {
    async fn allowance(
        &self,
        chain_id: u64,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, DonationError> {
        let provider = self.provider(chain_id)?;
        IERC20::new(token, provider)
            .allowance(owner, spender)
            .call()
            .await
            .map_err(|e| categorize_transport_error(e, "allowance"))
    }

    async fn nonce_bitmap(
        &self,
        chain_id: u64,
        permit2: Address,
        owner: Address,
        word_pos: U256,
    ) -> Result<U256, DonationError> {
        let provider = self.provider(chain_id)?;
        IPermit2::new(permit2, provider)
            .nonceBitmap(owner, word_pos)
            .call()
            .await
            .map_err(|e| categorize_transport_error(e, "nonceBitmap"))
    }
}

/// A [`NonceManager`] that hands out consecutive nonces from a cache seeded with the
/// `pending` transaction count.
///
/// The cache entry of an address is reset after a failed submission or receipt, so the next
/// transaction re-reads the count from the node.
#[derive(Clone, Debug, Default)]
pub struct PendingNonceManager {
    nonces: Arc<DashMap<Address, Arc<Mutex<u64>>>>,
}

#[async_trait]
impl NonceManager for PendingNonceManager {
    async fn get_next_nonce<P, N>(
        &self,
        provider: &P,
        address: Address,
    ) -> alloy::transports::TransportResult<u64>
    where
        P: Provider<N>,
        N: alloy::network::Network,
    {
        // `u64::MAX` marks a nonce that has not been fetched yet.
        const NONE: u64 = u64::MAX;

        // Don't hold the dashmap lock across the await below.
        let nonce = {
            let rm = self
                .nonces
                .entry(address)
                .or_insert_with(|| Arc::new(Mutex::new(NONE)));
            Arc::clone(rm.value())
        };

        let mut nonce = nonce.lock().await;
        let new_nonce = if *nonce == NONE {
            match provider.get_transaction_count(address).pending().await {
                Ok(pending_nonce) => {
                    tracing::debug!(%address, nonce = pending_nonce, "nonce fetched");
                    pending_nonce
                }
                Err(e) => {
                    tracing::warn!(
                        %address,
                        error = ?e,
                        "pending block tag not supported by RPC, falling back to latest"
                    );
                    provider.get_transaction_count(address).latest().await?
                }
            }
        } else {
            *nonce + 1
        };
        *nonce = new_nonce;
        tracing::debug!(%address, allocated_nonce = new_nonce, "nonce allocated");
        Ok(new_nonce)
    }
}

impl PendingNonceManager {
    /// Forget the cached nonce of `address`; the next allocation queries the node.
    pub async fn reset_nonce(&self, address: Address) {
        if let Some(nonce_lock) = self.nonces.get(&address) {
            let mut nonce = nonce_lock.lock().await;
            *nonce = u64::MAX;
            tracing::debug!(%address, "reset nonce cache");
        }
    }

    /// Overwrite the cached nonce, e.g. with the value a node reported in an error.
    pub async fn set_nonce(&self, address: Address, nonce: u64) {
        let lock = self
            .nonces
            .entry(address)
            .or_insert_with(|| Arc::new(Mutex::new(u64::MAX)));
        let mut cached = lock.value().lock().await;
        *cached = nonce;
        tracing::info!(%address, nonce, "nonce cache set from RPC error");
    }
}

/// Parse the "next nonce" out of messages like `nonce too low: next nonce 1210, tx nonce 1209`.
fn parse_expected_nonce_from_error(msg: &str) -> Option<u64> {
    msg.find("next nonce ")
        .map(|i| &msg[i + 11..])
        .and_then(|s| s.split(|c: char| !c.is_ascii_digit()).next())
        .and_then(|n| n.parse().ok())
}

/// Decode revert data into a readable reason.
///
/// Handles `Error(string)` (0x08c379a0) and `Panic(uint256)` (0x4e487b71); other selectors
/// are reported as `UnknownError(0x...)`.
fn decode_revert_reason(data: &str) -> Option<String> {
    let hex_data = data.strip_prefix("0x").unwrap_or(data);
    let bytes = hex::decode(hex_data).ok()?;

    if bytes.len() < 4 {
        return None;
    }

    if bytes[0..4] == [0x08, 0xc3, 0x79, 0xa0] && bytes.len() >= 68 {
        // offset (32) + length (32) + string data
        let len = bytes[36..68]
            .iter()
            .fold(0usize, |acc, &b| acc.saturating_mul(256).saturating_add(b as usize));
        if len <= 1024 && bytes.len() >= 68 + len {
            return String::from_utf8(bytes[68..68 + len].to_vec()).ok();
        }
    }

    if bytes[0..4] == [0x4e, 0x48, 0x7b, 0x71] && bytes.len() >= 36 {
        return Some(format!("Panic(0x{:02x})", bytes[35]));
    }

    Some(format!("UnknownError(0x{})", hex::encode(&bytes[0..4])))
}

/// Find `data: Some(RawValue("0x..."))` in an error's debug output and decode it.
fn extract_revert_data(err_str: &str) -> Option<String> {
    for (marker, closing) in [
        ("data: Some(RawValue(\"", "\""),
        (r#"data: Some(RawValue(\""#, r#"\""#),
    ] {
        if let Some(idx) = err_str.find(marker) {
            let start = idx + marker.len();
            if let Some(end) = err_str[start..].find(closing) {
                if let Some(decoded) = decode_revert_reason(&err_str[start..start + end]) {
                    return Some(decoded);
                }
            }
        }
    }
    None
}

/// Turn a transport or RPC error into a [`DonationError`].
///
/// Order matters: revert data first, then wallet refusal (EIP-1193 code 4001), funds,
/// and connection failures.
fn categorize_transport_error(e: impl std::fmt::Debug, context: &str) -> DonationError {
    let err_str = format!("{e:?}");
    let lower = err_str.to_lowercase();

    if let Some(revert_reason) = extract_revert_data(&err_str) {
        tracing::error!("{context}: contract reverted: {revert_reason}");
        return DonationError::ContractRevert(revert_reason);
    }

    if lower.contains("code: 4001") || lower.contains("user rejected") || lower.contains("user denied")
    {
        tracing::warn!("{context}: request rejected: {err_str}");
        DonationError::UserRejected(format!("{context} rejected"))
    } else if lower.contains("insufficient funds") {
        tracing::warn!("{context}: insufficient funds: {err_str}");
        DonationError::InsufficientFunds(format!("{context}: insufficient funds for gas * price + value"))
    } else if lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("no route to host")
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("dns error")
    {
        tracing::error!("{context}: RPC connection error: {err_str}");
        DonationError::Network(format!("{context}: connection error"))
    } else if lower.contains("execution reverted") {
        tracing::error!("{context}: contract reverted without data: {err_str}");
        DonationError::ContractRevert("execution reverted".to_string())
    } else {
        tracing::error!("{context}: call failed: {err_str}");
        DonationError::Other(format!("{context} failed"))
    }
}
