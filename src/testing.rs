//! In-memory fakes of the wallet and RPC ports.

use alloy::primitives::{Address, B256, Bytes, TxHash, U256, address, keccak256};
use alloy::sol_types::{Eip712Domain, SolStruct};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::chain::{ChainRpcPort, MetaTransaction, ReceiptStatus, WalletPort};
use crate::donation::permit::PermitBatchTransferFrom;
use crate::error::DonationError;
use crate::types::{Payment, Token};

pub const OWNER: Address = address!("0x00000000000000000000000000000000000000aa");
pub const DAI: Address = address!("0x6B175474E89094C44Da98b954EedeAC495271d0F");
pub const USDC: Address = address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");

/// Deterministic recipient address ending in `n`.
pub fn recipient(n: u8) -> Address {
    Address::with_last_byte(n)
}

pub fn native_payment(project_id: &str, amount: &str, chain_id: u64) -> Payment {
    Payment {
        project_id: project_id.to_string(),
        amount: amount.to_string(),
        token: Token {
            address: Address::ZERO,
            symbol: "ETH".to_string(),
            decimals: 18,
            chain_id,
            is_native: true,
        },
        chain_id,
    }
}

pub fn erc20_payment(project_id: &str, amount: &str, chain_id: u64) -> Payment {
    Payment {
        project_id: project_id.to_string(),
        amount: amount.to_string(),
        token: Token {
            address: DAI,
            symbol: "DAI".to_string(),
            decimals: 18,
            chain_id,
            is_native: false,
        },
        chain_id,
    }
}

#[derive(Debug, Default)]
struct WalletInner {
    address: Option<Address>,
    chain_id: u64,
    account: Option<Address>,
    refuse_switch: bool,
    reject_signatures: bool,
    reject_writes: bool,
    reverted: HashSet<usize>,
    switches: Vec<u64>,
    signature_requests: Vec<B256>,
    sent: Vec<MetaTransaction>,
    calls: usize,
}

/// Wallet that records every request and answers from configured behaviour.
///
/// Transaction `n` gets hash `keccak256(n)`; its receipt succeeds unless
/// [`FakeWallet::revert_transaction_number`] was called for `n`.
#[derive(Debug, Default)]
pub struct FakeWallet {
    inner: Mutex<WalletInner>,
}

impl FakeWallet {
    pub fn connected(address: Address, chain_id: u64) -> Self {
        Self {
            inner: Mutex::new(WalletInner {
                address: Some(address),
                chain_id,
                ..Default::default()
            }),
        }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WalletInner> {
        self.inner.lock().unwrap()
    }

    pub fn reject_signatures(&self) {
        self.lock().reject_signatures = true;
    }

    pub fn reject_writes(&self) {
        self.lock().reject_writes = true;
    }

    pub fn refuse_switch(&self) {
        self.lock().refuse_switch = true;
    }

    /// Make the wallet report a different signing account than the connected one.
    pub fn report_account(&self, account: Address) {
        self.lock().account = Some(account);
    }

    pub fn revert_transaction_number(&self, n: usize) {
        self.lock().reverted.insert(n);
    }

    pub fn sent_transactions(&self) -> Vec<MetaTransaction> {
        self.lock().sent.clone()
    }

    pub fn signature_requests(&self) -> Vec<B256> {
        self.lock().signature_requests.clone()
    }

    pub fn switches(&self) -> Vec<u64> {
        self.lock().switches.clone()
    }

    /// Number of async port calls made so far.
    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    fn tx_hash(n: usize) -> TxHash {
        keccak256((n as u64).to_be_bytes())
    }
}

#[async_trait]
impl WalletPort for FakeWallet {
    fn address(&self) -> Option<Address> {
        self.lock().address
    }

    async fn chain_id(&self) -> Result<u64, DonationError> {
        let mut inner = self.lock();
        inner.calls += 1;
        Ok(inner.chain_id)
    }

    async fn account(&self) -> Result<Address, DonationError> {
        let mut inner = self.lock();
        inner.calls += 1;
        inner
            .account
            .or(inner.address)
            .ok_or(DonationError::WalletNotConnected)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), DonationError> {
        let mut inner = self.lock();
        inner.calls += 1;
        inner.switches.push(chain_id);
        if inner.refuse_switch {
            return Err(DonationError::UserRejected("switch chain refused".into()));
        }
        inner.chain_id = chain_id;
        Ok(())
    }

    async fn sign_typed_data(
        &self,
        domain: &Eip712Domain,
        permit: &PermitBatchTransferFrom,
    ) -> Result<Bytes, DonationError> {
        let mut inner = self.lock();
        inner.calls += 1;
        inner
            .signature_requests
            .push(permit.eip712_signing_hash(domain));
        if inner.reject_signatures {
            return Err(DonationError::UserRejected("User denied message signature".into()));
        }
        Ok(Bytes::from(vec![0x1b; 65]))
    }

    async fn send_transaction(&self, tx: MetaTransaction) -> Result<TxHash, DonationError> {
        let mut inner = self.lock();
        inner.calls += 1;
        if inner.reject_writes {
            return Err(DonationError::UserRejected("User denied transaction signature".into()));
        }
        if tx.chain_id != inner.chain_id {
            return Err(DonationError::WalletChainMismatch {
                expected: tx.chain_id,
                actual: inner.chain_id,
            });
        }
        let hash = Self::tx_hash(inner.sent.len());
        inner.sent.push(tx);
        Ok(hash)
    }

    async fn await_receipt(
        &self,
        _chain_id: u64,
        hash: TxHash,
        _confirmations: u64,
    ) -> Result<ReceiptStatus, DonationError> {
        let mut inner = self.lock();
        inner.calls += 1;
        let index = (0..inner.sent.len())
            .find(|n| Self::tx_hash(*n) == hash)
            .ok_or_else(|| DonationError::Other(format!("unknown transaction {hash}")))?;
        if inner.reverted.contains(&index) {
            Ok(ReceiptStatus::Reverted)
        } else {
            Ok(ReceiptStatus::Success)
        }
    }
}

#[derive(Debug, Default)]
struct RpcInner {
    allowances: HashMap<(u64, Address), U256>,
    allowance_queries: Vec<(u64, Address, Address, Address)>,
    nonce_bitmaps: HashMap<U256, U256>,
    disabled: HashSet<u64>,
    calls: usize,
}

/// Chain reads served from maps. Unset allowances and bitmap words are zero.
#[derive(Debug, Default)]
pub struct FakeRpc {
    inner: Mutex<RpcInner>,
}

impl FakeRpc {
    fn lock(&self) -> std::sync::MutexGuard<'_, RpcInner> {
        self.inner.lock().unwrap()
    }

    pub fn set_allowance(&self, chain_id: u64, token: Address, allowance: U256) {
        self.lock().allowances.insert((chain_id, token), allowance);
    }

    pub fn set_nonce_bitmap(&self, word_pos: U256, bitmap: U256) {
        self.lock().nonce_bitmaps.insert(word_pos, bitmap);
    }

    /// Reads on `chain_id` fail as if no client were configured.
    pub fn disable_chain(&self, chain_id: u64) {
        self.lock().disabled.insert(chain_id);
    }

    pub fn allowance_queries(&self) -> Vec<(u64, Address, Address, Address)> {
        self.lock().allowance_queries.clone()
    }

    pub fn calls(&self) -> usize {
        self.lock().calls
    }
}

#[async_trait]
impl ChainRpcPort for FakeRpc {
    async fn allowance(
        &self,
        chain_id: u64,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, DonationError> {
        let mut inner = self.lock();
        inner.calls += 1;
        if inner.disabled.contains(&chain_id) {
            return Err(DonationError::ClientUnavailable(chain_id));
        }
        inner
            .allowance_queries
            .push((chain_id, token, owner, spender));
        Ok(inner
            .allowances
            .get(&(chain_id, token))
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn nonce_bitmap(
        &self,
        chain_id: u64,
        _permit2: Address,
        _owner: Address,
        word_pos: U256,
    ) -> Result<U256, DonationError> {
        let mut inner = self.lock();
        inner.calls += 1;
        if inner.disabled.contains(&chain_id) {
            return Err(DonationError::ClientUnavailable(chain_id));
        }
        Ok(inner
            .nonce_bitmaps
            .get(&word_pos)
            .copied()
            .unwrap_or(U256::ZERO))
    }
}
