//! Ports to the wallet and to chain RPC, plus their alloy-backed adapters.
//!
//! The orchestrator only ever talks to [`WalletPort`] and [`ChainRpcPort`]; both are
//! injected at construction so tests can run against in-memory fakes.

use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::sol_types::Eip712Domain;
use async_trait::async_trait;

use crate::error::DonationError;
use crate::donation::permit::PermitBatchTransferFrom;

pub mod evm;

/// A contract call to submit: target, calldata and attached native value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaTransaction {
    /// Chain the transaction must be sent on.
    pub chain_id: u64,
    /// Target contract address.
    pub to: Address,
    /// Transaction calldata (encoded function call).
    pub calldata: Bytes,
    /// Native value attached to the call.
    pub value: U256,
}

/// Final status of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// The donor's wallet.
#[async_trait]
pub trait WalletPort: Send + Sync {
    /// Connected account, `None` when no wallet is connected.
    fn address(&self) -> Option<Address>;

    /// Chain the wallet is currently bound to.
    async fn chain_id(&self) -> Result<u64, DonationError>;

    /// Account the wallet would sign with on its current chain.
    async fn account(&self) -> Result<Address, DonationError>;

    /// Ask the wallet to bind itself to `chain_id`.
    async fn switch_chain(&self, chain_id: u64) -> Result<(), DonationError>;

    /// Sign an EIP-712 batch permit. Refusal maps to [`DonationError::UserRejected`].
    async fn sign_typed_data(
        &self,
        domain: &Eip712Domain,
        permit: &PermitBatchTransferFrom,
    ) -> Result<Bytes, DonationError>;

    /// Submit a transaction without waiting for it to be mined.
    async fn send_transaction(&self, tx: MetaTransaction) -> Result<TxHash, DonationError>;

    /// Wait until `hash` has `confirmations` confirmations on `chain_id`.
    async fn await_receipt(
        &self,
        chain_id: u64,
        hash: TxHash,
        confirmations: u64,
    ) -> Result<ReceiptStatus, DonationError>;
}

/// Read-only chain access.
#[async_trait]
pub trait ChainRpcPort: Send + Sync {
    /// ERC-20 `allowance(owner, spender)` of `token` on `chain_id`.
    async fn allowance(
        &self,
        chain_id: u64,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, DonationError>;

    /// Permit2 `nonceBitmap(owner, word_pos)` on `chain_id`.
    async fn nonce_bitmap(
        &self,
        chain_id: u64,
        permit2: Address,
        owner: Address,
        word_pos: U256,
    ) -> Result<U256, DonationError>;
}
