//! Donation data model shared by the orchestrator, the validators and the UI layer.
//!
//! All types serialize to camelCase JSON so snapshots can be handed to a frontend as-is.

use alloy::primitives::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Identifier of a funded project, as issued by the grants indexer.
pub type ProjectId = String;

/// A token a donation is paid in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    /// Contract address. Ignored for native assets (conventionally the zero address).
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
    pub chain_id: u64,
    /// Native asset of the chain (ETH, POL, ...). Native payments never need an approval.
    #[serde(default)]
    pub is_native: bool,
}

impl Token {
    /// Key used to look up wallet balances: `"{symbol}-{chain_id}"`.
    pub fn balance_key(&self) -> String {
        format!("{}-{}", self.symbol, self.chain_id)
    }
}

/// One donation intent produced by the checkout flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub project_id: ProjectId,
    /// Human-readable decimal amount, e.g. `"12.5"`.
    pub amount: String,
    pub token: Token,
    pub chain_id: u64,
}

/// Allowance snapshot for one token on one chain, aggregated over every payment using it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenApprovalInfo {
    pub token_address: Address,
    pub token_symbol: String,
    /// Sum of all payments in this token on this chain, in the token's smallest unit.
    pub required_amount: U256,
    pub current_allowance: U256,
    pub needs_approval: bool,
    pub chain_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Confirmed,
    Failed,
}

/// Outcome of one approval transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalTransaction {
    pub token_address: Address,
    pub token_symbol: String,
    /// Absent when the wallet refused to submit the transaction at all.
    pub hash: Option<TxHash>,
    pub status: ApprovalStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Success,
    Error,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }
}

/// Per-project view of a batch donation transaction.
///
/// Several results share one `hash` when a single batch call funds several projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub hash: TxHash,
    pub project_id: ProjectId,
    pub chain_id: u64,
    pub status: TransferStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransferResult {
    pub fn pending(hash: TxHash, project_id: ProjectId, chain_id: u64) -> Self {
        Self {
            hash,
            project_id,
            chain_id,
            status: TransferStatus::Pending,
            error: None,
        }
    }

    /// Moves a pending result to its terminal status.
    ///
    /// Returns `false` and leaves the result untouched if it is already terminal.
    pub fn resolve(&mut self, outcome: Result<(), String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        match outcome {
            Ok(()) => self.status = TransferStatus::Success,
            Err(message) => {
                self.status = TransferStatus::Error;
                self.error = Some(message);
            }
        }
        true
    }
}

/// Discrete stage of a donation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Checking,
    Approving,
    Donating,
    Completed,
    Error,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Checking => write!(f, "checking"),
            Phase::Approving => write!(f, "approving"),
            Phase::Donating => write!(f, "donating"),
            Phase::Completed => write!(f, "completed"),
            Phase::Error => write!(f, "error"),
        }
    }
}

/// Snapshot of the donation state machine. Replaced wholesale on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationExecutionState {
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approvals: Option<Vec<ApprovalTransaction>>,
    /// 0..=100, only set while `phase == Approving`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfers: Option<Vec<TransferResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DonationExecutionState {
    pub fn checking() -> Self {
        Self::bare(Phase::Checking)
    }

    pub fn approving(approvals: Vec<ApprovalTransaction>, progress: u8) -> Self {
        Self {
            approvals: Some(approvals),
            approval_progress: Some(progress.min(100)),
            ..Self::bare(Phase::Approving)
        }
    }

    pub fn donating(transfers: Vec<TransferResult>) -> Self {
        Self {
            transfers: Some(transfers),
            ..Self::bare(Phase::Donating)
        }
    }

    pub fn completed(transfers: Vec<TransferResult>) -> Self {
        Self {
            transfers: Some(transfers),
            ..Self::bare(Phase::Completed)
        }
    }

    pub fn failed(message: String, transfers: Vec<TransferResult>) -> Self {
        Self {
            transfers: (!transfers.is_empty()).then_some(transfers),
            error: Some(message),
            ..Self::bare(Phase::Error)
        }
    }

    fn bare(phase: Phase) -> Self {
        Self {
            phase,
            approvals: None,
            approval_progress: None,
            transfers: None,
            error: None,
        }
    }
}

impl Default for DonationExecutionState {
    fn default() -> Self {
        Self::checking()
    }
}
