//! Error taxonomy of the donation engine.
//!
//! Every failure is a [`DonationError`] variant. Raw RPC and wallet errors are turned into
//! variants once, at the adapter boundary (see [`crate::chain::evm`]); from there on the
//! orchestrator only deals with structured values. [`DonationError::kind`] gives the coarse
//! classification a UI needs and [`DonationError::user_message`] the text to show.

use alloy::primitives::{Address, TxHash};
use serde::{Deserialize, Serialize};

use crate::types::ProjectId;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DonationError {
    #[error("Wallet not connected")]
    WalletNotConnected,
    #[error("Wallet client unavailable")]
    WalletUnavailable,
    #[error("No RPC client available for chain {0}")]
    ClientUnavailable(u64),
    #[error("Missing payout address for project {project_id} on chain {chain_id}")]
    MissingPayoutAddress { project_id: ProjectId, chain_id: u64 },
    #[error("Invalid payout address {address:?} for project {project_id}")]
    InvalidPayoutAddress { project_id: ProjectId, address: String },
    #[error("Payment for project {project_id} targets chain {chain_id} but its token lives on chain {token_chain_id}")]
    ChainIdMismatch {
        project_id: ProjectId,
        chain_id: u64,
        token_chain_id: u64,
    },
    #[error("Batch donations contract not deployed on chain {0}")]
    ContractNotDeployed(u64),
    #[error("Chain {0} is not supported")]
    UnsupportedChain(u64),
    #[error("Wallet is connected to chain {actual}, expected chain {expected}")]
    WalletChainMismatch { expected: u64, actual: u64 },
    #[error("Wallet account {actual} does not match connected account {expected}")]
    AccountMismatch { expected: Address, actual: Address },
    #[error("Invalid amount {amount:?} for project {project_id}: {reason}")]
    InvalidAmount {
        project_id: ProjectId,
        amount: String,
        reason: String,
    },
    #[error("Approval for {token_symbol} failed")]
    ApprovalFailed {
        token_symbol: String,
        hash: Option<TxHash>,
    },
    #[error("User rejected the request: {0}")]
    UserRejected(String),
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("Contract reverted: {0}")]
    ContractRevert(String),
    #[error("Transaction {0} reverted")]
    TransactionReverted(TxHash),
    #[error("Network error: {0}")]
    Network(String),
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of a [`DonationError`] for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    UserRejected,
    InsufficientFunds,
    ContractRevert,
    NetworkError,
    Unknown,
}

impl DonationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DonationError::UserRejected(_) => ErrorKind::UserRejected,
            DonationError::InsufficientFunds(_) => ErrorKind::InsufficientFunds,
            DonationError::ContractRevert(_) | DonationError::TransactionReverted(_) => {
                ErrorKind::ContractRevert
            }
            DonationError::Network(_) | DonationError::ClientUnavailable(_) => {
                ErrorKind::NetworkError
            }
            DonationError::ApprovalFailed { .. }
            | DonationError::WalletNotConnected
            | DonationError::WalletUnavailable
            | DonationError::MissingPayoutAddress { .. }
            | DonationError::InvalidPayoutAddress { .. }
            | DonationError::ChainIdMismatch { .. }
            | DonationError::ContractNotDeployed(_)
            | DonationError::UnsupportedChain(_)
            | DonationError::WalletChainMismatch { .. }
            | DonationError::AccountMismatch { .. }
            | DonationError::InvalidAmount { .. }
            | DonationError::Other(_) => ErrorKind::Unknown,
        }
    }

    /// Message shown to the donor. Precondition errors keep their own wording.
    pub fn user_message(&self) -> String {
        match self {
            DonationError::UserRejected(_) => "Transaction was rejected in your wallet".to_string(),
            DonationError::InsufficientFunds(_) => {
                "Insufficient funds to cover the donation and network fees".to_string()
            }
            DonationError::ContractRevert(reason) => {
                format!("The donation transaction was reverted: {reason}")
            }
            DonationError::TransactionReverted(hash) => {
                format!("The donation transaction {hash} was reverted on-chain")
            }
            DonationError::Network(_) | DonationError::ClientUnavailable(_) => {
                "Network error, please check your connection and try again".to_string()
            }
            DonationError::ApprovalFailed { token_symbol, .. } => {
                format!("Token approval for {token_symbol} failed, no donations were sent")
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            DonationError::UserRejected("denied".into()).kind(),
            ErrorKind::UserRejected
        );
        assert_eq!(
            DonationError::InsufficientFunds("gas".into()).kind(),
            ErrorKind::InsufficientFunds
        );
        assert_eq!(
            DonationError::TransactionReverted(TxHash::ZERO).kind(),
            ErrorKind::ContractRevert
        );
        assert_eq!(
            DonationError::Network("dns".into()).kind(),
            ErrorKind::NetworkError
        );
        assert_eq!(DonationError::WalletNotConnected.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_precondition_messages() {
        let missing = DonationError::MissingPayoutAddress {
            project_id: "p1".into(),
            chain_id: 10,
        };
        assert!(missing.user_message().contains("Missing payout address"));

        let invalid = DonationError::InvalidPayoutAddress {
            project_id: "p1".into(),
            address: "0x123".into(),
        };
        assert!(invalid.user_message().contains("Invalid payout address"));

        let undeployed = DonationError::ContractNotDeployed(999);
        assert!(
            undeployed
                .to_string()
                .contains("Batch donations contract not deployed")
        );
    }

    #[test]
    fn test_revert_message_carries_reason() {
        let err = DonationError::ContractRevert("Invalid project".into());
        assert_eq!(
            err.user_message(),
            "The donation transaction was reverted: Invalid project"
        );
    }
}
