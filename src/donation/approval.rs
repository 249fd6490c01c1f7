//! Sequential ERC-20 approvals of the Permit2 spender.

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use tracing::instrument;

use crate::chain::{MetaTransaction, ReceiptStatus, WalletPort};
use crate::contracts::IERC20;
use crate::error::DonationError;
use crate::types::{ApprovalStatus, ApprovalTransaction, TokenApprovalInfo};

/// Percentage of `confirmed` approvals out of `total`, rounded down.
pub fn approval_progress(confirmed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    (confirmed.min(total) * 100 / total) as u8
}

/// Approve `spender` for the maximum amount of every token in `approvals` that needs it on
/// `chain_id`, one transaction at a time.
///
/// `on_progress` is called once with 0% before the first submission and after every
/// transaction settles. The first failure stops the loop and is returned; it is not retried.
#[instrument(skip_all, fields(chain_id, %spender))]
pub async fn execute_approval_transactions<F>(
    wallet: &dyn WalletPort,
    approvals: &[TokenApprovalInfo],
    chain_id: u64,
    spender: Address,
    confirmations: u64,
    mut on_progress: F,
) -> Result<Vec<ApprovalTransaction>, DonationError>
where
    F: FnMut(&[ApprovalTransaction], u8),
{
    if wallet.address().is_none() {
        return Err(DonationError::WalletUnavailable);
    }

    let pending: Vec<&TokenApprovalInfo> = approvals
        .iter()
        .filter(|a| a.needs_approval && a.chain_id == chain_id)
        .collect();
    if pending.is_empty() {
        return Ok(Vec::new());
    }

    let total = pending.len();
    let mut transactions: Vec<ApprovalTransaction> = pending
        .iter()
        .map(|a| ApprovalTransaction {
            token_address: a.token_address,
            token_symbol: a.token_symbol.clone(),
            hash: None,
            status: ApprovalStatus::Pending,
        })
        .collect();
    on_progress(&transactions, 0);

    // Max allowance: one approval per token lifetime instead of one per batch.
    let calldata = IERC20::approveCall {
        spender,
        amount: U256::MAX,
    }
    .abi_encode();

    for (index, info) in pending.iter().enumerate() {
        tracing::info!(
            chain_id,
            token = %info.token_address,
            symbol = %info.token_symbol,
            step = index + 1,
            total,
            "submitting approval"
        );
        let tx = MetaTransaction {
            chain_id,
            to: info.token_address,
            calldata: calldata.clone().into(),
            value: U256::ZERO,
        };

        let hash = match wallet.send_transaction(tx).await {
            Ok(hash) => hash,
            Err(e) => {
                tracing::warn!(chain_id, symbol = %info.token_symbol, error = %e, "approval submission failed");
                transactions[index].status = ApprovalStatus::Failed;
                on_progress(&transactions, approval_progress(index, total));
                return Err(e);
            }
        };
        transactions[index].hash = Some(hash);

        let outcome = wallet.await_receipt(chain_id, hash, confirmations).await;
        match outcome {
            Ok(ReceiptStatus::Success) => {
                transactions[index].status = ApprovalStatus::Confirmed;
                on_progress(&transactions, approval_progress(index + 1, total));
                tracing::info!(chain_id, %hash, symbol = %info.token_symbol, "approval confirmed");
            }
            Ok(ReceiptStatus::Reverted) => {
                tracing::warn!(chain_id, %hash, symbol = %info.token_symbol, "approval reverted");
                transactions[index].status = ApprovalStatus::Failed;
                on_progress(&transactions, approval_progress(index, total));
                return Err(DonationError::ApprovalFailed {
                    token_symbol: info.token_symbol.clone(),
                    hash: Some(hash),
                });
            }
            Err(e) => {
                tracing::warn!(chain_id, %hash, error = %e, "approval receipt failed");
                transactions[index].status = ApprovalStatus::Failed;
                on_progress(&transactions, approval_progress(index, total));
                return Err(e);
            }
        }
    }

    Ok(transactions)
}
