//! Construction of the per-chain batch donation call.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;

use crate::contracts::IBatchDonations;
use crate::donation::permit::{PermitBatchTransferFrom, SignedPermit};
use crate::error::DonationError;
use crate::types::Payment;
use crate::validation::parse_token_amount;

impl From<PermitBatchTransferFrom> for IBatchDonations::PermitBatchTransferFrom {
    fn from(val: PermitBatchTransferFrom) -> Self {
        Self {
            permitted: val
                .permitted
                .into_iter()
                .map(|p| IBatchDonations::TokenPermissions {
                    token: p.token,
                    amount: p.amount,
                })
                .collect(),
            nonce: val.nonce,
            deadline: val.deadline,
        }
    }
}

/// Payments of one chain with their resolved recipients, in cart order.
#[derive(Debug, Clone)]
pub struct ChainBatch<'a> {
    pub chain_id: u64,
    pub entries: Vec<(&'a Payment, Address)>,
}

/// Split `payments` by chain, preserving the first-seen order of chains and of payments.
///
/// `recipients[i]` is the payout address of `payments[i]`.
pub fn group_by_chain<'a>(payments: &'a [Payment], recipients: &[Address]) -> Vec<ChainBatch<'a>> {
    let mut batches: Vec<ChainBatch<'a>> = Vec::new();
    for (payment, recipient) in payments.iter().zip(recipients.iter().copied()) {
        match batches.iter_mut().find(|b| b.chain_id == payment.chain_id) {
            Some(batch) => batch.entries.push((payment, recipient)),
            None => batches.push(ChainBatch {
                chain_id: payment.chain_id,
                entries: vec![(payment, recipient)],
            }),
        }
    }
    batches
}

/// Arguments of one batch call, before the permit is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedBatch {
    /// One entry per payment.
    pub donations: Vec<IBatchDonations::Donation>,
    /// Literal `(token, amount)` list of ERC-20 payments, one entry per payment.
    pub token_transfers: Vec<(Address, U256)>,
    /// Native value attached to the call.
    pub total_eth: U256,
}

impl PreparedBatch {
    pub fn needs_permit(&self) -> bool {
        !self.token_transfers.is_empty()
    }
}

/// Parse amounts and lay out the batch call arguments.
///
/// A negative or unparseable amount fails the whole chain.
pub fn prepare_batch(batch: &ChainBatch<'_>) -> Result<PreparedBatch, DonationError> {
    let mut donations = Vec::with_capacity(batch.entries.len());
    let mut token_transfers = Vec::new();
    let mut total_eth = U256::ZERO;

    for (payment, recipient) in &batch.entries {
        let amount = parse_token_amount(&payment.amount, payment.token.decimals).map_err(|e| {
            DonationError::InvalidAmount {
                project_id: payment.project_id.clone(),
                amount: payment.amount.clone(),
                reason: e.to_string(),
            }
        })?;

        if payment.token.is_native {
            total_eth = total_eth.checked_add(amount).ok_or_else(|| DonationError::InvalidAmount {
                project_id: payment.project_id.clone(),
                amount: payment.amount.clone(),
                reason: "native total overflows".to_string(),
            })?;
            donations.push(IBatchDonations::Donation {
                project: *recipient,
                ethAmount: amount,
                token: Address::ZERO,
                tokenAmount: U256::ZERO,
            });
        } else {
            token_transfers.push((payment.token.address, amount));
            donations.push(IBatchDonations::Donation {
                project: *recipient,
                ethAmount: U256::ZERO,
                token: payment.token.address,
                tokenAmount: amount,
            });
        }
    }

    Ok(PreparedBatch {
        donations,
        token_transfers,
        total_eth,
    })
}

/// Encode `batchDonateWithPermit` when a permit is given, `batchDonate` otherwise.
pub fn encode_batch_call(prepared: &PreparedBatch, permit: Option<SignedPermit>) -> Bytes {
    match permit {
        Some(signed) => IBatchDonations::batchDonateWithPermitCall {
            donations: prepared.donations.clone(),
            permit: signed.permit.into(),
            signature: signed.signature,
        }
        .abi_encode()
        .into(),
        None => IBatchDonations::batchDonateCall {
            donations: prepared.donations.clone(),
        }
        .abi_encode()
        .into(),
    }
}
