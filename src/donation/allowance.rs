//! Allowance inspection against the Permit2 spender.

use alloy::primitives::{Address, U256};
use tracing::instrument;

use crate::chain::ChainRpcPort;
use crate::error::DonationError;
use crate::types::{Payment, TokenApprovalInfo};
use crate::validation::parse_token_amount;

/// Aggregated ERC-20 requirement for one token on one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequirement {
    pub chain_id: u64,
    pub token: Address,
    pub symbol: String,
    pub required: U256,
}

/// Sum ERC-20 payments per `(chain, token)`, in first-seen order. Native payments are skipped.
///
/// Approving the aggregate avoids one approval per payment of the same token.
pub fn aggregate_requirements(payments: &[Payment]) -> Result<Vec<TokenRequirement>, DonationError> {
    let mut requirements: Vec<TokenRequirement> = Vec::new();
    for payment in payments.iter().filter(|p| !p.token.is_native) {
        let amount = parse_token_amount(&payment.amount, payment.token.decimals).map_err(|e| {
            DonationError::InvalidAmount {
                project_id: payment.project_id.clone(),
                amount: payment.amount.clone(),
                reason: e.to_string(),
            }
        })?;
        match requirements
            .iter_mut()
            .find(|r| r.chain_id == payment.chain_id && r.token == payment.token.address)
        {
            Some(existing) => existing.required = existing.required.saturating_add(amount),
            None => requirements.push(TokenRequirement {
                chain_id: payment.chain_id,
                token: payment.token.address,
                symbol: payment.token.symbol.clone(),
                required: amount,
            }),
        }
    }
    Ok(requirements)
}

/// Read the current allowance of every aggregated requirement.
#[instrument(skip_all, fields(%owner, %spender))]
pub async fn inspect_allowances(
    rpc: &dyn ChainRpcPort,
    owner: Address,
    spender: Address,
    payments: &[Payment],
) -> Result<Vec<TokenApprovalInfo>, DonationError> {
    let requirements = aggregate_requirements(payments)?;
    let mut infos = Vec::with_capacity(requirements.len());

    for requirement in requirements {
        let current_allowance = rpc
            .allowance(requirement.chain_id, requirement.token, owner, spender)
            .await?;
        let needs_approval = current_allowance < requirement.required;
        tracing::debug!(
            chain_id = requirement.chain_id,
            token = %requirement.token,
            symbol = %requirement.symbol,
            required = %requirement.required,
            allowance = %current_allowance,
            needs_approval,
            "allowance checked"
        );
        infos.push(TokenApprovalInfo {
            token_address: requirement.token,
            token_symbol: requirement.symbol,
            required_amount: requirement.required,
            current_allowance,
            needs_approval,
            chain_id: requirement.chain_id,
        });
    }

    Ok(infos)
}
