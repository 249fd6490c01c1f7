//! Multi-chain batch donation orchestrator.
//!
//! A run goes `checking -> approving -> donating -> completed | error`. Chains and the
//! approvals within them are processed strictly one after the other, so the donor is never
//! asked to sign two things at once. Chains that completed before a failure stay final:
//! callers reconcile from the published [`TransferResult`] list.

pub mod allowance;
pub mod approval;
pub mod permit;
pub mod state;
pub mod transfer;

use alloy::primitives::Address;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::instrument;

use crate::chain::{ChainRpcPort, MetaTransaction, ReceiptStatus, WalletPort};
use crate::config::{DonationConfig, PermitNonce};
use crate::error::DonationError;
use crate::network::{Network, PERMIT2_ADDRESS};
use crate::recipients::{RecipientResolver, TransferHook};
use crate::types::{
    ApprovalTransaction, DonationExecutionState, Payment, TokenApprovalInfo, TransferResult,
};
use crate::validation::validate_payout_address;

use permit::PermitSigner;
use state::ExecutionCells;
use transfer::{ChainBatch, encode_batch_call, group_by_chain, prepare_batch};

/// Tunables of a [`DonationExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub permit2: Address,
    pub permit_deadline_seconds: u64,
    pub permit_nonce: PermitNonce,
    pub default_confirmations: u64,
    /// Per-chain overrides of `default_confirmations`.
    pub confirmations: HashMap<u64, u64>,
    pub chain_sync_backoff: Duration,
    /// Batch Donations contract per chain id.
    pub batch_contracts: HashMap<u64, Address>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            permit2: PERMIT2_ADDRESS,
            permit_deadline_seconds: 3600,
            permit_nonce: PermitNonce::default(),
            default_confirmations: 1,
            confirmations: HashMap::new(),
            chain_sync_backoff: Duration::from_secs(2),
            batch_contracts: HashMap::new(),
        }
    }
}

impl ExecutorSettings {
    pub fn from_config(config: &DonationConfig) -> Self {
        let confirmations = Network::variants()
            .iter()
            .map(|n| n.chain_id())
            .filter(|id| config.chain(*id).and_then(|c| c.confirmations).is_some())
            .map(|id| (id, config.confirmations_for(id)))
            .collect();
        Self {
            permit2: config.permit2_address,
            permit_deadline_seconds: config.permit_deadline_seconds,
            permit_nonce: config.permit_nonce,
            default_confirmations: config.confirmations,
            confirmations,
            chain_sync_backoff: Duration::from_millis(config.chain_sync_backoff_ms),
            batch_contracts: config.batch_contracts(),
        }
    }

    pub fn with_batch_contract(mut self, chain_id: u64, contract: Address) -> Self {
        self.batch_contracts.insert(chain_id, contract);
        self
    }

    fn confirmations_for(&self, chain_id: u64) -> u64 {
        self.confirmations
            .get(&chain_id)
            .copied()
            .unwrap_or(self.default_confirmations)
    }
}

/// Runs batch donations for one connected wallet and publishes their progress.
pub struct DonationExecutor {
    wallet: Arc<dyn WalletPort>,
    rpc: Arc<dyn ChainRpcPort>,
    settings: ExecutorSettings,
    cells: ExecutionCells,
}

impl DonationExecutor {
    pub fn new(
        wallet: Arc<dyn WalletPort>,
        rpc: Arc<dyn ChainRpcPort>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            wallet,
            rpc,
            settings,
            cells: ExecutionCells::default(),
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn state(&self) -> DonationExecutionState {
        self.cells.state()
    }

    pub fn approval_info(&self) -> Vec<TokenApprovalInfo> {
        self.cells.approval_info()
    }

    pub fn transfers(&self) -> Vec<TransferResult> {
        self.cells.transfers()
    }

    pub fn subscribe(&self) -> watch::Receiver<DonationExecutionState> {
        self.cells.subscribe()
    }

    pub fn subscribe_transfers(&self) -> watch::Receiver<Vec<TransferResult>> {
        self.cells.subscribe_transfers()
    }

    pub fn is_executing(&self) -> bool {
        self.cells.is_executing()
    }

    /// Which ERC-20 tokens of `payments` still need a Permit2 approval.
    pub async fn check_approvals(
        &self,
        payments: &[Payment],
    ) -> Result<Vec<TokenApprovalInfo>, DonationError> {
        let owner = self
            .wallet
            .address()
            .ok_or(DonationError::WalletNotConnected)?;
        let infos =
            allowance::inspect_allowances(self.rpc.as_ref(), owner, self.settings.permit2, payments)
                .await?;
        self.cells.publish_approval_info(infos.clone());
        Ok(infos)
    }

    /// Submit the approvals of `chain_id` that are still needed, publishing `approving`
    /// snapshots as they settle.
    pub async fn execute_approval_transactions<F>(
        &self,
        approvals: &[TokenApprovalInfo],
        chain_id: u64,
        mut on_progress: F,
    ) -> Result<Vec<ApprovalTransaction>, DonationError>
    where
        F: FnMut(&[ApprovalTransaction], u8),
    {
        approval::execute_approval_transactions(
            self.wallet.as_ref(),
            approvals,
            chain_id,
            self.settings.permit2,
            self.settings.confirmations_for(chain_id),
            |transactions, progress| {
                self.cells
                    .publish(DonationExecutionState::approving(transactions.to_vec(), progress));
                on_progress(transactions, progress);
            },
        )
        .await
    }

    /// Donate `payments`, one batch call per chain.
    ///
    /// Returns the transfer results of every chain on success. On failure the `error` phase
    /// is published with the donor-facing message before the error is returned.
    #[instrument(skip_all, fields(payments = payments.len()))]
    pub async fn execute_donations(
        &self,
        payments: &[Payment],
        resolver: &dyn RecipientResolver,
        before_transfer: Option<&dyn TransferHook>,
    ) -> Result<Vec<TransferResult>, DonationError> {
        let Some(_guard) = self.cells.begin() else {
            return Err(DonationError::Other(
                "A donation is already in progress".to_string(),
            ));
        };
        self.cells.publish_transfers(Vec::new());

        match self.run(payments, resolver, before_transfer).await {
            Ok(transfers) => {
                tracing::info!(transfers = transfers.len(), "donation run completed");
                self.cells
                    .publish(DonationExecutionState::completed(transfers.clone()));
                Ok(transfers)
            }
            Err(e) => {
                tracing::error!(error = %e, kind = ?e.kind(), "donation run failed");
                self.cells.publish(DonationExecutionState::failed(
                    e.user_message(),
                    self.cells.transfers(),
                ));
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        payments: &[Payment],
        resolver: &dyn RecipientResolver,
        before_transfer: Option<&dyn TransferHook>,
    ) -> Result<Vec<TransferResult>, DonationError> {
        let owner = self
            .wallet
            .address()
            .ok_or(DonationError::WalletNotConnected)?;
        let recipients = resolve_recipients(payments, resolver)?;
        check_chains(payments, &self.settings.batch_contracts)?;

        self.cells.publish(DonationExecutionState::checking());
        let approvals = self.check_approvals(payments).await?;

        let mut approval_chains: Vec<u64> = Vec::new();
        for info in approvals.iter().filter(|a| a.needs_approval) {
            if !approval_chains.contains(&info.chain_id) {
                approval_chains.push(info.chain_id);
            }
        }
        for chain_id in approval_chains {
            self.prepare_chain(chain_id, payments, before_transfer, owner)
                .await?;
            self.execute_approval_transactions(&approvals, chain_id, |_, _| {})
                .await?;
        }

        let mut transfers: Vec<TransferResult> = Vec::new();
        self.cells
            .publish(DonationExecutionState::donating(transfers.clone()));

        for batch in group_by_chain(payments, &recipients) {
            self.donate_on_chain(&batch, payments, before_transfer, owner, &mut transfers)
                .await?;
        }
        Ok(transfers)
    }

    #[instrument(skip_all, fields(chain_id = batch.chain_id, payments = batch.entries.len()))]
    async fn donate_on_chain(
        &self,
        batch: &ChainBatch<'_>,
        payments: &[Payment],
        before_transfer: Option<&dyn TransferHook>,
        owner: Address,
        transfers: &mut Vec<TransferResult>,
    ) -> Result<(), DonationError> {
        let chain_id = batch.chain_id;
        let contract = self
            .settings
            .batch_contracts
            .get(&chain_id)
            .copied()
            .ok_or(DonationError::ContractNotDeployed(chain_id))?;

        self.prepare_chain(chain_id, payments, before_transfer, owner)
            .await?;

        let prepared = prepare_batch(batch)?;
        let permit = if prepared.needs_permit() {
            let signer = PermitSigner {
                wallet: self.wallet.as_ref(),
                rpc: self.rpc.as_ref(),
                permit2: self.settings.permit2,
                deadline_seconds: self.settings.permit_deadline_seconds,
                nonce: self.settings.permit_nonce,
            };
            Some(
                signer
                    .sign(chain_id, owner, contract, &prepared.token_transfers)
                    .await?,
            )
        } else {
            None
        };

        let tx = MetaTransaction {
            chain_id,
            to: contract,
            calldata: encode_batch_call(&prepared, permit),
            value: prepared.total_eth,
        };
        tracing::info!(
            chain_id,
            %contract,
            value = %prepared.total_eth,
            token_transfers = prepared.token_transfers.len(),
            "submitting batch donation"
        );
        let hash = self.wallet.send_transaction(tx).await?;

        let first = transfers.len();
        transfers.extend(
            batch
                .entries
                .iter()
                .map(|(payment, _)| TransferResult::pending(hash, payment.project_id.clone(), chain_id)),
        );
        self.publish_transfers(transfers);

        let outcome = match self
            .wallet
            .await_receipt(chain_id, hash, self.settings.confirmations_for(chain_id))
            .await
        {
            Ok(ReceiptStatus::Success) => Ok(()),
            Ok(ReceiptStatus::Reverted) => Err(DonationError::TransactionReverted(hash)),
            Err(e) => Err(e),
        };
        let resolution = outcome.as_ref().map(|_| ()).map_err(|e| e.user_message());
        for result in &mut transfers[first..] {
            result.resolve(resolution.clone());
        }
        self.publish_transfers(transfers);

        match &outcome {
            Ok(()) => tracing::info!(chain_id, %hash, "batch donation confirmed"),
            Err(e) => tracing::warn!(chain_id, %hash, error = %e, "batch donation failed"),
        }
        outcome
    }

    fn publish_transfers(&self, transfers: &[TransferResult]) {
        self.cells.publish_transfers(transfers.to_vec());
        self.cells
            .publish(DonationExecutionState::donating(transfers.to_vec()));
    }

    /// Run the hook for the chain's first payment, then bind the wallet to the chain.
    async fn prepare_chain(
        &self,
        chain_id: u64,
        payments: &[Payment],
        before_transfer: Option<&dyn TransferHook>,
        owner: Address,
    ) -> Result<(), DonationError> {
        let first = payments.iter().find(|p| p.chain_id == chain_id);
        if let (Some(hook), Some(first)) = (before_transfer, first) {
            hook.before_transfer(first).await?;
        }
        self.bind_wallet(chain_id, owner).await
    }

    /// Make sure the wallet signs on `chain_id` with `owner`.
    ///
    /// On a mismatch, waits the configured backoff once, asks the wallet to switch and
    /// checks again. If it still disagrees the first error is returned.
    async fn bind_wallet(&self, chain_id: u64, owner: Address) -> Result<(), DonationError> {
        let original = match self.check_wallet_sync(chain_id, owner).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        tracing::warn!(chain_id, error = %original, "wallet out of sync, retrying once");
        tokio::time::sleep(self.settings.chain_sync_backoff).await;

        if let Err(e) = self.wallet.switch_chain(chain_id).await {
            tracing::warn!(chain_id, error = %e, "chain switch failed");
            return Err(original);
        }
        self.check_wallet_sync(chain_id, owner)
            .await
            .map_err(|_| original)
    }

    async fn check_wallet_sync(&self, chain_id: u64, owner: Address) -> Result<(), DonationError> {
        let actual = self.wallet.chain_id().await?;
        if actual != chain_id {
            return Err(DonationError::WalletChainMismatch {
                expected: chain_id,
                actual,
            });
        }
        let account = self.wallet.account().await?;
        if account != owner {
            return Err(DonationError::AccountMismatch {
                expected: owner,
                actual: account,
            });
        }
        Ok(())
    }
}

/// Check every payment and resolve its payout address, without touching the network.
fn resolve_recipients(
    payments: &[Payment],
    resolver: &dyn RecipientResolver,
) -> Result<Vec<Address>, DonationError> {
    payments
        .iter()
        .map(|payment| {
            if payment.chain_id != payment.token.chain_id {
                return Err(DonationError::ChainIdMismatch {
                    project_id: payment.project_id.clone(),
                    chain_id: payment.chain_id,
                    token_chain_id: payment.token.chain_id,
                });
            }
            let raw = resolver.resolve(&payment.project_id, payment.chain_id);
            validate_payout_address(&payment.project_id, payment.chain_id, raw.as_deref())
        })
        .collect()
}

/// Every chain of `payments` must be known and have a batch contract before anything is sent.
fn check_chains(
    payments: &[Payment],
    batch_contracts: &HashMap<u64, Address>,
) -> Result<(), DonationError> {
    for payment in payments {
        let chain_id = payment.chain_id;
        if Network::from_chain_id(chain_id).is_none() {
            return Err(DonationError::UnsupportedChain(chain_id));
        }
        if !batch_contracts.contains_key(&chain_id) {
            return Err(DonationError::ContractNotDeployed(chain_id));
        }
    }
    Ok(())
}
