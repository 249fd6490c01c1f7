//! Published state of a donation run.
//!
//! Each cell is a `tokio::sync::watch` channel: writers replace the whole value, readers
//! always observe a complete snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

use crate::types::{DonationExecutionState, TokenApprovalInfo, TransferResult};

/// State owned by one [`super::DonationExecutor`].
#[derive(Debug)]
pub struct ExecutionCells {
    state: watch::Sender<DonationExecutionState>,
    approval_info: watch::Sender<Vec<TokenApprovalInfo>>,
    transfers: watch::Sender<Vec<TransferResult>>,
    executing: Arc<AtomicBool>,
}

impl Default for ExecutionCells {
    fn default() -> Self {
        Self {
            state: watch::Sender::new(DonationExecutionState::default()),
            approval_info: watch::Sender::new(Vec::new()),
            transfers: watch::Sender::new(Vec::new()),
            executing: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl ExecutionCells {
    /// Replace the state snapshot.
    pub fn publish(&self, state: DonationExecutionState) {
        tracing::debug!(phase = %state.phase, "publishing execution state");
        self.state.send_replace(state);
    }

    pub fn publish_approval_info(&self, info: Vec<TokenApprovalInfo>) {
        self.approval_info.send_replace(info);
    }

    pub fn publish_transfers(&self, transfers: Vec<TransferResult>) {
        self.transfers.send_replace(transfers);
    }

    pub fn state(&self) -> DonationExecutionState {
        self.state.borrow().clone()
    }

    pub fn approval_info(&self) -> Vec<TokenApprovalInfo> {
        self.approval_info.borrow().clone()
    }

    pub fn transfers(&self) -> Vec<TransferResult> {
        self.transfers.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DonationExecutionState> {
        self.state.subscribe()
    }

    pub fn subscribe_transfers(&self) -> watch::Receiver<Vec<TransferResult>> {
        self.transfers.subscribe()
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    /// Mark a run as started. The flag is cleared when the guard drops, on every exit path.
    ///
    /// Returns `None` if a run is already in progress.
    pub fn begin(&self) -> Option<ExecutingGuard> {
        self.executing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| ExecutingGuard {
                flag: Arc::clone(&self.executing),
            })
    }
}

/// Clears the executing flag on drop.
#[derive(Debug)]
pub struct ExecutingGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for ExecutingGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
