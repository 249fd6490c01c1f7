//! Multi-chain batch donation engine.
//!
//! Given donation payments spread over several EVM chains, [`donation::DonationExecutor`]
//! approves Permit2 where needed, signs one batch permit per chain, calls the chain's Batch
//! Donations contract once and follows every transaction to its receipt, publishing a
//! [`types::DonationExecutionState`] snapshot after each step.
//!
//! The wallet and chain reads are reached through the [`chain::WalletPort`] and
//! [`chain::ChainRpcPort`] traits; [`chain::evm`] implements them with alloy.

pub mod chain;
pub mod config;
pub mod contracts;
pub mod donation;
pub mod error;
pub mod network;
pub mod recipients;
pub mod telemetry;
pub mod timestamp;
pub mod types;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;
