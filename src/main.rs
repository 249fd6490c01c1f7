//! `batch-donate`: run a donation plan from the command line.
//!
//! Reads a JSON plan, validates it, then donates on every chain it covers with a local key,
//! logging each state snapshot. The transfer results are printed to stdout as JSON.
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `PRIVATE_KEY` hex key of the donor (required)
//! - `PLAN_FILE` path of the plan (default `donation-plan.json`)
//! - `CONFIG_FILE` engine configuration (default `donations.toml`)
//! - `RPC_URL_<NETWORK>` RPC endpoint when the configuration has none
//!
//! Plan format:
//! ```json
//! {
//!   "payments": [{ "projectId": "p1", "amount": "0.01", "chainId": 10,
//!                  "token": { "address": "0x0000000000000000000000000000000000000000",
//!                             "symbol": "ETH", "decimals": 18, "chainId": 10, "isNative": true } }],
//!   "recipients": { "p1": { "10": "0x..." } },
//!   "balances": { "ETH-10": "1.5" }
//! }
//! ```

use async_trait::async_trait;
use batch_donations::chain::WalletPort;
use batch_donations::chain::evm::{ChainEndpoints, LocalWallet, RpcClients};
use batch_donations::config::DonationConfig;
use batch_donations::donation::{DonationExecutor, ExecutorSettings};
use batch_donations::error::DonationError;
use batch_donations::recipients::{
    IndexerRecipients, RecipientResolver, StaticRecipients, TransferHook,
};
use batch_donations::telemetry::Telemetry;
use batch_donations::types::Payment;
use batch_donations::validation::{estimated_gas_units, get_estimated_gas_cost, validate_payments};
use dotenvy::dotenv;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DonationPlan {
    payments: Vec<Payment>,
    /// Project id -> chain id -> payout address.
    #[serde(default)]
    recipients: Option<HashMap<String, HashMap<u64, String>>>,
    /// Balances keyed by `"{symbol}-{chain_id}"`. Skips validation when absent.
    #[serde(default)]
    balances: Option<HashMap<String, String>>,
}

/// Switches the local wallet to the chain of the batch about to be sent.
struct SwitchChain(Arc<LocalWallet>);

#[async_trait]
impl TransferHook for SwitchChain {
    async fn before_transfer(&self, payment: &Payment) -> Result<(), DonationError> {
        if self.0.chain_id().await? != payment.chain_id {
            self.0.switch_chain(payment.chain_id).await?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = match DonationConfig::from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            tracing::info!("Using default configuration");
            DonationConfig::default()
        }
    };

    let plan_path = std::env::var("PLAN_FILE").unwrap_or_else(|_| "donation-plan.json".to_string());
    let plan: DonationPlan = serde_json::from_str(&std::fs::read_to_string(&plan_path)?)?;
    let Some(first) = plan.payments.first() else {
        tracing::warn!(plan = %plan_path, "plan has no payments, nothing to do");
        return Ok(());
    };
    let initial_chain = first.chain_id;

    if let Some(balances) = &plan.balances {
        let report = validate_payments(&plan.payments, balances);
        if !report.valid {
            for error in &report.errors {
                tracing::error!(%error, "payment rejected");
            }
            std::process::exit(1);
        }
    }
    tracing::info!(
        payments = plan.payments.len(),
        gas_units = estimated_gas_units(&plan.payments, &config.gas),
        estimate = %get_estimated_gas_cost(&plan.payments),
        "plan validated"
    );

    let private_key = std::env::var("PRIVATE_KEY").map_err(|_| "PRIVATE_KEY is not set")?;
    let endpoints = Arc::new(ChainEndpoints::from_config(&config));
    tracing::info!(chains = ?endpoints.chain_ids().collect::<Vec<_>>(), "RPC endpoints configured");

    let wallet = Arc::new(LocalWallet::from_private_key(
        &private_key,
        endpoints.clone(),
        initial_chain,
    )?);
    let rpc = Arc::new(RpcClients::new(endpoints));

    let resolver: Box<dyn RecipientResolver> = match (&plan.recipients, &config.indexer_url) {
        (Some(recipients), _) => {
            let mut table = StaticRecipients::new();
            for (project_id, chains) in recipients {
                for (chain_id, address) in chains {
                    table = table.with(project_id.clone(), *chain_id, address.clone());
                }
            }
            Box::new(table)
        }
        (None, Some(indexer_url)) => {
            let indexer = IndexerRecipients::new(indexer_url.clone());
            indexer.prefetch(&plan.payments).await?;
            Box::new(indexer)
        }
        (None, None) => {
            return Err("plan has no recipients and no indexer_url is configured".into());
        }
    };

    let executor = DonationExecutor::new(
        wallet.clone(),
        rpc,
        ExecutorSettings::from_config(&config),
    );

    let mut states = executor.subscribe();
    let watcher = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            tracing::info!(
                phase = %state.phase,
                approval_progress = ?state.approval_progress,
                transfers = state.transfers.as_ref().map_or(0, Vec::len),
                error = ?state.error,
                "state changed"
            );
        }
    });

    let hook = SwitchChain(wallet);
    let outcome = executor
        .execute_donations(&plan.payments, resolver.as_ref(), Some(&hook as &dyn TransferHook))
        .await;
    watcher.abort();

    println!("{}", serde_json::to_string_pretty(&executor.transfers())?);
    match outcome {
        Ok(transfers) => {
            tracing::info!(transfers = transfers.len(), "all donations confirmed");
            Ok(())
        }
        Err(e) => {
            tracing::error!(kind = ?e.kind(), "{}", e.user_message());
            std::process::exit(1);
        }
    }
}
