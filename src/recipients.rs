//! Payout address lookup and the pre-transfer hook.
//!
//! The orchestrator resolves recipients synchronously, before any network call. Sources that
//! need I/O, like [`IndexerRecipients`], are filled ahead of time with
//! [`IndexerRecipients::prefetch`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use url::Url;

use crate::error::DonationError;
use crate::types::{Payment, ProjectId};

/// Maps a project to its payout address on a chain. `None` or a blank string means unknown.
pub trait RecipientResolver: Send + Sync {
    fn resolve(&self, project_id: &str, chain_id: u64) -> Option<String>;
}

impl<F> RecipientResolver for F
where
    F: Fn(&str, u64) -> Option<String> + Send + Sync,
{
    fn resolve(&self, project_id: &str, chain_id: u64) -> Option<String> {
        self(project_id, chain_id)
    }
}

/// Called with the first payment of a chain before its approvals and before its batch call.
///
/// Typically asks the wallet to switch network. An error aborts the run.
#[async_trait]
pub trait TransferHook: Send + Sync {
    async fn before_transfer(&self, payment: &Payment) -> Result<(), DonationError>;
}

/// Fixed `(project, chain) -> address` table.
#[derive(Debug, Clone, Default)]
pub struct StaticRecipients {
    entries: HashMap<(ProjectId, u64), String>,
}

impl StaticRecipients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, project_id: impl Into<ProjectId>, chain_id: u64, address: impl Into<String>) -> Self {
        self.entries
            .insert((project_id.into(), chain_id), address.into());
        self
    }
}

impl RecipientResolver for StaticRecipients {
    fn resolve(&self, project_id: &str, chain_id: u64) -> Option<String> {
        self.entries
            .get(&(project_id.to_string(), chain_id))
            .cloned()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayoutResponse {
    payout_address: Option<String>,
}

/// Payout addresses served by the grants indexer, cached per `(project, chain)`.
///
/// Queries `GET {base}/projects/{project_id}/payout?chainId={chain_id}`, which answers
/// `{"payoutAddress": "0x..."}`.
#[derive(Debug, Clone)]
pub struct IndexerRecipients {
    client: Client,
    base_url: Url,
    cache: DashMap<(ProjectId, u64), Option<String>>,
}

impl IndexerRecipients {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: Client::new(),
            base_url,
            cache: DashMap::new(),
        }
    }

    fn payout_url(&self, project_id: &str, chain_id: u64) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("indexer URL {} cannot be a base", self.base_url))?
            .pop_if_empty()
            .extend(["projects", project_id, "payout"]);
        url.query_pairs_mut()
            .append_pair("chainId", &chain_id.to_string());
        Ok(url)
    }

    /// Fetch the payout address of one project, bypassing the cache.
    pub async fn fetch(&self, project_id: &str, chain_id: u64) -> Result<Option<String>> {
        let url = self.payout_url(project_id, chain_id)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send payout address request")?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<could not read body>".to_string());
            anyhow::bail!("Payout address request failed with status {}: {}", status, body);
        }

        let payout: PayoutResponse = response
            .json()
            .await
            .context("Failed to parse payout address response")?;
        Ok(payout.payout_address)
    }

    /// Fill the cache for every `(project, chain)` pair of `payments` not cached yet.
    pub async fn prefetch(&self, payments: &[Payment]) -> Result<()> {
        for payment in payments {
            let key = (payment.project_id.clone(), payment.chain_id);
            if self.cache.contains_key(&key) {
                continue;
            }
            let address = self
                .fetch(&payment.project_id, payment.chain_id)
                .await
                .with_context(|| {
                    format!(
                        "Failed to resolve payout address of project {} on chain {}",
                        payment.project_id, payment.chain_id
                    )
                })?;
            tracing::debug!(
                project_id = %payment.project_id,
                chain_id = payment.chain_id,
                found = address.is_some(),
                "payout address fetched"
            );
            self.cache.insert(key, address);
        }
        Ok(())
    }
}

impl RecipientResolver for IndexerRecipients {
    fn resolve(&self, project_id: &str, chain_id: u64) -> Option<String> {
        self.cache
            .get(&(project_id.to_string(), chain_id))
            .and_then(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_recipients() {
        let recipients = StaticRecipients::new().with("p1", 10, "0xabc");
        assert_eq!(recipients.resolve("p1", 10).as_deref(), Some("0xabc"));
        assert_eq!(recipients.resolve("p1", 8453), None);
        assert_eq!(recipients.resolve("p2", 10), None);
    }

    #[test]
    fn test_closure_resolver() {
        let resolver = |project: &str, _chain: u64| (project == "p1").then(|| "0x01".to_string());
        let resolver: &dyn RecipientResolver = &resolver;
        assert_eq!(resolver.resolve("p1", 1).as_deref(), Some("0x01"));
        assert!(resolver.resolve("p2", 1).is_none());
    }

    #[test]
    fn test_indexer_payout_url() {
        let indexer = IndexerRecipients::new(Url::parse("https://indexer.example.org/api/").unwrap());
        let url = indexer.payout_url("round-7/project 1", 10).unwrap();
        assert_eq!(
            url.as_str(),
            "https://indexer.example.org/api/projects/round-7%2Fproject%201/payout?chainId=10"
        );
    }

    #[test]
    fn test_indexer_resolves_from_cache_only() {
        let indexer = IndexerRecipients::new(Url::parse("https://indexer.example.org").unwrap());
        assert!(indexer.resolve("p1", 10).is_none());

        indexer
            .cache
            .insert(("p1".to_string(), 10), Some("0x01".to_string()));
        indexer.cache.insert(("p2".to_string(), 10), None);
        assert_eq!(indexer.resolve("p1", 10).as_deref(), Some("0x01"));
        assert!(indexer.resolve("p2", 10).is_none());
    }

    #[test]
    fn test_payout_response_shape() {
        let parsed: PayoutResponse =
            serde_json::from_str(r#"{"payoutAddress":"0x01","name":"ignored"}"#).unwrap();
        assert_eq!(parsed.payout_address.as_deref(), Some("0x01"));
    }
}
