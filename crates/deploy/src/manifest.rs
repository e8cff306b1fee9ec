//! Structured end-of-run summary.
//!
//! The `Deploy: KEY=address` lines remain the textual contract of a run. The
//! manifest records the same facts as JSON so that tooling does not have to
//! scrape logs, and so that an interrupted run can be resumed.

use std::{collections::BTreeMap, path::Path};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{Table, presets::UTF8_FULL};
use serde::{Deserialize, Serialize};

use crate::{
    environment::{CurrencyRegistry, EnvironmentContext, NetworkMode},
    step::DeploymentResult,
};

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentManifest {
    pub network: String,
    pub chain_id: u64,
    pub mode: NetworkMode,
    /// Currency symbol to contract address.
    pub currencies: BTreeMap<String, Address>,
    /// Completed steps in execution order.
    pub results: Vec<DeploymentResult>,
    /// The step that aborted the run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    pub written_at: DateTime<Utc>,
    /// Version of the tool that wrote the manifest.
    pub tool_version: String,
}

impl DeploymentManifest {
    pub fn new(
        ctx: &EnvironmentContext,
        currencies: &CurrencyRegistry,
        results: Vec<DeploymentResult>,
        failed_step: Option<String>,
    ) -> Self {
        Self {
            network: ctx.network.clone(),
            chain_id: ctx.chain_id,
            mode: ctx.mode,
            currencies: (**currencies).clone(),
            results,
            failed_step,
            written_at: Utc::now(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed_step.is_none()
    }

    /// Address recorded for a contract.
    pub fn address_of(&self, contract: &str) -> Option<Address> {
        self.results
            .iter()
            .find(|r| r.contract == contract)
            .map(|r| r.address)
    }

    /// Save the manifest as pretty-printed JSON.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize manifest")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create manifest directory {}", parent.display())
            })?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write manifest to {}", path.display()))?;

        tracing::info!(path = %path.display(), results = self.results.len(), "Manifest saved");
        Ok(())
    }

    /// Load a manifest written by an earlier run.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Manifest file does not exist: {}", path.display());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest from {}", path.display()))?;
        let manifest: Self =
            serde_json::from_str(&content).context("Failed to parse manifest JSON")?;

        tracing::info!(path = %path.display(), results = manifest.results.len(), "Manifest loaded");
        Ok(manifest)
    }
}

/// Render the ordered `{contract, address}` summary of a run.
pub fn summary_table(results: &[DeploymentResult], failed_step: Option<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["#", "Contract", "Log key", "Address"]);

    for result in results {
        table.add_row(vec![
            (result.order + 1).to_string(),
            result.contract.clone(),
            result.log_key.clone(),
            result.address.to_string(),
        ]);
    }
    if let Some(step) = failed_step {
        table.add_row(vec![
            "!".to_string(),
            step.to_string(),
            String::new(),
            "FAILED".to_string(),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn manifest(failed_step: Option<&str>) -> DeploymentManifest {
        let ctx = EnvironmentContext {
            network: "hardhat".to_string(),
            chain_id: 1337,
            mode: NetworkMode::EphemeralTest,
            deployer: Address::with_last_byte(1),
            signers: None,
        };
        let mut currencies = CurrencyRegistry::default();
        currencies.register("USDC", Address::with_last_byte(2));
        let results = vec![DeploymentResult {
            contract: "FNFTFactoryTipERC721".to_string(),
            log_key: "FNFTFACTORY_TIPNFTERC721_ADDRESS".to_string(),
            address: Address::with_last_byte(3),
            order: 0,
            deployed_at: Utc::now(),
        }];
        DeploymentManifest::new(&ctx, &currencies, results, failed_step.map(String::from))
    }

    #[test]
    fn test_manifest_save_and_load() {
        let temp_dir = TempDir::new("fnft-test").expect("Failed to create temp dir");
        let path = temp_dir.path().join("out/deployments.json");

        let original = manifest(Some("TipERC721"));
        original.save_to_file(&path).expect("Failed to save manifest");
        let loaded = DeploymentManifest::load_from_file(&path).expect("Failed to load manifest");

        assert_eq!(original, loaded);
        assert!(!loaded.is_complete());
        assert_eq!(
            loaded.address_of("FNFTFactoryTipERC721"),
            Some(Address::with_last_byte(3))
        );
        assert_eq!(loaded.address_of("TipERC721"), None);
    }

    #[test]
    fn test_manifest_json_shape() {
        let json = serde_json::to_value(manifest(None)).unwrap();
        assert_eq!(json["mode"], "ephemeral-test");
        assert!(json.get("failed_step").is_none());
        assert_eq!(json["results"][0]["log_key"], "FNFTFACTORY_TIPNFTERC721_ADDRESS");
        assert!(json["currencies"]["USDC"].is_string());
    }

    #[test]
    fn test_manifest_load_missing_file() {
        let temp_dir = TempDir::new("fnft-test").expect("Failed to create temp dir");
        assert!(DeploymentManifest::load_from_file(&temp_dir.path().join("nope.json")).is_err());
    }

    #[test]
    fn test_manifest_load_corrupted_file() {
        let temp_dir = TempDir::new("fnft-test").expect("Failed to create temp dir");
        let path = temp_dir.path().join("deployments.json");
        std::fs::write(&path, "{ invalid json }").expect("Failed to write corrupted file");
        assert!(DeploymentManifest::load_from_file(&path).is_err());
    }

    #[test]
    fn test_summary_table_lists_results_and_failure() {
        let m = manifest(Some("TipERC721"));
        let rendered = summary_table(&m.results, m.failed_step.as_deref()).to_string();
        assert!(rendered.contains("FNFTFactoryTipERC721"));
        assert!(rendered.contains(&Address::with_last_byte(3).to_string()));
        assert!(rendered.contains("FAILED"));
    }
}
