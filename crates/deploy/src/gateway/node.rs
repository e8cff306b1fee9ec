//! JSON-RPC implementation of the contract gateway.

use std::{collections::HashMap, str::FromStr, sync::Mutex, time::Duration};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use serde_json::json;
use url::Url;

use crate::{
    config::{DeployConfig, NetworkConfig},
    error::GatewayError,
    rpc::{self, TransactionReceipt},
};

use super::{ArtifactStore, ContractArtifact, ContractGateway, ContractInstance, SignerProvider};

/// Gateway backed by an Ethereum node.
///
/// Transactions go through `eth_sendTransaction`, so the endpoint must hold
/// the sender's key: a local dev node for unlocked test accounts, or a signing
/// proxy in front of a remote network.
pub struct NodeGateway {
    client: reqwest::Client,
    url: Url,
    chain_id: u64,
    gas: u64,
    timeout: Duration,
    artifacts: ArtifactStore,
    cache: Mutex<HashMap<String, ContractArtifact>>,
}

impl NodeGateway {
    pub fn new(url: Url, network: &NetworkConfig, artifacts: ArtifactStore) -> Result<Self> {
        Ok(Self {
            client: rpc::create_client()?,
            url,
            chain_id: network.chain_id,
            gas: network.gas,
            timeout: network.timeout(),
            artifacts,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Build a gateway for the network selected in `config`.
    pub fn from_config(config: &DeployConfig) -> Result<Self> {
        let url = config.rpc_url()?.clone();
        let network = config.network()?;
        Self::new(url, network, ArtifactStore::new(&config.artifacts))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Check that the endpoint serves the configured chain.
    pub async fn verify_chain(&self) -> Result<()> {
        let raw: String = rpc::json_rpc_call(&self.client, &self.url, "eth_chainId", vec![])
            .await
            .context("Failed to query chain id")?;
        let actual = rpc::parse_quantity(&raw)?;
        if actual != self.chain_id {
            anyhow::bail!(
                "Endpoint {} serves chain {} but the network is configured for {}",
                self.url,
                actual,
                self.chain_id
            );
        }
        tracing::debug!(url = %self.url, chain_id = actual, "Connected to node");
        Ok(())
    }

    /// Load an artifact once per run.
    fn artifact(&self, contract: &str) -> Result<ContractArtifact, GatewayError> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| GatewayError::Transport("artifact cache poisoned".to_string()))?;
        if let Some(artifact) = cache.get(contract) {
            return Ok(artifact.clone());
        }
        let artifact = self.artifacts.load(contract).map_err(GatewayError::rejected)?;
        cache.insert(contract.to_string(), artifact.clone());
        Ok(artifact)
    }

    /// Send a transaction and wait for a successful receipt.
    async fn transact(
        &self,
        from: Address,
        to: Option<Address>,
        data: Vec<u8>,
    ) -> Result<TransactionReceipt, GatewayError> {
        let mut tx = json!({
            "from": from.to_string(),
            "data": format!("0x{}", hex::encode(&data)),
            "gas": format!("0x{:x}", self.gas),
        });
        if let Some(to) = to {
            tx["to"] = json!(to.to_string());
        }

        let tx_hash: String =
            rpc::json_rpc_call(&self.client, &self.url, "eth_sendTransaction", vec![tx]).await?;
        tracing::debug!(tx = %tx_hash, "Transaction sent, waiting for receipt");

        let receipt = rpc::wait_for_receipt(&self.client, &self.url, &tx_hash, self.timeout).await?;
        if !receipt.succeeded() {
            return Err(GatewayError::Rejected(format!(
                "transaction {} reverted",
                receipt.transaction_hash
            )));
        }
        Ok(receipt)
    }
}

impl ContractGateway for NodeGateway {
    async fn deploy(
        &self,
        from: Address,
        contract: &str,
        args: &[String],
    ) -> Result<ContractInstance, GatewayError> {
        let artifact = self.artifact(contract)?;
        let data = artifact.deploy_data(args).map_err(GatewayError::rejected)?;

        let receipt = self.transact(from, None, data).await?;
        let address = receipt
            .contract_address
            .as_deref()
            .ok_or_else(|| {
                GatewayError::Rejected(format!(
                    "receipt of {} carries no contract address",
                    receipt.transaction_hash
                ))
            })
            .and_then(|raw| {
                Address::from_str(raw)
                    .map_err(|e| GatewayError::Transport(format!("bad contract address {raw}: {e}")))
            })?;

        Ok(ContractInstance::new(contract, address))
    }

    async fn call(
        &self,
        from: Address,
        instance: &ContractInstance,
        method: &str,
        args: &[String],
    ) -> Result<(), GatewayError> {
        let artifact = self.artifact(&instance.contract)?;
        let data = artifact
            .call_data(method, args)
            .map_err(GatewayError::rejected)?;

        let receipt = self.transact(from, Some(instance.address), data).await?;
        tracing::debug!(
            contract = %instance.contract,
            method,
            tx = %receipt.transaction_hash,
            "Call confirmed"
        );
        Ok(())
    }

    async fn query(
        &self,
        instance: &ContractInstance,
        method: &str,
        args: &[String],
    ) -> Result<Vec<String>, GatewayError> {
        let artifact = self.artifact(&instance.contract)?;
        let data = artifact
            .call_data(method, args)
            .map_err(GatewayError::rejected)?;

        let raw: String = rpc::json_rpc_call(
            &self.client,
            &self.url,
            "eth_call",
            vec![
                json!({
                    "to": instance.address.to_string(),
                    "data": format!("0x{}", hex::encode(&data)),
                }),
                json!("latest"),
            ],
        )
        .await?;

        let output = hex::decode(raw.trim_start_matches("0x"))
            .map_err(|e| GatewayError::Transport(format!("malformed eth_call output: {e}")))?;
        artifact
            .decode_output(method, args.len(), &output)
            .map_err(GatewayError::rejected)
    }

    async fn instance_at(
        &self,
        contract: &str,
        address: Address,
    ) -> Result<ContractInstance, GatewayError> {
        // Fails early when the artifact is unknown, like a factory lookup would.
        self.artifact(contract)?;

        let code: String = rpc::json_rpc_call(
            &self.client,
            &self.url,
            "eth_getCode",
            vec![json!(address.to_string()), json!("latest")],
        )
        .await?;
        if code.trim_start_matches("0x").is_empty() {
            return Err(GatewayError::Rejected(format!(
                "no contract code at {} for {}",
                address, contract
            )));
        }
        Ok(ContractInstance::new(contract, address))
    }
}

impl SignerProvider for NodeGateway {
    async fn accounts(&self) -> Result<Vec<Address>> {
        let raw: Vec<String> = rpc::json_rpc_call(&self.client, &self.url, "eth_accounts", vec![])
            .await
            .context("Failed to list node accounts")?;
        raw.iter()
            .map(|a| Address::from_str(a).with_context(|| format!("Node returned bad account {a}")))
            .collect()
    }
}
