//! Shared helpers for talking to an Ethereum JSON-RPC endpoint.

use std::time::Duration;

use anyhow::Context;
use backon::{ConstantBuilder, Retryable};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use crate::error::GatewayError;

/// Timeout of a single HTTP request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between receipt polls.
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Error object of a JSON-RPC response.
#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Make a JSON-RPC call and deserialize the result.
///
/// An `error` member in the response is reported as [`GatewayError::Rejected`]:
/// the node understood the request and refused it. Everything else that goes
/// wrong is a [`GatewayError::Transport`] failure.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &Url,
    method: &str,
    params: Vec<Value>,
) -> Result<T, GatewayError> {
    let response = client
        .post(url.clone())
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))
        .map_err(GatewayError::transport)?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))
        .map_err(GatewayError::transport)?;

    if let Some(error) = result.get("error") {
        let error: RpcErrorObject = serde_json::from_value(error.clone()).unwrap_or(RpcErrorObject {
            code: 0,
            message: error.to_string(),
        });
        return Err(GatewayError::Rejected(format!(
            "{} failed ({}): {}",
            method, error.code, error.message
        )));
    }

    let result_value = result
        .get("result")
        .cloned()
        .ok_or_else(|| GatewayError::Transport(format!("No result in {} response", method)))?;

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
        .map_err(GatewayError::transport)
}

/// The subset of a transaction receipt the gateway cares about.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    #[serde(default)]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl TransactionReceipt {
    /// Receipts without a status field predate byzantium and are successful.
    pub fn succeeded(&self) -> bool {
        !matches!(self.status.as_deref(), Some("0x0") | Some("0x00"))
    }
}

/// Outcome of one receipt poll that did not yield a receipt.
#[derive(Debug)]
enum ReceiptPoll {
    Pending,
    Failed(GatewayError),
}

/// Poll `eth_getTransactionReceipt` until the transaction is mined.
///
/// Transport hiccups are retried like a pending receipt. Node-side rejections
/// are returned immediately. The caller's `timeout` bounds the whole wait.
pub async fn wait_for_receipt(
    client: &reqwest::Client,
    url: &Url,
    tx_hash: &str,
    timeout: Duration,
) -> Result<TransactionReceipt, GatewayError> {
    let fetch = || async move {
        let receipt: Option<TransactionReceipt> = json_rpc_call(
            client,
            url,
            "eth_getTransactionReceipt",
            vec![serde_json::json!(tx_hash)],
        )
        .await
        .map_err(ReceiptPoll::Failed)?;
        receipt.ok_or(ReceiptPoll::Pending)
    };

    let polling = fetch
        .retry(
            ConstantBuilder::default()
                .with_delay(RECEIPT_POLL_INTERVAL)
                .with_max_times(usize::MAX),
        )
        .when(|poll| {
            matches!(
                poll,
                ReceiptPoll::Pending | ReceiptPoll::Failed(GatewayError::Transport(_))
            )
        })
        .notify(|poll, _| {
            if let ReceiptPoll::Failed(err) = poll {
                tracing::trace!(tx = %tx_hash, error = %err, "Receipt poll failed, retrying...");
            }
        });

    match tokio::time::timeout(timeout, polling).await {
        Ok(Ok(receipt)) => Ok(receipt),
        Ok(Err(ReceiptPoll::Failed(err))) => Err(err),
        Ok(Err(ReceiptPoll::Pending)) | Err(_) => Err(GatewayError::Timeout {
            tx: tx_hash.to_string(),
            waited: timeout,
        }),
    }
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_quantity(raw: &str) -> anyhow::Result<u64> {
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .with_context(|| format!("Invalid hex quantity: {}", raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_status() {
        let ok: TransactionReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": "0x01",
            "contractAddress": "0x5FbDB2315678afecb367f032d93F642f64180aa3",
            "status": "0x1"
        }))
        .unwrap();
        assert!(ok.succeeded());
        assert_eq!(
            ok.contract_address.as_deref(),
            Some("0x5FbDB2315678afecb367f032d93F642f64180aa3")
        );

        let reverted: TransactionReceipt = serde_json::from_value(serde_json::json!({
            "transactionHash": "0x02",
            "contractAddress": null,
            "status": "0x0"
        }))
        .unwrap();
        assert!(!reverted.succeeded());
        assert!(reverted.contract_address.is_none());
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x539").unwrap(), 1337);
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_times_out() {
        let client = reqwest::Client::new();
        let url = Url::parse("http://127.0.0.1:1").unwrap();
        let timeout = Duration::from_millis(300);

        let err = wait_for_receipt(&client, &url, "0xabc", timeout)
            .await
            .unwrap_err();

        match err {
            GatewayError::Timeout { tx, waited } => {
                assert_eq!(tx, "0xabc");
                assert_eq!(waited, timeout);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
