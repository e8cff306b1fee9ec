//! The contract runtime seen by the orchestrator.
//!
//! The orchestrator never talks to a chain directly. It is handed a
//! [`ContractGateway`] that creates and calls contracts and a
//! [`SignerProvider`] that names the accounts available to the run.
//!
//! - [`NodeGateway`] implements both against a JSON-RPC endpoint.
//! - [`MnemonicAccounts`] derives local development accounts.

mod accounts;
mod artifact;
mod node;

use std::future::Future;

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

pub use accounts::{MnemonicAccounts, deployer_from_key};
pub use artifact::{ArtifactStore, ContractArtifact};
pub use node::NodeGateway;

/// Handle to a contract living at a known address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractInstance {
    /// Name of the compiled contract.
    pub contract: String,
    pub address: Address,
}

impl ContractInstance {
    pub fn new(contract: impl Into<String>, address: Address) -> Self {
        Self {
            contract: contract.into(),
            address,
        }
    }
}

/// Creates and drives contracts on a chain.
///
/// Every method suspends until the runtime has confirmed the operation.
/// Arguments are passed in their textual form and coerced by the gateway
/// against the contract's ABI. Retrying is never the gateway's business.
pub trait ContractGateway: Send + Sync {
    /// Deploy a new instance of `contract` with constructor `args`.
    fn deploy(
        &self,
        from: Address,
        contract: &str,
        args: &[String],
    ) -> impl Future<Output = Result<ContractInstance, GatewayError>> + Send;

    /// Send a state-changing call and wait for it to be mined.
    fn call(
        &self,
        from: Address,
        instance: &ContractInstance,
        method: &str,
        args: &[String],
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Read-only call. Returned values are rendered as strings.
    fn query(
        &self,
        instance: &ContractInstance,
        method: &str,
        args: &[String],
    ) -> impl Future<Output = Result<Vec<String>, GatewayError>> + Send;

    /// Attach to an existing deployment of `contract`.
    fn instance_at(
        &self,
        contract: &str,
        address: Address,
    ) -> impl Future<Output = Result<ContractInstance, GatewayError>> + Send;
}

/// Supplies the signer identities available to a run.
pub trait SignerProvider: Send + Sync {
    /// Accounts in a stable order. Index 0 is the admin.
    fn accounts(&self) -> impl Future<Output = anyhow::Result<Vec<Address>>> + Send;
}
