//! A single deploy step: deploy one named contract, initialize it, publish its address.

use alloy_core::primitives::Address;
use chrono::{DateTime, Utc};
use derive_more::Deref;
use serde::{Deserialize, Serialize};

use crate::{
    environment::{CurrencyRegistry, EnvironmentContext},
    error::{DeploymentError, DeploymentFailure},
    gateway::{ContractGateway, ContractInstance},
    plan::Stage,
};

/// Print the `Deploy: KEY=address` line consumed by downstream tooling.
///
/// The line goes to stdout verbatim; the structured record goes to the logger.
pub fn announce(step: &str, log_key: &str, address: Address) {
    println!("Deploy: {}={}", log_key, address);
    tracing::info!(step, log_key, address = %address, "Contract deployed");
}

/// A constructor or initializer argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepArg {
    /// Passed through as written.
    Literal(String),
    /// The address published by an earlier step.
    AddressOf(String),
    /// The address registered for a currency symbol.
    Currency(String),
    /// The signer at this index of the environment's accounts.
    Signer(usize),
}

impl StepArg {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    /// Turn the argument into the text handed to the gateway.
    fn resolve(
        &self,
        ctx: &EnvironmentContext,
        currencies: &CurrencyRegistry,
        prior: &DeploymentResults,
    ) -> Result<String, DeploymentFailure> {
        match self {
            StepArg::Literal(value) => Ok(value.clone()),
            StepArg::AddressOf(step) => prior
                .get(step)
                .map(|result| result.address.to_string())
                .ok_or_else(|| DeploymentFailure::MissingInput(format!("address of step `{step}`"))),
            StepArg::Currency(symbol) => currencies
                .get(symbol)
                .map(Address::to_string)
                .ok_or_else(|| DeploymentFailure::MissingInput(format!("currency `{symbol}`"))),
            StepArg::Signer(index) => ctx
                .signer(*index)
                .map(|address| address.to_string())
                .ok_or_else(|| DeploymentFailure::MissingInput(format!("signer #{index}"))),
        }
    }
}

/// A method invoked on the fresh instance after deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializerCall {
    pub method: String,
    pub args: Vec<StepArg>,
}

/// Static definition of one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStep {
    /// Contract name, which is also the step identity.
    pub contract: String,
    /// Key of the `Deploy: KEY=address` line.
    pub log_key: String,
    pub stage: Stage,
    pub args: Vec<StepArg>,
    pub initializers: Vec<InitializerCall>,
    /// Read-only methods queried after re-attaching to the deployed address.
    pub checks: Vec<String>,
}

impl DeploymentStep {
    pub fn new(contract: impl Into<String>, log_key: impl Into<String>, stage: Stage) -> Self {
        Self {
            contract: contract.into(),
            log_key: log_key.into(),
            stage,
            args: Vec::new(),
            initializers: Vec::new(),
            checks: Vec::new(),
        }
    }

    /// Append a constructor argument.
    pub fn arg(mut self, arg: StepArg) -> Self {
        self.args.push(arg);
        self
    }

    /// Append a post-deploy initializer call.
    pub fn initializer(mut self, method: impl Into<String>, args: Vec<StepArg>) -> Self {
        self.initializers.push(InitializerCall {
            method: method.into(),
            args,
        });
        self
    }

    /// Append a post-deploy read-only check.
    pub fn check(mut self, method: impl Into<String>) -> Self {
        self.checks.push(method.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.contract
    }

    /// Every argument of the constructor and of the initializers.
    fn all_args(&self) -> impl Iterator<Item = &StepArg> {
        self.args
            .iter()
            .chain(self.initializers.iter().flat_map(|call| call.args.iter()))
    }

    /// Names of the earlier steps whose addresses this step consumes.
    pub fn step_dependencies(&self) -> impl Iterator<Item = &str> {
        self.all_args().filter_map(|arg| match arg {
            StepArg::AddressOf(step) => Some(step.as_str()),
            _ => None,
        })
    }

    /// Currency symbols this step consumes.
    pub fn currency_dependencies(&self) -> impl Iterator<Item = &str> {
        self.all_args().filter_map(|arg| match arg {
            StepArg::Currency(symbol) => Some(symbol.as_str()),
            _ => None,
        })
    }

    fn resolve_args(
        &self,
        args: &[StepArg],
        ctx: &EnvironmentContext,
        currencies: &CurrencyRegistry,
        prior: &DeploymentResults,
    ) -> Result<Vec<String>, DeploymentError> {
        args.iter()
            .map(|arg| arg.resolve(ctx, currencies, prior))
            .collect::<Result<_, _>>()
            .map_err(|failure| DeploymentError::new(&self.contract, failure))
    }

    /// Deploy, initialize and check the contract.
    ///
    /// Every call creates a new contract: the caller must not run a step that
    /// already has a result. Checks only log: once initialized, the contract
    /// is part of the run whatever they return.
    pub async fn execute<G: ContractGateway>(
        &self,
        gateway: &G,
        ctx: &EnvironmentContext,
        currencies: &CurrencyRegistry,
        prior: &DeploymentResults,
    ) -> Result<DeploymentResult, DeploymentError> {
        let fail = |failure| DeploymentError::new(&self.contract, failure);

        let args = self.resolve_args(&self.args, ctx, currencies, prior)?;
        tracing::debug!(step = %self.contract, ?args, "Deploying contract");

        let instance = gateway
            .deploy(ctx.deployer, &self.contract, &args)
            .await
            .map_err(|e| fail(DeploymentFailure::from_deploy(e)))?;

        for call in &self.initializers {
            let args = self
                .resolve_args(&call.args, ctx, currencies, prior)
                .map_err(|e| e.left_at(instance.address))?;
            gateway
                .call(ctx.deployer, &instance, &call.method, &args)
                .await
                .map_err(|e| {
                    fail(DeploymentFailure::from_initializer(&call.method, e))
                        .left_at(instance.address)
                })?;
            tracing::debug!(step = %self.contract, method = %call.method, "Initializer confirmed");
        }

        announce(&self.contract, &self.log_key, instance.address);

        // The contract is deployed and initialized at this point, a failed
        // read-back must not drop it from the results.
        if let Err(failure) = self.run_checks(gateway, &instance).await {
            tracing::warn!(
                step = %self.contract,
                address = %instance.address,
                error = %failure,
                "Post-deploy check failed"
            );
        }

        Ok(DeploymentResult {
            contract: self.contract.clone(),
            log_key: self.log_key.clone(),
            address: instance.address,
            order: prior.len(),
            deployed_at: Utc::now(),
        })
    }

    /// Re-attach to the deployed address and query each check method.
    async fn run_checks<G: ContractGateway>(
        &self,
        gateway: &G,
        instance: &ContractInstance,
    ) -> Result<(), DeploymentFailure> {
        if self.checks.is_empty() {
            return Ok(());
        }
        let attached = gateway
            .instance_at(&instance.contract, instance.address)
            .await
            .map_err(|e| DeploymentFailure::from_initializer("attach", e))?;

        for method in &self.checks {
            let values = gateway
                .query(&attached, method, &[])
                .await
                .map_err(|e| DeploymentFailure::from_initializer(method, e))?;
            tracing::info!(
                step = %self.contract,
                method = %method,
                value = %values.join(", "),
                "Post-deploy check"
            );
        }
        Ok(())
    }
}

/// The outcome of one successful step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub contract: String,
    pub log_key: String,
    pub address: Address,
    /// Position of the step in the run, starting at zero.
    pub order: usize,
    pub deployed_at: DateTime<Utc>,
}

/// Results of the current run in completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deref)]
pub struct DeploymentResults(Vec<DeploymentResult>);

impl DeploymentResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the result of a step by contract name.
    pub fn get(&self, contract: &str) -> Option<&DeploymentResult> {
        self.0.iter().find(|result| result.contract == contract)
    }

    pub fn contains(&self, contract: &str) -> bool {
        self.get(contract).is_some()
    }

    /// Record a result. A step that already has one is a logic error upstream.
    pub(crate) fn record(&mut self, result: DeploymentResult) {
        debug_assert!(!self.contains(&result.contract), "step recorded twice");
        self.0.push(result);
    }

    pub fn into_inner(self) -> Vec<DeploymentResult> {
        self.0
    }
}

impl From<Vec<DeploymentResult>> for DeploymentResults {
    fn from(results: Vec<DeploymentResult>) -> Self {
        Self(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::NetworkMode;

    fn context() -> EnvironmentContext {
        EnvironmentContext {
            network: "localhost1".to_string(),
            chain_id: 1337,
            mode: NetworkMode::Persistent,
            deployer: Address::with_last_byte(1),
            signers: None,
        }
    }

    fn result(contract: &str, last_byte: u8) -> DeploymentResult {
        DeploymentResult {
            contract: contract.to_string(),
            log_key: format!("{}_ADDRESS", contract.to_uppercase()),
            address: Address::with_last_byte(last_byte),
            order: 0,
            deployed_at: Utc::now(),
        }
    }

    #[test]
    fn test_dependencies_include_initializer_args() {
        let step = DeploymentStep::new("Market", "MARKET_ADDRESS", Stage::RemainingFactories)
            .arg(StepArg::AddressOf("TipERC721".into()))
            .initializer(
                "initialize",
                vec![StepArg::Currency("USDC".into()), StepArg::AddressOf("FNFTNestable".into())],
            );

        let steps: Vec<_> = step.step_dependencies().collect();
        assert_eq!(steps, vec!["TipERC721", "FNFTNestable"]);
        let currencies: Vec<_> = step.currency_dependencies().collect();
        assert_eq!(currencies, vec!["USDC"]);
    }

    #[test]
    fn test_resolve_args() {
        let ctx = context();
        let mut currencies = CurrencyRegistry::default();
        currencies.register("USDC", Address::with_last_byte(7));
        let prior = DeploymentResults::from(vec![result("TipERC721", 9)]);

        assert_eq!(
            StepArg::literal("Fab NFT").resolve(&ctx, &currencies, &prior).unwrap(),
            "Fab NFT"
        );
        assert_eq!(
            StepArg::AddressOf("TipERC721".into())
                .resolve(&ctx, &currencies, &prior)
                .unwrap(),
            Address::with_last_byte(9).to_string()
        );
        assert_eq!(
            StepArg::Currency("USDC".into())
                .resolve(&ctx, &currencies, &prior)
                .unwrap(),
            Address::with_last_byte(7).to_string()
        );
        assert!(matches!(
            StepArg::Currency("DAI".into()).resolve(&ctx, &currencies, &prior),
            Err(DeploymentFailure::MissingInput(_))
        ));
        assert!(matches!(
            StepArg::Signer(2).resolve(&ctx, &currencies, &prior),
            Err(DeploymentFailure::MissingInput(_))
        ));
    }

    #[test]
    fn test_results_lookup() {
        let mut results = DeploymentResults::new();
        results.record(result("TipERC721", 1));
        results.record(result("TipERC1155", 2));
        assert_eq!(results.len(), 2);
        assert!(results.contains("TipERC1155"));
        assert!(!results.contains("FNFTNestable"));
        assert_eq!(
            results.get("TipERC721").map(|r| r.address),
            Some(Address::with_last_byte(1))
        );
    }
}
