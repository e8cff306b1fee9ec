//! Deployment execution engine.
//!
//! Runs a validated [`DeploymentPlan`] one step at a time against an injected
//! gateway. The first failure stops the run; nothing is retried, because a
//! deployment that half-succeeded may already exist on chain.

use std::{collections::HashMap, path::PathBuf};

use anyhow::Context;

use crate::{
    config::DeployConfig,
    environment::{
        CurrencyRegistry, EnvironmentContext, EnvironmentSelector, MOCK_TOKEN_SYMBOL, NetworkMode,
    },
    error::{PartialRun, RunError},
    gateway::{ContractGateway, SignerProvider},
    manifest::DeploymentManifest,
    plan::DeploymentPlan,
    step::{DeploymentResult, DeploymentResults},
};

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub plan: String,
    pub context: EnvironmentContext,
    pub currencies: CurrencyRegistry,
    /// Every result of the plan, in order, including reused ones.
    pub results: Vec<DeploymentResult>,
    /// Steps taken over from a previous manifest instead of being deployed.
    pub reused: Vec<String>,
}

impl RunReport {
    pub fn manifest(&self) -> DeploymentManifest {
        DeploymentManifest::new(&self.context, &self.currencies, self.results.clone(), None)
    }

    /// Results deployed by this run, excluding reused ones.
    pub fn deployed(&self) -> impl Iterator<Item = &DeploymentResult> {
        self.results
            .iter()
            .filter(|r| !self.reused.contains(&r.contract))
    }
}

/// Sequences deploy steps against a contract runtime.
pub struct Orchestrator<'a, G, S> {
    config: &'a DeployConfig,
    gateway: &'a G,
    signers: &'a S,
    manifest_path: Option<PathBuf>,
}

impl<'a, G, S> Orchestrator<'a, G, S>
where
    G: ContractGateway,
    S: SignerProvider,
{
    pub fn new(config: &'a DeployConfig, gateway: &'a G, signers: &'a S) -> Self {
        Self {
            config,
            gateway,
            signers,
            manifest_path: None,
        }
    }

    /// Write a manifest at the end of every run, complete or partial.
    pub fn manifest_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest_path = Some(path.into());
        self
    }

    /// Run every step of `plan`.
    pub async fn run(&self, plan: &DeploymentPlan) -> Result<RunReport, RunError> {
        self.execute(plan, None).await
    }

    /// Run the steps of `plan` that `previous` does not already record.
    ///
    /// Recorded addresses are re-attached and verified, recorded currencies
    /// are reused as-is. No recorded step is deployed again.
    pub async fn resume(
        &self,
        plan: &DeploymentPlan,
        previous: &DeploymentManifest,
    ) -> Result<RunReport, RunError> {
        if previous.network != self.config.network {
            return Err(RunError::Configuration(anyhow::anyhow!(
                "Manifest was written for network `{}` but the run targets `{}`",
                previous.network,
                self.config.network
            )));
        }
        self.execute(plan, Some(previous)).await
    }

    async fn execute(
        &self,
        plan: &DeploymentPlan,
        previous: Option<&DeploymentManifest>,
    ) -> Result<RunReport, RunError> {
        plan.validate()?;

        let selector = EnvironmentSelector::new(self.config);
        let reuse = previous.filter(|m| !m.currencies.is_empty());

        // The mock registry is known up front, check it before deploying the token.
        if reuse.is_none() && selector.mode() == NetworkMode::EphemeralTest {
            require_currencies(plan, |symbol| symbol == MOCK_TOKEN_SYMBOL)?;
        }

        let (context, currencies) = match reuse {
            Some(manifest) => {
                let context = selector.context(self.signers).await?;
                tracing::info!(
                    currencies = ?manifest.currencies.keys().collect::<Vec<_>>(),
                    "Reusing currencies from manifest"
                );
                (context, CurrencyRegistry::from(manifest.currencies.clone()))
            }
            None => selector.resolve(self.gateway, self.signers).await?,
        };

        tracing::info!(
            plan = %plan.name,
            network = %context.network,
            chain_id = context.chain_id,
            mode = %context.mode,
            deployer = %context.deployer,
            steps = plan.len(),
            "Starting deployment run"
        );

        require_currencies(plan, |symbol| currencies.contains_key(symbol))?;

        // Every recorded deployment is verified before anything new is deployed.
        let mut recorded: HashMap<&str, &DeploymentResult> = HashMap::new();
        if let Some(manifest) = previous {
            for result in plan
                .steps
                .iter()
                .filter_map(|step| manifest.results.iter().find(|r| r.contract == step.contract))
            {
                self.gateway
                    .instance_at(&result.contract, result.address)
                    .await
                    .with_context(|| {
                        format!(
                            "Recorded {} at {} cannot be attached",
                            result.contract, result.address
                        )
                    })
                    .map_err(RunError::Configuration)?;
                recorded.insert(result.contract.as_str(), result);
            }
        }

        let mut results = DeploymentResults::new();
        let mut reused = Vec::new();
        let pending = plan.len() - recorded.len();
        let mut position = 0;
        for (index, step) in plan.steps.iter().enumerate() {
            if let Some(previous) = recorded.get(step.contract.as_str()) {
                tracing::info!(
                    step = %step.contract,
                    address = %previous.address,
                    "Reusing recorded deployment"
                );
                reused.push(step.contract.clone());
                results.record(DeploymentResult {
                    order: results.len(),
                    ..(*previous).clone()
                });
                continue;
            }

            position += 1;
            tracing::info!(
                step = %step.contract,
                stage = %step.stage,
                position,
                of = pending,
                "Deploying step"
            );

            match step
                .execute(self.gateway, &context, &currencies, &results)
                .await
            {
                Ok(result) => results.record(result),
                Err(failed) => {
                    let skipped = plan.steps[index + 1..]
                        .iter()
                        .filter(|s| !recorded.contains_key(s.contract.as_str()))
                        .map(|s| s.contract.clone())
                        .collect::<Vec<_>>();
                    tracing::error!(
                        step = %failed.step,
                        error = %failed.failure,
                        left_on_chain = ?failed.deployed,
                        completed = results.len(),
                        skipped = skipped.len(),
                        "Step failed, aborting run"
                    );

                    let completed = results.into_inner();
                    self.write_manifest(&DeploymentManifest::new(
                        &context,
                        &currencies,
                        completed.clone(),
                        Some(failed.step.clone()),
                    ));
                    return Err(RunError::Partial(PartialRun {
                        completed,
                        failed,
                        skipped,
                    }));
                }
            }
        }

        let report = RunReport {
            plan: plan.name.clone(),
            context,
            currencies,
            results: results.into_inner(),
            reused,
        };

        if let Some(path) = &self.manifest_path {
            report
                .manifest()
                .save_to_file(path)
                .map_err(RunError::Manifest)?;
        }

        tracing::info!(
            plan = %report.plan,
            deployed = report.deployed().count(),
            reused = report.reused.len(),
            "Deployment complete"
        );
        Ok(report)
    }

    /// Failures are logged, the step error stays the reported one.
    fn write_manifest(&self, manifest: &DeploymentManifest) {
        if let Some(path) = &self.manifest_path {
            if let Err(err) = manifest.save_to_file(path) {
                tracing::error!(path = %path.display(), error = %format!("{err:#}"), "Failed to save partial manifest");
            }
        }
    }
}

/// Fail unless every currency the plan consumes is available.
fn require_currencies(
    plan: &DeploymentPlan,
    available: impl Fn(&str) -> bool,
) -> Result<(), RunError> {
    match plan.required_currencies().into_iter().find(|s| !available(s)) {
        Some(symbol) => Err(RunError::Configuration(anyhow::anyhow!(
            "Plan `{}` needs currency {} but the run provides none, set {}_TOKEN_ADDRESS \
             on a persistent network",
            plan.name,
            symbol,
            symbol
        ))),
        None => Ok(()),
    }
}
