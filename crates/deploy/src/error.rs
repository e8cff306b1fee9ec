//! Error types for deployment runs.
//!
//! Plumbing code returns [`anyhow::Result`] with context chains. The seams of a
//! run (gateway, step, plan, orchestrator) return the typed errors below so the
//! process boundary can tell a configuration problem from a partial run.

use std::time::Duration;

use alloy_core::primitives::Address;
use thiserror::Error;

use crate::step::DeploymentResult;

/// Failure reported by a [`ContractGateway`](crate::gateway::ContractGateway).
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The runtime refused or reverted the operation.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The transaction was sent but no receipt arrived in time.
    #[error("transaction {tx} not confirmed after {waited:?}")]
    Timeout { tx: String, waited: Duration },
    /// The endpoint could not be reached or answered garbage.
    #[error("transport: {0}")]
    Transport(String),
}

impl GatewayError {
    /// Wrap an [`anyhow::Error`] as a transport failure, keeping its context chain.
    pub fn transport(err: anyhow::Error) -> Self {
        Self::Transport(format!("{err:#}"))
    }

    /// Wrap an [`anyhow::Error`] as a rejection, keeping its context chain.
    pub fn rejected(err: anyhow::Error) -> Self {
        Self::Rejected(format!("{err:#}"))
    }
}

/// Why a single step failed.
#[derive(Debug, Error)]
pub enum DeploymentFailure {
    #[error("gateway rejected deployment: {0}")]
    GatewayRejected(#[source] GatewayError),
    #[error("initializer `{method}` failed: {source}")]
    InitializerFailed {
        method: String,
        #[source]
        source: GatewayError,
    },
    #[error("timed out: {0}")]
    Timeout(#[source] GatewayError),
    #[error("missing input: {0}")]
    MissingInput(String),
}

impl DeploymentFailure {
    /// Classify a gateway error raised while deploying.
    pub fn from_deploy(err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout { .. } => Self::Timeout(err),
            other => Self::GatewayRejected(other),
        }
    }

    /// Classify a gateway error raised by a post-deploy call.
    pub fn from_initializer(method: &str, err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout { .. } => Self::Timeout(err),
            other => Self::InitializerFailed {
                method: method.to_string(),
                source: other,
            },
        }
    }
}

/// A step failed. No retry happens: the contract may already exist on chain.
#[derive(Debug, Error)]
#[error("step `{step}` failed: {failure}{}", left_on_chain(.deployed))]
pub struct DeploymentError {
    pub step: String,
    #[source]
    pub failure: DeploymentFailure,
    /// Contract the step deployed before failing.
    pub deployed: Option<Address>,
}

impl DeploymentError {
    pub fn new(step: impl Into<String>, failure: DeploymentFailure) -> Self {
        Self {
            step: step.into(),
            failure,
            deployed: None,
        }
    }

    /// Record the address of the contract the step left behind.
    pub fn left_at(mut self, address: Address) -> Self {
        self.deployed = Some(address);
        self
    }
}

fn left_on_chain(deployed: &Option<Address>) -> String {
    deployed
        .map(|address| format!(" (contract left on chain at {address})"))
        .unwrap_or_default()
}

/// Definition-time problems with a [`DeploymentPlan`](crate::plan::DeploymentPlan).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("step `{0}` is defined more than once")]
    DuplicateStep(String),
    #[error("step `{step}` depends on unknown step `{dependency}`")]
    UnknownDependency { step: String, dependency: String },
    #[error("step `{step}` depends on `{dependency}`, which runs after it")]
    ForwardDependency { step: String, dependency: String },
    #[error("step `{step}` in stage {stage} follows a step in stage {previous}")]
    StageRegression {
        step: String,
        stage: String,
        previous: String,
    },
    #[error("no step named `{0}`")]
    UnknownStep(String),
}

/// Steps that completed before a later step failed.
///
/// The completed contracts are already on chain; an operator resumes from
/// `failed.step` instead of re-running the whole plan.
#[derive(Debug)]
pub struct PartialRun {
    pub completed: Vec<DeploymentResult>,
    pub failed: DeploymentError,
    pub skipped: Vec<String>,
}

/// Terminal outcome of a failed run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration error: {0:#}")]
    Configuration(anyhow::Error),
    #[error("invalid deployment plan: {0}")]
    InvalidPlan(#[from] PlanError),
    #[error("currency setup failed: {0}")]
    CurrencySetup(#[source] DeploymentError),
    #[error(
        "run aborted after {} completed step(s): {}",
        .0.completed.len(),
        .0.failed
    )]
    Partial(PartialRun),
    /// Every step completed but the manifest could not be written.
    #[error("failed to write manifest: {0:#}")]
    Manifest(anyhow::Error),
}

impl RunError {
    /// Results that are already durable on chain, if any.
    pub fn completed(&self) -> &[DeploymentResult] {
        match self {
            RunError::Partial(partial) => &partial.completed,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_classified_as_timeout() {
        let err = GatewayError::Timeout {
            tx: "0xabc".to_string(),
            waited: Duration::from_secs(3),
        };
        assert!(matches!(
            DeploymentFailure::from_deploy(err),
            DeploymentFailure::Timeout(_)
        ));
    }

    #[test]
    fn test_initializer_rejection_keeps_method() {
        let err = GatewayError::Rejected("execution reverted".to_string());
        match DeploymentFailure::from_initializer("initialize", err) {
            DeploymentFailure::InitializerFailed { method, .. } => {
                assert_eq!(method, "initialize")
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[test]
    fn test_deployment_error_message_names_step() {
        let err = DeploymentError::new(
            "TipERC721",
            DeploymentFailure::GatewayRejected(GatewayError::Rejected("out of gas".into())),
        );
        let msg = err.to_string();
        assert!(msg.contains("TipERC721"));
        assert!(msg.contains("out of gas"));
        assert!(!msg.contains("left on chain"));
    }

    #[test]
    fn test_deployment_error_message_names_leftover_contract() {
        let address = Address::with_last_byte(7);
        let err = DeploymentError::new(
            "SimpleToken",
            DeploymentFailure::from_initializer(
                "transfer",
                GatewayError::Rejected("execution reverted".into()),
            ),
        )
        .left_at(address);
        assert_eq!(err.deployed, Some(address));
        assert!(err.to_string().contains(&address.to_string()), "{err}");
    }
}
