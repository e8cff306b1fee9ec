//! fnft-deploy - Deployment orchestration for the FNFT contract suite.
//!
//! A run selects its environment (ephemeral test network or persistent
//! network), sets up the currencies the contracts settle in, then executes a
//! fixed plan of deploy steps one at a time. Every deployed address is
//! published as a `Deploy: KEY=address` line on stdout.

pub mod config;
pub mod environment;
pub mod error;
pub mod gateway;
pub mod manifest;
pub mod orchestrator;
pub mod plan;
pub mod rpc;
pub mod step;

pub use config::{CONFIG_FILENAME, DeployConfig, NetworkConfig};
pub use environment::{
    CurrencyRegistry, EnvironmentContext, EnvironmentSelector, NetworkMode, Signers,
};
pub use error::{
    DeploymentError, DeploymentFailure, GatewayError, PartialRun, PlanError, RunError,
};
pub use gateway::{
    ArtifactStore, ContractArtifact, ContractGateway, ContractInstance, MnemonicAccounts,
    NodeGateway, SignerProvider, deployer_from_key,
};
pub use manifest::{DeploymentManifest, summary_table};
pub use orchestrator::{Orchestrator, RunReport};
pub use plan::{DeploymentPlan, Stage};
pub use step::{DeploymentResult, DeploymentResults, DeploymentStep, InitializerCall, StepArg};
