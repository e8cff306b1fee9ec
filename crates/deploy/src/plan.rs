//! Orchestration definitions.
//!
//! The deployment order is fixed by hand and grouped in stages:
//! CurrencySetup -> Factories -> Tokens -> Nestables -> RemainingFactories.
//! A plan is validated once, before anything is deployed, so a mis-ordered
//! definition is rejected instead of failing half-way through a run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    error::PlanError,
    step::{DeploymentStep, StepArg},
};

/// Deployment stages in execution order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Stage {
    /// Handled by the environment selector before any plan step.
    CurrencySetup,
    Factories,
    Tokens,
    Nestables,
    RemainingFactories,
}

/// Named, ordered list of deploy steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub name: String,
    pub steps: Vec<DeploymentStep>,
}

impl DeploymentPlan {
    pub fn new(name: impl Into<String>, steps: Vec<DeploymentStep>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// The complete reference sequence.
    pub fn full() -> Self {
        Self::new(
            "all",
            vec![
                DeploymentStep::new(
                    "FNFTFactoryTipERC721",
                    "FNFTFACTORY_TIPNFTERC721_ADDRESS",
                    Stage::Factories,
                ),
                DeploymentStep::new(
                    "FNFTFactoryTipERC1155",
                    "FNFTFACTORY_TIPNFTERC1155_ADDRESS",
                    Stage::Factories,
                ),
                tip_erc721("Fab NFT", "FBNFT1"),
                DeploymentStep::new("TipERC1155", "TIPERC1155_ADDRESS", Stage::Tokens)
                    .initializer("initialize", vec![]),
                DeploymentStep::new("FNFTNestable", "NESTABLENFT_ADDRESS", Stage::Nestables),
                DeploymentStep::new(
                    "FNFTNestableERC1155",
                    "NESTABLENFT_ERC1155_ADDRESS",
                    Stage::Nestables,
                ),
                DeploymentStep::new(
                    "FNFTFactoryABTToken",
                    "FNFTFACTORY_ABT_TOKEN_ADDRESS",
                    Stage::RemainingFactories,
                ),
                DeploymentStep::new(
                    "FNFTFactoryFNFTNestable",
                    "FNFTFACTORY_FNFT_NESTABLE_ADDRESS",
                    Stage::RemainingFactories,
                ),
                DeploymentStep::new(
                    "FNFTFactoryFNFTNestableERC1155",
                    "FNFTFACTORY_FNFT_NESTABLE_ERC1155_ADDRESS",
                    Stage::RemainingFactories,
                ),
            ],
        )
    }

    /// The short sequence used to seed a snapshot: one tip token and one nestable.
    pub fn snaps() -> Self {
        Self::new(
            "snaps",
            vec![
                tip_erc721("Nestable NFT", "NNFT1"),
                DeploymentStep::new("FNFTNestable", "NESTABLENFT_ADDRESS", Stage::Nestables),
            ],
        )
    }

    /// A plan made of one step of the full sequence.
    pub fn single(contract: &str) -> Result<Self, PlanError> {
        let step = Self::full()
            .steps
            .into_iter()
            .find(|step| step.contract.eq_ignore_ascii_case(contract))
            .ok_or_else(|| PlanError::UnknownStep(contract.to_string()))?;
        Ok(Self::new(step.contract.clone(), vec![step]))
    }

    pub fn step(&self, contract: &str) -> Option<&DeploymentStep> {
        self.steps.iter().find(|step| step.contract == contract)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check the definition before running it.
    ///
    /// - step names are unique;
    /// - a step only consumes addresses of steps defined before it;
    /// - stages never go backwards.
    pub fn validate(&self) -> Result<(), PlanError> {
        let positions: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| (step.contract.as_str(), i))
            .collect();

        let mut previous: Option<Stage> = None;
        for (index, step) in self.steps.iter().enumerate() {
            if positions.get(step.name()) != Some(&index) {
                return Err(PlanError::DuplicateStep(step.contract.clone()));
            }

            if let Some(previous) = previous.filter(|previous| step.stage < *previous) {
                return Err(PlanError::StageRegression {
                    step: step.contract.clone(),
                    stage: step.stage.to_string(),
                    previous: previous.to_string(),
                });
            }
            previous = Some(step.stage);

            for dependency in step.step_dependencies() {
                match positions.get(dependency) {
                    None => {
                        return Err(PlanError::UnknownDependency {
                            step: step.contract.clone(),
                            dependency: dependency.to_string(),
                        });
                    }
                    Some(&at) if at >= index => {
                        return Err(PlanError::ForwardDependency {
                            step: step.contract.clone(),
                            dependency: dependency.to_string(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Currency symbols consumed by any step, deduplicated.
    pub fn required_currencies(&self) -> Vec<&str> {
        let mut symbols: Vec<&str> = self
            .steps
            .iter()
            .flat_map(|step| step.currency_dependencies())
            .collect();
        symbols.sort_unstable();
        symbols.dedup();
        symbols
    }
}

/// TipERC721 with its name/symbol initializer and a `name` read-back.
fn tip_erc721(name: &str, symbol: &str) -> DeploymentStep {
    DeploymentStep::new("TipERC721", "TIPERC721_ADDRESS", Stage::Tokens)
        .initializer(
            "initialize",
            vec![StepArg::literal(name), StepArg::literal(symbol)],
        )
        .check("name")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_plan_order() {
        let plan = DeploymentPlan::full();
        plan.validate().unwrap();

        let names: Vec<_> = plan.steps.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "FNFTFactoryTipERC721",
                "FNFTFactoryTipERC1155",
                "TipERC721",
                "TipERC1155",
                "FNFTNestable",
                "FNFTNestableERC1155",
                "FNFTFactoryABTToken",
                "FNFTFactoryFNFTNestable",
                "FNFTFactoryFNFTNestableERC1155",
            ]
        );
        assert!(plan.required_currencies().is_empty());
    }

    #[test]
    fn test_full_plan_initializers() {
        let plan = DeploymentPlan::full();
        let tip721 = plan.step("TipERC721").unwrap();
        assert_eq!(tip721.initializers.len(), 1);
        assert_eq!(
            tip721.initializers[0].args,
            vec![StepArg::literal("Fab NFT"), StepArg::literal("FBNFT1")]
        );
        assert_eq!(tip721.checks, vec!["name".to_string()]);

        let tip1155 = plan.step("TipERC1155").unwrap();
        assert_eq!(tip1155.initializers[0].method, "initialize");
        assert!(tip1155.initializers[0].args.is_empty());
    }

    #[test]
    fn test_snaps_plan() {
        let plan = DeploymentPlan::snaps();
        plan.validate().unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(
            plan.steps[0].initializers[0].args,
            vec![StepArg::literal("Nestable NFT"), StepArg::literal("NNFT1")]
        );
    }

    #[test]
    fn test_single_step_plan() {
        let plan = DeploymentPlan::single("tiperc1155").unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps[0].log_key, "TIPERC1155_ADDRESS");
        assert_eq!(
            DeploymentPlan::single("Nope"),
            Err(PlanError::UnknownStep("Nope".to_string()))
        );
    }

    #[test]
    fn test_duplicate_step_is_rejected() {
        let plan = DeploymentPlan::new(
            "dup",
            vec![
                DeploymentStep::new("A", "A_ADDRESS", Stage::Factories),
                DeploymentStep::new("A", "A_ADDRESS", Stage::Factories),
            ],
        );
        assert_eq!(plan.validate(), Err(PlanError::DuplicateStep("A".into())));
    }

    #[test]
    fn test_forward_dependency_is_rejected() {
        let plan = DeploymentPlan::new(
            "forward",
            vec![
                DeploymentStep::new("B", "B_ADDRESS", Stage::Factories)
                    .arg(StepArg::AddressOf("A".into())),
                DeploymentStep::new("A", "A_ADDRESS", Stage::Factories),
            ],
        );
        assert_eq!(
            plan.validate(),
            Err(PlanError::ForwardDependency {
                step: "B".into(),
                dependency: "A".into()
            })
        );
    }

    #[test]
    fn test_self_dependency_is_rejected() {
        let plan = DeploymentPlan::new(
            "self",
            vec![DeploymentStep::new("A", "A_ADDRESS", Stage::Factories)
                .initializer("setSelf", vec![StepArg::AddressOf("A".into())])],
        );
        assert!(matches!(
            plan.validate(),
            Err(PlanError::ForwardDependency { .. })
        ));
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let plan = DeploymentPlan::new(
            "unknown",
            vec![DeploymentStep::new("B", "B_ADDRESS", Stage::Tokens)
                .arg(StepArg::AddressOf("Ghost".into()))],
        );
        assert!(matches!(
            plan.validate(),
            Err(PlanError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_stage_regression_is_rejected() {
        let plan = DeploymentPlan::new(
            "regression",
            vec![
                DeploymentStep::new("TipERC721", "TIPERC721_ADDRESS", Stage::Tokens),
                DeploymentStep::new("Factory", "FACTORY_ADDRESS", Stage::Factories),
            ],
        );
        match plan.validate() {
            Err(PlanError::StageRegression { stage, previous, .. }) => {
                assert_eq!(stage, "factories");
                assert_eq!(previous, "tokens");
            }
            other => panic!("unexpected validation result: {other:?}"),
        }
    }

    #[test]
    fn test_stage_order() {
        use strum::IntoEnumIterator;
        let stages: Vec<_> = Stage::iter().collect();
        let mut sorted = stages.clone();
        sorted.sort();
        assert_eq!(stages, sorted);
        assert_eq!(Stage::RemainingFactories.to_string(), "remaining-factories");
    }
}
