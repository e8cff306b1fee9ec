use clap::{Parser, Subcommand};
use fnft_deploy::{CONFIG_FILENAME, DeploymentPlan, PlanError};
use tracing::level_filters::LevelFilter;
use url::Url;

/// Where ephemeral-run signer identities come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum SignerSource {
    /// Accounts unlocked on the node (`eth_accounts`).
    Node,
    /// Accounts derived from the configured mnemonic.
    Mnemonic,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Deploy the complete contract suite.
    All,
    /// Deploy the short sequence used to seed a snapshot.
    Snaps,
    /// Deploy a single contract of the suite.
    Step {
        /// Contract name, matched case-insensitively.
        contract: String,
    },
    /// Print the deployment plan without deploying anything.
    Plan,
}

impl Command {
    pub fn plan(&self) -> Result<DeploymentPlan, PlanError> {
        match self {
            Command::All | Command::Plan => Ok(DeploymentPlan::full()),
            Command::Snaps => Ok(DeploymentPlan::snaps()),
            Command::Step { contract } => DeploymentPlan::single(contract),
        }
    }
}

#[derive(Parser)]
#[command(name = "fnft")]
#[command(author, version, about = "Deploy the FNFT contract suite")]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "FNFT_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file. A missing file is not an error.
    #[arg(long, alias = "conf", env = "FNFT_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: String,

    /// The target network, a key of the configured networks.
    ///
    /// The ephemeral test network (`hardhat` by default) deploys a mock
    /// stablecoin and funds test accounts. Any other network is persistent.
    #[arg(short, long, env = "TEST_NETWORK")]
    pub network: Option<String>,

    /// Override the JSON-RPC endpoint of the selected network.
    #[arg(long, alias = "rpc", env = "FNFT_RPC_URL")]
    pub rpc_url: Option<Url>,

    /// Directory holding compiled contract artifacts.
    #[arg(long, env = "FNFT_ARTIFACTS")]
    pub artifacts: Option<String>,

    /// Write a JSON manifest of the run to this path, also on partial failure.
    #[arg(long, env = "FNFT_MANIFEST")]
    pub manifest: Option<String>,

    /// Resume from a manifest written by an earlier run.
    ///
    /// Recorded contracts are re-attached and not deployed again.
    #[arg(long)]
    pub resume: Option<String>,

    /// Where the signer identities of an ephemeral run come from.
    #[arg(long, env = "FNFT_SIGNERS", default_value_t = SignerSource::Node)]
    pub signers: SignerSource,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_all() {
        let cli = Cli::try_parse_from(["fnft"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.signers, SignerSource::Node);
        assert_eq!(cli.config, CONFIG_FILENAME);
    }

    #[test]
    fn test_step_command() {
        let cli = Cli::try_parse_from(["fnft", "--signers", "mnemonic", "step", "TipERC1155"])
            .unwrap();
        assert_eq!(cli.signers, SignerSource::Mnemonic);
        let plan = cli.command.unwrap().plan().unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps[0].contract, "TipERC1155");
    }

    #[test]
    fn test_unknown_step_is_an_error() {
        let command = Command::Step {
            contract: "Nope".to_string(),
        };
        assert!(command.plan().is_err());
    }
}
