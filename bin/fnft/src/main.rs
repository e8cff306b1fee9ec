//! fnft deploys the FNFT contract suite to a test or persistent network.

mod cli;

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command, SignerSource};
use fnft_deploy::{
    DeployConfig, DeploymentManifest, DeploymentPlan, MnemonicAccounts, NodeGateway,
    Orchestrator, RunError, SignerProvider, summary_table,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Variables from `.env` must be visible to clap and to the config loader.
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    // Initialize the logger. Stdout is reserved for the `Deploy:` lines.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(std::io::stderr)
        .init();

    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
        Err(err) if err.not_found() => tracing::trace!("No .env file"),
        Err(err) => tracing::warn!(error = %err, "Failed to read .env file"),
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let command = cli.command.clone().unwrap_or(Command::All);
    let plan = command.plan()?;

    if command == Command::Plan {
        plan.validate()?;
        println!("{}", plan_table(&plan));
        return Ok(());
    }

    let config = load_config(&cli)?;
    let gateway = NodeGateway::from_config(&config)?;
    gateway.verify_chain().await?;

    let previous = cli
        .resume
        .as_deref()
        .map(|path| DeploymentManifest::load_from_file(Path::new(path)))
        .transpose()?;

    tracing::info!(
        network = %config.network,
        rpc_url = %gateway.url(),
        plan = %plan.name,
        signers = %cli.signers,
        resume = previous.is_some(),
        "Deploying FNFT contracts"
    );

    let manifest = cli.manifest.as_deref().map(PathBuf::from);
    match cli.signers {
        SignerSource::Node => {
            deploy(&config, &gateway, &gateway, &plan, manifest, previous.as_ref()).await
        }
        SignerSource::Mnemonic => {
            let accounts = MnemonicAccounts::new(config.mnemonic.clone());
            deploy(&config, &gateway, &accounts, &plan, manifest, previous.as_ref()).await
        }
    }
}

/// Assemble the configuration and apply command-line overrides.
fn load_config(cli: &Cli) -> Result<DeployConfig> {
    let path = PathBuf::from(&cli.config);
    let mut config = DeployConfig::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    if let Some(network) = &cli.network {
        config.network = network.clone();
    }
    if let Some(artifacts) = &cli.artifacts {
        config.artifacts = PathBuf::from(artifacts);
    }
    if let Some(url) = &cli.rpc_url {
        config.set_rpc_url(url.clone())?;
    }
    Ok(config)
}

async fn deploy<S: SignerProvider>(
    config: &DeployConfig,
    gateway: &NodeGateway,
    signers: &S,
    plan: &DeploymentPlan,
    manifest: Option<PathBuf>,
    previous: Option<&DeploymentManifest>,
) -> Result<()> {
    let mut orchestrator = Orchestrator::new(config, gateway, signers);
    if let Some(path) = manifest {
        orchestrator = orchestrator.manifest_path(path);
    }

    let outcome = match previous {
        Some(previous) => orchestrator.resume(plan, previous).await,
        None => orchestrator.run(plan).await,
    };

    match outcome {
        Ok(report) => {
            eprintln!("{}", summary_table(&report.results, None));
            Ok(())
        }
        Err(RunError::Partial(partial)) => {
            eprintln!(
                "{}",
                summary_table(&partial.completed, Some(partial.failed.step.as_str()))
            );
            if !partial.skipped.is_empty() {
                tracing::warn!(skipped = ?partial.skipped, "Steps not attempted");
            }
            Err(RunError::Partial(partial).into())
        }
        Err(err) => Err(err.into()),
    }
}

fn plan_table(plan: &DeploymentPlan) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["#", "Stage", "Contract", "Log key", "Initializers"]);

    for (index, step) in plan.steps.iter().enumerate() {
        let initializers = step
            .initializers
            .iter()
            .map(|call| call.method.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            (index + 1).to_string(),
            step.stage.to_string(),
            step.contract.clone(),
            step.log_key.clone(),
            initializers,
        ]);
    }
    table
}
