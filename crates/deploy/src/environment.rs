//! Environment selection: which network, which signers, which currencies.
//!
//! On the ephemeral test network a mock stablecoin is deployed and two test
//! accounts are funded. On any other network pre-existing currency contracts
//! are read from the configuration.

use std::{collections::BTreeMap, str::FromStr};

use alloy_core::primitives::Address;
use anyhow::Context;
use derive_more::Deref;
use serde::{Deserialize, Serialize};

use crate::{
    config::DeployConfig,
    error::{DeploymentError, DeploymentFailure, RunError},
    gateway::{ContractGateway, SignerProvider, deployer_from_key},
    step::announce,
};

/// Contract deployed as the mock stablecoin.
pub const MOCK_TOKEN_CONTRACT: &str = "SimpleToken";
pub const MOCK_TOKEN_NAME: &str = "USD Coin";
pub const MOCK_TOKEN_SYMBOL: &str = "USDC";
pub const MOCK_TOKEN_DECIMALS: u8 = 6;
/// Total supply minted to the admin, in base units.
pub const MOCK_TOKEN_SUPPLY: &str = "100000000000000000000000000";
/// Amount sent to each funded test account, in base units.
pub const TEST_ACCOUNT_ALLOCATION: &str = "100000000000";
/// Log key of the mock stablecoin address.
pub const MOCK_TOKEN_LOG_KEY: &str = "USDC_TOKEN_ADDRESS";

/// Operating mode of a run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum NetworkMode {
    EphemeralTest,
    Persistent,
}

/// Signer identities of an ephemeral run.
///
/// - Index 0: admin, deploys everything and holds the mock token supply
/// - Index 1: auxiliary account, unfunded
/// - Index 2, 3: auxiliary accounts funded with the mock token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signers {
    pub admin: Address,
    pub auxiliary: [Address; 3],
}

impl Signers {
    /// The number of accounts an ephemeral run needs.
    pub const REQUIRED: usize = 4;

    pub fn from_accounts(accounts: &[Address]) -> anyhow::Result<Self> {
        match accounts {
            [admin, a1, a2, a3, ..] => Ok(Self {
                admin: *admin,
                auxiliary: [*a1, *a2, *a3],
            }),
            _ => anyhow::bail!(
                "Not enough signer accounts. Need at least {}, got {}",
                Self::REQUIRED,
                accounts.len()
            ),
        }
    }

    /// Accounts that receive the test allocation.
    pub fn funded(&self) -> [Address; 2] {
        [self.auxiliary[1], self.auxiliary[2]]
    }

    pub fn get(&self, index: usize) -> Option<Address> {
        match index {
            0 => Some(self.admin),
            i => self.auxiliary.get(i - 1).copied(),
        }
    }
}

/// Immutable facts about the run, shared by every step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentContext {
    pub network: String,
    pub chain_id: u64,
    pub mode: NetworkMode,
    /// Account that sends every deployment and initializer.
    pub deployer: Address,
    /// Only present in ephemeral mode.
    pub signers: Option<Signers>,
}

impl EnvironmentContext {
    pub fn signer(&self, index: usize) -> Option<Address> {
        self.signers.as_ref().and_then(|s| s.get(index))
    }
}

/// Currency contracts available to the run, keyed by upper-case symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deref, Serialize, Deserialize)]
pub struct CurrencyRegistry(BTreeMap<String, Address>);

impl CurrencyRegistry {
    pub fn register(&mut self, symbol: &str, address: Address) {
        self.0.insert(symbol.to_ascii_uppercase(), address);
    }

    pub fn symbols(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

impl From<BTreeMap<String, Address>> for CurrencyRegistry {
    fn from(map: BTreeMap<String, Address>) -> Self {
        let mut registry = Self::default();
        for (symbol, address) in map {
            registry.register(&symbol, address);
        }
        registry
    }
}

/// Resolves the [`EnvironmentContext`] and the [`CurrencyRegistry`] of a run.
pub struct EnvironmentSelector<'a> {
    config: &'a DeployConfig,
}

impl<'a> EnvironmentSelector<'a> {
    pub fn new(config: &'a DeployConfig) -> Self {
        Self { config }
    }

    pub fn mode(&self) -> NetworkMode {
        if self.config.is_ephemeral() {
            NetworkMode::EphemeralTest
        } else {
            NetworkMode::Persistent
        }
    }

    /// Resolve the context and populate the currencies.
    pub async fn resolve<G, S>(
        &self,
        gateway: &G,
        signers: &S,
    ) -> Result<(EnvironmentContext, CurrencyRegistry), RunError>
    where
        G: ContractGateway,
        S: SignerProvider,
    {
        let ctx = self.context(signers).await?;
        let currencies = self.currencies(&ctx, gateway).await?;
        Ok((ctx, currencies))
    }

    /// Build the context. Any failure here is fatal and happens before the
    /// first deployment.
    pub async fn context<S: SignerProvider>(
        &self,
        signers: &S,
    ) -> Result<EnvironmentContext, RunError> {
        let chain_id = self
            .config
            .network()
            .map_err(RunError::Configuration)?
            .chain_id;
        let mode = self.mode();

        let (deployer, signers) = match mode {
            NetworkMode::EphemeralTest => {
                let accounts = signers
                    .accounts()
                    .await
                    .context("Failed to acquire signer accounts")
                    .map_err(RunError::Configuration)?;
                let signers = Signers::from_accounts(&accounts).map_err(RunError::Configuration)?;

                tracing::info!(
                    network = %self.config.network,
                    admin = %signers.admin,
                    account2 = %signers.auxiliary[1],
                    account3 = %signers.auxiliary[2],
                    "Ephemeral test network, signers acquired"
                );
                (signers.admin, Some(signers))
            }
            NetworkMode::Persistent => (self.persistent_deployer()?, None),
        };

        Ok(EnvironmentContext {
            network: self.config.network.clone(),
            chain_id,
            mode,
            deployer,
            signers,
        })
    }

    fn persistent_deployer(&self) -> Result<Address, RunError> {
        if let Some(raw) = self.config.deployer_address.as_deref().filter(|s| !s.is_empty()) {
            return Address::from_str(raw.trim())
                .with_context(|| format!("DEPLOYER_ADDRESS `{raw}` is not an address"))
                .map_err(RunError::Configuration);
        }
        match self.config.private_key.as_deref().filter(|s| !s.is_empty()) {
            Some(key) => deployer_from_key(key).map_err(RunError::Configuration),
            None => Err(RunError::Configuration(anyhow::anyhow!(
                "Network `{}` needs a deployer: set PRIVATE_KEY or DEPLOYER_ADDRESS",
                self.config.network
            ))),
        }
    }

    /// Populate the currency registry for `ctx`.
    pub async fn currencies<G: ContractGateway>(
        &self,
        ctx: &EnvironmentContext,
        gateway: &G,
    ) -> Result<CurrencyRegistry, RunError> {
        let registry = match (&ctx.mode, &ctx.signers) {
            (NetworkMode::EphemeralTest, Some(signers)) => {
                self.deploy_mock_stablecoin(ctx, signers, gateway)
                    .await
                    .map_err(RunError::CurrencySetup)?
            }
            (NetworkMode::EphemeralTest, None) => {
                return Err(RunError::Configuration(anyhow::anyhow!(
                    "Ephemeral run without signers"
                )));
            }
            (NetworkMode::Persistent, _) => self.configured_currencies()?,
        };

        tracing::info!(currencies = ?registry.symbols(), "Currencies resolved");
        Ok(registry)
    }

    /// Deploy the mock stablecoin and fund the test accounts.
    async fn deploy_mock_stablecoin<G: ContractGateway>(
        &self,
        ctx: &EnvironmentContext,
        signers: &Signers,
        gateway: &G,
    ) -> Result<CurrencyRegistry, DeploymentError> {
        let fail = |failure| DeploymentError::new(MOCK_TOKEN_CONTRACT, failure);

        let token = gateway
            .deploy(
                ctx.deployer,
                MOCK_TOKEN_CONTRACT,
                &[
                    MOCK_TOKEN_NAME.to_string(),
                    MOCK_TOKEN_SYMBOL.to_string(),
                    MOCK_TOKEN_DECIMALS.to_string(),
                    MOCK_TOKEN_SUPPLY.to_string(),
                ],
            )
            .await
            .map_err(|e| fail(DeploymentFailure::from_deploy(e)))?;

        for account in signers.funded() {
            gateway
                .call(
                    ctx.deployer,
                    &token,
                    "transfer",
                    &[account.to_string(), TEST_ACCOUNT_ALLOCATION.to_string()],
                )
                .await
                .map_err(|e| {
                    fail(DeploymentFailure::from_initializer("transfer", e)).left_at(token.address)
                })?;
            tracing::debug!(%account, amount = TEST_ACCOUNT_ALLOCATION, "Test account funded");
        }

        announce(MOCK_TOKEN_CONTRACT, MOCK_TOKEN_LOG_KEY, token.address);

        let mut registry = CurrencyRegistry::default();
        registry.register(MOCK_TOKEN_SYMBOL, token.address);
        Ok(registry)
    }

    /// Read pre-existing currency addresses. Absent or empty entries are skipped.
    fn configured_currencies(&self) -> Result<CurrencyRegistry, RunError> {
        let mut registry = CurrencyRegistry::default();

        for symbol in &self.config.supported_currencies {
            let symbol = symbol.to_ascii_uppercase();
            let Some(raw) = self
                .config
                .currency_addresses
                .get(&symbol)
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
            else {
                tracing::debug!(%symbol, "No address configured, skipping currency");
                continue;
            };

            let address = Address::from_str(raw)
                .with_context(|| format!("{symbol}_TOKEN_ADDRESS `{raw}` is not an address"))
                .map_err(RunError::Configuration)?;
            registry.register(&symbol, address);
        }

        for symbol in self.config.currency_addresses.keys() {
            if !self
                .config
                .supported_currencies
                .iter()
                .any(|s| s.eq_ignore_ascii_case(symbol))
            {
                tracing::warn!(%symbol, "Ignoring address of unsupported currency");
            }
        }

        Ok(registry)
    }
}
