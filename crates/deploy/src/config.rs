//! Run configuration.
//!
//! A [`DeployConfig`] is built once at process start from defaults, an optional
//! TOML file and the environment, then passed by reference to everything that
//! needs it. Nothing else in the crate reads the environment.

use std::{collections::BTreeMap, path::{Path, PathBuf}, time::Duration};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

/// The default name of the configuration file.
pub const CONFIG_FILENAME: &str = "Deploy.toml";

/// The network identifier that selects ephemeral-test mode by default.
pub const DEFAULT_EPHEMERAL_NETWORK: &str = "hardhat";

/// The network used when none is selected.
pub const DEFAULT_NETWORK: &str = "localhost1";

/// Development mnemonic shared by local test nodes.
pub const DEFAULT_MNEMONIC: &str = "test test test test test test test test test test test junk";

/// Default gas limit attached to every transaction.
pub const DEFAULT_GAS: u64 = 8_000_000;

/// Default time to wait for a transaction receipt, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 1_000_000;

/// Suffix of the per-currency address variables (`USDC_TOKEN_ADDRESS`, ...).
const CURRENCY_VAR_SUFFIX: &str = "_token_address";

/// Connection settings for one target network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// JSON-RPC endpoint. May be filled from `url_env` at load time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
    /// Environment variable holding the endpoint, for remote networks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_env: Option<String>,
    pub chain_id: u64,
    #[serde(default = "default_gas")]
    pub gas: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_gas() -> u64 {
    DEFAULT_GAS
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl NetworkConfig {
    fn local(port: u16, chain_id: u64) -> Self {
        Self {
            url: Url::parse(&format!("http://127.0.0.1:{port}")).ok(),
            url_env: None,
            chain_id,
            gas: DEFAULT_GAS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    fn remote(url_env: &str, chain_id: u64) -> Self {
        Self {
            url: None,
            url_env: Some(url_env.to_string()),
            chain_id,
            gas: DEFAULT_GAS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Time to wait for a transaction to be confirmed.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Built-in network table.
pub fn default_networks() -> BTreeMap<String, NetworkConfig> {
    BTreeMap::from([
        ("hardhat".to_string(), NetworkConfig::local(8545, 1337)),
        ("localhost1".to_string(), NetworkConfig::local(8546, 1337)),
        ("localhost2".to_string(), NetworkConfig::local(8547, 1342)),
        (
            "polygon_mumbai".to_string(),
            NetworkConfig::remote("POLYGON_AMOY_RPC_URL", 80001),
        ),
        (
            "base_sepolia".to_string(),
            NetworkConfig::remote("BASE_SEPOLIA_RPC_URL", 84532),
        ),
    ])
}

/// Complete configuration of one deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Name of the target network, a key of `networks`.
    pub network: String,
    /// The network name that selects ephemeral-test mode.
    pub ephemeral_network: String,
    /// Known networks.
    pub networks: BTreeMap<String, NetworkConfig>,
    /// Directory holding compiled contract artifacts.
    pub artifacts: PathBuf,
    /// Mnemonic used to derive local signer identities.
    pub mnemonic: String,
    /// Hex private key of the deployer on persistent networks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// Explicit deployer address on persistent networks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployer_address: Option<String>,
    /// Currency symbols honored in persistent mode.
    pub supported_currencies: Vec<String>,
    /// Pre-existing currency contracts, keyed by symbol.
    #[serde(default)]
    pub currency_addresses: BTreeMap<String, String>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            network: DEFAULT_NETWORK.to_string(),
            ephemeral_network: DEFAULT_EPHEMERAL_NETWORK.to_string(),
            networks: default_networks(),
            artifacts: PathBuf::from("artifacts"),
            mnemonic: DEFAULT_MNEMONIC.to_string(),
            private_key: None,
            deployer_address: None,
            supported_currencies: vec!["USDC".to_string(), "DAI".to_string()],
            currency_addresses: BTreeMap::new(),
        }
    }
}

impl DeployConfig {
    /// Build the layered figment: defaults, TOML file, `FNFT_*` variables and
    /// the unprefixed variables understood by the legacy scripts.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(DeployConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("FNFT_").split("__").ignore(&["verbosity"]))
            .merge(
                Env::raw()
                    .only(&["test_network"])
                    .map(|_| "network".into()),
            )
            .merge(Env::raw().only(&["private_key", "deployer_address"]))
            .merge(Env::raw().filter_map(|key| {
                let key = key.as_str().to_ascii_lowercase();
                key.strip_suffix(CURRENCY_VAR_SUFFIX)
                    .filter(|symbol| !symbol.is_empty())
                    .map(|symbol| format!("currency_addresses.{}", symbol.to_ascii_uppercase()).into())
            }))
    }

    /// Load the configuration. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: Self = Self::figment(path)
            .extract()
            .context("Failed to assemble deployment configuration")?;
        config.resolve_network_urls();
        config.normalize_currencies();

        tracing::debug!(
            path = %path.display(),
            network = %config.network,
            currencies = ?config.currency_addresses.keys().collect::<Vec<_>>(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Fill endpoint URLs of remote networks from their environment variable.
    fn resolve_network_urls(&mut self) {
        for (name, network) in self.networks.iter_mut() {
            if network.url.is_some() {
                continue;
            }
            let Some(var) = &network.url_env else {
                continue;
            };
            match std::env::var(var).ok().filter(|v| !v.is_empty()) {
                Some(raw) => match Url::parse(&raw) {
                    Ok(url) => network.url = Some(url),
                    Err(err) => {
                        tracing::warn!(network = %name, var = %var, error = %err, "Ignoring malformed RPC URL")
                    }
                },
                None => tracing::trace!(network = %name, var = %var, "RPC URL variable not set"),
            }
        }
    }

    fn normalize_currencies(&mut self) {
        self.currency_addresses = std::mem::take(&mut self.currency_addresses)
            .into_iter()
            .map(|(symbol, address)| (symbol.to_ascii_uppercase(), address.trim().to_string()))
            .collect();
    }

    /// Whether the selected network is the designated ephemeral test network.
    pub fn is_ephemeral(&self) -> bool {
        self.network == self.ephemeral_network
    }

    /// The selected network's settings.
    pub fn network(&self) -> Result<&NetworkConfig> {
        self.networks
            .get(&self.network)
            .with_context(|| format!("Unknown network `{}`", self.network))
    }

    /// The selected network's JSON-RPC endpoint.
    pub fn rpc_url(&self) -> Result<&Url> {
        let network = self.network()?;
        network.url.as_ref().with_context(|| match &network.url_env {
            Some(var) => format!("Network `{}` has no RPC URL, set {var}", self.network),
            None => format!("Network `{}` has no RPC URL", self.network),
        })
    }

    /// Override the endpoint of the selected network.
    ///
    /// The network must be known: its chain id is what the endpoint is
    /// checked against.
    pub fn set_rpc_url(&mut self, url: Url) -> Result<()> {
        let name = self.network.clone();
        let network = self
            .networks
            .get_mut(&name)
            .with_context(|| format!("Unknown network `{name}`, add it to the networks table"))?;
        network.url = Some(url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DeployConfig::default();
        assert_eq!(config.network, "localhost1");
        assert!(!config.is_ephemeral());
        assert_eq!(config.networks.len(), 5);
        assert_eq!(
            config.rpc_url().unwrap().as_str(),
            "http://127.0.0.1:8546/"
        );
        assert_eq!(config.network().unwrap().chain_id, 1337);
        assert_eq!(
            config.network().unwrap().timeout(),
            Duration::from_secs(1_000)
        );
    }

    #[test]
    fn test_ephemeral_selection() {
        let config = DeployConfig {
            network: "hardhat".to_string(),
            ..Default::default()
        };
        assert!(config.is_ephemeral());
        assert_eq!(config.network().unwrap().chain_id, 1337);
    }

    #[test]
    fn test_unknown_network() {
        let config = DeployConfig {
            network: "nowhere".to_string(),
            ..Default::default()
        };
        assert!(config.network().is_err());
        assert!(config.rpc_url().is_err());
    }

    #[test]
    fn test_remote_network_without_url() {
        let config = DeployConfig {
            network: "base_sepolia".to_string(),
            ..Default::default()
        };
        let err = config.rpc_url().unwrap_err().to_string();
        assert!(err.contains("BASE_SEPOLIA_RPC_URL"), "{err}");
    }

    #[test]
    fn test_set_rpc_url_overrides_selected_network() {
        let mut config = DeployConfig {
            network: "base_sepolia".to_string(),
            ..Default::default()
        };
        config.set_rpc_url(Url::parse("http://10.0.0.1:9999").unwrap()).unwrap();
        assert_eq!(config.rpc_url().unwrap().port(), Some(9999));
        assert_eq!(config.network().unwrap().chain_id, 84532);
    }

    #[test]
    fn test_set_rpc_url_rejects_unknown_network() {
        let mut config = DeployConfig {
            network: "devnet".to_string(),
            ..Default::default()
        };
        let err = config
            .set_rpc_url(Url::parse("http://10.0.0.1:9999").unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("devnet"), "{err}");
        assert!(!config.networks.contains_key("devnet"));
    }

    #[test]
    fn test_load_from_toml_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILENAME,
                r#"
                network = "localhost2"
                artifacts = "build/artifacts"
                "#,
            )?;
            jail.set_env("DAI_TOKEN_ADDRESS", "0x6B175474E89094C44Da98b954EedeAC495271d0F");
            jail.set_env("FNFT_MNEMONIC", "abandon abandon");

            let config = DeployConfig::load(Path::new(CONFIG_FILENAME))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.network, "localhost2");
            assert_eq!(config.artifacts, PathBuf::from("build/artifacts"));
            assert_eq!(config.mnemonic, "abandon abandon");
            assert_eq!(
                config.currency_addresses.get("DAI").map(String::as_str),
                Some("0x6B175474E89094C44Da98b954EedeAC495271d0F")
            );
            assert!(!config.currency_addresses.contains_key("USDC"));
            Ok(())
        });
    }

    #[test]
    fn test_test_network_variable_selects_network() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("TEST_NETWORK", "hardhat");
            let config =
                DeployConfig::load(Path::new("missing.toml")).map_err(|e| e.to_string())?;
            assert!(config.is_ephemeral());
            Ok(())
        });
    }
}
