//! Locally derived signer identities.

use std::str::FromStr;

use alloy_core::primitives::Address;
use alloy_signer_local::{MnemonicBuilder, PrivateKeySigner, coins_bip39::English};
use anyhow::{Context, Result};

use super::SignerProvider;

/// Derives the first [`MnemonicAccounts::COUNT`] accounts of a BIP-39 mnemonic.
///
/// Local test nodes fund and unlock exactly these accounts, so this provider
/// names the same identities as `eth_accounts` without asking the node.
#[derive(Debug, Clone)]
pub struct MnemonicAccounts {
    phrase: String,
}

impl MnemonicAccounts {
    /// Admin plus three auxiliary accounts.
    pub const COUNT: u32 = 4;

    pub fn new(phrase: impl Into<String>) -> Self {
        Self {
            phrase: phrase.into(),
        }
    }

    /// Derive the addresses synchronously.
    pub fn derive(&self) -> Result<Vec<Address>> {
        (0..Self::COUNT)
            .map(|index| {
                let signer = MnemonicBuilder::<English>::default()
                    .phrase(self.phrase.as_str())
                    .index(index)
                    .context("Invalid derivation index")?
                    .build()
                    .context("Failed to derive account from mnemonic")?;
                Ok(signer.address())
            })
            .collect()
    }
}

impl SignerProvider for MnemonicAccounts {
    async fn accounts(&self) -> Result<Vec<Address>> {
        self.derive()
    }
}

/// Address of the account controlled by a hex private key.
pub fn deployer_from_key(private_key: &str) -> Result<Address> {
    let signer = PrivateKeySigner::from_str(private_key.trim())
        .context("PRIVATE_KEY is not a valid secp256k1 private key")?;
    Ok(signer.address())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MNEMONIC;

    #[test]
    fn test_default_mnemonic_accounts() {
        let accounts = MnemonicAccounts::new(DEFAULT_MNEMONIC).derive().unwrap();
        assert_eq!(accounts.len(), 4);
        assert_eq!(
            accounts[0],
            Address::from_str("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").unwrap()
        );
        assert_eq!(
            accounts[2],
            Address::from_str("0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC").unwrap()
        );
    }

    #[test]
    fn test_deployer_from_key() {
        let address = deployer_from_key(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        )
        .unwrap();
        assert_eq!(
            address,
            Address::from_str("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").unwrap()
        );
        assert!(deployer_from_key("0x1234").is_err());
    }
}
