use std::collections::BTreeMap;
use std::path::PathBuf;

use ethers::types::Address;
use eyre::{ContextCompat, WrapErr};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cli::PrivateKey;
use crate::deployer::ProxyKind;
use crate::forge_utils::ContractSpec;
use crate::orchestrator::RedeployPolicy;
use crate::serde_utils;
use crate::store::DEFAULT_DEPLOYMENTS_DIR;
use crate::types::NetworkName;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Foundry project the artifacts are resolved in
    #[serde(default = "default_contracts_dir")]
    pub contracts_dir: PathBuf,

    #[serde(default = "default_deployments_dir")]
    pub deployments_dir: PathBuf,

    #[serde(default)]
    pub on_existing_deployment: RedeployPolicy,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(deserialize_with = "serde_utils::unique_map::deserialize")]
    pub networks: BTreeMap<NetworkName, NetworkConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    pub endpoint: Url,

    /// Expected chain id, checked against the endpoint before deploying
    #[serde(default, alias = "networkId")]
    pub network_id: Option<u64>,

    #[serde(default)]
    pub credentials: Option<Credentials>,

    #[serde(default)]
    pub verification: Option<VerificationConfig>,
}

/// Where the signing key comes from. Keys themselves never live in the
/// configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    pub private_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerificationConfig {
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub verifier: Option<String>,
    #[serde(default)]
    pub verifier_url: Option<Url>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    #[serde(default)]
    pub kind: ProxyKind,

    /// Proxy artifact, defaults to the standard contract for `kind`
    #[serde(default)]
    pub contract: Option<String>,

    /// Initializer invoked through the proxy, `null` to skip
    #[serde(default = "default_initializer")]
    pub initializer: Option<String>,

    /// Owner of transparent proxies, defaults to the deployer
    #[serde(default)]
    pub owner: Option<Address>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            kind: ProxyKind::default(),
            contract: None,
            initializer: default_initializer(),
            owner: None,
        }
    }
}

impl ProxyConfig {
    pub fn proxy_contract(&self) -> eyre::Result<ContractSpec> {
        match self.contract.as_deref() {
            Some(contract) => contract.parse(),
            None => Ok(ContractSpec::name(self.kind.default_contract())),
        }
    }
}

fn default_contracts_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_deployments_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DEPLOYMENTS_DIR)
}

fn default_initializer() -> Option<String> {
    Some("initialize".to_string())
}

impl Config {
    pub fn network(&self, name: &NetworkName) -> eyre::Result<&NetworkConfig> {
        self.networks.get(name).with_context(|| {
            let known: Vec<_> =
                self.networks.keys().map(ToString::to_string).collect();

            format!(
                "Network {name} is not configured (known networks: {})",
                known.join(", ")
            )
        })
    }
}

impl NetworkConfig {
    /// An explicit key wins over the configured credentials.
    pub fn private_key(
        &self,
        explicit: Option<&PrivateKey>,
    ) -> eyre::Result<PrivateKey> {
        if let Some(private_key) = explicit {
            return Ok(private_key.clone());
        }

        let credentials = self
            .credentials
            .as_ref()
            .context("No private key given and no credentials configured")?;

        let var = &credentials.private_key_env;
        let value = std::env::var(var)
            .wrap_err_with(|| format!("Reading private key from ${var}"))?;

        value
            .parse()
            .wrap_err_with(|| format!("Parsing private key from ${var}"))
    }

    pub fn verification_api_key(&self) -> eyre::Result<Option<String>> {
        let Some(var) = self
            .verification
            .as_ref()
            .and_then(|verification| verification.api_key_env.as_ref())
        else {
            return Ok(None);
        };

        let value = std::env::var(var)
            .wrap_err_with(|| format!("Reading verification API key from ${var}"))?;

        Ok(Some(value))
    }
}
