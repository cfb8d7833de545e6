use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod private_key;

pub use private_key::PrivateKey;

use crate::forge_utils::ContractSpec;
use crate::types::{ContractName, NetworkName};

#[derive(Debug, Clone, Parser)]
#[clap(rename_all = "kebab-case", version, about)]
pub struct Args {
    /// Path to the deployment configuration file
    #[clap(short, long, env = "DEPLOY_CONFIG", default_value = "deploy.yml")]
    pub config: PathBuf,

    /// Target network, as named in the configuration file
    #[clap(short, long, env = "DEPLOY_NETWORK")]
    pub network: NetworkName,

    /// Private key to sign with, overrides the network's credentials
    #[clap(short, long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<PrivateKey>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
#[clap(rename_all = "kebab-case")]
pub enum Command {
    /// Deploy a standalone, non-upgradeable instance
    DeployDirect(DeployArgs),

    /// Deploy an implementation behind an upgradeable proxy and run its
    /// initializer through the proxy
    DeployProxied(DeployArgs),

    /// Point an existing proxy at a freshly deployed implementation
    Upgrade(UpgradeArgs),

    /// Print the stored deployment record
    Show(ShowArgs),
}

#[derive(Debug, Clone, clap::Args)]
#[clap(rename_all = "kebab-case")]
pub struct DeployArgs {
    /// Name the deployment is recorded under
    pub contract: ContractName,

    /// Artifact to deploy, `Name` or `path/File.sol:Name`
    ///
    /// Defaults to the contract name
    #[clap(long)]
    pub artifact: Option<ContractSpec>,

    /// Constructor (direct) or initializer (proxied) argument, repeatable
    #[clap(long = "arg", allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Metadata entry stored with the record, as `key=value`
    #[clap(long = "meta", value_parser = parse_key_val)]
    pub metadata: Vec<(String, String)>,
}

impl DeployArgs {
    pub fn artifact(&self) -> ContractSpec {
        self.artifact
            .clone()
            .unwrap_or_else(|| ContractSpec::name(&self.contract))
    }

    pub fn metadata(&self) -> BTreeMap<String, String> {
        self.metadata.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, clap::Args)]
#[clap(rename_all = "kebab-case")]
pub struct UpgradeArgs {
    pub contract: ContractName,

    /// New implementation artifact, `Name` or `path/File.sol:Name`
    #[clap(long)]
    pub artifact: ContractSpec,
}

#[derive(Debug, Clone, clap::Args)]
pub struct ShowArgs {
    pub contract: ContractName,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {s:?}"))?;

    if key.is_empty() {
        return Err(format!("empty metadata key in {s:?}"));
    }

    Ok((key.to_string(), value.to_string()))
}
