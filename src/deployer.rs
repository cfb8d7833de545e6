use async_trait::async_trait;
use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::forge_utils::ContractSpec;

pub mod forge;

pub use self::forge::ForgeChainDeployer;

/// Upgradeable proxy flavour, decides how a proxy is constructed and who
/// repoints it.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProxyKind {
    /// `TransparentUpgradeableProxy`, upgraded through its `ProxyAdmin`
    #[default]
    Transparent,
    /// `ERC1967Proxy` in front of a UUPS implementation, upgraded through
    /// the proxy itself
    Uups,
}

impl ProxyKind {
    pub fn default_contract(&self) -> &'static str {
        match self {
            Self::Transparent => "TransparentUpgradeableProxy",
            Self::Uups => "ERC1967Proxy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyDeployment {
    pub proxy: Address,
    pub implementation: Address,
    pub kind: ProxyKind,
}

/// Network side of a deployment. Every method returns only once the
/// transactions involved are mined.
#[async_trait]
pub trait ChainDeployer: Send + Sync {
    async fn deploy_direct(
        &self,
        artifact: &ContractSpec,
        constructor_args: &[String],
    ) -> eyre::Result<Address>;

    /// Deploys the implementation, then a proxy pointed at it whose
    /// construction runs the initializer. An error is returned unless both
    /// legs succeeded.
    async fn deploy_proxied(
        &self,
        artifact: &ContractSpec,
        initializer_args: &[String],
    ) -> eyre::Result<ProxyDeployment>;

    /// Deploys `new_artifact` and repoints `proxy` at it. Returns the new
    /// implementation address; `proxy` itself never changes.
    ///
    /// `kind` is the flavour the proxy was deployed as, when known.
    async fn upgrade(
        &self,
        proxy: Address,
        kind: Option<ProxyKind>,
        new_artifact: &ContractSpec,
    ) -> eyre::Result<Address>;
}
