use std::collections::BTreeMap;

use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::types::{ContractName, NetworkName};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeploymentMode {
    Direct,
    Proxied,
}

/// On-chain presence of one contract on one network.
///
/// For [`DeploymentMode::Proxied`] records `address` is the proxy and stays
/// fixed across upgrades; `implementation_address` is the current logic
/// contract. Direct records never carry an implementation address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawDeploymentRecord")]
pub struct DeploymentRecord {
    pub contract: ContractName,
    pub address: Address,
    pub network: NetworkName,
    pub mode: DeploymentMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implementation_address: Option<Address>,
    pub metadata: BTreeMap<String, String>,
}

impl DeploymentRecord {
    pub fn direct(
        network: NetworkName,
        contract: ContractName,
        address: Address,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            contract,
            address,
            network,
            mode: DeploymentMode::Direct,
            implementation_address: None,
            metadata,
        }
    }

    pub fn proxied(
        network: NetworkName,
        contract: ContractName,
        proxy: Address,
        implementation: Address,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            contract,
            address: proxy,
            network,
            mode: DeploymentMode::Proxied,
            implementation_address: Some(implementation),
            metadata,
        }
    }

    /// Same proxy and metadata, new logic contract.
    pub fn with_implementation(&self, implementation: Address) -> Self {
        Self {
            implementation_address: Some(implementation),
            ..self.clone()
        }
    }
}

/// Wire shape as found on disk, before structural validation.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDeploymentRecord {
    contract: Option<ContractName>,
    address: Option<Address>,
    network: Option<NetworkName>,
    mode: Option<DeploymentMode>,
    implementation_address: Option<Address>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl TryFrom<RawDeploymentRecord> for DeploymentRecord {
    type Error = String;

    fn try_from(raw: RawDeploymentRecord) -> Result<Self, Self::Error> {
        let contract = raw.contract.ok_or("missing field `contract`")?;
        let address = raw.address.ok_or("missing field `address`")?;
        let network = raw.network.ok_or("missing field `network`")?;
        let mode = raw.mode.ok_or("missing field `mode`")?;

        match (mode, raw.implementation_address) {
            (DeploymentMode::Proxied, None) => {
                return Err(
                    "proxied record without `implementationAddress`".into()
                );
            }
            (DeploymentMode::Direct, Some(_)) => {
                return Err(
                    "direct record with an `implementationAddress`".into()
                );
            }
            _ => {}
        }

        Ok(Self {
            contract,
            address,
            network,
            mode,
            implementation_address: raw.implementation_address,
            metadata: raw.metadata,
        })
    }
}
