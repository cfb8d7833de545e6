use std::collections::BTreeMap;

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::deployer::{ChainDeployer, ProxyKind};
use crate::forge_utils::ContractSpec;
use crate::record::{DeploymentMode, DeploymentRecord};
use crate::store::{RecordStore, StoreError};
use crate::types::{ContractName, NetworkName};

/// Metadata entry recording how a proxied deployment is upgraded.
pub const PROXY_KIND_METADATA: &str = "proxyKind";

/// What `deploy` does when the key already has a record.
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
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RedeployPolicy {
    /// Replace the record with the fresh deployment
    #[default]
    Overwrite,
    /// Copy the record to the archive, then replace it
    Archive,
    /// Refuse to deploy
    Reject,
}

#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub mode: DeploymentMode,
    pub artifact: ContractSpec,
    /// Constructor arguments for direct deployments, initializer arguments
    /// for proxied ones
    pub args: Vec<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Addresses that exist on chain but could not be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedDeployment {
    pub network: NetworkName,
    pub contract: ContractName,
    pub mode: DeploymentMode,
    pub address: Address,
    pub implementation_address: Option<Address>,
}

impl From<&DeploymentRecord> for OrphanedDeployment {
    fn from(record: &DeploymentRecord) -> Self {
        Self {
            network: record.network.clone(),
            contract: record.contract.clone(),
            mode: record.mode,
            address: record.address,
            implementation_address: record.implementation_address,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("{contract} was never deployed on {network}, nothing to upgrade")]
    NoExistingDeployment {
        network: NetworkName,
        contract: ContractName,
    },
    #[error("{contract} on {network} is a {mode} deployment and cannot be upgraded")]
    InvalidTransition {
        network: NetworkName,
        contract: ContractName,
        mode: DeploymentMode,
    },
    #[error("{contract} is already deployed on {network} at {address:?}")]
    AlreadyDeployed {
        network: NetworkName,
        contract: ContractName,
        address: Address,
    },
    #[error("deployment failed: {0:#}")]
    DeployFailed(eyre::Report),
    #[error("upgrade failed: {0:#}")]
    UpgradeFailed(eyre::Report),
    #[error(
        "{} on {} is live at {:?} (implementation {:?}) but its record could not be written: {source}",
        .orphaned.contract,
        .orphaned.network,
        .orphaned.address,
        .orphaned.implementation_address
    )]
    StoreWriteFailed {
        orphaned: OrphanedDeployment,
        source: StoreError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Drives the per (network, contract) lifecycle:
/// nothing → direct | proxied, proxied → proxied (upgrade).
pub struct Orchestrator<S, D> {
    store: S,
    deployer: D,
    redeploy_policy: RedeployPolicy,
}

impl<S, D> Orchestrator<S, D>
where
    S: RecordStore,
    D: ChainDeployer,
{
    pub fn new(store: S, deployer: D) -> Self {
        Self {
            store,
            deployer,
            redeploy_policy: RedeployPolicy::default(),
        }
    }

    pub fn with_redeploy_policy(mut self, redeploy_policy: RedeployPolicy) -> Self {
        self.redeploy_policy = redeploy_policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates a brand new on-chain presence and records it. The store is
    /// only touched once the chain side fully succeeded.
    #[instrument(skip_all, fields(network = %network, contract = %contract, mode = %request.mode))]
    pub async fn deploy(
        &self,
        network: &NetworkName,
        contract: &ContractName,
        request: DeployRequest,
    ) -> Result<DeploymentRecord, OrchestratorError> {
        let replaced = self.check_redeploy(network, contract).await?;

        let record = match request.mode {
            DeploymentMode::Direct => {
                let address = self
                    .deployer
                    .deploy_direct(&request.artifact, &request.args)
                    .await
                    .map_err(OrchestratorError::DeployFailed)?;

                DeploymentRecord::direct(
                    network.clone(),
                    contract.clone(),
                    address,
                    request.metadata,
                )
            }
            DeploymentMode::Proxied => {
                let deployment = self
                    .deployer
                    .deploy_proxied(&request.artifact, &request.args)
                    .await
                    .map_err(OrchestratorError::DeployFailed)?;

                let mut metadata = request.metadata;
                metadata.insert(
                    PROXY_KIND_METADATA.to_string(),
                    deployment.kind.to_string(),
                );

                DeploymentRecord::proxied(
                    network.clone(),
                    contract.clone(),
                    deployment.proxy,
                    deployment.implementation,
                    metadata,
                )
            }
        };

        if let Some(previous) = replaced {
            match self.store.archive(&previous).await {
                Ok(path) => info!(
                    address = ?previous.address,
                    "Archived previous record to {}",
                    path.display()
                ),
                Err(source) => return Err(orphaned(&record, source)),
            }
        }

        self.persist(record).await
    }

    /// Repoints the recorded proxy at `new_artifact`, keeping its address and
    /// metadata.
    #[instrument(skip_all, fields(network = %network, contract = %contract, artifact = %new_artifact))]
    pub async fn upgrade(
        &self,
        network: &NetworkName,
        contract: &ContractName,
        new_artifact: &ContractSpec,
    ) -> Result<DeploymentRecord, OrchestratorError> {
        let current = match self.store.load(network, contract).await {
            Ok(record) => record,
            Err(StoreError::NotFound { network, contract }) => {
                return Err(OrchestratorError::NoExistingDeployment {
                    network,
                    contract,
                });
            }
            Err(err) => return Err(err.into()),
        };

        if current.mode != DeploymentMode::Proxied {
            return Err(OrchestratorError::InvalidTransition {
                network: network.clone(),
                contract: contract.clone(),
                mode: current.mode,
            });
        }

        let kind = current
            .metadata
            .get(PROXY_KIND_METADATA)
            .map(|kind| {
                kind.parse::<ProxyKind>().map_err(|_| {
                    OrchestratorError::UpgradeFailed(eyre::eyre!(
                        "Record carries unknown proxy kind {kind:?}"
                    ))
                })
            })
            .transpose()?;

        info!(
            proxy = ?current.address,
            previous = ?current.implementation_address,
            ?kind,
            "Upgrading"
        );

        let implementation = self
            .deployer
            .upgrade(current.address, kind, new_artifact)
            .await
            .map_err(OrchestratorError::UpgradeFailed)?;

        self.persist(current.with_implementation(implementation))
            .await
    }

    /// Applies the redeploy policy before anything touches the chain. Returns
    /// the record to archive once the new deployment succeeded.
    async fn check_redeploy(
        &self,
        network: &NetworkName,
        contract: &ContractName,
    ) -> Result<Option<DeploymentRecord>, OrchestratorError> {
        if self.redeploy_policy == RedeployPolicy::Overwrite {
            return Ok(None);
        }

        let previous = match self.store.load(network, contract).await {
            Ok(record) => record,
            Err(StoreError::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        match self.redeploy_policy {
            RedeployPolicy::Reject => Err(OrchestratorError::AlreadyDeployed {
                network: network.clone(),
                contract: contract.clone(),
                address: previous.address,
            }),
            RedeployPolicy::Archive => Ok(Some(previous)),
            RedeployPolicy::Overwrite => Ok(None),
        }
    }

    async fn persist(
        &self,
        record: DeploymentRecord,
    ) -> Result<DeploymentRecord, OrchestratorError> {
        if let Err(source) = self.store.save(&record).await {
            return Err(orphaned(&record, source));
        }

        info!(
            address = ?record.address,
            implementation = ?record.implementation_address,
            "Recorded {} deployment",
            record.mode
        );

        Ok(record)
    }
}

fn orphaned(record: &DeploymentRecord, source: StoreError) -> OrchestratorError {
    let orphaned = OrphanedDeployment::from(record);

    error!(
        network = %orphaned.network,
        contract = %orphaned.contract,
        address = ?orphaned.address,
        implementation = ?orphaned.implementation_address,
        "Deployed on chain but the record was NOT saved, record these addresses manually: {source}"
    );

    OrchestratorError::StoreWriteFailed { orphaned, source }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::deployer::ProxyDeployment;
    use crate::store::FileRecordStore;

    const A: u64 = 0xA;
    const B: u64 = 0xB;
    const C: u64 = 0xC;
    const D: u64 = 0xD;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn carbon_net() -> NetworkName {
        "carbonNet".parse().unwrap()
    }

    fn token() -> ContractName {
        "CarbonCreditToken".parse().unwrap()
    }

    /// Hands out the queued addresses in order, or fails when asked to.
    #[derive(Default)]
    struct MockDeployer {
        addresses: Mutex<VecDeque<Address>>,
        fail: bool,
        kind: ProxyKind,
        calls: AtomicUsize,
        upgrades: Mutex<Vec<(Address, Option<ProxyKind>)>>,
    }

    impl MockDeployer {
        fn with_addresses(addresses: impl IntoIterator<Item = u64>) -> Self {
            Self {
                addresses: Mutex::new(addresses.into_iter().map(addr).collect()),
                ..Default::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn with_kind(mut self, kind: ProxyKind) -> Self {
            self.kind = kind;
            self
        }

        fn upgrades(&self) -> Vec<(Address, Option<ProxyKind>)> {
            self.upgrades.lock().unwrap().clone()
        }

        fn next_address(&self) -> eyre::Result<Address> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if self.fail {
                eyre::bail!("transaction rejected");
            }

            let mut addresses = self.addresses.lock().unwrap();
            addresses
                .pop_front()
                .ok_or_else(|| eyre::eyre!("no more addresses"))
        }
    }

    #[async_trait]
    impl ChainDeployer for MockDeployer {
        async fn deploy_direct(
            &self,
            _artifact: &ContractSpec,
            _constructor_args: &[String],
        ) -> eyre::Result<Address> {
            self.next_address()
        }

        async fn deploy_proxied(
            &self,
            _artifact: &ContractSpec,
            _initializer_args: &[String],
        ) -> eyre::Result<ProxyDeployment> {
            let proxy = self.next_address()?;
            let implementation = self.next_address()?;

            Ok(ProxyDeployment {
                proxy,
                implementation,
                kind: self.kind,
            })
        }

        async fn upgrade(
            &self,
            proxy: Address,
            kind: Option<ProxyKind>,
            _new_artifact: &ContractSpec,
        ) -> eyre::Result<Address> {
            self.upgrades.lock().unwrap().push((proxy, kind));
            self.next_address()
        }
    }

    /// Reads through to a file store, refuses every write.
    struct ReadOnlyStore(FileRecordStore);

    fn read_only(path: &str) -> StoreError {
        StoreError::Io {
            path: PathBuf::from(path),
            source: std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only file system",
            ),
        }
    }

    #[async_trait]
    impl RecordStore for ReadOnlyStore {
        async fn load(
            &self,
            network: &NetworkName,
            contract: &ContractName,
        ) -> Result<DeploymentRecord, StoreError> {
            self.0.load(network, contract).await
        }

        async fn save(&self, _record: &DeploymentRecord) -> Result<(), StoreError> {
            Err(read_only("deployments"))
        }

        async fn exists(
            &self,
            network: &NetworkName,
            contract: &ContractName,
        ) -> Result<bool, StoreError> {
            self.0.exists(network, contract).await
        }

        async fn archive(
            &self,
            _record: &DeploymentRecord,
        ) -> Result<PathBuf, StoreError> {
            Err(read_only("deployments/archive"))
        }
    }

    fn request(mode: DeploymentMode) -> DeployRequest {
        DeployRequest {
            mode,
            artifact: ContractSpec::name("CarbonCreditToken"),
            args: vec![],
            metadata: maplit::btreemap! {
                "baseURI".to_string() => "https://x/".to_string(),
            },
        }
    }

    fn orchestrator(
        dir: &tempfile::TempDir,
        deployer: MockDeployer,
    ) -> Orchestrator<FileRecordStore, MockDeployer> {
        Orchestrator::new(FileRecordStore::new(dir.path()), deployer)
    }

    fn record_bytes(dir: &tempfile::TempDir) -> Vec<u8> {
        std::fs::read(dir.path().join("carbonNet_CarbonCreditToken.json"))
            .unwrap()
    }

    #[tokio::test]
    async fn proxied_deploy_then_upgrade_keeps_the_proxy() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let orchestrator =
            orchestrator(&dir, MockDeployer::with_addresses([A, B, C]));

        let deployed = orchestrator
            .deploy(&carbon_net(), &token(), request(DeploymentMode::Proxied))
            .await?;

        assert_eq!(deployed.mode, DeploymentMode::Proxied);
        assert_eq!(deployed.address, addr(A));
        assert_eq!(deployed.implementation_address, Some(addr(B)));
        assert_eq!(deployed.metadata["baseURI"], "https://x/");
        assert_eq!(deployed.metadata[PROXY_KIND_METADATA], "transparent");

        let upgraded = orchestrator
            .upgrade(
                &carbon_net(),
                &token(),
                &ContractSpec::name("CarbonCreditTokenV2"),
            )
            .await?;

        assert_eq!(upgraded.mode, DeploymentMode::Proxied);
        assert_eq!(upgraded.address, addr(A));
        assert_eq!(upgraded.implementation_address, Some(addr(C)));
        assert_eq!(upgraded.metadata, deployed.metadata);

        assert_eq!(
            orchestrator.deployer.upgrades(),
            vec![(addr(A), Some(ProxyKind::Transparent))]
        );

        let stored = orchestrator
            .store()
            .load(&carbon_net(), &token())
            .await?;
        assert_eq!(stored, upgraded);

        Ok(())
    }

    #[tokio::test]
    async fn repeated_upgrades_only_move_the_implementation() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let orchestrator =
            orchestrator(&dir, MockDeployer::with_addresses([A, B, C, D]));

        orchestrator
            .deploy(&carbon_net(), &token(), request(DeploymentMode::Proxied))
            .await?;

        let artifact = ContractSpec::name("CarbonCreditTokenV2");
        orchestrator.upgrade(&carbon_net(), &token(), &artifact).await?;
        let second = orchestrator.upgrade(&carbon_net(), &token(), &artifact).await?;

        assert_eq!(second.address, addr(A));
        assert_eq!(second.implementation_address, Some(addr(D)));
        assert_eq!(
            orchestrator.deployer.upgrades(),
            vec![
                (addr(A), Some(ProxyKind::Transparent)),
                (addr(A), Some(ProxyKind::Transparent)),
            ]
        );

        Ok(())
    }

    #[tokio::test]
    async fn direct_deployments_cannot_be_upgraded() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let orchestrator =
            orchestrator(&dir, MockDeployer::with_addresses([D, C]));

        let deployed = orchestrator
            .deploy(&carbon_net(), &token(), request(DeploymentMode::Direct))
            .await?;

        assert_eq!(deployed.mode, DeploymentMode::Direct);
        assert_eq!(deployed.address, addr(D));
        assert_eq!(deployed.implementation_address, None);

        let before = record_bytes(&dir);

        let err = orchestrator
            .upgrade(
                &carbon_net(),
                &token(),
                &ContractSpec::name("CarbonCreditTokenV2"),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::InvalidTransition {
                mode: DeploymentMode::Direct,
                ..
            }
        ));
        assert_eq!(record_bytes(&dir), before);
        // Only the deploy reached the chain
        assert_eq!(orchestrator.deployer.calls.load(Ordering::SeqCst), 1);

        Ok(())
    }

    #[tokio::test]
    async fn upgrading_nothing_fails_without_creating_a_record(
    ) -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let orchestrator = orchestrator(&dir, MockDeployer::with_addresses([C]));

        let err = orchestrator
            .upgrade(
                &carbon_net(),
                &token(),
                &ContractSpec::name("CarbonCreditTokenV2"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::NoExistingDeployment { .. }));
        assert!(!orchestrator.store().exists(&carbon_net(), &token()).await?);
        assert_eq!(orchestrator.deployer.calls.load(Ordering::SeqCst), 0);

        Ok(())
    }

    #[tokio::test]
    async fn corrupt_record_blocks_the_upgrade() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(
            dir.path().join("carbonNet_CarbonCreditToken.json"),
            r#"{"contract":"CarbonCreditToken","network":"carbonNet","mode":"proxied"}"#,
        )?;

        let orchestrator = orchestrator(&dir, MockDeployer::with_addresses([C]));

        let err = orchestrator
            .upgrade(
                &carbon_net(),
                &token(),
                &ContractSpec::name("CarbonCreditTokenV2"),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::Store(StoreError::Corrupt { .. })
        ));
        assert_eq!(orchestrator.deployer.calls.load(Ordering::SeqCst), 0);

        Ok(())
    }

    #[tokio::test]
    async fn failed_deploy_leaves_the_store_untouched() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let orchestrator = orchestrator(&dir, MockDeployer::failing());

        let err = orchestrator
            .deploy(&carbon_net(), &token(), request(DeploymentMode::Proxied))
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::DeployFailed(_)));
        assert!(err.to_string().contains("transaction rejected"), "{err}");
        assert!(!orchestrator.store().exists(&carbon_net(), &token()).await?);

        Ok(())
    }

    #[tokio::test]
    async fn failed_upgrade_keeps_the_previous_record() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;

        orchestrator(&dir, MockDeployer::with_addresses([A, B]))
            .deploy(&carbon_net(), &token(), request(DeploymentMode::Proxied))
            .await?;

        let before = record_bytes(&dir);

        let err = orchestrator(&dir, MockDeployer::failing())
            .upgrade(
                &carbon_net(),
                &token(),
                &ContractSpec::name("CarbonCreditTokenV2"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::UpgradeFailed(_)));
        assert_eq!(record_bytes(&dir), before);

        Ok(())
    }

    #[tokio::test]
    async fn store_failure_after_deploy_reports_the_orphan() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let orchestrator = Orchestrator::new(
            ReadOnlyStore(FileRecordStore::new(dir.path())),
            MockDeployer::with_addresses([A, B]),
        );

        let err = orchestrator
            .deploy(&carbon_net(), &token(), request(DeploymentMode::Proxied))
            .await
            .unwrap_err();

        let OrchestratorError::StoreWriteFailed { orphaned, .. } = &err else {
            panic!("expected StoreWriteFailed, got {err:?}");
        };

        assert_eq!(orphaned.address, addr(A));
        assert_eq!(orphaned.implementation_address, Some(addr(B)));
        assert_eq!(orphaned.mode, DeploymentMode::Proxied);

        let message = err.to_string();
        assert!(message.contains(&format!("{:?}", addr(A))), "{message}");
        assert!(message.contains(&format!("{:?}", addr(B))), "{message}");

        Ok(())
    }

    #[tokio::test]
    async fn store_failure_after_upgrade_reports_the_new_implementation(
    ) -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;

        orchestrator(&dir, MockDeployer::with_addresses([A, B]))
            .deploy(&carbon_net(), &token(), request(DeploymentMode::Proxied))
            .await?;

        let orchestrator = Orchestrator::new(
            ReadOnlyStore(FileRecordStore::new(dir.path())),
            MockDeployer::with_addresses([C]),
        );

        let err = orchestrator
            .upgrade(
                &carbon_net(),
                &token(),
                &ContractSpec::name("CarbonCreditTokenV2"),
            )
            .await
            .unwrap_err();

        match err {
            OrchestratorError::StoreWriteFailed { orphaned, .. } => {
                assert_eq!(orphaned.address, addr(A));
                assert_eq!(orphaned.implementation_address, Some(addr(C)));
            }
            other => panic!("expected StoreWriteFailed, got {other:?}"),
        }

        Ok(())
    }

    #[tokio::test]
    async fn redeploy_overwrites_by_default() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let orchestrator =
            orchestrator(&dir, MockDeployer::with_addresses([A, B, D]));

        orchestrator
            .deploy(&carbon_net(), &token(), request(DeploymentMode::Proxied))
            .await?;

        let redeployed = orchestrator
            .deploy(&carbon_net(), &token(), request(DeploymentMode::Direct))
            .await?;

        assert_eq!(redeployed.address, addr(D));
        assert_eq!(
            orchestrator.store().load(&carbon_net(), &token()).await?,
            redeployed
        );
        assert!(!dir.path().join("archive").exists());

        Ok(())
    }

    #[tokio::test]
    async fn redeploy_can_be_rejected() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let orchestrator = orchestrator(&dir, MockDeployer::with_addresses([D, A]))
            .with_redeploy_policy(RedeployPolicy::Reject);

        orchestrator
            .deploy(&carbon_net(), &token(), request(DeploymentMode::Direct))
            .await?;

        let before = record_bytes(&dir);

        let err = orchestrator
            .deploy(&carbon_net(), &token(), request(DeploymentMode::Direct))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::AlreadyDeployed { address, .. } if address == addr(D)
        ));
        assert_eq!(record_bytes(&dir), before);
        assert_eq!(orchestrator.deployer.calls.load(Ordering::SeqCst), 1);

        Ok(())
    }

    #[tokio::test]
    async fn redeploy_can_archive_the_previous_record() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let orchestrator =
            orchestrator(&dir, MockDeployer::with_addresses([A, B, D]))
                .with_redeploy_policy(RedeployPolicy::Archive);

        let first = orchestrator
            .deploy(&carbon_net(), &token(), request(DeploymentMode::Proxied))
            .await?;

        orchestrator
            .deploy(&carbon_net(), &token(), request(DeploymentMode::Direct))
            .await?;

        let archived: Vec<_> = std::fs::read_dir(dir.path().join("archive"))?
            .collect::<Result<_, _>>()?;
        assert_eq!(archived.len(), 1);

        let archived: DeploymentRecord =
            serde_json::from_slice(&std::fs::read(archived[0].path())?)?;
        assert_eq!(archived, first);

        Ok(())
    }

    #[tokio::test]
    async fn failed_redeploy_archives_nothing() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;

        orchestrator(&dir, MockDeployer::with_addresses([D]))
            .deploy(&carbon_net(), &token(), request(DeploymentMode::Direct))
            .await?;

        let before = record_bytes(&dir);

        let failing = orchestrator(&dir, MockDeployer::failing())
            .with_redeploy_policy(RedeployPolicy::Archive);

        for _ in 0..2 {
            let err = failing
                .deploy(&carbon_net(), &token(), request(DeploymentMode::Direct))
                .await
                .unwrap_err();
            assert!(matches!(err, OrchestratorError::DeployFailed(_)));
        }

        assert!(!dir.path().join("archive").exists());
        assert_eq!(record_bytes(&dir), before);

        Ok(())
    }

    #[tokio::test]
    async fn every_replaced_record_is_archived() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let orchestrator =
            orchestrator(&dir, MockDeployer::with_addresses([A, C, D]))
                .with_redeploy_policy(RedeployPolicy::Archive);

        for _ in 0..3 {
            orchestrator
                .deploy(&carbon_net(), &token(), request(DeploymentMode::Direct))
                .await?;
        }

        let mut archived: Vec<Address> =
            std::fs::read_dir(dir.path().join("archive"))?
                .map(|entry| -> eyre::Result<Address> {
                    let record: DeploymentRecord =
                        serde_json::from_slice(&std::fs::read(entry?.path())?)?;
                    Ok(record.address)
                })
                .collect::<eyre::Result<_>>()?;
        archived.sort();

        assert_eq!(archived, vec![addr(A), addr(C)]);

        let current = orchestrator.store().load(&carbon_net(), &token()).await?;
        assert_eq!(current.address, addr(D));

        Ok(())
    }

    #[tokio::test]
    async fn archive_failure_after_deploy_reports_the_orphan() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;

        orchestrator(&dir, MockDeployer::with_addresses([D]))
            .deploy(&carbon_net(), &token(), request(DeploymentMode::Direct))
            .await?;

        let before = record_bytes(&dir);

        let orchestrator = Orchestrator::new(
            ReadOnlyStore(FileRecordStore::new(dir.path())),
            MockDeployer::with_addresses([A, B]),
        )
        .with_redeploy_policy(RedeployPolicy::Archive);

        let err = orchestrator
            .deploy(&carbon_net(), &token(), request(DeploymentMode::Proxied))
            .await
            .unwrap_err();

        match err {
            OrchestratorError::StoreWriteFailed { orphaned, .. } => {
                assert_eq!(orphaned.address, addr(A));
                assert_eq!(orphaned.implementation_address, Some(addr(B)));
            }
            other => panic!("expected StoreWriteFailed, got {other:?}"),
        }

        assert_eq!(record_bytes(&dir), before);

        Ok(())
    }

    #[tokio::test]
    async fn upgrade_uses_the_recorded_proxy_kind() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;

        let deployed = orchestrator(
            &dir,
            MockDeployer::with_addresses([A, B]).with_kind(ProxyKind::Uups),
        )
        .deploy(&carbon_net(), &token(), request(DeploymentMode::Proxied))
        .await?;
        assert_eq!(deployed.metadata[PROXY_KIND_METADATA], "uups");

        // Deployer configured for the other kind
        let upgrader = orchestrator(&dir, MockDeployer::with_addresses([C]));
        upgrader
            .upgrade(
                &carbon_net(),
                &token(),
                &ContractSpec::name("CarbonCreditTokenV2"),
            )
            .await?;

        assert_eq!(
            upgrader.deployer.upgrades(),
            vec![(addr(A), Some(ProxyKind::Uups))]
        );

        Ok(())
    }

    #[tokio::test]
    async fn records_without_proxy_kind_leave_it_to_the_deployer(
    ) -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileRecordStore::new(dir.path());

        store
            .save(&DeploymentRecord::proxied(
                carbon_net(),
                token(),
                addr(A),
                addr(B),
                BTreeMap::new(),
            ))
            .await?;

        let orchestrator = orchestrator(&dir, MockDeployer::with_addresses([C]));
        let upgraded = orchestrator
            .upgrade(
                &carbon_net(),
                &token(),
                &ContractSpec::name("CarbonCreditTokenV2"),
            )
            .await?;

        assert_eq!(upgraded.implementation_address, Some(addr(C)));
        assert_eq!(orchestrator.deployer.upgrades(), vec![(addr(A), None)]);

        Ok(())
    }

    #[tokio::test]
    async fn unknown_proxy_kind_stops_before_the_chain() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileRecordStore::new(dir.path());

        store
            .save(&DeploymentRecord::proxied(
                carbon_net(),
                token(),
                addr(A),
                addr(B),
                maplit::btreemap! {
                    PROXY_KIND_METADATA.to_string() => "beacon".to_string(),
                },
            ))
            .await?;

        let orchestrator = orchestrator(&dir, MockDeployer::with_addresses([C]));
        let err = orchestrator
            .upgrade(
                &carbon_net(),
                &token(),
                &ContractSpec::name("CarbonCreditTokenV2"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::UpgradeFailed(_)));
        assert!(err.to_string().contains("beacon"), "{err}");
        assert_eq!(orchestrator.deployer.calls.load(Ordering::SeqCst), 0);

        Ok(())
    }

    #[tokio::test]
    async fn networks_are_independent() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let orchestrator =
            orchestrator(&dir, MockDeployer::with_addresses([A, B, D]));
        let sepolia: NetworkName = "sepolia".parse()?;

        orchestrator
            .deploy(&carbon_net(), &token(), request(DeploymentMode::Proxied))
            .await?;
        orchestrator
            .deploy(&sepolia, &token(), request(DeploymentMode::Direct))
            .await?;

        let err = orchestrator
            .upgrade(&sepolia, &token(), &ContractSpec::name("CarbonCreditTokenV2"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));

        let carbon = orchestrator.store().load(&carbon_net(), &token()).await?;
        assert_eq!(carbon.address, addr(A));
        assert_eq!(carbon.mode, DeploymentMode::Proxied);

        Ok(())
    }
}
