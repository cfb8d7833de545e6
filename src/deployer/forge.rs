use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::parse_abi;
use ethers::prelude::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, U256};
use eyre::{bail, WrapErr};
use tracing::{info, instrument, warn};
use url::Url;

use super::{ChainDeployer, ProxyDeployment, ProxyKind};
use crate::cli::PrivateKey;
use crate::config::{NetworkConfig, ProxyConfig};
use crate::eip1967;
use crate::ethers_utils::{encode_call, RpcSigner, TransactionBuilder};
use crate::forge_utils::{ContractSpec, ForgeCreate, ForgeInspectAbi};
use crate::types::NetworkName;

const UUPS_ABI: &[&str] =
    &["function upgradeToAndCall(address newImplementation, bytes data)"];

const PROXY_ADMIN_ABI: &[&str] = &[
    "function upgradeAndCall(address proxy, address implementation, bytes data)",
];

#[derive(Debug, Default)]
struct Verification {
    api_key: Option<String>,
    verifier: Option<String>,
    verifier_url: Option<Url>,
}

/// Deploys through `forge create` and repoints proxies with transactions
/// signed by the configured key.
pub struct ForgeChainDeployer {
    contracts_dir: PathBuf,
    private_key: PrivateKey,
    rpc_url: Url,
    rpc_signer: Arc<RpcSigner>,
    nonce: AtomicU64,
    proxy: ProxyConfig,
    verification: Verification,
}

impl ForgeChainDeployer {
    #[instrument(skip_all, fields(network = %network_name))]
    pub async fn connect(
        network_name: &NetworkName,
        network: &NetworkConfig,
        private_key: PrivateKey,
        contracts_dir: PathBuf,
        proxy: ProxyConfig,
    ) -> eyre::Result<Self> {
        let provider = Provider::<Http>::try_from(network.endpoint.as_str())?;
        let chain_id = provider
            .get_chainid()
            .await
            .wrap_err_with(|| format!("Querying chain id of {}", network.endpoint))?;

        if let Some(expected) = network.network_id {
            if chain_id != U256::from(expected) {
                bail!(
                    "Endpoint of {network_name} reports chain id {chain_id}, expected {expected}"
                );
            }
        }

        let wallet = LocalWallet::from(private_key.key.clone())
            .with_chain_id(chain_id.as_u64());

        let wallet_address = wallet.address();

        let signer = SignerMiddleware::new(provider, wallet);

        let nonce = signer.get_transaction_count(wallet_address, None).await?;

        info!(deployer = ?wallet_address, %chain_id, "Connected");

        let verification = match network.verification.as_ref() {
            Some(verification) => Verification {
                api_key: network.verification_api_key()?,
                verifier: verification.verifier.clone(),
                verifier_url: verification.verifier_url.clone(),
            },
            None => Verification::default(),
        };

        Ok(Self {
            contracts_dir,
            private_key,
            rpc_url: network.endpoint.clone(),
            rpc_signer: Arc::new(signer),
            nonce: AtomicU64::new(nonce.as_u64()),
            proxy,
            verification,
        })
    }

    pub fn next_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::SeqCst)
    }

    fn forge_create(&self, contract_spec: ContractSpec) -> ForgeCreate {
        let mut forge_create = ForgeCreate::new(contract_spec)
            .with_cwd(&self.contracts_dir)
            .with_private_key(self.private_key.clone())
            .with_rpc_url(self.rpc_url.to_string())
            .with_override_nonce(self.next_nonce());

        if let Some(api_key) = self.verification.api_key.as_ref() {
            forge_create = forge_create.with_verification_api_key(api_key);
        }

        if let Some(verifier) = self.verification.verifier.as_ref() {
            forge_create = forge_create.with_verifier(verifier);
        }

        if let Some(verifier_url) = self.verification.verifier_url.as_ref() {
            forge_create = forge_create.with_verifier_url(verifier_url);
        }

        forge_create
    }

    async fn initializer_data(
        &self,
        artifact: &ContractSpec,
        initializer_args: &[String],
    ) -> eyre::Result<Bytes> {
        let Some(initializer) = self.proxy.initializer.as_deref() else {
            if !initializer_args.is_empty() {
                bail!("Initializer arguments given but no initializer is configured");
            }

            return Ok(Bytes::default());
        };

        let abi = ForgeInspectAbi::new(artifact.clone())
            .with_cwd(&self.contracts_dir)
            .run()
            .await?;

        encode_call(&abi, initializer, initializer_args)
    }

    async fn deploy_proxy(
        &self,
        implementation: Address,
        init_data: Bytes,
    ) -> eyre::Result<Address> {
        let mut forge_create = self
            .forge_create(self.proxy.proxy_contract()?)
            .with_constructor_arg(format!("{implementation:?}"));

        if self.proxy.kind == ProxyKind::Transparent {
            let owner = self
                .proxy
                .owner
                .unwrap_or_else(|| self.private_key.address());

            forge_create = forge_create.with_constructor_arg(format!("{owner:?}"));
        }

        let output = forge_create.with_constructor_arg(init_data).run().await?;

        Ok(output.deployed_to)
    }

    async fn repoint(
        &self,
        kind: ProxyKind,
        proxy: Address,
        implementation: Address,
    ) -> eyre::Result<()> {
        match kind {
            ProxyKind::Uups => {
                TransactionBuilder::default()
                    .abi(parse_abi(UUPS_ABI)?)
                    .function_name("upgradeToAndCall")
                    .args((implementation, Bytes::default()))
                    .to(proxy)
                    .signer(self.rpc_signer.clone())
                    .nonce(self.next_nonce())
                    .build()?
                    .send()
                    .await?;
            }
            ProxyKind::Transparent => {
                let admin = eip1967::admin(&self.rpc_signer, proxy).await?;

                if admin.is_zero() {
                    bail!("{proxy:?} has no proxy admin");
                }

                info!(?admin, "Upgrading through proxy admin");

                TransactionBuilder::default()
                    .abi(parse_abi(PROXY_ADMIN_ABI)?)
                    .function_name("upgradeAndCall")
                    .args((proxy, implementation, Bytes::default()))
                    .to(admin)
                    .signer(self.rpc_signer.clone())
                    .nonce(self.next_nonce())
                    .build()?
                    .send()
                    .await?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ChainDeployer for ForgeChainDeployer {
    #[instrument(skip_all, fields(artifact = %artifact))]
    async fn deploy_direct(
        &self,
        artifact: &ContractSpec,
        constructor_args: &[String],
    ) -> eyre::Result<Address> {
        let output = self
            .forge_create(artifact.clone())
            .with_constructor_args(constructor_args)
            .run()
            .await?;

        Ok(output.deployed_to)
    }

    #[instrument(skip_all, fields(artifact = %artifact))]
    async fn deploy_proxied(
        &self,
        artifact: &ContractSpec,
        initializer_args: &[String],
    ) -> eyre::Result<ProxyDeployment> {
        info!(kind = %self.proxy.kind, "Deploying behind a proxy");

        // Encoded up front so bad arguments fail before anything is deployed
        let init_data = self
            .initializer_data(artifact, initializer_args)
            .await
            .wrap_err("Encoding initializer call")?;

        let implementation = self
            .forge_create(artifact.clone())
            .run()
            .await
            .wrap_err("Deploying implementation")?
            .deployed_to;

        let proxy = match self.deploy_proxy(implementation, init_data).await {
            Ok(proxy) => proxy,
            Err(err) => {
                warn!(?implementation, "Implementation deployed but proxy failed");

                return Err(err.wrap_err(format!(
                    "Deploying proxy, implementation at {implementation:?} is left unused"
                )));
            }
        };

        Ok(ProxyDeployment {
            proxy,
            implementation,
            kind: self.proxy.kind,
        })
    }

    #[instrument(skip_all, fields(proxy = ?proxy, artifact = %new_artifact))]
    async fn upgrade(
        &self,
        proxy: Address,
        kind: Option<ProxyKind>,
        new_artifact: &ContractSpec,
    ) -> eyre::Result<Address> {
        let kind = match kind {
            Some(kind) if kind != self.proxy.kind => {
                warn!(
                    recorded = %kind,
                    configured = %self.proxy.kind,
                    "Proxy was deployed as a different kind, using the recorded one"
                );
                kind
            }
            Some(kind) => kind,
            None => self.proxy.kind,
        };

        let code = self
            .rpc_signer
            .get_code(proxy, None)
            .await
            .wrap_err_with(|| format!("Fetching code at {proxy:?}"))?;

        if code.is_empty() {
            bail!("No contract deployed at proxy address {proxy:?}");
        }

        let previous = eip1967::implementation(&self.rpc_signer, proxy).await?;

        if previous.is_zero() {
            bail!("{proxy:?} is not an EIP-1967 proxy");
        }

        if kind == ProxyKind::Transparent
            && eip1967::admin(&self.rpc_signer, proxy).await?.is_zero()
        {
            bail!("{proxy:?} has no proxy admin, it is not a transparent proxy");
        }

        let implementation = self
            .forge_create(new_artifact.clone())
            .run()
            .await
            .wrap_err("Deploying new implementation")?
            .deployed_to;

        if let Err(err) = self.repoint(kind, proxy, implementation).await {
            return Err(err.wrap_err(format!(
                "Repointing {proxy:?}, implementation at {implementation:?} is left unused"
            )));
        }

        let current = eip1967::implementation(&self.rpc_signer, proxy).await?;

        if current != implementation {
            bail!(
                "{proxy:?} points at {current:?} after the upgrade, expected {implementation:?}"
            );
        }

        info!(?previous, ?implementation, "Proxy repointed");

        Ok(implementation)
    }
}
