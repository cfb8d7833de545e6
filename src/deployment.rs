use eyre::WrapErr;
use tracing::info;

use crate::cli::{Args, Command, DeployArgs};
use crate::config::Config;
use crate::deployer::ForgeChainDeployer;
use crate::orchestrator::{DeployRequest, Orchestrator};
use crate::record::{DeploymentMode, DeploymentRecord};
use crate::serde_utils;
use crate::store::{FileRecordStore, RecordStore};

type ForgeOrchestrator = Orchestrator<FileRecordStore, ForgeChainDeployer>;

pub async fn run_deployment(args: Args) -> eyre::Result<()> {
    let config: Config = serde_utils::read_deserialize(&args.config).await?;

    // Fails early on networks missing from the config, even for `show`
    config.network(&args.network)?;

    let store = FileRecordStore::new(&config.deployments_dir);

    let record = match &args.command {
        Command::Show(show) => store.load(&args.network, &show.contract).await?,
        Command::DeployDirect(deploy) => {
            let orchestrator = connect(&config, &args, store).await?;
            let request = deploy_request(DeploymentMode::Direct, deploy);

            orchestrator
                .deploy(&args.network, &deploy.contract, request)
                .await?
        }
        Command::DeployProxied(deploy) => {
            let orchestrator = connect(&config, &args, store).await?;
            let request = deploy_request(DeploymentMode::Proxied, deploy);

            orchestrator
                .deploy(&args.network, &deploy.contract, request)
                .await?
        }
        Command::Upgrade(upgrade) => {
            let orchestrator = connect(&config, &args, store).await?;

            orchestrator
                .upgrade(&args.network, &upgrade.contract, &upgrade.artifact)
                .await?
        }
    };

    print_record(&record)
}

async fn connect(
    config: &Config,
    args: &Args,
    store: FileRecordStore,
) -> eyre::Result<ForgeOrchestrator> {
    let network = config.network(&args.network)?;
    let private_key = network.private_key(args.private_key.as_ref())?;

    let deployer = ForgeChainDeployer::connect(
        &args.network,
        network,
        private_key,
        config.contracts_dir.clone(),
        config.proxy.clone(),
    )
    .await
    .wrap_err_with(|| format!("Connecting to {}", args.network))?;

    info!(
        records = %store.dir().display(),
        policy = %config.on_existing_deployment,
        "Ready"
    );

    Ok(Orchestrator::new(store, deployer)
        .with_redeploy_policy(config.on_existing_deployment))
}

fn deploy_request(mode: DeploymentMode, deploy: &DeployArgs) -> DeployRequest {
    DeployRequest {
        mode,
        artifact: deploy.artifact(),
        args: deploy.args.clone(),
        metadata: deploy.metadata(),
    }
}

fn print_record(record: &DeploymentRecord) -> eyre::Result<()> {
    println!("{}", serde_json::to_string_pretty(record)?);

    Ok(())
}
