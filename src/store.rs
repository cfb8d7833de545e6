use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::record::DeploymentRecord;
use crate::types::{ContractName, NetworkName};

pub const DEFAULT_DEPLOYMENTS_DIR: &str = "deployments";
pub const ARCHIVE_DIR: &str = "archive";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no deployment record for {contract} on {network}")]
    NotFound {
        network: NetworkName,
        contract: ContractName,
    },
    #[error("corrupt deployment record at {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize deployment record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable single-slot mapping from (network, contract) to its record.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load(
        &self,
        network: &NetworkName,
        contract: &ContractName,
    ) -> Result<DeploymentRecord, StoreError>;

    /// Overwrites any record stored under the same key.
    async fn save(&self, record: &DeploymentRecord) -> Result<(), StoreError>;

    async fn exists(
        &self,
        network: &NetworkName,
        contract: &ContractName,
    ) -> Result<bool, StoreError>;

    /// Keeps a copy of `record` outside of its slot.
    async fn archive(
        &self,
        record: &DeploymentRecord,
    ) -> Result<PathBuf, StoreError>;
}

pub fn record_file_name(network: &NetworkName, contract: &ContractName) -> String {
    format!("{network}_{contract}.json")
}

/// One pretty-printed JSON file per key, `{dir}/{network}_{contract}.json`.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(
        &self,
        network: &NetworkName,
        contract: &ContractName,
    ) -> PathBuf {
        self.dir.join(record_file_name(network, contract))
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    #[instrument(skip(self))]
    async fn load(
        &self,
        network: &NetworkName,
        contract: &ContractName,
    ) -> Result<DeploymentRecord, StoreError> {
        let path = self.record_path(network, contract);

        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    network: network.clone(),
                    contract: contract.clone(),
                });
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let record: DeploymentRecord = serde_json::from_slice(&content)
            .map_err(|err| StoreError::Corrupt {
                path: path.clone(),
                reason: err.to_string(),
            })?;

        if &record.network != network || &record.contract != contract {
            return Err(StoreError::Corrupt {
                path,
                reason: format!(
                    "record describes {} on {}",
                    record.contract, record.network
                ),
            });
        }

        debug!(address = ?record.address, mode = %record.mode, "Loaded record");

        Ok(record)
    }

    #[instrument(skip_all, fields(network = %record.network, contract = %record.contract))]
    async fn save(&self, record: &DeploymentRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.network, &record.contract);
        let content = serde_json::to_vec_pretty(record)?;

        write_atomic(&path, content, true).await?;

        debug!("Saved record to {}", path.display());

        Ok(())
    }

    async fn exists(
        &self,
        network: &NetworkName,
        contract: &ContractName,
    ) -> Result<bool, StoreError> {
        let path = self.record_path(network, contract);

        match tokio::fs::metadata(&path).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    #[instrument(skip_all, fields(network = %record.network, contract = %record.contract))]
    async fn archive(
        &self,
        record: &DeploymentRecord,
    ) -> Result<PathBuf, StoreError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();

        // Records replaced within the same second differ by address
        let path = self.dir.join(ARCHIVE_DIR).join(format!(
            "{}_{}.{timestamp}.{:?}.json",
            record.network, record.contract, record.address
        ));

        let content = serde_json::to_vec_pretty(record)?;
        write_atomic(&path, content, false).await?;

        Ok(path)
    }
}

/// Writes into a temp file next to `path`, syncs it and renames it over
/// `path`, so readers see either the old or the new content. Without
/// `replace` an existing file at `path` is an error and stays untouched.
async fn write_atomic(
    path: &Path,
    content: Vec<u8>,
    replace: bool,
) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

    let target = path.to_path_buf();

    let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut file = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(&dir)?;

        file.write_all(&content)?;
        file.as_file().sync_all()?;
        if replace {
            file.persist(&target).map_err(|err| err.error)?;
        } else {
            file.persist_noclobber(&target).map_err(|err| err.error)?;
        }

        Ok(())
    })
    .await
    .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))
    .and_then(|result| result);

    result.map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}
