mod tool;

pub use tool::EtcdUtl;
pub use tool::RestoreRequest;
pub use tool::SnapshotTool;

use crate::discovery::{cluster_token, DiscoveryError, Endpoint, PeerDirectory};
use crate::engine::{stop_engine_process, ProcessStopError};
use crate::objectstore::{ObjectStore, ObjectStoreError};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;

const STOP_GRACE: Duration = Duration::from_secs(30);
const DOWNLOAD_FILE_NAME: &str = "etcd-backup.db";

#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("no backup versions found under {0}")]
    NoVersions(String),

    #[error("backup version {0} does not exist")]
    VersionNotFound(String),

    #[error(transparent)]
    Store(#[from] ObjectStoreError),

    /// Aborts the restore before any destructive step; the live data
    /// directory is never touched.
    #[error("snapshot verification failed: {0}")]
    SnapshotVerificationFailed(String),

    /// Fatal: proceeding while the old process may still hold the data
    /// directory open is unsafe.
    #[error(transparent)]
    StopEngine(#[from] ProcessStopError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("snapshot restore tool failed: {0}")]
    RestoreTool(String),

    #[error("restore io failure")]
    Io(#[from] std::io::Error),
}

/// What the operator needs for the coordinated cluster-wide restart that
/// follows a restore. Restarting the other members is deliberately manual.
#[derive(Debug)]
pub struct RestoreReport {
    pub version_id: String,
    pub snapshot_size_bytes: u64,
    pub initial_cluster: String,
}

pub struct RestoreConfig {
    pub logger: slog::Logger,
    pub app_name: String,
    pub machine_id: String,
    pub data_dir: PathBuf,
    pub backup_key: String,
    /// Wipe the data directory *contents* (not the directory itself) before
    /// restoring, guaranteeing no residue from the prior instance.
    pub clean_start: bool,
    pub store: Arc<dyn ObjectStore>,
    pub directory: Arc<dyn PeerDirectory>,
    pub tool: Arc<dyn SnapshotTool>,
}

/// Operator-invoked, linear restore procedure. Not a background loop.
pub struct RestoreCoordinator {
    logger: slog::Logger,
    app_name: String,
    machine_id: String,
    data_dir: PathBuf,
    backup_key: String,
    clean_start: bool,
    store: Arc<dyn ObjectStore>,
    directory: Arc<dyn PeerDirectory>,
    tool: Arc<dyn SnapshotTool>,
}

impl RestoreCoordinator {
    pub fn new(config: RestoreConfig) -> RestoreCoordinator {
        RestoreCoordinator {
            logger: config.logger,
            app_name: config.app_name,
            machine_id: config.machine_id,
            data_dir: config.data_dir,
            backup_key: config.backup_key,
            clean_start: config.clean_start,
            store: config.store,
            directory: config.directory,
            tool: config.tool,
        }
    }

    /// Restore from `version_id`, or from the most recent version when `None`.
    pub async fn run(&self, version_id: Option<&str>) -> Result<RestoreReport, RestoreError> {
        let versions = self.store.list_versions(&self.backup_key).await?;
        if versions.is_empty() {
            return Err(RestoreError::NoVersions(self.backup_key.clone()));
        }

        // Listing is newest first.
        let target = match version_id {
            Some(version_id) => versions
                .iter()
                .find(|v| v.version_id == version_id)
                .ok_or_else(|| RestoreError::VersionNotFound(version_id.to_string()))?,
            None => &versions[0],
        };
        slog::info!(
            self.logger,
            "Restoring from backup";
            "version_id" => &target.version_id,
            "last_modified" => %target.last_modified,
        );

        let temp_dir = tempfile::tempdir()?;
        let snapshot_path = temp_dir.path().join(DOWNLOAD_FILE_NAME);
        let snapshot_size_bytes = self
            .store
            .get(&self.backup_key, Some(&target.version_id), &snapshot_path)
            .await?;

        // Structural integrity check before any mutation of the live member.
        self.tool
            .verify(&snapshot_path)
            .await
            .map_err(RestoreError::SnapshotVerificationFailed)?;

        stop_engine_process(&self.logger, STOP_GRACE).await?;

        if self.clean_start {
            slog::info!(self.logger, "Clearing data directory"; "path" => %self.data_dir.display());
            clear_dir_contents(&self.data_dir)?;
        }

        // Every discoverable peer goes into the new initial-cluster so the
        // whole membership can be restarted in coordination afterward.
        let machines = self.directory.resolve_peers().await?;
        let initial_cluster = machines
            .iter()
            .map(|m| {
                let peer = Endpoint::derive(&m.id, &self.app_name);
                format!("{}={}", peer.name, peer.peer_url)
            })
            .collect::<Vec<_>>()
            .join(",");

        let local = Endpoint::derive(&self.machine_id, &self.app_name);
        self.tool
            .restore(RestoreRequest {
                snapshot: snapshot_path.clone(),
                name: local.name.clone(),
                data_dir: self.data_dir.clone(),
                initial_cluster: initial_cluster.clone(),
                initial_cluster_token: cluster_token(&self.app_name),
                initial_advertise_peer_url: local.peer_url.clone(),
            })
            .await
            .map_err(RestoreError::RestoreTool)?;

        slog::info!(
            self.logger,
            "Restore complete. Restart every member with initial-cluster-state 'existing' and this initial-cluster";
            "initial_cluster" => &initial_cluster,
        );

        Ok(RestoreReport {
            version_id: target.version_id.clone(),
            snapshot_size_bytes,
            initial_cluster,
        })
    }
}

fn clear_dir_contents(dir: &std::path::Path) -> std::io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(entry.path())?;
        } else {
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
