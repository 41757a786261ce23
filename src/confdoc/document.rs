use crate::discovery::{cluster_token, Endpoint};
use crate::settings::JwtMaterial;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

/// Whether the engine should form a brand-new cluster or join one that
/// already exists. `New` is legal only the first time a member is configured,
/// and only when no other reachable member could be contacted.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    New,
    Existing,
}

/// The static configuration document the engine consumes, persisted as YAML
/// alongside the data directory. Once persisted it is authoritative on every
/// subsequent restart: the on-disk replication log already encodes this
/// member's identity, so the document is loaded, never regenerated.
///
/// Fields added after the first shipped schema carry serde defaults, so a
/// document written by an older revision still loads (default-fill rather
/// than parallel document shapes).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConfigDocument {
    pub name: String,
    #[serde(rename = "data-dir")]
    pub data_dir: PathBuf,
    #[serde(rename = "advertise-client-urls")]
    pub advertise_client_urls: String,
    #[serde(rename = "listen-client-urls")]
    pub listen_client_urls: String,
    #[serde(rename = "listen-peer-urls")]
    pub listen_peer_urls: String,
    #[serde(rename = "initial-cluster")]
    pub initial_cluster: String,
    #[serde(rename = "initial-cluster-token")]
    pub initial_cluster_token: String,
    #[serde(rename = "initial-cluster-state")]
    pub initial_cluster_state: ClusterState,
    #[serde(rename = "initial-advertise-peer-urls")]
    pub initial_advertise_peer_urls: String,
    /// Disaster-recovery escape hatch, set only by explicit admin action.
    #[serde(rename = "force-new-cluster", default)]
    pub force_new_cluster: bool,
    #[serde(rename = "auto-compaction-mode", default = "default_compaction_mode")]
    pub auto_compaction_mode: String,
    #[serde(rename = "auto-compaction-retention", default = "default_compaction_retention")]
    pub auto_compaction_retention: String,
    #[serde(rename = "auth-token", default = "default_auth_token")]
    pub auth_token: String,
    #[serde(rename = "max-snapshots", default = "default_max_snapshots")]
    pub max_snapshots: u32,
    #[serde(rename = "max-wals", default = "default_max_wals")]
    pub max_wals: u32,
    #[serde(rename = "snapshot-count", default = "default_snapshot_count")]
    pub snapshot_count: u32,
}

fn default_compaction_mode() -> String {
    "periodic".to_string()
}

fn default_compaction_retention() -> String {
    "1".to_string()
}

fn default_auth_token() -> String {
    "simple".to_string()
}

fn default_max_snapshots() -> u32 {
    10
}

fn default_max_wals() -> u32 {
    10
}

fn default_snapshot_count() -> u32 {
    10_000
}

impl ConfigDocument {
    /// Build the singleton first-boot document: `initial-cluster` contains
    /// only this member, state is `new`. Callers on the join path overwrite
    /// both before persisting.
    pub fn generate_new(endpoint: &Endpoint, app_name: &str, data_dir: &Path) -> ConfigDocument {
        ConfigDocument {
            name: endpoint.name.clone(),
            data_dir: data_dir.to_path_buf(),
            // Listen on all interfaces at the default ports; advertise the
            // stable DNS name so other members can connect.
            listen_peer_urls: "http://[::]:2380".to_string(),
            listen_client_urls: "http://[::]:2379".to_string(),
            advertise_client_urls: endpoint.client_url.clone(),
            initial_advertise_peer_urls: endpoint.peer_url.clone(),
            initial_cluster: format!("{}={}", endpoint.name, endpoint.peer_url),
            initial_cluster_token: cluster_token(app_name),
            initial_cluster_state: ClusterState::New,
            force_new_cluster: false,
            auto_compaction_mode: default_compaction_mode(),
            auto_compaction_retention: default_compaction_retention(),
            auth_token: default_auth_token(),
            max_snapshots: default_max_snapshots(),
            max_wals: default_max_wals(),
            snapshot_count: default_snapshot_count(),
        }
    }

    /// Refresh the `auth-token` field (and backing cert files) from the
    /// currently configured JWT material. Touches nothing else, so a rejoin
    /// reload stays byte-equivalent aside from this field.
    pub fn refresh_auth_token(&mut self, jwt: Option<&JwtMaterial>) -> io::Result<()> {
        let material = match jwt {
            Some(material) => material,
            None => {
                self.auth_token = default_auth_token();
                return Ok(());
            }
        };

        let cert_dir = self.data_dir.join("certs");
        std::fs::create_dir_all(&cert_dir)?;

        let public_path = cert_dir.join("jwt_token.pub");
        let private_path = cert_dir.join("jwt_token");
        std::fs::write(&public_path, material.public_cert.as_bytes())?;
        std::fs::write(&private_path, material.private_cert.as_bytes())?;

        self.auth_token = format!(
            "jwt,pub-key={},priv-key={},sign-method={}",
            public_path.display(),
            private_path.display(),
            material.sign_method,
        );

        Ok(())
    }
}
