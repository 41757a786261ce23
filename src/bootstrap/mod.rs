use crate::clock::Clock;
use crate::confdoc::{ClusterState, ConfigDocument, ConfigError, ConfigStore};
use crate::discovery::{Endpoint, Machine, PeerDirectory};
use crate::engine::{EngineAdmin, EngineConnector, EngineError, MemberAddOutcome};
use crate::settings::JwtMaterial;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;

/// Sentinel recording that this member completed its first bootstrap
/// decision. Cleared only by explicit reset tooling.
pub const BOOTSTRAP_MARKER_FILE_NAME: &str = ".bootstrapped";

const NETWORK_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// Fatal: the process cannot safely decide new-vs-join without network
    /// visibility of itself.
    #[error("timed out waiting for network visibility of machine {0}")]
    NetworkTimeout(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Fatal to this boot attempt; the supervisor restarts the process and
    /// the whole sequence retries from the top.
    #[error("joining existing cluster failed: {0}")]
    Join(EngineError),

    #[error("bootstrap io failure")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Eq, PartialEq)]
pub enum BootstrapOutcome {
    /// A persisted config document already existed; identity kept as-is.
    Rejoined,
    FormedNewCluster,
    JoinedExisting,
}

pub struct BootstrapConfig<C: Clock> {
    pub logger: slog::Logger,
    pub clock: C,
    pub app_name: String,
    pub machine_id: String,
    pub data_dir: PathBuf,
    pub network_timeout: Duration,
    /// Best-effort mitigation of the simultaneous-singleton race: wait until
    /// at least this many *other* peers are discoverable before deciding.
    pub minimum_peers: usize,
    pub jwt: Option<JwtMaterial>,
    pub directory: Arc<dyn PeerDirectory>,
    pub connector: Arc<dyn EngineConnector>,
}

/// Drives `AwaitingNetwork -> Deciding -> (NewCluster | JoiningExisting) ->
/// Configured` exactly once per process start.
pub struct BootstrapCoordinator<C: Clock> {
    logger: slog::Logger,
    clock: C,
    app_name: String,
    machine_id: String,
    data_dir: PathBuf,
    network_timeout: Duration,
    minimum_peers: usize,
    jwt: Option<JwtMaterial>,
    directory: Arc<dyn PeerDirectory>,
    connector: Arc<dyn EngineConnector>,
}

impl<C: Clock> BootstrapCoordinator<C> {
    pub fn new(config: BootstrapConfig<C>) -> BootstrapCoordinator<C> {
        BootstrapCoordinator {
            logger: config.logger,
            clock: config.clock,
            app_name: config.app_name,
            machine_id: config.machine_id,
            data_dir: config.data_dir,
            network_timeout: config.network_timeout,
            minimum_peers: config.minimum_peers,
            jwt: config.jwt,
            directory: config.directory,
            connector: config.connector,
        }
    }

    pub async fn run(&mut self) -> Result<(BootstrapOutcome, ConfigDocument), BootstrapError> {
        let endpoint = Endpoint::derive(&self.machine_id, &self.app_name);
        slog::info!(
            self.logger,
            "Bootstrapping member";
            "name" => &endpoint.name,
            "addr" => &endpoint.addr,
        );

        let machines = self.await_network().await?;
        std::fs::create_dir_all(&self.data_dir)?;

        let store = ConfigStore::new(&self.data_dir);
        if store.exists() {
            // Rejoin path: the on-disk replication log already encodes this
            // member's identity. Only the auth token material is refreshed.
            let mut doc = store.load()?;
            doc.refresh_auth_token(self.jwt.as_ref())?;
            store.persist(&doc)?;
            self.write_marker()?;
            slog::info!(self.logger, "Existing configuration found, rejoining as-is");
            return Ok((BootstrapOutcome::Rejoined, doc));
        }

        let mut doc = ConfigDocument::generate_new(&endpoint, &self.app_name, &self.data_dir);

        let outcome = match self.probe_peers(&machines).await {
            Some(admin) => {
                let added = admin
                    .member_add(&endpoint.peer_url)
                    .await
                    .map_err(BootstrapError::Join)?;
                doc.initial_cluster = initial_cluster_from_members(&endpoint, &added);
                doc.initial_cluster_state = ClusterState::Existing;
                slog::info!(
                    self.logger,
                    "Joined existing cluster";
                    "member_id" => added.added_id,
                    "initial_cluster" => &doc.initial_cluster,
                );
                BootstrapOutcome::JoinedExisting
            }
            None => {
                slog::info!(self.logger, "No responding peers, forming a new cluster");
                BootstrapOutcome::FormedNewCluster
            }
        };

        doc.refresh_auth_token(self.jwt.as_ref())?;
        store.persist(&doc)?;
        self.write_marker()?;

        Ok((outcome, doc))
    }

    /// Poll discovery until this machine sees itself (proving DNS has
    /// propagated) and the minimum-peer gate is satisfied.
    async fn await_network(&mut self) -> Result<Vec<Machine>, BootstrapError> {
        let deadline = self.clock.now() + self.network_timeout;

        loop {
            match self.directory.resolve_peers().await {
                Ok(machines) => {
                    let sees_self = machines.iter().any(|m| m.id == self.machine_id);
                    let other_peers =
                        machines.iter().filter(|m| m.id != self.machine_id).count();

                    if sees_self && other_peers >= self.minimum_peers {
                        return Ok(machines);
                    }
                    slog::debug!(
                        self.logger,
                        "Waiting for network visibility";
                        "sees_self" => sees_self,
                        "other_peers" => other_peers,
                    );
                }
                Err(e) => {
                    slog::debug!(self.logger, "Peer discovery not ready"; "error" => %e);
                }
            }

            if self.clock.now() >= deadline {
                return Err(BootstrapError::NetworkTimeout(self.machine_id.clone()));
            }
            self.clock.sleep(NETWORK_POLL_INTERVAL).await;
        }
    }

    /// Probe every other discovered peer's client endpoint. The first one
    /// answering a status RPC gets to process our member-add.
    async fn probe_peers(&self, machines: &[Machine]) -> Option<Box<dyn EngineAdmin>> {
        for machine in machines.iter().filter(|m| m.id != self.machine_id) {
            let peer = Endpoint::derive(&machine.id, &self.app_name);

            let admin = match self.connector.connect(vec![peer.client_url.clone()]).await {
                Ok(admin) => admin,
                Err(e) => {
                    slog::debug!(self.logger, "Peer unreachable"; "addr" => &peer.addr, "error" => %e);
                    continue;
                }
            };

            match admin.status(&peer.client_url).await {
                Ok(_) => {
                    slog::info!(self.logger, "Found responding peer"; "addr" => &peer.addr);
                    return Some(admin);
                }
                Err(e) => {
                    slog::debug!(self.logger, "Peer not answering status"; "addr" => &peer.addr, "error" => %e);
                }
            }
        }

        None
    }

    fn write_marker(&self) -> std::io::Result<()> {
        let path = self.data_dir.join(BOOTSTRAP_MARKER_FILE_NAME);
        if path.exists() {
            return Ok(());
        }
        std::fs::write(path, self.clock.now_utc().to_rfc3339())
    }
}

/// `initial-cluster` for a joining member comes from the member-add response
/// (the authoritative list), never from DNS. One entry per reported peer URL.
/// Only our own entry's server-assigned placeholder name is substituted with
/// the locally derived one; any other not-yet-started member keeps its own
/// peer URLs and its (possibly still empty) reported name.
fn initial_cluster_from_members(local: &Endpoint, added: &MemberAddOutcome) -> String {
    let mut entries = Vec::new();
    for member in &added.members {
        let name = if member.id == added.added_id {
            &local.name
        } else {
            &member.name
        };
        for peer_url in &member.peer_urls {
            entries.push(format!("{}={}", name, peer_url));
        }
    }
    entries.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{mocked_clock, RealClock};
    use crate::discovery::DiscoveryError;
    use crate::engine::{AlarmRecord, EngineStatus, MemberRecord};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const APP: &str = "kv-prod";
    const SELF_ID: &str = "3d8d9014";
    const PEER_ID: &str = "9080e2a1";

    fn machine(id: &str) -> Machine {
        Machine {
            id: id.to_string(),
            region: "iad".to_string(),
        }
    }

    struct StaticDirectory {
        machines: Vec<Machine>,
        available: bool,
    }

    #[async_trait::async_trait]
    impl PeerDirectory for StaticDirectory {
        async fn resolve_peers(&self) -> Result<Vec<Machine>, DiscoveryError> {
            if !self.available {
                return Err(DiscoveryError::Unavailable("no records".to_string()));
            }
            Ok(self.machines.clone())
        }
    }

    #[derive(Clone)]
    struct JoinEngine {
        outcome: MemberAddOutcome,
        member_add_calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl EngineAdmin for JoinEngine {
        async fn member_list(&self) -> Result<Vec<MemberRecord>, EngineError> {
            unimplemented!()
        }
        async fn member_add(&self, _: &str) -> Result<MemberAddOutcome, EngineError> {
            self.member_add_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.outcome.clone())
        }
        async fn member_remove(&self, _: u64) -> Result<Vec<MemberRecord>, EngineError> {
            unimplemented!()
        }
        async fn status(&self, _: &str) -> Result<EngineStatus, EngineError> {
            Ok(EngineStatus {
                member_id: 1,
                leader_id: 1,
                db_size_bytes: 0,
            })
        }
        async fn alarm_list(&self) -> Result<Vec<AlarmRecord>, EngineError> {
            unimplemented!()
        }
        async fn alarm_disarm(&self, _: u64) -> Result<Vec<AlarmRecord>, EngineError> {
            unimplemented!()
        }
        async fn snapshot_to_file(&self, _: &Path) -> Result<u64, EngineError> {
            unimplemented!()
        }
        async fn user_add(&self, _: &str, _: &str) -> Result<(), EngineError> {
            unimplemented!()
        }
        async fn user_grant_role(&self, _: &str, _: &str) -> Result<(), EngineError> {
            unimplemented!()
        }
        async fn auth_enable(&self) -> Result<(), EngineError> {
            unimplemented!()
        }
    }

    struct ScriptedConnector {
        responding: Option<JoinEngine>,
        connect_calls: AtomicUsize,
    }

    impl ScriptedConnector {
        fn unreachable() -> ScriptedConnector {
            ScriptedConnector {
                responding: None,
                connect_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl EngineConnector for ScriptedConnector {
        async fn connect(
            &self,
            _endpoints: Vec<String>,
        ) -> Result<Box<dyn EngineAdmin>, EngineError> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            match &self.responding {
                Some(engine) => Ok(Box::new(engine.clone())),
                None => Err(EngineError::Timeout),
            }
        }
    }

    /// Let a spawned coordinator reach its first poll sleep, so a following
    /// mock-clock advance lands on a deadline the task has already computed.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    fn coordinator(
        data_dir: &Path,
        directory: StaticDirectory,
        connector: Arc<ScriptedConnector>,
        minimum_peers: usize,
    ) -> BootstrapCoordinator<RealClock> {
        BootstrapCoordinator::new(BootstrapConfig {
            logger: slog::Logger::root(slog::Discard, slog::o!()),
            clock: RealClock,
            app_name: APP.to_string(),
            machine_id: SELF_ID.to_string(),
            data_dir: data_dir.to_path_buf(),
            network_timeout: Duration::from_secs(30),
            minimum_peers,
            jwt: None,
            directory: Arc::new(directory),
            connector,
        })
    }

    #[tokio::test]
    async fn lone_member_forms_new_singleton_cluster() {
        // -- setup --
        let tmp = tempfile::tempdir().unwrap();
        let directory = StaticDirectory {
            machines: vec![machine(SELF_ID)],
            available: true,
        };
        let connector = Arc::new(ScriptedConnector::unreachable());

        // -- execute --
        let (outcome, doc) = coordinator(tmp.path(), directory, connector.clone(), 0)
            .run()
            .await
            .unwrap();

        // -- verify --
        assert_eq!(outcome, BootstrapOutcome::FormedNewCluster);
        assert_eq!(doc.initial_cluster_state, ClusterState::New);
        let local = Endpoint::derive(SELF_ID, APP);
        assert_eq!(doc.initial_cluster, format!("{}={}", local.name, local.peer_url));
        assert_eq!(connector.connect_calls.load(Ordering::SeqCst), 0);
        assert!(tmp.path().join(BOOTSTRAP_MARKER_FILE_NAME).exists());
        assert!(ConfigStore::new(tmp.path()).exists());
    }

    #[tokio::test]
    async fn unreachable_peers_also_mean_new_cluster() {
        let tmp = tempfile::tempdir().unwrap();
        let directory = StaticDirectory {
            machines: vec![machine(SELF_ID), machine(PEER_ID)],
            available: true,
        };
        let connector = Arc::new(ScriptedConnector::unreachable());

        let (outcome, doc) = coordinator(tmp.path(), directory, connector.clone(), 0)
            .run()
            .await
            .unwrap();

        assert_eq!(outcome, BootstrapOutcome::FormedNewCluster);
        assert_eq!(doc.initial_cluster_state, ClusterState::New);
        // The one other peer was probed and didn't answer.
        assert_eq!(connector.connect_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn responding_peer_means_join_with_member_list_from_response() {
        // -- setup --
        let tmp = tempfile::tempdir().unwrap();
        let local = Endpoint::derive(SELF_ID, APP);
        let peer = Endpoint::derive(PEER_ID, APP);

        let outcome_members = MemberAddOutcome {
            added_id: 42,
            members: vec![
                MemberRecord {
                    id: 7,
                    name: peer.name.clone(),
                    peer_urls: vec![peer.peer_url.clone()],
                    client_urls: vec![peer.client_url.clone()],
                    is_learner: false,
                },
                // Server-assigned placeholder for our own just-added entry.
                MemberRecord {
                    id: 42,
                    name: String::new(),
                    peer_urls: vec![local.peer_url.clone()],
                    client_urls: vec![],
                    is_learner: false,
                },
            ],
        };
        let member_add_calls = Arc::new(AtomicUsize::new(0));
        let connector = Arc::new(ScriptedConnector {
            responding: Some(JoinEngine {
                outcome: outcome_members,
                member_add_calls: member_add_calls.clone(),
            }),
            connect_calls: AtomicUsize::new(0),
        });
        let directory = StaticDirectory {
            machines: vec![machine(SELF_ID), machine(PEER_ID)],
            available: true,
        };

        // -- execute --
        let (outcome, doc) = coordinator(tmp.path(), directory, connector, 0)
            .run()
            .await
            .unwrap();

        // -- verify --
        assert_eq!(outcome, BootstrapOutcome::JoinedExisting);
        assert_eq!(doc.initial_cluster_state, ClusterState::Existing);
        assert_eq!(
            doc.initial_cluster,
            format!(
                "{}={},{}={}",
                peer.name, peer.peer_url, local.name, local.peer_url
            )
        );
        assert_eq!(member_add_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrently_joining_member_keeps_its_own_peer_url() {
        // -- setup: the member-add response carries a second not-yet-started
        // member whose name is still empty --
        let tmp = tempfile::tempdir().unwrap();
        let local = Endpoint::derive(SELF_ID, APP);
        let peer = Endpoint::derive(PEER_ID, APP);
        let unstarted = Endpoint::derive("c0ffee99", APP);

        let outcome_members = MemberAddOutcome {
            added_id: 42,
            members: vec![
                MemberRecord {
                    id: 7,
                    name: peer.name.clone(),
                    peer_urls: vec![peer.peer_url.clone()],
                    client_urls: vec![peer.client_url.clone()],
                    is_learner: false,
                },
                MemberRecord {
                    id: 55,
                    name: String::new(),
                    peer_urls: vec![unstarted.peer_url.clone()],
                    client_urls: vec![],
                    is_learner: false,
                },
                MemberRecord {
                    id: 42,
                    name: String::new(),
                    peer_urls: vec![local.peer_url.clone()],
                    client_urls: vec![],
                    is_learner: false,
                },
            ],
        };
        let connector = Arc::new(ScriptedConnector {
            responding: Some(JoinEngine {
                outcome: outcome_members,
                member_add_calls: Arc::new(AtomicUsize::new(0)),
            }),
            connect_calls: AtomicUsize::new(0),
        });
        let directory = StaticDirectory {
            machines: vec![machine(SELF_ID), machine(PEER_ID)],
            available: true,
        };

        // -- execute --
        let (_, doc) = coordinator(tmp.path(), directory, connector, 0)
            .run()
            .await
            .unwrap();

        // -- verify: one entry per reported member, the unstarted member's
        // peer URL preserved, and our own entry present exactly once --
        assert_eq!(
            doc.initial_cluster,
            format!(
                "{}={},={},{}={}",
                peer.name, peer.peer_url, unstarted.peer_url, local.name, local.peer_url
            )
        );
    }

    #[tokio::test]
    async fn rejoin_keeps_persisted_identity_without_probing() {
        // -- setup: a document persisted by a previous boot --
        let tmp = tempfile::tempdir().unwrap();
        let local = Endpoint::derive(SELF_ID, APP);
        let mut previous = ConfigDocument::generate_new(&local, APP, tmp.path());
        previous.initial_cluster_state = ClusterState::Existing;
        previous.initial_cluster = "a=http://a:2380,b=http://b:2380".to_string();
        ConfigStore::new(tmp.path()).persist(&previous).unwrap();

        let directory = StaticDirectory {
            machines: vec![machine(SELF_ID), machine(PEER_ID)],
            available: true,
        };
        let connector = Arc::new(ScriptedConnector::unreachable());

        // -- execute --
        let (outcome, doc) = coordinator(tmp.path(), directory, connector.clone(), 0)
            .run()
            .await
            .unwrap();

        // -- verify: identity untouched, peers never probed --
        assert_eq!(outcome, BootstrapOutcome::Rejoined);
        assert_eq!(doc.initial_cluster, previous.initial_cluster);
        assert_eq!(doc.initial_cluster_state, ClusterState::Existing);
        assert_eq!(connector.connect_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn network_timeout_is_fatal() {
        // -- setup: discovery never becomes available --
        let tmp = tempfile::tempdir().unwrap();
        let (clock, mut controller) = mocked_clock();
        let mut coordinator = BootstrapCoordinator::new(BootstrapConfig {
            logger: slog::Logger::root(slog::Discard, slog::o!()),
            clock,
            app_name: APP.to_string(),
            machine_id: SELF_ID.to_string(),
            data_dir: tmp.path().to_path_buf(),
            network_timeout: DEFAULT_NETWORK_TIMEOUT,
            minimum_peers: 0,
            jwt: None,
            directory: Arc::new(StaticDirectory {
                machines: vec![],
                available: false,
            }),
            connector: Arc::new(ScriptedConnector::unreachable()),
        });

        // -- execute --
        let handle = tokio::spawn(async move { coordinator.run().await });
        settle().await;
        controller.advance(DEFAULT_NETWORK_TIMEOUT + Duration::from_secs(2));

        // -- verify --
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("bootstrap did not resolve")
            .unwrap();
        assert!(matches!(result, Err(BootstrapError::NetworkTimeout(_))));
    }

    #[tokio::test]
    async fn minimum_peer_gate_holds_back_the_decision() {
        // -- setup: only ourselves discoverable, but one other peer required --
        let tmp = tempfile::tempdir().unwrap();
        let (clock, mut controller) = mocked_clock();
        let mut coordinator = BootstrapCoordinator::new(BootstrapConfig {
            logger: slog::Logger::root(slog::Discard, slog::o!()),
            clock,
            app_name: APP.to_string(),
            machine_id: SELF_ID.to_string(),
            data_dir: tmp.path().to_path_buf(),
            network_timeout: DEFAULT_NETWORK_TIMEOUT,
            minimum_peers: 1,
            jwt: None,
            directory: Arc::new(StaticDirectory {
                machines: vec![machine(SELF_ID)],
                available: true,
            }),
            connector: Arc::new(ScriptedConnector::unreachable()),
        });

        // -- execute --
        let handle = tokio::spawn(async move { coordinator.run().await });
        settle().await;
        controller.advance(DEFAULT_NETWORK_TIMEOUT + Duration::from_secs(2));

        // -- verify: gate never satisfied, so the wait timed out --
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("bootstrap did not resolve")
            .unwrap();
        assert!(matches!(result, Err(BootstrapError::NetworkTimeout(_))));
    }
}
