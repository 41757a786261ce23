mod backup;
mod bootstrap;
mod clock;
mod confdoc;
mod discovery;
mod engine;
mod leadership;
mod objectstore;
mod restore;
mod settings;
mod stop_signal;

pub use backup::BackupError;
pub use backup::BackupMetrics;
pub use backup::BackupScheduler;
pub use backup::LastBackupStrategy;
pub use backup::LocalTimestampStrategy;
pub use backup::RemoteMetadataStrategy;
pub use backup::SchedulerConfig;
pub use backup::BACKUP_FILE_NAME;
pub use bootstrap::BootstrapConfig;
pub use bootstrap::BootstrapCoordinator;
pub use bootstrap::BootstrapError;
pub use bootstrap::BootstrapOutcome;
pub use bootstrap::BOOTSTRAP_MARKER_FILE_NAME;
pub use bootstrap::DEFAULT_NETWORK_TIMEOUT;
pub use clock::Clock;
pub use clock::RealClock;
pub use confdoc::ClusterState;
pub use confdoc::ConfigDocument;
pub use confdoc::ConfigError;
pub use confdoc::ConfigStore;
pub use confdoc::CONFIG_FILE_NAME;
pub use discovery::cluster_token;
pub use discovery::DiscoveryError;
pub use discovery::DnsPeerDirectory;
pub use discovery::Endpoint;
pub use discovery::Machine;
pub use discovery::PeerDirectory;
pub use engine::initialize_auth;
pub use engine::stop_engine_process;
pub use engine::AlarmRecord;
pub use engine::EngineAdmin;
pub use engine::EngineConnector;
pub use engine::EngineError;
pub use engine::EngineStatus;
pub use engine::EtcdAdmin;
pub use engine::EtcdConnector;
pub use engine::MemberAddOutcome;
pub use engine::MemberLookup;
pub use engine::MemberRecord;
pub use engine::ProcessStopError;
pub use leadership::LeaderOracle;
pub use leadership::LeadershipError;
pub use objectstore::BackupVersion;
pub use objectstore::InMemoryObjectStore;
pub use objectstore::ObjectStore;
pub use objectstore::ObjectStoreError;
pub use objectstore::S3ObjectStore;
pub use restore::EtcdUtl;
pub use restore::RestoreConfig;
pub use restore::RestoreCoordinator;
pub use restore::RestoreError;
pub use restore::RestoreReport;
pub use restore::RestoreRequest;
pub use restore::SnapshotTool;
pub use settings::BackupStrategy;
pub use settings::JwtMaterial;
pub use settings::Settings;
pub use settings::SettingsError;
pub use stop_signal::new as new_stop_signal;
pub use stop_signal::StopCheck;
pub use stop_signal::Stopper;
