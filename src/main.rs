use clap::{Parser, Subcommand};
use etcd_steward::{
    initialize_auth, new_stop_signal, BackupMetrics, BackupScheduler, BackupStrategy,
    BootstrapConfig, BootstrapCoordinator, ConfigStore, DnsPeerDirectory, Endpoint, EngineAdmin,
    EtcdAdmin, EtcdConnector, EtcdUtl, LastBackupStrategy, LeaderOracle, LocalTimestampStrategy,
    ObjectStore, PeerDirectory, RealClock, RemoteMetadataStrategy, RestoreConfig,
    RestoreCoordinator, S3ObjectStore, SchedulerConfig, Settings, BACKUP_FILE_NAME,
    DEFAULT_NETWORK_TIMEOUT,
};
use slog::Drain;
use std::error::Error;
use std::sync::Arc;
use tokio::time::Duration;

const ENGINE_CONNECT_RETRY: Duration = Duration::from_secs(5);
const LAST_BACKUP_FILE_NAME: &str = "last-backup";

#[derive(Parser)]
#[command(name = "etcd-steward", about = "Cluster formation and backup duties for a self-managed etcd cluster")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bootstrap this member's configuration, then run leader-gated
    /// background duties until shut down.
    Start,
    /// Backup inspection, creation, and restore.
    #[command(subcommand)]
    Backup(BackupCommand),
    /// Cluster membership administration.
    #[command(subcommand)]
    Member(MemberCommand),
    /// Engine alarm administration.
    #[command(subcommand)]
    Alarm(AlarmCommand),
    /// Local cluster-configuration toggles.
    #[command(subcommand)]
    Cluster(ClusterCommand),
    /// Per-endpoint engine status.
    #[command(subcommand)]
    Endpoint(EndpointCommand),
}

#[derive(Subcommand)]
enum BackupCommand {
    /// List stored backup versions, newest first.
    List,
    /// Snapshot and upload a backup now.
    Create {
        /// Upload even if a recent backup already exists.
        #[arg(long)]
        force: bool,
    },
    /// Restore this member's data directory from a stored backup.
    Restore {
        /// Version id to restore; the most recent backup when omitted.
        version: Option<String>,
        /// Wipe the data directory contents before restoring.
        #[arg(long)]
        clean_start: bool,
    },
}

#[derive(Subcommand)]
enum MemberCommand {
    List,
    Remove {
        /// Member id, hex as printed by `member list`.
        id: String,
    },
}

#[derive(Subcommand)]
enum AlarmCommand {
    List,
    /// Disarm every active alarm.
    Disarm,
}

#[derive(Subcommand)]
enum ClusterCommand {
    /// Set force-new-cluster and pin initial-cluster to this member alone.
    /// Disaster-recovery only.
    SetForceNewClusterFlag,
    ResetForceNewClusterFlag,
}

#[derive(Subcommand)]
enum EndpointCommand {
    Status,
}

fn create_root_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let logger = create_root_logger();

    if let Err(e) = run(cli.command, logger).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(command: Command, logger: slog::Logger) -> Result<(), Box<dyn Error>> {
    let settings = Settings::from_env()?;

    match command {
        Command::Start => start(logger, settings).await,
        Command::Backup(command) => backup(logger, settings, command).await,
        Command::Member(command) => member(logger, settings, command).await,
        Command::Alarm(command) => alarm(logger, settings, command).await,
        Command::Cluster(command) => cluster(settings, command),
        Command::Endpoint(EndpointCommand::Status) => endpoint_status(logger, settings).await,
    }
}

fn backup_key(settings: &Settings) -> String {
    format!("{}/{}", settings.s3_prefix, BACKUP_FILE_NAME)
}

fn local_endpoint(settings: &Settings) -> Endpoint {
    Endpoint::derive(&settings.machine_id, &settings.app_name)
}

async fn connect_local_admin(
    logger: &slog::Logger,
    settings: &Settings,
) -> Result<EtcdAdmin, Box<dyn Error>> {
    let endpoint = local_endpoint(settings);
    let admin = EtcdAdmin::connect(
        logger.clone(),
        vec![endpoint.client_url],
        settings.root_password.clone(),
    )
    .await?;

    Ok(admin)
}

async fn start(logger: slog::Logger, settings: Settings) -> Result<(), Box<dyn Error>> {
    let directory = Arc::new(DnsPeerDirectory::new(
        logger.clone(),
        settings.app_name.clone(),
        settings.nameserver,
    )?);

    let mut coordinator = BootstrapCoordinator::new(BootstrapConfig {
        logger: logger.new(slog::o!("component" => "bootstrap")),
        clock: RealClock,
        app_name: settings.app_name.clone(),
        machine_id: settings.machine_id.clone(),
        data_dir: settings.data_dir.clone(),
        network_timeout: DEFAULT_NETWORK_TIMEOUT,
        minimum_peers: settings.minimum_peers,
        jwt: settings.jwt_material.clone(),
        directory,
        connector: Arc::new(EtcdConnector::new(
            logger.clone(),
            settings.root_password.clone(),
        )),
    });
    let (outcome, _doc) = coordinator.run().await?;
    slog::info!(logger, "Bootstrap complete"; "outcome" => ?outcome);

    // The engine itself is launched by the external supervisor from the
    // persisted document; wait for it to come up before admin RPCs.
    let endpoint = local_endpoint(&settings);
    let admin: Arc<dyn EngineAdmin> = Arc::new(wait_for_engine(&logger, &settings).await);
    let oracle = LeaderOracle::new(endpoint.name.clone(), endpoint.client_url.clone());

    if let Some(password) = &settings.root_password {
        // Only one member should attempt this; leadership is the gate.
        match oracle.is_leader(admin.as_ref()).await {
            Ok(true) => {
                if let Err(e) = initialize_auth(&logger, admin.as_ref(), password).await {
                    slog::error!(logger, "Auth initialization failed"; "error" => %e);
                }
            }
            Ok(false) => slog::debug!(logger, "Not leader, leaving auth setup to the leader"),
            Err(e) => slog::warn!(logger, "Skipping auth setup"; "error" => %e),
        }
    }

    let (stopper, stop_check) = new_stop_signal();
    if settings.backups_enabled {
        let store: Arc<dyn ObjectStore> =
            Arc::new(S3ObjectStore::connect(logger.clone(), settings.s3_bucket.clone()).await?);
        let key = backup_key(&settings);
        let strategy: Box<dyn LastBackupStrategy> = match settings.backup_strategy {
            BackupStrategy::RemoteMetadata => {
                Box::new(RemoteMetadataStrategy::new(store.clone(), key.clone()))
            }
            BackupStrategy::LocalTimestamp => Box::new(LocalTimestampStrategy::new(
                logger.clone(),
                settings.data_dir.join(LAST_BACKUP_FILE_NAME),
            )),
        };

        let scheduler = BackupScheduler::new(SchedulerConfig {
            logger: logger.new(slog::o!("component" => "backup")),
            clock: RealClock,
            interval: settings.backup_interval,
            schedule_offset: settings.schedule_offset,
            backup_key: key,
            oracle: LeaderOracle::new(endpoint.name.clone(), endpoint.client_url.clone()),
            engine: admin.clone(),
            store,
            strategy,
            metrics: BackupMetrics::new(prometheus::default_registry())?,
            stop_check,
        });
        tokio::spawn(scheduler.run());
    } else {
        slog::info!(logger, "Backups disabled: no object store credentials configured");
    }

    tokio::signal::ctrl_c().await?;
    slog::info!(logger, "Shutting down");
    drop(stopper);

    Ok(())
}

async fn wait_for_engine(logger: &slog::Logger, settings: &Settings) -> EtcdAdmin {
    loop {
        match connect_local_admin(logger, settings).await {
            Ok(admin) => return admin,
            Err(e) => {
                slog::info!(logger, "Engine not reachable yet, retrying"; "error" => %e);
                tokio::time::sleep(ENGINE_CONNECT_RETRY).await;
            }
        }
    }
}

async fn backup(
    logger: slog::Logger,
    settings: Settings,
    command: BackupCommand,
) -> Result<(), Box<dyn Error>> {
    let key = backup_key(&settings);

    match command {
        BackupCommand::List => {
            let store = S3ObjectStore::connect(logger, settings.s3_bucket.clone()).await?;
            let versions = store.list_versions(&key).await?;
            if versions.is_empty() {
                println!("No backups stored under {}", key);
                return Ok(());
            }
            println!("{:<36} {:<25} {:>12}", "VERSION", "LAST MODIFIED", "SIZE");
            for version in versions {
                println!(
                    "{:<36} {:<25} {:>12} {}",
                    version.version_id,
                    version.last_modified.to_rfc3339(),
                    version.size_bytes,
                    if version.is_latest { "(latest)" } else { "" },
                );
            }
        }
        BackupCommand::Create { force } => {
            let store: Arc<dyn ObjectStore> =
                Arc::new(S3ObjectStore::connect(logger.clone(), settings.s3_bucket.clone()).await?);

            if !force {
                let strategy = RemoteMetadataStrategy::new(store.clone(), key.clone());
                if let Some(last) = strategy.last_backup_at().await? {
                    let age = chrono::Utc::now() - last;
                    if age.to_std().unwrap_or(Duration::ZERO) < settings.backup_interval {
                        println!(
                            "Backup from {} is within the configured interval; use --force to upload anyway",
                            last.to_rfc3339()
                        );
                        return Ok(());
                    }
                }
            }

            let admin = connect_local_admin(&logger, &settings).await?;
            let temp_dir = tempfile::tempdir()?;
            let snapshot_path = temp_dir.path().join(BACKUP_FILE_NAME);
            let size = admin.snapshot_to_file(&snapshot_path).await?;
            let version_id = store.put(&key, &snapshot_path).await?;
            println!("Uploaded {} ({} bytes) as version {}", key, size, version_id);
        }
        BackupCommand::Restore {
            version,
            clean_start,
        } => {
            let coordinator = RestoreCoordinator::new(RestoreConfig {
                logger: logger.clone(),
                app_name: settings.app_name.clone(),
                machine_id: settings.machine_id.clone(),
                data_dir: settings.data_dir.clone(),
                backup_key: key,
                clean_start,
                store: Arc::new(
                    S3ObjectStore::connect(logger.clone(), settings.s3_bucket.clone()).await?,
                ),
                directory: Arc::new(DnsPeerDirectory::new(
                    logger.clone(),
                    settings.app_name.clone(),
                    settings.nameserver,
                )?),
                tool: Arc::new(EtcdUtl::new(logger)),
            });

            let report = coordinator.run(version.as_deref()).await?;
            println!("Restored version {} ({} bytes)", report.version_id, report.snapshot_size_bytes);
            println!();
            println!("Restart every member with:");
            println!("  initial-cluster-state: existing");
            println!("  initial-cluster: {}", report.initial_cluster);
        }
    }

    Ok(())
}

async fn member(
    logger: slog::Logger,
    settings: Settings,
    command: MemberCommand,
) -> Result<(), Box<dyn Error>> {
    let admin = connect_local_admin(&logger, &settings).await?;

    match command {
        MemberCommand::List => {
            print_members(&admin.member_list().await?);
        }
        MemberCommand::Remove { id } => {
            let id = parse_member_id(&id)?;
            let remaining = admin.member_remove(id).await?;
            println!("Removed {:x}. Remaining members:", id);
            print_members(&remaining);
        }
    }

    Ok(())
}

fn print_members(members: &[etcd_steward::MemberRecord]) {
    println!("{:<18} {:<18} {:<45} {}", "ID", "NAME", "PEER URLS", "LEARNER");
    for member in members {
        println!(
            "{:<18x} {:<18} {:<45} {}",
            member.id,
            member.name,
            member.peer_urls.join(","),
            member.is_learner,
        );
    }
}

fn parse_member_id(raw: &str) -> Result<u64, Box<dyn Error>> {
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| format!("invalid member id {:?}: {}", raw, e).into())
}

async fn alarm(
    logger: slog::Logger,
    settings: Settings,
    command: AlarmCommand,
) -> Result<(), Box<dyn Error>> {
    let admin = connect_local_admin(&logger, &settings).await?;

    match command {
        AlarmCommand::List => {
            let alarms = admin.alarm_list().await?;
            if alarms.is_empty() {
                println!("No active alarms");
            }
            for alarm in alarms {
                println!("{:x} {}", alarm.member_id, alarm.alarm);
            }
        }
        AlarmCommand::Disarm => {
            let alarms = admin.alarm_list().await?;
            if alarms.is_empty() {
                println!("No active alarms");
                return Ok(());
            }
            for alarm in &alarms {
                admin.alarm_disarm(alarm.member_id).await?;
                println!("Disarmed {} on {:x}", alarm.alarm, alarm.member_id);
            }
        }
    }

    Ok(())
}

fn cluster(settings: Settings, command: ClusterCommand) -> Result<(), Box<dyn Error>> {
    let store = ConfigStore::new(&settings.data_dir);
    let mut doc = store.load()?;

    match command {
        ClusterCommand::SetForceNewClusterFlag => {
            doc.force_new_cluster = true;
            // A forced new cluster starts from this member alone.
            doc.initial_cluster = format!("{}={}", doc.name, doc.initial_advertise_peer_urls);
            store.persist(&doc)?;
            println!("force-new-cluster set; initial-cluster pinned to {}", doc.initial_cluster);
        }
        ClusterCommand::ResetForceNewClusterFlag => {
            doc.force_new_cluster = false;
            store.persist(&doc)?;
            println!("force-new-cluster cleared");
        }
    }

    Ok(())
}

async fn endpoint_status(logger: slog::Logger, settings: Settings) -> Result<(), Box<dyn Error>> {
    let directory = DnsPeerDirectory::new(
        logger.clone(),
        settings.app_name.clone(),
        settings.nameserver,
    )?;
    let admin = connect_local_admin(&logger, &settings).await?;

    let machines = directory.resolve_peers().await?;
    println!("{:<45} {:<18} {:>12} {}", "ENDPOINT", "MEMBER ID", "DB SIZE", "LEADER");
    for machine in machines {
        let endpoint = Endpoint::derive(&machine.id, &settings.app_name);
        match admin.status(&endpoint.client_url).await {
            Ok(status) => println!(
                "{:<45} {:<18x} {:>12} {}",
                endpoint.client_url,
                status.member_id,
                status.db_size_bytes,
                if status.leader_id == status.member_id { "yes" } else { "" },
            ),
            Err(e) => println!("{:<45} unreachable: {}", endpoint.client_url, e),
        }
    }

    Ok(())
}
