use crate::backup::metrics::BackupMetrics;
use crate::backup::strategy::{BackupError, LastBackupStrategy};
use crate::clock::Clock;
use crate::engine::EngineAdmin;
use crate::leadership::LeaderOracle;
use crate::objectstore::ObjectStore;
use crate::stop_signal::StopCheck;
use std::sync::Arc;
use tokio::time::Duration;

/// Object name under the cluster's namespace prefix. Every upload of this key
/// produces a new revision; versioning is the safety net against racing
/// writers during a leadership hand-off.
pub const BACKUP_FILE_NAME: &str = "etcd-backup.db";

const SNAPSHOT_TEMP_NAME: &str = "snapshot.db";

// A failed attempt retries well before a full interval, since the schedule is
// measured from the last successful backup.
const RETRY_DELAY: Duration = Duration::from_secs(60);

pub struct SchedulerConfig<C: Clock> {
    pub logger: slog::Logger,
    pub clock: C,
    pub interval: Duration,
    /// Shifts only the first armed sleep, so co-deployed clusters don't all
    /// back up at the same instant.
    pub schedule_offset: Duration,
    pub backup_key: String,
    pub oracle: LeaderOracle,
    pub engine: Arc<dyn EngineAdmin>,
    pub store: Arc<dyn ObjectStore>,
    pub strategy: Box<dyn LastBackupStrategy>,
    pub metrics: BackupMetrics,
    pub stop_check: StopCheck,
}

/// Leader-gated periodic backup loop. Re-armed after every decision rather
/// than running on a fixed wall-clock grid, so a slow backup never causes
/// overlapping runs.
pub struct BackupScheduler<C: Clock> {
    logger: slog::Logger,
    clock: C,
    interval: Duration,
    schedule_offset: Duration,
    backup_key: String,
    oracle: LeaderOracle,
    engine: Arc<dyn EngineAdmin>,
    store: Arc<dyn ObjectStore>,
    strategy: Box<dyn LastBackupStrategy>,
    metrics: BackupMetrics,
    stop_check: StopCheck,
}

impl<C: Clock> BackupScheduler<C> {
    pub fn new(config: SchedulerConfig<C>) -> BackupScheduler<C> {
        BackupScheduler {
            logger: config.logger,
            clock: config.clock,
            interval: config.interval,
            schedule_offset: config.schedule_offset,
            backup_key: config.backup_key,
            oracle: config.oracle,
            engine: config.engine,
            store: config.store,
            strategy: config.strategy,
            metrics: config.metrics,
            stop_check: config.stop_check,
        }
    }

    pub async fn run(mut self) {
        slog::info!(
            self.logger,
            "Backup scheduler running";
            "interval" => ?self.interval,
            "key" => &self.backup_key,
        );

        // The first decision happens right away, so a backup already overdue
        // at process start is taken before the loop arms.
        let mut next_delay = self.tick().await + self.schedule_offset;
        loop {
            self.clock.sleep(next_delay).await;
            if self.stop_check.should_stop() {
                slog::info!(self.logger, "Backup scheduler stopping");
                return;
            }

            next_delay = self.tick().await;
        }
    }

    /// One scheduling decision. Returns the delay until the next tick.
    async fn tick(&mut self) -> Duration {
        match self.oracle.is_leader(self.engine.as_ref()).await {
            Ok(true) => {}
            Ok(false) => {
                slog::debug!(self.logger, "Not leader, skipping backup tick");
                return self.interval;
            }
            Err(e) => {
                // Conservative: unknown leadership means no leader-gated action.
                slog::warn!(self.logger, "Skipping backup tick"; "error" => %e);
                return self.interval;
            }
        }

        let last_backup = match self.strategy.last_backup_at().await {
            Ok(last_backup) => last_backup,
            Err(e) => {
                slog::error!(self.logger, "Failed to read last-backup time"; "error" => %e);
                self.metrics.record_failure();
                return self.interval;
            }
        };

        if let Some(last_backup) = last_backup {
            let now = self.clock.now_utc();
            // A last-backup time in the future (clock skew) counts as zero
            // elapsed, deferring a full interval.
            let elapsed = (now - last_backup).to_std().unwrap_or(Duration::ZERO);
            if elapsed < self.interval {
                // Drift-correcting: re-arm for the remaining delta only.
                return self.interval - elapsed;
            }
        }

        match self.perform_backup().await {
            Ok(size_bytes) => {
                slog::info!(self.logger, "Backup complete"; "size_bytes" => size_bytes);
                self.interval
            }
            Err(e) => {
                slog::error!(self.logger, "Backup failed"; "error" => %e);
                self.metrics.record_failure();
                RETRY_DELAY
            }
        }
    }

    /// Snapshot into a scoped temp dir and upload. The temp dir is removed on
    /// every exit path via its drop guard.
    async fn perform_backup(&mut self) -> Result<u64, BackupError> {
        let started = self.clock.now();
        let temp_dir = tempfile::tempdir()?;
        let snapshot_path = temp_dir.path().join(SNAPSHOT_TEMP_NAME);

        let size_bytes = self.engine.snapshot_to_file(&snapshot_path).await?;
        let version_id = self.store.put(&self.backup_key, &snapshot_path).await?;

        let completed_at = self.clock.now_utc();
        self.strategy.record_backup(completed_at).await?;
        self.metrics
            .record_success(self.clock.now() - started, size_bytes, completed_at);
        slog::debug!(self.logger, "Uploaded backup"; "version_id" => version_id);

        Ok(size_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::strategy::{LocalTimestampStrategy, RemoteMetadataStrategy};
    use crate::clock::{mocked_clock, MockClock, MockClockController};
    use crate::engine::{
        AlarmRecord, EngineError, EngineStatus, MemberAddOutcome, MemberRecord,
    };
    use crate::objectstore::InMemoryObjectStore;
    use crate::stop_signal;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const HOUR: Duration = Duration::from_secs(3600);
    const KEY: &str = "kv-prod/etcd-backup.db";

    struct TestEngine {
        is_leader: AtomicBool,
        snapshot_calls: AtomicUsize,
        snapshot_fails: AtomicBool,
    }

    impl TestEngine {
        fn leader() -> TestEngine {
            TestEngine {
                is_leader: AtomicBool::new(true),
                snapshot_calls: AtomicUsize::new(0),
                snapshot_fails: AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl EngineAdmin for TestEngine {
        async fn member_list(&self) -> Result<Vec<MemberRecord>, EngineError> {
            Ok(vec![MemberRecord {
                id: 1,
                name: "local".to_string(),
                peer_urls: vec![],
                client_urls: vec![],
                is_learner: false,
            }])
        }
        async fn member_add(&self, _: &str) -> Result<MemberAddOutcome, EngineError> {
            unimplemented!()
        }
        async fn member_remove(&self, _: u64) -> Result<Vec<MemberRecord>, EngineError> {
            unimplemented!()
        }
        async fn status(&self, _: &str) -> Result<EngineStatus, EngineError> {
            let leader_id = if self.is_leader.load(Ordering::SeqCst) { 1 } else { 2 };
            Ok(EngineStatus {
                member_id: 1,
                leader_id,
                db_size_bytes: 4096,
            })
        }
        async fn alarm_list(&self) -> Result<Vec<AlarmRecord>, EngineError> {
            unimplemented!()
        }
        async fn alarm_disarm(&self, _: u64) -> Result<Vec<AlarmRecord>, EngineError> {
            unimplemented!()
        }
        async fn snapshot_to_file(&self, dest: &Path) -> Result<u64, EngineError> {
            self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
            if self.snapshot_fails.load(Ordering::SeqCst) {
                return Err(EngineError::SnapshotCreate("induced failure".to_string()));
            }
            std::fs::write(dest, b"snapshot-bytes")
                .map_err(|e| EngineError::SnapshotCreate(e.to_string()))?;
            Ok(14)
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

    struct Harness {
        clock: MockClock,
        controller: MockClockController,
        engine: Arc<TestEngine>,
        store: Arc<InMemoryObjectStore>,
    }

    fn harness() -> Harness {
        let (clock, controller) = mocked_clock();
        Harness {
            clock,
            controller,
            engine: Arc::new(TestEngine::leader()),
            store: Arc::new(InMemoryObjectStore::new()),
        }
    }

    fn spawn_scheduler(
        h: &Harness,
        strategy: Box<dyn LastBackupStrategy>,
        stop_check: StopCheck,
    ) -> tokio::task::JoinHandle<()> {
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let metrics = BackupMetrics::new(&prometheus::Registry::new()).unwrap();
        let scheduler = BackupScheduler::new(SchedulerConfig {
            logger,
            clock: h.clock.clone(),
            interval: HOUR,
            schedule_offset: Duration::ZERO,
            backup_key: KEY.to_string(),
            oracle: LeaderOracle::new("local".to_string(), "http://local:2379".to_string()),
            engine: h.engine.clone(),
            store: h.store.clone(),
            strategy,
            metrics,
            stop_check,
        });

        tokio::spawn(scheduler.run())
    }

    fn remote_strategy(h: &Harness) -> Box<dyn LastBackupStrategy> {
        Box::new(RemoteMetadataStrategy::new(h.store.clone(), KEY.to_string()))
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// Give the scheduler task real time to act (or deliberately not act) and
    /// re-arm its next sleep, so a following clock advance lands on a deadline
    /// the task has already computed.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn overdue_backup_executes_immediately_at_startup() {
        // -- setup: the latest stored backup is two intervals old --
        let h = harness();
        let (_stopper, stop_check) = stop_signal::new();

        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("stale");
        std::fs::write(&stale, b"old").unwrap();
        h.store.set_now(h.clock.now_utc() - chrono::Duration::hours(2));
        h.store.put(KEY, &stale).await.unwrap();

        // -- execute --
        let strategy = remote_strategy(&h);
        spawn_scheduler(&h, strategy, stop_check);

        // -- verify: a new revision appears without the clock moving at all --
        let store = h.store.clone();
        wait_until(move || store.revision_count(KEY) == 2).await;
        assert_eq!(h.engine.snapshot_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_leader_never_uploads() {
        // -- setup --
        let mut h = harness();
        h.engine.is_leader.store(false, Ordering::SeqCst);
        let (_stopper, stop_check) = stop_signal::new();

        let strategy = remote_strategy(&h);
        spawn_scheduler(&h, strategy, stop_check);
        settle().await;

        // -- execute: several full intervals elapse --
        for _ in 0..4 {
            h.controller.advance(HOUR);
            settle().await;
        }

        // -- verify --
        assert_eq!(h.store.revision_count(KEY), 0);
        assert_eq!(h.engine.snapshot_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fresh_last_backup_rearms_for_remaining_delta() {
        // -- setup: last backup recorded half an interval before the first
        // armed tick would fire --
        let mut h = harness();
        let (_stopper, stop_check) = stop_signal::new();

        let dir = tempfile::tempdir().unwrap();
        let timestamp_path = dir.path().join("last-backup");
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let recorder = LocalTimestampStrategy::new(logger.clone(), timestamp_path.clone());
        recorder
            .record_backup(h.clock.now_utc() + chrono::Duration::minutes(30))
            .await
            .unwrap();

        let strategy: Box<dyn LastBackupStrategy> =
            Box::new(LocalTimestampStrategy::new(logger, timestamp_path));
        spawn_scheduler(&h, strategy, stop_check);
        settle().await;

        // -- execute + verify: at one interval, not yet due --
        h.controller.advance(HOUR);
        settle().await;
        assert_eq!(h.store.revision_count(KEY), 0);

        // The re-armed delta elapses and the backup runs.
        h.controller.advance(Duration::from_secs(30 * 60));
        let store = h.store.clone();
        wait_until(move || store.revision_count(KEY) == 1).await;
    }

    #[tokio::test]
    async fn failed_backup_retries_without_advancing_schedule() {
        // -- setup: no stored backup yet, so the startup decision attempts
        // one, and the snapshot RPC is failing --
        let mut h = harness();
        h.engine.snapshot_fails.store(true, Ordering::SeqCst);
        let (_stopper, stop_check) = stop_signal::new();

        let strategy = remote_strategy(&h);
        spawn_scheduler(&h, strategy, stop_check);

        // -- execute: the startup attempt fails --
        let engine = h.engine.clone();
        wait_until(move || engine.snapshot_calls.load(Ordering::SeqCst) == 1).await;
        assert_eq!(h.store.revision_count(KEY), 0);
        settle().await;

        // -- execute: retry fires after the short retry delay, not a full
        // interval, and succeeds --
        h.engine.snapshot_fails.store(false, Ordering::SeqCst);
        h.controller.advance(RETRY_DELAY);

        // -- verify --
        let store = h.store.clone();
        wait_until(move || store.revision_count(KEY) == 1).await;
        assert_eq!(h.engine.snapshot_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stop_signal_ends_the_loop() {
        // -- setup: a fresh backup exists, so the startup decision just
        // re-arms --
        let mut h = harness();
        let (stopper, stop_check) = stop_signal::new();

        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("fresh");
        std::fs::write(&fresh, b"current").unwrap();
        h.store.set_now(h.clock.now_utc());
        h.store.put(KEY, &fresh).await.unwrap();

        let strategy = remote_strategy(&h);
        let handle = spawn_scheduler(&h, strategy, stop_check);
        settle().await;

        // -- execute --
        drop(stopper);
        h.controller.advance(HOUR);

        // -- verify --
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
        assert_eq!(h.store.revision_count(KEY), 1);
    }
}
