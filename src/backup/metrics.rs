use prometheus::{Gauge, Histogram, HistogramOpts, IntCounter, Opts, Registry};
use tokio::time::Duration;

/// Backup observability signals, registered against the process registry at
/// construction time.
#[derive(Clone)]
pub struct BackupMetrics {
    duration_seconds: Histogram,
    size_bytes: Gauge,
    last_success_unix_seconds: Gauge,
    failures_total: IntCounter,
}

impl BackupMetrics {
    pub fn new(registry: &Registry) -> Result<BackupMetrics, prometheus::Error> {
        let duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "backup_duration_seconds",
            "Wall time spent taking and uploading one backup.",
        ))?;
        let size_bytes = Gauge::with_opts(Opts::new(
            "backup_size_bytes",
            "Size of the most recently uploaded backup.",
        ))?;
        let last_success_unix_seconds = Gauge::with_opts(Opts::new(
            "backup_last_success_unix_seconds",
            "Completion time of the most recent successful backup.",
        ))?;
        let failures_total = IntCounter::with_opts(Opts::new(
            "backup_failures_total",
            "Backup attempts that failed to snapshot or upload.",
        ))?;

        registry.register(Box::new(duration_seconds.clone()))?;
        registry.register(Box::new(size_bytes.clone()))?;
        registry.register(Box::new(last_success_unix_seconds.clone()))?;
        registry.register(Box::new(failures_total.clone()))?;

        Ok(BackupMetrics {
            duration_seconds,
            size_bytes,
            last_success_unix_seconds,
            failures_total,
        })
    }

    pub fn record_success(&self, duration: Duration, size_bytes: u64, at: chrono::DateTime<chrono::Utc>) {
        self.duration_seconds.observe(duration.as_secs_f64());
        self.size_bytes.set(size_bytes as f64);
        self.last_success_unix_seconds.set(at.timestamp() as f64);
    }

    pub fn record_failure(&self) {
        self.failures_total.inc();
    }
}
