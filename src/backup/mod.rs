mod metrics;
mod scheduler;
mod strategy;

pub use metrics::BackupMetrics;
pub use scheduler::BackupScheduler;
pub use scheduler::SchedulerConfig;
pub use scheduler::BACKUP_FILE_NAME;
pub use strategy::BackupError;
pub use strategy::LastBackupStrategy;
pub use strategy::LocalTimestampStrategy;
pub use strategy::RemoteMetadataStrategy;
