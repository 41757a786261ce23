use crate::engine::EngineError;
use crate::objectstore::{ObjectStore, ObjectStoreError};
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] ObjectStoreError),

    #[error("backup state io failure")]
    Io(#[from] std::io::Error),
}

/// Source of truth for "when did the last successful backup happen". Exactly
/// one strategy is active per deployment; they are never mixed.
#[async_trait::async_trait]
pub trait LastBackupStrategy: Send + Sync {
    /// `None` means "never backed up / unknown", which triggers an immediate
    /// backup attempt.
    async fn last_backup_at(&self) -> Result<Option<DateTime<Utc>>, BackupError>;

    /// Record a backup that completed successfully at `at`.
    async fn record_backup(&self, at: DateTime<Utc>) -> Result<(), BackupError>;
}

/// Remote strategy: the object store's own last-modified metadata for the
/// backup key is authoritative, so recording is a no-op.
pub struct RemoteMetadataStrategy {
    store: Arc<dyn ObjectStore>,
    key: String,
}

impl RemoteMetadataStrategy {
    pub fn new(store: Arc<dyn ObjectStore>, key: String) -> RemoteMetadataStrategy {
        RemoteMetadataStrategy { store, key }
    }
}

#[async_trait::async_trait]
impl LastBackupStrategy for RemoteMetadataStrategy {
    async fn last_backup_at(&self) -> Result<Option<DateTime<Utc>>, BackupError> {
        match self.store.head(&self.key).await {
            Ok(last_modified) => Ok(Some(last_modified)),
            Err(ObjectStoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn record_backup(&self, _at: DateTime<Utc>) -> Result<(), BackupError> {
        Ok(())
    }
}

/// Local strategy: a timestamp file on this member. Missing or corrupt is
/// tolerated as "unknown" so a damaged file forces a backup instead of
/// silently skipping one.
pub struct LocalTimestampStrategy {
    logger: slog::Logger,
    path: PathBuf,
}

impl LocalTimestampStrategy {
    pub fn new(logger: slog::Logger, path: PathBuf) -> LocalTimestampStrategy {
        LocalTimestampStrategy { logger, path }
    }
}

#[async_trait::async_trait]
impl LastBackupStrategy for LocalTimestampStrategy {
    async fn last_backup_at(&self) -> Result<Option<DateTime<Utc>>, BackupError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(at) => Ok(Some(at.with_timezone(&Utc))),
            Err(e) => {
                slog::warn!(
                    self.logger,
                    "Last-backup timestamp file is corrupt, forcing a backup";
                    "error" => %e,
                );
                Ok(None)
            }
        }
    }

    async fn record_backup(&self, at: DateTime<Utc>) -> Result<(), BackupError> {
        // Same write-temp-fsync-rename dance as the config document; the
        // timestamp must be durable before the tick completes.
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(at.to_rfc3339().as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| BackupError::Io(e.error))?;

        Ok(())
    }
}
