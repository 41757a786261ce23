use chrono::{DateTime, Utc};
use std::path::Path;

/// One stored revision of a backup object, newest revisions first when listed.
#[derive(Clone, Debug)]
pub struct BackupVersion {
    pub version_id: String,
    pub last_modified: DateTime<Utc>,
    pub size_bytes: i64,
    pub is_latest: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    /// Distinguished so callers can treat "no backup yet" as a normal state
    /// rather than a failure.
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object store request failed: {0}")]
    Storage(String),

    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Versioned blob storage for backup archives. Implementations must return
/// the storage-assigned version id from `put` and list versions newest first.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `source` under `key`. Returns the version id the
    /// store assigned to this revision.
    async fn put(&self, key: &str, source: &Path) -> Result<String, ObjectStoreError>;

    /// Download `key` (a specific version, or the latest when `None`) to
    /// `dest`. Returns the number of bytes written.
    async fn get(
        &self,
        key: &str,
        version_id: Option<&str>,
        dest: &Path,
    ) -> Result<u64, ObjectStoreError>;

    /// Last-modified time of the latest revision of `key`.
    async fn head(&self, key: &str) -> Result<DateTime<Utc>, ObjectStoreError>;

    /// All stored revisions of `key`, newest first.
    async fn list_versions(&self, key: &str) -> Result<Vec<BackupVersion>, ObjectStoreError>;
}
