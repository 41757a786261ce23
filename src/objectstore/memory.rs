use crate::objectstore::store::{BackupVersion, ObjectStore, ObjectStoreError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// In-memory versioned store for tests and local experimentation. Revision
/// timestamps come from an internally held "now" that tests can pin, so
/// backup scheduling logic can be exercised on a mock timeline.
pub struct InMemoryObjectStore {
    state: Mutex<State>,
}

struct State {
    objects: HashMap<String, Vec<Revision>>,
    now: DateTime<Utc>,
    next_version: u64,
}

struct Revision {
    version_id: String,
    bytes: Bytes,
    last_modified: DateTime<Utc>,
}

impl InMemoryObjectStore {
    pub fn new() -> InMemoryObjectStore {
        InMemoryObjectStore {
            state: Mutex::new(State {
                objects: HashMap::new(),
                now: Utc::now(),
                next_version: 1,
            }),
        }
    }

    /// Pin the timestamp stamped onto subsequent uploads.
    pub fn set_now(&self, now: DateTime<Utc>) {
        self.state.lock().expect("lock poisoned").now = now;
    }

    pub fn revision_count(&self, key: &str) -> usize {
        self.state
            .lock()
            .expect("lock poisoned")
            .objects
            .get(key)
            .map(|revisions| revisions.len())
            .unwrap_or(0)
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, source: &Path) -> Result<String, ObjectStoreError> {
        let bytes = Bytes::from(tokio::fs::read(source).await?);

        let mut state = self.state.lock().expect("lock poisoned");
        let version_id = format!("v{}", state.next_version);
        state.next_version += 1;
        let last_modified = state.now;
        state.objects.entry(key.to_string()).or_default().push(Revision {
            version_id: version_id.clone(),
            bytes,
            last_modified,
        });

        Ok(version_id)
    }

    async fn get(
        &self,
        key: &str,
        version_id: Option<&str>,
        dest: &Path,
    ) -> Result<u64, ObjectStoreError> {
        let bytes = {
            let state = self.state.lock().expect("lock poisoned");
            let revisions = state
                .objects
                .get(key)
                .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))?;

            let revision = match version_id {
                Some(version_id) => revisions.iter().find(|r| r.version_id == version_id),
                None => revisions.last(),
            };

            revision
                .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))?
                .bytes
                .clone()
        };

        tokio::fs::write(dest, &bytes).await?;

        Ok(bytes.len() as u64)
    }

    async fn head(&self, key: &str) -> Result<DateTime<Utc>, ObjectStoreError> {
        let state = self.state.lock().expect("lock poisoned");

        state
            .objects
            .get(key)
            .and_then(|revisions| revisions.last())
            .map(|revision| revision.last_modified)
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    async fn list_versions(&self, key: &str) -> Result<Vec<BackupVersion>, ObjectStoreError> {
        let state = self.state.lock().expect("lock poisoned");
        let revisions = match state.objects.get(key) {
            Some(revisions) => revisions,
            None => return Ok(Vec::new()),
        };

        Ok(revisions
            .iter()
            .rev()
            .enumerate()
            .map(|(i, revision)| BackupVersion {
                version_id: revision.version_id.clone(),
                last_modified: revision.last_modified,
                size_bytes: revision.bytes.len() as i64,
                is_latest: i == 0,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_specific_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryObjectStore::new();

        let first = dir.path().join("first");
        std::fs::write(&first, b"one").unwrap();
        let v1 = store.put("backups/db", &first).await.unwrap();

        let second = dir.path().join("second");
        std::fs::write(&second, b"two").unwrap();
        store.put("backups/db", &second).await.unwrap();

        let dest = dir.path().join("restored");
        let written = store.get("backups/db", Some(&v1), &dest).await.unwrap();

        assert_eq!(written, 3);
        assert_eq!(std::fs::read(&dest).unwrap(), b"one");
    }

    #[tokio::test]
    async fn head_of_missing_key_is_not_found() {
        let store = InMemoryObjectStore::new();

        assert!(matches!(
            store.head("backups/db").await,
            Err(ObjectStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn versions_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryObjectStore::new();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();

        let v1 = store.put("k", &file).await.unwrap();
        let v2 = store.put("k", &file).await.unwrap();

        let versions = store.list_versions("k").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version_id, v2);
        assert!(versions[0].is_latest);
        assert_eq!(versions[1].version_id, v1);
        assert!(!versions[1].is_latest);
    }
}
