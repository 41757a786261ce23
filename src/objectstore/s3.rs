use crate::objectstore::store::{BackupVersion, ObjectStore, ObjectStoreError};
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Versioned S3-compatible object storage. Requires versioning to be enabled
/// on the bucket; every upload of the same key produces a new revision.
pub struct S3ObjectStore {
    logger: slog::Logger,
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a client from ambient credentials (env vars, instance/OIDC role)
    /// and issue one cheap list request so credential problems surface at
    /// startup instead of at the first scheduled backup.
    pub async fn connect(
        logger: slog::Logger,
        bucket: String,
    ) -> Result<S3ObjectStore, ObjectStoreError> {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let client = aws_sdk_s3::Client::new(&config);

        client
            .list_objects_v2()
            .bucket(&bucket)
            .max_keys(1)
            .send()
            .await
            .map_err(request_error)?;
        slog::debug!(logger, "Object store credentials verified"; "bucket" => &bucket);

        Ok(S3ObjectStore {
            logger,
            client,
            bucket,
        })
    }
}

fn request_error<E>(e: SdkError<E>) -> ObjectStoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    ObjectStoreError::Storage(DisplayErrorContext(&e).to_string())
}

fn convert_time(
    time: Option<&aws_sdk_s3::primitives::DateTime>,
) -> Result<DateTime<Utc>, ObjectStoreError> {
    let time = time
        .ok_or_else(|| ObjectStoreError::Storage("response missing last-modified".to_string()))?;

    DateTime::from_timestamp(time.secs(), time.subsec_nanos())
        .ok_or_else(|| ObjectStoreError::Storage(format!("unrepresentable timestamp: {}", time)))
}

#[async_trait::async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, source: &Path) -> Result<String, ObjectStoreError> {
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| ObjectStoreError::Storage(e.to_string()))?;

        let resp = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(request_error)?;

        // "null" is what S3 reports on an unversioned bucket.
        let version_id = resp.version_id().unwrap_or("null").to_string();
        slog::info!(self.logger, "Uploaded object"; "key" => key, "version_id" => &version_id);

        Ok(version_id)
    }

    async fn get(
        &self,
        key: &str,
        version_id: Option<&str>,
        dest: &Path,
    ) -> Result<u64, ObjectStoreError> {
        let mut request = self.client.get_object().bucket(&self.bucket).key(key);
        if let Some(version_id) = version_id {
            request = request.version_id(version_id);
        }

        let resp = request.send().await.map_err(|e| match &e {
            SdkError::ServiceError(service) if service.err().is_no_such_key() => {
                ObjectStoreError::NotFound(key.to_string())
            }
            _ => request_error(e),
        })?;

        let mut body = resp.body.into_async_read();
        let mut file = tokio::fs::File::create(dest).await?;
        let written = tokio::io::copy(&mut body, &mut file).await?;
        file.sync_all().await?;

        Ok(written)
    }

    async fn head(&self, key: &str) -> Result<DateTime<Utc>, ObjectStoreError> {
        let resp = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match &e {
                SdkError::ServiceError(service) if service.err().is_not_found() => {
                    ObjectStoreError::NotFound(key.to_string())
                }
                _ => request_error(e),
            })?;

        convert_time(resp.last_modified())
    }

    async fn list_versions(&self, key: &str) -> Result<Vec<BackupVersion>, ObjectStoreError> {
        let resp = self
            .client
            .list_object_versions()
            .bucket(&self.bucket)
            .prefix(key)
            .send()
            .await
            .map_err(request_error)?;

        let mut versions = Vec::new();
        for version in resp.versions() {
            // Prefix matching can pick up sibling keys.
            if version.key() != Some(key) {
                continue;
            }
            versions.push(BackupVersion {
                version_id: version.version_id().unwrap_or("null").to_string(),
                last_modified: convert_time(version.last_modified())?,
                size_bytes: version.size().unwrap_or(0),
                is_latest: version.is_latest().unwrap_or(false),
            });
        }
        versions.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));

        Ok(versions)
    }
}
