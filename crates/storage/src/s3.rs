//! S3 storage backend
//!
//! Checkpoints are written into a local staging directory and uploaded on
//! commit under `<prefix>/<storage_id>/`. Provides:
//! - Multipart uploads for large files
//! - Exponential backoff retry logic
//! - Custom endpoint support (for MinIO, LocalStack, etc.)

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::Builder as S3ConfigBuilder,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use bytes::Bytes;
use runtime_core::{CheckpointHandle, Error, Result, RetryConfig, StorageId};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::StorageBackend;

/// Threshold for switching to multipart upload (5 MB)
const MULTIPART_THRESHOLD: usize = 5 * 1024 * 1024;

/// Part size for multipart uploads (5 MB minimum required by S3)
const MULTIPART_PART_SIZE: usize = 5 * 1024 * 1024;

/// S3-compatible storage backend
///
/// Supports Amazon S3 and S3-compatible services like MinIO.
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: String,
    staging_root: PathBuf,
    retry: RetryConfig,
}

/// Configuration for S3Storage
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// Optional prefix for all keys (e.g., "checkpoints/")
    pub prefix: Option<String>,
    /// Optional custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// AWS region (default: "us-east-1")
    pub region: Option<String>,
    /// Force path-style addressing (required for MinIO)
    pub force_path_style: bool,
    /// Local directory for staging writes and restored checkpoints
    pub staging_root: Option<PathBuf>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            prefix: None,
            endpoint_url: None,
            region: Some("us-east-1".to_string()),
            force_path_style: false,
            staging_root: None,
        }
    }
}

/// Join a key prefix and a relative key
fn join_key(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", prefix, path)
    }
}

/// Extract the storage id from a common prefix returned by a delimited listing
fn id_from_common_prefix(root: &str, common_prefix: &str) -> Option<StorageId> {
    let name = common_prefix
        .strip_prefix(root)?
        .trim_end_matches('/');
    StorageId::parse(name).ok()
}

/// Object key for a file relative to the checkpoint directory
fn relative_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Local path for an object key relative to its checkpoint prefix
///
/// Returns `None` for directory markers (trailing `/`) and for keys that
/// would resolve outside the restore directory.
fn restore_relative_path(relative: &str) -> Option<PathBuf> {
    if relative.is_empty() || relative.ends_with('/') {
        return None;
    }

    let path = Path::new(relative);
    path.components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then(|| path.to_path_buf())
}

/// Remove a local directory; an absent directory is not an error
async fn remove_local_dir(path: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => {
            debug!(?path, "Removed local directory");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

impl S3Storage {
    /// Create a new S3Storage with default AWS configuration
    ///
    /// Uses environment variables or instance profile for credentials.
    pub async fn new(bucket: impl Into<String>) -> Self {
        Self::with_config(
            S3Config {
                bucket: bucket.into(),
                ..Default::default()
            },
            RetryConfig::default(),
        )
        .await
    }

    /// Create a new S3Storage with custom configuration
    pub async fn with_config(config: S3Config, retry: RetryConfig) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(
                config.region.unwrap_or_else(|| "us-east-1".to_string()),
            ))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        if let Some(endpoint) = &config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        Self {
            client,
            bucket: config.bucket,
            prefix: config.prefix.unwrap_or_default(),
            staging_root: config
                .staging_root
                .unwrap_or_else(|| std::env::temp_dir().join("checkpoint-staging")),
            retry,
        }
    }

    /// Create S3Storage for MinIO (convenience constructor)
    pub async fn minio(endpoint: &str, bucket: &str) -> Self {
        Self::with_config(
            S3Config {
                bucket: bucket.to_string(),
                endpoint_url: Some(endpoint.to_string()),
                force_path_style: true,
                ..Default::default()
            },
            RetryConfig::default(),
        )
        .await
    }

    /// Key prefix under which all checkpoints live ("" or "prefix/")
    fn root_prefix(&self) -> String {
        join_key(&self.prefix, "")
    }

    /// Key prefix of one checkpoint ("prefix/<id>/")
    fn checkpoint_prefix(&self, id: &StorageId) -> String {
        join_key(&self.prefix, &format!("{}/", id))
    }

    fn staging_path(&self, id: &StorageId) -> PathBuf {
        self.staging_root.join("staging").join(id.as_str())
    }

    fn restore_path(&self, id: &StorageId) -> PathBuf {
        self.staging_root.join("restored").join(id.as_str())
    }

    /// Execute an async operation with exponential backoff retry
    async fn with_retry<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let max_retries = self.retry.max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..max_retries {
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !e.is_retryable() || attempt + 1 == max_retries {
                        return Err(e);
                    }

                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        %operation,
                        attempt = attempt + 1,
                        max_retries,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Retrying after transient error"
                    );

                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Storage {
            message: format!("{} failed after {} retries", operation, max_retries),
        }))
    }

    /// List every object key under `prefix`
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| Error::Storage {
                message: format!("S3 list_objects failed: {}", e),
            })?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(String::from)),
            );

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }

        Ok(keys)
    }

    /// Upload one object, switching to multipart for large payloads
    async fn put(&self, key: &str, data: Bytes) -> Result<u64> {
        let size = data.len();
        if size > MULTIPART_THRESHOLD {
            return self.multipart_upload(key, data).await;
        }

        self.with_retry("put_object", || {
            let data = data.clone();
            async move {
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .body(ByteStream::from(data.to_vec()))
                    .send()
                    .await
                    .map_err(|e| Error::Storage {
                        message: format!("S3 put_object failed: {}", e),
                    })?;

                Ok(size as u64)
            }
        })
        .await
    }

    /// Perform multipart upload for large files
    async fn multipart_upload(&self, key: &str, data: Bytes) -> Result<u64> {
        let size = data.len() as u64;

        let create_result = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to initiate multipart upload: {}", e),
            })?;

        let upload_id = create_result.upload_id().ok_or_else(|| Error::Storage {
            message: "No upload_id returned".to_string(),
        })?;

        debug!(key, upload_id, size, "Started multipart upload");

        let mut completed_parts = Vec::new();
        let mut offset = 0;
        let mut part_number = 1;

        while offset < data.len() {
            let end = std::cmp::min(offset + MULTIPART_PART_SIZE, data.len());
            let part_data = data.slice(offset..end);

            let upload_part_result = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(part_data.to_vec()))
                .send()
                .await
                .map_err(|e| {
                    self.abort_multipart_upload(key, upload_id);
                    Error::Storage {
                        message: format!("Failed to upload part {}: {}", part_number, e),
                    }
                })?;

            let etag = upload_part_result.e_tag().map(String::from);
            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(etag)
                    .build(),
            );

            debug!(part_number, offset, end, "Uploaded part");
            offset = end;
            part_number += 1;
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to complete multipart upload: {}", e),
            })?;

        debug!(key, size, "Completed multipart upload");
        Ok(size)
    }

    /// Abort a multipart upload (best effort, for cleanup)
    fn abort_multipart_upload(&self, key: &str, upload_id: &str) {
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let key = key.to_string();
        let upload_id = upload_id.to_string();

        tokio::spawn(async move {
            let _ = client
                .abort_multipart_upload()
                .bucket(&bucket)
                .key(&key)
                .upload_id(&upload_id)
                .send()
                .await;
        });
    }

    /// Upload every file of a staging directory, returns total bytes
    async fn upload_dir(&self, id: &StorageId, dir: &Path) -> Result<u64> {
        let key_prefix = self.checkpoint_prefix(id);
        let mut total = 0;
        let mut stack = vec![dir.to_path_buf()];

        while let Some(current) = stack.pop() {
            let mut entries = fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let entry_path = entry.path();
                let file_type = entry.file_type().await?;

                if file_type.is_dir() {
                    stack.push(entry_path);
                } else if file_type.is_file() {
                    let relative = entry_path.strip_prefix(dir).map_err(|e| Error::Internal {
                        message: format!("{:?} escaped staging dir: {}", entry_path, e),
                    })?;
                    let key = format!("{}{}", key_prefix, relative_key(relative));
                    let data = Bytes::from(fs::read(&entry_path).await?);
                    total += self.put(&key, data).await?;
                }
            }
        }

        Ok(total)
    }

}

#[async_trait]
impl StorageBackend for S3Storage {
    fn kind(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket))]
    async fn allocate(&self) -> Result<CheckpointHandle> {
        let storage_id = StorageId::generate();
        let path = self.staging_path(&storage_id);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Allocation {
                    message: format!("Failed to create staging root {:?}: {}", parent, e),
                })?;
        }
        fs::create_dir(&path).await.map_err(|e| Error::Allocation {
            message: format!("Failed to create staging directory {:?}: {}", path, e),
        })?;

        debug!(%storage_id, ?path, "Allocated staging directory");
        Ok(CheckpointHandle::new(storage_id, path))
    }

    #[instrument(skip(self, handle), fields(backend = "s3", bucket = %self.bucket, storage_id = %handle.storage_id))]
    async fn commit(&self, handle: &CheckpointHandle) -> Result<()> {
        let size = self
            .upload_dir(&handle.storage_id, &handle.path)
            .await
            .map_err(|e| Error::Commit {
                storage_id: handle.storage_id.to_string(),
                message: e.to_string(),
            })?;

        // Objects are already uploaded, a leftover staging copy only costs disk
        if let Err(e) = remove_local_dir(&handle.path).await {
            warn!(path = ?handle.path, error = %e, "Failed to remove staging directory");
        }
        info!(size_bytes = size, "Uploaded checkpoint");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket))]
    async fn delete(&self, id: &StorageId) -> Result<()> {
        let prefix = self.checkpoint_prefix(id);
        let prefix = prefix.as_str();
        debug!(%prefix, "Deleting from S3");

        // An uncommitted allocation only exists locally
        let staging = self.staging_path(id);
        remove_local_dir(&staging).await.map_err(|e| Error::Deletion {
            storage_id: id.to_string(),
            message: format!("Failed to remove staging directory {:?}: {}", staging, e),
        })?;

        let keys = self
            .with_retry("list", || self.list_keys(prefix))
            .await
            .map_err(|e| Error::Deletion {
                storage_id: id.to_string(),
                message: e.to_string(),
            })?;

        for key in &keys {
            self.with_retry("delete_object", || async move {
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| Error::Deletion {
                        storage_id: id.to_string(),
                        message: format!("S3 delete_object {} failed: {}", key, e),
                    })?;

                Ok(())
            })
            .await?;
        }

        debug!(objects = keys.len(), "Deleted checkpoint objects");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket))]
    async fn list(&self) -> Result<Vec<StorageId>> {
        let root = self.root_prefix();
        let mut results = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&root)
                .delimiter("/");

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| Error::Storage {
                message: format!("S3 list_objects failed: {}", e),
            })?;

            results.extend(
                response
                    .common_prefixes()
                    .iter()
                    .filter_map(|p| p.prefix())
                    .filter_map(|p| id_from_common_prefix(&root, p)),
            );

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }

        results.sort();
        debug!(count = results.len(), "Found S3 checkpoints");
        Ok(results)
    }

    #[instrument(skip(self), fields(backend = "s3", bucket = %self.bucket))]
    async fn restore(&self, id: &StorageId) -> Result<CheckpointHandle> {
        let prefix = self.checkpoint_prefix(id);
        let prefix = prefix.as_str();
        let keys = self.with_retry("list", || self.list_keys(prefix)).await?;
        if keys.is_empty() {
            return Err(Error::CheckpointNotFound {
                storage_id: id.to_string(),
            });
        }

        let target = self.restore_path(id);
        remove_local_dir(&target).await?;
        fs::create_dir_all(&target).await?;

        let mut restored = 0;
        for key in &keys {
            let Some(relative) = key
                .strip_prefix(prefix)
                .and_then(restore_relative_path)
            else {
                warn!(%key, "Skipping object key that is not a checkpoint file");
                continue;
            };
            let dest = target.join(relative);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).await?;
            }

            let data = self
                .with_retry("get_object", || async move {
                    let result = self
                        .client
                        .get_object()
                        .bucket(&self.bucket)
                        .key(key)
                        .send()
                        .await
                        .map_err(|e| Error::Storage {
                            message: format!("S3 get_object failed: {}", e),
                        })?;

                    let bytes = result.body.collect().await.map_err(|e| Error::Storage {
                        message: format!("Failed to read S3 response body: {}", e),
                    })?;

                    Ok(bytes.into_bytes())
                })
                .await?;

            fs::write(&dest, &data).await?;
            restored += 1;
        }

        debug!(objects = restored, ?target, "Restored checkpoint");
        Ok(CheckpointHandle::new(id.clone(), target))
    }
}
