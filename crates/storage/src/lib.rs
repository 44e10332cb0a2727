//! Storage - Pluggable checkpoint storage backends
//!
//! Every backend keeps one location per storage id under a single root and
//! supports allocate / commit / delete / list / restore:
//! - Local or shared filesystem (default feature)
//! - Amazon S3 / S3-compatible storage (with `s3` feature)
//!
//! # Example
//!
//! ```no_run
//! use storage::{StorageBackend, LocalStorage};
//!
//! # async fn example() -> runtime_core::Result<()> {
//! let storage = LocalStorage::new("/tmp/checkpoints");
//! let handle = storage.allocate().await?;
//! std::fs::write(handle.path.join("weights.bin"), [1u8, 2, 3])?;
//! storage.commit(&handle).await?;
//! storage.delete(&handle.storage_id).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use runtime_core::{Error, Result, RetryConfig, StorageConfig};
use tracing::info;

mod backend;
mod local;

#[cfg(feature = "s3")]
mod s3;

pub use backend::StorageBackend;
pub use local::LocalStorage;

#[cfg(feature = "s3")]
pub use s3::{S3Config, S3Storage};

/// Shared handle to a backend
pub type StorageBackendHandle = Arc<dyn StorageBackend>;

/// Build the backend selected by `config`
pub async fn build(config: &StorageConfig, retry: &RetryConfig) -> Result<StorageBackendHandle> {
    config.validate()?;

    match config {
        StorageConfig::SharedFs { .. } => {
            let base_path = config
                .shared_fs_base_path()
                .ok_or_else(|| Error::Internal {
                    message: "shared_fs config without base path".to_string(),
                })?;
            info!(base_path = %base_path.display(), "Using shared filesystem checkpoint storage");
            Ok(Arc::new(LocalStorage::new(base_path)))
        }
        #[cfg(feature = "s3")]
        StorageConfig::S3 {
            bucket,
            prefix,
            endpoint_url,
            region,
            force_path_style,
        } => {
            info!(%bucket, ?prefix, "Using S3 checkpoint storage");
            let s3 = S3Storage::with_config(
                S3Config {
                    bucket: bucket.clone(),
                    prefix: prefix.clone(),
                    endpoint_url: endpoint_url.clone(),
                    region: region.clone(),
                    force_path_style: *force_path_style,
                    staging_root: None,
                },
                retry.clone(),
            )
            .await;
            Ok(Arc::new(s3))
        }
        #[cfg(not(feature = "s3"))]
        StorageConfig::S3 { .. } => {
            let _ = retry;
            Err(Error::StorageUnavailable {
                backend: "s3 (built without the `s3` feature)".to_string(),
            })
        }
    }
}
