pub mod directory;
pub mod gcs;
pub mod memory;
pub mod s3;

use std::sync::Arc;

use anyhow::bail;
use storagefs_common::backend::StorageClient;
use storagefs_common::config::BackendConfig;

pub use self::directory::DirectoryStorage;
pub use self::gcs::{GcsConfig, GcsStorage};
pub use self::memory::MemoryStorage;
pub use self::s3::{S3Config, S3Storage};

/// Construct a storage client from the `[backend]` configuration section.
///
/// Credentials missing from the file fall back to environment variables.
pub fn from_config(config: &BackendConfig) -> anyhow::Result<Arc<dyn StorageClient>> {
    match config {
        BackendConfig::Directory { path } => Ok(Arc::new(DirectoryStorage::new(path))),
        BackendConfig::Memory => Ok(Arc::new(MemoryStorage::new())),
        BackendConfig::S3 {
            bucket,
            location,
            region,
            endpoint,
            access_key_id,
            secret_access_key,
            storage_class,
        } => {
            let access_key_id = access_key_id
                .clone()
                .or_else(|| std::env::var("AWS_ACCESS_KEY_ID").ok())
                .unwrap_or_default();
            let secret_access_key = secret_access_key
                .clone()
                .or_else(|| std::env::var("AWS_SECRET_ACCESS_KEY").ok())
                .unwrap_or_default();

            if access_key_id.is_empty() || secret_access_key.is_empty() {
                bail!("S3 credentials not found for bucket '{}'", bucket);
            }

            Ok(Arc::new(S3Storage::new(S3Config {
                bucket: bucket.clone(),
                location: location.clone(),
                region: region.clone(),
                endpoint: endpoint.clone(),
                access_key_id,
                secret_access_key,
                storage_class: storage_class.clone(),
            })?))
        }
        BackendConfig::Gcs {
            bucket,
            location,
            endpoint,
            token,
        } => {
            let token = token
                .clone()
                .or_else(|| std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN").ok())
                .unwrap_or_default();

            if token.is_empty() {
                bail!("GCS access token not found for bucket '{}'", bucket);
            }

            Ok(Arc::new(GcsStorage::new(GcsConfig {
                bucket: bucket.clone(),
                location: location.clone(),
                endpoint: endpoint.clone(),
                token,
            })?))
        }
    }
}
