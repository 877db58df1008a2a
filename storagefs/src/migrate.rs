//! Copy local media files into the configured storage backend.

use std::path::{Component, Path};

use anyhow::{bail, Context};
use bytes::Bytes;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use storagefs_common::backend::StorageClient;

/// Result of a migration pass
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MigrateSummary {
    pub uploaded: u64,
    pub skipped: u64,
    pub deleted: u64,
    pub failed: u64,
}

/// Upload every regular file under `source` whose key is not yet present in
/// storage. Keys are the `/`-joined path relative to `source`. With
/// `delete`, the local copy is removed once its upload succeeded.
pub async fn migrate(
    storage: &dyn StorageClient,
    source: &Path,
    delete: bool,
) -> anyhow::Result<MigrateSummary> {
    if !source.is_dir() {
        bail!("Media directory does not exist: {}", source.display());
    }
    info!(source = %source.display(), backend = %storage.kind(), "Starting migration");

    let mut summary = MigrateSummary::default();
    for entry in WalkDir::new(source)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(key) = relative_key(source, path) else {
            debug!(path = %path.display(), "Skipping path with no usable key");
            continue;
        };

        match storage.exists(&key).await {
            Ok(true) => {
                info!(key = %key, "Already in storage, skipping");
                summary.skipped += 1;
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "Existence check failed");
                summary.failed += 1;
                continue;
            }
        }

        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let len = data.len();
        if let Err(e) = storage.save(&key, Bytes::from(data)).await {
            warn!(key = %key, error = %e, "Upload failed");
            summary.failed += 1;
            continue;
        }
        info!(key = %key, bytes = len, "Uploaded");
        summary.uploaded += 1;

        if delete {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Deleted local copy");
                    summary.deleted += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete local copy"),
            }
        }
    }

    info!(
        uploaded = summary.uploaded,
        skipped = summary.skipped,
        deleted = summary.deleted,
        failed = summary.failed,
        "Migration complete"
    );
    Ok(summary)
}

fn relative_key(source: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(source).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
