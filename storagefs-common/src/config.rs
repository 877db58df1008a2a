use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration: where the protocol layer's files physically
/// live and which storage client actually holds the bytes.
#[derive(Debug, Clone, Deserialize)]
pub struct FsConfig {
    /// Physical root the protocol handler resolves paths against.
    pub root: PathBuf,
    /// Media directory; its basename is stripped from storage keys.
    #[serde(default)]
    pub media_root: Option<PathBuf>,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Directory {
        path: PathBuf,
    },
    Memory,
    S3 {
        bucket: String,
        #[serde(default)]
        location: String,
        #[serde(default = "default_region")]
        region: String,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        access_key_id: Option<String>,
        #[serde(default)]
        secret_access_key: Option<String>,
        #[serde(default)]
        storage_class: Option<String>,
    },
    Gcs {
        bucket: String,
        #[serde(default)]
        location: String,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        token: Option<String>,
    },
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl BackendConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            BackendConfig::Directory { .. } => "directory",
            BackendConfig::Memory => "memory",
            BackendConfig::S3 { .. } => "s3",
            BackendConfig::Gcs { .. } => "gcs",
        }
    }
}

/// Constructor parameters of the filesystem adapter.
#[derive(Debug, Clone, Default)]
pub struct FsOptions {
    /// Physical root; absolute paths under it are mapped back to virtual form.
    pub root: Option<PathBuf>,
    /// Basename of the media directory (e.g. `media` for `/srv/app/media`).
    pub media_root_basename: Option<String>,
}

impl FsOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            media_root_basename: None,
        }
    }

    pub fn with_media_root(mut self, media_root: &Path) -> Self {
        self.media_root_basename = media_root_basename(media_root);
        self
    }
}

/// Last normal component of `media_root`, ignoring trailing separators and
/// `.` segments. `None` when there is no such component (`/`, empty path).
pub fn media_root_basename(media_root: &Path) -> Option<String> {
    media_root
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .last()
        .filter(|s| !s.is_empty())
}

impl FsConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let config: FsConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !self.root.is_absolute() {
            anyhow::bail!("root must be absolute: {}", self.root.display());
        }
        if let Some(ref media_root) = self.media_root {
            if !media_root.is_absolute() {
                anyhow::bail!("media_root must be absolute: {}", media_root.display());
            }
        }
        match &self.backend {
            BackendConfig::Directory { path } => {
                if !path.is_absolute() {
                    anyhow::bail!("backend.path must be absolute: {}", path.display());
                }
            }
            BackendConfig::S3 { bucket, .. } | BackendConfig::Gcs { bucket, .. } => {
                if bucket.is_empty() {
                    anyhow::bail!("backend.bucket must not be empty");
                }
            }
            BackendConfig::Memory => {}
        }
        Ok(())
    }

    pub fn fs_options(&self) -> FsOptions {
        let options = FsOptions::new(&self.root);
        match self.media_root {
            Some(ref media_root) => options.with_media_root(media_root),
            None => options,
        }
    }
}
