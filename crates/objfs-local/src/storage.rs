use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use objfs_core::objio::{ObjectInfo, ObjectStorage, StorageConfig, StorageCredentials, StorageInfo};
use tracing::instrument;

/// Object storage over a directory on the local disk.
#[derive(Debug)]
pub struct LocalStorage {
    uri: String,
    root: PathBuf,
    principal: Option<String>,
}

impl LocalStorage {
    /// Accepts `file:///path` or a bare path as the URI.
    pub fn new(config: &StorageConfig, credentials: StorageCredentials) -> Result<Self> {
        let path = config.uri.strip_prefix("file://").unwrap_or(&config.uri);
        if path.is_empty() {
            bail!("local storage needs a directory; specify -storage-uri in the command line");
        }
        let root = PathBuf::from(path);
        if !root.is_dir() {
            bail!("local storage root {} is not a directory", root.display());
        }

        let principal = match &credentials {
            StorageCredentials::Credentials(map) => map.get("user").cloned(),
            StorageCredentials::Session(session) => session.principal().map(str::to_string),
        };
        Ok(Self {
            uri: config.uri.clone(),
            root,
            principal,
        })
    }

    pub fn construct(
        config: &StorageConfig,
        credentials: StorageCredentials,
    ) -> Result<Arc<dyn ObjectStorage>> {
        Ok(Arc::new(Self::new(config, credentials)?))
    }
}

/// Split `a/b/c` into the directory `a/b` and the name prefix `c`.
fn split_prefix(prefix: &str) -> Result<(&str, &str)> {
    let (dir, name) = prefix.rsplit_once('/').unwrap_or(("", prefix));
    if Path::new(dir)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        bail!("invalid prefix: {prefix}");
    }
    Ok((dir, name))
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn info(&self) -> Result<StorageInfo> {
        Ok(StorageInfo {
            backend: "local".to_string(),
            uri: self.uri.clone(),
            principal: self.principal.clone(),
            case_sensitive: cfg!(target_os = "linux"),
        })
    }

    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let (dir, name_prefix) = split_prefix(prefix)?;
        let path = self.root.join(dir);
        let mut entries = tokio::fs::read_dir(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;

        let mut objects = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(name_prefix) {
                continue;
            }
            let meta = entry.metadata().await?;
            objects.push(ObjectInfo {
                name: if dir.is_empty() {
                    name
                } else {
                    format!("{dir}/{name}")
                },
                size: if meta.is_dir() { 0 } else { meta.len() },
                is_dir: meta.is_dir(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(objects)
    }
}
