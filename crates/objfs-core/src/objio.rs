//! Object storage contract, backend registry and the tracing decorator.

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    auth::{CredentialMap, Session},
    registry::RegistryError,
};

/// Summary of an open storage handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageInfo {
    pub backend: String,
    pub uri: String,
    pub principal: Option<String>,
    /// Whether object names are case sensitive.
    pub case_sensitive: bool,
}

/// Metadata for a single object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectInfo {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub modified: Option<DateTime<Utc>>,
}

/// Contract for a connection to a storage backend.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn info(&self) -> anyhow::Result<StorageInfo>;

    /// List objects whose names start with `prefix`.
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<ObjectInfo>>;
}

/// What a backend constructor authenticates with.
#[derive(Clone)]
pub enum StorageCredentials {
    Credentials(CredentialMap),
    Session(Arc<dyn Session>),
}

impl fmt::Debug for StorageCredentials {
    // Credential values are secrets; only key names are shown.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credentials(map) => f
                .debug_tuple("Credentials")
                .field(&map.keys().collect::<Vec<_>>())
                .finish(),
            Self::Session(session) => f.debug_tuple("Session").field(session).finish(),
        }
    }
}

/// Settings handed to every backend constructor.
#[derive(Clone)]
pub struct StorageConfig {
    pub uri: String,
    /// HTTP client shared by network backends; honors the accept-tls-cert flag.
    pub http: reqwest::Client,
}

impl StorageConfig {
    pub fn new(uri: impl Into<String>, accept_tls_cert: bool) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(accept_tls_cert)
            .build()?;
        Ok(Self {
            uri: uri.into(),
            http,
        })
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("uri", &self.uri)
            .finish_non_exhaustive()
    }
}

pub type StorageConstructor = Arc<
    dyn Fn(&StorageConfig, StorageCredentials) -> anyhow::Result<Arc<dyn ObjectStorage>>
        + Send
        + Sync,
>;

/// A registered backend.
#[derive(Clone)]
pub struct StorageProvider {
    /// Used when no storage URI is configured.
    pub default_uri: Option<String>,
    pub constructor: StorageConstructor,
}

impl StorageProvider {
    pub fn new<F>(default_uri: Option<String>, constructor: F) -> Self
    where
        F: Fn(&StorageConfig, StorageCredentials) -> anyhow::Result<Arc<dyn ObjectStorage>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            default_uri,
            constructor: Arc::new(constructor),
        }
    }

    pub fn construct(
        &self,
        config: &StorageConfig,
        credentials: StorageCredentials,
    ) -> anyhow::Result<Arc<dyn ObjectStorage>> {
        (self.constructor)(config, credentials)
    }
}

/// Named storage backends, populated once at startup.
#[derive(Default, Clone)]
pub struct StorageRegistry {
    providers: BTreeMap<String, StorageProvider>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, provider: StorageProvider) {
        self.providers.insert(name.into(), provider);
    }

    pub fn lookup(&self, name: &str) -> Result<&StorageProvider, RegistryError> {
        self.providers.get(name).ok_or_else(|| RegistryError::Unknown {
            kind: "storage",
            name: name.to_string(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}

/// Logs every call made through the wrapped storage.
pub struct TraceObjectStorage {
    inner: Arc<dyn ObjectStorage>,
}

impl TraceObjectStorage {
    pub fn new(inner: Arc<dyn ObjectStorage>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ObjectStorage for TraceObjectStorage {
    #[instrument(name = "storage.info", skip_all)]
    async fn info(&self) -> anyhow::Result<StorageInfo> {
        let result = self.inner.info().await;
        match &result {
            Ok(info) => debug!(?info, "ok"),
            Err(err) => debug!(%err, "failed"),
        }
        result
    }

    #[instrument(name = "storage.list", skip(self))]
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<ObjectInfo>> {
        let result = self.inner.list(prefix).await;
        match &result {
            Ok(objects) => debug!(count = objects.len(), "ok"),
            Err(err) => debug!(%err, "failed"),
        }
        result
    }
}
