//! Credentials, credential addresses and auth providers.
//!
//! A credential address is either `keyring:<service>/<user>`, naming an entry in
//! the default secret store, or a plain filesystem path. Either way the payload
//! is `key=value` text.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use thiserror::Error;
use tracing::instrument;

use crate::{
    keyring::{Keyring, KeyringError},
    registry::RegistryError,
};

const KEYRING_SCHEME: &str = "keyring:";

/// Opaque credential key/value pairs.
pub type CredentialMap = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("invalid credential address: {0}")]
    InvalidAddress(String),
    #[error(transparent)]
    Keyring(#[from] KeyringError),
    #[error("credential file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Where credentials live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialAddress {
    Keyring { service: String, user: String },
    File(PathBuf),
}

impl CredentialAddress {
    pub fn parse(address: &str) -> Result<Self, CredentialError> {
        match address.strip_prefix(KEYRING_SCHEME) {
            Some(rest) => {
                let (service, user) = rest
                    .split_once('/')
                    .filter(|(service, user)| !service.is_empty() && !user.is_empty())
                    .ok_or_else(|| CredentialError::InvalidAddress(address.to_string()))?;
                Ok(Self::Keyring {
                    service: service.to_string(),
                    user: user.to_string(),
                })
            }
            None if address.is_empty() => Err(CredentialError::InvalidAddress(address.to_string())),
            None => Ok(Self::File(PathBuf::from(address))),
        }
    }

    /// Address of the keyring entry holding credentials for `user` under `service`.
    pub fn keyring(service: &str, user: &str) -> String {
        format!("{KEYRING_SCHEME}{service}/{user}")
    }
}

/// Parse `key=value` lines. Blank lines and `#` comments are skipped; a line
/// without `=` is a key with an empty value.
pub fn parse_credentials(text: &str) -> CredentialMap {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| match line.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
            None => (line.to_string(), String::new()),
        })
        .collect()
}

pub fn format_credentials(credentials: &CredentialMap) -> String {
    credentials
        .iter()
        .map(|(k, v)| format!("{k}={v}\n"))
        .collect()
}

/// Read credentials from an address. A missing entry or file reads as an error;
/// callers decide whether that is fatal.
#[instrument(skip(keyring))]
pub async fn read_credentials(
    address: &str,
    keyring: &dyn Keyring,
) -> Result<CredentialMap, CredentialError> {
    let text = match CredentialAddress::parse(address)? {
        CredentialAddress::Keyring { service, user } => keyring.get(&service, &user).await?,
        CredentialAddress::File(path) => tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| CredentialError::Io { path, source })?,
    };
    Ok(parse_credentials(&text))
}

#[instrument(skip(keyring, credentials))]
pub async fn write_credentials(
    address: &str,
    keyring: &dyn Keyring,
    credentials: &CredentialMap,
) -> Result<(), CredentialError> {
    let text = format_credentials(credentials);
    match CredentialAddress::parse(address)? {
        CredentialAddress::Keyring { service, user } => {
            keyring.set(&service, &user, &text).await?;
        }
        CredentialAddress::File(path) => write_file(&path, &text).await?,
    }
    Ok(())
}

#[instrument(skip(keyring))]
pub async fn delete_credentials(address: &str, keyring: &dyn Keyring) -> Result<(), CredentialError> {
    match CredentialAddress::parse(address)? {
        CredentialAddress::Keyring { service, user } => keyring.delete(&service, &user).await?,
        CredentialAddress::File(path) => tokio::fs::remove_file(&path)
            .await
            .map_err(|source| CredentialError::Io { path, source })?,
    }
    Ok(())
}

async fn write_file(path: &Path, text: &str) -> Result<(), CredentialError> {
    let io_err = |source| CredentialError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    tokio::fs::write(path, text).await.map_err(io_err)
}

/// Authenticated, provider-specific context built from credentials.
pub trait Session: fmt::Debug + Send + Sync {
    /// Name of the auth provider that built the session.
    fn provider(&self) -> &str;

    /// Identity the session acts as, when the provider knows it.
    fn principal(&self) -> Option<&str> {
        None
    }
}

/// Contract for any auth provider.
#[async_trait]
pub trait Auth: Send + Sync {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// Build a session from credentials.
    async fn session(&self, credentials: &CredentialMap) -> anyhow::Result<Arc<dyn Session>>;
}

/// Named auth providers, populated once at startup.
#[derive(Default, Clone)]
pub struct AuthRegistry {
    providers: BTreeMap<String, Arc<dyn Auth>>,
}

impl AuthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Auth>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Auth>, RegistryError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::Unknown {
                kind: "auth",
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}
