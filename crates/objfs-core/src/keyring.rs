use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced by secret store implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyringError {
    /// Requested entry does not exist.
    #[error("keyring entry not found: {service}/{user}")]
    NotFound { service: String, user: String },
    /// Underlying storage failure.
    #[error("keyring failure: {reason}")]
    Storage { reason: String },
}

impl KeyringError {
    pub fn not_found(service: &str, user: &str) -> Self {
        Self::NotFound {
            service: service.to_string(),
            user: user.to_string(),
        }
    }
}

/// Secret store addressed by a service/user pair.
#[async_trait]
pub trait Keyring: Send + Sync {
    /// Retrieve the secret stored for `service`/`user`.
    async fn get(&self, service: &str, user: &str) -> Result<String, KeyringError>;

    /// Persist a secret, overwriting any existing entry.
    async fn set(&self, service: &str, user: &str, secret: &str) -> Result<(), KeyringError>;

    /// Remove an entry. Removing a missing entry reports `NotFound`.
    async fn delete(&self, service: &str, user: &str) -> Result<(), KeyringError>;
}

/// Layers several keyrings. Lookups consult each layer in order and return the
/// first hit; writes go to the first layer; deletes apply to all layers.
pub struct OverlayKeyring {
    layers: Vec<Arc<dyn Keyring>>,
}

impl OverlayKeyring {
    pub fn new(layers: Vec<Arc<dyn Keyring>>) -> Self {
        Self { layers }
    }
}

#[async_trait]
impl Keyring for OverlayKeyring {
    async fn get(&self, service: &str, user: &str) -> Result<String, KeyringError> {
        for layer in &self.layers {
            match layer.get(service, user).await {
                Err(KeyringError::NotFound { .. }) => continue,
                other => return other,
            }
        }
        Err(KeyringError::not_found(service, user))
    }

    async fn set(&self, service: &str, user: &str, secret: &str) -> Result<(), KeyringError> {
        let first = self.layers.first().ok_or_else(|| KeyringError::Storage {
            reason: "overlay keyring has no layers".to_string(),
        })?;
        first.set(service, user, secret).await
    }

    async fn delete(&self, service: &str, user: &str) -> Result<(), KeyringError> {
        let mut found = false;
        for layer in &self.layers {
            match layer.delete(service, user).await {
                Ok(()) => found = true,
                Err(KeyringError::NotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        if found {
            Ok(())
        } else {
            Err(KeyringError::not_found(service, user))
        }
    }
}

/// In-memory keyring standing in for the platform store in tests and smoke runs.
/// Values are masked so plaintext never sits in the map; this is not encryption.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyring {
    inner: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
}

impl InMemoryKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Keyring for InMemoryKeyring {
    async fn get(&self, service: &str, user: &str) -> Result<String, KeyringError> {
        let map = self.inner.lock().map_err(|err| KeyringError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;

        let masked = map
            .get(&(service.to_string(), user.to_string()))
            .ok_or_else(|| KeyringError::not_found(service, user))?;
        String::from_utf8(unmask(masked)).map_err(|err| KeyringError::Storage {
            reason: err.to_string(),
        })
    }

    async fn set(&self, service: &str, user: &str, secret: &str) -> Result<(), KeyringError> {
        let mut map = self.inner.lock().map_err(|err| KeyringError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.insert(
            (service.to_string(), user.to_string()),
            mask(secret.as_bytes()),
        );
        Ok(())
    }

    async fn delete(&self, service: &str, user: &str) -> Result<(), KeyringError> {
        let mut map = self.inner.lock().map_err(|err| KeyringError::Storage {
            reason: format!("lock poisoned: {err}"),
        })?;
        map.remove(&(service.to_string(), user.to_string()))
            .map(|_| ())
            .ok_or_else(|| KeyringError::not_found(service, user))
    }
}

const MASK_BYTE: u8 = 0xA5;

fn mask(input: &[u8]) -> Vec<u8> {
    input.iter().map(|b| b ^ MASK_BYTE).collect()
}

fn unmask(input: &[u8]) -> Vec<u8> {
    mask(input)
}
