use async_trait::async_trait;
use objfs_core::keyring::{Keyring, KeyringError};
use tracing::instrument;

/// Platform secret store (Keychain, Credential Manager, Secret Service) via the
/// `keyring` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemKeyring;

impl SystemKeyring {
    fn entry(service: &str, user: &str) -> Result<keyring::Entry, KeyringError> {
        keyring::Entry::new(service, user).map_err(|e| KeyringError::Storage {
            reason: e.to_string(),
        })
    }
}

fn map_err(err: keyring::Error, service: &str, user: &str) -> KeyringError {
    match err {
        keyring::Error::NoEntry => KeyringError::not_found(service, user),
        other => KeyringError::Storage {
            reason: other.to_string(),
        },
    }
}

// Platform keyring calls are synchronous; they are wrapped for trait compatibility.
#[async_trait]
impl Keyring for SystemKeyring {
    #[instrument(skip(self))]
    async fn get(&self, service: &str, user: &str) -> Result<String, KeyringError> {
        Self::entry(service, user)?
            .get_password()
            .map_err(|e| map_err(e, service, user))
    }

    #[instrument(skip(self, secret))]
    async fn set(&self, service: &str, user: &str, secret: &str) -> Result<(), KeyringError> {
        Self::entry(service, user)?
            .set_password(secret)
            .map_err(|e| map_err(e, service, user))
    }

    #[instrument(skip(self))]
    async fn delete(&self, service: &str, user: &str) -> Result<(), KeyringError> {
        Self::entry(service, user)?
            .delete_credential()
            .map_err(|e| map_err(e, service, user))
    }
}
