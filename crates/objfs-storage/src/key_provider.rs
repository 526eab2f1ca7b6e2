use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use objfs_core::keyring::{Keyring, KeyringError};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::debug;

/// Size of the user keyring key in bytes.
pub const KEY_LEN: usize = 16;

/// Key material used to encrypt the file keyring.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub bytes: [u8; KEY_LEN],
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial(..)")
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keyring error: {0}")]
    Keyring(#[from] KeyringError),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Fetches the user keyring key from a backing keyring, creating and storing a
/// fresh random key the first time.
pub struct KeyringKeyProvider {
    keyring: Arc<dyn Keyring>,
    service: String,
    user: String,
}

impl KeyringKeyProvider {
    pub fn new(keyring: Arc<dyn Keyring>, service: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            keyring,
            service: service.into(),
            user: user.into(),
        }
    }

    pub async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        match self.keyring.get(&self.service, &self.user).await {
            Ok(secret) => return decode_key(&secret),
            Err(KeyringError::NotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }

        debug!(service = %self.service, user = %self.user, "generating keyring key");
        let material = generate_key();
        self.keyring
            .set(&self.service, &self.user, &encode_key(&material))
            .await?;
        Ok(material)
    }
}

fn generate_key() -> KeyMaterial {
    let mut bytes = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    KeyMaterial { bytes }
}

fn encode_key(material: &KeyMaterial) -> String {
    general_purpose::STANDARD.encode(material.bytes)
}

fn decode_key(secret: &str) -> Result<KeyMaterial, KeyError> {
    let bytes = general_purpose::STANDARD
        .decode(secret)
        .map_err(|e| KeyError::Decode(e.to_string()))?;

    let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
        KeyError::Decode(format!("expected {KEY_LEN} bytes, got {}", bytes.len()))
    })?;
    Ok(KeyMaterial { bytes })
}
