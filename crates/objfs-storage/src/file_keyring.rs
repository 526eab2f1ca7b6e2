use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes128Gcm, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use objfs_core::keyring::{Keyring, KeyringError};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::instrument;

use crate::key_provider::KeyMaterial;

/// File-backed keyring, one file per service/user entry under `root`.
/// Entries are AES-GCM encrypted when a key is supplied and stored plainly otherwise.
pub struct FileKeyring {
    root: PathBuf,
    key: Option<KeyMaterial>,
}

impl FileKeyring {
    pub fn new(root: impl Into<PathBuf>, key: Option<KeyMaterial>) -> Self {
        Self {
            root: root.into(),
            key,
        }
    }

    fn path_for(&self, service: &str, user: &str) -> PathBuf {
        self.root.join(URL_SAFE_NO_PAD.encode(format!("{service}/{user}")))
    }

    fn seal(&self, secret: &str) -> Result<StoredBlob, KeyringError> {
        let Some(key) = &self.key else {
            return Ok(StoredBlob {
                nonce: None,
                data: URL_SAFE_NO_PAD.encode(secret),
            });
        };

        let cipher = build_cipher(key)?;
        let nonce = Aes128Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, secret.as_bytes())
            .map_err(|e| KeyringError::Storage {
                reason: format!("encrypt failed: {e}"),
            })?;
        Ok(StoredBlob {
            nonce: Some(URL_SAFE_NO_PAD.encode(nonce.as_slice())),
            data: URL_SAFE_NO_PAD.encode(ciphertext),
        })
    }

    fn open(&self, blob: StoredBlob) -> Result<String, KeyringError> {
        let data = URL_SAFE_NO_PAD
            .decode(blob.data)
            .map_err(|e| storage_err(format!("data decode failed: {e}")))?;

        let plaintext = match (&self.key, blob.nonce) {
            (None, None) => data,
            (Some(key), Some(nonce)) => {
                let nonce_bytes = URL_SAFE_NO_PAD
                    .decode(nonce)
                    .map_err(|e| storage_err(format!("nonce decode failed: {e}")))?;
                if nonce_bytes.len() != 12 {
                    return Err(storage_err("invalid nonce length"));
                }
                build_cipher(key)?
                    .decrypt(Nonce::from_slice(&nonce_bytes), data.as_ref())
                    .map_err(|e| storage_err(format!("decrypt failed: {e}")))?
            }
            (None, Some(_)) => return Err(storage_err("entry is encrypted but no key is configured")),
            (Some(_), None) => return Err(storage_err("entry is not encrypted")),
        };

        String::from_utf8(plaintext).map_err(storage_err)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredBlob {
    /// Absent for plaintext entries.
    nonce: Option<String>,
    data: String,
}

#[async_trait]
impl Keyring for FileKeyring {
    #[instrument(skip(self))]
    async fn get(&self, service: &str, user: &str) -> Result<String, KeyringError> {
        let blob = read_blob(&self.path_for(service, user))
            .map_err(|err| err.unwrap_or_else(|| KeyringError::not_found(service, user)))?;
        self.open(blob)
    }

    #[instrument(skip(self, secret))]
    async fn set(&self, service: &str, user: &str, secret: &str) -> Result<(), KeyringError> {
        let blob = self.seal(secret)?;
        write_blob(&self.path_for(service, user), &blob)
    }

    #[instrument(skip(self))]
    async fn delete(&self, service: &str, user: &str) -> Result<(), KeyringError> {
        match fs::remove_file(self.path_for(service, user)) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(KeyringError::not_found(service, user))
            }
            Err(err) => Err(storage_err(err)),
        }
    }
}

fn write_blob(path: &Path, blob: &StoredBlob) -> Result<(), KeyringError> {
    let parent = path
        .parent()
        .ok_or_else(|| storage_err("invalid keyring path"))?;
    fs::create_dir_all(parent).map_err(storage_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    let json = serde_json::to_vec(blob).map_err(storage_err)?;
    tmp.write_all(&json).map_err(storage_err)?;
    tmp.flush().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

/// `Err(None)` means the entry file does not exist.
fn read_blob(path: &Path) -> Result<StoredBlob, Option<KeyringError>> {
    let mut file = File::open(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            None
        } else {
            Some(storage_err(err))
        }
    })?;

    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .map_err(|err| Some(storage_err(err)))?;
    serde_json::from_slice(&buf).map_err(|err| Some(storage_err(err)))
}

fn build_cipher(material: &KeyMaterial) -> Result<Aes128Gcm, KeyringError> {
    Aes128Gcm::new_from_slice(&material.bytes)
        .map_err(|e| storage_err(format!("cipher init failed: {e}")))
}

fn storage_err<E: ToString>(err: E) -> KeyringError {
    KeyringError::Storage {
        reason: err.to_string(),
    }
}
