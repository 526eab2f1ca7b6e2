//! Concrete secret stores: the platform keyring and a file-backed keyring that
//! encrypts entries with AES-GCM when given a key.

pub mod file_keyring;
pub mod key_provider;
pub mod system_keyring;
