//! Built-in providers: the `local` directory backend and the `token` auth provider.

pub mod storage;
pub mod token;

use std::sync::Arc;

use objfs_core::{
    auth::AuthRegistry,
    objio::{StorageProvider, StorageRegistry},
};

/// Register the built-in providers.
pub fn register(auth: &mut AuthRegistry, storage: &mut StorageRegistry) {
    auth.register(Arc::new(token::TokenAuth));
    storage.register(
        "local",
        StorageProvider::new(None, storage::LocalStorage::construct),
    );
}
