use std::sync::Arc;

use objfs_core::{auth::AuthRegistry, objio::StorageRegistry};
use objfs_storage::system_keyring::SystemKeyring;

use crate::vars::Collaborators;

/// Backend used when none is configured.
pub const DEFAULT_STORAGE_NAME: &str = "local";

/// Registries populated with every built-in provider, backed by the platform keyring.
pub fn builtin() -> Collaborators {
    let mut auth = AuthRegistry::new();
    let mut storage = StorageRegistry::new();
    objfs_local::register(&mut auth, &mut storage);

    Collaborators {
        system_keyring: Arc::new(SystemKeyring),
        auth,
        storage,
    }
}
