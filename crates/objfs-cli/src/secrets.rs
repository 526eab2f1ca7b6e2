use std::{path::Path, str::FromStr, sync::Arc};

use objfs_core::keyring::{Keyring, OverlayKeyring};
use objfs_storage::{file_keyring::FileKeyring, key_provider::KeyringKeyProvider};
use tracing::debug;

use crate::error::{CliError, CliResult};

/// Keyring service under which objfs keeps its entries.
pub const SERVICE: &str = "objfs";
/// Entry in the platform keyring holding the user keyring key.
const KEY_ENTRY: &str = "keyring";

/// Which secret store credentials go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyringKind {
    /// The platform keyring alone.
    System,
    /// An encrypted file keyring in front of the platform keyring.
    User,
    /// A plaintext file keyring in front of the platform keyring.
    UserPlain,
}

impl FromStr for KeyringKind {
    type Err = CliError;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "userplain" => Ok(Self::UserPlain),
            _ => Err(CliError::usage(
                "unknown keyring type; specify -keyring in the command line",
            )),
        }
    }
}

/// Build the default secret store for `kind`. File keyrings live under
/// `data_dir/keyring`; the `user` key is kept in the platform keyring.
pub async fn init_keyring(
    kind: KeyringKind,
    data_dir: &Path,
    system: Arc<dyn Keyring>,
) -> CliResult<Arc<dyn Keyring>> {
    let key = match kind {
        KeyringKind::System => {
            debug!("using system keyring");
            return Ok(system);
        }
        KeyringKind::User => {
            let provider = KeyringKeyProvider::new(system.clone(), SERVICE, KEY_ENTRY);
            Some(provider.get_or_create().await.map_err(CliError::fatal)?)
        }
        KeyringKind::UserPlain => None,
    };

    let root = data_dir.join("keyring");
    debug!(root = %root.display(), encrypted = key.is_some(), "layering file keyring");
    let file: Arc<dyn Keyring> = Arc::new(FileKeyring::new(root, key));
    Ok(Arc::new(OverlayKeyring::new(vec![file, system])))
}
