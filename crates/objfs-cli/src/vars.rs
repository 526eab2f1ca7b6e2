//! Lazily resolved configuration variables.
//!
//! Every variable is computed at most once per process and never changes after
//! that. Resolving a variable first resolves its prerequisites:
//!
//! | variable        | needs                                               |
//! |-----------------|-----------------------------------------------------|
//! | storage name    | merged configuration                                |
//! | auth name       | storage name (when not set explicitly)              |
//! | cache path      | storage name                                        |
//! | credential path | storage name (when not set explicitly)              |
//! | credentials     | credential path, secret store                       |
//! | auth session    | auth name, credentials                              |
//! | storage         | storage name, then auth session if an auth name was |
//! |                 | configured, plain credentials otherwise             |
//!
//! The configuration file is read on the first request for any variable.

use std::{fmt, path::PathBuf, sync::Arc};

use objfs_core::{
    auth::{read_credentials, AuthRegistry, CredentialAddress, CredentialMap, Session},
    keyring::Keyring,
    objio::{ObjectStorage, StorageConfig, StorageCredentials, StorageRegistry, TraceObjectStorage},
};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::{
    cli::GlobalArgs,
    config::{self, MergedFlags},
    error::{CliError, CliResult},
    secrets::{self, KeyringKind, SERVICE},
};

/// Registries and platform services the resolver builds objects from.
#[derive(Clone)]
pub struct Collaborators {
    pub system_keyring: Arc<dyn Keyring>,
    pub auth: AuthRegistry,
    pub storage: StorageRegistry,
}

/// Merged configuration with resolved paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
    pub keyring_kind: KeyringKind,
    pub flags: MergedFlags,
}

/// Names of the resolvable variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Var {
    StorageName,
    AuthName,
    CachePath,
    CredentialPath,
    Credentials,
    AuthSession,
    Storage,
}

impl Var {
    pub fn name(self) -> &'static str {
        match self {
            Var::StorageName => "storage name",
            Var::AuthName => "auth name",
            Var::CachePath => "cache path",
            Var::CredentialPath => "credential path",
            Var::Credentials => "credentials",
            Var::AuthSession => "auth session",
            Var::Storage => "storage",
        }
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Process-wide state handed to every command.
pub struct Context {
    args: GlobalArgs,
    collaborators: Collaborators,
    settings: OnceCell<Settings>,
    keyring: OnceCell<Arc<dyn Keyring>>,
    storage_name: OnceCell<String>,
    auth_name: OnceCell<String>,
    cache_path: OnceCell<PathBuf>,
    credential_path: OnceCell<String>,
    credentials: OnceCell<CredentialMap>,
    auth_session: OnceCell<Arc<dyn Session>>,
    storage: OnceCell<Arc<dyn ObjectStorage>>,
}

impl Context {
    pub fn new(args: GlobalArgs, collaborators: Collaborators) -> Self {
        Self {
            args,
            collaborators,
            settings: OnceCell::new(),
            keyring: OnceCell::new(),
            storage_name: OnceCell::new(),
            auth_name: OnceCell::new(),
            cache_path: OnceCell::new(),
            credential_path: OnceCell::new(),
            credentials: OnceCell::new(),
            auth_session: OnceCell::new(),
            storage: OnceCell::new(),
        }
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Resolve the listed variables in order.
    pub async fn need(&self, vars: &[Var]) -> CliResult<()> {
        for var in vars {
            debug!(%var, "need");
            match var {
                Var::StorageName => {
                    self.storage_name().await?;
                }
                Var::AuthName => {
                    self.auth_name().await?;
                }
                Var::CachePath => {
                    self.cache_path().await?;
                }
                Var::CredentialPath => {
                    self.credential_path().await?;
                }
                Var::Credentials => {
                    self.credentials().await?;
                }
                Var::AuthSession => {
                    self.auth_session().await?;
                }
                Var::Storage => {
                    self.storage().await?;
                }
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn is_resolved(&self, var: Var) -> bool {
        match var {
            Var::StorageName => self.storage_name.initialized(),
            Var::AuthName => self.auth_name.initialized(),
            Var::CachePath => self.cache_path.initialized(),
            Var::CredentialPath => self.credential_path.initialized(),
            Var::Credentials => self.credentials.initialized(),
            Var::AuthSession => self.auth_session.initialized(),
            Var::Storage => self.storage.initialized(),
        }
    }

    /// Merged configuration; loaded once, on first use.
    pub async fn settings(&self) -> CliResult<&Settings> {
        self.settings
            .get_or_try_init(|| async move {
                let loaded = config::load(&self.args)?;
                let keyring_kind = loaded.flags.keyring.parse::<KeyringKind>()?;
                Ok::<_, CliError>(Settings {
                    config_path: loaded.config_path,
                    data_dir: loaded.data_dir,
                    keyring_kind,
                    flags: loaded.flags,
                })
            })
            .await
    }

    /// Default secret store for this process.
    pub async fn keyring(&self) -> CliResult<&Arc<dyn Keyring>> {
        let settings = self.settings().await?;
        self.keyring
            .get_or_try_init(|| async move {
                secrets::init_keyring(
                    settings.keyring_kind,
                    &settings.data_dir,
                    self.collaborators.system_keyring.clone(),
                )
                .await
            })
            .await
    }

    pub async fn storage_name(&self) -> CliResult<&str> {
        let settings = self.settings().await?;
        self.storage_name
            .get_or_try_init(|| async move {
                if settings.flags.storage.is_empty() {
                    return Err(CliError::usage(
                        "unknown storage; specify -storage in the command line",
                    ));
                }
                debug!(storage = %settings.flags.storage, "resolved storage name");
                Ok(settings.flags.storage.clone())
            })
            .await
            .map(String::as_str)
    }

    pub async fn auth_name(&self) -> CliResult<&str> {
        let settings = self.settings().await?;
        self.auth_name
            .get_or_try_init(|| async move {
                let name = if settings.flags.auth.is_empty() {
                    self.storage_name().await?.to_string()
                } else {
                    settings.flags.auth.clone()
                };
                debug!(auth = %name, "resolved auth name");
                Ok::<_, CliError>(name)
            })
            .await
            .map(String::as_str)
    }

    pub async fn cache_path(&self) -> CliResult<&PathBuf> {
        let settings = self.settings().await?;
        self.cache_path
            .get_or_try_init(|| async move {
                let path = settings.data_dir.join(self.storage_name().await?);
                debug!(path = %path.display(), "resolved cache path");
                Ok::<_, CliError>(path)
            })
            .await
    }

    pub async fn credential_path(&self) -> CliResult<&str> {
        let settings = self.settings().await?;
        self.credential_path
            .get_or_try_init(|| async move {
                let path = if settings.flags.credentials.is_empty() {
                    CredentialAddress::keyring(SERVICE, self.storage_name().await?)
                } else {
                    settings.flags.credentials.clone()
                };
                debug!(credentials = %path, "resolved credential path");
                Ok::<_, CliError>(path)
            })
            .await
            .map(String::as_str)
    }

    pub async fn credentials(&self) -> CliResult<&CredentialMap> {
        self.credentials
            .get_or_try_init(|| async move {
                let path = self.credential_path().await?;
                let keyring = self.keyring().await?;
                let credentials = match read_credentials(path, keyring.as_ref()).await {
                    Ok(credentials) if !credentials.is_empty() => credentials,
                    Ok(_) => {
                        debug!(credentials = %path, "credentials are empty");
                        return Err(unknown_credentials());
                    }
                    Err(err) => {
                        debug!(credentials = %path, %err, "cannot read credentials");
                        return Err(unknown_credentials());
                    }
                };
                debug!(keys = ?credentials.keys().collect::<Vec<_>>(), "resolved credentials");
                Ok(credentials)
            })
            .await
    }

    pub async fn auth_session(&self) -> CliResult<&Arc<dyn Session>> {
        self.auth_session
            .get_or_try_init(|| async move {
                let name = self.auth_name().await?;
                let credentials = self.credentials().await?;
                let auth = self.collaborators.auth.lookup(name).map_err(|err| {
                    debug!(%err, "auth lookup failed");
                    CliError::usage("unknown auth; specify -auth in the command line")
                })?;
                let session = auth.session(credentials).await.map_err(CliError::fatal)?;
                debug!(auth = %name, ?session, "resolved auth session");
                Ok::<_, CliError>(session)
            })
            .await
    }

    pub async fn storage(&self) -> CliResult<&Arc<dyn ObjectStorage>> {
        let settings = self.settings().await?;
        self.storage
            .get_or_try_init(|| async move {
                let name = self.storage_name().await?;
                let credentials = if settings.flags.auth.is_empty() {
                    StorageCredentials::Credentials(self.credentials().await?.clone())
                } else {
                    StorageCredentials::Session(self.auth_session().await?.clone())
                };

                let provider = self
                    .collaborators
                    .storage
                    .lookup(name)
                    .map_err(CliError::fatal)?;
                let uri = if settings.flags.storage_uri.is_empty() {
                    provider.default_uri.clone().unwrap_or_default()
                } else {
                    settings.flags.storage_uri.clone()
                };
                let config = StorageConfig::new(uri, settings.flags.accept_tls_cert)
                    .map_err(CliError::fatal)?;

                debug!(storage = %name, ?config, ?credentials, "opening storage");
                let mut storage = provider
                    .construct(&config, credentials)
                    .map_err(CliError::fatal)?;
                if self.args.verbose {
                    storage = Arc::new(TraceObjectStorage::new(storage));
                }
                Ok::<_, CliError>(storage)
            })
            .await
    }
}

fn unknown_credentials() -> CliError {
    CliError::usage("unknown credentials; specify -credentials in the command line")
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use async_trait::async_trait;
    use clap::Parser;
    use objfs_core::{
        auth::Auth,
        keyring::{InMemoryKeyring, KeyringError},
        objio::{ObjectInfo, StorageInfo, StorageProvider},
    };

    use super::*;
    use crate::cli::normalize_legacy_flags;

    /// Keyring that counts reads.
    #[derive(Default)]
    struct CountingKeyring {
        inner: InMemoryKeyring,
        reads: AtomicUsize,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl Keyring for CountingKeyring {
        async fn get(&self, service: &str, user: &str) -> Result<String, KeyringError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(service, user).await
        }

        async fn set(&self, service: &str, user: &str, secret: &str) -> Result<(), KeyringError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set(service, user, secret).await
        }

        async fn delete(&self, service: &str, user: &str) -> Result<(), KeyringError> {
            self.inner.delete(service, user).await
        }
    }

    #[derive(Debug)]
    struct TestSession;

    impl Session for TestSession {
        fn provider(&self) -> &str {
            "test"
        }
    }

    #[derive(Default)]
    struct CountingAuth {
        sessions: AtomicUsize,
    }

    #[async_trait]
    impl Auth for CountingAuth {
        fn name(&self) -> &'static str {
            "test"
        }

        async fn session(&self, credentials: &CredentialMap) -> anyhow::Result<Arc<dyn Session>> {
            self.sessions.fetch_add(1, Ordering::SeqCst);
            anyhow::ensure!(credentials.contains_key("token"), "no token");
            Ok(Arc::new(TestSession))
        }
    }

    /// Storage that records how it was constructed.
    struct RecordingStorage {
        via: &'static str,
    }

    #[async_trait]
    impl ObjectStorage for RecordingStorage {
        async fn info(&self) -> anyhow::Result<StorageInfo> {
            Ok(StorageInfo {
                backend: "test".into(),
                uri: String::new(),
                principal: Some(self.via.to_string()),
                case_sensitive: true,
            })
        }

        async fn list(&self, _prefix: &str) -> anyhow::Result<Vec<ObjectInfo>> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        keyring: Arc<CountingKeyring>,
        auth: Arc<CountingAuth>,
        constructed: Arc<AtomicUsize>,
        uris: Arc<Mutex<Vec<String>>>,
        dir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                keyring: Arc::new(CountingKeyring::default()),
                auth: Arc::new(CountingAuth::default()),
                constructed: Arc::new(AtomicUsize::new(0)),
                uris: Arc::new(Mutex::new(Vec::new())),
                dir: tempfile::tempdir().expect("tempdir"),
            }
        }

        fn collaborators(&self) -> Collaborators {
            let mut auth = AuthRegistry::new();
            auth.register(self.auth.clone());

            let mut storage = StorageRegistry::new();
            let constructed = self.constructed.clone();
            let uris = self.uris.clone();
            storage.register(
                "test",
                StorageProvider::new(Some("test://default".into()), move |config, creds| {
                    constructed.fetch_add(1, Ordering::SeqCst);
                    uris.lock().unwrap().push(config.uri.clone());
                    let via = match creds {
                        StorageCredentials::Credentials(_) => "credentials",
                        StorageCredentials::Session(_) => "session",
                    };
                    Ok(Arc::new(RecordingStorage { via }) as Arc<dyn ObjectStorage>)
                }),
            );
            storage.register(
                "broken",
                StorageProvider::new(None, |_, _| anyhow::bail!("cannot connect")),
            );

            Collaborators {
                system_keyring: self.keyring.clone(),
                auth,
                storage,
            }
        }

        /// Context with an absent config file, a temp data dir and the system keyring.
        fn context(&self, flags: &[&str]) -> Context {
            let mut argv = vec![
                "objfs".to_string(),
                format!("--config={}", self.dir.path().join("absent.conf").display()),
                format!("--datadir={}", self.dir.path().display()),
                "--keyring=system".to_string(),
            ];
            argv.extend(flags.iter().map(|f| f.to_string()));
            let args = GlobalArgs::try_parse_from(normalize_legacy_flags(argv)).expect("parse");
            Context::new(args, self.collaborators())
        }

        async fn store_credentials(&self, user: &str, text: &str) {
            self.keyring.inner.set(SERVICE, user, text).await.unwrap();
        }
    }

    #[tokio::test]
    async fn derives_defaults_from_storage_name() {
        let harness = Harness::new();
        let ctx = harness.context(&["-storage=onedrive", "-auth=onedrive", "status"]);

        assert_eq!(ctx.storage_name().await.unwrap(), "onedrive");
        assert_eq!(ctx.auth_name().await.unwrap(), "onedrive");
        assert_eq!(
            ctx.credential_path().await.unwrap(),
            "keyring:objfs/onedrive"
        );
        assert_eq!(
            ctx.cache_path().await.unwrap(),
            &harness.dir.path().join("onedrive")
        );
    }

    #[tokio::test]
    async fn auth_name_defaults_to_storage_name() {
        let harness = Harness::new();
        let ctx = harness.context(&["--storage=test"]);
        assert_eq!(ctx.auth_name().await.unwrap(), "test");
        assert!(ctx.is_resolved(Var::StorageName));
        assert!(!ctx.is_resolved(Var::Credentials));
    }

    #[tokio::test]
    async fn explicit_credential_path_is_kept() {
        let harness = Harness::new();
        let ctx = harness.context(&["--credentials=/etc/objfs/creds"]);
        assert_eq!(ctx.credential_path().await.unwrap(), "/etc/objfs/creds");
    }

    #[tokio::test]
    async fn empty_storage_name_is_a_usage_error_before_any_keyring_access() {
        let harness = Harness::new();
        let ctx = harness.context(&["--storage=", "--auth=test"]);

        let err = ctx.need(&[Var::Storage]).await.expect_err("no storage");
        assert_eq!(err.exit_code(), 2);
        assert_eq!(harness.keyring.reads.load(Ordering::SeqCst), 0);
        assert_eq!(harness.auth.sessions.load(Ordering::SeqCst), 0);
        assert!(!ctx.is_resolved(Var::Credentials));
    }

    #[tokio::test]
    async fn unknown_keyring_kind_is_a_usage_error_without_store() {
        let harness = Harness::new();
        let ctx = harness.context(&["--keyring=foo", "--storage=test"]);

        let err = ctx.storage_name().await.expect_err("bad keyring");
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("unknown keyring type"));
        assert!(ctx.keyring.get().is_none());
        assert_eq!(harness.keyring.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_credentials_are_a_usage_error() {
        let harness = Harness::new();
        let ctx = harness.context(&["--storage=test"]);
        let err = ctx.credentials().await.expect_err("nothing stored");
        assert_eq!(err.exit_code(), 2);

        harness.store_credentials("other", "\n# empty\n").await;
        let ctx = harness.context(&["--storage=other"]);
        let err = ctx.credentials().await.expect_err("empty credentials");
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn credentials_are_read_once() {
        let harness = Harness::new();
        harness.store_credentials("test", "token=abc\n").await;
        let ctx = harness.context(&["--storage=test"]);

        let first = ctx.credentials().await.unwrap().clone();
        let second = ctx.credentials().await.unwrap();
        assert_eq!(&first, second);
        assert_eq!(first.get("token").map(String::as_str), Some("abc"));
        assert_eq!(harness.keyring.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_initialization() {
        let harness = Harness::new();
        harness.store_credentials("test", "token=abc\n").await;
        let ctx = Arc::new(harness.context(&["--keyring=user", "--storage=test"]));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    match i % 3 {
                        0 => {
                            ctx.settings().await?;
                        }
                        1 => {
                            ctx.credentials().await?;
                        }
                        _ => {}
                    }
                    Ok::<_, CliError>(ctx.keyring().await?.clone())
                })
            })
            .collect();

        let mut keyrings = Vec::new();
        for task in tasks {
            keyrings.push(task.await.expect("join").expect("resolve"));
        }
        assert!(keyrings.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        // One key lookup and generation, one credential read.
        assert_eq!(harness.keyring.writes.load(Ordering::SeqCst), 1);
        assert_eq!(harness.keyring.reads.load(Ordering::SeqCst), 2);
        assert_eq!(harness.keyring.inner.len(), 2);
        assert_eq!(
            ctx.credentials().await.unwrap().get("token").map(String::as_str),
            Some("abc")
        );
    }

    #[tokio::test]
    async fn storage_without_auth_uses_plain_credentials() {
        let harness = Harness::new();
        harness.store_credentials("test", "token=abc\n").await;
        let ctx = harness.context(&["--storage=test", "-v"]);

        let storage = ctx.storage().await.unwrap().clone();
        assert_eq!(
            storage.info().await.unwrap().principal.as_deref(),
            Some("credentials")
        );
        assert!(!ctx.is_resolved(Var::AuthSession));
        assert_eq!(harness.auth.sessions.load(Ordering::SeqCst), 0);

        let again = ctx.storage().await.unwrap();
        assert!(Arc::ptr_eq(&storage, again));
        assert_eq!(harness.constructed.load(Ordering::SeqCst), 1);
        assert_eq!(
            harness.uris.lock().unwrap().as_slice(),
            ["test://default".to_string()]
        );
    }

    #[tokio::test]
    async fn storage_with_explicit_auth_goes_through_session() {
        let harness = Harness::new();
        harness.store_credentials("test", "token=abc\n").await;
        let ctx = harness.context(&["--storage=test", "--auth=test", "--storage-uri=test://x"]);

        ctx.need(&[Var::Storage, Var::Storage, Var::AuthSession])
            .await
            .unwrap();
        let storage = ctx.storage().await.unwrap();
        assert_eq!(
            storage.info().await.unwrap().principal.as_deref(),
            Some("session")
        );
        assert!(ctx.is_resolved(Var::AuthSession));
        assert_eq!(harness.auth.sessions.load(Ordering::SeqCst), 1);
        assert_eq!(harness.constructed.load(Ordering::SeqCst), 1);
        assert_eq!(
            harness.uris.lock().unwrap().as_slice(),
            ["test://x".to_string()]
        );
    }

    #[tokio::test]
    async fn unknown_auth_is_usage_error_and_session_failure_is_fatal() {
        let harness = Harness::new();
        harness.store_credentials("test", "user=me\n").await;

        let ctx = harness.context(&["--storage=test", "--auth=nope"]);
        assert_eq!(ctx.auth_session().await.unwrap_err().exit_code(), 2);

        let ctx = harness.context(&["--storage=test", "--auth=test"]);
        assert_eq!(ctx.auth_session().await.unwrap_err().exit_code(), 1);
    }

    #[tokio::test]
    async fn unknown_or_failing_backend_is_fatal() {
        let harness = Harness::new();
        harness.store_credentials("missing", "token=abc\n").await;
        harness.store_credentials("broken", "token=abc\n").await;

        let ctx = harness.context(&["--storage=missing"]);
        let err = ctx.need(&[Var::Storage]).await.unwrap_err();
        assert_eq!(err.exit_code(), 1);

        let ctx = harness.context(&["--storage=broken"]);
        let err = ctx.need(&[Var::Storage]).await.unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("cannot connect"));
    }

    #[tokio::test]
    async fn need_resolves_every_variable() {
        let harness = Harness::new();
        harness.store_credentials("test", "token=abc\n").await;
        let ctx = harness.context(&["--storage=test", "--auth=test"]);

        let all = [
            Var::StorageName,
            Var::AuthName,
            Var::CachePath,
            Var::CredentialPath,
            Var::Credentials,
            Var::AuthSession,
            Var::Storage,
        ];
        ctx.need(&all).await.unwrap();
        assert!(all.iter().all(|var| ctx.is_resolved(*var)));
    }

    #[tokio::test]
    async fn config_file_sections_feed_variables() {
        let harness = Harness::new();
        let config = harness.dir.path().join("objfs.conf");
        std::fs::write(
            &config,
            "storage = \"test\"\n[test]\ncredentials = \"keyring:objfs/shared\"\n",
        )
        .unwrap();
        let args = GlobalArgs::try_parse_from([
            "objfs".to_string(),
            format!("--config={}", config.display()),
            format!("--datadir={}", harness.dir.path().display()),
            "--keyring=system".to_string(),
        ])
        .unwrap();
        let ctx = Context::new(args, harness.collaborators());

        assert_eq!(ctx.storage_name().await.unwrap(), "test");
        assert_eq!(ctx.credential_path().await.unwrap(), "keyring:objfs/shared");
        assert_eq!(ctx.settings().await.unwrap().config_path, config);
    }
}
