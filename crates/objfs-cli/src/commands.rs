use std::io::Write;

use objfs_core::auth::{delete_credentials, write_credentials, CredentialMap};
use tracing::{debug, info};

use crate::{
    cli::Command,
    error::{CliError, CliResult},
    vars::{Context, Var},
};

/// Run a parsed command, writing its report to `out`.
pub async fn execute(ctx: &Context, command: Command, out: &mut dyn Write) -> CliResult<()> {
    debug!(?command, "executing");
    match command {
        Command::Config => config(ctx, out).await,
        Command::Login { pairs } => login(ctx, &pairs, out).await,
        Command::Logout => logout(ctx, out).await,
        Command::Status => status(ctx, out).await,
        Command::Ls { prefix } => ls(ctx, prefix.as_deref().unwrap_or(""), out).await,
        Command::Version => version(out),
    }
}

async fn config(ctx: &Context, out: &mut dyn Write) -> CliResult<()> {
    ctx.need(&[Var::StorageName, Var::AuthName, Var::CredentialPath, Var::CachePath])
        .await?;
    let settings = ctx.settings().await?;
    let storage = ctx.storage_name().await?;

    let storage_uri = if settings.flags.storage_uri.is_empty() {
        ctx.collaborators()
            .storage
            .lookup(storage)
            .ok()
            .and_then(|provider| provider.default_uri.clone())
            .unwrap_or_default()
    } else {
        settings.flags.storage_uri.clone()
    };

    writeln!(out, "config = {}", settings.config_path.display())?;
    writeln!(out, "datadir = {}", settings.data_dir.display())?;
    writeln!(out, "keyring = {}", settings.flags.keyring)?;
    writeln!(out, "storage = {storage}")?;
    writeln!(out, "storage-uri = {storage_uri}")?;
    writeln!(out, "auth = {}", ctx.auth_name().await?)?;
    writeln!(out, "credentials = {}", ctx.credential_path().await?)?;
    writeln!(out, "cache = {}", ctx.cache_path().await?.display())?;
    writeln!(out, "accept-tls-cert = {}", settings.flags.accept_tls_cert)?;
    Ok(())
}

fn parse_pairs(pairs: &[String]) -> CliResult<CredentialMap> {
    let mut credentials = CredentialMap::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                credentials.insert(key.trim().to_string(), value.trim().to_string());
            }
            _ => {
                return Err(CliError::usage(format!(
                    "invalid credential {pair:?}; expected key=value"
                )))
            }
        }
    }
    Ok(credentials)
}

async fn login(ctx: &Context, pairs: &[String], out: &mut dyn Write) -> CliResult<()> {
    let credentials = parse_pairs(pairs)?;
    let settings = ctx.settings().await?;
    let path = ctx.credential_path().await?;

    // An explicit provider validates the credentials before they are kept.
    if !settings.flags.auth.is_empty() {
        let auth = ctx.collaborators().auth.lookup(&settings.flags.auth).map_err(|err| {
            debug!(%err, "auth lookup failed");
            CliError::usage("unknown auth; specify -auth in the command line")
        })?;
        let session = auth.session(&credentials).await.map_err(CliError::fatal)?;
        if let Some(principal) = session.principal() {
            writeln!(out, "authenticated as {principal}")?;
        }
    }

    let keyring = ctx.keyring().await?;
    write_credentials(path, keyring.as_ref(), &credentials)
        .await
        .map_err(CliError::fatal)?;
    info!(credentials = %path, "credentials stored");
    writeln!(out, "credentials stored at {path}")?;
    Ok(())
}

async fn logout(ctx: &Context, out: &mut dyn Write) -> CliResult<()> {
    let path = ctx.credential_path().await?;
    let keyring = ctx.keyring().await?;
    delete_credentials(path, keyring.as_ref())
        .await
        .map_err(CliError::fatal)?;
    info!(credentials = %path, "credentials removed");
    writeln!(out, "credentials removed from {path}")?;
    Ok(())
}

async fn status(ctx: &Context, out: &mut dyn Write) -> CliResult<()> {
    let storage = ctx.storage().await?;
    let info = storage.info().await.map_err(CliError::fatal)?;

    writeln!(out, "backend = {}", info.backend)?;
    writeln!(out, "uri = {}", info.uri)?;
    if let Some(principal) = &info.principal {
        writeln!(out, "principal = {principal}")?;
    }
    writeln!(out, "case-sensitive = {}", info.case_sensitive)?;
    Ok(())
}

async fn ls(ctx: &Context, prefix: &str, out: &mut dyn Write) -> CliResult<()> {
    let storage = ctx.storage().await?;
    let objects = storage.list(prefix).await.map_err(CliError::fatal)?;

    for object in objects {
        let modified = object
            .modified
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let suffix = if object.is_dir { "/" } else { "" };
        writeln!(
            out,
            "{:>12} {:<16} {}{}",
            object.size, modified, object.name, suffix
        )?;
    }
    Ok(())
}

fn version(out: &mut dyn Write) -> CliResult<()> {
    writeln!(out, "objfs - Object Storage File System")?;
    writeln!(out, "version {}", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use clap::Parser;
    use objfs_core::{
        auth::AuthRegistry,
        keyring::{InMemoryKeyring, Keyring},
        objio::StorageRegistry,
    };

    use super::*;
    use crate::{
        cli::{normalize_legacy_flags, GlobalArgs},
        vars::Collaborators,
    };

    struct Fixture {
        system: InMemoryKeyring,
        dir: tempfile::TempDir,
        objects: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let objects = tempfile::tempdir().expect("tempdir");
            std::fs::write(objects.path().join("alpha.txt"), b"hello").unwrap();
            std::fs::create_dir(objects.path().join("beta")).unwrap();
            Self {
                system: InMemoryKeyring::new(),
                dir: tempfile::tempdir().expect("tempdir"),
                objects,
            }
        }

        fn context(&self, flags: &[&str]) -> Context {
            let mut argv = vec![
                "objfs".to_string(),
                format!("--config={}", self.dir.path().join("absent.conf").display()),
                format!("--datadir={}", self.dir.path().display()),
                "--keyring=system".to_string(),
                format!("--storage-uri={}", self.objects.path().display()),
            ];
            argv.extend(flags.iter().map(|f| f.to_string()));
            let args = GlobalArgs::try_parse_from(normalize_legacy_flags(argv)).expect("parse");

            let mut auth = AuthRegistry::new();
            let mut storage = StorageRegistry::new();
            objfs_local::register(&mut auth, &mut storage);
            Context::new(
                args,
                Collaborators {
                    system_keyring: Arc::new(self.system.clone()),
                    auth,
                    storage,
                },
            )
        }
    }

    async fn run(ctx: &Context, command: Command) -> CliResult<String> {
        let mut out = Vec::new();
        execute(ctx, command, &mut out).await?;
        Ok(String::from_utf8(out).expect("utf8"))
    }

    #[tokio::test]
    async fn login_then_status_and_ls() {
        let fixture = Fixture::new();
        let ctx = fixture.context(&[]);
        let printed = run(
            &ctx,
            Command::Login {
                pairs: vec!["user=alice".into(), "token=abc".into()],
            },
        )
        .await
        .unwrap();
        assert!(printed.contains("keyring:objfs/local"));
        assert_eq!(
            fixture.system.get("objfs", "local").await.unwrap(),
            "token=abc\nuser=alice\n"
        );

        let ctx = fixture.context(&[]);
        let status = run(&ctx, Command::Status).await.unwrap();
        assert!(status.contains("backend = local"));
        assert!(status.contains("principal = alice"));

        let listing = run(&ctx, Command::Ls { prefix: None }).await.unwrap();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("alpha.txt"));
        assert!(lines[1].ends_with("beta/"));
    }

    #[tokio::test]
    async fn login_with_auth_validates_first() {
        let fixture = Fixture::new();
        let ctx = fixture.context(&["--auth=token"]);
        let err = run(
            &ctx,
            Command::Login {
                pairs: vec!["user=alice".into()],
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(fixture.system.is_empty());

        let ctx = fixture.context(&["--auth=token"]);
        let printed = run(
            &ctx,
            Command::Login {
                pairs: vec!["user=alice".into(), "token=abc".into()],
            },
        )
        .await
        .unwrap();
        assert!(printed.starts_with("authenticated as alice"));

        let ctx = fixture.context(&["--auth=token"]);
        let status = run(&ctx, Command::Status).await.unwrap();
        assert!(status.contains("principal = alice"));
    }

    #[tokio::test]
    async fn malformed_pairs_are_usage_errors() {
        let fixture = Fixture::new();
        let ctx = fixture.context(&[]);
        let err = run(
            &ctx,
            Command::Login {
                pairs: vec!["token".into()],
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(!ctx.is_resolved(Var::StorageName));
    }

    #[tokio::test]
    async fn logout_removes_credentials() {
        let fixture = Fixture::new();
        fixture.system.set("objfs", "local", "token=abc").await.unwrap();

        let ctx = fixture.context(&[]);
        run(&ctx, Command::Logout).await.unwrap();
        assert!(fixture.system.is_empty());

        let ctx = fixture.context(&[]);
        assert_eq!(run(&ctx, Command::Logout).await.unwrap_err().exit_code(), 1);
    }

    #[tokio::test]
    async fn status_without_credentials_is_a_usage_error() {
        let fixture = Fixture::new();
        let ctx = fixture.context(&[]);
        let err = run(&ctx, Command::Status).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("unknown credentials"));
    }

    #[tokio::test]
    async fn config_prints_effective_values() {
        let fixture = Fixture::new();
        let ctx = fixture.context(&["-storage=onedrive", "-auth=onedrive"]);
        let printed = run(&ctx, Command::Config).await.unwrap();

        assert!(printed.contains("storage = onedrive\n"));
        assert!(printed.contains("auth = onedrive\n"));
        assert!(printed.contains("credentials = keyring:objfs/onedrive\n"));
        assert!(printed.contains("keyring = system\n"));
        assert!(printed.contains(&format!(
            "cache = {}\n",
            fixture.dir.path().join("onedrive").display()
        )));
        assert!(printed.contains("accept-tls-cert = false\n"));
    }

    #[tokio::test]
    async fn version_needs_no_configuration() {
        let fixture = Fixture::new();
        let ctx = fixture.context(&["--keyring=foo"]);
        let printed = run(&ctx, Command::Version).await.unwrap();
        assert!(printed.contains(env!("CARGO_PKG_VERSION")));
    }
}
