use std::{ffi::OsString, path::PathBuf};

use clap::Parser;

use crate::config::Section;

/// Global flags. Mergeable options are `None` unless given on the command line;
/// their defaults live in `MergedFlags`.
#[derive(Parser, Debug, Clone, Default, PartialEq, Eq)]
#[command(
    name = "objfs",
    about = "Object Storage File System",
    disable_help_subcommand = true,
    disable_version_flag = true,
    args_override_self = true
)]
pub struct GlobalArgs {
    /// Configuration file (default: objfs.conf in the platform config dir)
    #[arg(long, value_name = "path")]
    pub config: Option<PathBuf>,
    /// Supporting data and caches (default: objfs in the platform data dir)
    #[arg(long, value_name = "path")]
    pub datadir: Option<String>,
    /// Verbose
    #[arg(short = 'v')]
    pub verbose: bool,
    /// Accept any TLS certificate presented by the server (insecure)
    #[arg(
        long,
        value_name = "bool",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub accept_tls_cert: Option<bool>,
    /// Auth provider to use
    #[arg(long, value_name = "name")]
    pub auth: Option<String>,
    /// Keyring type to use: system, user, userplain (default: user)
    #[arg(long, value_name = "kind")]
    pub keyring: Option<String>,
    /// Auth credentials (keyring:service/user or /file/path)
    #[arg(long, value_name = "path")]
    pub credentials: Option<String>,
    /// Storage backend to access
    #[arg(long, value_name = "name")]
    pub storage: Option<String>,
    /// Storage URI to access
    #[arg(long, value_name = "uri")]
    pub storage_uri: Option<String>,
    /// Command and its arguments
    #[arg(trailing_var_arg = true, value_name = "command")]
    pub args: Vec<String>,
}

impl GlobalArgs {
    /// The mergeable options that were set explicitly, as a config section.
    pub fn explicit_options(&self) -> Section {
        Section {
            accept_tls_cert: self.accept_tls_cert,
            auth: self.auth.clone(),
            credentials: self.credentials.clone(),
            datadir: self.datadir.clone(),
            keyring: self.keyring.clone(),
            storage: self.storage.clone(),
            storage_uri: self.storage_uri.clone(),
        }
    }
}

/// Subcommands, parsed from the tokens following the global flags.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "objfs", disable_help_subcommand = true)]
pub enum Command {
    /// Print the effective configuration
    Config,
    /// Store credentials for the selected storage
    Login {
        /// Credential pairs
        #[arg(value_name = "key=value", required = true)]
        pairs: Vec<String>,
    },
    /// Remove stored credentials for the selected storage
    Logout,
    /// Show storage information
    Status,
    /// List objects
    Ls {
        /// Name prefix (use a trailing / to list a directory)
        prefix: Option<String>,
    },
    /// Print version and exit
    Version,
}

const VALUE_FLAGS: &[&str] = &[
    "config",
    "datadir",
    "auth",
    "keyring",
    "credentials",
    "storage",
    "storage-uri",
];
const SWITCH_FLAGS: &[&str] = &["accept-tls-cert", "help"];

/// Rewrite legacy single-dash long flags (`-storage=x`, `-storage x`) that precede
/// the command into clap's `--storage` form. The first element is the program name.
/// Arguments that are not UTF-8 are passed through for clap to judge.
pub fn normalize_legacy_flags<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut args = args.into_iter().map(Into::into);
    let mut out: Vec<OsString> = args.next().into_iter().collect();

    while let Some(arg) = args.next() {
        let Some(text) = arg.to_str().map(str::to_owned) else {
            out.push(arg);
            break;
        };
        if text == "--" || !text.starts_with('-') {
            out.push(arg);
            break;
        }

        let body = text.strip_prefix("--").unwrap_or(&text[1..]);
        let name = body.split_once('=').map_or(body, |(name, _)| name);
        let known = VALUE_FLAGS.contains(&name) || SWITCH_FLAGS.contains(&name);
        let takes_value = VALUE_FLAGS.contains(&name) && !body.contains('=');

        if !text.starts_with("--") && known {
            out.push(format!("--{body}").into());
        } else {
            out.push(arg);
        }
        if takes_value {
            if let Some(value) = args.next() {
                out.push(value);
            }
        }
    }

    out.extend(args);
    out
}
