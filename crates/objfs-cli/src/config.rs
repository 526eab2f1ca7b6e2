//! Layered configuration.
//!
//! The configuration file is TOML. Top-level keys form the unnamed section of
//! global defaults; each table is a section named after a storage backend:
//!
//! ```toml
//! storage = "local"
//! keyring = "userplain"
//!
//! [local]
//! storage-uri = "file:///srv/objects"
//! ```
//!
//! Precedence, lowest first: declared defaults, the unnamed section, the section
//! of the selected backend, explicit command-line flags. The backend itself is
//! selected from the command line or, failing that, the unnamed section.

use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use dirs::{config_dir, data_dir};
use serde::Deserialize;
use tracing::debug;

use crate::{cli::GlobalArgs, registry::DEFAULT_STORAGE_NAME};

pub const CONFIG_FILE_NAME: &str = "objfs.conf";

/// Mergeable options as they may appear in one configuration section.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct Section {
    pub accept_tls_cert: Option<bool>,
    pub auth: Option<String>,
    pub credentials: Option<String>,
    pub datadir: Option<String>,
    pub keyring: Option<String>,
    pub storage: Option<String>,
    pub storage_uri: Option<String>,
}

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub global: Section,
    pub sections: BTreeMap<String, Section>,
}

impl ConfigFile {
    pub fn parse(text: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(text).wrap_err(
            "configuration is TOML; string values must be quoted, as in storage = \"local\"",
        )?;
        let mut global = toml::Table::new();
        let mut sections = BTreeMap::new();

        for (key, value) in table {
            match value {
                toml::Value::Table(section) => {
                    let parsed = toml::Value::Table(section)
                        .try_into::<Section>()
                        .wrap_err_with(|| format!("section [{key}]"))?;
                    sections.insert(key, parsed);
                }
                other => {
                    global.insert(key, other);
                }
            }
        }

        Ok(Self {
            global: toml::Value::Table(global).try_into()?,
            sections,
        })
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }
}

/// Result of the merge: one typed value per mergeable option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedFlags {
    pub accept_tls_cert: bool,
    pub auth: String,
    pub credentials: String,
    pub datadir: String,
    pub keyring: String,
    pub storage: String,
    pub storage_uri: String,
}

impl Default for MergedFlags {
    fn default() -> Self {
        Self {
            accept_tls_cert: false,
            auth: String::new(),
            credentials: String::new(),
            datadir: String::new(),
            keyring: "user".to_string(),
            storage: DEFAULT_STORAGE_NAME.to_string(),
            storage_uri: String::new(),
        }
    }
}

impl MergedFlags {
    /// Overwrite every option the section sets.
    fn overlay(&mut self, section: &Section) {
        fn set(field: &mut String, value: &Option<String>) {
            if let Some(value) = value {
                field.clone_from(value);
            }
        }

        if let Some(accept) = section.accept_tls_cert {
            self.accept_tls_cert = accept;
        }
        set(&mut self.auth, &section.auth);
        set(&mut self.credentials, &section.credentials);
        set(&mut self.datadir, &section.datadir);
        set(&mut self.keyring, &section.keyring);
        set(&mut self.storage, &section.storage);
        set(&mut self.storage_uri, &section.storage_uri);
    }

    /// Like `overlay`, but the backend name is left untouched.
    fn overlay_except_storage(&mut self, section: &Section) {
        self.overlay(&Section {
            storage: None,
            ..section.clone()
        });
    }
}

/// Merge declared defaults, the configuration file and explicit flags.
pub fn merge(args: &GlobalArgs, file: Option<&ConfigFile>) -> MergedFlags {
    let explicit = args.explicit_options();
    let mut flags = MergedFlags::default();

    if let Some(file) = file {
        flags.overlay(&file.global);
    }

    if let Some(storage) = &explicit.storage {
        flags.storage.clone_from(storage);
    }

    if let Some(section) = file.and_then(|file| file.section(&flags.storage)) {
        flags.overlay_except_storage(section);
    }

    flags.overlay_except_storage(&explicit);
    flags
}

/// Read the configuration file. A missing file is an empty configuration.
pub fn read_config(path: &Path) -> Result<Option<ConfigFile>> {
    match fs::read_to_string(path) {
        Ok(text) => ConfigFile::parse(&text)
            .map(Some)
            .wrap_err_with(|| format!("parsing {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no configuration file");
            Ok(None)
        }
        Err(err) => Err(err).wrap_err_with(|| format!("reading {}", path.display())),
    }
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| eyre!("no config dir available"))?;
    Ok(base.join(CONFIG_FILE_NAME))
}

/// Resolve the default data directory.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| eyre!("no data dir available"))?;
    Ok(base.join("objfs"))
}

/// Configuration after merging, with paths resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedConfig {
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
    pub flags: MergedFlags,
}

pub fn load(args: &GlobalArgs) -> Result<LoadedConfig> {
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => default_path()?,
    };
    let file = read_config(&config_path)?;
    let flags = merge(args, file.as_ref());

    let data_dir = if flags.datadir.is_empty() {
        default_data_dir()?
    } else {
        PathBuf::from(&flags.datadir)
    };

    debug!(
        config = %config_path.display(),
        data_dir = %data_dir.display(),
        storage = %flags.storage,
        keyring = %flags.keyring,
        "configuration loaded"
    );
    Ok(LoadedConfig {
        config_path,
        data_dir,
        flags,
    })
}
