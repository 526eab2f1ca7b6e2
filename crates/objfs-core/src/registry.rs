use thiserror::Error;

/// Lookup failures shared by the auth and storage registries.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown {kind}: {name}")]
    Unknown { kind: &'static str, name: String },
}
