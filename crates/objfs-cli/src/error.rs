use std::{fmt, io};

use color_eyre::Report;
use thiserror::Error;

/// Outcome of a failed command. Usage errors mean the invocation was wrong and are
/// reported alongside usage text; fatal errors mean the operation itself failed.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Fatal(Report),
}

pub type CliResult<T> = Result<T, CliError>;

pub const EXIT_FATAL: u8 = 1;
pub const EXIT_USAGE: u8 = 2;

impl CliError {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Wrap any displayable failure as fatal, keeping its cause chain.
    pub fn fatal(err: impl fmt::Display) -> Self {
        Self::Fatal(color_eyre::eyre::eyre!("{err:#}"))
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => EXIT_USAGE,
            Self::Fatal(_) => EXIT_FATAL,
        }
    }
}

impl From<Report> for CliError {
    fn from(report: Report) -> Self {
        Self::Fatal(report)
    }
}

impl From<io::Error> for CliError {
    fn from(err: io::Error) -> Self {
        Self::Fatal(Report::new(err))
    }
}
