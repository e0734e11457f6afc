//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from reading or querying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file exists but could not be read.
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        /// The file.
        path: PathBuf,
        /// The I/O error.
        source: std::io::Error,
    },

    /// A config file is not valid TOML.
    #[error("failed to parse config file '{path}': {message}")]
    ParseError {
        /// The file.
        path: PathBuf,
        /// The parser's message.
        message: String,
    },

    /// The requested section or option is not present in any file.
    #[error("option '{option}' in section '{section}' is not configured")]
    Unconfigured {
        /// The section.
        section: String,
        /// The option, or `*` for a whole section.
        option: String,
    },

    /// An option is present but has the wrong shape.
    #[error("invalid config value for '{section}.{option}': {message}")]
    InvalidValue {
        /// The section.
        section: String,
        /// The option.
        option: String,
        /// What was wrong.
        message: String,
    },
}

impl ConfigError {
    /// Returns `true` for [`Unconfigured`](Self::Unconfigured).
    #[must_use]
    pub fn is_unconfigured(&self) -> bool {
        matches!(self, Self::Unconfigured { .. })
    }

    pub(crate) fn unconfigured(section: &str, option: &str) -> Self {
        Self::Unconfigured {
            section: section.to_owned(),
            option: option.to_owned(),
        }
    }

    pub(crate) fn invalid(section: &str, option: &str, message: impl ToString) -> Self {
        Self::InvalidValue {
            section: section.to_owned(),
            option: option.to_owned(),
            message: message.to_string(),
        }
    }
}
