//! Single options as factory inputs.

use crate::error::ConfigError;
use crate::reader::LazyConfig;
use core::fmt;
use core::str::FromStr;
use std::error::Error as StdError;
use std::sync::Arc;
use tenure_lifecycle::error::BoxError;
use tenure_lifecycle::source::Source;

/// One `[section] option` of a [`LazyConfig`].
///
/// Reading the option reads the configuration files if that has not happened
/// yet. A missing option is [`ConfigError::Unconfigured`].
#[derive(Clone)]
pub struct ConfigOption {
    config: Arc<LazyConfig>,
    section: String,
    option: String,
}

impl ConfigOption {
    /// Creates a handle to `[section] option`.
    pub fn new(config: Arc<LazyConfig>, section: impl Into<String>, option: impl Into<String>) -> Self {
        Self {
            config,
            section: section.into(),
            option: option.into(),
        }
    }

    /// Returns the section name.
    #[must_use]
    pub fn section(&self) -> &str {
        &self.section
    }

    /// Returns the option name.
    #[must_use]
    pub fn option(&self) -> &str {
        &self.option
    }

    /// Returns the option's value as a string.
    ///
    /// # Errors
    ///
    /// See [`LazyConfig::get_string`].
    pub fn get(&self) -> Result<String, ConfigError> {
        self.config.get_string(&self.section, &self.option)
    }

    /// Parses the option's value.
    ///
    /// # Errors
    ///
    /// See [`get()`](Self::get); a parse failure is
    /// [`ConfigError::InvalidValue`].
    pub fn parse<T>(&self) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get()?
            .parse()
            .map_err(|error| ConfigError::invalid(&self.section, &self.option, error))
    }

    /// Builds a [`Source`] whose factory reads this option and passes it to
    /// `build`.
    ///
    /// [`ConfigError::Unconfigured`] is in the source's non-retry set, so a
    /// missing option fails every later access the same way. Other errors,
    /// such as a temporarily unreadable file, are retried.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use tenure_config::{ConfigOption, LazyConfig};
    ///
    /// let config = Arc::new(LazyConfig::new(Vec::<std::path::PathBuf>::new()));
    /// let uri = ConfigOption::new(config, "db", "uri");
    /// let source = uri.source(|uri| Ok(uri.len()));
    ///
    /// let first = source.get().unwrap_err();
    /// let second = source.get().unwrap_err();
    /// assert!(first.creation_failure().unwrap().ptr_eq(second.creation_failure().unwrap()));
    /// ```
    pub fn source<R, F>(&self, build: F) -> Source<R>
    where
        R: Send + Sync + 'static,
        F: Fn(String) -> Result<R, BoxError> + Send + Sync + 'static,
    {
        let option = self.clone();
        Source::new(move || build(option.get()?)).no_retry_if(is_unconfigured)
    }
}

fn is_unconfigured(error: &(dyn StdError + Send + Sync + 'static)) -> bool {
    error
        .downcast_ref::<ConfigError>()
        .is_some_and(ConfigError::is_unconfigured)
}

impl fmt::Debug for ConfigOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigOption")
            .field("section", &self.section)
            .field("option", &self.option)
            .finish_non_exhaustive()
    }
}
