//! Lazy, merged TOML configuration.
//!
//! [`LazyConfig`] reads its files on first access, at most once. Files are
//! read in order; missing files are skipped, and for every `[section]` an
//! option from a later file replaces the same option from an earlier one.
//!
//! # Path Handling
//!
//! 1. If a leaf is set, it is joined to every path (`~/.config/app` + `db.toml`)
//! 2. A leading `~` is expanded to the home directory

use crate::error::ConfigError;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use toml::{Table, Value};

/// Result of the one-time read.
struct Loaded {
    table: Arc<Table>,
    read_paths: Vec<PathBuf>,
}

/// Configuration read lazily from a list of TOML files.
///
/// # Example
///
/// ```
/// use tenure_config::LazyConfig;
///
/// let dir = tempfile::tempdir().unwrap();
/// std::fs::write(dir.path().join("app.toml"), "[db]\nuri = \"mem://\"\n").unwrap();
///
/// let config = LazyConfig::new([dir.path().join("missing"), dir.path().to_path_buf()])
///     .with_leaf("app.toml");
/// assert_eq!(config.get_string("db", "uri").unwrap(), "mem://");
/// assert_eq!(config.read_paths().unwrap().len(), 1);
/// ```
pub struct LazyConfig {
    paths: Vec<PathBuf>,
    leaf: Option<PathBuf>,
    expand_home: bool,
    loaded: Mutex<Option<Loaded>>,
}

impl LazyConfig {
    /// Creates a reader over `paths`, later paths taking precedence.
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            leaf: None,
            expand_home: true,
            loaded: Mutex::new(None),
        }
    }

    /// Joins `leaf` to every path before reading.
    #[must_use]
    pub fn with_leaf(mut self, leaf: impl Into<PathBuf>) -> Self {
        self.leaf = Some(leaf.into());
        self
    }

    /// Disables `~` expansion.
    #[must_use]
    pub fn without_home_expansion(mut self) -> Self {
        self.expand_home = false;
        self
    }

    /// Returns the candidate file paths after leaf joining and `~` expansion.
    #[must_use]
    pub fn candidate_paths(&self) -> Vec<PathBuf> {
        self.paths
            .iter()
            .map(|path| {
                let path = match &self.leaf {
                    Some(leaf) => path.join(leaf),
                    None => path.clone(),
                };
                if self.expand_home {
                    expand_home(&path)
                } else {
                    path
                }
            })
            .collect()
    }

    /// Returns the merged configuration, reading the files on first call.
    ///
    /// A failed read is not memoized; the next call tries again.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ReadError`] or [`ConfigError::ParseError`].
    pub fn load(&self) -> Result<Arc<Table>, ConfigError> {
        let mut loaded = self.loaded.lock();
        if let Some(loaded) = &*loaded {
            return Ok(Arc::clone(&loaded.table));
        }

        let mut table = Table::new();
        let mut read_paths = Vec::new();
        for path in self.candidate_paths() {
            let Some(file) = read_file(&path)? else {
                tracing::trace!(path = %path.display(), "config file not found");
                continue;
            };
            merge(&mut table, file);
            read_paths.push(path);
        }
        tracing::debug!(files = read_paths.len(), "configuration loaded");

        let table = Arc::new(table);
        *loaded = Some(Loaded {
            table: Arc::clone(&table),
            read_paths,
        });
        Ok(table)
    }

    /// Returns the files that were read, or `None` before the first load.
    #[must_use]
    pub fn read_paths(&self) -> Option<Vec<PathBuf>> {
        self.loaded
            .lock()
            .as_ref()
            .map(|loaded| loaded.read_paths.clone())
    }

    /// Returns a raw option value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Unconfigured`] if the section or option is
    /// missing, or a load error.
    pub fn get(&self, section: &str, option: &str) -> Result<Value, ConfigError> {
        let table = self.load()?;
        table
            .get(section)
            .and_then(Value::as_table)
            .and_then(|options| options.get(option))
            .cloned()
            .ok_or_else(|| ConfigError::unconfigured(section, option))
    }

    /// Returns an option as a string. Non-string scalars are rendered.
    ///
    /// # Errors
    ///
    /// See [`get()`](Self::get); tables and arrays are
    /// [`ConfigError::InvalidValue`].
    pub fn get_string(&self, section: &str, option: &str) -> Result<String, ConfigError> {
        match self.get(section, option)? {
            Value::String(value) => Ok(value),
            Value::Table(_) | Value::Array(_) => {
                Err(ConfigError::invalid(section, option, "expected a scalar"))
            }
            scalar => Ok(scalar.to_string()),
        }
    }

    /// Deserializes one option.
    ///
    /// # Errors
    ///
    /// See [`get()`](Self::get); a type mismatch is
    /// [`ConfigError::InvalidValue`].
    pub fn option<T: DeserializeOwned>(&self, section: &str, option: &str) -> Result<T, ConfigError> {
        self.get(section, option)?
            .try_into()
            .map_err(|error| ConfigError::invalid(section, option, error))
    }

    /// Deserializes a whole section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Unconfigured`] (option `*`) if the section is
    /// missing, or [`ConfigError::InvalidValue`] if it does not match `T`.
    pub fn section<T: DeserializeOwned>(&self, section: &str) -> Result<T, ConfigError> {
        let table = self.load()?;
        let value = table
            .get(section)
            .filter(|value| value.is_table())
            .cloned()
            .ok_or_else(|| ConfigError::unconfigured(section, "*"))?;
        value
            .try_into()
            .map_err(|error| ConfigError::invalid(section, "*", error))
    }
}

impl core::fmt::Debug for LazyConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LazyConfig")
            .field("paths", &self.paths)
            .field("leaf", &self.leaf)
            .field("loaded", &self.loaded.lock().is_some())
            .finish()
    }
}

/// Reads and parses one file; `Ok(None)` if it does not exist.
fn read_file(path: &Path) -> Result<Option<Table>, ConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    toml::from_str(&contents)
        .map(Some)
        .map_err(|error| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: error.to_string(),
        })
}

/// Merges `file` into `into` one section at a time.
fn merge(into: &mut Table, file: Table) {
    for (key, value) in file {
        match value {
            Value::Table(options) => {
                if let Some(Value::Table(existing)) = into.get_mut(&key) {
                    existing.extend(options);
                } else {
                    into.insert(key, Value::Table(options));
                }
            }
            value => {
                into.insert(key, value);
            }
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
