//! Dotted-path resolution.
//!
//! A [`ModuleTable`] maps module paths (`"app.db"`) to lazily built
//! [`Namespace`]s. A reference to `"app.db.primary"` loads module `app.db`
//! and takes its `primary` entry.
//!
//! Modules are registered at startup with an initializer. The initializer runs
//! the first time the module is loaded; a successful load is memoized, a failed
//! one is not and runs again on the next load.

use crate::definition::Definition;
use crate::error::{LoadError, RegistryError, ResolveError};
use core::fmt;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::{Arc, LazyLock};
use tenure_lifecycle::error::BoxError;

/// Named entries of one module.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    entries: IndexMap<String, Definition>,
}

impl Namespace {
    /// Creates an empty namespace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, builder-style. A later entry replaces an earlier one.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, definition: Definition) -> Self {
        self.insert(name, definition);
        self
    }

    /// Adds an entry. A later entry replaces an earlier one.
    pub fn insert(&mut self, name: impl Into<String>, definition: Definition) {
        self.entries.insert(name.into(), definition);
    }

    /// Returns the entry for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Definition> {
        self.entries.get(name)
    }

    /// Returns the entry names in insertion order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}

type InitFn = dyn Fn() -> Result<Namespace, BoxError> + Send + Sync;

enum Module {
    Pending(Arc<InitFn>),
    Loaded(Arc<Namespace>),
}

static GLOBAL: LazyLock<Arc<ModuleTable>> = LazyLock::new(|| Arc::new(ModuleTable::new()));

/// Table of loadable modules for dotted-path references.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tenure_lifecycle::factory::SessionFactory;
/// use tenure_registry::definition::Definition;
/// use tenure_registry::modules::{ModuleTable, Namespace};
///
/// let modules = ModuleTable::new();
/// modules
///     .register_module("app.db", || {
///         Ok(Namespace::new().with(
///             "primary",
///             Definition::factory(SessionFactory::singleton(Arc::new("primary"))),
///         ))
///     })
///     .unwrap();
///
/// let definition = modules.resolve_path("app.db.primary").unwrap();
/// assert!(definition.into_factory::<&str>("app.db.primary").is_ok());
/// ```
#[derive(Default)]
pub struct ModuleTable {
    modules: RwLock<IndexMap<String, Module>>,
}

impl ModuleTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide table used by references that were not given
    /// one explicitly.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Registers a module initializer under `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateModule`] if `path` is taken.
    pub fn register_module<F>(&self, path: impl Into<String>, init: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Result<Namespace, BoxError> + Send + Sync + 'static,
    {
        let path = path.into();
        let mut modules = self.modules.write();
        if modules.contains_key(&path) {
            return Err(RegistryError::DuplicateModule(path));
        }
        tracing::debug!(module = %path, "registered module");
        modules.insert(path, Module::Pending(Arc::new(init)));
        Ok(())
    }

    /// Returns `true` if `path` is registered.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.modules.read().contains_key(path)
    }

    /// Returns `true` if `path` is registered and has been loaded.
    #[must_use]
    pub fn is_loaded(&self, path: &str) -> bool {
        matches!(self.modules.read().get(path), Some(Module::Loaded(_)))
    }

    /// Loads a module, running its initializer on first use.
    ///
    /// The initializer runs without the table lock held.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::UnknownModule`] or [`LoadError::Init`].
    pub fn load(&self, path: &str) -> Result<Arc<Namespace>, LoadError> {
        let init = match self.modules.read().get(path) {
            Some(Module::Loaded(namespace)) => return Ok(Arc::clone(namespace)),
            Some(Module::Pending(init)) => Arc::clone(init),
            None => return Err(LoadError::UnknownModule(path.to_owned())),
        };

        let namespace = init().map_err(|source| LoadError::Init {
            module: path.to_owned(),
            source,
        })?;
        let namespace = Arc::new(namespace);

        let mut modules = self.modules.write();
        match modules.get_mut(path) {
            // A racing load won; keep its namespace.
            Some(Module::Loaded(existing)) => Ok(Arc::clone(existing)),
            Some(slot) => {
                *slot = Module::Loaded(Arc::clone(&namespace));
                tracing::debug!(module = path, "loaded module");
                Ok(namespace)
            }
            None => Err(LoadError::UnknownModule(path.to_owned())),
        }
    }

    /// Resolves `"module.path.leaf"` to the leaf's definition.
    ///
    /// The path is split on its last `.`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::InvalidPath`] for a path without a container or
    /// leaf, and [`ResolveError::Load`] if the module cannot be loaded or lacks
    /// the leaf.
    pub fn resolve_path(&self, path: &str) -> Result<Definition, ResolveError> {
        let (module, leaf) = split_path(path)?;
        let load_error = |source| ResolveError::Load {
            path: path.to_owned(),
            source,
        };

        let namespace = self.load(module).map_err(load_error)?;
        namespace.get(leaf).cloned().ok_or_else(|| {
            load_error(LoadError::MissingLeaf {
                module: module.to_owned(),
                leaf: leaf.to_owned(),
            })
        })
    }
}

fn split_path(path: &str) -> Result<(&str, &str), ResolveError> {
    match path.rsplit_once('.') {
        Some((module, leaf)) if !module.is_empty() && !leaf.is_empty() => Ok((module, leaf)),
        _ => Err(ResolveError::InvalidPath(path.to_owned())),
    }
}

impl fmt::Debug for ModuleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let modules = self.modules.read();
        f.debug_struct("ModuleTable")
            .field("modules", &modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    fn value_module(value: &'static str) -> impl Fn() -> Result<Namespace, BoxError> {
        move || Ok(Namespace::new().with("value", Definition::value(value)))
    }

    #[test]
    fn init_runs_once_after_success() {
        let table = ModuleTable::new();
        let inits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&inits);
        table
            .register_module("app.settings", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Namespace::new())
            })
            .unwrap();

        assert!(!table.is_loaded("app.settings"));
        let a = table.load("app.settings").unwrap();
        let b = table.load("app.settings").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert!(table.is_loaded("app.settings"));
    }

    #[test]
    fn failed_init_is_retried() {
        let table = ModuleTable::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        table
            .register_module("flaky", move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("not yet".into())
                } else {
                    Ok(Namespace::new())
                }
            })
            .unwrap();

        assert!(matches!(table.load("flaky"), Err(LoadError::Init { .. })));
        assert!(table.load("flaky").is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn duplicate_module_is_rejected() {
        let table = ModuleTable::new();
        table.register_module("a", value_module("first")).unwrap();
        let err = table.register_module("a", value_module("second")).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateModule("a".into()));

        let definition = table.resolve_path("a.value").unwrap();
        assert_eq!(*definition.downcast_ref::<&str>().unwrap(), "first");
    }

    #[test]
    fn path_errors() {
        let table = ModuleTable::new();
        table.register_module("a.b", value_module("x")).unwrap();

        assert!(matches!(
            table.resolve_path("a.b.missing"),
            Err(ResolveError::Load {
                source: LoadError::MissingLeaf { .. },
                ..
            })
        ));
        assert!(matches!(
            table.resolve_path("nope.value"),
            Err(ResolveError::Load {
                source: LoadError::UnknownModule(_),
                ..
            })
        ));
        for invalid in ["value", ".value", "a.b."] {
            assert!(matches!(
                table.resolve_path(invalid),
                Err(ResolveError::InvalidPath(_))
            ));
        }
    }

    #[test]
    fn splits_on_last_dot() {
        assert_eq!(split_path("a.b.c").unwrap(), ("a.b", "c"));
    }
}
