//! The name table.
//!
//! A [`Registry`] stores [`Definition`]s under unique names and hands out
//! deferred [`Reference`]s to them. Names are registered once; a second
//! registration under the same name fails and leaves the first in place.
//!
//! # Registration Forms
//!
//! | Method | Stores |
//! |--------|--------|
//! | [`register()`](Registry::register) | Any [`Definition`] |
//! | [`register_factory()`](Registry::register_factory) | A factory building one opener per context |
//! | [`register_session()`](Registry::register_session) | One global opener, counted per context |
//! | [`register_singleton()`](Registry::register_singleton) | A fixed instance |
//! | [`register_reference()`](Registry::register_reference) | An alias to another reference |
//! | [`register_value()`](Registry::register_value) | A plain value (does not resolve) |

use crate::definition::Definition;
use crate::error::RegistryError;
use crate::modules::ModuleTable;
use crate::reference::{Lookup, Reference, Target};
use core::any::Any;
use core::fmt;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::{Arc, LazyLock};
use tenure_lifecycle::error::LifecycleError;
use tenure_lifecycle::factory::SessionFactory;
use tenure_lifecycle::opener::Opener;

static GLOBAL: LazyLock<Arc<Registry>> = LazyLock::new(|| Arc::new(Registry::new()));

/// Registry of named definitions.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<IndexMap<String, Definition>>,
    modules: Option<Arc<ModuleTable>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide default registry.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Sets the module table used by references this registry hands out.
    #[must_use]
    pub fn with_modules(mut self, modules: Arc<ModuleTable>) -> Self {
        self.modules = Some(modules);
        self
    }

    /// Registers a definition under a unique name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if the name is taken. The existing
    /// entry is left untouched.
    pub fn register(&self, name: impl Into<String>, definition: Definition) -> Result<(), RegistryError> {
        let name = name.into();
        let mut entries = self.entries.write();
        if entries.contains_key(&name) {
            tracing::warn!(%name, "rejected duplicate registration");
            return Err(RegistryError::Duplicate(name));
        }
        tracing::debug!(%name, kind = definition.type_name(), "registered definition");
        entries.insert(name, definition);
        Ok(())
    }

    /// Registers a factory whose opener is built once per context.
    ///
    /// Returns the registered factory.
    ///
    /// # Errors
    ///
    /// See [`register()`](Self::register).
    pub fn register_factory<R, O, F>(
        &self,
        name: impl Into<String>,
        build: F,
    ) -> Result<SessionFactory<R>, RegistryError>
    where
        R: Send + Sync + 'static,
        O: Opener<Resource = R> + 'static,
        F: Fn() -> Result<O, LifecycleError> + Send + Sync + 'static,
    {
        self.register_session_factory(name, SessionFactory::new(build))
    }

    /// Registers one global opener; every context wraps it in its own
    /// counting opener.
    ///
    /// # Errors
    ///
    /// See [`register()`](Self::register).
    pub fn register_session<O>(
        &self,
        name: impl Into<String>,
        opener: O,
    ) -> Result<SessionFactory<O::Resource>, RegistryError>
    where
        O: Opener + 'static,
    {
        self.register_session_factory(name, SessionFactory::shared(Arc::new(opener)))
    }

    /// Registers a fixed instance.
    ///
    /// # Errors
    ///
    /// See [`register()`](Self::register).
    pub fn register_singleton<R: Send + Sync + 'static>(
        &self,
        name: impl Into<String>,
        instance: Arc<R>,
    ) -> Result<SessionFactory<R>, RegistryError> {
        self.register_session_factory(name, SessionFactory::singleton(instance))
    }

    /// Registers an existing factory.
    ///
    /// # Errors
    ///
    /// See [`register()`](Self::register).
    pub fn register_session_factory<R: Send + Sync + 'static>(
        &self,
        name: impl Into<String>,
        factory: SessionFactory<R>,
    ) -> Result<SessionFactory<R>, RegistryError> {
        self.register(name, Definition::factory(factory.clone()))?;
        Ok(factory)
    }

    /// Registers an alias; resolving the name resolves `reference`.
    ///
    /// A reference handed out by this registry's [`get()`](Self::get) only
    /// keeps the registry weakly once stored, so the alias does not keep its
    /// own registry alive.
    ///
    /// # Errors
    ///
    /// See [`register()`](Self::register).
    pub fn register_reference<R: Send + Sync + 'static>(
        &self,
        name: impl Into<String>,
        reference: Reference<R>,
    ) -> Result<(), RegistryError> {
        self.register(name, Definition::reference(reference.weaken_lookup(self)))
    }

    /// Registers a plain value. Resolving it as a factory fails with
    /// [`ResolveError::NotAFactory`](crate::error::ResolveError::NotAFactory).
    ///
    /// # Errors
    ///
    /// See [`register()`](Self::register).
    pub fn register_value<T: Any + Send + Sync>(
        &self,
        name: impl Into<String>,
        value: T,
    ) -> Result<(), RegistryError> {
        self.register(name, Definition::value(value))
    }

    /// Returns a deferred reference to `name`.
    ///
    /// Nothing is looked up until the reference is resolved, so the name may
    /// be registered later.
    #[must_use]
    pub fn get<R: Send + Sync + 'static>(self: &Arc<Self>, name: impl Into<String>) -> Reference<R> {
        let reference = Reference::new(Target::Name(name.into()))
            .with_lookup(Arc::clone(self) as Arc<dyn Lookup>);
        match &self.modules {
            Some(modules) => reference.with_modules(Arc::clone(modules)),
            None => reference,
        }
    }

    /// Returns the definition registered under `name`.
    #[must_use]
    pub fn definition(&self, name: &str) -> Option<Definition> {
        self.entries.read().get(name).cloned()
    }

    /// Returns `true` if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Returns all names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Returns the number of registered names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Lookup for Registry {
    fn lookup(&self, name: &str) -> Option<Definition> {
        self.definition(name)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ResolveError};
    use tenure_lifecycle::opener::SingletonOpener;

    #[test]
    fn register_then_resolve_round_trips() {
        let registry = Arc::new(Registry::new());
        let factory = registry.register_singleton("config", Arc::new(7_u32)).unwrap();

        let resolved = registry.get::<u32>("config").resolve().unwrap();
        assert_eq!(resolved.id(), factory.id());
    }

    #[test]
    fn duplicate_leaves_original() {
        let registry = Arc::new(Registry::new());
        let original = registry.register_singleton("db", Arc::new(1_u32)).unwrap();

        let err = registry.register_singleton("db", Arc::new(2_u32)).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("db".into()));
        assert_eq!(registry.len(), 1);

        let resolved = registry.get::<u32>("db").resolve().unwrap();
        assert_eq!(resolved.id(), original.id());
        assert_eq!(resolved.scope(|v| Ok::<_, LifecycleError>(**v)).unwrap(), 1);
    }

    #[test]
    fn lookup_is_deferred() {
        let registry = Arc::new(Registry::new());
        let reference = registry.get::<u32>("late");
        assert!(matches!(reference.resolve(), Err(ResolveError::UnknownName(_))));

        registry.register_singleton("late", Arc::new(3_u32)).unwrap();
        assert_eq!(reference.scope(|v| Ok::<_, Error>(**v)).unwrap(), 3);
    }

    #[test]
    fn values_do_not_resolve() {
        let registry = Arc::new(Registry::new());
        registry.register_value("dsn", String::from("mem://")).unwrap();
        assert!(matches!(
            registry.get::<u32>("dsn").resolve(),
            Err(ResolveError::NotAFactory { .. })
        ));
        assert_eq!(
            registry.definition("dsn").unwrap().downcast_ref::<String>().unwrap(),
            "mem://"
        );
    }

    #[test]
    fn aliases_resolve_transitively() {
        let registry = Arc::new(Registry::new());
        let factory = registry
            .register_factory("primary", || Ok(SingletonOpener::new(Arc::new(5_u32))))
            .unwrap();
        registry
            .register_reference("default", registry.get::<u32>("primary"))
            .unwrap();

        assert_eq!(registry.names(), ["primary", "default"]);
        assert!(registry.contains("default"));
        let resolved = registry.get::<u32>("default").resolve().unwrap();
        assert_eq!(resolved.id(), factory.id());
    }

    #[test]
    fn alias_does_not_keep_its_registry_alive() {
        let registry = Arc::new(Registry::new());
        registry.register_singleton("primary", Arc::new(1_u32)).unwrap();
        registry
            .register_reference("default", registry.get::<u32>("primary"))
            .unwrap();
        let alias = registry.get::<u32>("default");

        let weak = Arc::downgrade(&registry);
        drop(alias);
        drop(registry);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn global_registry_is_shared() {
        let name = "registry::tests::global_registry_is_shared";
        Registry::global().register_singleton(name, Arc::new(())).unwrap();
        assert!(Registry::global().contains(name));
    }
}
