//! Lazy references to session factories.
//!
//! A [`Reference`] points at a factory by one of three targets:
//!
//! | Target | Resolution |
//! |--------|------------|
//! | [`Target::Factory`] | Returned as is |
//! | [`Target::Path`] (`"app.db.primary"`) | Module `app.db` is loaded from the [`ModuleTable`], entry `primary` taken |
//! | [`Target::Name`] (`"primary"`) | Looked up in the reference's registry |
//!
//! Nothing is touched until the first [`resolve()`](Reference::resolve). The
//! resolved factory replaces the target, so later calls skip lookup entirely.

use crate::definition::Definition;
use crate::error::{Error, ResolveError};
use crate::modules::ModuleTable;
use core::fmt;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tenure_lifecycle::error::LifecycleError;
use tenure_lifecycle::factory::SessionFactory;
use tenure_lifecycle::session::Session;

/// Name-based lookup of definitions.
///
/// Implemented by [`Registry`](crate::registry::Registry); tests and embedders
/// can provide their own.
pub trait Lookup: Send + Sync {
    /// Returns the definition registered under `name`.
    fn lookup(&self, name: &str) -> Option<Definition>;
}

/// The registry a reference looks names up in.
///
/// A reference stored inside the registry it points at only holds it weakly.
#[derive(Clone)]
enum LookupHandle {
    Strong(Arc<dyn Lookup>),
    Weak(Weak<dyn Lookup>),
}

impl LookupHandle {
    fn get(&self) -> Option<Arc<dyn Lookup>> {
        match self {
            Self::Strong(lookup) => Some(Arc::clone(lookup)),
            Self::Weak(lookup) => lookup.upgrade(),
        }
    }
}

/// What a [`Reference`] points at.
pub enum Target<R: Send + Sync + 'static> {
    /// An already resolved factory.
    Factory(SessionFactory<R>),
    /// A plain name, looked up in the reference's registry.
    Name(String),
    /// A dotted `module.leaf` path, loaded from the module table.
    Path(String),
}

impl<R: Send + Sync + 'static> Target<R> {
    /// Classifies a string: a `.` makes it a path, anything else a name.
    #[must_use]
    pub fn parse(target: impl Into<String>) -> Self {
        let target = target.into();
        if target.contains('.') {
            Self::Path(target)
        } else {
            Self::Name(target)
        }
    }
}

impl<R: Send + Sync + 'static> Clone for Target<R> {
    fn clone(&self) -> Self {
        match self {
            Self::Factory(factory) => Self::Factory(factory.clone()),
            Self::Name(name) => Self::Name(name.clone()),
            Self::Path(path) => Self::Path(path.clone()),
        }
    }
}

impl<R: Send + Sync + 'static> fmt::Debug for Target<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Factory(factory) => f.debug_tuple("Factory").field(&factory.id()).finish(),
            Self::Name(name) => f.debug_tuple("Name").field(name).finish(),
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
        }
    }
}

impl<R: Send + Sync + 'static> From<SessionFactory<R>> for Target<R> {
    fn from(factory: SessionFactory<R>) -> Self {
        Self::Factory(factory)
    }
}

impl<R: Send + Sync + 'static> From<&str> for Target<R> {
    fn from(target: &str) -> Self {
        Self::parse(target)
    }
}

impl<R: Send + Sync + 'static> From<String> for Target<R> {
    fn from(target: String) -> Self {
        Self::parse(target)
    }
}

/// A lazily resolved pointer to a `SessionFactory<R>`.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tenure_registry::prelude::*;
///
/// let registry = Arc::new(Registry::new());
/// registry.register_singleton("greeting", Arc::new(String::from("hello"))).unwrap();
///
/// let reference: Reference<String> = registry.get("greeting");
/// assert!(!reference.is_resolved());
///
/// let len = reference.scope(|s| Ok::<_, Error>(s.len())).unwrap();
/// assert_eq!(len, 5);
/// assert!(reference.is_resolved());
/// ```
pub struct Reference<R: Send + Sync + 'static> {
    target: RwLock<Target<R>>,
    lookup: Option<LookupHandle>,
    modules: Option<Arc<ModuleTable>>,
}

impl<R: Send + Sync + 'static> Reference<R> {
    /// Creates an unresolved reference.
    ///
    /// Plain names need a registry, see [`with_lookup()`](Self::with_lookup).
    /// Dotted paths use [`ModuleTable::global()`] unless
    /// [`with_modules()`](Self::with_modules) is set.
    pub fn new(target: impl Into<Target<R>>) -> Self {
        Self {
            target: RwLock::new(target.into()),
            lookup: None,
            modules: None,
        }
    }

    /// Sets the registry plain names are looked up in.
    #[must_use]
    pub fn with_lookup(mut self, lookup: Arc<dyn Lookup>) -> Self {
        self.lookup = Some(LookupHandle::Strong(lookup));
        self
    }

    /// Holds `owner` weakly if it is this reference's registry.
    pub(crate) fn weaken_lookup(mut self, owner: &dyn Lookup) -> Self {
        if let Some(LookupHandle::Strong(lookup)) = &self.lookup
            && core::ptr::addr_eq(Arc::as_ptr(lookup), core::ptr::from_ref(owner))
        {
            self.lookup = Some(LookupHandle::Weak(Arc::downgrade(lookup)));
        }
        self
    }

    /// Sets the module table dotted paths are loaded from.
    #[must_use]
    pub fn with_modules(mut self, modules: Arc<ModuleTable>) -> Self {
        self.modules = Some(modules);
        self
    }

    /// Returns `true` once the target has been replaced by a factory.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(*self.target.read(), Target::Factory(_))
    }

    /// Returns a copy of the current target.
    #[must_use]
    pub fn target(&self) -> Target<R> {
        self.target.read().clone()
    }

    /// Points the reference at a new target, dropping any resolved factory.
    pub fn rebind(&self, target: impl Into<Target<R>>) {
        *self.target.write() = target.into();
    }

    /// Returns an independent reference with the same target, registry and
    /// module table.
    #[must_use]
    pub fn copy(&self) -> Self {
        Self {
            target: RwLock::new(self.target()),
            lookup: self.lookup.clone(),
            modules: self.modules.clone(),
        }
    }

    /// Resolves the target to a factory and memoizes it.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolveError`] if the name or path is unknown, cannot be
    /// loaded, or does not hold a factory for `R`. Failures are not memoized.
    pub fn resolve(&self) -> Result<SessionFactory<R>, ResolveError> {
        let target = match &*self.target.read() {
            Target::Factory(factory) => return Ok(factory.clone()),
            Target::Name(name) => Target::<R>::Name(name.clone()),
            Target::Path(path) => Target::Path(path.clone()),
        };

        let factory = match &target {
            Target::Name(name) => self.resolve_name(name)?,
            Target::Path(path) => self.resolve_path(path)?,
            Target::Factory(factory) => factory.clone(),
        };

        tracing::debug!(reference = ?target, definition = %factory.id(), "resolved reference");
        *self.target.write() = Target::Factory(factory.clone());
        Ok(factory)
    }

    /// Resolves and returns a new session from the factory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resolve`] or [`Error::Lifecycle`].
    pub fn call(&self) -> Result<Session<R>, Error> {
        Ok(self.resolve()?.session()?)
    }

    /// Resolves and runs `f` inside a new session.
    ///
    /// See [`Session::scope`] for commit and abort semantics.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error, or an [`Error`] converted into `E`.
    pub fn scope<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Arc<R>) -> Result<T, E>,
        E: From<Error>,
    {
        let session = self.call()?;
        session
            .scope(|instance| f(instance).map_err(ScopeError::Caller))
            .map_err(|error| match error {
                ScopeError::Caller(error) => error,
                ScopeError::Lifecycle(error) => E::from(Error::Lifecycle(error)),
            })
    }

    fn resolve_name(&self, name: &str) -> Result<SessionFactory<R>, ResolveError> {
        let lookup = self
            .lookup
            .as_ref()
            .and_then(LookupHandle::get)
            .ok_or_else(|| ResolveError::NoRegistry(name.to_owned()))?;
        let definition = lookup
            .lookup(name)
            .ok_or_else(|| ResolveError::UnknownName(name.to_owned()))?;
        definition.into_factory(name)
    }

    fn resolve_path(&self, path: &str) -> Result<SessionFactory<R>, ResolveError> {
        let definition = match &self.modules {
            Some(modules) => modules.resolve_path(path)?,
            None => ModuleTable::global().resolve_path(path)?,
        };
        definition.into_factory(path)
    }
}

/// Keeps the caller's error apart from session errors inside
/// [`Reference::scope`].
enum ScopeError<E> {
    Caller(E),
    Lifecycle(LifecycleError),
}

impl<E> From<LifecycleError> for ScopeError<E> {
    fn from(error: LifecycleError) -> Self {
        Self::Lifecycle(error)
    }
}

impl<R: Send + Sync + 'static> From<SessionFactory<R>> for Reference<R> {
    fn from(factory: SessionFactory<R>) -> Self {
        Self::new(factory)
    }
}

impl<R: Send + Sync + 'static> fmt::Debug for Reference<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("target", &*self.target.read())
            .field("lookup", &self.lookup.is_some())
            .finish_non_exhaustive()
    }
}
