//! Session factories.
//!
//! A [`SessionFactory`] is a session definition: it knows how to build the
//! opener stack for a resource and where to cache it. Calling
//! [`session()`](SessionFactory::session) looks up the calling thread's opener
//! in the [`ContextCache`] (building it on first use) and returns a fresh
//! [`Session`] over it.
//!
//! # Constructors
//!
//! | Constructor | Opener per context |
//! |-------------|--------------------|
//! | [`new()`](SessionFactory::new) | Whatever the builder returns |
//! | [`singleton()`](SessionFactory::singleton) | [`SingletonOpener`] over a fixed instance |
//! | [`from_source()`](SessionFactory::from_source) | Built over a guarded source's resource |
//! | [`shared()`](SessionFactory::shared) | [`CountingOpener`] over one global opener |
//!
//! # Context Policy
//!
//! By default openers are cached in [`ContextCache::global()`]. A factory can
//! use its own cache with [`with_context_cache()`](SessionFactory::with_context_cache),
//! or opt out with [`without_context_cache()`](SessionFactory::without_context_cache),
//! in which case every session builds a fresh opener and nested sessions do
//! not share instances.

use crate::anomaly::AnomalyHandler;
use crate::context::{ContextCache, DefinitionId};
use crate::error::LifecycleError;
use crate::opener::{CountingOpener, DynOpener, Opener, SingletonOpener};
use crate::session::Session;
use crate::source::Source;
use core::fmt;
use std::sync::Arc;

type BuildFn<R> = dyn Fn() -> Result<Arc<DynOpener<R>>, LifecycleError> + Send + Sync;

/// Where a factory keeps its per-context openers.
#[derive(Clone)]
enum ContextPolicy {
    Global,
    Cache(Arc<ContextCache>),
    Disabled,
}

/// A session definition for resources of type `R`.
///
/// Clones share the definition's [`DefinitionId`] and therefore its cached
/// openers.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tenure_lifecycle::prelude::*;
///
/// let factory = SessionFactory::singleton(Arc::new(String::from("config")));
///
/// let mut session = factory.session().unwrap();
/// assert_eq!(session.open().unwrap().as_str(), "config");
/// session.commit().unwrap();
/// ```
pub struct SessionFactory<R: Send + Sync + 'static> {
    id: DefinitionId,
    build: Arc<BuildFn<R>>,
    policy: ContextPolicy,
    anomalies: AnomalyHandler,
}

impl<R: Send + Sync + 'static> SessionFactory<R> {
    /// Creates a factory from an opener builder.
    ///
    /// The builder runs once per context (thread), the first time a session
    /// is requested there.
    pub fn new<O, F>(build: F) -> Self
    where
        O: Opener<Resource = R> + 'static,
        F: Fn() -> Result<O, LifecycleError> + Send + Sync + 'static,
    {
        Self {
            id: DefinitionId::next(),
            build: Arc::new(move || Ok(Arc::new(build()?) as Arc<DynOpener<R>>)),
            policy: ContextPolicy::Global,
            anomalies: AnomalyHandler::default(),
        }
    }

    /// Creates a factory whose sessions all yield the same instance.
    #[must_use]
    pub fn singleton(instance: Arc<R>) -> Self {
        Self::new(move || Ok(SingletonOpener::new(Arc::clone(&instance))))
    }

    /// Creates a factory that builds its opener over a source's resource.
    ///
    /// The source is created at most once for all contexts; `make_opener`
    /// runs per context with the shared resource.
    pub fn from_source<S, O, F>(source: Arc<Source<S>>, make_opener: F) -> Self
    where
        S: Send + Sync + 'static,
        O: Opener<Resource = R> + 'static,
        F: Fn(Arc<S>) -> O + Send + Sync + 'static,
    {
        Self::new(move || Ok(make_opener(source.get()?)))
    }

    /// Creates a factory that wraps one global opener in a per-context
    /// [`CountingOpener`].
    pub fn shared<O>(opener: Arc<O>) -> Self
    where
        O: Opener<Resource = R> + 'static,
    {
        Self::new(move || Ok(CountingOpener::new(Arc::clone(&opener))))
    }

    /// Caches openers in `cache` instead of the global cache.
    #[must_use]
    pub fn with_context_cache(mut self, cache: Arc<ContextCache>) -> Self {
        self.policy = ContextPolicy::Cache(cache);
        self
    }

    /// Builds a fresh opener for every session.
    #[must_use]
    pub fn without_context_cache(mut self) -> Self {
        self.policy = ContextPolicy::Disabled;
        self
    }

    /// Sets the anomaly handler passed to sessions.
    #[must_use]
    pub fn with_anomaly_handler(mut self, anomalies: AnomalyHandler) -> Self {
        self.anomalies = anomalies;
        self
    }

    /// Returns the definition's identity.
    #[must_use]
    pub fn id(&self) -> DefinitionId {
        self.id
    }

    /// Returns the calling context's opener, building it if needed.
    ///
    /// # Errors
    ///
    /// Returns the builder's error, e.g. a failed source creation.
    pub fn opener(&self) -> Result<Arc<DynOpener<R>>, LifecycleError> {
        match &self.policy {
            ContextPolicy::Global => ContextCache::global().get_or_create(self.id, || (self.build)()),
            ContextPolicy::Cache(cache) => cache.get_or_create(self.id, || (self.build)()),
            ContextPolicy::Disabled => (self.build)(),
        }
    }

    /// Returns a new session over the calling context's opener.
    ///
    /// # Errors
    ///
    /// See [`opener()`](Self::opener).
    pub fn session(&self) -> Result<Session<R>, LifecycleError> {
        Ok(Session::new(self.opener()?).with_anomaly_handler(self.anomalies.clone()))
    }

    /// Runs `f` inside a new session; see [`Session::scope`].
    ///
    /// # Errors
    ///
    /// Returns `f`'s error or a [`LifecycleError`].
    pub fn scope<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Arc<R>) -> Result<T, E>,
        E: From<LifecycleError>,
    {
        self.session()?.scope(f)
    }
}

impl<R: Send + Sync + 'static> Clone for SessionFactory<R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            build: Arc::clone(&self.build),
            policy: self.policy.clone(),
            anomalies: self.anomalies.clone(),
        }
    }
}

impl<R: Send + Sync + 'static> fmt::Debug for SessionFactory<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let policy = match self.policy {
            ContextPolicy::Global => "global",
            ContextPolicy::Cache(_) => "cache",
            ContextPolicy::Disabled => "disabled",
        };
        f.debug_struct("SessionFactory")
            .field("id", &self.id)
            .field("resource", &core::any::type_name::<R>())
            .field("context", &policy)
            .finish_non_exhaustive()
    }
}
