//! Open/commit/abort adapters.
//!
//! An [`Adapter`] normalizes a raw [`Source`] into the [`Opener`] protocol.
//! Opening may trigger the source's first creation. Commit and abort are
//! no-ops unless finalizers are attached, which supports "sessionless"
//! resources that are used directly without a transaction-like instance.

use crate::error::{BoxError, LifecycleError};
use crate::opener::Opener;
use crate::source::Source;
use core::fmt;
use std::sync::Arc;

type OpenFn<S, I> = Box<dyn Fn(&Source<S>) -> Result<Arc<I>, LifecycleError> + Send + Sync>;

type FinalizeFn<S, I> = Box<dyn Fn(&Source<S>, &I) -> Result<(), BoxError> + Send + Sync>;

/// Wraps a [`Source`] into the open/commit/abort protocol.
///
/// `S` is the source's resource (e.g. an engine or connection) and `I` the
/// instance handed out by `open()` (e.g. a transaction).
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use tenure_lifecycle::adapter::Adapter;
/// use tenure_lifecycle::opener::Opener;
/// use tenure_lifecycle::source::Source;
///
/// struct Engine { commits: AtomicUsize }
/// struct Transaction;
///
/// let source = Arc::new(Source::new(|| Ok(Engine { commits: AtomicUsize::new(0) })));
/// let adapter = Adapter::new(Arc::clone(&source), |_| Ok(Arc::new(Transaction)))
///     .on_commit(|source, _tx| {
///         source.get()?.commits.fetch_add(1, Ordering::SeqCst);
///         Ok(())
///     });
///
/// let tx = adapter.open().unwrap();
/// adapter.commit(&tx).unwrap();
/// assert_eq!(source.get().unwrap().commits.load(Ordering::SeqCst), 1);
/// ```
pub struct Adapter<S, I = S> {
    source: Arc<Source<S>>,
    open_fn: OpenFn<S, I>,
    commit_fn: Option<FinalizeFn<S, I>>,
    abort_fn: Option<FinalizeFn<S, I>>,
}

impl<S, I> Adapter<S, I>
where
    S: Send + Sync + 'static,
    I: Send + Sync + 'static,
{
    /// Creates an adapter with an open function and no finalizers.
    pub fn new<F>(source: Arc<Source<S>>, open_fn: F) -> Self
    where
        F: Fn(&Source<S>) -> Result<Arc<I>, LifecycleError> + Send + Sync + 'static,
    {
        Self {
            source,
            open_fn: Box::new(open_fn),
            commit_fn: None,
            abort_fn: None,
        }
    }

    /// Sets the commit finalizer.
    #[must_use]
    pub fn on_commit<F>(mut self, commit_fn: F) -> Self
    where
        F: Fn(&Source<S>, &I) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.commit_fn = Some(Box::new(commit_fn));
        self
    }

    /// Sets the abort finalizer.
    #[must_use]
    pub fn on_abort<F>(mut self, abort_fn: F) -> Self
    where
        F: Fn(&Source<S>, &I) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.abort_fn = Some(Box::new(abort_fn));
        self
    }

    /// Returns the wrapped source.
    #[must_use]
    pub fn source(&self) -> &Arc<Source<S>> {
        &self.source
    }
}

impl<S: Send + Sync + 'static> Adapter<S, S> {
    /// Creates an adapter whose instances are the source's resource itself.
    #[must_use]
    pub fn sessionless(source: Arc<Source<S>>) -> Self {
        Self::new(source, Source::<S>::get)
    }
}

impl<S, I> Opener for Adapter<S, I>
where
    S: Send + Sync + 'static,
    I: Send + Sync + 'static,
{
    type Resource = I;

    fn open(&self) -> Result<Arc<I>, LifecycleError> {
        (self.open_fn)(&self.source)
    }

    fn commit(&self, instance: &Arc<I>) -> Result<(), LifecycleError> {
        match &self.commit_fn {
            Some(commit_fn) => commit_fn(&self.source, &**instance).map_err(LifecycleError::Commit),
            None => Ok(()),
        }
    }

    fn abort(&self, instance: &Arc<I>) -> Result<(), LifecycleError> {
        match &self.abort_fn {
            Some(abort_fn) => abort_fn(&self.source, &**instance).map_err(LifecycleError::Abort),
            None => Ok(()),
        }
    }
}

impl<S, I> fmt::Debug for Adapter<S, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("source", &self.source)
            .field("commit_fn", &self.commit_fn.is_some())
            .field("abort_fn", &self.abort_fn.is_some())
            .finish()
    }
}
