//! Stateless openers.

use super::Opener;
use crate::error::{BoxError, LifecycleError};
use core::fmt;
use std::sync::Arc;

/// Hands out the same instance on every open.
pub struct SingletonOpener<R> {
    instance: Arc<R>,
}

impl<R> SingletonOpener<R> {
    /// Creates an opener around an existing instance.
    #[must_use]
    pub fn new(instance: Arc<R>) -> Self {
        Self { instance }
    }
}

impl<R: Send + Sync + 'static> Opener for SingletonOpener<R> {
    type Resource = R;

    fn open(&self) -> Result<Arc<R>, LifecycleError> {
        Ok(Arc::clone(&self.instance))
    }

    fn commit(&self, _instance: &Arc<R>) -> Result<(), LifecycleError> {
        Ok(())
    }

    fn abort(&self, _instance: &Arc<R>) -> Result<(), LifecycleError> {
        Ok(())
    }
}

impl<R> fmt::Debug for SingletonOpener<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingletonOpener")
            .field("resource", &core::any::type_name::<R>())
            .finish()
    }
}

type OpenFn<R> = Box<dyn Fn() -> Result<R, BoxError> + Send + Sync>;

type FinalizeFn<R> = Box<dyn Fn(&R) -> Result<(), BoxError> + Send + Sync>;

/// An opener built from plain callables.
///
/// Every `open()` calls the open function; commit and abort call their
/// finalizers if present.
pub struct FunctionOpener<R> {
    open_fn: OpenFn<R>,
    commit_fn: Option<FinalizeFn<R>>,
    abort_fn: Option<FinalizeFn<R>>,
}

impl<R: Send + Sync + 'static> FunctionOpener<R> {
    /// Creates an opener from an open function.
    pub fn new<F>(open_fn: F) -> Self
    where
        F: Fn() -> Result<R, BoxError> + Send + Sync + 'static,
    {
        Self {
            open_fn: Box::new(open_fn),
            commit_fn: None,
            abort_fn: None,
        }
    }

    /// Sets the commit finalizer.
    #[must_use]
    pub fn on_commit<F>(mut self, commit_fn: F) -> Self
    where
        F: Fn(&R) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.commit_fn = Some(Box::new(commit_fn));
        self
    }

    /// Sets the abort finalizer.
    #[must_use]
    pub fn on_abort<F>(mut self, abort_fn: F) -> Self
    where
        F: Fn(&R) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.abort_fn = Some(Box::new(abort_fn));
        self
    }
}

impl<R: Send + Sync + 'static> Opener for FunctionOpener<R> {
    type Resource = R;

    fn open(&self) -> Result<Arc<R>, LifecycleError> {
        (self.open_fn)().map(Arc::new).map_err(LifecycleError::Open)
    }

    fn commit(&self, instance: &Arc<R>) -> Result<(), LifecycleError> {
        match &self.commit_fn {
            Some(commit_fn) => commit_fn(&**instance).map_err(LifecycleError::Commit),
            None => Ok(()),
        }
    }

    fn abort(&self, instance: &Arc<R>) -> Result<(), LifecycleError> {
        match &self.abort_fn {
            Some(abort_fn) => abort_fn(&**instance).map_err(LifecycleError::Abort),
            None => Ok(()),
        }
    }
}

impl<R> fmt::Debug for FunctionOpener<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionOpener")
            .field("commit_fn", &self.commit_fn.is_some())
            .field("abort_fn", &self.abort_fn.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn singleton_returns_same_instance() {
        let opener = SingletonOpener::new(Arc::new(String::from("conn")));
        let a = opener.open().unwrap();
        let b = opener.open().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        opener.commit(&a).unwrap();
        opener.abort(&b).unwrap();
        opener.close().unwrap();
    }

    #[test]
    fn function_opener_creates_per_open() {
        let opened = Arc::new(AtomicUsize::new(0));
        let committed = Arc::new(AtomicUsize::new(0));
        let (o, c) = (Arc::clone(&opened), Arc::clone(&committed));

        let opener = FunctionOpener::new(move || Ok(o.fetch_add(1, Ordering::SeqCst)))
            .on_commit(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

        let a = opener.open().unwrap();
        let b = opener.open().unwrap();
        assert_eq!((*a, *b), (0, 1));
        opener.commit(&a).unwrap();
        // No abort finalizer configured.
        opener.abort(&b).unwrap();
        assert_eq!(committed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn function_opener_wraps_open_errors() {
        let opener = FunctionOpener::<u8>::new(|| Err("refused".into()));
        assert!(matches!(opener.open(), Err(LifecycleError::Open(_))));
    }
}
