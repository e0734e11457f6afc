//! Instance injection.

use crate::error::Error;
use crate::reference::Reference;
use core::fmt;
use std::sync::Arc;

/// Runs functions with an instance from a reference.
///
/// [`call()`](Injector::call) acquires the instance in a new scope.
/// [`call_with()`](Injector::call_with) lets a caller that already holds an
/// instance pass it through, in which case no scope is opened and nothing is
/// committed or aborted.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tenure_lifecycle::factory::SessionFactory;
/// use tenure_registry::prelude::*;
///
/// let reference = Reference::from(SessionFactory::singleton(Arc::new(40_u32)));
/// let add_two = Injector::new(Arc::new(reference));
///
/// let value = add_two.call(|n| Ok::<_, Error>(**n + 2)).unwrap();
/// assert_eq!(value, 42);
///
/// let mine = Arc::new(1_u32);
/// let value = add_two.call_with(Some(&mine), |n| Ok::<_, Error>(**n + 2)).unwrap();
/// assert_eq!(value, 3);
/// ```
pub struct Injector<R: Send + Sync + 'static> {
    reference: Arc<Reference<R>>,
}

impl<R: Send + Sync + 'static> Injector<R> {
    /// Creates an injector over a reference.
    #[must_use]
    pub fn new(reference: Arc<Reference<R>>) -> Self {
        Self { reference }
    }

    /// Runs `f` with an instance acquired in a new scope.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error, or an [`Error`] converted into `E`.
    pub fn call<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Arc<R>) -> Result<T, E>,
        E: From<Error>,
    {
        self.reference.scope(f)
    }

    /// Runs `f` with `instance` if given, else like [`call()`](Self::call).
    ///
    /// # Errors
    ///
    /// See [`call()`](Self::call).
    pub fn call_with<T, E, F>(&self, instance: Option<&Arc<R>>, f: F) -> Result<T, E>
    where
        F: FnOnce(&Arc<R>) -> Result<T, E>,
        E: From<Error>,
    {
        match instance {
            Some(instance) => f(instance),
            None => self.call(f),
        }
    }

    /// Returns the underlying reference.
    #[must_use]
    pub fn reference(&self) -> &Arc<Reference<R>> {
        &self.reference
    }
}

impl<R: Send + Sync + 'static> Clone for Injector<R> {
    fn clone(&self) -> Self {
        Self {
            reference: Arc::clone(&self.reference),
        }
    }
}

impl<R: Send + Sync + 'static> fmt::Debug for Injector<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injector")
            .field("reference", &self.reference)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use tenure_lifecycle::context::ContextCache;
    use tenure_lifecycle::factory::SessionFactory;
    use tenure_lifecycle::opener::FunctionOpener;

    fn counted() -> (Injector<u32>, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opens);
        let factory = SessionFactory::new(move || {
            let counter = Arc::clone(&counter);
            Ok(FunctionOpener::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(10_u32)
            }))
        })
        .with_context_cache(Arc::new(ContextCache::new()));
        (Injector::new(Arc::new(Reference::from(factory))), opens)
    }

    #[test]
    fn call_opens_a_scope() {
        let (injector, opens) = counted();
        assert_eq!(injector.call(|n| Ok::<_, Error>(**n)).unwrap(), 10);
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn supplied_instance_skips_acquisition() {
        let (injector, opens) = counted();
        let supplied = Arc::new(5_u32);
        let value = injector
            .call_with(Some(&supplied), |n| {
                assert!(Arc::ptr_eq(n, &supplied));
                Ok::<_, Error>(**n)
            })
            .unwrap();
        assert_eq!(value, 5);
        assert_eq!(opens.load(Ordering::SeqCst), 0);

        injector.call_with(None, |_| Ok::<_, Error>(())).unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }
}
