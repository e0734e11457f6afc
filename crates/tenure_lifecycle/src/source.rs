//! Guarded at-most-once resource creation.
//!
//! A [`Source`] wraps a factory and memoizes the resource it produces. The
//! first caller runs the factory under a lock, so racing first callers in
//! different threads observe exactly one factory invocation.
//!
//! # Failure Handling
//!
//! Factory errors are classified by the source's non-retry set:
//!
//! | Error | Effect |
//! |-------|--------|
//! | In the non-retry set | Sticky: every later [`get()`](Source::get) replays the same failure |
//! | Anything else | Returned once; the next `get()` invokes the factory again |

use crate::error::{BoxError, CreationFailure, LifecycleError};
use core::fmt;
use parking_lot::Mutex;
use std::error::Error as StdError;
use std::sync::Arc;

type Factory<R> = Box<dyn Fn() -> Result<R, BoxError> + Send + Sync>;

type NoRetryPredicate = Box<dyn Fn(&(dyn StdError + Send + Sync + 'static)) -> bool + Send + Sync>;

/// Creation state of a [`Source`].
enum SourceState<R> {
    /// Not created yet; the factory is still needed.
    Uncreated(Factory<R>),
    /// Created and memoized. The factory has been dropped.
    Created(Arc<R>),
    /// Failed with an error in the non-retry set.
    Failed(CreationFailure),
}

/// A factory that creates its resource at most once.
///
/// # Example
///
/// ```
/// use tenure_lifecycle::source::Source;
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("bad credentials")]
/// struct BadCredentials;
///
/// let source = Source::new(|| Err::<String, _>(BadCredentials.into()))
///     .no_retry_on::<BadCredentials>();
///
/// let first = source.get().unwrap_err();
/// let second = source.get().unwrap_err();
/// assert!(first.creation_failure().unwrap().ptr_eq(second.creation_failure().unwrap()));
/// ```
pub struct Source<R> {
    state: Mutex<SourceState<R>>,
    no_retry: Vec<NoRetryPredicate>,
}

impl<R: Send + Sync + 'static> Source<R> {
    /// Creates a source around a factory.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<R, BoxError> + Send + Sync + 'static,
    {
        Self {
            state: Mutex::new(SourceState::Uncreated(Box::new(factory))),
            no_retry: Vec::new(),
        }
    }

    /// Creates a source that already holds its resource.
    #[must_use]
    pub fn with_instance(instance: R) -> Self {
        Self::from_arc(Arc::new(instance))
    }

    /// Creates a source that already holds a shared resource.
    #[must_use]
    pub fn from_arc(instance: Arc<R>) -> Self {
        Self {
            state: Mutex::new(SourceState::Created(instance)),
            no_retry: Vec::new(),
        }
    }

    /// Adds an error type to the non-retry set.
    #[must_use]
    pub fn no_retry_on<E: StdError + 'static>(self) -> Self {
        self.no_retry_if(|error| error.is::<E>())
    }

    /// Adds an arbitrary predicate to the non-retry set.
    #[must_use]
    pub fn no_retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&(dyn StdError + Send + Sync + 'static)) -> bool + Send + Sync + 'static,
    {
        self.no_retry.push(Box::new(predicate));
        self
    }

    /// Returns the resource, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Creation`] if the factory fails, or replays
    /// the stored failure if an earlier attempt failed with a non-retry error.
    pub fn get(&self) -> Result<Arc<R>, LifecycleError> {
        let mut state = self.state.lock();

        let outcome = match &*state {
            SourceState::Created(resource) => return Ok(Arc::clone(resource)),
            SourceState::Failed(failure) => return Err(LifecycleError::Creation(failure.clone())),
            SourceState::Uncreated(factory) => factory(),
        };

        match outcome {
            Ok(resource) => {
                let resource = Arc::new(resource);
                *state = SourceState::Created(Arc::clone(&resource));
                tracing::debug!(resource = core::any::type_name::<R>(), "source created");
                Ok(resource)
            }
            Err(error) => {
                let failure = CreationFailure::new(error);
                if self.is_no_retry(&failure) {
                    tracing::warn!(
                        resource = core::any::type_name::<R>(),
                        error = %failure,
                        "source creation failed permanently"
                    );
                    *state = SourceState::Failed(failure.clone());
                } else {
                    tracing::debug!(
                        resource = core::any::type_name::<R>(),
                        error = %failure,
                        "source creation failed; will retry"
                    );
                }
                Err(LifecycleError::Creation(failure))
            }
        }
    }

    /// Returns `true` once the resource has been created.
    #[must_use]
    pub fn is_created(&self) -> bool {
        matches!(&*self.state.lock(), SourceState::Created(_))
    }

    /// Returns the sticky failure, if creation failed permanently.
    #[must_use]
    pub fn failure(&self) -> Option<CreationFailure> {
        match &*self.state.lock() {
            SourceState::Failed(failure) => Some(failure.clone()),
            _ => None,
        }
    }

    fn is_no_retry(&self, failure: &CreationFailure) -> bool {
        self.no_retry
            .iter()
            .any(|predicate| predicate(failure.get_ref()))
    }
}

impl<R> fmt::Debug for Source<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.lock() {
            SourceState::Uncreated(_) => "uncreated",
            SourceState::Created(_) => "created",
            SourceState::Failed(_) => "failed",
        };
        f.debug_struct("Source")
            .field("state", &state)
            .field("no_retry", &self.no_retry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("transient")]
    struct Transient;

    #[derive(Debug, thiserror::Error)]
    #[error("fatal")]
    struct Fatal;

    #[test]
    fn creates_once_and_memoizes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let source = Source::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1, 2, 3])
        });

        assert!(!source.is_created());
        let first = source.get().unwrap();
        let second = source.get().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(source.is_created());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retryable_failure_is_not_memoized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let source = Source::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Transient.into())
            } else {
                Ok("connected")
            }
        })
        .no_retry_on::<Fatal>();

        assert!(source.get().is_err());
        assert!(source.failure().is_none());
        assert_eq!(*source.get().unwrap(), "connected");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn sticky_failure_replays_without_reinvoking() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let source = Source::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Fatal.into())
        })
        .no_retry_on::<Fatal>();

        let first = source.get().unwrap_err();
        let first = first.creation_failure().unwrap().clone();

        for _ in 0..5 {
            let again = source.get().unwrap_err();
            assert!(again.creation_failure().unwrap().ptr_eq(&first));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(source.failure().unwrap().ptr_eq(&first));
        assert!(first.downcast_ref::<Fatal>().is_some());
    }

    #[test]
    fn predicate_joins_non_retry_set() {
        let source = Source::new(|| Err::<(), _>("permission denied".into()))
            .no_retry_if(|error| error.to_string().contains("denied"));

        source.get().unwrap_err();
        assert!(source.failure().is_some());
    }

    #[test]
    fn with_instance_never_creates() {
        let source = Source::with_instance(7_u32);
        assert!(source.is_created());
        assert_eq!(*source.get().unwrap(), 7);
    }
}
