//! The opener protocol and its decorators.
//!
//! An [`Opener`] hands out resource instances and finalizes them again. Openers
//! compose: decorators wrap another opener and add reuse semantics on top.
//!
//! | Opener | Reuse | Finalizes at |
//! |--------|-------|--------------|
//! | [`SingletonOpener`] | Always the same instance | Never |
//! | [`FunctionOpener`] | None | Every commit/abort |
//! | [`CountingOpener`] | Nested opens share one instance | Last commit/abort |
//! | [`LazyCountingOpener`] | Instance kept warm between uses | Abort, or [`close()`](Opener::close) |
//!
//! # Instance Identity
//!
//! Instances are handed out as [`Arc`]s. Decorators compare the instance
//! passed to `commit()`/`abort()` against the one they opened with
//! [`Arc::ptr_eq`].

mod basic;
mod counting;

pub use basic::{FunctionOpener, SingletonOpener};
pub use counting::{CountingOpener, LazyCountingOpener};

use crate::error::LifecycleError;
use core::fmt;
use std::sync::Arc;

/// A type-erased opener for resources of type `R`.
pub type DynOpener<R> = dyn Opener<Resource = R>;

/// The two ways of ending an acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Finalize {
    /// Normal completion; changes are kept.
    Commit,
    /// Destructive completion; changes are discarded.
    Abort,
}

impl fmt::Display for Finalize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Commit => "commit",
            Self::Abort => "abort",
        })
    }
}

/// Produces resource instances and finalizes them.
///
/// Every successful [`open()`](Self::open) is expected to be matched by
/// exactly one [`commit()`](Self::commit) or [`abort()`](Self::abort) with
/// the same instance.
pub trait Opener: Send + Sync {
    /// The instance type handed out by [`open()`](Self::open).
    type Resource: Send + Sync + 'static;

    /// Acquires an instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance cannot be created.
    fn open(&self) -> Result<Arc<Self::Resource>, LifecycleError>;

    /// Finalizes an instance normally.
    ///
    /// # Errors
    ///
    /// Returns an error if the wrapped finalizer fails.
    fn commit(&self, instance: &Arc<Self::Resource>) -> Result<(), LifecycleError>;

    /// Finalizes an instance destructively.
    ///
    /// # Errors
    ///
    /// Returns an error if the wrapped finalizer fails.
    fn abort(&self, instance: &Arc<Self::Resource>) -> Result<(), LifecycleError>;

    /// Finalizes with the given verb.
    ///
    /// # Errors
    ///
    /// Returns an error if the wrapped finalizer fails.
    fn finalize(
        &self,
        instance: &Arc<Self::Resource>,
        action: Finalize,
    ) -> Result<(), LifecycleError> {
        match action {
            Finalize::Commit => self.commit(instance),
            Finalize::Abort => self.abort(instance),
        }
    }

    /// Administrative teardown outside the open/commit/abort protocol.
    ///
    /// Stateless openers have nothing to release.
    ///
    /// # Errors
    ///
    /// Returns an error if finalizing a retained instance fails.
    fn close(&self) -> Result<(), LifecycleError> {
        Ok(())
    }
}

impl<O: Opener + ?Sized> Opener for Arc<O> {
    type Resource = O::Resource;

    fn open(&self) -> Result<Arc<Self::Resource>, LifecycleError> {
        (**self).open()
    }

    fn commit(&self, instance: &Arc<Self::Resource>) -> Result<(), LifecycleError> {
        (**self).commit(instance)
    }

    fn abort(&self, instance: &Arc<Self::Resource>) -> Result<(), LifecycleError> {
        (**self).abort(instance)
    }

    fn close(&self) -> Result<(), LifecycleError> {
        (**self).close()
    }
}

/// Extension methods for composing opener decorators.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tenure_lifecycle::opener::{Opener, OpenerExt, SingletonOpener};
///
/// let opener = SingletonOpener::new(Arc::new(5)).counting();
/// let a = opener.open().unwrap();
/// let b = opener.open().unwrap();
/// assert_eq!(opener.count(), 2);
/// opener.commit(&b).unwrap();
/// opener.commit(&a).unwrap();
/// assert_eq!(opener.count(), 0);
/// ```
pub trait OpenerExt: Opener + Sized {
    /// Wraps this opener in a [`CountingOpener`].
    fn counting(self) -> CountingOpener<Self> {
        CountingOpener::new(self)
    }

    /// Wraps this opener in a [`LazyCountingOpener`].
    fn lazy_counting(self) -> LazyCountingOpener<Self> {
        LazyCountingOpener::new(self)
    }

    /// Moves this opener behind an [`Arc`] so it can be shared by several
    /// decorators.
    fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl<O: Opener> OpenerExt for O {}
