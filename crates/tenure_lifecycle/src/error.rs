//! Error types for resource lifecycles.

use crate::context::DefinitionId;
use crate::opener::Finalize;
use core::fmt;
use std::error::Error as StdError;
use std::sync::Arc;

/// Boxed error returned by user-supplied factories and finalizers.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// A frozen resource creation error.
///
/// Cloning is cheap and preserves identity: every clone of a sticky failure
/// points at the same underlying error, which [`ptr_eq`](Self::ptr_eq)
/// observes.
#[derive(Clone)]
pub struct CreationFailure(Arc<dyn StdError + Send + Sync>);

impl CreationFailure {
    /// Freezes a factory error.
    #[must_use]
    pub fn new(error: BoxError) -> Self {
        Self(Arc::from(error))
    }

    /// Returns `true` if both failures share the same underlying error.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Returns the underlying error.
    #[must_use]
    pub fn get_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.0
    }

    /// Attempts to downcast the underlying error to a concrete type.
    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Debug for CreationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CreationFailure").field(&self.0).finish()
    }
}

impl fmt::Display for CreationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl StdError for CreationFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

/// Out-of-sequence [`Session`](crate::session::Session) calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionStateError {
    /// `open()` was called on a session that is already open.
    #[error("session is already open")]
    AlreadyOpen,

    /// `commit()` or `abort()` was called before `open()`.
    #[error("cannot {action} a session that was never opened")]
    NotOpen {
        /// The attempted finalization.
        action: Finalize,
    },

    /// The session was already committed or aborted.
    #[error("session has already been finalized")]
    Finished,
}

/// Errors raised while acquiring or finalizing a resource.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// The resource factory failed.
    ///
    /// Failures in a source's non-retry set are replayed as the same
    /// [`CreationFailure`] on every later access.
    #[error("resource creation failed: {0}")]
    Creation(#[source] CreationFailure),

    /// Opening a resource instance failed.
    #[error("failed to open resource instance: {0}")]
    Open(#[source] BoxError),

    /// Committing a resource instance failed.
    #[error("failed to commit resource instance: {0}")]
    Commit(#[source] BoxError),

    /// Aborting a resource instance failed.
    #[error("failed to abort resource instance: {0}")]
    Abort(#[source] BoxError),

    /// A session method was called out of sequence.
    #[error(transparent)]
    State(#[from] SessionStateError),

    /// A context cache slot holds an opener for a different resource type.
    #[error("context cache slot {0} holds an opener of a different resource type")]
    OpenerTypeMismatch(DefinitionId),

    /// The open function re-entered the opener it is creating an instance for.
    #[error("opener re-entered while creating its instance")]
    ReentrantOpen,
}

impl LifecycleError {
    /// Creates an [`Open`](Self::Open) error.
    pub fn open(error: impl Into<BoxError>) -> Self {
        Self::Open(error.into())
    }

    /// Creates a [`Commit`](Self::Commit) error.
    pub fn commit(error: impl Into<BoxError>) -> Self {
        Self::Commit(error.into())
    }

    /// Creates an [`Abort`](Self::Abort) error.
    pub fn abort(error: impl Into<BoxError>) -> Self {
        Self::Abort(error.into())
    }

    /// Returns the creation failure, if this is a [`Creation`](Self::Creation) error.
    #[must_use]
    pub fn creation_failure(&self) -> Option<&CreationFailure> {
        match self {
            Self::Creation(failure) => Some(failure),
            _ => None,
        }
    }
}
