//! Error types for reference resolution and registration.

use tenure_lifecycle::error::{BoxError, LifecycleError};
use thiserror::Error;

/// A dotted-path container could not be loaded, or lacks the requested leaf.
#[derive(Debug, Error)]
pub enum LoadError {
    /// No module is registered under this path.
    #[error("no module named '{0}'")]
    UnknownModule(String),

    /// The module's initializer failed.
    #[error("module '{module}' failed to initialize: {source}")]
    Init {
        /// The module path.
        module: String,
        /// The initializer's error.
        #[source]
        source: BoxError,
    },

    /// The module loaded but has no entry with this name.
    #[error("module '{module}' has no entry '{leaf}'")]
    MissingLeaf {
        /// The module path.
        module: String,
        /// The requested entry.
        leaf: String,
    },
}

/// A reference could not become a session factory.
///
/// Resolution errors are always surfaced to the caller and never retried
/// automatically.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A plain name was not found in the associated registry.
    #[error("'{0}' is not registered")]
    UnknownName(String),

    /// Loading a dotted path failed.
    #[error("failed to load '{path}': {source}")]
    Load {
        /// The full dotted path.
        path: String,
        /// The underlying load failure.
        #[source]
        source: LoadError,
    },

    /// The resolved value is not a session factory for the requested
    /// resource type.
    #[error("'{target}' resolved to `{found}`, which is not a session factory for this resource")]
    NotAFactory {
        /// The name or path that was resolved.
        target: String,
        /// Type name of the value found.
        found: &'static str,
    },

    /// A plain name was given but the reference has no registry to look it up in.
    #[error("cannot look up '{0}': reference has no registry")]
    NoRegistry(String),

    /// A dotted path with an empty container or leaf.
    #[error("invalid path '{0}'")]
    InvalidPath(String),
}

/// Errors raised while populating a registry or module table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The name is already taken; the existing entry was kept.
    #[error("'{0}' is already registered")]
    Duplicate(String),

    /// A module with this path is already registered.
    #[error("module '{0}' is already registered")]
    DuplicateModule(String),
}

/// Any error raised while using a reference.
#[derive(Debug, Error)]
pub enum Error {
    /// The reference could not be resolved.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The resolved factory failed to acquire or finalize.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}
