//! Resource lifecycle primitives for Tenure (Layer 1).
//!
//! `tenure_lifecycle` turns a plain factory into scoped, reentrant access to a
//! stateful resource:
//!
//! - [`source`] - At-most-once creation with sticky failures
//! - [`adapter`] - Open/commit/abort protocol over a source
//! - [`opener`] - The [`Opener`](opener::Opener) trait and its decorators
//! - [`context`] - Per-thread cache of built openers
//! - [`session`] - Single-use scoped acquisition
//! - [`factory`] - Session factories tying the layers together
//! - [`anomaly`] - Non-fatal lifecycle warnings
//!
//! # Architecture
//!
//! ```text
//! SessionFactory ──▶ ContextCache ──▶ Opener stack ──▶ Adapter ──▶ Source
//!       │                 (per thread)   (counting)     (open/     (create
//!       ▼                                               commit/    once)
//!    Session ── open / commit / abort ──────────────▶   abort)
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tenure_lifecycle::prelude::*;
//!
//! struct Connection { dsn: String }
//!
//! let source = Arc::new(Source::new(|| Ok(Connection { dsn: "mem://".into() })));
//! let factory = SessionFactory::new(move || {
//!     Ok(Adapter::sessionless(Arc::clone(&source)).counting())
//! });
//!
//! let dsn = factory
//!     .scope(|outer| {
//!         // A nested scope in the same thread reuses the same connection.
//!         factory.scope(|inner| {
//!             assert!(Arc::ptr_eq(outer, inner));
//!             Ok::<_, LifecycleError>(inner.dsn.clone())
//!         })
//!     })
//!     .unwrap();
//! assert_eq!(dsn, "mem://");
//! ```

/// Open/commit/abort adapters over a source.
pub mod adapter;

/// Lifecycle anomaly reporting.
pub mod anomaly;

/// Per-thread opener cache.
pub mod context;

/// Error types.
pub mod error;

/// Session factories.
pub mod factory;

/// The opener trait and its decorators.
pub mod opener;

/// Scoped single-use sessions.
pub mod session;

/// Guarded at-most-once resource creation.
pub mod source;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::adapter::*;
    pub use crate::anomaly::*;
    pub use crate::context::*;
    pub use crate::error::*;
    pub use crate::factory::*;
    pub use crate::opener::*;
    pub use crate::session::*;
    pub use crate::source::*;
}
