//! Named references for Tenure (Layer 2).
//!
//! `tenure_registry` turns names and dotted paths into
//! [`SessionFactory`](tenure_lifecycle::factory::SessionFactory)s, lazily:
//!
//! - [`registry`] - The name table and its registration forms
//! - [`reference`] - Deferred, memoized references
//! - [`modules`] - Dotted-path modules
//! - [`binding`] - Per-owner references
//! - [`inject`] - Running functions with an injected instance
//! - [`definition`] - Type-erased registry entries
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tenure_lifecycle::prelude::*;
//! use tenure_registry::prelude::*;
//!
//! let registry = Arc::new(Registry::new());
//! registry
//!     .register_session("counter", FunctionOpener::new(|| Ok(0_u64)))
//!     .unwrap();
//!
//! let counter: Reference<u64> = registry.get("counter");
//! let value = counter
//!     .scope(|outer| {
//!         counter.scope(|inner| {
//!             assert!(Arc::ptr_eq(outer, inner));
//!             Ok::<_, tenure_registry::error::Error>(**inner)
//!         })
//!     })
//!     .unwrap();
//! assert_eq!(value, 0);
//! ```

/// Per-owner references.
pub mod binding;

/// Type-erased definitions.
pub mod definition;

/// Error types.
pub mod error;

/// Instance injection.
pub mod inject;

/// Dotted-path modules.
pub mod modules;

/// Lazy references.
pub mod reference;

/// The name table.
pub mod registry;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::binding::*;
    pub use crate::definition::*;
    pub use crate::error::*;
    pub use crate::inject::*;
    pub use crate::modules::*;
    pub use crate::reference::*;
    pub use crate::registry::*;
}
