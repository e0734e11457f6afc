//! Scoped resource lifecycles for Rust.
//!
//! Tenure hands out stateful resources (connections, transactions, file
//! handles) through named, lazily resolved references. Nested scopes in one
//! thread share a single instance; the outermost scope decides whether it is
//! committed or aborted.

pub use tenure_internal::*;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use tenure_internal::prelude::*;
}
