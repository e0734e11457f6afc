//! # Tenure Internal Library
//!
//! Re-exports the core Tenure crates for convenience.

/// Layer 1: Sources, openers, sessions and factories.
pub use tenure_lifecycle;

/// Layer 2: Named registry, lazy references and injection.
pub use tenure_registry;

/// Configuration inputs for resource factories.
#[cfg(feature = "config")]
pub use tenure_config;

/// Tracing subscriber setup.
#[cfg(feature = "tracing")]
pub use tenure_tracing;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use tenure_lifecycle::prelude::*;
    pub use tenure_registry::prelude::*;

    #[cfg(feature = "config")]
    pub use tenure_config::{ConfigError, ConfigOption, LazyConfig};

    #[cfg(feature = "tracing")]
    pub use tenure_tracing::{TracingFormat, TracingSetup};
}
