//! Configuration inputs for Tenure resource factories.
//!
//! Resource factories usually need a connection string or a file path from
//! configuration. `tenure_config` provides:
//!
//! - [`LazyConfig`] - TOML files read on first access, later files overriding
//!   earlier ones
//! - [`ConfigOption`] - One option, usable as the input of a
//!   [`Source`](tenure_lifecycle::source::Source)
//! - [`ConfigError`] - Read, parse and lookup failures

mod error;
mod option;
mod reader;

pub use error::ConfigError;
pub use option::ConfigOption;
pub use reader::LazyConfig;
