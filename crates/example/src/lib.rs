//! Example in-memory ledger built with Tenure.
//!
//! The ledger is the "engine": created once, from a URI taken from the
//! `LEDGER_URI` environment variable or from `[ledger] uri` in `ledger.toml`.
//! A [`Transaction`] is the per-scope instance: nested scopes in one thread
//! share the same transaction, the outermost scope commits (applies the
//! staged postings) or aborts (discards them).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Registry "ledger"                                       │
//! │                                                          │
//! │  Reference ──▶ SessionFactory ──▶ CountingOpener         │
//! │                     (per thread)        │                │
//! │                                         ▼                │
//! │                       Adapter: begin / apply / discard   │
//! │                                         │                │
//! │                                         ▼                │
//! │                  Source<Ledger> ◀── LEDGER_URI / config  │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod store;

pub use store::{Ledger, LedgerError, SCHEME, Transaction};

use std::path::PathBuf;
use std::sync::Arc;
use tenure_config::{ConfigOption, LazyConfig};
use tenure_lifecycle::prelude::*;
use tenure_registry::error::RegistryError;
use tenure_registry::registry::Registry;

/// Environment variable overriding the configured URI.
pub const URI_VAR: &str = "LEDGER_URI";

/// Registry name of the transaction factory.
pub const REGISTRY_NAME: &str = "ledger";

/// Directories searched for `ledger.toml`, lowest precedence first.
#[must_use]
pub fn config_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/etc/ledger"),
        PathBuf::from("~/.config/ledger"),
        PathBuf::from("."),
    ]
}

/// Returns the `[ledger] uri` option of `ledger.toml` in `dirs`.
#[must_use]
pub fn uri_option(dirs: impl IntoIterator<Item = PathBuf>) -> ConfigOption {
    let config = LazyConfig::new(dirs).with_leaf("ledger.toml");
    ConfigOption::new(Arc::new(config), "ledger", "uri")
}

/// Builds the guarded ledger source.
///
/// `env_uri` wins over the config option. A missing option and an
/// unsupported URI are both sticky failures.
#[must_use]
pub fn ledger_source(env_uri: Option<String>, option: &ConfigOption) -> Source<Ledger> {
    match env_uri {
        Some(uri) => Source::new(move || Ok(Ledger::connect(&uri)?)).no_retry_on::<LedgerError>(),
        None => option
            .source(|uri| Ok(Ledger::connect(&uri)?))
            .no_retry_on::<LedgerError>(),
    }
}

/// Builds the transaction factory over a ledger source.
///
/// Each thread gets its own counting opener, so nested scopes share one
/// transaction and different threads never do.
#[must_use]
pub fn transaction_factory(source: Arc<Source<Ledger>>) -> SessionFactory<Transaction> {
    SessionFactory::new(move || {
        Ok(Adapter::new(Arc::clone(&source), |ledger| {
            Ok(Arc::new(ledger.get()?.begin()))
        })
        .on_commit(|ledger: &Source<Ledger>, tx| Ok(ledger.get()?.apply(tx)?))
        .on_abort(|ledger: &Source<Ledger>, tx| {
            ledger.get()?.discard(tx);
            Ok(())
        })
        .counting())
    })
}

/// Registers the transaction factory under [`REGISTRY_NAME`].
///
/// # Errors
///
/// Returns [`RegistryError::Duplicate`] if the name is taken.
pub fn register(
    registry: &Registry,
    source: Arc<Source<Ledger>>,
) -> Result<SessionFactory<Transaction>, RegistryError> {
    registry.register_session_factory(REGISTRY_NAME, transaction_factory(source))
}
