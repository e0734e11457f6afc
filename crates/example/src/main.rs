//! Example ledger CLI.
//!
//! Runs a few transactions against an in-memory ledger and prints the
//! resulting balances.
//!
//! # Usage
//!
//! ```bash
//! LEDGER_URI=mem://books ledger
//! ```
//!
//! Without `LEDGER_URI`, the URI is read from `[ledger] uri` in
//! `ledger.toml` (see [`example::config_dirs`]). `LEDGER_LOG` selects the
//! output format (`pretty`, `compact` or `json`).

use example::{Ledger, REGISTRY_NAME, Transaction, URI_VAR};
use std::sync::Arc;
use std::thread;
use tenure_lifecycle::prelude::*;
use tenure_registry::prelude::*;
use tenure_tracing::{TracingFormat, TracingSetup};

#[expect(clippy::print_stderr, reason = "CLI errors")]
fn main() {
    let _ = dotenvy::dotenv();

    let format = std::env::var("LEDGER_LOG")
        .ok()
        .and_then(|format| format.parse().ok())
        .unwrap_or(TracingFormat::Compact);
    TracingSetup::new()
        .with_format(format)
        .with_env_filter("info,tenure_lifecycle=debug")
        .init();

    let option = example::uri_option(example::config_dirs());
    let source = Arc::new(example::ledger_source(std::env::var(URI_VAR).ok(), &option));

    let registry = Arc::new(Registry::new());
    if let Err(e) = example::register(&registry, Arc::clone(&source)) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    let ledger: Reference<Transaction> = registry.get(REGISTRY_NAME);

    if let Err(e) = run(&ledger) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    match source.get() {
        Ok(books) => report(&books),
        Err(e) => eprintln!("Error: {e}"),
    }
}

fn run(ledger: &Reference<Transaction>) -> Result<(), Error> {
    // Nested scopes share the outer transaction; only the outer one commits.
    ledger.scope(|tx| {
        tx.post("alice", 100);
        tx.post("bob", 20);
        ledger.scope(|nested| {
            nested.transfer("alice", "bob", 25);
            Ok::<_, Error>(())
        })
    })?;

    // Every thread opens its own transaction.
    let ledger = Arc::new(ledger.copy());
    let handles: Vec<_> = ["carol", "dave"]
        .into_iter()
        .map(|account| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                let _teardown = ContextCache::global().guard();
                ledger.scope(|tx| {
                    tracing::info!(transaction = tx.id(), account, "deposit");
                    tx.post(account, 10);
                    Ok::<_, Error>(())
                })
            })
        })
        .collect();
    for handle in handles {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => tracing::error!("deposit thread panicked"),
        }
    }

    // A transaction left open at teardown is discarded.
    let opener = ledger.resolve()?.opener()?;
    let abandoned = opener.open()?;
    abandoned.post("mallory", 1_000);
    ContextCache::global().close_remaining();

    Ok(())
}

#[expect(clippy::print_stdout, reason = "CLI output")]
fn report(books: &Ledger) {
    println!("ledger {}", books.name());
    for (account, balance) in books.balances() {
        println!("  {account:<8} {balance:>6}");
    }
}
