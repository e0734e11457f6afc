//! The in-memory ledger and its transactions.

use core::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use thiserror::Error;

/// URI scheme accepted by [`Ledger::connect`].
pub const SCHEME: &str = "mem://";

/// Ledger failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The URI does not use the `mem://` scheme.
    #[error("unsupported ledger uri '{0}'")]
    InvalidUri(String),

    /// Applying a transaction would leave an account below zero.
    #[error("account '{account}' would be overdrawn by {shortfall}")]
    Overdrawn {
        /// The account.
        account: String,
        /// How far below zero it would go.
        shortfall: i64,
    },

    /// Applying a transaction would overflow an account balance.
    #[error("balance of account '{0}' would overflow")]
    Overflow(String),
}

/// One staged posting.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Posting {
    account: String,
    amount: i64,
}

/// A unit of work against a [`Ledger`].
///
/// Postings are staged on the transaction and only reach the ledger when it
/// is applied.
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    postings: Mutex<Vec<Posting>>,
}

impl Transaction {
    /// Returns the transaction number, unique per ledger.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stages `amount` for `account`. Negative amounts are withdrawals.
    pub fn post(&self, account: impl Into<String>, amount: i64) {
        self.postings.lock().push(Posting {
            account: account.into(),
            amount,
        });
    }

    /// Moves `amount` from one account to another.
    pub fn transfer(&self, from: &str, to: &str, amount: i64) {
        self.post(from, -amount);
        self.post(to, amount);
    }

    /// Returns the number of staged postings.
    #[must_use]
    pub fn staged(&self) -> usize {
        self.postings.lock().len()
    }
}

/// A named set of account balances.
#[derive(Debug)]
pub struct Ledger {
    name: String,
    accounts: Mutex<BTreeMap<String, i64>>,
    next_transaction: AtomicU64,
}

impl Ledger {
    /// Connects to the ledger named by a `mem://<name>` URI.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidUri`] for any other scheme.
    pub fn connect(uri: &str) -> Result<Self, LedgerError> {
        let name = uri
            .strip_prefix(SCHEME)
            .ok_or_else(|| LedgerError::InvalidUri(uri.to_owned()))?;
        tracing::info!(ledger = name, "connected");
        Ok(Self {
            name: name.to_owned(),
            accounts: Mutex::new(BTreeMap::new()),
            next_transaction: AtomicU64::new(1),
        })
    }

    /// Returns the ledger name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts a transaction.
    #[must_use]
    pub fn begin(&self) -> Transaction {
        let id = self.next_transaction.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(transaction = id, "begin");
        Transaction {
            id,
            postings: Mutex::new(Vec::new()),
        }
    }

    /// Applies every staged posting of `transaction`, or none of them.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Overdrawn`] if an account would go negative, or
    /// [`LedgerError::Overflow`] if a balance leaves the `i64` range. The
    /// ledger is unchanged in both cases.
    pub fn apply(&self, transaction: &Transaction) -> Result<(), LedgerError> {
        let postings = core::mem::take(&mut *transaction.postings.lock());
        let mut accounts = self.accounts.lock();

        let mut updated = BTreeMap::new();
        for posting in &postings {
            let balance = updated
                .get(&posting.account)
                .or_else(|| accounts.get(&posting.account))
                .copied()
                .unwrap_or(0)
                .checked_add(posting.amount)
                .ok_or_else(|| LedgerError::Overflow(posting.account.clone()))?;
            updated.insert(posting.account.clone(), balance);
        }
        if let Some((account, balance)) = updated.iter().find(|(_, balance)| **balance < 0) {
            return Err(LedgerError::Overdrawn {
                account: account.clone(),
                shortfall: -balance,
            });
        }

        accounts.extend(updated);
        tracing::debug!(transaction = transaction.id, postings = postings.len(), "applied");
        Ok(())
    }

    /// Drops every staged posting of `transaction`.
    pub fn discard(&self, transaction: &Transaction) {
        let discarded = core::mem::take(&mut *transaction.postings.lock()).len();
        tracing::debug!(transaction = transaction.id, discarded, "discarded");
    }

    /// Returns the committed balance of `account`.
    #[must_use]
    pub fn balance(&self, account: &str) -> i64 {
        self.accounts.lock().get(account).copied().unwrap_or(0)
    }

    /// Returns all committed balances in account order.
    #[must_use]
    pub fn balances(&self) -> Vec<(String, i64)> {
        self.accounts
            .lock()
            .iter()
            .map(|(account, balance)| (account.clone(), *balance))
            .collect()
    }
}
