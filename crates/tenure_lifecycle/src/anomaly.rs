//! Non-fatal lifecycle anomalies.
//!
//! A double release, or a teardown racing a normal exit, does not fail the
//! caller. Openers report an [`Anomaly`] to an
//! [`AnomalyHandler`]. The default handler logs each anomaly with
//! `tracing::warn!`.

use crate::context::DefinitionId;
use crate::opener::Finalize;
use core::fmt;
use std::sync::Arc;

/// A recoverable lifecycle irregularity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// Commit or abort was requested while no instance was open.
    NotOpen {
        /// The requested finalization.
        action: Finalize,
    },

    /// Commit or abort was requested with an instance the opener did not hand out.
    UnknownInstance {
        /// The requested finalization.
        action: Finalize,
    },

    /// An opener was closed while instances were still in use.
    ///
    /// The live instance is aborted.
    ClosedWhileOpen {
        /// Outstanding nesting count at the time of closing.
        count: usize,
    },

    /// Closing a cached opener failed during context teardown.
    CloseFailed {
        /// The definition whose opener failed to close.
        definition: DefinitionId,
        /// The rendered error.
        error: String,
    },

    /// A session was dropped while still open and has been aborted.
    DroppedOpen,

    /// Aborting an instance after a failed scope itself failed.
    AbortFailed {
        /// The rendered error.
        error: String,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotOpen { action } => write!(f, "{action} requested with no open instance"),
            Self::UnknownInstance { action } => {
                write!(f, "{action} requested for an instance this opener did not open")
            }
            Self::ClosedWhileOpen { count } => {
                write!(f, "opener closed while still open (count {count}); aborting")
            }
            Self::CloseFailed { definition, error } => {
                write!(f, "closing opener {definition} failed: {error}")
            }
            Self::DroppedOpen => f.write_str("session dropped while open; aborting"),
            Self::AbortFailed { error } => write!(f, "abort after failed scope failed: {error}"),
        }
    }
}

/// Receiver for [`Anomaly`] reports.
///
/// # Example
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use tenure_lifecycle::anomaly::{Anomaly, AnomalyHandler};
/// use tenure_lifecycle::opener::Finalize;
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
/// let handler = AnomalyHandler::new(move |anomaly| sink.lock().unwrap().push(anomaly.clone()));
///
/// handler.report(&Anomaly::NotOpen { action: Finalize::Commit });
/// assert_eq!(seen.lock().unwrap().len(), 1);
/// ```
#[derive(Clone)]
pub struct AnomalyHandler(Arc<dyn Fn(&Anomaly) + Send + Sync>);

impl AnomalyHandler {
    /// Creates a handler from a callback.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Anomaly) + Send + Sync + 'static,
    {
        Self(Arc::new(handler))
    }

    /// Creates the default handler, which logs through `tracing`.
    #[must_use]
    pub fn logging() -> Self {
        Self::new(|anomaly| tracing::warn!(%anomaly, "resource lifecycle anomaly"))
    }

    /// Delivers an anomaly.
    pub fn report(&self, anomaly: &Anomaly) {
        (self.0)(anomaly);
    }
}

impl Default for AnomalyHandler {
    fn default() -> Self {
        Self::logging()
    }
}

impl fmt::Debug for AnomalyHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnomalyHandler").finish_non_exhaustive()
    }
}
