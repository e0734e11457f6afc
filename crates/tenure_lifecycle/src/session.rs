//! Single-use scoped acquisition.
//!
//! A [`Session`] performs exactly one acquisition over an opener:
//! one [`open()`](Session::open), then one [`commit()`](Session::commit) or
//! [`abort()`](Session::abort). Out-of-sequence calls fail with a
//! [`SessionStateError`].
//!
//! [`scope()`](Session::scope) is the structured form: it commits when the
//! closure returns `Ok`, and aborts and hands back the closure's error
//! unchanged when it returns `Err`. A session dropped while still open (for
//! example while unwinding from a panic) aborts its instance.

use crate::anomaly::{Anomaly, AnomalyHandler};
use crate::error::{LifecycleError, SessionStateError};
use crate::opener::{DynOpener, Finalize};
use core::fmt;
use core::mem;
use std::sync::Arc;

enum SessionState<R> {
    Ready,
    Open(Arc<R>),
    Finished,
}

/// A single-use acquisition over an opener.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tenure_lifecycle::opener::{DynOpener, SingletonOpener};
/// use tenure_lifecycle::session::Session;
///
/// let opener: Arc<DynOpener<&str>> = Arc::new(SingletonOpener::new(Arc::new("conn")));
///
/// let mut session = Session::new(Arc::clone(&opener));
/// let conn = session.open().unwrap();
/// assert_eq!(*conn, "conn");
/// session.commit().unwrap();
///
/// // A finished session cannot be reused.
/// assert!(session.open().is_err());
/// ```
pub struct Session<R: Send + Sync + 'static> {
    opener: Arc<DynOpener<R>>,
    state: SessionState<R>,
    anomalies: AnomalyHandler,
}

impl<R: Send + Sync + 'static> Session<R> {
    /// Creates a session over an opener.
    #[must_use]
    pub fn new(opener: Arc<DynOpener<R>>) -> Self {
        Self {
            opener,
            state: SessionState::Ready,
            anomalies: AnomalyHandler::default(),
        }
    }

    /// Sets the handler for anomalies raised while aborting.
    #[must_use]
    pub fn with_anomaly_handler(mut self, anomalies: AnomalyHandler) -> Self {
        self.anomalies = anomalies;
        self
    }

    /// Acquires the instance.
    ///
    /// # Errors
    ///
    /// Returns [`SessionStateError::AlreadyOpen`] or
    /// [`SessionStateError::Finished`] if the session was already used, or
    /// the opener's error if acquisition fails.
    pub fn open(&mut self) -> Result<Arc<R>, LifecycleError> {
        match self.state {
            SessionState::Ready => {}
            SessionState::Open(_) => return Err(SessionStateError::AlreadyOpen.into()),
            SessionState::Finished => return Err(SessionStateError::Finished.into()),
        }
        let instance = self.opener.open()?;
        self.state = SessionState::Open(Arc::clone(&instance));
        Ok(instance)
    }

    /// Finalizes the acquisition normally.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionStateError`] if the session is not open, or the
    /// opener's commit error.
    pub fn commit(&mut self) -> Result<(), LifecycleError> {
        self.finish(Finalize::Commit)
    }

    /// Finalizes the acquisition destructively.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionStateError`] if the session is not open, or the
    /// opener's abort error.
    pub fn abort(&mut self) -> Result<(), LifecycleError> {
        self.finish(Finalize::Abort)
    }

    /// Returns `true` between `open()` and `commit()`/`abort()`.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.state, SessionState::Open(_))
    }

    /// Returns `true` once the session was committed or aborted.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.state, SessionState::Finished)
    }

    /// Returns the opener this session acquires from.
    #[must_use]
    pub fn opener(&self) -> &Arc<DynOpener<R>> {
        &self.opener
    }

    /// Runs `f` with the acquired instance and finalizes based on its result.
    ///
    /// `Ok` commits; `Err` aborts and returns the error unchanged. A failing
    /// abort on the error path is reported as [`Anomaly::AbortFailed`] so the
    /// caller's error is never replaced.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error, or a [`LifecycleError`] from opening or committing.
    pub fn scope<T, E, F>(mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Arc<R>) -> Result<T, E>,
        E: From<LifecycleError>,
    {
        let instance = self.open()?;
        match f(&instance) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(error) => {
                if let Err(abort_error) = self.abort() {
                    self.anomalies.report(&Anomaly::AbortFailed {
                        error: abort_error.to_string(),
                    });
                }
                Err(error)
            }
        }
    }

    fn finish(&mut self, action: Finalize) -> Result<(), LifecycleError> {
        let instance = match mem::replace(&mut self.state, SessionState::Finished) {
            SessionState::Open(instance) => instance,
            SessionState::Ready => {
                self.state = SessionState::Ready;
                return Err(SessionStateError::NotOpen { action }.into());
            }
            SessionState::Finished => return Err(SessionStateError::Finished.into()),
        };
        self.opener.finalize(&instance, action)
    }
}

impl<R: Send + Sync + 'static> Drop for Session<R> {
    fn drop(&mut self) {
        if let SessionState::Open(instance) = mem::replace(&mut self.state, SessionState::Finished)
        {
            self.anomalies.report(&Anomaly::DroppedOpen);
            if let Err(error) = self.opener.abort(&instance) {
                self.anomalies.report(&Anomaly::AbortFailed {
                    error: error.to_string(),
                });
            }
        }
    }
}

impl<R: Send + Sync + 'static> fmt::Debug for Session<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            SessionState::Ready => "ready",
            SessionState::Open(_) => "open",
            SessionState::Finished => "finished",
        };
        f.debug_struct("Session").field("state", &state).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opener::{FunctionOpener, Opener};
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct Tally {
        commits: AtomicUsize,
        aborts: AtomicUsize,
    }

    fn tallied() -> (Arc<DynOpener<u32>>, Arc<Tally>) {
        let tally = Arc::new(Tally {
            commits: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
        });
        let (c, a) = (Arc::clone(&tally), Arc::clone(&tally));
        let opener = FunctionOpener::new(|| Ok(7_u32))
            .on_commit(move |_| {
                c.commits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .on_abort(move |_| {
                a.aborts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        (Arc::new(opener), tally)
    }

    #[derive(Debug, PartialEq)]
    enum AppError {
        Lifecycle(String),
        Rejected,
    }

    impl From<LifecycleError> for AppError {
        fn from(error: LifecycleError) -> Self {
            Self::Lifecycle(error.to_string())
        }
    }

    #[test]
    fn double_open_is_a_state_error() {
        let (opener, _) = tallied();
        let mut session = Session::new(opener);
        session.open().unwrap();
        let err = session.open().unwrap_err();
        assert!(matches!(err, LifecycleError::State(SessionStateError::AlreadyOpen)));
        assert!(session.is_open());
        session.commit().unwrap();
    }

    #[test]
    fn finalize_before_open_is_a_state_error() {
        let (opener, tally) = tallied();
        let mut session = Session::new(opener);

        let err = session.commit().unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::State(SessionStateError::NotOpen {
                action: Finalize::Commit
            })
        ));
        // Still usable after the rejected call.
        session.open().unwrap();
        session.abort().unwrap();
        assert!(session.is_finished());
        assert_eq!(tally.aborts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn finished_session_rejects_everything() {
        let (opener, tally) = tallied();
        let mut session = Session::new(opener);
        session.open().unwrap();
        session.commit().unwrap();

        assert!(matches!(
            session.commit(),
            Err(LifecycleError::State(SessionStateError::Finished))
        ));
        assert!(matches!(
            session.open(),
            Err(LifecycleError::State(SessionStateError::Finished))
        ));
        assert_eq!(tally.commits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scope_commits_on_ok() {
        let (opener, tally) = tallied();
        let value = Session::new(opener)
            .scope(|instance| Ok::<_, AppError>(**instance + 1))
            .unwrap();
        assert_eq!(value, 8);
        assert_eq!(tally.commits.load(Ordering::SeqCst), 1);
        assert_eq!(tally.aborts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn scope_aborts_and_returns_error_unchanged() {
        let (opener, tally) = tallied();
        let result: Result<(), AppError> = Session::new(opener).scope(|_| Err(AppError::Rejected));
        assert_eq!(result, Err(AppError::Rejected));
        assert_eq!(tally.commits.load(Ordering::SeqCst), 0);
        assert_eq!(tally.aborts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scope_keeps_caller_error_when_abort_fails() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let opener: Arc<DynOpener<u32>> = Arc::new(
            FunctionOpener::new(|| Ok(1_u32)).on_abort(|_| Err("rollback failed".into())),
        );

        let result: Result<(), AppError> = Session::new(opener)
            .with_anomaly_handler(AnomalyHandler::new(move |a| sink.lock().unwrap().push(a.clone())))
            .scope(|_| Err(AppError::Rejected));

        assert_eq!(result, Err(AppError::Rejected));
        assert!(matches!(&seen.lock().unwrap()[..], [Anomaly::AbortFailed { .. }]));
    }

    #[test]
    fn drop_while_open_aborts() {
        let (opener, tally) = tallied();
        {
            let mut session = Session::new(opener).with_anomaly_handler(AnomalyHandler::new(|_| {}));
            session.open().unwrap();
        }
        assert_eq!(tally.aborts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panic_inside_scope_aborts() {
        let (opener, tally) = tallied();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            Session::new(opener)
                .with_anomaly_handler(AnomalyHandler::new(|_| {}))
                .scope(|_| -> Result<(), LifecycleError> { panic!("boom") })
        }));
        assert!(result.is_err());
        assert_eq!(tally.aborts.load(Ordering::SeqCst), 1);
        assert_eq!(tally.commits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn open_failure_leaves_session_ready() {
        let opener: Arc<DynOpener<u8>> = Arc::new(FunctionOpener::new(|| Err("refused".into())));
        let mut session = Session::new(Arc::clone(&opener));
        assert!(matches!(session.open(), Err(LifecycleError::Open(_))));
        assert!(!session.is_open());
        assert!(!session.is_finished());
        // Opener trait stays usable through the session handle.
        assert!(session.opener().open().is_err());
    }
}
