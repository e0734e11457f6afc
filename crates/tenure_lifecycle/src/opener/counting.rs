//! Reference-counting openers.
//!
//! Both decorators share one live instance across nested opens and keep a
//! nesting count:
//!
//! ```text
//!            open (count 0 → 1, wrapped open)
//!   EMPTY ─────────────────────────────────────▶ OPEN ──┐ open / commit / abort
//!     ▲                                           │  ◀──┘ (count stays > 0)
//!     └──── last commit / abort (count → 0) ──────┘
//! ```
//!
//! [`CountingOpener`] finalizes as soon as the count drops to zero.
//! [`LazyCountingOpener`] keeps a committed instance warm for the next open
//! and only finalizes it on abort or [`close()`](Opener::close).

use super::{Finalize, Opener};
use crate::anomaly::{Anomaly, AnomalyHandler};
use crate::error::LifecycleError;
use core::fmt;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Shared nesting state.
struct Counter<R> {
    count: usize,
    instance: Option<Arc<R>>,
    /// Thread running the wrapped `open()`, while the lock is released.
    opening: Option<ThreadId>,
}

impl<R> Default for Counter<R> {
    fn default() -> Self {
        Self {
            count: 0,
            instance: None,
            opening: None,
        }
    }
}

/// What a release asks the decorator to do after bookkeeping.
enum Release<R> {
    /// Other users remain, or the release was rejected.
    Keep,
    /// The last user left; finalize this instance.
    Finalize(Arc<R>),
}

impl<R> Counter<R> {
    /// Validates and decrements. `retain` keeps the instance cached when the
    /// count reaches zero. A rejected release comes back with its anomaly,
    /// reported by the caller once the lock is released.
    fn release(
        &mut self,
        instance: &Arc<R>,
        action: Finalize,
        retain: bool,
    ) -> Result<Release<R>, Anomaly> {
        let matches = match &self.instance {
            Some(current) if self.count > 0 => Arc::ptr_eq(current, instance),
            _ => return Err(Anomaly::NotOpen { action }),
        };
        if !matches {
            return Err(Anomaly::UnknownInstance { action });
        }

        self.count -= 1;
        if self.count > 0 || retain {
            return Ok(Release::Keep);
        }
        Ok(self.instance.take().map_or(Release::Keep, Release::Finalize))
    }

    /// Resets to EMPTY, returning a still-referenced instance and the
    /// outstanding count if there was one.
    fn force_reset(&mut self) -> Option<(Arc<R>, usize)> {
        if self.count == 0 {
            return None;
        }
        let count = core::mem::take(&mut self.count);
        self.instance.take().map(|instance| (instance, count))
    }
}

/// The lock and wait queue shared by both counting decorators.
struct Nesting<R> {
    state: Mutex<Counter<R>>,
    opened: Condvar,
    anomalies: AnomalyHandler,
}

impl<R> Nesting<R> {
    fn new() -> Self {
        Self {
            state: Mutex::new(Counter::default()),
            opened: Condvar::new(),
            anomalies: AnomalyHandler::default(),
        }
    }

    /// Returns the live instance or opens a new one, and increments the count.
    ///
    /// The wrapped `open()` runs without the lock. Other threads wait for it;
    /// the opening thread itself gets [`LifecycleError::ReentrantOpen`].
    fn acquire<O>(&self, inner: &O) -> Result<Arc<R>, LifecycleError>
    where
        O: Opener<Resource = R> + ?Sized,
    {
        let current = thread::current().id();
        let mut state = self.state.lock();
        while let Some(owner) = state.opening {
            if owner == current {
                return Err(LifecycleError::ReentrantOpen);
            }
            self.opened.wait(&mut state);
        }

        if let Some(instance) = &state.instance {
            let instance = Arc::clone(instance);
            state.count += 1;
            tracing::trace!(count = state.count, "reusing open instance");
            return Ok(instance);
        }

        state.opening = Some(current);
        drop(state);
        let pending = PendingOpen { nesting: self };
        let opened = inner.open();
        let mut state = pending.finish();

        let instance = opened?;
        state.instance = Some(Arc::clone(&instance));
        state.count += 1;
        tracing::trace!(count = state.count, "opened new instance");
        Ok(instance)
    }

    fn release(&self, instance: &Arc<R>, action: Finalize, retain: bool) -> Release<R> {
        let released = self.state.lock().release(instance, action, retain);
        released.unwrap_or_else(|anomaly| {
            self.anomalies.report(&anomaly);
            Release::Keep
        })
    }

    fn force_reset(&self) -> Option<Arc<R>> {
        let (instance, count) = self.state.lock().force_reset()?;
        self.anomalies.report(&Anomaly::ClosedWhileOpen { count });
        Some(instance)
    }

    fn count(&self) -> usize {
        self.state.lock().count
    }
}

/// Clears the opening marker, even if the wrapped `open()` panics.
struct PendingOpen<'a, R> {
    nesting: &'a Nesting<R>,
}

impl<'a, R> PendingOpen<'a, R> {
    fn finish(self) -> MutexGuard<'a, Counter<R>> {
        let mut state = self.nesting.state.lock();
        state.opening = None;
        self.nesting.opened.notify_all();
        core::mem::forget(self);
        state
    }
}

impl<R> Drop for PendingOpen<'_, R> {
    fn drop(&mut self) {
        self.nesting.state.lock().opening = None;
        self.nesting.opened.notify_all();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CountingOpener
// ─────────────────────────────────────────────────────────────────────────────

/// Shares one instance across nested opens and finalizes it with the last
/// commit or abort.
///
/// The verb of the final release decides which finalizer reaches the wrapped
/// opener: the instance is committed only if the last user commits.
///
/// Releasing an instance the opener did not hand out, or releasing while
/// empty, is reported as an [`Anomaly`] and otherwise ignored.
pub struct CountingOpener<O: Opener> {
    inner: O,
    nesting: Nesting<O::Resource>,
}

impl<O: Opener> CountingOpener<O> {
    /// Wraps an opener.
    #[must_use]
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            nesting: Nesting::new(),
        }
    }

    /// Sets the anomaly handler.
    #[must_use]
    pub fn with_anomaly_handler(mut self, anomalies: AnomalyHandler) -> Self {
        self.nesting.anomalies = anomalies;
        self
    }

    /// Returns the current nesting count.
    #[must_use]
    pub fn count(&self) -> usize {
        self.nesting.count()
    }

    /// Returns `true` while an instance is in use.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.count() > 0
    }

    /// Returns the wrapped opener.
    #[must_use]
    pub fn inner(&self) -> &O {
        &self.inner
    }

    fn release(&self, instance: &Arc<O::Resource>, action: Finalize) -> Result<(), LifecycleError> {
        // Bookkeeping completes before the wrapped finalizer runs.
        match self.nesting.release(instance, action, false) {
            Release::Keep => Ok(()),
            Release::Finalize(instance) => {
                tracing::debug!(%action, "last user left; finalizing instance");
                self.inner.finalize(&instance, action)
            }
        }
    }
}

impl<O: Opener> Opener for CountingOpener<O> {
    type Resource = O::Resource;

    /// Runs the wrapped `open()` without holding the nesting lock.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::ReentrantOpen`] if the wrapped `open()` opens
    /// this same opener again.
    fn open(&self) -> Result<Arc<Self::Resource>, LifecycleError> {
        self.nesting.acquire(&self.inner)
    }

    fn commit(&self, instance: &Arc<Self::Resource>) -> Result<(), LifecycleError> {
        self.release(instance, Finalize::Commit)
    }

    fn abort(&self, instance: &Arc<Self::Resource>) -> Result<(), LifecycleError> {
        self.release(instance, Finalize::Abort)
    }

    /// Force-aborts a live instance. An empty opener has nothing to release.
    fn close(&self) -> Result<(), LifecycleError> {
        match self.nesting.force_reset() {
            Some(instance) => self.inner.abort(&instance),
            None => Ok(()),
        }
    }
}

impl<O: Opener> fmt::Debug for CountingOpener<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.nesting.state.lock();
        f.debug_struct("CountingOpener")
            .field("count", &state.count)
            .field("open", &state.instance.is_some())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LazyCountingOpener
// ─────────────────────────────────────────────────────────────────────────────

/// Like [`CountingOpener`], but keeps a committed instance warm.
///
/// When the last user commits, the instance stays cached (idle) and the next
/// open reuses it without calling the wrapped opener. When the last user
/// aborts, the instance is aborted immediately, since its state can no longer
/// be trusted.
///
/// [`close()`](Opener::close) commits an idle instance, or force-aborts one
/// that is still in use.
pub struct LazyCountingOpener<O: Opener> {
    inner: O,
    nesting: Nesting<O::Resource>,
}

impl<O: Opener> LazyCountingOpener<O> {
    /// Wraps an opener.
    #[must_use]
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            nesting: Nesting::new(),
        }
    }

    /// Sets the anomaly handler.
    #[must_use]
    pub fn with_anomaly_handler(mut self, anomalies: AnomalyHandler) -> Self {
        self.nesting.anomalies = anomalies;
        self
    }

    /// Returns the current nesting count.
    #[must_use]
    pub fn count(&self) -> usize {
        self.nesting.count()
    }

    /// Returns `true` while an instance is in use.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.count() > 0
    }

    /// Returns `true` if an instance is cached but not in use.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.nesting.state.lock();
        state.count == 0 && state.instance.is_some()
    }

    /// Returns the wrapped opener.
    #[must_use]
    pub fn inner(&self) -> &O {
        &self.inner
    }
}

impl<O: Opener> Opener for LazyCountingOpener<O> {
    type Resource = O::Resource;

    /// Like [`CountingOpener`], but an idle instance is reused first.
    fn open(&self) -> Result<Arc<Self::Resource>, LifecycleError> {
        self.nesting.acquire(&self.inner)
    }

    fn commit(&self, instance: &Arc<Self::Resource>) -> Result<(), LifecycleError> {
        let release = self.nesting.release(instance, Finalize::Commit, true);
        debug_assert!(matches!(release, Release::Keep));
        Ok(())
    }

    fn abort(&self, instance: &Arc<Self::Resource>) -> Result<(), LifecycleError> {
        match self.nesting.release(instance, Finalize::Abort, false) {
            Release::Keep => Ok(()),
            Release::Finalize(instance) => {
                tracing::debug!("last user aborted; discarding warm instance");
                self.inner.abort(&instance)
            }
        }
    }

    fn close(&self) -> Result<(), LifecycleError> {
        let mut state = self.nesting.state.lock();
        let live = state.force_reset();
        let idle = state.instance.take();
        drop(state);

        if let Some((instance, count)) = live {
            self.nesting
                .anomalies
                .report(&Anomaly::ClosedWhileOpen { count });
            return self.inner.abort(&instance);
        }
        match idle {
            Some(instance) => {
                tracing::debug!("closing idle instance");
                self.inner.commit(&instance)
            }
            None => Ok(()),
        }
    }
}

impl<O: Opener> fmt::Debug for LazyCountingOpener<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.nesting.state.lock();
        f.debug_struct("LazyCountingOpener")
            .field("count", &state.count)
            .field("cached", &state.instance.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Records the calls reaching the wrapped layer.
    #[derive(Default)]
    struct Recorder {
        calls: StdMutex<Vec<(&'static str, usize)>>,
        next: StdMutex<usize>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<(&'static str, usize)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Opener for Recorder {
        type Resource = usize;

        fn open(&self) -> Result<Arc<usize>, LifecycleError> {
            let mut next = self.next.lock().unwrap();
            *next += 1;
            self.calls.lock().unwrap().push(("open", *next));
            Ok(Arc::new(*next))
        }

        fn commit(&self, instance: &Arc<usize>) -> Result<(), LifecycleError> {
            self.calls.lock().unwrap().push(("commit", **instance));
            Ok(())
        }

        fn abort(&self, instance: &Arc<usize>) -> Result<(), LifecycleError> {
            self.calls.lock().unwrap().push(("abort", **instance));
            Ok(())
        }
    }

    fn collecting() -> (AnomalyHandler, Arc<StdMutex<Vec<Anomaly>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = AnomalyHandler::new(move |anomaly| sink.lock().unwrap().push(anomaly.clone()));
        (handler, seen)
    }

    /// Replays a sequence of `o`/`c`/`a` steps and returns the verbs that
    /// reached the wrapped opener.
    fn replay(sequence: &str) -> Vec<&'static str> {
        let opener = CountingOpener::new(Recorder::default());
        let mut held = Vec::new();
        for step in sequence.chars() {
            match step {
                'o' => held.push(opener.open().unwrap()),
                'c' => opener.commit(&held.pop().unwrap()).unwrap(),
                'a' => opener.abort(&held.pop().unwrap()).unwrap(),
                _ => unreachable!(),
            }
        }
        opener.inner().calls().into_iter().map(|(verb, _)| verb).collect()
    }

    #[test]
    fn nested_opens_share_one_instance() {
        assert_eq!(replay("oc"), ["open", "commit"]);
        assert_eq!(replay("oa"), ["open", "abort"]);
        assert_eq!(replay("oocc"), ["open", "commit"]);
        assert_eq!(replay("ooaa"), ["open", "abort"]);
    }

    #[test]
    fn last_verb_decides_finalizer() {
        assert_eq!(replay("ooac"), ["open", "commit"]);
        assert_eq!(replay("ooca"), ["open", "abort"]);
    }

    #[test]
    fn reopening_after_close_creates_fresh_instance() {
        assert_eq!(replay("ooccoc"), ["open", "commit", "open", "commit"]);
        assert_eq!(replay("ooccoa"), ["open", "commit", "open", "abort"]);
    }

    #[test]
    fn close_aborts_live_instance_and_warns() {
        let (handler, seen) = collecting();
        let opener = CountingOpener::new(Recorder::default()).with_anomaly_handler(handler);

        let first = opener.open().unwrap();
        opener.close().unwrap();
        assert_eq!(opener.inner().calls(), [("open", 1), ("abort", 1)]);
        assert_eq!(*seen.lock().unwrap(), [Anomaly::ClosedWhileOpen { count: 1 }]);

        // The stale release is tolerated but reported.
        opener.commit(&first).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(
            seen.lock().unwrap()[1],
            Anomaly::NotOpen {
                action: Finalize::Commit
            }
        );

        let second = opener.open().unwrap();
        assert_eq!(*second, 2);
        assert_eq!(opener.count(), 1);
        opener.commit(&second).unwrap();

        // Closing an empty opener is silent.
        opener.close().unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(
            opener.inner().calls(),
            [("open", 1), ("abort", 1), ("open", 2), ("commit", 2)]
        );
    }

    #[test]
    fn unknown_instance_is_reported_and_ignored() {
        let (handler, seen) = collecting();
        let opener = CountingOpener::new(Recorder::default()).with_anomaly_handler(handler);

        let instance = opener.open().unwrap();
        opener.commit(&Arc::new(99)).unwrap();
        assert_eq!(opener.count(), 1);
        assert_eq!(
            *seen.lock().unwrap(),
            [Anomaly::UnknownInstance {
                action: Finalize::Commit
            }]
        );

        opener.commit(&instance).unwrap();
        assert_eq!(opener.inner().calls(), [("open", 1), ("commit", 1)]);
    }

    #[test]
    fn lazy_commit_keeps_instance_warm() {
        let opener = LazyCountingOpener::new(Recorder::default());

        let first = opener.open().unwrap();
        opener.commit(&first).unwrap();
        assert!(opener.is_idle());

        let second = opener.open().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        opener.commit(&second).unwrap();

        assert_eq!(opener.inner().calls(), [("open", 1)]);
    }

    #[test]
    fn lazy_abort_finalizes_immediately() {
        let opener = LazyCountingOpener::new(Recorder::default());

        let instance = opener.open().unwrap();
        opener.abort(&instance).unwrap();
        assert!(!opener.is_idle());
        assert_eq!(opener.inner().calls(), [("open", 1), ("abort", 1)]);

        let fresh = opener.open().unwrap();
        assert_eq!(*fresh, 2);
    }

    #[test]
    fn lazy_close_commits_idle_instance() {
        let opener = LazyCountingOpener::new(Recorder::default());

        let instance = opener.open().unwrap();
        opener.commit(&instance).unwrap();
        opener.close().unwrap();

        assert!(!opener.is_idle());
        assert_eq!(opener.inner().calls(), [("open", 1), ("commit", 1)]);
    }

    #[test]
    fn lazy_close_aborts_in_use_instance() {
        let (handler, seen) = collecting();
        let opener = LazyCountingOpener::new(Recorder::default()).with_anomaly_handler(handler);

        let _instance = opener.open().unwrap();
        opener.close().unwrap();

        assert_eq!(opener.inner().calls(), [("open", 1), ("abort", 1)]);
        assert_eq!(*seen.lock().unwrap(), [Anomaly::ClosedWhileOpen { count: 1 }]);
    }

    #[test]
    fn failed_open_leaves_opener_empty() {
        let opener = CountingOpener::new(crate::opener::FunctionOpener::<u8>::new(|| {
            Err("refused".into())
        }));
        assert!(opener.open().is_err());
        assert_eq!(opener.count(), 0);
    }

    #[test]
    fn anomaly_handler_may_inspect_the_opener() {
        use std::sync::{OnceLock, Weak, mpsc};
        use std::time::Duration;

        let target: Arc<OnceLock<Weak<CountingOpener<Recorder>>>> = Arc::new(OnceLock::new());
        let seen_counts = Arc::new(StdMutex::new(Vec::new()));
        let handler = {
            let target = Arc::clone(&target);
            let seen_counts = Arc::clone(&seen_counts);
            AnomalyHandler::new(move |_| {
                if let Some(opener) = target.get().and_then(Weak::upgrade) {
                    seen_counts.lock().unwrap().push(opener.count());
                    let _ = format!("{opener:?}");
                }
            })
        };
        let opener = Arc::new(CountingOpener::new(Recorder::default()).with_anomaly_handler(handler));
        target.set(Arc::downgrade(&opener)).ok().unwrap();

        let (done, finished) = mpsc::channel();
        let worker = Arc::clone(&opener);
        std::thread::spawn(move || {
            worker.commit(&Arc::new(9)).unwrap();
            let instance = worker.open().unwrap();
            worker.commit(&Arc::new(9)).unwrap();
            worker.close().unwrap();
            worker.commit(&instance).unwrap();
            done.send(()).unwrap();
        });

        finished
            .recv_timeout(Duration::from_secs(5))
            .expect("anomaly handler deadlocked");
        assert_eq!(*seen_counts.lock().unwrap(), [0, 1, 0, 0]);
    }

    /// Opens its own outer opener from inside `open()`, the first time only.
    struct Reentrant {
        outer: std::sync::OnceLock<std::sync::Weak<CountingOpener<Reentrant>>>,
        reentered: core::sync::atomic::AtomicBool,
    }

    impl Opener for Reentrant {
        type Resource = usize;

        fn open(&self) -> Result<Arc<usize>, LifecycleError> {
            let first = !self
                .reentered
                .swap(true, core::sync::atomic::Ordering::SeqCst);
            match self.outer.get().and_then(std::sync::Weak::upgrade) {
                Some(outer) if first => outer.open(),
                _ => Ok(Arc::new(7)),
            }
        }

        fn commit(&self, _: &Arc<usize>) -> Result<(), LifecycleError> {
            Ok(())
        }

        fn abort(&self, _: &Arc<usize>) -> Result<(), LifecycleError> {
            Ok(())
        }
    }

    #[test]
    fn reentrant_open_is_an_error() {
        let opener = Arc::new(CountingOpener::new(Reentrant {
            outer: std::sync::OnceLock::new(),
            reentered: core::sync::atomic::AtomicBool::new(false),
        }));
        opener.inner().outer.set(Arc::downgrade(&opener)).ok().unwrap();

        assert!(matches!(opener.open(), Err(LifecycleError::ReentrantOpen)));
        assert_eq!(opener.count(), 0);

        // The failed attempt leaves no marker behind.
        let instance = opener.open().unwrap();
        assert_eq!(*instance, 7);
        opener.commit(&instance).unwrap();
    }

    /// Slow to open, so a second thread arrives mid-open.
    #[derive(Default)]
    struct Slow {
        opens: core::sync::atomic::AtomicUsize,
    }

    impl Opener for Slow {
        type Resource = usize;

        fn open(&self) -> Result<Arc<usize>, LifecycleError> {
            std::thread::sleep(std::time::Duration::from_millis(50));
            let n = self.opens.fetch_add(1, core::sync::atomic::Ordering::SeqCst);
            Ok(Arc::new(n))
        }

        fn commit(&self, _: &Arc<usize>) -> Result<(), LifecycleError> {
            Ok(())
        }

        fn abort(&self, _: &Arc<usize>) -> Result<(), LifecycleError> {
            Ok(())
        }
    }

    #[test]
    fn concurrent_open_waits_for_the_first() {
        let opener = Arc::new(CountingOpener::new(Slow::default()));
        let barrier = Arc::new(std::sync::Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let opener = Arc::clone(&opener);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    opener.open().unwrap()
                })
            })
            .collect();
        let instances: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("Thread panicked"))
            .collect();

        assert!(Arc::ptr_eq(&instances[0], &instances[1]));
        assert_eq!(opener.count(), 2);
        assert_eq!(
            opener.inner().opens.load(core::sync::atomic::Ordering::SeqCst),
            1
        );
    }
}
