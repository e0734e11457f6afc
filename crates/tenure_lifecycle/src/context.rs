//! Per-thread opener cache.
//!
//! The [`ContextCache`] maps a [`DefinitionId`] to the opener built for it,
//! separately for every thread. Within one thread every session of a
//! definition shares the same opener, which is what makes nested acquisitions
//! reuse one resource. Different threads build their own openers and never
//! share an instance.
//!
//! # Lifecycle
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | [`get_or_create()`](ContextCache::get_or_create) | Builds the opener on first use in the calling thread |
//! | [`close_remaining()`](ContextCache::close_remaining) | Closes and evicts every opener of the calling thread |
//! | [`clear()`](ContextCache::clear) | Evicts without closing |
//!
//! A thread's openers are also closed when the thread exits. Worker threads
//! that are reused across jobs should call `close_remaining()` (or hold a
//! [`ContextGuard`]) at the end of each job.

use crate::anomaly::{Anomaly, AnomalyHandler};
use crate::error::LifecycleError;
use crate::opener::DynOpener;
use core::any::Any;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use hashbrown::HashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::sync::{Arc, LazyLock, Weak};
use std::thread::{self, ThreadId};

/// Stable identity of a session definition.
///
/// Every [`SessionFactory`](crate::factory::SessionFactory) draws a fresh id
/// when it is created; clones keep it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefinitionId(u64);

impl DefinitionId {
    /// Allocates a new, process-unique id.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A cached opener with its type erased.
struct CacheEntry {
    /// Holds an `Arc<DynOpener<R>>`.
    opener: Box<dyn Any + Send + Sync>,
    close: Box<dyn Fn() -> Result<(), LifecycleError> + Send + Sync>,
}

impl CacheEntry {
    fn new<R: Send + Sync + 'static>(opener: Arc<DynOpener<R>>) -> Self {
        let closing = Arc::clone(&opener);
        Self {
            opener: Box::new(opener),
            close: Box::new(move || closing.close()),
        }
    }

    fn downcast<R: Send + Sync + 'static>(
        &self,
        key: DefinitionId,
    ) -> Result<Arc<DynOpener<R>>, LifecycleError> {
        self.opener
            .downcast_ref::<Arc<DynOpener<R>>>()
            .cloned()
            .ok_or(LifecycleError::OpenerTypeMismatch(key))
    }
}

/// Openers of one thread, in creation order.
type Slots = IndexMap<DefinitionId, CacheEntry>;

type Contexts = Mutex<HashMap<ThreadId, Slots>>;

/// Closes openers in reverse creation order, reporting failures.
fn close_slots(slots: Slots, anomalies: &AnomalyHandler) -> usize {
    let evicted = slots.len();
    for (definition, entry) in slots.into_iter().rev() {
        if let Err(error) = (entry.close)() {
            anomalies.report(&Anomaly::CloseFailed {
                definition,
                error: error.to_string(),
            });
        }
    }
    evicted
}

/// Caches holding slots of the current thread, swept when the thread exits.
#[derive(Default)]
struct ThreadTeardown {
    thread: Cell<Option<ThreadId>>,
    caches: RefCell<Vec<(Weak<Contexts>, AnomalyHandler)>>,
}

impl ThreadTeardown {
    fn watch(&self, contexts: &Arc<Contexts>, anomalies: &AnomalyHandler) {
        self.thread.set(Some(thread::current().id()));
        let mut caches = self.caches.borrow_mut();
        caches.retain(|(cache, _)| cache.strong_count() > 0);
        let weak = Arc::downgrade(contexts);
        if !caches.iter().any(|(cache, _)| cache.ptr_eq(&weak)) {
            caches.push((weak, anomalies.clone()));
        }
    }
}

impl Drop for ThreadTeardown {
    fn drop(&mut self) {
        let Some(thread) = self.thread.get() else {
            return;
        };
        for (cache, anomalies) in self.caches.get_mut().drain(..) {
            let Some(contexts) = cache.upgrade() else {
                continue;
            };
            let slots = contexts.lock().remove(&thread);
            if let Some(slots) = slots {
                let evicted = close_slots(slots, &anomalies);
                tracing::debug!(evicted, "closed openers of exited thread");
            }
        }
    }
}

thread_local! {
    static TEARDOWN: ThreadTeardown = ThreadTeardown::default();
}

static GLOBAL: LazyLock<Arc<ContextCache>> = LazyLock::new(|| Arc::new(ContextCache::new()));

/// Per-thread store of built openers.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tenure_lifecycle::context::{ContextCache, DefinitionId};
/// use tenure_lifecycle::error::LifecycleError;
/// use tenure_lifecycle::opener::{DynOpener, SingletonOpener};
///
/// let cache = ContextCache::new();
/// let key = DefinitionId::next();
///
/// let build = || -> Result<Arc<DynOpener<i32>>, LifecycleError> {
///     Ok(Arc::new(SingletonOpener::new(Arc::new(1))))
/// };
/// let a = cache.get_or_create(key, build).unwrap();
/// let b = cache.get_or_create(key, build).unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
///
/// // Another thread gets its own opener.
/// std::thread::scope(|s| {
///     s.spawn(|| {
///         let c = cache.get_or_create(key, build).unwrap();
///         assert!(!Arc::ptr_eq(&a, &c));
///     });
/// });
/// ```
pub struct ContextCache {
    contexts: Arc<Contexts>,
    anomalies: AnomalyHandler,
}

impl Default for ContextCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            contexts: Arc::new(Mutex::new(HashMap::new())),
            anomalies: AnomalyHandler::default(),
        }
    }

    /// Returns the process-wide cache used by default.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Sets the handler receiving close failures.
    #[must_use]
    pub fn with_anomaly_handler(mut self, anomalies: AnomalyHandler) -> Self {
        self.anomalies = anomalies;
        self
    }

    /// Returns the calling thread's opener for `key`, if one was built.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::OpenerTypeMismatch`] if the slot holds an
    /// opener for a different resource type.
    pub fn get<R: Send + Sync + 'static>(
        &self,
        key: DefinitionId,
    ) -> Result<Option<Arc<DynOpener<R>>>, LifecycleError> {
        let contexts = self.contexts.lock();
        contexts
            .get(&thread::current().id())
            .and_then(|slots| slots.get(&key))
            .map(|entry| entry.downcast(key))
            .transpose()
    }

    /// Returns the calling thread's opener for `key`, building it on first use.
    ///
    /// `build` runs without the cache lock held, so it may itself use the
    /// cache. The first opener cached for a thread arms a teardown that closes
    /// the thread's remaining openers when it exits.
    ///
    /// # Errors
    ///
    /// Propagates errors from `build`; see also [`get()`](Self::get).
    pub fn get_or_create<R, F>(
        &self,
        key: DefinitionId,
        build: F,
    ) -> Result<Arc<DynOpener<R>>, LifecycleError>
    where
        R: Send + Sync + 'static,
        F: FnOnce() -> Result<Arc<DynOpener<R>>, LifecycleError>,
    {
        if let Some(opener) = self.get::<R>(key)? {
            return Ok(opener);
        }

        let opener = build()?;

        let mut contexts = self.contexts.lock();
        let current = thread::current().id();
        let first_slot = !contexts.contains_key(&current);
        let slots = contexts.entry(current).or_default();
        if let Some(existing) = slots.get(&key) {
            // A reentrant build already populated the slot; keep the first.
            return existing.downcast(key);
        }
        slots.insert(key, CacheEntry::new(Arc::clone(&opener)));
        drop(contexts);

        if first_slot {
            // Unavailable only while the thread is already tearing down.
            let _ = TEARDOWN.try_with(|teardown| teardown.watch(&self.contexts, &self.anomalies));
        }
        tracing::debug!(definition = %key, "built opener for context");
        Ok(opener)
    }

    /// Removes the calling thread's opener for `key` without closing it.
    ///
    /// Returns `true` if an opener was evicted.
    pub fn evict(&self, key: DefinitionId) -> bool {
        let mut contexts = self.contexts.lock();
        let current = thread::current().id();
        let Some(slots) = contexts.get_mut(&current) else {
            return false;
        };
        let evicted = slots.shift_remove(&key).is_some();
        if slots.is_empty() {
            contexts.remove(&current);
        }
        evicted
    }

    /// Closes and evicts every opener of the calling thread.
    ///
    /// Openers are closed in reverse creation order. Close failures are
    /// reported as [`Anomaly::CloseFailed`] and do not stop the sweep.
    /// Returns the number of evicted openers.
    pub fn close_remaining(&self) -> usize {
        let Some(slots) = self.contexts.lock().remove(&thread::current().id()) else {
            return 0;
        };

        let evicted = close_slots(slots, &self.anomalies);
        tracing::debug!(evicted, "closed remaining openers");
        evicted
    }

    /// Evicts every opener of the calling thread without closing it.
    pub fn clear(&self) {
        self.contexts.lock().remove(&thread::current().id());
    }

    /// Returns the number of openers cached for the calling thread.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts
            .lock()
            .get(&thread::current().id())
            .map_or(0, IndexMap::len)
    }

    /// Returns `true` if the calling thread has no cached openers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of threads with at least one cached opener.
    #[must_use]
    pub fn context_count(&self) -> usize {
        self.contexts.lock().len()
    }

    /// Returns a guard that runs [`close_remaining()`](Self::close_remaining)
    /// when dropped.
    #[must_use]
    pub fn guard(self: &Arc<Self>) -> ContextGuard {
        ContextGuard {
            cache: Arc::clone(self),
        }
    }
}

impl fmt::Debug for ContextCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextCache")
            .field("contexts", &self.context_count())
            .finish_non_exhaustive()
    }
}

/// Closes the calling thread's remaining openers on drop.
///
/// Must be dropped on the thread that created it.
#[must_use = "the context is torn down when the guard is dropped"]
pub struct ContextGuard {
    cache: Arc<ContextCache>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        self.cache.close_remaining();
    }
}

impl fmt::Debug for ContextGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opener::{Opener, OpenerExt, SingletonOpener};
    use std::sync::Mutex as StdMutex;

    fn singleton(value: i32) -> Arc<DynOpener<i32>> {
        Arc::new(SingletonOpener::new(Arc::new(value)))
    }

    #[test]
    fn definition_ids_are_unique() {
        let a = DefinitionId::next();
        let b = DefinitionId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn build_runs_once_per_thread() {
        let cache = ContextCache::new();
        let key = DefinitionId::next();
        let mut builds = 0;

        for _ in 0..3 {
            cache
                .get_or_create(key, || {
                    builds += 1;
                    Ok(singleton(1))
                })
                .unwrap();
        }
        assert_eq!(builds, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn build_errors_are_not_cached() {
        let cache = ContextCache::new();
        let key = DefinitionId::next();

        let err = cache.get_or_create::<i32, _>(key, || Err(LifecycleError::open("down")));
        assert!(err.is_err());
        assert!(cache.is_empty());

        cache.get_or_create(key, || Ok(singleton(2))).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let cache = ContextCache::new();
        let key = DefinitionId::next();
        cache.get_or_create(key, || Ok(singleton(1))).unwrap();

        let result = cache.get::<String>(key);
        assert!(matches!(result, Err(LifecycleError::OpenerTypeMismatch(k)) if k == key));
    }

    #[test]
    fn close_remaining_closes_open_openers() {
        let cache = ContextCache::new();
        let key = DefinitionId::next();
        let counting = Arc::new(SingletonOpener::new(Arc::new(5)).counting());

        let shared = Arc::clone(&counting);
        let opener = cache
            .get_or_create(key, move || Ok(shared as Arc<DynOpener<i32>>))
            .unwrap();
        let _instance = opener.open().unwrap();
        assert!(counting.is_open());

        assert_eq!(cache.close_remaining(), 1);
        assert!(!counting.is_open());
        assert!(cache.is_empty());
        assert_eq!(cache.close_remaining(), 0);
    }

    #[test]
    fn close_failures_are_reported() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cache = ContextCache::new()
            .with_anomaly_handler(AnomalyHandler::new(move |a| sink.lock().unwrap().push(a.clone())));

        let key = DefinitionId::next();
        let failing = crate::opener::FunctionOpener::new(|| Ok(1_i32))
            .on_abort(|_| Err("socket closed".into()))
            .counting()
            .with_anomaly_handler(AnomalyHandler::new(|_| {}));
        let opener = cache
            .get_or_create(key, move || Ok(Arc::new(failing) as Arc<DynOpener<i32>>))
            .unwrap();
        let _instance = opener.open().unwrap();

        assert_eq!(cache.close_remaining(), 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(&seen[0], Anomaly::CloseFailed { definition, .. } if *definition == key));
    }

    #[test]
    fn clear_and_evict_do_not_close() {
        let cache = ContextCache::new();
        let (a, b) = (DefinitionId::next(), DefinitionId::next());
        let counting = Arc::new(SingletonOpener::new(Arc::new(5)).counting());
        let shared = Arc::clone(&counting);
        cache
            .get_or_create(a, move || Ok(shared as Arc<DynOpener<i32>>))
            .unwrap()
            .open()
            .unwrap();
        cache.get_or_create(b, || Ok(singleton(1))).unwrap();

        assert!(cache.evict(a));
        assert!(!cache.evict(a));
        assert!(counting.is_open());

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.context_count(), 0);
    }

    #[test]
    fn guard_tears_down_on_drop() {
        let cache = Arc::new(ContextCache::new());
        let counting = Arc::new(SingletonOpener::new(Arc::new(5)).counting());
        {
            let _guard = cache.guard();
            let shared = Arc::clone(&counting);
            cache
                .get_or_create(DefinitionId::next(), move || Ok(shared as Arc<DynOpener<i32>>))
                .unwrap()
                .open()
                .unwrap();
        }
        assert!(!counting.is_open());
        assert!(cache.is_empty());
    }
}
