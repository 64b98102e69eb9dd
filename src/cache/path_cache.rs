//! Live mirror of one store subtree.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;

use crate::error::{ConfigError, ConfigResult};
use crate::observability::metrics;
use crate::store::path;
use crate::store::{EventKind, EventListener, Node, Payload, Store, StoreEvent, StoreResult, SubscriptionId};

/// Attempts at a load that no concurrent change interrupts.
const LOAD_ATTEMPTS: usize = 5;

/// A change applied to a cache, reported to its observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub base_path: String,
    /// Absolute path of the changed node.
    pub path: String,
    pub kind: EventKind,
}

/// Callback run after each applied notification.
pub type CacheObserver = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

/// Lifecycle of a cache. Notifications are only acted on while `Loading` or `Live`.
#[derive(Debug)]
enum Phase {
    Idle,
    /// Initial load running; notifications are buffered.
    Loading(Vec<StoreEvent>),
    Live,
    Closed,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Loading(_) => "loading",
            Phase::Live => "live",
            Phase::Closed => "closed",
        }
    }
}

/// Subtree contents read at a single store revision (or as close as the store allowed).
struct Snapshot {
    revision: u64,
    nodes: Vec<(String, Node)>,
}

/// State shared with the store's notification thread.
struct Shared {
    base_path: String,
    entries: DashMap<String, Payload>,
    /// Last applied revision per path, kept for removed paths too.
    revisions: DashMap<String, u64>,
    /// Changes at or below this revision are already reflected by the initial load.
    floor: AtomicU64,
    phase: Mutex<Phase>,
    observer: Option<CacheObserver>,
}

impl Shared {
    fn on_event(&self, event: StoreEvent) {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *phase {
            Phase::Loading(buffer) => buffer.push(event),
            // Applied under the lock so live events cannot overtake the replay or outlive close.
            Phase::Live => self.apply(event),
            Phase::Idle | Phase::Closed => {}
        }
    }

    fn is_stale(&self, event: &StoreEvent) -> bool {
        event.revision <= self.floor.load(Ordering::Acquire)
            || self
                .revisions
                .get(&event.path)
                .is_some_and(|seen| *seen >= event.revision)
    }

    fn apply(&self, event: StoreEvent) {
        if path::relative_to(&self.base_path, &event.path).is_none() {
            tracing::debug!(base = %self.base_path, path = %event.path, "Ignoring event outside cache scope");
            return;
        }
        if self.is_stale(&event) {
            tracing::debug!(base = %self.base_path, path = %event.path, revision = event.revision, "Dropping stale event");
            return;
        }
        self.revisions.insert(event.path.clone(), event.revision);

        match (event.kind, event.data) {
            (EventKind::Added | EventKind::Updated, Some(data)) => {
                self.ingest(&event.path, data);
            }
            (EventKind::Removed, _) | (_, None) => {
                self.entries.remove(&event.path);
                let prefix = format!("{}/", event.path);
                self.entries.retain(|k, _| !k.starts_with(&prefix));
            }
        }

        metrics::record_cache_event(event.kind);
        metrics::record_cache_size(&self.base_path, self.entries.len());
        tracing::debug!(base = %self.base_path, path = %event.path, kind = %event.kind, "Cache updated");

        if let Some(observer) = &self.observer {
            observer(&CacheEvent {
                base_path: self.base_path.clone(),
                path: event.path,
                kind: event.kind,
            });
        }
    }

    /// Store `data` for `path`, or record the path as absent if the payload is unusable.
    fn ingest(&self, path: &str, data: Payload) {
        if data.is_empty() {
            self.entries.remove(path);
            return;
        }
        if let Err(e) = std::str::from_utf8(&data) {
            tracing::warn!(path = %path, error = %e, "Payload is not UTF-8, treating node as absent");
            self.entries.remove(path);
            return;
        }
        self.entries.insert(path.to_string(), data);
    }

    fn reset(&self) {
        self.entries.clear();
        self.revisions.clear();
        self.floor.store(0, Ordering::Release);
    }
}

/// Eventually-consistent local copy of the nodes below one base path.
///
/// `start()` loads the subtree synchronously; afterwards the store's
/// notifications keep it current. Reads never touch the store. Once `start()`
/// has returned, a path never shows an older state than the one already seen.
pub struct PathWatchCache {
    store: Arc<dyn Store>,
    shared: Arc<Shared>,
    subscription: Mutex<Option<SubscriptionId>>,
    /// Serialises `start()` calls.
    starting: Mutex<()>,
}

impl PathWatchCache {
    /// Create a cache for `base_path`, which must already be normalised.
    pub fn new(store: Arc<dyn Store>, base_path: impl Into<String>) -> Self {
        Self::build(store, base_path.into(), None)
    }

    /// Like [`new`](Self::new), running `observer` after every applied change.
    pub fn with_observer(
        store: Arc<dyn Store>,
        base_path: impl Into<String>,
        observer: CacheObserver,
    ) -> Self {
        Self::build(store, base_path.into(), Some(observer))
    }

    fn build(store: Arc<dyn Store>, base_path: String, observer: Option<CacheObserver>) -> Self {
        Self {
            store,
            shared: Arc::new(Shared {
                base_path,
                entries: DashMap::new(),
                revisions: DashMap::new(),
                floor: AtomicU64::new(0),
                phase: Mutex::new(Phase::Idle),
                observer,
            }),
            subscription: Mutex::new(None),
            starting: Mutex::new(()),
        }
    }

    pub fn base_path(&self) -> &str {
        &self.shared.base_path
    }

    fn phase(&self) -> std::sync::MutexGuard<'_, Phase> {
        self.shared.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe, load the subtree, then replay anything that changed during the load.
    ///
    /// Blocks until the initial load completes. Calling it again once live is a
    /// no-op; after a failure it may be retried; after `close()` it fails.
    pub fn start(&self) -> ConfigResult<()> {
        let _starting = self.starting.lock().unwrap_or_else(PoisonError::into_inner);
        let base = self.shared.base_path.clone();
        {
            let mut phase = self.phase();
            if matches!(*phase, Phase::Live) {
                return Ok(());
            }
            if matches!(*phase, Phase::Closed) {
                return Err(ConfigError::CacheClosed(base));
            }
            *phase = Phase::Loading(Vec::new());
        }

        let unavailable = |source| ConfigError::StoreUnavailable {
            path: base.clone(),
            source,
        };

        let shared = self.shared.clone();
        let listener: EventListener = Arc::new(move |event: StoreEvent| shared.on_event(event));
        let id = match self.store.subscribe(&base, listener) {
            Ok(id) => id,
            Err(e) => {
                self.abandon_start();
                return Err(unavailable(e));
            }
        };
        *self.subscription.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);

        let snapshot = match self.load(&base) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.release_subscription();
                self.abandon_start();
                return Err(unavailable(e));
            }
        };

        let mut phase = self.phase();
        let buffered = match std::mem::replace(&mut *phase, Phase::Live) {
            Phase::Loading(buffered) => buffered,
            // Closed while loading.
            other => {
                *phase = other;
                drop(phase);
                self.release_subscription();
                return Err(ConfigError::CacheClosed(base));
            }
        };

        self.shared.reset();
        self.shared.floor.store(snapshot.revision, Ordering::Release);
        for (full, node) in snapshot.nodes {
            self.shared.revisions.insert(full.clone(), node.revision);
            self.shared.ingest(&full, node.data);
        }
        let replayed = buffered.len();
        for event in buffered {
            self.shared.apply(event);
        }
        drop(phase);

        metrics::record_cache_size(&base, self.shared.entries.len());
        tracing::info!(
            base = %base,
            entries = self.shared.entries.len(),
            revision = snapshot.revision,
            replayed,
            "Path cache started"
        );
        Ok(())
    }

    /// Return to `Idle` after a failed start, unless `close()` got there first.
    fn abandon_start(&self) {
        let mut phase = self.phase();
        if matches!(*phase, Phase::Loading(_)) {
            *phase = Phase::Idle;
        }
        self.shared.reset();
    }

    fn release_subscription(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = subscription {
            if let Err(e) = self.store.unsubscribe(id) {
                tracing::warn!(base = %self.shared.base_path, error = %e, "Failed to unsubscribe");
            }
        }
    }

    /// Read the subtree, retrying while the store's revision moves underneath the read.
    fn load(&self, base: &str) -> StoreResult<Snapshot> {
        let mut attempt = 1;
        loop {
            let before = self.store.revision()?;
            let mut nodes = Vec::new();
            self.collect(base, &mut nodes)?;
            let after = self.store.revision()?;
            if before == after {
                return Ok(Snapshot { revision: before, nodes });
            }
            if attempt == LOAD_ATTEMPTS {
                tracing::warn!(
                    base = %base,
                    attempts = attempt,
                    "Store kept changing during load, using per-node revisions only"
                );
                return Ok(Snapshot { revision: before, nodes });
            }
            tracing::debug!(base = %base, before, after, "Store changed during load, retrying");
            attempt += 1;
        }
    }

    fn collect(&self, node: &str, out: &mut Vec<(String, Node)>) -> StoreResult<()> {
        for child in self.store.children(node)? {
            let full = path::join(node, &child);
            if let Some(state) = self.store.read(&full)? {
                out.push((full.clone(), state));
            }
            self.collect(&full, out)?;
        }
        Ok(())
    }

    /// Last observed payload of `full_path`, if any. Never blocks on the store.
    pub fn current_data(&self, full_path: &str) -> Option<Payload> {
        self.shared.entries.get(full_path).map(|r| r.value().clone())
    }

    /// Number of nodes currently holding a usable payload.
    pub fn len(&self) -> usize {
        self.shared.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.entries.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.phase(), Phase::Closed)
    }

    /// Stop listening and drop all entries. Idempotent.
    pub fn close(&self) -> StoreResult<()> {
        {
            let mut phase = self.phase();
            if matches!(*phase, Phase::Closed) {
                return Ok(());
            }
            *phase = Phase::Closed;
            self.shared.reset();
        }
        // Unsubscribe outside the phase lock; the store may be delivering to us.
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::debug!(base = %self.shared.base_path, "Path cache closed");
        match subscription {
            Some(id) => self.store.unsubscribe(id),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for PathWatchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathWatchCache")
            .field("base_path", &self.shared.base_path)
            .field("entries", &self.shared.entries.len())
            .field("phase", &self.phase().name())
            .finish()
    }
}
