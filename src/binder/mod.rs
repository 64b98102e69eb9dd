//! Binding engine.
//!
//! # Data Flow
//! ```text
//! ConfigBinder::bind(store, target, base_paths)
//!     → normalise base paths            (absolute, no trailing slash)
//!     → registry.rs                     (members → BindingSpec per logical name)
//!     → PathWatchCache::start per base  (blocking initial load, priority order)
//!     → dispatcher.rs                   (AccessDispatcher over caches + registry)
//!
//! dispatcher.get(name)  → caches[0..n] → default → zero value
//! dispatcher.set(name)  → store.create + store.write on caches[0] only
//! ```
//!
//! # Design Decisions
//! - No partial binder: if any cache fails to start, started caches are closed
//! - The store is borrowed, never closed by the binder
//! - `close()` is explicit and best-effort; there is no cleanup on drop

pub mod coerce;
pub mod dispatcher;
pub mod registry;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::cache::{CacheEvent, CacheObserver, PathWatchCache};
use crate::error::{ConfigError, ConfigResult};
use crate::store::{path, EventKind, Store};

pub use coerce::{Coercer, TextCoercer, TypeTag, Value};
pub use dispatcher::AccessDispatcher;
pub use registry::{
    BindTarget, BindingRegistry, BindingSpec, DeclarationStyle, MemberDescriptor, MemberKind,
    TargetDescriptor,
};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A bound member changed in one of the mirrored subtrees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    pub name: String,
    pub base_path: String,
    pub kind: EventKind,
}

/// Owns the caches behind a bound configuration.
pub struct ConfigBinder {
    caches: Vec<Arc<PathWatchCache>>,
    dispatcher: AccessDispatcher,
    changes: broadcast::Sender<ConfigChange>,
    closed: AtomicBool,
}

impl ConfigBinder {
    /// Bind `target` to `base_paths` (primary first) using the default coercer.
    pub fn bind<T: BindTarget + ?Sized>(
        store: Arc<dyn Store>,
        target: &T,
        base_paths: &[&str],
    ) -> ConfigResult<Self> {
        Self::bind_with(store, target, base_paths, Arc::new(TextCoercer))
    }

    /// Bind with an explicit coercer.
    pub fn bind_with<T: BindTarget + ?Sized>(
        store: Arc<dyn Store>,
        target: &T,
        base_paths: &[&str],
        coercer: Arc<dyn Coercer>,
    ) -> ConfigResult<Self> {
        let base_paths = normalize_base_paths(base_paths)?;
        let registry = Arc::new(BindingRegistry::build(&target.describe_members())?);
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        let mut caches: Vec<Arc<PathWatchCache>> = Vec::with_capacity(base_paths.len());
        for base in &base_paths {
            let observer = change_observer(registry.clone(), changes.clone());
            let cache = Arc::new(PathWatchCache::with_observer(store.clone(), base.clone(), observer));
            if let Err(e) = cache.start() {
                tracing::error!(base = %base, error = %e, "Cache failed to start, unwinding bind");
                for started in &caches {
                    if let Err(close_err) = started.close() {
                        tracing::warn!(base = %started.base_path(), error = %close_err, "Failed to close cache");
                    }
                }
                return Err(e);
            }
            caches.push(cache);
        }

        tracing::info!(
            base_paths = ?base_paths,
            members = registry.len(),
            "Config bound"
        );

        let dispatcher = AccessDispatcher::new(store, caches.clone(), registry, coercer);
        Ok(Self {
            caches,
            dispatcher,
            changes,
            closed: AtomicBool::new(false),
        })
    }

    /// The bound accessor surface.
    pub fn config(&self) -> &AccessDispatcher {
        &self.dispatcher
    }

    /// Normalised base paths in priority order.
    pub fn base_paths(&self) -> Vec<&str> {
        self.caches.iter().map(|c| c.base_path()).collect()
    }

    /// Receive a [`ConfigChange`] for every notification that touches a bound member.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.changes.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release every cache. Failures are logged, never returned. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for cache in &self.caches {
            if let Err(e) = cache.close() {
                tracing::warn!(base = %cache.base_path(), error = %e, "Failed to close cache");
            }
        }
        tracing::info!("Config binder closed");
    }
}

impl std::fmt::Debug for ConfigBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigBinder")
            .field("base_paths", &self.base_paths())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn normalize_base_paths(raw: &[&str]) -> ConfigResult<Vec<String>> {
    if raw.is_empty() {
        return Err(ConfigError::Binding("at least one base path is required".into()));
    }
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for candidate in raw {
        let normalized = path::normalize_base(candidate)
            .ok_or_else(|| ConfigError::Binding(format!("invalid base path '{}'", candidate)))?;
        if !seen.insert(normalized.clone()) {
            return Err(ConfigError::Binding(format!("duplicate base path '{}'", normalized)));
        }
        out.push(normalized);
    }
    Ok(out)
}

fn change_observer(
    registry: Arc<BindingRegistry>,
    changes: broadcast::Sender<ConfigChange>,
) -> CacheObserver {
    Arc::new(move |event: &CacheEvent| {
        let Some(relative) = path::relative_to(&event.base_path, &event.path) else {
            return;
        };
        for name in registry.names_for_path(relative) {
            // No receivers is fine.
            let _ = changes.send(ConfigChange {
                name: name.to_string(),
                base_path: event.base_path.clone(),
                kind: event.kind,
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn target() -> TargetDescriptor {
        TargetDescriptor::accessors()
            .read_write(MemberDescriptor::getter("hostname", TypeTag::String))
            .member(MemberDescriptor::getter("port", TypeTag::Integer).value("hostport"))
    }

    #[test]
    fn test_base_path_validation() {
        assert_eq!(
            normalize_base_paths(&["test/path/", "/other"]).unwrap(),
            vec!["/test/path".to_string(), "/other".to_string()]
        );
        assert!(normalize_base_paths(&[]).is_err());
        assert!(normalize_base_paths(&[""]).is_err());
        assert!(normalize_base_paths(&["/a", "/a/"]).is_err());
    }

    #[test]
    fn test_bind_and_close() {
        let store = Arc::new(MemoryStore::with_inline_delivery());
        let binder = ConfigBinder::bind(store.clone(), &target(), &["/test/path/"]).unwrap();
        assert_eq!(binder.base_paths(), vec!["/test/path"]);
        assert_eq!(store.subscriber_count(), 1);

        binder.close();
        binder.close();
        assert!(binder.is_closed());
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn test_failed_bind_leaves_no_subscriptions() {
        let store = Arc::new(MemoryStore::with_inline_delivery());
        let err = ConfigBinder::bind(store.clone(), &TargetDescriptor::fields(), &["/cfg"]).unwrap_err();
        assert!(matches!(err, ConfigError::Binding(_)));
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn test_change_events() {
        let store = Arc::new(MemoryStore::with_inline_delivery());
        let binder = ConfigBinder::bind(store.clone(), &target(), &["/cfg"]).unwrap();
        let mut rx = binder.subscribe();

        store.put("/cfg/hostport", "9090").unwrap();
        store.put("/cfg/unrelated", "x").unwrap();

        let change = rx.try_recv().unwrap();
        assert_eq!(change.name, "port");
        assert_eq!(change.base_path, "/cfg");
        assert_eq!(change.kind, EventKind::Added);
        assert!(rx.try_recv().is_err());
        binder.close();
    }
}
