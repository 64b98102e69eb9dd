//! In-process hierarchical store.
//!
//! # Responsibilities
//! - Hold a tree of nodes keyed by absolute path
//! - Stamp every change with the next store revision
//! - Deliver change notifications to subscribers on a dedicated thread
//! - Simulate outages for failure testing
//!
//! # Design Decisions
//! - Events are queued while the tree lock is held, so delivery order is revision order
//! - Inline delivery is serialised by a second lock taken before the tree lock is released;
//!   inline listeners must not call back into the store
//! - The subscriber list is copy-on-write (`ArcSwap`): subscribe is rare, notify is hot

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;

use arc_swap::ArcSwap;

use crate::store::path;
use crate::store::{
    EventListener, Node, Payload, Store, StoreError, StoreEvent, StoreResult, SubscriptionId,
};

struct Subscriber {
    id: SubscriptionId,
    base_path: String,
    listener: EventListener,
}

impl Subscriber {
    fn wants(&self, event: &StoreEvent) -> bool {
        path::relative_to(&self.base_path, &event.path).is_some()
    }
}

type Batch = (Arc<Vec<Arc<Subscriber>>>, Vec<StoreEvent>);

enum Delivery {
    Inline(Mutex<()>),
    Background(mpsc::Sender<Batch>),
}

/// Node map plus the revision counter and the events of the mutation in progress.
#[derive(Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    revision: u64,
    events: Vec<StoreEvent>,
}

impl Tree {
    fn set(&mut self, path: &str, data: Payload) {
        self.revision += 1;
        let node = Node::new(data.clone(), self.revision);
        let event = match self.nodes.insert(path.to_string(), node) {
            Some(_) => StoreEvent::updated(path, data, self.revision),
            None => StoreEvent::added(path, data, self.revision),
        };
        self.events.push(event);
    }

    fn remove(&mut self, path: &str) {
        if self.nodes.remove(path).is_some() {
            self.revision += 1;
            self.events.push(StoreEvent::removed(path, self.revision));
        }
    }

    fn create_parents(&mut self, path: &str) {
        let mut missing = Vec::new();
        let mut current = path::parent(path);
        while let Some(p) = current {
            if p == "/" || self.nodes.contains_key(p) {
                break;
            }
            missing.push(p.to_string());
            current = path::parent(p);
        }
        for p in missing.into_iter().rev() {
            self.set(&p, empty_payload());
        }
    }
}

/// A thread-safe in-memory tree of nodes.
pub struct MemoryStore {
    tree: RwLock<Tree>,
    subscribers: ArcSwap<Vec<Arc<Subscriber>>>,
    next_id: AtomicU64,
    available: AtomicBool,
    delivery: Delivery,
}

impl MemoryStore {
    /// Create an empty store that delivers notifications on a background thread.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<Batch>();
        thread::Builder::new()
            .name("memory-store-events".into())
            .spawn(move || {
                for (subscribers, events) in rx {
                    deliver(&subscribers, events);
                }
            })
            .map(|_| Self::with_delivery(Delivery::Background(tx)))
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Cannot spawn notification thread, delivering inline");
                Self::with_inline_delivery()
            })
    }

    /// Create an empty store that notifies subscribers on the writing thread.
    pub fn with_inline_delivery() -> Self {
        Self::with_delivery(Delivery::Inline(Mutex::new(())))
    }

    fn with_delivery(delivery: Delivery) -> Self {
        Self {
            tree: RwLock::new(Tree::default()),
            subscribers: ArcSwap::from_pointee(Vec::new()),
            next_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
            delivery,
        }
    }

    /// Toggle simulated availability. While unavailable every operation fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Create `path` (with parents) holding `data`, or overwrite it if present.
    pub fn put(&self, path: &str, data: impl AsRef<[u8]>) -> StoreResult<()> {
        let path = checked(path)?;
        let data: Payload = Arc::from(data.as_ref());
        self.mutate(|tree| {
            tree.create_parents(&path);
            tree.set(&path, data);
            Ok(())
        })
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load().len()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".into()))
        }
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Tree) -> StoreResult<R>) -> StoreResult<R> {
        self.check_available()?;
        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut *tree);
        let events = std::mem::take(&mut tree.events);
        let result = result?;
        if events.is_empty() {
            return Ok(result);
        }

        let subscribers = self.subscribers.load_full();
        match &self.delivery {
            Delivery::Background(tx) => {
                if tx.send((subscribers, events)).is_err() {
                    tracing::warn!("Notification thread gone, dropping events");
                }
            }
            Delivery::Inline(order) => {
                let _order = order.lock().unwrap_or_else(PoisonError::into_inner);
                drop(tree);
                deliver(&subscribers, events);
            }
        }
        Ok(result)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("MemoryStore")
            .field("nodes", &tree.nodes.len())
            .field("revision", &tree.revision)
            .field("subscribers", &self.subscriber_count())
            .field("available", &self.available.load(Ordering::Relaxed))
            .finish()
    }
}

fn deliver(subscribers: &[Arc<Subscriber>], events: Vec<StoreEvent>) {
    for event in events {
        for subscriber in subscribers.iter().filter(|s| s.wants(&event)) {
            (subscriber.listener)(event.clone());
        }
    }
}

fn checked(raw: &str) -> StoreResult<String> {
    match path::normalize_base(raw) {
        Some(p) if p == raw => Ok(p),
        _ => Err(StoreError::InvalidPath(raw.to_string())),
    }
}

fn empty_payload() -> Payload {
    Arc::from(&[][..])
}

fn prefix_of(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{}/", path)
    }
}

impl Store for MemoryStore {
    fn children(&self, path: &str) -> StoreResult<Vec<String>> {
        self.check_available()?;
        let path = checked(path)?;
        let prefix = prefix_of(&path);
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tree
            .nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| {
                let rest = &k[prefix.len()..];
                (!rest.contains('/')).then(|| rest.to_string())
            })
            .collect())
    }

    fn read(&self, path: &str) -> StoreResult<Option<Node>> {
        self.check_available()?;
        let path = checked(path)?;
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tree.nodes.get(&path).cloned())
    }

    fn revision(&self) -> StoreResult<u64> {
        self.check_available()?;
        Ok(self.tree.read().unwrap_or_else(PoisonError::into_inner).revision)
    }

    fn subscribe(&self, base_path: &str, listener: EventListener) -> StoreResult<SubscriptionId> {
        self.check_available()?;
        let base_path = checked(base_path)?;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscriber = Arc::new(Subscriber {
            id,
            base_path,
            listener,
        });
        self.subscribers.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(subscriber.clone());
            next
        });
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> StoreResult<()> {
        self.subscribers.rcu(|current| {
            current
                .iter()
                .filter(|s| s.id != id)
                .cloned()
                .collect::<Vec<_>>()
        });
        Ok(())
    }

    fn create(&self, path: &str) -> StoreResult<()> {
        let path = checked(path)?;
        if path == "/" {
            return Ok(());
        }
        self.mutate(|tree| {
            if tree.nodes.contains_key(&path) {
                return Ok(());
            }
            tree.create_parents(&path);
            tree.set(&path, empty_payload());
            Ok(())
        })
    }

    fn write(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        let path = checked(path)?;
        let data: Payload = Arc::from(data);
        self.mutate(|tree| {
            if !tree.nodes.contains_key(&path) {
                return Err(StoreError::NotFound(path.clone()));
            }
            tree.set(&path, data);
            Ok(())
        })
    }

    fn delete(&self, path: &str) -> StoreResult<()> {
        let path = checked(path)?;
        let prefix = prefix_of(&path);
        self.mutate(|tree| {
            let mut doomed: Vec<String> = tree
                .nodes
                .keys()
                .filter(|k| **k == path || k.starts_with(&prefix))
                .cloned()
                .collect();
            // Children before parents.
            doomed.sort_by(|a, b| b.len().cmp(&a.len()));
            for key in doomed {
                tree.remove(&key);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EventKind;

    type Seen = Arc<Mutex<Vec<(EventKind, String, u64)>>>;

    fn recorder() -> (EventListener, Seen) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: EventListener = Arc::new(move |event: StoreEvent| {
            sink.lock().unwrap().push((event.kind, event.path, event.revision));
        });
        (listener, seen)
    }

    #[test]
    fn test_put_read_and_children() {
        let store = MemoryStore::with_inline_delivery();
        store.put("/cfg/primary/hostname", "a").unwrap();
        store.put("/cfg/primary/db/host", "b").unwrap();

        assert_eq!(&*store.read("/cfg/primary/hostname").unwrap().unwrap().data, b"a");
        assert!(store.read("/cfg/primary/missing").unwrap().is_none());

        let mut children = store.children("/cfg/primary").unwrap();
        children.sort();
        assert_eq!(children, vec!["db".to_string(), "hostname".to_string()]);
        assert!(store.children("/nowhere").unwrap().is_empty());
        assert_eq!(store.children("/").unwrap(), vec!["cfg".to_string()]);
    }

    #[test]
    fn test_create_is_idempotent_and_write_requires_node() {
        let store = MemoryStore::with_inline_delivery();
        assert!(matches!(
            store.write("/a/b", b"x"),
            Err(StoreError::NotFound(_))
        ));
        store.create("/a/b").unwrap();
        store.create("/a/b").unwrap();
        assert_eq!(store.read("/a/b").unwrap().unwrap().data.len(), 0);
        store.write("/a/b", b"x").unwrap();
        assert_eq!(&*store.read("/a/b").unwrap().unwrap().data, b"x");
    }

    #[test]
    fn test_subscription_scope_and_unsubscribe() {
        let store = MemoryStore::with_inline_delivery();
        let (listener, seen) = recorder();
        let id = store.subscribe("/cfg", listener).unwrap();

        store.put("/cfg/port", "1").unwrap();
        store.put("/cfg/port", "2").unwrap();
        store.put("/other/port", "3").unwrap();
        store.delete("/cfg/port").unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (EventKind::Added, "/cfg/port".to_string(), 2),
                (EventKind::Updated, "/cfg/port".to_string(), 3),
                (EventKind::Removed, "/cfg/port".to_string(), 6),
            ]
        );

        store.unsubscribe(id).unwrap();
        store.put("/cfg/port", "4").unwrap();
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn test_outage() {
        let store = MemoryStore::with_inline_delivery();
        store.set_available(false);
        assert!(matches!(store.read("/a"), Err(StoreError::Unavailable(_))));
        assert!(matches!(store.put("/a", "x"), Err(StoreError::Unavailable(_))));
        assert!(matches!(store.revision(), Err(StoreError::Unavailable(_))));
        store.set_available(true);
        store.put("/a", "x").unwrap();
    }

    #[test]
    fn test_revisions_advance_per_change() {
        let store = MemoryStore::with_inline_delivery();
        assert_eq!(store.revision().unwrap(), 0);

        // Parent and child each take a revision.
        store.put("/cfg/port", "1").unwrap();
        assert_eq!(store.revision().unwrap(), 2);
        assert_eq!(store.read("/cfg").unwrap().unwrap().revision, 1);
        assert_eq!(store.read("/cfg/port").unwrap().unwrap().revision, 2);

        store.put("/cfg/port", "2").unwrap();
        assert_eq!(store.read("/cfg/port").unwrap().unwrap().revision, 3);

        // Failed and no-op mutations do not advance the revision.
        assert!(store.write("/cfg/missing", b"x").is_err());
        store.create("/cfg/port").unwrap();
        store.delete("/nowhere").unwrap();
        assert_eq!(store.revision().unwrap(), 3);

        store.delete("/cfg").unwrap();
        assert_eq!(store.revision().unwrap(), 5);
    }

    #[test]
    fn test_rejects_relative_paths() {
        let store = MemoryStore::with_inline_delivery();
        assert!(matches!(store.read("a/b"), Err(StoreError::InvalidPath(_))));
        assert!(matches!(store.read("/a/b/"), Err(StoreError::InvalidPath(_))));
    }

    #[test]
    fn test_background_delivery_preserves_order() {
        let store = MemoryStore::new();
        let (listener, seen) = recorder();
        store.subscribe("/cfg", listener).unwrap();
        for i in 0..50 {
            store.put("/cfg/counter", i.to_string()).unwrap();
        }

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while seen.lock().unwrap().len() < 50 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 50);
        assert!(seen.windows(2).all(|w| w[0].2 < w[1].2));
        assert_eq!(seen[0].0, EventKind::Added);
        assert!(seen[1..].iter().all(|(kind, _, _)| *kind == EventKind::Updated));
    }
}
