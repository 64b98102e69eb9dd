//! Hierarchical key-value store boundary.
//!
//! # Data Flow
//! ```text
//! Store (external: ZooKeeper-like tree of nodes, each with a byte payload)
//!     → children()/read()     initial subtree load by PathWatchCache::start
//!     → revision()            detects changes racing the load
//!     → subscribe(listener)   ADDED/UPDATED/REMOVED events on a store-owned thread
//!     ← create()/write()      AccessDispatcher::set on the primary base path
//! ```
//!
//! # Design Decisions
//! - The binder never owns the store; it only borrows an `Arc<dyn Store>`
//! - Listeners receive events for strict descendants of the subscribed base path
//! - Per-path event order is the store's responsibility
//! - Every change carries a store-wide revision (like a ZooKeeper zxid), so readers
//!   can tell a late notification from a newer one
//! - Two implementations ship with the crate: an in-process tree and a directory tree

pub mod fs;
pub mod memory;
pub mod path;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub use fs::FsStore;
pub use memory::MemoryStore;

/// Raw node payload. Cheap to clone, never mutated in place.
pub type Payload = Arc<[u8]>;

/// Callback invoked by the store for each change under a subscribed base path.
pub type EventListener = Arc<dyn Fn(StoreEvent) + Send + Sync>;

/// Kind of change reported by a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Added,
    Updated,
    Removed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Added => "added",
            EventKind::Updated => "updated",
            EventKind::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// A node as read from the store.
#[derive(Debug, Clone)]
pub struct Node {
    pub data: Payload,
    /// Store revision at which this state was current.
    pub revision: u64,
}

impl Node {
    pub fn new(data: Payload, revision: u64) -> Self {
        Self { data, revision }
    }
}

/// A change notification for a single node.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub kind: EventKind,
    /// Absolute path of the changed node.
    pub path: String,
    /// New payload for `Added`/`Updated`, `None` for `Removed`.
    pub data: Option<Payload>,
    /// Store revision of this change. Strictly increasing per store.
    pub revision: u64,
}

impl StoreEvent {
    pub fn added(path: impl Into<String>, data: Payload, revision: u64) -> Self {
        Self {
            kind: EventKind::Added,
            path: path.into(),
            data: Some(data),
            revision,
        }
    }

    pub fn updated(path: impl Into<String>, data: Payload, revision: u64) -> Self {
        Self {
            kind: EventKind::Updated,
            path: path.into(),
            data: Some(data),
            revision,
        }
    }

    pub fn removed(path: impl Into<String>, revision: u64) -> Self {
        Self {
            kind: EventKind::Removed,
            path: path.into(),
            data: None,
            revision,
        }
    }
}

/// Handle returned by [`Store::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Errors reported by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is not reachable (no connection, session lost).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The addressed node does not exist.
    #[error("node not found: {0}")]
    NotFound(String),

    /// The path cannot be represented by this store.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Client-side view of a hierarchical store.
pub trait Store: Send + Sync {
    /// Names of the direct children of `path`. Empty if the node does not exist.
    fn children(&self, path: &str) -> StoreResult<Vec<String>>;

    /// Current state of `path`, or `None` if the node does not exist.
    fn read(&self, path: &str) -> StoreResult<Option<Node>>;

    /// Revision of the most recent change the store has published.
    ///
    /// Unchanged across a sequence of reads means those reads saw one consistent state.
    fn revision(&self) -> StoreResult<u64>;

    /// Register `listener` for changes below `base_path`.
    fn subscribe(&self, base_path: &str, listener: EventListener) -> StoreResult<SubscriptionId>;

    /// Remove a listener. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId) -> StoreResult<()>;

    /// Create `path` (and missing parents) with an empty payload. No-op if it exists.
    fn create(&self, path: &str) -> StoreResult<()>;

    /// Overwrite the payload of an existing node.
    fn write(&self, path: &str, data: &[u8]) -> StoreResult<()>;

    /// Remove `path` and everything below it. No-op if it does not exist.
    fn delete(&self, path: &str) -> StoreResult<()>;
}
