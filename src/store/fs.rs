//! Directory-tree store.
//!
//! Maps store paths onto a root directory: files are nodes with payloads,
//! directories are nodes without one. Change notifications come from a
//! recursive filesystem watcher per subscription.
//!
//! Revisions come from a store-local clock. Reads and watcher events take the
//! clock lock around the disk read, so a higher revision always means a later
//! look at the file.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::store::path;
use crate::store::{
    EventListener, Node, Payload, Store, StoreError, StoreEvent, StoreResult, SubscriptionId,
};

type Clock = Arc<Mutex<u64>>;

/// A store rooted at a local directory.
pub struct FsStore {
    root: PathBuf,
    watchers: Mutex<HashMap<SubscriptionId, RecommendedWatcher>>,
    next_id: AtomicU64,
    clock: Clock,
}

impl FsStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        fs::create_dir_all(root.as_ref())?;
        let root = fs::canonicalize(root.as_ref())?;
        tracing::debug!(root = ?root, "Opened filesystem store");
        Ok(Self {
            root,
            watchers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            clock: Arc::new(Mutex::new(0)),
        })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn locate(&self, raw: &str) -> StoreResult<PathBuf> {
        let normalized = path::normalize_base(raw)
            .filter(|p| p == raw)
            .ok_or_else(|| StoreError::InvalidPath(raw.to_string()))?;
        if normalized.split('/').any(|s| s.starts_with('.')) {
            return Err(StoreError::InvalidPath(raw.to_string()));
        }
        Ok(self.root.join(normalized.trim_start_matches('/')))
    }

    /// Closest existing directory at or above `dir`, never above the root.
    fn watch_target(&self, dir: &Path) -> PathBuf {
        dir.ancestors()
            .take_while(|p| p.starts_with(&self.root))
            .find(|p| p.is_dir())
            .unwrap_or(self.root.as_path())
            .to_path_buf()
    }
}

impl std::fmt::Debug for FsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsStore").field("root", &self.root).finish()
    }
}

/// Translate a filesystem path under `root` back into a store path.
fn store_path(root: &Path, fs_path: &Path) -> Option<String> {
    let rest = fs_path.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in rest.components() {
        match component {
            Component::Normal(name) => {
                let name = name.to_str()?;
                if name.starts_with('.') {
                    return None;
                }
                segments.push(name);
            }
            _ => return None,
        }
    }
    Some(format!("/{}", segments.join("/")))
}

fn empty_payload() -> Payload {
    Arc::from(&[][..])
}

fn read_node(fs_path: &Path) -> StoreResult<Option<Payload>> {
    match fs::metadata(fs_path) {
        Ok(meta) if meta.is_dir() => Ok(Some(empty_payload())),
        Ok(_) => Ok(Some(Arc::from(fs::read(fs_path)?))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Read `fs_path` under the clock and build the event describing its current state.
fn observe(clock: &Clock, fs_path: &Path, node: String, created: bool) -> Option<StoreEvent> {
    let mut revision = clock.lock().unwrap_or_else(PoisonError::into_inner);
    let state = read_node(fs_path);
    *revision += 1;
    match state {
        Ok(Some(data)) if created => Some(StoreEvent::added(node, data, *revision)),
        // Directory modifications only mean their listing changed.
        Ok(Some(_)) if fs_path.is_dir() => None,
        Ok(Some(data)) => Some(StoreEvent::updated(node, data, *revision)),
        Ok(None) => Some(StoreEvent::removed(node, *revision)),
        Err(e) => {
            tracing::warn!(path = %node, error = %e, "Failed to read changed node");
            None
        }
    }
}

/// Whether `node` is `base_path`, above it, or below it.
fn on_base_line(base_path: &str, node: &str) -> bool {
    node == base_path
        || path::relative_to(base_path, node).is_some()
        || path::relative_to(node, base_path).is_some()
}

/// Report everything below a newly created directory.
///
/// The watcher only attaches to a new directory after it appears, so entries
/// created in between would otherwise go unreported.
fn scan_created_dir(root: &Path, base_path: &str, dir: &Path, clock: &Clock, listener: &EventListener) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let fs_path = entry.path();
        let Some(node) = store_path(root, &fs_path) else {
            continue;
        };
        if !on_base_line(base_path, &node) {
            continue;
        }
        if path::relative_to(base_path, &node).is_some() {
            if let Some(event) = observe(clock, &fs_path, node, true) {
                listener(event);
            }
        }
        if fs_path.is_dir() {
            scan_created_dir(root, base_path, &fs_path, clock, listener);
        }
    }
}

fn handle_event(root: &Path, base_path: &str, event: &Event, clock: &Clock, listener: &EventListener) {
    let created = event.kind.is_create();
    if !(created || event.kind.is_modify() || event.kind.is_remove()) {
        return;
    }

    for fs_path in &event.paths {
        let Some(node) = store_path(root, fs_path) else {
            continue;
        };
        if !on_base_line(base_path, &node) {
            continue;
        }
        if path::relative_to(base_path, &node).is_some() {
            // Resolve against current state; the event kind alone is not reliable across renames.
            if let Some(change) = observe(clock, fs_path, node, created) {
                listener(change);
            }
        }
        if created && fs_path.is_dir() {
            scan_created_dir(root, base_path, fs_path, clock, listener);
        }
    }
}

impl Store for FsStore {
    fn children(&self, path: &str) -> StoreResult<Vec<String>> {
        let dir = self.locate(path)?;
        if dir.is_file() {
            return Ok(Vec::new());
        }
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Ok(name) = entry.file_name().into_string() {
                if !name.starts_with('.') {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn read(&self, path: &str) -> StoreResult<Option<Node>> {
        let target = self.locate(path)?;
        let revision = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(read_node(&target)?.map(|data| Node::new(data, *revision)))
    }

    fn revision(&self) -> StoreResult<u64> {
        Ok(*self.clock.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn subscribe(&self, base_path: &str, listener: EventListener) -> StoreResult<SubscriptionId> {
        let dir = self.locate(base_path)?;
        // A base path that does not exist yet is watched from its closest existing ancestor.
        let target = self.watch_target(&dir);

        let root = self.root.clone();
        let base = base_path.to_string();
        let clock = self.clock.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => handle_event(&root, &base, &event, &clock, &listener),
            Err(e) => tracing::error!("Watch error: {:?}", e),
        })?;
        watcher.watch(&target, RecursiveMode::Recursive)?;

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, watcher);
        tracing::debug!(base = %base_path, watching = ?target, "Filesystem watch started");
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> StoreResult<()> {
        // Dropping the watcher stops delivery.
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        Ok(())
    }

    fn create(&self, path: &str) -> StoreResult<()> {
        let target = self.locate(path)?;
        if target.exists() {
            return Ok(());
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        let target = self.locate(path)?;
        match fs::metadata(&target) {
            Ok(meta) if meta.is_dir() => {
                return Err(StoreError::InvalidPath(format!("{} is a directory", path)));
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(path.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        // Write beside the target and rename over it so watchers never see a partial file.
        let parent = target
            .parent()
            .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tmp = parent.join(format!(".{}.{}.{}.tmp", file_name, std::process::id(), seq));
        fs::write(&tmp, data)?;
        if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn delete(&self, path: &str) -> StoreResult<()> {
        let target = self.locate(path)?;
        let result = match fs::metadata(&target) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&target),
            Ok(_) => fs::remove_file(&target),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
