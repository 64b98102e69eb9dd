//! Local read-through caching of store subtrees.
//!
//! # Data Flow
//! ```text
//! PathWatchCache::start()
//!     → store.subscribe(base)        events buffered until the load finishes
//!     → children()/read() recursively (blocking initial load)
//!     → replay buffered events       cache is now live
//!
//! store notification thread
//!     → apply(event)                 per-key replace/remove in a DashMap
//!     → observer(CacheEvent)         optional, used for change fan-out
//!
//! AccessDispatcher::get()
//!     → current_data(full_path)      memory only, never blocks on the store
//! ```
//!
//! # Design Decisions
//! - One cache per base path; the binder owns them exclusively
//! - Payloads are replaced whole, so readers never see a torn value
//! - Empty or non-UTF-8 payloads are recorded as absent for that path only

pub mod path_cache;

pub use path_cache::{CacheEvent, CacheObserver, PathWatchCache};
