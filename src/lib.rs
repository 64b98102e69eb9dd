//! Configuration binder over a hierarchical key-value store.
//!
//! Declared configuration members are bound to nodes under one or more base
//! paths. Each base path is mirrored by a watch-driven cache; reads walk the
//! caches in priority order and fall back to defaults, writes go to the
//! primary base path.

pub mod binder;
pub mod cache;
pub mod config;
pub mod error;
pub mod observability;
pub mod store;

pub use binder::{
    AccessDispatcher, BindTarget, Coercer, ConfigBinder, ConfigChange, MemberDescriptor,
    TargetDescriptor, TextCoercer, TypeTag, Value,
};
pub use config::BinderConfig;
pub use error::{ConfigError, ConfigResult};
pub use store::{FsStore, MemoryStore, Store, StoreError};
