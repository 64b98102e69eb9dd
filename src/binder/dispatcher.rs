//! Translation of logical get/set calls into cache reads and store writes.
//!
//! # Responsibilities
//! - Resolve a logical name to its [`BindingSpec`]
//! - `get`: first cache (priority order) holding the path wins, else default, else zero value
//! - `set`: write through to the primary base path only
//! - Coerce between payload text and typed values via the injected [`Coercer`]
//!
//! # Design Decisions
//! - `get` is a pure memory read; `set` does not wait for the notification round-trip
//! - Create-then-write is not atomic; an empty node reads as absent until the next `set`

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::binder::coerce::{Coercer, TypeTag, Value};
use crate::binder::registry::{BindingRegistry, BindingSpec};
use crate::cache::PathWatchCache;
use crate::error::{ConfigError, ConfigResult};
use crate::observability::metrics;
use crate::store::{path, Store};

struct Inner {
    store: Arc<dyn Store>,
    caches: Vec<Arc<PathWatchCache>>,
    registry: Arc<BindingRegistry>,
    coercer: Arc<dyn Coercer>,
}

/// The accessor surface of a bound configuration.
///
/// Cheap to clone; clones share the same caches. Typed accessors are written
/// on top of [`get_as`](Self::get_as) and [`set_as`](Self::set_as).
#[derive(Clone)]
pub struct AccessDispatcher {
    inner: Arc<Inner>,
}

impl AccessDispatcher {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        caches: Vec<Arc<PathWatchCache>>,
        registry: Arc<BindingRegistry>,
        coercer: Arc<dyn Coercer>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                caches,
                registry,
                coercer,
            }),
        }
    }

    pub fn registry(&self) -> &BindingRegistry {
        &self.inner.registry
    }

    /// The binding for `name`.
    pub fn spec(&self, name: &str) -> ConfigResult<&BindingSpec> {
        self.inner
            .registry
            .get(name)
            .ok_or_else(|| ConfigError::UnknownMember(name.to_string()))
    }

    /// Generic intercepted call: no arguments reads, one argument writes.
    pub fn invoke(&self, name: &str, args: &[Value]) -> ConfigResult<Option<Value>> {
        match args {
            [] => self.get(name).map(Some),
            [value] => self.set(name, value.clone()).map(|()| None),
            _ => Err(ConfigError::InvalidCallShape {
                name: name.to_string(),
                arity: args.len(),
            }),
        }
    }

    /// Current value of `name`, falling back to its default and then its type's zero value.
    pub fn get(&self, name: &str) -> ConfigResult<Value> {
        let spec = self.spec(name)?;

        for cache in &self.inner.caches {
            let full_path = path::join(cache.base_path(), &spec.resolved_path);
            if let Some(raw) = cache.current_data(&full_path) {
                let text = std::str::from_utf8(&raw)
                    .map_err(|e| ConfigError::coercion(spec.declared_type, String::from_utf8_lossy(&raw), e))?;
                metrics::record_lookup("hit");
                return self.inner.coercer.decode(text, spec.declared_type);
            }
        }

        match &spec.default_value {
            Some(default) => {
                metrics::record_lookup("default");
                self.inner.coercer.decode(default, spec.declared_type)
            }
            None => {
                metrics::record_lookup("zero");
                Ok(Value::zero(spec.declared_type))
            }
        }
    }

    /// Current value of `name`, deserialized into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> ConfigResult<T> {
        let declared = self.spec(name)?.declared_type;
        let value = self.get(name)?;
        serde_json::from_value(value.to_json())
            .map_err(|e| ConfigError::coercion(declared, format!("{:?}", value), e))
    }

    /// Write `value` to the primary base path.
    ///
    /// Returns once the store accepted the write; the cached value changes when
    /// the store's notification arrives. An empty string is rejected with
    /// [`ConfigError::TypeCoercion`] because it would read back as absent; use
    /// [`unset`](Self::unset) instead.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> ConfigResult<()> {
        let spec = self.spec(name)?;
        if !spec.writable {
            return Err(ConfigError::ReadOnlyMember(name.to_string()));
        }
        let text = self.inner.coercer.encode(&value.into(), spec.declared_type)?;

        let primary = self
            .inner
            .caches
            .first()
            .ok_or_else(|| ConfigError::Binding("no base path to write to".into()))?;
        let full_path = path::join(primary.base_path(), &spec.resolved_path);
        let write_failed = |source| ConfigError::StoreWrite {
            path: full_path.clone(),
            source,
        };

        let result = self
            .inner
            .store
            .create(&full_path)
            .and_then(|()| self.inner.store.write(&full_path, text.as_bytes()));
        metrics::record_store_write(result.is_ok());
        result.map_err(write_failed)?;

        tracing::debug!(name = %name, path = %full_path, "Config value written");
        Ok(())
    }

    /// Serialize `value` and write it to the primary base path.
    pub fn set_as<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> ConfigResult<()> {
        let declared = self.spec(name)?.declared_type;
        let json = serde_json::to_value(value)
            .map_err(|e| ConfigError::coercion(declared, "<unserializable>", e))?;
        let value = match declared {
            TypeTag::Structured => Value::Structured(json),
            _ => Value::from_json(json),
        };
        self.set(name, value)
    }

    /// Remove `name` from the primary base path so lower-priority paths or the
    /// default apply again.
    pub fn unset(&self, name: &str) -> ConfigResult<()> {
        let spec = self.spec(name)?;
        if !spec.writable {
            return Err(ConfigError::ReadOnlyMember(name.to_string()));
        }
        let primary = self
            .inner
            .caches
            .first()
            .ok_or_else(|| ConfigError::Binding("no base path to write to".into()))?;
        let full_path = path::join(primary.base_path(), &spec.resolved_path);

        let result = self.inner.store.delete(&full_path);
        metrics::record_store_write(result.is_ok());
        result.map_err(|source| ConfigError::StoreWrite {
            path: full_path.clone(),
            source,
        })?;

        tracing::debug!(name = %name, path = %full_path, "Config value removed");
        Ok(())
    }

    /// Every bound member's current value, keyed by logical name.
    pub fn snapshot(&self) -> ConfigResult<Map<String, Json>> {
        let mut map = Map::new();
        for spec in self.inner.registry.specs() {
            map.insert(spec.logical_name.clone(), self.get(&spec.logical_name)?.to_json());
        }
        Ok(map)
    }

    /// Populate a field-style struct from the current values.
    pub fn snapshot_as<T: DeserializeOwned>(&self) -> ConfigResult<T> {
        let map = self.snapshot()?;
        serde_json::from_value(Json::Object(map))
            .map_err(|e| ConfigError::coercion(TypeTag::Structured, "<snapshot>", e))
    }
}

impl std::fmt::Debug for AccessDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessDispatcher")
            .field("caches", &self.inner.caches)
            .field("members", &self.inner.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::coerce::TextCoercer;
    use crate::binder::registry::{MemberDescriptor, TargetDescriptor};
    use crate::store::MemoryStore;
    use serde::Deserialize;
    use serde_json::json;

    fn dispatcher(store: Arc<MemoryStore>, bases: &[&str]) -> AccessDispatcher {
        let target = TargetDescriptor::accessors()
            .read_write(MemberDescriptor::getter("hostname", TypeTag::String))
            .member(MemberDescriptor::getter("port", TypeTag::Integer).value("hostport"))
            .member(MemberDescriptor::getter("debug", TypeTag::Bool))
            .member(MemberDescriptor::getter("ratio", TypeTag::Float).default_value("0.5"))
            .read_write(MemberDescriptor::getter("limits", TypeTag::Structured));
        let registry = Arc::new(BindingRegistry::build(&target).unwrap());
        let caches = bases
            .iter()
            .map(|b| {
                let cache = Arc::new(PathWatchCache::new(store.clone(), *b));
                cache.start().unwrap();
                cache
            })
            .collect();
        AccessDispatcher::new(store, caches, registry, Arc::new(TextCoercer))
    }

    #[test]
    fn test_zero_and_default_values() {
        let store = Arc::new(MemoryStore::with_inline_delivery());
        let d = dispatcher(store, &["/cfg"]);
        assert_eq!(d.get("hostname").unwrap(), Value::Absent);
        assert_eq!(d.get("port").unwrap(), Value::Integer(0));
        assert_eq!(d.get("debug").unwrap(), Value::Bool(false));
        assert_eq!(d.get("ratio").unwrap(), Value::Float(0.5));
        assert_eq!(d.get("limits").unwrap(), Value::Absent);
        assert_eq!(d.get_as::<Option<String>>("hostname").unwrap(), None);
    }

    #[test]
    fn test_priority_order() {
        let store = Arc::new(MemoryStore::with_inline_delivery());
        store.put("/b/hostname", "from-b").unwrap();
        let d = dispatcher(store.clone(), &["/a", "/b"]);
        assert_eq!(d.get("hostname").unwrap(), Value::Text("from-b".into()));

        store.put("/a/hostname", "from-a").unwrap();
        assert_eq!(d.get("hostname").unwrap(), Value::Text("from-a".into()));

        store.delete("/a/hostname").unwrap();
        assert_eq!(d.get("hostname").unwrap(), Value::Text("from-b".into()));
    }

    #[test]
    fn test_coercion_failure_surfaces() {
        let store = Arc::new(MemoryStore::with_inline_delivery());
        store.put("/cfg/hostport", "not-a-number").unwrap();
        let d = dispatcher(store, &["/cfg"]);
        assert!(matches!(
            d.get("port"),
            Err(ConfigError::TypeCoercion { declared: TypeTag::Integer, .. })
        ));
    }

    #[test]
    fn test_set_writes_primary_only() {
        let store = Arc::new(MemoryStore::with_inline_delivery());
        let d = dispatcher(store.clone(), &["/a", "/b"]);
        d.set("hostname", "x").unwrap();
        assert_eq!(&*store.read("/a/hostname").unwrap().unwrap().data, b"x");
        assert!(store.read("/b/hostname").unwrap().is_none());
        assert_eq!(d.get("hostname").unwrap(), Value::Text("x".into()));
    }

    #[test]
    fn test_set_rejects_read_only_and_bad_values() {
        let store = Arc::new(MemoryStore::with_inline_delivery());
        let d = dispatcher(store.clone(), &["/cfg"]);
        assert!(matches!(
            d.set("port", 8080),
            Err(ConfigError::ReadOnlyMember(name)) if name == "port"
        ));
        assert!(matches!(d.get("nope"), Err(ConfigError::UnknownMember(_))));
        assert!(matches!(
            d.set("limits", Value::Absent),
            Err(ConfigError::TypeCoercion { .. })
        ));
        assert!(store.read("/cfg/limits").unwrap().is_none());
    }

    #[test]
    fn test_set_rejects_empty_string() {
        let store = Arc::new(MemoryStore::with_inline_delivery());
        store.put("/b/hostname", "from-b").unwrap();
        let d = dispatcher(store.clone(), &["/a", "/b"]);
        assert!(matches!(
            d.set("hostname", ""),
            Err(ConfigError::TypeCoercion { declared: TypeTag::String, .. })
        ));
        assert!(store.read("/a/hostname").unwrap().is_none());
        assert_eq!(d.get("hostname").unwrap(), Value::Text("from-b".into()));
    }

    #[test]
    fn test_unset_falls_back() {
        let store = Arc::new(MemoryStore::with_inline_delivery());
        store.put("/b/hostname", "from-b").unwrap();
        let d = dispatcher(store.clone(), &["/a", "/b"]);
        d.set("hostname", "from-a").unwrap();
        assert_eq!(d.get("hostname").unwrap(), Value::Text("from-a".into()));

        d.unset("hostname").unwrap();
        assert_eq!(d.get("hostname").unwrap(), Value::Text("from-b".into()));
        assert!(matches!(d.unset("port"), Err(ConfigError::ReadOnlyMember(_))));
    }

    #[test]
    fn test_set_surfaces_store_failure() {
        let store = Arc::new(MemoryStore::with_inline_delivery());
        let d = dispatcher(store.clone(), &["/cfg"]);
        store.set_available(false);
        assert!(matches!(
            d.set("hostname", "x"),
            Err(ConfigError::StoreWrite { path, .. }) if path == "/cfg/hostname"
        ));
    }

    #[test]
    fn test_invoke_call_shapes() {
        let store = Arc::new(MemoryStore::with_inline_delivery());
        let d = dispatcher(store, &["/cfg"]);
        assert_eq!(d.invoke("port", &[]).unwrap(), Some(Value::Integer(0)));
        assert_eq!(d.invoke("hostname", &["h".into()]).unwrap(), None);
        assert_eq!(d.invoke("hostname", &[]).unwrap(), Some(Value::Text("h".into())));
        assert!(matches!(
            d.invoke("hostname", &["a".into(), "b".into()]),
            Err(ConfigError::InvalidCallShape { arity: 2, .. })
        ));
    }

    #[test]
    fn test_structured_round_trip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Limits {
            max_conns: u32,
            hosts: Vec<String>,
        }

        let store = Arc::new(MemoryStore::with_inline_delivery());
        let d = dispatcher(store, &["/cfg"]);
        let limits = Limits {
            max_conns: 10,
            hosts: vec!["a".into(), "b".into()],
        };
        d.set_as("limits", &limits).unwrap();
        assert_eq!(d.get_as::<Limits>("limits").unwrap(), limits);
        assert_eq!(
            d.get("limits").unwrap(),
            Value::Structured(json!({"max_conns": 10, "hosts": ["a", "b"]}))
        );
    }

    #[test]
    fn test_snapshot_populates_struct() {
        #[derive(Debug, Deserialize)]
        struct Settings {
            hostname: Option<String>,
            port: u16,
            debug: bool,
            ratio: f64,
        }

        let store = Arc::new(MemoryStore::with_inline_delivery());
        store.put("/cfg/hostname", "example.org").unwrap();
        store.put("/cfg/hostport", "8181").unwrap();
        let d = dispatcher(store, &["/cfg"]);

        let settings: Settings = d.snapshot_as().unwrap();
        assert_eq!(settings.hostname.as_deref(), Some("example.org"));
        assert_eq!(settings.port, 8181);
        assert!(!settings.debug);
        assert_eq!(settings.ratio, 0.5);
    }
}
