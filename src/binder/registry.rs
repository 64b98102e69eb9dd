//! Member discovery and path resolution.
//!
//! # Responsibilities
//! - Describe a target's configuration members ([`TargetDescriptor`], [`BindTarget`])
//! - Resolve each member to a store path, declared type and default ([`BindingSpec`])
//! - Reject ambiguous or incomplete declarations before anything touches the store
//!
//! # Resolution Rules
//! ```text
//! path override  >  short-form value  >  member name      (first non-empty wins)
//!
//! layer 0 (the target itself)  >  ancestors               (most-derived wins)
//! ancestors disagreeing on a path with no layer-0 declaration → BindingError
//! ```

use std::collections::{BTreeMap, HashMap};

use crate::binder::coerce::TypeTag;
use crate::error::{ConfigError, ConfigResult};
use crate::store::path;

/// How the target exposes its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationStyle {
    /// A plain object whose fields are populated from the store.
    Fields,
    /// A virtual surface of getter/setter pairs.
    Accessors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Field,
    Getter,
    Setter,
}

/// One declared member, as reported by the target's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDescriptor {
    pub name: String,
    pub kind: MemberKind,
    /// Explicit path override.
    pub path: Option<String>,
    /// Short-form path, used when no override is given.
    pub value: Option<String>,
    pub default_value: Option<String>,
    pub declared_type: TypeTag,
}

impl MemberDescriptor {
    fn new(name: impl Into<String>, kind: MemberKind, declared_type: TypeTag) -> Self {
        Self {
            name: name.into(),
            kind,
            path: None,
            value: None,
            default_value: None,
            declared_type,
        }
    }

    pub fn field(name: impl Into<String>, declared_type: TypeTag) -> Self {
        Self::new(name, MemberKind::Field, declared_type)
    }

    pub fn getter(name: impl Into<String>, declared_type: TypeTag) -> Self {
        Self::new(name, MemberKind::Getter, declared_type)
    }

    pub fn setter(name: impl Into<String>, declared_type: TypeTag) -> Self {
        Self::new(name, MemberKind::Setter, declared_type)
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default_value = Some(default.into());
        self
    }

    fn resolved_path(&self) -> ConfigResult<String> {
        let raw = [self.path.as_deref(), self.value.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .unwrap_or(self.name.as_str());
        path::normalize_relative(raw).ok_or_else(|| {
            ConfigError::Binding(format!(
                "member '{}' resolves to invalid path '{}'",
                self.name, raw
            ))
        })
    }

    fn declared_default(&self) -> Option<String> {
        self.default_value.clone().filter(|d| !d.is_empty())
    }
}

/// Normalised description of a bind target.
///
/// Layer 0 holds the target's own members; each further layer is an ancestor,
/// nearest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub style: DeclarationStyle,
    pub layers: Vec<Vec<MemberDescriptor>>,
}

impl TargetDescriptor {
    pub fn new(style: DeclarationStyle) -> Self {
        Self {
            style,
            layers: vec![Vec::new()],
        }
    }

    pub fn fields() -> Self {
        Self::new(DeclarationStyle::Fields)
    }

    pub fn accessors() -> Self {
        Self::new(DeclarationStyle::Accessors)
    }

    /// Declare a member on the target itself.
    pub fn member(mut self, member: MemberDescriptor) -> Self {
        self.layers[0].push(member);
        self
    }

    /// Declare a getter/setter pair sharing a name, path and default.
    pub fn read_write(self, getter: MemberDescriptor) -> Self {
        let mut setter = getter.clone();
        setter.kind = MemberKind::Setter;
        self.member(getter).member(setter)
    }

    /// Append an ancestor layer, further from the target than any added before.
    pub fn inherit(mut self, members: impl IntoIterator<Item = MemberDescriptor>) -> Self {
        self.layers.push(members.into_iter().collect());
        self
    }
}

/// Supplies the member description of a bind target.
pub trait BindTarget {
    fn describe_members(&self) -> TargetDescriptor;
}

impl BindTarget for TargetDescriptor {
    fn describe_members(&self) -> TargetDescriptor {
        self.clone()
    }
}

/// Resolved binding of one logical name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSpec {
    pub logical_name: String,
    /// Path relative to each base path.
    pub resolved_path: String,
    pub declared_type: TypeTag,
    pub default_value: Option<String>,
    pub writable: bool,
}

#[derive(Debug, Clone)]
struct Declaration {
    layer: usize,
    path: String,
    declared_type: TypeTag,
    default_value: Option<String>,
}

/// Logical name → [`BindingSpec`], fixed at bind time.
#[derive(Debug, Clone, Default)]
pub struct BindingRegistry {
    specs: HashMap<String, BindingSpec>,
}

impl BindingRegistry {
    /// Build the registry for `target`.
    pub fn build(target: &TargetDescriptor) -> ConfigResult<Self> {
        // name → kind → declarations, nearest layer first
        let mut declared: BTreeMap<&str, HashMap<MemberKind, Vec<Declaration>>> = BTreeMap::new();

        for (layer, members) in target.layers.iter().enumerate() {
            for member in members {
                check_kind(target.style, member)?;
                if member.name.trim().is_empty() {
                    return Err(ConfigError::Binding("member with empty name".into()));
                }

                let by_kind = declared.entry(member.name.as_str()).or_default();
                let decls = by_kind.entry(member.kind).or_default();
                if decls.iter().any(|d| d.layer == layer) {
                    return Err(ConfigError::Binding(format!(
                        "member '{}' declared twice as {:?} in the same layer",
                        member.name, member.kind
                    )));
                }
                decls.push(Declaration {
                    layer,
                    path: member.resolved_path()?,
                    declared_type: member.declared_type,
                    default_value: member.declared_default(),
                });
            }
        }

        if declared.is_empty() {
            return Err(ConfigError::Binding("target declares no config members".into()));
        }

        let mut specs = HashMap::with_capacity(declared.len());
        for (name, by_kind) in declared {
            let spec = match target.style {
                DeclarationStyle::Fields => {
                    let field = winner(name, by_kind.get(&MemberKind::Field))?
                        .ok_or_else(|| ConfigError::Binding(format!("member '{}' has no field", name)))?;
                    to_spec(name, field, true)
                }
                DeclarationStyle::Accessors => {
                    let getter = winner(name, by_kind.get(&MemberKind::Getter))?;
                    let setter = winner(name, by_kind.get(&MemberKind::Setter))?;
                    accessor_spec(name, getter, setter)?
                }
            };
            specs.insert(name.to_string(), spec);
        }

        Ok(Self { specs })
    }

    pub fn get(&self, name: &str) -> Option<&BindingSpec> {
        self.specs.get(name)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// All specs, sorted by logical name.
    pub fn specs(&self) -> Vec<&BindingSpec> {
        let mut specs: Vec<_> = self.specs.values().collect();
        specs.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
        specs
    }

    /// Logical names bound to `relative` (a path below a base path).
    pub fn names_for_path<'a>(&'a self, relative: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.specs
            .values()
            .filter(move |s| s.resolved_path == relative)
            .map(|s| s.logical_name.as_str())
    }
}

fn check_kind(style: DeclarationStyle, member: &MemberDescriptor) -> ConfigResult<()> {
    let ok = match style {
        DeclarationStyle::Fields => member.kind == MemberKind::Field,
        DeclarationStyle::Accessors => member.kind != MemberKind::Field,
    };
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Binding(format!(
            "member '{}' is a {:?}, not allowed on a {:?} target",
            member.name, member.kind, style
        )))
    }
}

/// Pick the effective declaration of one kind: layer 0 wins, ancestors must agree.
fn winner<'a>(name: &str, decls: Option<&'a Vec<Declaration>>) -> ConfigResult<Option<&'a Declaration>> {
    let Some(decls) = decls else {
        return Ok(None);
    };
    let Some(nearest) = decls.iter().min_by_key(|d| d.layer) else {
        return Ok(None);
    };
    if nearest.layer == 0 {
        return Ok(Some(nearest));
    }
    if let Some(other) = decls
        .iter()
        .find(|d| d.path != nearest.path || d.declared_type != nearest.declared_type)
    {
        return Err(ConfigError::Binding(format!(
            "member '{}' is ambiguous: inherited as '{}' ({}) and '{}' ({})",
            name, nearest.path, nearest.declared_type, other.path, other.declared_type
        )));
    }
    Ok(Some(nearest))
}

fn to_spec(name: &str, decl: &Declaration, writable: bool) -> BindingSpec {
    BindingSpec {
        logical_name: name.to_string(),
        resolved_path: decl.path.clone(),
        declared_type: decl.declared_type,
        default_value: decl.default_value.clone(),
        writable,
    }
}

fn accessor_spec(
    name: &str,
    getter: Option<&Declaration>,
    setter: Option<&Declaration>,
) -> ConfigResult<BindingSpec> {
    match (getter, setter) {
        (Some(getter), None) => Ok(to_spec(name, getter, false)),
        (Some(getter), Some(setter)) => {
            if getter.path != setter.path || getter.declared_type != setter.declared_type {
                return Err(ConfigError::Binding(format!(
                    "getter and setter of '{}' disagree: '{}' ({}) vs '{}' ({})",
                    name, getter.path, getter.declared_type, setter.path, setter.declared_type
                )));
            }
            let mut spec = to_spec(name, getter, true);
            if spec.default_value.is_none() {
                spec.default_value = setter.default_value.clone();
            }
            Ok(spec)
        }
        (None, Some(_)) => Err(ConfigError::Binding(format!(
            "setter '{}' has no matching getter",
            name
        ))),
        (None, None) => Err(ConfigError::Binding(format!("member '{}' has no accessors", name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_accessors() -> TargetDescriptor {
        TargetDescriptor::accessors()
            .member(MemberDescriptor::getter("hostname", TypeTag::String))
            .member(MemberDescriptor::setter("hostname", TypeTag::String))
            .member(MemberDescriptor::getter("port", TypeTag::Integer).value("hostport"))
            .member(
                MemberDescriptor::getter("withDefaultValue", TypeTag::Integer)
                    .path("somethingElse")
                    .default_value("1"),
            )
    }

    #[test]
    fn test_accessor_pairs() {
        let registry = BindingRegistry::build(&service_accessors()).unwrap();
        assert_eq!(registry.len(), 3);

        let hostname = registry.get("hostname").unwrap();
        assert_eq!(hostname.resolved_path, "hostname");
        assert!(hostname.writable);

        let port = registry.get("port").unwrap();
        assert_eq!(port.resolved_path, "hostport");
        assert!(!port.writable);

        let with_default = registry.get("withDefaultValue").unwrap();
        assert_eq!(with_default.resolved_path, "somethingElse");
        assert_eq!(with_default.default_value.as_deref(), Some("1"));
    }

    #[test]
    fn test_path_precedence() {
        let target = TargetDescriptor::fields()
            .member(MemberDescriptor::field("a", TypeTag::String).path("p").value("v"))
            .member(MemberDescriptor::field("b", TypeTag::String).path("").value("v"))
            .member(MemberDescriptor::field("c", TypeTag::String).value(""))
            .member(MemberDescriptor::field("d", TypeTag::String).path("/db/host/"));
        let registry = BindingRegistry::build(&target).unwrap();
        assert_eq!(registry.get("a").unwrap().resolved_path, "p");
        assert_eq!(registry.get("b").unwrap().resolved_path, "v");
        assert_eq!(registry.get("c").unwrap().resolved_path, "c");
        assert_eq!(registry.get("d").unwrap().resolved_path, "db/host");
    }

    #[test]
    fn test_setter_without_getter_fails() {
        let target = TargetDescriptor::accessors()
            .member(MemberDescriptor::getter("port", TypeTag::Integer))
            .member(MemberDescriptor::setter("hostname", TypeTag::String));
        let err = BindingRegistry::build(&target).unwrap_err();
        assert!(matches!(err, ConfigError::Binding(msg) if msg.contains("hostname")));
    }

    #[test]
    fn test_mismatched_pair_fails() {
        let target = TargetDescriptor::accessors()
            .member(MemberDescriptor::getter("port", TypeTag::Integer))
            .member(MemberDescriptor::setter("port", TypeTag::String));
        assert!(BindingRegistry::build(&target).is_err());
    }

    #[test]
    fn test_empty_target_fails() {
        assert!(matches!(
            BindingRegistry::build(&TargetDescriptor::fields()),
            Err(ConfigError::Binding(_))
        ));
    }

    #[test]
    fn test_style_mismatch_fails() {
        let target = TargetDescriptor::fields().member(MemberDescriptor::getter("x", TypeTag::Bool));
        assert!(BindingRegistry::build(&target).is_err());
    }

    #[test]
    fn test_most_derived_field_wins() {
        let target = TargetDescriptor::fields()
            .member(MemberDescriptor::field("timeout", TypeTag::Integer).path("child/timeout"))
            .inherit([MemberDescriptor::field("timeout", TypeTag::Integer).path("parent/timeout")])
            .inherit([MemberDescriptor::field("region", TypeTag::String)]);
        let registry = BindingRegistry::build(&target).unwrap();
        assert_eq!(registry.get("timeout").unwrap().resolved_path, "child/timeout");
        assert_eq!(registry.get("region").unwrap().resolved_path, "region");
        assert!(registry.get("region").unwrap().writable);
    }

    #[test]
    fn test_conflicting_ancestors_fail() {
        let target = TargetDescriptor::fields()
            .member(MemberDescriptor::field("own", TypeTag::String))
            .inherit([MemberDescriptor::field("dup", TypeTag::String).path("a")])
            .inherit([MemberDescriptor::field("dup", TypeTag::String).path("b")]);
        let err = BindingRegistry::build(&target).unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn test_agreeing_ancestors_collapse() {
        let target = TargetDescriptor::fields()
            .inherit([MemberDescriptor::field("dup", TypeTag::String).path("a")])
            .inherit([MemberDescriptor::field("dup", TypeTag::String).path("a")]);
        let registry = BindingRegistry::build(&target).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_in_one_layer_fails() {
        let target = TargetDescriptor::fields()
            .member(MemberDescriptor::field("x", TypeTag::String))
            .member(MemberDescriptor::field("x", TypeTag::String).path("y"));
        assert!(BindingRegistry::build(&target).is_err());
    }

    #[test]
    fn test_names_for_path() {
        let registry = BindingRegistry::build(&service_accessors()).unwrap();
        let names: Vec<_> = registry.names_for_path("hostport").collect();
        assert_eq!(names, vec!["port"]);
        assert_eq!(registry.names_for_path("nothing").count(), 0);
    }

    #[test]
    fn test_read_write_helper() {
        let target = TargetDescriptor::accessors()
            .read_write(MemberDescriptor::getter("hostname", TypeTag::String).default_value("localhost"));
        let registry = BindingRegistry::build(&target).unwrap();
        let spec = registry.get("hostname").unwrap();
        assert!(spec.writable);
        assert_eq!(spec.default_value.as_deref(), Some("localhost"));
    }
}
