//! Manifest schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::binder::{MemberDescriptor, TargetDescriptor, TypeTag};

/// Root manifest.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BinderConfig {
    /// Base paths in priority order; the first one receives writes.
    pub base_paths: Vec<String>,

    /// Store location.
    pub store: StoreConfig,

    /// Logging settings.
    pub logging: LoggingConfig,

    /// Bound members.
    pub members: Vec<MemberConfig>,
}

impl BinderConfig {
    /// The accessor-style target described by `members`.
    pub fn descriptor(&self) -> TargetDescriptor {
        self.members
            .iter()
            .fold(TargetDescriptor::accessors(), |target, member| {
                let mut getter = MemberDescriptor::getter(&member.name, member.declared_type);
                if let Some(path) = &member.path {
                    getter = getter.path(path);
                }
                if let Some(default) = &member.default {
                    getter = getter.default_value(default);
                }
                if member.writable {
                    target.read_write(getter)
                } else {
                    target.member(getter)
                }
            })
    }

    /// Base paths as string slices, for [`ConfigBinder::bind`](crate::ConfigBinder::bind).
    pub fn base_path_refs(&self) -> Vec<&str> {
        self.base_paths.iter().map(String::as_str).collect()
    }
}

/// Directory-backed store settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory of the store.
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./config-store"),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for this crate's events (trace, debug, info, warn, error).
    pub level: String,

    /// Include the event target in log lines.
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_target: false,
        }
    }
}

/// One member of the manifest.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemberConfig {
    /// Logical name.
    pub name: String,

    /// Path below each base path; defaults to `name`.
    #[serde(default)]
    pub path: Option<String>,

    /// Value used when no base path holds the node.
    #[serde(default)]
    pub default: Option<String>,

    #[serde(rename = "type", default = "default_type")]
    pub declared_type: TypeTag,

    /// Whether `set` is allowed.
    #[serde(default)]
    pub writable: bool,
}

fn default_type() -> TypeTag {
    TypeTag::String
}
