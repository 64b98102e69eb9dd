//! Error taxonomy for binding and accessing configuration.

use thiserror::Error;

use crate::binder::coerce::TypeTag;
use crate::store::StoreError;

/// Errors surfaced by [`ConfigBinder`](crate::ConfigBinder) and its accessor surface.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid or ambiguous member declarations, or bad base paths.
    #[error("binding error: {0}")]
    Binding(String),

    /// The store could not be read or subscribed to while starting a cache.
    #[error("store unavailable for {path}: {source}")]
    StoreUnavailable {
        path: String,
        #[source]
        source: StoreError,
    },

    /// The cache was closed and cannot be started again.
    #[error("cache for {0} is closed")]
    CacheClosed(String),

    /// No member with this logical name was bound.
    #[error("unknown config member '{0}'")]
    UnknownMember(String),

    /// The member has no writable side.
    #[error("config member '{0}' is read-only")]
    ReadOnlyMember(String),

    /// A dispatch call carried neither zero nor one argument.
    #[error("invalid call shape for '{name}': expected 0 or 1 arguments, got {arity}")]
    InvalidCallShape { name: String, arity: usize },

    /// A payload or value could not be converted to the declared type.
    #[error("cannot coerce {input:?} to {declared}: {reason}")]
    TypeCoercion {
        declared: TypeTag,
        input: String,
        reason: String,
    },

    /// Creating or writing the primary node failed.
    #[error("store write to {path} failed: {source}")]
    StoreWrite {
        path: String,
        #[source]
        source: StoreError,
    },
}

impl ConfigError {
    pub(crate) fn coercion(declared: TypeTag, input: impl Into<String>, reason: impl ToString) -> Self {
        Self::TypeCoercion {
            declared,
            input: input.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for binder operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::InvalidCallShape {
            name: "port".into(),
            arity: 2,
        };
        assert_eq!(
            err.to_string(),
            "invalid call shape for 'port': expected 0 or 1 arguments, got 2"
        );

        let err = ConfigError::coercion(TypeTag::Integer, "abc", "invalid digit found in string");
        assert!(err.to_string().contains("integer"));
        assert!(err.to_string().contains("\"abc\""));
    }
}
