//! Conversion between raw node payloads and typed values.
//!
//! # Responsibilities
//! - Declare the supported member types ([`TypeTag`])
//! - Decode UTF-8 payload text into a [`Value`] of the declared type
//! - Encode a [`Value`] back to payload text for writes
//!
//! # Design Decisions
//! - Strings are identity; primitives use plain parsing; structured values are JSON
//! - Whitespace around non-string payloads is ignored (files often end in a newline)
//! - The coercer is a stateless trait object injected into the dispatcher

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{ConfigError, ConfigResult};

/// Declared type of a configuration member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    #[serde(alias = "str")]
    String,
    #[serde(alias = "boolean")]
    Bool,
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "double")]
    Float,
    #[serde(alias = "json", alias = "object")]
    Structured,
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TypeTag::String => "string",
            TypeTag::Bool => "bool",
            TypeTag::Integer => "integer",
            TypeTag::Float => "float",
            TypeTag::Structured => "structured",
        };
        f.write_str(s)
    }
}

/// A typed configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No value: missing string or structured member without a default.
    Absent,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Structured(Json),
}

impl Value {
    /// The value a member of type `ty` takes when nothing is stored and no default is declared.
    pub fn zero(ty: TypeTag) -> Self {
        match ty {
            TypeTag::Bool => Value::Bool(false),
            TypeTag::Integer => Value::Integer(0),
            TypeTag::Float => Value::Float(0.0),
            TypeTag::String | TypeTag::Structured => Value::Absent,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// JSON form of this value; `Absent` maps to `null`.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Absent => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Integer(n) => Json::from(*n),
            Value::Float(x) => serde_json::Number::from_f64(*x)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Text(s) => Json::String(s.clone()),
            Value::Structured(j) => j.clone(),
        }
    }

    /// Map a JSON value onto the closest variant.
    pub fn from_json(json: Json) -> Self {
        match json {
            Json::Null => Value::Absent,
            Json::Bool(b) => Value::Bool(b),
            Json::String(s) => Value::Text(s),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n
                    .as_f64()
                    .map(Value::Float)
                    .unwrap_or(Value::Structured(Json::Number(n))),
            },
            other => Value::Structured(other),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n.into())
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<Json> for Value {
    fn from(j: Json) -> Self {
        Value::Structured(j)
    }
}

/// Converts payload text to and from typed values.
pub trait Coercer: Send + Sync {
    /// Decode payload text into a value of type `ty`.
    fn decode(&self, raw: &str, ty: TypeTag) -> ConfigResult<Value>;

    /// Encode `value` as payload text for a member of type `ty`.
    fn encode(&self, value: &Value, ty: TypeTag) -> ConfigResult<String>;
}

/// Default coercer: plain text for primitives, JSON for structured members.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCoercer;

impl Coercer for TextCoercer {
    fn decode(&self, raw: &str, ty: TypeTag) -> ConfigResult<Value> {
        let trimmed = raw.trim();
        match ty {
            TypeTag::String => Ok(Value::Text(raw.to_string())),
            TypeTag::Bool => {
                if trimmed.eq_ignore_ascii_case("true") {
                    Ok(Value::Bool(true))
                } else if trimmed.eq_ignore_ascii_case("false") {
                    Ok(Value::Bool(false))
                } else {
                    Err(ConfigError::coercion(ty, raw, "expected true or false"))
                }
            }
            TypeTag::Integer => trimmed
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|e| ConfigError::coercion(ty, raw, e)),
            TypeTag::Float => trimmed
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| ConfigError::coercion(ty, raw, e)),
            TypeTag::Structured => serde_json::from_str::<Json>(trimmed)
                .map(Value::Structured)
                .map_err(|e| ConfigError::coercion(ty, raw, e)),
        }
    }

    fn encode(&self, value: &Value, ty: TypeTag) -> ConfigResult<String> {
        match (ty, value) {
            (_, Value::Absent) => Err(ConfigError::coercion(
                ty,
                "<absent>",
                "cannot store an absent value",
            )),
            (TypeTag::Structured, v) => serde_json::to_string(&v.to_json())
                .map_err(|e| ConfigError::coercion(ty, format!("{:?}", v), e)),
            // An empty payload reads back as absent.
            (TypeTag::String, Value::Text(s)) if s.is_empty() => Err(ConfigError::coercion(
                ty,
                "",
                "empty strings cannot be stored; unset the member instead",
            )),
            (TypeTag::String, Value::Text(s)) => Ok(s.clone()),
            (TypeTag::Bool, Value::Bool(b)) => Ok(b.to_string()),
            (TypeTag::Integer, Value::Integer(n)) => Ok(n.to_string()),
            (TypeTag::Float, Value::Float(x)) => Ok(x.to_string()),
            (TypeTag::Float, Value::Integer(n)) => Ok((*n as f64).to_string()),
            // Text destined for a typed member must read back as that type.
            (_, Value::Text(s)) => {
                self.decode(s, ty)?;
                Ok(s.clone())
            }
            (_, v) => Err(ConfigError::coercion(
                ty,
                format!("{:?}", v),
                "value does not match the declared type",
            )),
        }
    }
}
