//! Field type tags and typed field values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// TYPE TAG
// ============================================================================

/// Semantic type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    String,
    Integer,
    Float,
    Boolean,
}

impl TypeTag {
    /// Convert to the manifest string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            TypeTag::String => "string",
            TypeTag::Integer => "integer",
            TypeTag::Float => "float",
            TypeTag::Boolean => "boolean",
        }
    }

    /// Parse from the manifest string representation.
    pub fn from_db_str(s: &str) -> Result<Self, TypeTagParseError> {
        match s.to_lowercase().as_str() {
            "string" | "str" => Ok(TypeTag::String),
            "integer" | "int" => Ok(TypeTag::Integer),
            "float" => Ok(TypeTag::Float),
            "boolean" | "bool" => Ok(TypeTag::Boolean),
            _ => Err(TypeTagParseError(s.to_string())),
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for TypeTag {
    type Err = TypeTagParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid type tag string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeTagParseError(pub String);

impl fmt::Display for TypeTagParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid type tag: {}", self.0)
    }
}

impl std::error::Error for TypeTagParseError {}

// ============================================================================
// FIELD VALUE
// ============================================================================

/// A typed value stored in one record field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl FieldValue {
    /// The tag this value conforms to.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            FieldValue::String(_) => TypeTag::String,
            FieldValue::Integer(_) => TypeTag::Integer,
            FieldValue::Float(_) => TypeTag::Float,
            FieldValue::Boolean(_) => TypeTag::Boolean,
        }
    }

    /// Render as a JSON value. Non-finite floats have no JSON form.
    pub fn to_json(&self) -> Result<serde_json::Value, ValueParseError> {
        match self {
            FieldValue::String(s) => Ok(serde_json::Value::String(s.clone())),
            FieldValue::Integer(i) => Ok(serde_json::Value::from(*i)),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| ValueParseError {
                    expected: TypeTag::Float,
                    input: f.to_string(),
                }),
            FieldValue::Boolean(b) => Ok(serde_json::Value::Bool(*b)),
        }
    }

    /// Interpret a stored JSON value as the given tag.
    ///
    /// Integers are accepted where a float is expected; nothing else is coerced.
    pub fn from_json(tag: TypeTag, value: &serde_json::Value) -> Result<Self, ValueParseError> {
        let parsed = match tag {
            TypeTag::String => value.as_str().map(|s| FieldValue::String(s.to_string())),
            TypeTag::Integer => value.as_i64().map(FieldValue::Integer),
            TypeTag::Float => value.as_f64().map(FieldValue::Float),
            TypeTag::Boolean => value.as_bool().map(FieldValue::Boolean),
        };
        parsed.ok_or_else(|| ValueParseError {
            expected: tag,
            input: value.to_string(),
        })
    }

    /// Parse free-form text (as typed into an admin command) against a tag.
    pub fn parse(tag: TypeTag, text: &str) -> Result<Self, ValueParseError> {
        let err = || ValueParseError {
            expected: tag,
            input: text.to_string(),
        };
        match tag {
            TypeTag::String => Ok(FieldValue::String(text.to_string())),
            TypeTag::Integer => text
                .trim()
                .parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|_| err()),
            TypeTag::Float => match text.trim().parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(FieldValue::Float(f)),
                _ => Err(err()),
            },
            TypeTag::Boolean => match text.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(FieldValue::Boolean(true)),
                "false" | "no" | "0" => Ok(FieldValue::Boolean(false)),
                _ => Err(err()),
            },
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::String(s) => write!(f, "{}", s),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Float(x) => write!(f, "{}", x),
            FieldValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Integer(i)
    }
}

impl From<i32> for FieldValue {
    fn from(i: i32) -> Self {
        FieldValue::Integer(i as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        FieldValue::Float(f)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

/// A value that does not conform to its declared tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueParseError {
    pub expected: TypeTag,
    pub input: String,
}

impl fmt::Display for ValueParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, got {:?}", self.expected, self.input)
    }
}

impl std::error::Error for ValueParseError {}

// =============================================================================
// TESTS
// =============================================================================
