//! Values a constraint can carry.
//!
//! The identity of a constraint is its id; the value is payload only
//! (a power cap in watts, a processor family, an I/O count). It never takes
//! part in conflict detection.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Payload attached to a constraint.
///
/// # Examples
///
/// ```
/// use reconcile::ConstraintValue;
///
/// let watts = ConstraintValue::Int(10);
/// assert_eq!(watts.as_float(), Some(10.0));
/// assert!(ConstraintValue::default().is_null());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ConstraintValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer quantity.
    Int(i64),
    /// Floating-point quantity.
    Float(f64),
    /// Free-form text.
    String(String),
    /// Nested JSON payload.
    Structured(serde_json::Value),
    /// No payload.
    Null,
}

impl ConstraintValue {
    /// Returns true for `Null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the boolean payload.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the integer payload.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns a numeric payload as `f64`. Integers are widened.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Returns the text payload.
    #[must_use]
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Converts an untyped JSON value as produced by extraction agents.
    ///
    /// Integers stay integers, other numbers become floats, arrays and objects
    /// are kept as structured payloads.
    #[must_use]
    pub fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match value {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            Json::String(s) => Self::String(s),
            other @ (Json::Array(_) | Json::Object(_)) => Self::Structured(other),
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Structured(_) => "structured",
            Self::Null => "null",
        }
    }
}

impl Default for ConstraintValue {
    fn default() -> Self {
        Self::Null
    }
}

impl fmt::Display for ConstraintValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
            Self::Structured(v) => write!(f, "{v}"),
            Self::Null => write!(f, "null"),
        }
    }
}

impl From<bool> for ConstraintValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ConstraintValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ConstraintValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ConstraintValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for ConstraintValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_json_keeps_integers() {
        let v = ConstraintValue::from_json(serde_json::json!(128));
        assert_eq!(v, ConstraintValue::Int(128));
        assert_eq!(v.type_name(), "int");
    }

    #[test]
    fn from_json_floats_and_structures() {
        assert_eq!(
            ConstraintValue::from_json(serde_json::json!(0.5)),
            ConstraintValue::Float(0.5)
        );
        let structured = ConstraintValue::from_json(serde_json::json!({"min": 8}));
        assert_eq!(structured.type_name(), "structured");
        assert!(ConstraintValue::from_json(serde_json::Value::Null).is_null());
    }

    #[test]
    fn serialization_is_tagged() {
        let json = serde_json::to_value(ConstraintValue::String("i7".into())).unwrap();
        assert_eq!(json["type"], "string");
        assert_eq!(json["value"], "i7");
    }

    #[test]
    fn display() {
        assert_eq!(ConstraintValue::Int(10).to_string(), "10");
        assert_eq!(ConstraintValue::Null.to_string(), "null");
    }
}
