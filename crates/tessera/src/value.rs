//! Runtime value types for Tessera templates.
//!
//! Arrays and objects are reference counted so that contexts, loop iterations and formatter
//! arguments can hold values without deep copies.

use crate::error::Result;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub type Object = BTreeMap<String, Value>;

/// Runtime value type for Tessera templates
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Arc<Vec<Value>>),
    Object(Arc<Object>),
}

/// Type tag of a [`Value`], used for formatter matching and cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    Null,
    Bool,
    Integer,
    Float,
    String,
    Array,
    Object,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Null => "null",
            ValueType::Bool => "bool",
            ValueType::Integer => "integer",
            ValueType::Float => "float",
            ValueType::String => "string",
            ValueType::Array => "array",
            ValueType::Object => "object",
        };
        f.write_str(name)
    }
}

impl Value {
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(Arc::new(items.into_iter().collect()))
    }

    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Object(Arc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Convert a JSON value. Integers that do not fit `i64` become floats.
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(arr) => Value::array(arr.into_iter().map(Value::from_json)),
            JsonValue::Object(obj) => {
                Value::object(obj.into_iter().map(|(k, v)| (k, Value::from_json(v))))
            }
        }
    }

    /// Convert any serializable host value
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Value::from_json(serde_json::to_value(value)?))
    }

    /// Convert back to JSON. Non-finite floats become null.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Integer(n) => JsonValue::from(*n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Array(arr) => JsonValue::Array(arr.iter().map(Value::to_json).collect()),
            Value::Object(obj) => JsonValue::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Integer(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::Array(_) => ValueType::Array,
            Value::Object(_) => ValueType::Object,
        }
    }

    /// Default truthiness. Falsy values: null, false, 0, 0.0, "", [], {}
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Integer(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(arr) => !arr.is_empty(),
            Value::Object(obj) => !obj.is_empty(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric value with integer widening.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Member lookup on objects
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|obj| obj.get(key))
    }

    /// Equality used by `==` and `switch`: integers and floats compare numerically.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Integer(_), Value::Float(_)) | (Value::Float(_), Value::Integer(_)) => {
                self.as_f64() == other.as_f64()
            }
            _ => self == other,
        }
    }

    /// Text written to the output, using `decimal_separator` for floats.
    pub fn to_display_string(&self, decimal_separator: char) -> String {
        match self {
            Value::Float(f) if decimal_separator != '.' => {
                f.to_string().replace('.', &decimal_separator.to_string())
            }
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
            Value::Array(arr) => {
                for (i, item) in arr.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Value::Object(_) => write!(f, "{}", self.to_json()),
        }
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

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        i64::try_from(n).map_or(Value::Float(n as f64), Value::Integer)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(items))
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        Value::from_json(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthy() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::Integer(0).is_truthy());
        assert!(Value::Integer(-1).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("hello").is_truthy());
        assert!(!Value::array([]).is_truthy());
        assert!(Value::array([Value::Integer(1)]).is_truthy());
        assert!(!Value::object::<String>([]).is_truthy());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::Integer(-42).to_string(), "-42");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Float(3.0).to_string(), "3");
        assert_eq!(
            Value::array([Value::Integer(1), Value::from("a")]).to_string(),
            "1, a"
        );
    }

    #[test]
    fn test_decimal_separator() {
        assert_eq!(Value::Float(2.5).to_display_string(','), "2,5");
        assert_eq!(Value::Integer(3).to_display_string(','), "3");
    }

    #[test]
    fn test_from_json() {
        let value = Value::from_json(json!({"name": "test", "count": 42, "ratio": 0.5}));
        assert_eq!(value.get("name"), Some(&Value::from("test")));
        assert_eq!(value.get("count"), Some(&Value::Integer(42)));
        assert_eq!(value.get("ratio"), Some(&Value::Float(0.5)));
    }

    #[test]
    fn test_json_round_trip_preserves_structure() {
        let source = json!({"items": [1, 2.5, null, true], "nested": {"a": "b"}});
        assert_eq!(Value::from_json(source.clone()).to_json(), source);
    }

    #[test]
    fn test_from_serialize() {
        #[derive(Serialize)]
        struct User {
            name: String,
            age: u8,
        }
        let value = Value::from_serialize(&User {
            name: "Alice".to_string(),
            age: 30,
        })
        .unwrap();
        assert_eq!(value.get("age"), Some(&Value::Integer(30)));
    }

    #[test]
    fn test_loose_equality() {
        assert!(Value::Integer(2).loosely_equals(&Value::Float(2.0)));
        assert!(!Value::Integer(2).loosely_equals(&Value::from("2")));
    }
}
