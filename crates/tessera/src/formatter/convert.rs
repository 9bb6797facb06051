//! Argument converters applied when a value does not bind to a parameter type directly.

use super::{FormatterError, ParamConverter, ParamType};
use crate::value::{Value, ValueType};
use std::fmt;
use std::sync::Arc;

/// A converter in the service-wide chain.
pub trait ValueConverter: Send + Sync {
    /// Decided from types alone so that binding plans can be cached per call shape.
    fn can_convert(&self, from: ValueType, to: &ParamType) -> bool;

    fn convert(&self, value: &Value, to: &ParamType) -> Option<Value>;
}

/// Integer to float.
#[derive(Debug, Default, Clone, Copy)]
pub struct NumericWidening;

impl ValueConverter for NumericWidening {
    fn can_convert(&self, from: ValueType, to: &ParamType) -> bool {
        from == ValueType::Integer && *to == ParamType::Exact(ValueType::Float)
    }

    fn convert(&self, value: &Value, _to: &ParamType) -> Option<Value> {
        value.as_f64().map(Value::Float)
    }
}

/// Variant name (case-insensitive) or variant position to the canonical variant name.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnumFromString;

impl ValueConverter for EnumFromString {
    fn can_convert(&self, from: ValueType, to: &ParamType) -> bool {
        matches!(to, ParamType::Enum(_)) && matches!(from, ValueType::String | ValueType::Integer)
    }

    fn convert(&self, value: &Value, to: &ParamType) -> Option<Value> {
        let ParamType::Enum(variants) = to else {
            return None;
        };
        let variant = match value {
            Value::String(s) => variants.iter().find(|v| v.eq_ignore_ascii_case(s)),
            Value::Integer(i) => usize::try_from(*i).ok().and_then(|i| variants.get(i)),
            _ => None,
        };
        variant.map(|v| Value::String(v.clone()))
    }
}

/// Conversion selected for one argument in a binding plan.
#[derive(Clone)]
pub(crate) enum Conversion {
    None,
    Param(ParamConverter),
    Chain(Arc<dyn ValueConverter>, ParamType),
}

impl Conversion {
    pub(crate) fn is_none(&self) -> bool {
        matches!(self, Conversion::None)
    }

    pub(crate) fn apply(&self, value: Value, parameter: &str) -> Result<Value, FormatterError> {
        let converted = match self {
            Conversion::None => return Ok(value),
            Conversion::Param(converter) => converter(&value),
            Conversion::Chain(converter, to) => converter.convert(&value, to),
        };
        converted.ok_or_else(|| {
            FormatterError::new(format!(
                "cannot convert {} value '{value}' for parameter '{parameter}'",
                value.value_type()
            ))
        })
    }
}

impl fmt::Debug for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conversion::None => f.write_str("None"),
            Conversion::Param(_) => f.write_str("Param"),
            Conversion::Chain(_, to) => write!(f, "Chain({to:?})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_widening() {
        let to = ParamType::Exact(ValueType::Float);
        assert!(NumericWidening.can_convert(ValueType::Integer, &to));
        assert!(!NumericWidening.can_convert(ValueType::String, &to));
        assert_eq!(
            NumericWidening.convert(&Value::Integer(2), &to),
            Some(Value::Float(2.0))
        );
    }

    #[test]
    fn test_enum_from_string() {
        let to = ParamType::Enum(vec!["Upper".to_string(), "Lower".to_string()]);
        assert_eq!(
            EnumFromString.convert(&Value::from("lower"), &to),
            Some(Value::from("Lower"))
        );
        assert_eq!(
            EnumFromString.convert(&Value::Integer(0), &to),
            Some(Value::from("Upper"))
        );
        assert_eq!(EnumFromString.convert(&Value::from("title"), &to), None);
    }

    #[test]
    fn test_failed_conversion_names_parameter() {
        let conversion = Conversion::Chain(
            Arc::new(EnumFromString),
            ParamType::Enum(vec!["A".to_string()]),
        );
        let err = conversion.apply(Value::from("b"), "mode").unwrap_err();
        assert!(err.message.contains("'mode'"));
    }
}
