//! Formatters: named, overloaded functions callable from template expressions.
//!
//! Formatters are registered explicitly with a parameter descriptor list built by
//! [`FormatterBuilder`]. The [`FormatterService`] picks the best overload for a call shape and
//! caches the resulting binding plan.
//!
//! ```
//! use tessera::formatter::{FormatterBuilder, FormatterService, ParamType};
//! use tessera::{Value, ValueType};
//!
//! let mut service = FormatterService::new();
//! service.register(
//!     FormatterBuilder::new("Twice")
//!         .source(ParamType::Exact(ValueType::Integer))
//!         .build(|args| Ok(Value::Integer(args[0].as_i64().unwrap_or(0) * 2))),
//! );
//! assert!(service.contains("Twice"));
//! ```

pub mod builtins;
mod convert;
mod dispatch;

pub use convert::{EnumFromString, NumericWidening, ValueConverter};
pub use dispatch::{ArgDescriptor, FormatterCache, FormatterService};

use crate::value::{Value, ValueType};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure raised by a formatter body or by argument conversion.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct FormatterError {
    pub message: String,
}

impl FormatterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// How formatter failures surface during rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatterErrorPolicy {
    /// Abort the render with [`crate::TemplateError::Formatter`].
    #[default]
    Propagate,
    /// Log and continue with a null result.
    Swallow,
    /// Continue with the error message as the result.
    Stringify,
}

/// Accepted type of a parameter or receiver.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    Any,
    Exact(ValueType),
    /// Integer or float.
    Number,
    /// A string naming one of the variants (case-insensitive). Always bound through conversion.
    Enum(Vec<String>),
}

impl ParamType {
    /// Whether a value of type `ty` binds without conversion.
    pub fn accepts(&self, ty: ValueType) -> bool {
        match self {
            ParamType::Any => true,
            ParamType::Exact(expected) => *expected == ty,
            ParamType::Number => matches!(ty, ValueType::Integer | ValueType::Float),
            ParamType::Enum(_) => false,
        }
    }
}

pub type ParamConverter = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    Normal,
    Optional(Value),
    /// Collects every remaining positional argument into an array.
    Rest,
    /// Receives the value the formatter is called on.
    Source,
    /// Receives the service registered under this name.
    Service(String),
}

#[derive(Clone)]
pub struct ParamInfo {
    pub name: String,
    pub ty: ParamType,
    pub kind: ParamKind,
    pub converter: Option<ParamConverter>,
}

impl fmt::Debug for ParamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamInfo")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("kind", &self.kind)
            .field("converter", &self.converter.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Value,
    /// Produces no output.
    Void,
}

pub type FormatterFn = Arc<dyn Fn(&[Value]) -> Result<Value, FormatterError> + Send + Sync>;

/// A registered formatter overload.
pub struct FormatterModel {
    pub name: String,
    pub receiver: ParamType,
    pub params: Vec<ParamInfo>,
    pub returns: ReturnKind,
    callable: FormatterFn,
}

impl FormatterModel {
    /// Invoke with arguments already bound in parameter order.
    pub fn call(&self, arguments: &[Value]) -> Result<Value, FormatterError> {
        (self.callable)(arguments)
    }

    /// Number of arguments a call must supply explicitly.
    pub fn minimum_arity(&self) -> usize {
        self.params
            .iter()
            .filter(|p| p.kind == ParamKind::Normal)
            .count()
    }

    fn has_source(&self) -> bool {
        self.params.iter().any(|p| p.kind == ParamKind::Source)
    }
}

impl fmt::Debug for FormatterModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatterModel")
            .field("name", &self.name)
            .field("receiver", &self.receiver)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

/// Registration API for formatter overloads.
pub struct FormatterBuilder {
    name: String,
    receiver: ParamType,
    params: Vec<ParamInfo>,
    returns: ReturnKind,
}

impl FormatterBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            receiver: ParamType::Any,
            params: Vec::new(),
            returns: ReturnKind::Value,
        }
    }

    /// Bind the receiver to the next parameter and constrain its type.
    pub fn source(mut self, ty: ParamType) -> Self {
        self.receiver = ty.clone();
        self.push("source", ty, ParamKind::Source)
    }

    pub fn param(self, name: &str, ty: ParamType) -> Self {
        self.push(name, ty, ParamKind::Normal)
    }

    pub fn optional(self, name: &str, ty: ParamType, default: Value) -> Self {
        self.push(name, ty, ParamKind::Optional(default))
    }

    pub fn rest(self, name: &str, ty: ParamType) -> Self {
        self.push(name, ty, ParamKind::Rest)
    }

    /// Inject the service registered as `service`.
    pub fn service(self, service: &str) -> Self {
        self.push(service, ParamType::Any, ParamKind::Service(service.to_string()))
    }

    /// Attach a converter to the most recently added parameter.
    pub fn converter(
        mut self,
        converter: impl Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        if let Some(param) = self.params.last_mut() {
            param.converter = Some(Arc::new(converter));
        }
        self
    }

    pub fn void(mut self) -> Self {
        self.returns = ReturnKind::Void;
        self
    }

    pub fn build(
        self,
        callable: impl Fn(&[Value]) -> Result<Value, FormatterError> + Send + Sync + 'static,
    ) -> FormatterModel {
        FormatterModel {
            name: self.name,
            receiver: self.receiver,
            params: self.params,
            returns: self.returns,
            callable: Arc::new(callable),
        }
    }

    fn push(mut self, name: &str, ty: ParamType, kind: ParamKind) -> Self {
        self.params.push(ParamInfo {
            name: name.to_string(),
            ty,
            kind,
            converter: None,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_records_parameters() {
        let model = FormatterBuilder::new("Pad")
            .source(ParamType::Exact(ValueType::String))
            .param("width", ParamType::Exact(ValueType::Integer))
            .optional("fill", ParamType::Exact(ValueType::String), Value::from(" "))
            .build(|_| Ok(Value::Null));
        assert_eq!(model.params.len(), 3);
        assert_eq!(model.minimum_arity(), 1);
        assert!(model.has_source());
        assert_eq!(model.receiver, ParamType::Exact(ValueType::String));
    }

    #[test]
    fn test_param_type_acceptance() {
        assert!(ParamType::Number.accepts(ValueType::Float));
        assert!(!ParamType::Number.accepts(ValueType::String));
        assert!(!ParamType::Enum(vec!["a".to_string()]).accepts(ValueType::String));
        assert!(ParamType::Any.accepts(ValueType::Null));
    }

    #[test]
    fn test_converter_attaches_to_last_param() {
        let model = FormatterBuilder::new("F")
            .param("a", ParamType::Any)
            .param("b", ParamType::Exact(ValueType::Integer))
            .converter(|v| v.as_str().and_then(|s| s.parse().ok()).map(Value::Integer))
            .build(|_| Ok(Value::Null));
        assert!(model.params[0].converter.is_none());
        assert!(model.params[1].converter.is_some());
    }
}
