//! Overload resolution, binding plans and the formatter cache.

use super::convert::Conversion;
use super::{
    EnumFromString, FormatterError, FormatterModel, NumericWidening, ParamInfo, ParamKind,
    ReturnKind, ValueConverter,
};
use crate::services::ServiceCollection;
use crate::value::{Value, ValueType};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::trace;

/// Name and type of one call argument, known before the values are bound.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArgDescriptor {
    pub name: Option<String>,
    pub ty: ValueType,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    receiver: ValueType,
    arguments: Vec<ArgDescriptor>,
    name: String,
}

#[derive(Debug, Clone)]
enum Binding {
    Source(Conversion),
    Argument { index: usize, conversion: Conversion },
    Service(String),
    Default(Value),
    Rest(Vec<(usize, Conversion)>),
}

/// A resolved overload and how to bind call arguments to its parameters.
#[derive(Debug)]
pub struct FormatterCache {
    model: Arc<FormatterModel>,
    plan: Vec<Binding>,
}

impl FormatterCache {
    pub fn model(&self) -> &FormatterModel {
        &self.model
    }
}

/// Registry of formatter overloads plus the converter chain and cache.
///
/// The cache is safe for concurrent renders: lookups take a read lock and a miss takes the
/// write lock once per call shape.
pub struct FormatterService {
    formatters: HashMap<String, Vec<Arc<FormatterModel>>>,
    converters: Vec<Arc<dyn ValueConverter>>,
    cache: Option<RwLock<HashMap<CacheKey, Option<Arc<FormatterCache>>>>>,
}

impl Default for FormatterService {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatterService {
    /// Empty registry with the default converters and caching enabled
    pub fn new() -> Self {
        Self {
            formatters: HashMap::new(),
            converters: vec![Arc::new(NumericWidening), Arc::new(EnumFromString)],
            cache: Some(RwLock::new(HashMap::new())),
        }
    }

    /// Registry seeded with the built-in formatter library
    pub fn with_defaults() -> Self {
        let mut service = Self::new();
        super::builtins::register_defaults(&mut service);
        service
    }

    pub fn register(&mut self, model: FormatterModel) -> &mut Self {
        self.formatters
            .entry(model.name.clone())
            .or_default()
            .push(Arc::new(model));
        self.clear_cache();
        self
    }

    pub fn add_converter(&mut self, converter: Arc<dyn ValueConverter>) -> &mut Self {
        self.converters.push(converter);
        self.clear_cache();
        self
    }

    pub fn set_cache_enabled(&mut self, enabled: bool) {
        self.cache = enabled.then(|| RwLock::new(HashMap::new()));
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.formatters.contains_key(name)
    }

    fn clear_cache(&mut self) {
        if let Some(cache) = self.cache.as_mut() {
            if let Ok(map) = cache.get_mut() {
                map.clear();
            }
        }
    }

    /// Resolve the best overload of `name` for a receiver type and argument shape.
    pub fn prepare(
        &self,
        receiver: ValueType,
        name: &str,
        arguments: &[ArgDescriptor],
    ) -> Option<Arc<FormatterCache>> {
        let Some(cache) = &self.cache else {
            return self.resolve(receiver, name, arguments);
        };
        let key = CacheKey {
            receiver,
            arguments: arguments.to_vec(),
            name: name.to_string(),
        };
        if let Ok(map) = cache.read() {
            if let Some(entry) = map.get(&key) {
                return entry.clone();
            }
        }
        trace!(formatter = name, %receiver, "formatter cache miss");
        let resolved = self.resolve(receiver, name, arguments);
        if let Ok(mut map) = cache.write() {
            map.insert(key, resolved.clone());
        }
        resolved
    }

    /// Bind values according to the plan and invoke the formatter.
    pub fn execute(
        &self,
        cache: &FormatterCache,
        receiver: Value,
        mut arguments: Vec<Value>,
        services: &ServiceCollection,
    ) -> Result<Value, FormatterError> {
        let mut bound = Vec::with_capacity(cache.plan.len());
        for (binding, param) in cache.plan.iter().zip(&cache.model.params) {
            let value = match binding {
                Binding::Source(conversion) => conversion.apply(receiver.clone(), &param.name)?,
                Binding::Argument { index, conversion } => {
                    conversion.apply(std::mem::take(&mut arguments[*index]), &param.name)?
                }
                Binding::Service(name) => services.get(name).cloned().ok_or_else(|| {
                    FormatterError::new(format!("service '{name}' is not registered"))
                })?,
                Binding::Default(value) => value.clone(),
                Binding::Rest(indexes) => {
                    let mut items = Vec::with_capacity(indexes.len());
                    for (index, conversion) in indexes {
                        items.push(
                            conversion.apply(std::mem::take(&mut arguments[*index]), &param.name)?,
                        );
                    }
                    Value::from(items)
                }
            };
            bound.push(value);
        }
        let result = cache.model.call(&bound)?;
        Ok(match cache.model.returns {
            ReturnKind::Void => Value::Null,
            ReturnKind::Value => result,
        })
    }

    fn resolve(
        &self,
        receiver: ValueType,
        name: &str,
        arguments: &[ArgDescriptor],
    ) -> Option<Arc<FormatterCache>> {
        let candidates = self.formatters.get(name)?;
        candidates
            .iter()
            .enumerate()
            .filter(|(_, model)| arguments.len() >= model.minimum_arity())
            .filter_map(|(order, model)| {
                let bound = self.bind(model, receiver, arguments)?;
                let void_rank = match model.returns {
                    ReturnKind::Void => 0,
                    ReturnKind::Value => 1,
                };
                Some(((bound.free, void_rank, bound.conversions, order), model, bound.plan))
            })
            .min_by_key(|(score, _, _)| *score)
            .map(|(_, model, plan)| {
                Arc::new(FormatterCache {
                    model: Arc::clone(model),
                    plan,
                })
            })
    }

    fn bind(
        &self,
        model: &FormatterModel,
        receiver: ValueType,
        arguments: &[ArgDescriptor],
    ) -> Option<BoundPlan> {
        if !model.has_source() && !model.receiver.accepts(receiver) {
            return None;
        }

        let mut used = vec![false; arguments.len()];
        let mut plan = Vec::with_capacity(model.params.len());
        let mut free = 0;
        let mut conversions = 0;
        let mut count = |conversion: Conversion| {
            if !conversion.is_none() {
                conversions += 1;
            }
            conversion
        };

        for param in &model.params {
            let binding = match &param.kind {
                ParamKind::Source => Binding::Source(count(self.conversion(receiver, param)?)),
                ParamKind::Service(name) => Binding::Service(name.clone()),
                ParamKind::Rest => {
                    let mut indexes = Vec::new();
                    for (index, argument) in arguments.iter().enumerate() {
                        if used[index] || argument.name.is_some() {
                            continue;
                        }
                        used[index] = true;
                        indexes.push((index, count(self.conversion(argument.ty, param)?)));
                    }
                    if indexes.is_empty() {
                        free += 1;
                    }
                    Binding::Rest(indexes)
                }
                ParamKind::Normal | ParamKind::Optional(_) => {
                    let named = arguments.iter().enumerate().position(|(index, a)| {
                        !used[index]
                            && a.name
                                .as_deref()
                                .is_some_and(|n| n.eq_ignore_ascii_case(&param.name))
                    });
                    let index = named.or_else(|| {
                        arguments
                            .iter()
                            .enumerate()
                            .position(|(index, a)| !used[index] && a.name.is_none())
                    });
                    match (index, &param.kind) {
                        (Some(index), _) => {
                            used[index] = true;
                            let conversion = count(self.conversion(arguments[index].ty, param)?);
                            Binding::Argument { index, conversion }
                        }
                        (None, ParamKind::Optional(default)) => {
                            free += 1;
                            Binding::Default(default.clone())
                        }
                        (None, _) => return None,
                    }
                }
            };
            plan.push(binding);
        }

        if used.iter().any(|used| !used) {
            return None;
        }
        Some(BoundPlan {
            plan,
            free,
            conversions,
        })
    }

    /// Conversion needed to pass a value of type `from` to `param`, if any exists.
    fn conversion(&self, from: ValueType, param: &ParamInfo) -> Option<Conversion> {
        if param.ty.accepts(from) {
            return Some(Conversion::None);
        }
        if let Some(converter) = &param.converter {
            return Some(Conversion::Param(Arc::clone(converter)));
        }
        self.converters
            .iter()
            .find(|c| c.can_convert(from, &param.ty))
            .map(|c| Conversion::Chain(Arc::clone(c), param.ty.clone()))
    }
}

struct BoundPlan {
    plan: Vec<Binding>,
    free: usize,
    conversions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::{FormatterBuilder, ParamType};

    fn int() -> ParamType {
        ParamType::Exact(ValueType::Integer)
    }

    fn float() -> ParamType {
        ParamType::Exact(ValueType::Float)
    }

    fn positional(ty: ValueType) -> ArgDescriptor {
        ArgDescriptor { name: None, ty }
    }

    fn add_service() -> FormatterService {
        let mut service = FormatterService::new();
        service.register(
            FormatterBuilder::new("Add")
                .source(float())
                .param("value", float())
                .build(|args| {
                    Ok(Value::Float(
                        args[0].as_f64().unwrap_or(0.0) + args[1].as_f64().unwrap_or(0.0),
                    ))
                }),
        );
        service.register(
            FormatterBuilder::new("Add")
                .source(int())
                .param("value", int())
                .build(|args| {
                    Ok(Value::Integer(
                        args[0].as_i64().unwrap_or(0) + args[1].as_i64().unwrap_or(0),
                    ))
                }),
        );
        service
    }

    fn call(
        service: &FormatterService,
        name: &str,
        receiver: Value,
        arguments: Vec<(Option<&str>, Value)>,
    ) -> Option<Result<Value, FormatterError>> {
        let descriptors: Vec<ArgDescriptor> = arguments
            .iter()
            .map(|(name, value)| ArgDescriptor {
                name: name.map(str::to_string),
                ty: value.value_type(),
            })
            .collect();
        let cache = service.prepare(receiver.value_type(), name, &descriptors)?;
        let values = arguments.into_iter().map(|(_, v)| v).collect();
        Some(service.execute(&cache, receiver, values, &ServiceCollection::new()))
    }

    #[test]
    fn test_exact_overload_beats_conversion() {
        let service = add_service();
        let result = call(&service, "Add", Value::Integer(7), vec![(None, Value::Integer(5))]);
        assert_eq!(result, Some(Ok(Value::Integer(12))));
    }

    #[test]
    fn test_widening_selects_float_overload() {
        let service = add_service();
        let result = call(&service, "Add", Value::Float(1.5), vec![(None, Value::Integer(2))]);
        assert_eq!(result, Some(Ok(Value::Float(3.5))));
    }

    #[test]
    fn test_unknown_receiver_type_is_not_found() {
        let service = add_service();
        assert!(call(&service, "Add", Value::from("x"), vec![(None, Value::Integer(1))]).is_none());
    }

    #[test]
    fn test_too_many_arguments_rejected() {
        let service = add_service();
        let result = call(
            &service,
            "Add",
            Value::Integer(1),
            vec![(None, Value::Integer(1)), (None, Value::Integer(2))],
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_named_argument_binding() {
        let mut service = FormatterService::new();
        service.register(
            FormatterBuilder::new("Range")
                .param("from", int())
                .param("to", int())
                .build(|args| Ok(Value::from(format!("{}..{}", args[0], args[1])))),
        );
        let result = call(
            &service,
            "Range",
            Value::Null,
            vec![(Some("to"), Value::Integer(9)), (None, Value::Integer(1))],
        );
        assert_eq!(result, Some(Ok(Value::from("1..9"))));
    }

    #[test]
    fn test_optional_default_and_rest() {
        let mut service = FormatterService::new();
        service.register(
            FormatterBuilder::new("Join")
                .source(ParamType::Any)
                .optional("separator", ParamType::Exact(ValueType::String), Value::from("-"))
                .rest("items", ParamType::Any)
                .build(|args| {
                    let separator = args[1].to_string();
                    let items: Vec<String> = args[2]
                        .as_array()
                        .unwrap_or_default()
                        .iter()
                        .map(ToString::to_string)
                        .collect();
                    Ok(Value::from(format!("{}{}{}", args[0], separator, items.join(&separator))))
                }),
        );
        let result = call(
            &service,
            "Join",
            Value::from("a"),
            vec![
                (None, Value::from("+")),
                (None, Value::from("b")),
                (None, Value::from("c")),
            ],
        );
        assert_eq!(result, Some(Ok(Value::from("a+b+c"))));
    }

    #[test]
    fn test_fewer_defaults_preferred() {
        let mut service = FormatterService::new();
        service.register(
            FormatterBuilder::new("Pick")
                .optional("a", ParamType::Any, Value::Null)
                .optional("b", ParamType::Any, Value::Null)
                .build(|_| Ok(Value::from("two"))),
        );
        service.register(
            FormatterBuilder::new("Pick")
                .param("a", ParamType::Any)
                .build(|_| Ok(Value::from("one"))),
        );
        let result = call(&service, "Pick", Value::Null, vec![(None, Value::Integer(1))]);
        assert_eq!(result, Some(Ok(Value::from("one"))));
    }

    #[test]
    fn test_enum_parameter_conversion() {
        let mut service = FormatterService::new();
        service.register(
            FormatterBuilder::new("Mode")
                .param("mode", ParamType::Enum(vec!["Fast".into(), "Slow".into()]))
                .build(|args| Ok(args[0].clone())),
        );
        let ok = call(&service, "Mode", Value::Null, vec![(None, Value::from("slow"))]);
        assert_eq!(ok, Some(Ok(Value::from("Slow"))));
        let bad = call(&service, "Mode", Value::Null, vec![(None, Value::from("medium"))]);
        assert!(matches!(bad, Some(Err(_))));
    }

    #[test]
    fn test_service_injection() {
        let mut service = FormatterService::new();
        service.register(
            FormatterBuilder::new("Greet")
                .source(ParamType::Any)
                .service("greeting")
                .build(|args| Ok(Value::from(format!("{} {}", args[1], args[0])))),
        );
        let cache = service
            .prepare(ValueType::String, "Greet", &[])
            .expect("overload");
        let mut services = ServiceCollection::new();
        services.add("greeting", Value::from("Hi"));
        let result = service.execute(&cache, Value::from("Bob"), vec![], &services);
        assert_eq!(result, Ok(Value::from("Hi Bob")));
        let missing = service.execute(&cache, Value::from("Bob"), vec![], &ServiceCollection::new());
        assert!(missing.is_err());
    }

    #[test]
    fn test_cache_reuses_plan() {
        let service = add_service();
        let shape = [positional(ValueType::Integer)];
        let first = service.prepare(ValueType::Integer, "Add", &shape).unwrap();
        let second = service.prepare(ValueType::Integer, "Add", &shape).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_disabled_cache_resolves_each_time() {
        let mut service = add_service();
        service.set_cache_enabled(false);
        let shape = [positional(ValueType::Integer)];
        let first = service.prepare(ValueType::Integer, "Add", &shape).unwrap();
        let second = service.prepare(ValueType::Integer, "Add", &shape).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first.model, &second.model));
    }
}
