//! Expression evaluation against a context chain.
//!
//! [`evaluate`] walks an expression tree on every call; [`compile_expression`] turns the same
//! tree into a closure once. Both go through the same step, formatter and operator helpers, so
//! they cannot drift apart.

use crate::context::{CollectionInfo, Context};
use crate::error::{Result, TemplateError};
use crate::formatter::{ArgDescriptor, FormatterErrorPolicy};
use crate::resolver::{resolve_index, resolve_member};
use crate::scope::RenderScope;
use crate::value::Value;
use std::cmp::Ordering;
use std::rc::Rc;
use std::sync::Arc;
use tessera_ast::{Expression, Literal, Location, Operator, PathSegment};
use tracing::warn;

/// Expression compiled into a closure.
pub(crate) type CompiledExpression =
    Arc<dyn Fn(&Rc<Context>, &RenderScope) -> Result<Rc<Context>> + Send + Sync>;

/// Argument after evaluation: optional name plus value.
type EvaluatedArgument = (Option<String>, Value);

/// One resolved path segment.
enum Step<'a> {
    Current,
    Parent,
    Root,
    Member(&'a str),
    Variable(&'a str),
    Index(Value),
}

impl Step<'_> {
    fn key(&self) -> String {
        match self {
            Step::Current => ".".to_string(),
            Step::Parent => "..".to_string(),
            Step::Root => "~".to_string(),
            Step::Member(name) => (*name).to_string(),
            Step::Variable(name) => format!("${name}"),
            Step::Index(index) => format!("[{index}]"),
        }
    }
}

/// Context-level truthiness: missing values are false, the rest follow the definition of false.
pub(crate) fn is_truthy(context: &Context, scope: &RenderScope) -> bool {
    context.exists() && !scope.options().is_false(context.value())
}

pub(crate) fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Integer(n) => Value::Integer(*n),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(s.clone()),
    }
}

/// Evaluate `expression` with `context` as the current value.
pub(crate) fn evaluate(
    expression: &Expression,
    context: &Rc<Context>,
    scope: &RenderScope,
) -> Result<Rc<Context>> {
    match expression {
        Expression::Literal(literal) => Ok(Context::child(context, "", literal_value(literal))),
        Expression::Path(path) => {
            let mut current = match &path.target {
                Some(target) => evaluate(target, context, scope)?,
                None => Rc::clone(context),
            };
            for (position, segment) in path.segments.iter().enumerate() {
                let step = match segment {
                    PathSegment::Current => Step::Current,
                    PathSegment::Parent => Step::Parent,
                    PathSegment::Root => Step::Root,
                    PathSegment::Member(name) => Step::Member(name),
                    PathSegment::Variable(name) => Step::Variable(name),
                    PathSegment::Index(index) => {
                        Step::Index(evaluate(index, context, scope)?.value().clone())
                    }
                };
                let leading = position == 0 && path.target.is_none();
                current = apply_step(&current, step, leading, scope);
            }
            check_resolved(current, scope, || path.to_string(), path.location)
        }
        Expression::Call(call) => {
            let receiver = match &call.target {
                Some(target) => evaluate(target, context, scope)?,
                None => Rc::clone(context),
            };
            let mut arguments = Vec::with_capacity(call.arguments.len());
            for argument in &call.arguments {
                let value = evaluate(&argument.value, context, scope)?;
                arguments.push((argument.name.clone(), value.value().clone()));
            }
            call_formatter(&call.name, &receiver, arguments, scope, call.location)
        }
        Expression::Operator(op) => {
            let left = evaluate(&op.left, context, scope)?;
            if let Some(short) = short_circuit(op.operator, &left, context, scope) {
                return Ok(short);
            }
            let right = match &op.right {
                Some(right) => Some(evaluate(right, context, scope)?),
                None => None,
            };
            apply_operator(
                op.operator,
                context,
                &left,
                right.as_ref(),
                scope,
                || expression.to_string(),
                op.location,
            )
        }
    }
}

enum CompiledSegment {
    Current,
    Parent,
    Root,
    Member(String),
    Variable(String),
    Index(CompiledExpression),
}

/// Compile `expression` once; the closure behaves exactly like [`evaluate`].
pub(crate) fn compile_expression(expression: &Expression) -> CompiledExpression {
    match expression {
        Expression::Literal(literal) => {
            let value = literal_value(literal);
            Arc::new(move |context: &Rc<Context>, _: &RenderScope| Ok(Context::child(context, "", value.clone())))
        }
        Expression::Path(path) => {
            let target = path.target.as_deref().map(compile_expression);
            let segments: Vec<CompiledSegment> = path
                .segments
                .iter()
                .map(|segment| match segment {
                    PathSegment::Current => CompiledSegment::Current,
                    PathSegment::Parent => CompiledSegment::Parent,
                    PathSegment::Root => CompiledSegment::Root,
                    PathSegment::Member(name) => CompiledSegment::Member(name.clone()),
                    PathSegment::Variable(name) => CompiledSegment::Variable(name.clone()),
                    PathSegment::Index(index) => CompiledSegment::Index(compile_expression(index)),
                })
                .collect();
            let display = path.to_string();
            let location = path.location;
            Arc::new(move |context: &Rc<Context>, scope: &RenderScope| {
                let mut current = match &target {
                    Some(target) => target(context, scope)?,
                    None => Rc::clone(context),
                };
                for (position, segment) in segments.iter().enumerate() {
                    let step = match segment {
                        CompiledSegment::Current => Step::Current,
                        CompiledSegment::Parent => Step::Parent,
                        CompiledSegment::Root => Step::Root,
                        CompiledSegment::Member(name) => Step::Member(name),
                        CompiledSegment::Variable(name) => Step::Variable(name),
                        CompiledSegment::Index(index) => {
                            Step::Index(index(context, scope)?.value().clone())
                        }
                    };
                    current = apply_step(&current, step, position == 0 && target.is_none(), scope);
                }
                check_resolved(current, scope, || display.clone(), location)
            })
        }
        Expression::Call(call) => {
            let target = call.target.as_deref().map(compile_expression);
            let arguments: Vec<(Option<String>, CompiledExpression)> = call
                .arguments
                .iter()
                .map(|argument| (argument.name.clone(), compile_expression(&argument.value)))
                .collect();
            let name = call.name.clone();
            let location = call.location;
            Arc::new(move |context: &Rc<Context>, scope: &RenderScope| {
                let receiver = match &target {
                    Some(target) => target(context, scope)?,
                    None => Rc::clone(context),
                };
                let mut values = Vec::with_capacity(arguments.len());
                for (argument_name, argument) in &arguments {
                    values.push((argument_name.clone(), argument(context, scope)?.value().clone()));
                }
                call_formatter(&name, &receiver, values, scope, location)
            })
        }
        Expression::Operator(op) => {
            let operator = op.operator;
            let left = compile_expression(&op.left);
            let right = op.right.as_deref().map(compile_expression);
            let display = expression.to_string();
            let location = op.location;
            Arc::new(move |context: &Rc<Context>, scope: &RenderScope| {
                let left = left(context, scope)?;
                if let Some(short) = short_circuit(operator, &left, context, scope) {
                    return Ok(short);
                }
                let right = match &right {
                    Some(right) => Some(right(context, scope)?),
                    None => None,
                };
                apply_operator(
                    operator,
                    context,
                    &left,
                    right.as_ref(),
                    scope,
                    || display.clone(),
                    location,
                )
            })
        }
    }
}

fn check_resolved(
    result: Rc<Context>,
    scope: &RenderScope,
    describe: impl FnOnce() -> String,
    location: Location,
) -> Result<Rc<Context>> {
    if !result.exists() && scope.options().strict_paths() {
        return Err(TemplateError::UnresolvedPath {
            path: describe(),
            location,
        });
    }
    Ok(result)
}

/// Apply one segment. A missing context stays missing for every later segment.
fn apply_step(current: &Rc<Context>, step: Step<'_>, leading: bool, scope: &RenderScope) -> Rc<Context> {
    if !current.exists() {
        return Context::missing(current, step.key());
    }
    let options = scope.options();
    let resolved = match &step {
        Step::Current => return Rc::clone(current),
        Step::Parent => return Context::lexical_parent(current),
        Step::Root => return Context::root_of(current),
        Step::Variable("root") => return Context::root_of(current),
        Step::Member(name) => {
            let variable = if leading {
                scope.variable(name).cloned()
            } else {
                None
            };
            variable.or_else(|| {
                resolve_member(
                    current.value(),
                    name,
                    options.value_resolvers(),
                    options.member_resolver(),
                )
            })
        }
        Step::Variable(name) => {
            special_variable(name, current, scope).or_else(|| scope.variable(name).cloned())
        }
        Step::Index(index) => resolve_index(
            current.value(),
            index,
            options.value_resolvers(),
            options.member_resolver(),
        ),
    };
    match resolved {
        Some(value) => Context::child(current, step.key(), value),
        None => Context::missing(current, step.key()),
    }
}

fn special_variable(name: &str, current: &Context, scope: &RenderScope) -> Option<Value> {
    let loop_info = || current.collection();
    match name {
        "index" => loop_info().map(|info| info.index.into()),
        "first" => loop_info().map(|info| Value::Bool(info.index == 0)),
        "last" => loop_info().map(|info| Value::Bool(info.last)),
        "middle" => loop_info().map(|info: CollectionInfo| Value::Bool(info.index != 0 && !info.last)),
        "odd" => loop_info().map(|info| Value::Bool(info.index % 2 == 1)),
        "even" => loop_info().map(|info| Value::Bool(info.index % 2 == 0)),
        "name" => scope.current_partial().map(Value::from),
        "recursion" => Some(scope.partial_depth().into()),
        "services" => Some(scope.options().services().as_value()),
        _ => None,
    }
}

/// Dispatch `name` against the receiver and apply the formatter error policy.
pub(crate) fn call_formatter(
    name: &str,
    receiver: &Rc<Context>,
    arguments: Vec<EvaluatedArgument>,
    scope: &RenderScope,
    location: Location,
) -> Result<Rc<Context>> {
    let options = scope.options();
    let receiver_type = receiver.value().value_type();
    let shape: Vec<ArgDescriptor> = arguments
        .iter()
        .map(|(name, value)| ArgDescriptor {
            name: name.clone(),
            ty: value.value_type(),
        })
        .collect();
    let Some(cache) = options.formatters().prepare(receiver_type, name, &shape) else {
        if options.strict_paths() {
            return Err(TemplateError::FormatterNotFound {
                name: name.to_string(),
                receiver: receiver_type.to_string(),
                location,
            });
        }
        warn!(formatter = name, receiver = %receiver_type, %location, "no matching formatter");
        return Ok(Context::missing(receiver, format!("{name}()")));
    };
    let values = arguments.into_iter().map(|(_, value)| value).collect();
    let value = run_formatter(&cache, name, receiver.value().clone(), values, scope, location)?;
    Ok(Context::child(receiver, format!("{name}()"), value))
}

fn run_formatter(
    cache: &crate::formatter::FormatterCache,
    name: &str,
    receiver: Value,
    arguments: Vec<Value>,
    scope: &RenderScope,
    location: Location,
) -> Result<Value> {
    let options = scope.options();
    match options
        .formatters()
        .execute(cache, receiver, arguments, options.services())
    {
        Ok(value) => Ok(value),
        Err(error) => match options.formatter_errors() {
            FormatterErrorPolicy::Propagate => Err(TemplateError::Formatter {
                name: name.to_string(),
                message: error.message,
                location,
            }),
            FormatterErrorPolicy::Swallow => {
                warn!(formatter = name, %location, error = %error, "formatter failed");
                Ok(Value::Null)
            }
            FormatterErrorPolicy::Stringify => Ok(Value::String(error.message)),
        },
    }
}

fn short_circuit(
    operator: Operator,
    left: &Context,
    context: &Rc<Context>,
    scope: &RenderScope,
) -> Option<Rc<Context>> {
    match operator {
        Operator::And if !is_truthy(left, scope) => Some(Context::child(context, "", false.into())),
        Operator::Or if is_truthy(left, scope) => Some(Context::child(context, "", true.into())),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(_) | Value::Float(_) => value.as_f64(),
        _ => None,
    }
}

/// Operator semantics built into the engine. `Ok(None)` defers to an `op_<Name>` formatter.
fn native_operator(
    operator: Operator,
    left: &Context,
    right: Option<&Context>,
    scope: &RenderScope,
) -> std::result::Result<Option<Value>, String> {
    let lhs = left.value();
    match operator {
        Operator::Not => return Ok(Some(Value::Bool(!is_truthy(left, scope)))),
        Operator::And | Operator::Or => {
            let right = right.is_some_and(|right| is_truthy(right, scope));
            return Ok(Some(Value::Bool(right)));
        }
        Operator::Negate => {
            return match lhs {
                Value::Integer(n) => n
                    .checked_neg()
                    .map(|n| Some(Value::Integer(n)))
                    .ok_or_else(|| "integer overflow".to_string()),
                Value::Float(f) => Ok(Some(Value::Float(-f))),
                _ => Ok(None),
            };
        }
        _ => {}
    }
    let Some(rhs) = right.map(Context::value) else {
        return Ok(None);
    };
    match operator {
        Operator::Equals => return Ok(Some(Value::Bool(lhs.loosely_equals(rhs)))),
        Operator::NotEquals => return Ok(Some(Value::Bool(!lhs.loosely_equals(rhs)))),
        Operator::Add => match (lhs, rhs) {
            (Value::String(a), b) => return Ok(Some(Value::String(format!("{a}{b}")))),
            (a, Value::String(b)) if !matches!(a, Value::Array(_)) => {
                return Ok(Some(Value::String(format!("{a}{b}"))))
            }
            _ => {}
        },
        _ => {}
    }

    if let Operator::Less
    | Operator::LessOrEqual
    | Operator::Greater
    | Operator::GreaterOrEqual = operator
    {
        let ordering = match (lhs, rhs) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => match (number(lhs), number(rhs)) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        };
        let Some(ordering) = ordering else {
            return Ok(None);
        };
        let result = match operator {
            Operator::Less => ordering == Ordering::Less,
            Operator::LessOrEqual => ordering != Ordering::Greater,
            Operator::Greater => ordering == Ordering::Greater,
            _ => ordering != Ordering::Less,
        };
        return Ok(Some(Value::Bool(result)));
    }

    if let (Value::Integer(a), Value::Integer(b)) = (lhs, rhs) {
        if *b == 0 && matches!(operator, Operator::Divide | Operator::Modulo) {
            return Err("division by zero".to_string());
        }
        let result = match operator {
            Operator::Add => a.checked_add(*b),
            Operator::Subtract => a.checked_sub(*b),
            Operator::Multiply => a.checked_mul(*b),
            Operator::Divide => a.checked_div(*b),
            Operator::Modulo => a.checked_rem(*b),
            _ => return Ok(None),
        };
        return result
            .map(|n| Some(Value::Integer(n)))
            .ok_or_else(|| "integer overflow".to_string());
    }
    let (Some(a), Some(b)) = (number(lhs), number(rhs)) else {
        return Ok(None);
    };
    let result = match operator {
        Operator::Add => a + b,
        Operator::Subtract => a - b,
        Operator::Multiply => a * b,
        Operator::Divide => a / b,
        Operator::Modulo => a % b,
        _ => return Ok(None),
    };
    Ok(Some(Value::Float(result)))
}

fn apply_operator(
    operator: Operator,
    context: &Rc<Context>,
    left: &Rc<Context>,
    right: Option<&Rc<Context>>,
    scope: &RenderScope,
    describe: impl FnOnce() -> String,
    location: Location,
) -> Result<Rc<Context>> {
    let type_error = |message: String, describe: String| TemplateError::TypeError {
        message,
        path: describe,
        breadcrumb: context.path(),
        location,
    };
    match native_operator(operator, left, right.map(|right| &**right), scope) {
        Ok(Some(value)) => return Ok(Context::child(context, "", value)),
        Ok(None) => {}
        Err(message) => return Err(type_error(message, describe())),
    }

    let name = format!("op_{}", operator.name());
    let arguments: Vec<Value> = right.map(|right| right.value().clone()).into_iter().collect();
    let shape: Vec<ArgDescriptor> = arguments
        .iter()
        .map(|value| ArgDescriptor {
            name: None,
            ty: value.value_type(),
        })
        .collect();
    let receiver_type = left.value().value_type();
    if let Some(cache) = scope
        .options()
        .formatters()
        .prepare(receiver_type, &name, &shape)
    {
        let value = run_formatter(&cache, &name, left.value().clone(), arguments, scope, location)?;
        return Ok(Context::child(context, "", value));
    }

    let any_missing = !left.exists() || right.is_some_and(|right| !right.exists());
    if any_missing && !scope.options().strict_paths() {
        return Ok(Context::missing(context, operator.symbol()));
    }
    let message = match right {
        Some(right) => format!(
            "operator '{}' is not defined for {} and {}",
            operator.symbol(),
            receiver_type,
            right.value().value_type()
        ),
        None => format!(
            "operator '{}' is not defined for {}",
            operator.symbol(),
            receiver_type
        ),
    };
    Err(type_error(message, describe()))
}
