//! Default formatter library registered by [`FormatterService::with_defaults`].

use super::{FormatterBuilder, FormatterError, FormatterService, ParamType};
use crate::value::{Value, ValueType};

fn integer() -> ParamType {
    ParamType::Exact(ValueType::Integer)
}

fn float() -> ParamType {
    ParamType::Exact(ValueType::Float)
}

fn string() -> ParamType {
    ParamType::Exact(ValueType::String)
}

fn array() -> ParamType {
    ParamType::Exact(ValueType::Array)
}

fn int_arg(args: &[Value], index: usize) -> i64 {
    args.get(index).and_then(Value::as_i64).unwrap_or_default()
}

fn float_arg(args: &[Value], index: usize) -> f64 {
    args.get(index).and_then(Value::as_f64).unwrap_or_default()
}

fn str_arg(args: &[Value], index: usize) -> &str {
    args.get(index).and_then(Value::as_str).unwrap_or_default()
}

fn array_arg(args: &[Value], index: usize) -> &[Value] {
    args.get(index).and_then(Value::as_array).unwrap_or_default()
}

fn overflow(name: &str) -> FormatterError {
    FormatterError::new(format!("integer overflow in {name}"))
}

/// Register the arithmetic, string and collection formatters.
pub fn register_defaults(service: &mut FormatterService) {
    register_arithmetic(service);
    register_strings(service);
    register_collections(service);
    register_values(service);
}

fn register_arithmetic(service: &mut FormatterService) {
    type IntOp = fn(i64, i64) -> Option<i64>;
    type FloatOp = fn(f64, f64) -> f64;
    let operations: [(&str, IntOp, FloatOp); 5] = [
        ("Add", i64::checked_add, |a, b| a + b),
        ("Subtract", i64::checked_sub, |a, b| a - b),
        ("Multiply", i64::checked_mul, |a, b| a * b),
        ("Divide", i64::checked_div, |a, b| a / b),
        ("Modulo", i64::checked_rem, |a, b| a % b),
    ];
    for (name, int_op, float_op) in operations {
        service.register(
            FormatterBuilder::new(name)
                .source(integer())
                .param("value", integer())
                .build(move |args| {
                    let (a, b) = (int_arg(args, 0), int_arg(args, 1));
                    if b == 0 && matches!(name, "Divide" | "Modulo") {
                        return Err(FormatterError::new("division by zero"));
                    }
                    int_op(a, b).map(Value::Integer).ok_or_else(|| overflow(name))
                }),
        );
        service.register(
            FormatterBuilder::new(name)
                .source(float())
                .param("value", float())
                .build(move |args| Ok(Value::Float(float_op(float_arg(args, 0), float_arg(args, 1))))),
        );
    }

    service.register(
        FormatterBuilder::new("Round")
            .source(ParamType::Number)
            .optional("digits", integer(), Value::Integer(0))
            .build(|args| {
                let digits = int_arg(args, 1).clamp(0, 15) as i32;
                let factor = 10f64.powi(digits);
                let rounded = (float_arg(args, 0) * factor).round() / factor;
                Ok(if digits == 0 {
                    Value::Integer(rounded as i64)
                } else {
                    Value::Float(rounded)
                })
            }),
    );

    // Array concatenation, reached through the `+` operator fallback.
    service.register(
        FormatterBuilder::new("op_Add")
            .source(array())
            .param("other", array())
            .build(|args| {
                let mut items = array_arg(args, 0).to_vec();
                items.extend_from_slice(array_arg(args, 1));
                Ok(Value::from(items))
            }),
    );
}

fn register_strings(service: &mut FormatterService) {
    service.register(
        FormatterBuilder::new("ToUpper")
            .source(string())
            .build(|args| Ok(Value::from(str_arg(args, 0).to_uppercase()))),
    );
    service.register(
        FormatterBuilder::new("ToLower")
            .source(string())
            .build(|args| Ok(Value::from(str_arg(args, 0).to_lowercase()))),
    );
    service.register(
        FormatterBuilder::new("Trim")
            .source(string())
            .build(|args| Ok(Value::from(str_arg(args, 0).trim()))),
    );
    service.register(
        FormatterBuilder::new("Case")
            .source(string())
            .param(
                "mode",
                ParamType::Enum(vec!["Upper".into(), "Lower".into(), "Title".into()]),
            )
            .build(|args| {
                let text = str_arg(args, 0);
                Ok(Value::from(match str_arg(args, 1) {
                    "Upper" => text.to_uppercase(),
                    "Lower" => text.to_lowercase(),
                    _ => title_case(text),
                }))
            }),
    );
    service.register(
        FormatterBuilder::new("Substring")
            .source(string())
            .param("start", integer())
            .optional("length", integer(), Value::Integer(-1))
            .build(|args| {
                let start = usize::try_from(int_arg(args, 1)).unwrap_or_default();
                let chars = str_arg(args, 0).chars().skip(start);
                Ok(Value::from(match usize::try_from(int_arg(args, 2)) {
                    Ok(length) => chars.take(length).collect::<String>(),
                    Err(_) => chars.collect::<String>(),
                }))
            }),
    );
    service.register(
        FormatterBuilder::new("PadLeft")
            .source(ParamType::Any)
            .param("width", integer())
            .optional("fill", string(), Value::from(" "))
            .build(|args| {
                let text = args[0].to_string();
                let width = usize::try_from(int_arg(args, 1)).unwrap_or_default();
                let fill = str_arg(args, 2).chars().next().unwrap_or(' ');
                let missing = width.saturating_sub(text.chars().count());
                Ok(Value::from(format!(
                    "{}{text}",
                    std::iter::repeat(fill).take(missing).collect::<String>()
                )))
            }),
    );
    service.register(
        FormatterBuilder::new("Concat")
            .source(ParamType::Any)
            .rest("values", ParamType::Any)
            .build(|args| {
                let mut text = args[0].to_string();
                for value in array_arg(args, 1) {
                    text.push_str(&value.to_string());
                }
                Ok(Value::from(text))
            }),
    );
    service.register(
        FormatterBuilder::new("Contains")
            .source(string())
            .param("value", string())
            .build(|args| Ok(Value::Bool(str_arg(args, 0).contains(str_arg(args, 1))))),
    );
}

fn register_collections(service: &mut FormatterService) {
    service.register(
        FormatterBuilder::new("Join")
            .source(array())
            .optional("separator", string(), Value::from(", "))
            .build(|args| {
                let items: Vec<String> = array_arg(args, 0).iter().map(ToString::to_string).collect();
                Ok(Value::from(items.join(str_arg(args, 1))))
            }),
    );
    service.register(
        FormatterBuilder::new("Count")
            .source(array())
            .build(|args| Ok(array_arg(args, 0).len().into())),
    );
    service.register(
        FormatterBuilder::new("Reverse")
            .source(array())
            .build(|args| Ok(Value::array(array_arg(args, 0).iter().rev().cloned()))),
    );
    service.register(
        FormatterBuilder::new("First")
            .source(array())
            .build(|args| Ok(array_arg(args, 0).first().cloned().unwrap_or_default())),
    );
    service.register(
        FormatterBuilder::new("Last")
            .source(array())
            .build(|args| Ok(array_arg(args, 0).last().cloned().unwrap_or_default())),
    );
    service.register(
        FormatterBuilder::new("Contains")
            .source(array())
            .param("value", ParamType::Any)
            .build(|args| {
                let needle = &args[1];
                Ok(Value::Bool(
                    array_arg(args, 0).iter().any(|item| item.loosely_equals(needle)),
                ))
            }),
    );
}

fn register_values(service: &mut FormatterService) {
    service.register(
        FormatterBuilder::new("Default")
            .source(ParamType::Any)
            .param("fallback", ParamType::Any)
            .build(|args| {
                Ok(if args[0].is_truthy() {
                    args[0].clone()
                } else {
                    args[1].clone()
                })
            }),
    );
    service.register(
        FormatterBuilder::new("Equals")
            .source(ParamType::Any)
            .param("other", ParamType::Any)
            .build(|args| Ok(Value::Bool(args[0].loosely_equals(&args[1])))),
    );
    service.register(
        FormatterBuilder::new("ToString")
            .source(ParamType::Any)
            .build(|args| Ok(Value::from(args[0].to_string()))),
    );
}

fn title_case(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut start_of_word = true;
    for c in text.chars() {
        if c.is_whitespace() {
            start_of_word = true;
            result.push(c);
        } else if start_of_word {
            result.extend(c.to_uppercase());
            start_of_word = false;
        } else {
            result.extend(c.to_lowercase());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::ArgDescriptor;
    use crate::services::ServiceCollection;

    fn run(name: &str, receiver: Value, arguments: Vec<Value>) -> Result<Value, FormatterError> {
        let service = FormatterService::with_defaults();
        let shape: Vec<ArgDescriptor> = arguments
            .iter()
            .map(|v| ArgDescriptor {
                name: None,
                ty: v.value_type(),
            })
            .collect();
        let cache = service
            .prepare(receiver.value_type(), name, &shape)
            .unwrap_or_else(|| panic!("no overload for {name}"));
        service.execute(&cache, receiver, arguments, &ServiceCollection::new())
    }

    #[test]
    fn test_integer_add() {
        assert_eq!(
            run("Add", Value::Integer(7), vec![Value::Integer(5)]),
            Ok(Value::Integer(12))
        );
    }

    #[test]
    fn test_divide_by_zero_is_error() {
        assert!(run("Divide", Value::Integer(1), vec![Value::Integer(0)]).is_err());
    }

    #[test]
    fn test_overflow_is_error() {
        assert!(run("Multiply", Value::Integer(i64::MAX), vec![Value::Integer(2)]).is_err());
    }

    #[test]
    fn test_round() {
        assert_eq!(run("Round", Value::Float(2.346), vec![Value::Integer(2)]), Ok(Value::Float(2.35)));
        assert_eq!(run("Round", Value::Float(2.5), vec![]), Ok(Value::Integer(3)));
    }

    #[test]
    fn test_case_enum() {
        assert_eq!(
            run("Case", Value::from("hello world"), vec![Value::from("title")]),
            Ok(Value::from("Hello World"))
        );
    }

    #[test]
    fn test_substring() {
        assert_eq!(
            run("Substring", Value::from("template"), vec![Value::Integer(2), Value::Integer(3)]),
            Ok(Value::from("mpl"))
        );
        assert_eq!(
            run("Substring", Value::from("template"), vec![Value::Integer(4)]),
            Ok(Value::from("late"))
        );
    }

    #[test]
    fn test_pad_left() {
        assert_eq!(
            run("PadLeft", Value::Integer(7), vec![Value::Integer(3), Value::from("0")]),
            Ok(Value::from("007"))
        );
    }

    #[test]
    fn test_concat_rest() {
        assert_eq!(
            run(
                "Concat",
                Value::from("a"),
                vec![Value::from("b"), Value::Integer(1)]
            ),
            Ok(Value::from("ab1"))
        );
    }

    #[test]
    fn test_join_default_separator() {
        let items = Value::array([Value::Integer(1), Value::Integer(2)]);
        assert_eq!(run("Join", items, vec![]), Ok(Value::from("1, 2")));
    }

    #[test]
    fn test_contains_overloads() {
        let items = Value::array([Value::Integer(1), Value::Integer(2)]);
        assert_eq!(run("Contains", items, vec![Value::Float(2.0)]), Ok(Value::Bool(true)));
        assert_eq!(
            run("Contains", Value::from("abc"), vec![Value::from("bc")]),
            Ok(Value::Bool(true))
        );
    }

    #[test]
    fn test_array_concatenation_operator() {
        let left = Value::array([Value::Integer(1)]);
        let right = Value::array([Value::Integer(2)]);
        assert_eq!(
            run("op_Add", left, vec![right]),
            Ok(Value::array([Value::Integer(1), Value::Integer(2)]))
        );
    }
}
