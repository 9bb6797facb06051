//! Member resolution for path segments.
//!
//! Each segment is tried against the registered [`ValueResolver`]s, then as a dictionary key,
//! then through the fallback [`MemberResolver`].

use crate::value::Value;
use std::sync::Arc;

/// Pluggable resolver for host object models.
pub trait ValueResolver: Send + Sync {
    /// Resolve `member` on `value`, or `None` to let the next resolver try.
    fn resolve(&self, value: &Value, member: &str) -> Option<Value>;
}

/// Fallback consulted after dictionary lookup fails.
pub trait MemberResolver: Send + Sync {
    fn resolve_member(&self, value: &Value, member: &str) -> Option<Value>;
}

/// Built-in fallback: numeric array indexes and `Length`/`Count`/`Keys`/`Values`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMemberResolver;

impl MemberResolver for DefaultMemberResolver {
    fn resolve_member(&self, value: &Value, member: &str) -> Option<Value> {
        match (value, member) {
            (Value::Array(arr), "Length" | "Count") => Some(arr.len().into()),
            (Value::String(s), "Length") => Some(s.chars().count().into()),
            (Value::Object(obj), "Count") => Some(obj.len().into()),
            (Value::Object(obj), "Keys") => Some(Value::array(
                obj.keys().map(|k| Value::String(k.clone())),
            )),
            (Value::Object(obj), "Values") => Some(Value::array(obj.values().cloned())),
            (Value::Array(arr), index) => index
                .parse::<usize>()
                .ok()
                .and_then(|i| arr.get(i).cloned()),
            _ => None,
        }
    }
}

/// Resolve one member against `value` through the full resolver chain.
pub fn resolve_member(
    value: &Value,
    member: &str,
    value_resolvers: &[Arc<dyn ValueResolver>],
    fallback: &dyn MemberResolver,
) -> Option<Value> {
    for resolver in value_resolvers {
        if let Some(resolved) = resolver.resolve(value, member) {
            return Some(resolved);
        }
    }
    if let Some(found) = value.get(member) {
        return Some(found.clone());
    }
    fallback.resolve_member(value, member)
}

/// Resolve an index segment (`items[0]`, `map['key']`).
pub fn resolve_index(
    value: &Value,
    index: &Value,
    value_resolvers: &[Arc<dyn ValueResolver>],
    fallback: &dyn MemberResolver,
) -> Option<Value> {
    match (value, index) {
        (Value::Array(arr), Value::Integer(i)) => {
            let i = if *i < 0 { arr.len() as i64 + i } else { *i };
            usize::try_from(i).ok().and_then(|i| arr.get(i).cloned())
        }
        (_, Value::String(key)) => resolve_member(value, key, value_resolvers, fallback),
        (_, Value::Integer(i)) => {
            resolve_member(value, &i.to_string(), value_resolvers, fallback)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl ValueResolver for Upper {
        fn resolve(&self, value: &Value, member: &str) -> Option<Value> {
            match (value, member) {
                (Value::String(s), "Upper") => Some(Value::String(s.to_uppercase())),
                _ => None,
            }
        }
    }

    #[test]
    fn test_dictionary_lookup() {
        let value = Value::object([("a", Value::Integer(1))]);
        assert_eq!(
            resolve_member(&value, "a", &[], &DefaultMemberResolver),
            Some(Value::Integer(1))
        );
        assert_eq!(resolve_member(&value, "b", &[], &DefaultMemberResolver), None);
    }

    #[test]
    fn test_value_resolver_runs_first() {
        let resolvers: Vec<Arc<dyn ValueResolver>> = vec![Arc::new(Upper)];
        assert_eq!(
            resolve_member(&Value::from("abc"), "Upper", &resolvers, &DefaultMemberResolver),
            Some(Value::from("ABC"))
        );
    }

    #[test]
    fn test_fallback_members() {
        let array = Value::array([Value::Integer(5), Value::Integer(6)]);
        assert_eq!(
            resolve_member(&array, "Count", &[], &DefaultMemberResolver),
            Some(Value::Integer(2))
        );
        assert_eq!(
            resolve_member(&array, "1", &[], &DefaultMemberResolver),
            Some(Value::Integer(6))
        );
        assert_eq!(
            resolve_member(&Value::from("héllo"), "Length", &[], &DefaultMemberResolver),
            Some(Value::Integer(5))
        );
    }

    #[test]
    fn test_negative_index_counts_from_end() {
        let array = Value::array([Value::Integer(5), Value::Integer(6)]);
        assert_eq!(
            resolve_index(&array, &Value::Integer(-1), &[], &DefaultMemberResolver),
            Some(Value::Integer(6))
        );
        assert_eq!(
            resolve_index(&array, &Value::Integer(9), &[], &DefaultMemberResolver),
            None
        );
    }
}
