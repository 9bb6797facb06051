//! Integration tests for render limits, partial stores, extension points and concurrency.
//!
//! Every template is rendered with the interpreter and the compiler.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tessera::{
    CancellationToken, CustomItemProvider, CustomTagOutcome, FilePartialStore, FormatterBuilder,
    MemoryPartialStore, ParamType, ParserOptionsBuilder, PartialStackOverflowBehavior,
    RenderResult, ScopeBag, Template, TemplateError, Value, ValueResolver, ValueType,
};

fn template(options: ParserOptionsBuilder) -> Template {
    tessera::parse(options.build())
        .expect("parse")
        .into_template()
        .expect("valid template")
}

/// Render with both strategies, insisting they agree.
fn render(options: ParserOptionsBuilder, data: serde_json::Value) -> Result<RenderResult, TemplateError> {
    let template = template(options);
    let data = Value::from_json(data);
    let interpreted = template.render(&data);
    let compiled = template.compile().render(&data);
    match (&interpreted, &compiled) {
        (Ok(a), Ok(b)) => {
            assert_eq!(a.output, b.output);
            assert_eq!(a.truncated, b.truncated);
        }
        (Err(a), Err(b)) => assert_eq!(a.to_string(), b.to_string()),
        _ => panic!("strategies disagree: {interpreted:?} vs {compiled:?}"),
    }
    interpreted
}

fn output(options: ParserOptionsBuilder, data: serde_json::Value) -> String {
    render(options, data).expect("render").output
}

// ============================================================================
// Output limit, cancellation, timeout
// ============================================================================

#[test]
fn max_size_keeps_exactly_the_first_characters() {
    let options = ParserOptionsBuilder::new("{{#each xs}}{{.}}{{/each}}tail").max_size(5);
    let result = render(options, json!({"xs": ["abc", "def", "ghi"]})).unwrap();
    assert_eq!(result.output, "abcde");
    assert!(result.truncated);
}

#[test]
fn max_size_counts_characters_not_bytes() {
    let options = ParserOptionsBuilder::new("{{s}}").max_size(3);
    let result = render(options, json!({"s": "äöüß"})).unwrap();
    assert_eq!(result.output, "äöü");
}

#[test]
fn output_under_limit_is_not_truncated() {
    let options = ParserOptionsBuilder::new("abc").max_size(3);
    let result = render(options, json!({})).unwrap();
    assert_eq!(result.output, "abc");
    assert!(!result.truncated);
}

#[test]
fn output_limit_stops_infinite_loop() {
    let options = ParserOptionsBuilder::new("{{#while true}}x{{/while}}").max_size(4);
    let result = render(options, json!({})).unwrap();
    assert_eq!(result.output, "xxxx");
    assert!(result.truncated);
}

#[test]
fn timeout_stops_infinite_loop() {
    let options =
        ParserOptionsBuilder::new("{{#while true}}{{/while}}").timeout(Duration::from_millis(20));
    let err = render(options, json!({})).unwrap_err();
    assert!(matches!(err, TemplateError::Timeout(_)), "{err}");
}

#[test]
fn cancelled_token_aborts_render() {
    let template = template(ParserOptionsBuilder::new("a{{#each xs}}{{.}}{{/each}}"));
    let data = Value::from_json(json!({"xs": [1, 2]}));
    let token = CancellationToken::new();
    token.cancel();
    let err = template.render_with_token(&data, token.clone()).unwrap_err();
    assert!(matches!(err, TemplateError::Cancelled));
    let err = template.compile().render_with_token(&data, token).unwrap_err();
    assert!(matches!(err, TemplateError::Cancelled));
}

#[test]
fn cancellation_from_another_thread() {
    let template = template(ParserOptionsBuilder::new("{{#while true}}{{/while}}"));
    let compiled = template.compile();
    for compiled_strategy in [false, true] {
        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                token.cancel();
            })
        };
        let result = if compiled_strategy {
            compiled.render_with_token(&Value::Null, token)
        } else {
            template.render_with_token(&Value::Null, token)
        };
        canceller.join().unwrap();
        assert!(matches!(result, Err(TemplateError::Cancelled)));
    }
}

// ============================================================================
// Partial recursion
// ============================================================================

#[test]
fn partial_overflow_raises_with_call_chain() {
    let options = ParserOptionsBuilder::new(
        "{{#declare a}}{{#import 'b'}}{{/declare}}{{#declare b}}{{#import 'a'}}{{/declare}}{{#import 'a'}}",
    )
    .partial_stack_size(3);
    match render(options, json!({})).unwrap_err() {
        TemplateError::PartialStackOverflow { chain, limit } => {
            assert_eq!(chain, vec!["a", "b", "a", "b"]);
            assert_eq!(limit, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn partial_overflow_silent_continues_siblings() {
    let options =
        ParserOptionsBuilder::new("{{#declare p}}<{{#import 'p'}}>{{/declare}}{{#import 'p'}}|after")
            .partial_stack_size(2)
            .stack_overflow(PartialStackOverflowBehavior::Silent);
    assert_eq!(output(options, json!({})), "<<>>|after");
}

#[test]
fn deep_recursion_within_limit() {
    let options = ParserOptionsBuilder::new(
        "{{#declare down}}{{#if n > 0}}{{n}} {{#var n = n - 1}}{{#import 'down'}}{{/if}}{{/declare}}{{#var n = 100}}{{#import 'down'}}",
    );
    let result = output(options, json!({}));
    assert!(result.starts_with("100 99 "));
    assert!(result.ends_with(" 2 1 "));
}

#[test]
fn deep_nesting_renders_without_native_recursion() {
    let depth = 2000;
    let source = format!("{}x{}", "{{#if true}}".repeat(depth), "{{/if}}".repeat(depth));
    let template = template(ParserOptionsBuilder::new(source));
    assert_eq!(template.render(&Value::Null).unwrap().output, "x");
}

// ============================================================================
// Null substitution and strict paths
// ============================================================================

#[test]
fn missing_path_uses_null_substitute() {
    let options = ParserOptionsBuilder::new("Hello {{user.name}}!").null_substitute("?");
    assert_eq!(output(options, json!({})), "Hello ?!");
}

#[test]
fn missing_path_in_strict_mode() {
    let options = ParserOptionsBuilder::new("Hello {{user.name}}!").strict_paths(true);
    match render(options, json!({"user": {}})).unwrap_err() {
        TemplateError::UnresolvedPath { path, location } => {
            assert_eq!(path, "user.name");
            assert_eq!(location.line, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn type_error_names_path_and_breadcrumb() {
    let options = ParserOptionsBuilder::new("{{#scope order}}{{#each lines}}x{{/each}}{{/scope}}");
    match render(options, json!({"order": {"lines": 5}})).unwrap_err() {
        TemplateError::TypeError { path, breadcrumb, .. } => {
            assert_eq!(path, "lines");
            assert!(breadcrumb.contains("order"), "{breadcrumb}");
            assert!(breadcrumb.contains("lines"), "{breadcrumb}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ============================================================================
// Partial stores
// ============================================================================

#[test]
fn file_partials_resolve_nested_names() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("header.tsr"), "Header {{title}}\n").unwrap();
    fs::create_dir(dir.path().join("cards")).unwrap();
    fs::write(dir.path().join("cards").join("card.tsr"), "[{{.}}]").unwrap();

    let store = FilePartialStore::new(dir.path()).unwrap();
    let options = ParserOptionsBuilder::new(
        "{{#import 'header'}}{{#each xs}}{{#import 'cards/card'}}{{/each}}",
    )
    .partial_store(Arc::new(store));
    assert_eq!(
        output(options, json!({"title": "T", "xs": [1, 2]})),
        "Header T\n[1][2]"
    );
}

#[test]
fn file_partial_traversal_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = FilePartialStore::new(dir.path()).unwrap();
    let options = ParserOptionsBuilder::new("{{#import target}}").partial_store(Arc::new(store));
    let err = render(options, json!({"target": "../secret"})).unwrap_err();
    assert!(matches!(err, TemplateError::Custom(_)), "{err}");
}

#[test]
fn literal_traversal_name_fails_to_parse() {
    let parsed = tessera::parse(ParserOptionsBuilder::new("{{#import '../secret'}}").build()).unwrap();
    assert!(parsed.has_errors());
    assert!(parsed.template.is_none());
}

#[test]
fn declared_partial_wins_over_store() {
    let mut store = MemoryPartialStore::new();
    store.insert("p", "stored");
    let options = ParserOptionsBuilder::new("{{#declare p}}inline{{/declare}}{{#import 'p'}}")
        .partial_store(Arc::new(store));
    assert_eq!(output(options, json!({})), "inline");
}

#[test]
fn stored_partial_can_recurse_and_use_bare_name() {
    let mut store = MemoryPartialStore::new();
    store.insert("list", "({{#each items}}{{name}}{{#import list}}{{/each}})");
    let options = ParserOptionsBuilder::new("{{#import list}}").partial_store(Arc::new(store));
    let data = json!({
        "items": [
            {"name": "a", "items": [{"name": "b", "items": []}]},
            {"name": "c", "items": []}
        ]
    });
    assert_eq!(output(options, data), "(a(b())c())");
}

#[test]
fn stored_partial_with_syntax_error() {
    let mut store = MemoryPartialStore::new();
    store.insert("broken", "{{#if x}}");
    let options = ParserOptionsBuilder::new("{{#import 'broken'}}").partial_store(Arc::new(store));
    let err = render(options, json!({})).unwrap_err();
    assert!(matches!(err, TemplateError::InvalidTemplate { .. }), "{err}");
}

// ============================================================================
// Extension points
// ============================================================================

struct Stamp;

impl CustomItemProvider for Stamp {
    fn tag(&self) -> &str {
        "stamp"
    }

    fn render(
        &self,
        value: Option<&Value>,
        _context: &Value,
        _bag: &mut ScopeBag,
    ) -> Result<CustomTagOutcome, String> {
        match value {
            Some(Value::String(text)) => Ok(CustomTagOutcome::text(format!("<{text}>"))),
            Some(other) => Err(format!("cannot stamp {other}")),
            None => Ok(CustomTagOutcome::text("<>")),
        }
    }
}

struct Counter;

impl CustomItemProvider for Counter {
    fn tag(&self) -> &str {
        "count"
    }

    fn render(
        &self,
        _value: Option<&Value>,
        _context: &Value,
        bag: &mut ScopeBag,
    ) -> Result<CustomTagOutcome, String> {
        let next = bag.get::<usize>("count").copied().unwrap_or(0) + 1;
        bag.insert("count", next);
        Ok(CustomTagOutcome::text(next.to_string()))
    }
}

/// Block tag rendering its body with the tag value as context when it is truthy.
struct Wrap;

impl CustomItemProvider for Wrap {
    fn tag(&self) -> &str {
        "wrap"
    }

    fn is_block(&self) -> bool {
        true
    }

    fn render(
        &self,
        value: Option<&Value>,
        _context: &Value,
        _bag: &mut ScopeBag,
    ) -> Result<CustomTagOutcome, String> {
        Ok(match value {
            Some(value) if value.is_truthy() => CustomTagOutcome::body(Some(value.clone())),
            _ => CustomTagOutcome::default(),
        })
    }
}

#[test]
fn custom_tags() {
    let options = ParserOptionsBuilder::new(
        "{{#stamp name}}{{#STAMP}} {{#wrap user}}{{name}}{{/wrap}}{{#wrap nobody}}x{{/wrap}}",
    )
    .custom_tag(Arc::new(Stamp))
    .custom_tag(Arc::new(Wrap));
    assert_eq!(
        output(options, json!({"name": "a&b", "user": {"name": "Ada"}})),
        "<a&b><> Ada"
    );
}

#[test]
fn custom_tag_state_lives_for_one_render() {
    let template = template(
        ParserOptionsBuilder::new("{{#count}},{{#count}},{{#count}}").custom_tag(Arc::new(Counter)),
    );
    assert_eq!(template.render(&Value::Null).unwrap().output, "1,2,3");
    assert_eq!(template.render(&Value::Null).unwrap().output, "1,2,3");
    assert_eq!(template.compile().render(&Value::Null).unwrap().output, "1,2,3");
}

#[test]
fn custom_tag_error_aborts() {
    let options = ParserOptionsBuilder::new("{{#stamp 5}}").custom_tag(Arc::new(Stamp));
    match render(options, json!({})).unwrap_err() {
        TemplateError::Custom(message) => assert_eq!(message, "cannot stamp 5"),
        other => panic!("unexpected error: {other}"),
    }
}

struct Shout;

impl ValueResolver for Shout {
    fn resolve(&self, value: &Value, member: &str) -> Option<Value> {
        match (value, member) {
            (Value::String(text), "shout") => Some(Value::from(text.to_uppercase())),
            _ => None,
        }
    }
}

#[test]
fn value_resolver_runs_before_dictionary_lookup() {
    let options = ParserOptionsBuilder::new("{{name.shout}}").value_resolver(Arc::new(Shout));
    assert_eq!(output(options, json!({"name": "ada"})), "ADA");
}

#[test]
fn custom_formatter_with_service() {
    let options = ParserOptionsBuilder::new("{{name.Greet()}} {{$services.greeting}}")
        .service("greeting", Value::from("Hello"))
        .add_formatter(
            FormatterBuilder::new("Greet")
                .source(ParamType::Any)
                .service("greeting")
                .build(|args| Ok(Value::from(format!("{} {}", args[1], args[0])))),
        );
    assert_eq!(output(options, json!({"name": "Ada"})), "Hello Ada Hello");
}

#[test]
fn custom_formatter_with_exact_source_type() {
    let options = ParserOptionsBuilder::new("{{n.Twice()}}").add_formatter(
        FormatterBuilder::new("Twice")
            .source(ParamType::Exact(ValueType::Integer))
            .build(|args| Ok(Value::Integer(args[0].as_i64().unwrap_or(0) * 2))),
    );
    assert_eq!(output(options, json!({"n": 21})), "42");
}

#[test]
fn non_ascii_comment_and_negative_literal() {
    let options = ParserOptionsBuilder::new("{{! café }}ok {{-1}} {{- prénom}}");
    assert_eq!(output(options, json!({"prénom": "Zoé"})), "ok -1Zoé");
}

#[test]
fn custom_definition_of_false() {
    let options = ParserOptionsBuilder::new("{{#if zero}}zero{{/if}}{{#if no}}no{{/if}}")
        .definition_of_false(|value| value.is_null() || value.as_str() == Some("no"));
    assert_eq!(output(options, json!({"zero": 0, "no": "no"})), "zero");
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn concurrent_renders_share_one_template() {
    let template = template(ParserOptionsBuilder::new(
        "{{#each xs}}{{.}}{{#if $last}}.{{else}},{{/if}}{{/each}}",
    ));
    let compiled = template.compile();
    thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let template = &template;
                let compiled = &compiled;
                s.spawn(move || {
                    let data = Value::from_json(json!({"xs": [n, n + 1]}));
                    let expected = format!("{n},{}.", n + 1);
                    for _ in 0..50 {
                        assert_eq!(template.render(&data).unwrap().output, expected);
                        assert_eq!(compiled.render(&data).unwrap().output, expected);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    });
}
