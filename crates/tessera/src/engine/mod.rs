//! Execution strategies and the pieces they share.
//!
//! The [`interpreter`] walks the document with an explicit continuation stack; the [`compiler`]
//! turns it into nested closures once. Both write through the same [`Renderer`] and make every
//! block decision with the helpers below, which is what keeps their output identical.

pub(crate) mod compiler;
pub(crate) mod interpreter;

pub(crate) use compiler::{compile_document, CompiledBlock};
pub(crate) use interpreter::interpret;

use crate::context::Context;
use crate::error::{Result, TemplateError};
use crate::evaluate::is_truthy;
use crate::html_escape;
use crate::options::ScopingBehavior;
use crate::output::Output;
use crate::scope::{PartialBody, RenderScope};
use crate::value::Value;
use std::rc::Rc;
use std::sync::Arc;
use tessera_ast::{CustomItem, Expression, ItemId, Literal, Location};

/// Output sink plus render scope for one render call.
pub(crate) struct Renderer<'o> {
    pub(crate) scope: RenderScope,
    output: &'o mut dyn Output,
}

impl<'o> Renderer<'o> {
    pub(crate) fn new(scope: RenderScope, output: &'o mut dyn Output) -> Self {
        Self { scope, output }
    }

    /// Write text, cutting it at the output limit.
    pub(crate) fn write(&mut self, text: &str) -> Result<()> {
        let admitted = self.scope.admit(text);
        if admitted.is_empty() {
            return Ok(());
        }
        self.output.write_str(admitted)
    }

    /// Write an evaluated value. Missing and null values print the null substitute.
    pub(crate) fn write_value(&mut self, value: &Context, escape: bool) -> Result<()> {
        let options = self.scope.options();
        if !value.exists() || value.value().is_null() {
            let substitute = options.null_substitute().to_string();
            return self.write(&substitute);
        }
        let text = value
            .value()
            .to_display_string(options.culture().decimal_separator);
        if escape && options.escape_content() {
            let escaped = html_escape::escape(&text).into_owned();
            self.write(&escaped)
        } else {
            self.write(&text)
        }
    }

    /// `Err` when cancelled or timed out, `Ok(true)` once output was truncated.
    pub(crate) fn check_stop(&self) -> Result<bool> {
        self.scope.check_stop()
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        self.output.flush()
    }

    pub(crate) fn into_scope(self) -> RenderScope {
        self.scope
    }
}

/// `if` / `^if` / `elseif` test.
pub(crate) fn condition_holds(value: &Context, inverted: bool, scope: &RenderScope) -> bool {
    is_truthy(value, scope) != inverted
}

/// Whether a `scope` block renders its body for `value`.
pub(crate) fn scope_renders(value: &Context, inverted: bool, scope: &RenderScope) -> bool {
    if inverted {
        return !is_truthy(value, scope);
    }
    match scope.options().scoping() {
        ScopingBehavior::DoNotScope => is_truthy(value, scope),
        ScopingBehavior::ScopeAnyway => value.exists(),
    }
}

/// Items of an `each` collection. Missing and null values iterate zero times.
pub(crate) fn collection_items(
    value: &Context,
    describe: impl FnOnce() -> String,
    location: Location,
) -> Result<Option<Arc<Vec<Value>>>> {
    if !value.exists() {
        return Ok(None);
    }
    match value.value() {
        Value::Array(items) => Ok(Some(Arc::clone(items))),
        Value::Null => Ok(None),
        other => Err(TemplateError::TypeError {
            message: format!("cannot iterate over {}", other.value_type()),
            path: describe(),
            breadcrumb: value.path(),
            location,
        }),
    }
}

/// Iteration count of a `repeat` block.
pub(crate) fn repeat_count(
    value: &Context,
    describe: impl FnOnce() -> String,
    location: Location,
) -> Result<usize> {
    if !value.exists() {
        return Ok(0);
    }
    match value.value() {
        Value::Null => Ok(0),
        Value::Integer(n) => Ok(usize::try_from(*n).unwrap_or(0)),
        Value::Float(f) if *f > 0.0 => Ok(*f as usize),
        Value::Float(_) => Ok(0),
        other => Err(TemplateError::TypeError {
            message: format!("repeat count must be a number, found {}", other.value_type()),
            path: describe(),
            breadcrumb: value.path(),
            location,
        }),
    }
}

/// Name of the partial an import refers to.
///
/// String literals name the partial directly. A bare identifier does too when a partial of that
/// name is declared or stored; otherwise the expression is evaluated and must yield a string.
pub(crate) fn partial_name(
    expression: &Expression,
    scope: &mut RenderScope,
    location: Location,
    evaluate: impl FnOnce(&RenderScope) -> Result<Rc<Context>>,
) -> Result<String> {
    if let Expression::Literal(Literal::String(name)) = expression {
        return Ok(name.clone());
    }
    if let Some(name) = expression.as_static_name() {
        if scope.has_partial(&name)? {
            return Ok(name);
        }
    }
    let value = evaluate(scope)?;
    match value.value() {
        Value::String(name) => Ok(name.clone()),
        Value::Null => Err(TemplateError::PartialNotFound {
            name: expression.to_string(),
            location,
        }),
        other => Err(TemplateError::TypeError {
            message: format!("partial name must be a string, found {}", other.value_type()),
            path: expression.to_string(),
            breadcrumb: value.path(),
            location,
        }),
    }
}

/// Body of partial `name`: declared partials first, then the partial store.
pub(crate) fn find_partial(
    scope: &mut RenderScope,
    name: &str,
    location: Location,
) -> Result<PartialBody> {
    if let Some(body) = scope.declared_partial(name) {
        return Ok(body);
    }
    match scope.load_external(name)? {
        Some(document) => Ok(PartialBody::Tree {
            document,
            item: ItemId::ROOT,
        }),
        None => Err(TemplateError::PartialNotFound {
            name: name.to_string(),
            location,
        }),
    }
}

/// Run a custom tag provider. Returns the body context when a block tag asks for its body.
pub(crate) fn run_custom(
    renderer: &mut Renderer<'_>,
    custom: &CustomItem,
    value: Option<&Context>,
    context: &Rc<Context>,
) -> Result<Option<Rc<Context>>> {
    let options = renderer.scope.options_arc();
    let provider = options.custom_tag(&custom.tag).ok_or_else(|| {
        TemplateError::Custom(format!("no provider registered for tag '{}'", custom.tag))
    })?;
    let outcome = provider
        .render(
            value.map(Context::value),
            context.value(),
            renderer.scope.bag(),
        )
        .map_err(TemplateError::Custom)?;
    if let Some(text) = &outcome.text {
        renderer.write(text)?;
    }
    if !(custom.block && outcome.render_body) {
        return Ok(None);
    }
    Ok(Some(match outcome.body_value {
        Some(value) => Context::child(context, custom.tag.clone(), value),
        None => Rc::clone(context),
    }))
}
