//! Document compiler.
//!
//! Every item becomes a closure; block items capture the closures of their children, so the
//! whole document turns into one [`CompiledBlock`] built once and invoked per render without
//! walking the tree again.

use super::{
    collection_items, condition_holds, find_partial, interpret, partial_name, repeat_count,
    run_custom, scope_renders, Renderer,
};
use crate::context::{CollectionInfo, Context};
use crate::error::Result;
use crate::evaluate::{compile_expression, is_truthy, CompiledExpression};
use crate::scope::PartialBody;
use std::rc::Rc;
use std::sync::Arc;
use tessera_ast::{Document, ItemId, ItemKind};
use tracing::trace;

/// Whether rendering should go on after a compiled block returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// The output limit was reached.
    Halt,
}

pub(crate) type CompiledBlock =
    Arc<dyn Fn(&mut Renderer<'_>, &Rc<Context>) -> Result<Flow> + Send + Sync>;

/// Compile the children of the document root.
pub(crate) fn compile_document(document: &Document) -> CompiledBlock {
    compile_items(document, document.children(ItemId::ROOT))
}

fn compile_items(document: &Document, ids: &[ItemId]) -> CompiledBlock {
    let parts: Vec<CompiledBlock> = ids.iter().map(|id| compile_item(document, *id)).collect();
    Arc::new(move |renderer: &mut Renderer<'_>, context: &Rc<Context>| {
        for part in &parts {
            if renderer.check_stop()? || part(renderer, context)? == Flow::Halt {
                return Ok(Flow::Halt);
            }
        }
        Ok(Flow::Continue)
    })
}

fn continue_with(renderer: &Renderer<'_>) -> Result<Flow> {
    Ok(if renderer.check_stop()? {
        Flow::Halt
    } else {
        Flow::Continue
    })
}

fn compile_item(document: &Document, id: ItemId) -> CompiledBlock {
    let item = document.item(id);
    let location = item.range.start;
    let body = || compile_items(document, &item.children);

    match &item.kind {
        ItemKind::Root => body(),
        ItemKind::Content(content) => {
            let text = content.rendered_text().into_owned();
            Arc::new(move |renderer: &mut Renderer<'_>, _: &Rc<Context>| {
                renderer.write(&text)?;
                Ok(Flow::Continue)
            })
        }
        ItemKind::Value { expression, escape } => {
            let expression = compile_expression(expression);
            let escape = *escape;
            Arc::new(move |renderer: &mut Renderer<'_>, context: &Rc<Context>| {
                let value = expression(context, &renderer.scope)?;
                renderer.write_value(&value, escape)?;
                Ok(Flow::Continue)
            })
        }
        ItemKind::If(condition) => {
            let split = item
                .children
                .iter()
                .position(|child| document.item(*child).kind.is_branch())
                .unwrap_or(item.children.len());
            let test = compile_expression(&condition.expression);
            let inverted = condition.inverted;
            let then = compile_items(document, &item.children[..split]);
            let branches: Vec<(Option<(CompiledExpression, bool)>, CompiledBlock)> = item.children
                [split..]
                .iter()
                .map(|branch| {
                    let branch_item = document.item(*branch);
                    let test = match &branch_item.kind {
                        ItemKind::ElseIf(condition) => Some((
                            compile_expression(&condition.expression),
                            condition.inverted,
                        )),
                        _ => None,
                    };
                    (test, compile_items(document, &branch_item.children))
                })
                .collect();
            Arc::new(move |renderer: &mut Renderer<'_>, context: &Rc<Context>| {
                let value = test(context, &renderer.scope)?;
                if condition_holds(&value, inverted, &renderer.scope) {
                    return then(renderer, context);
                }
                for (test, branch) in &branches {
                    let taken = match test {
                        Some((test, inverted)) => {
                            let value = test(context, &renderer.scope)?;
                            condition_holds(&value, *inverted, &renderer.scope)
                        }
                        None => true,
                    };
                    if taken {
                        return branch(renderer, context);
                    }
                }
                Ok(Flow::Continue)
            })
        }
        ItemKind::ElseIf(_) | ItemKind::Else | ItemKind::Case { .. } | ItemKind::Default => {
            Arc::new(|_: &mut Renderer<'_>, _: &Rc<Context>| Ok(Flow::Continue))
        }
        ItemKind::Each(each) => {
            let expression = compile_expression(&each.expression);
            let display = each.expression.to_string();
            let alias = each.alias.clone();
            let body = body();
            Arc::new(move |renderer: &mut Renderer<'_>, context: &Rc<Context>| {
                let collection = expression(context, &renderer.scope)?;
                let Some(items) = collection_items(&collection, || display.clone(), location)?
                else {
                    return Ok(Flow::Continue);
                };
                let mut elements = items.iter().enumerate().peekable();
                while let Some((index, value)) = elements.next() {
                    if renderer.check_stop()? {
                        return Ok(Flow::Halt);
                    }
                    let info = CollectionInfo {
                        index,
                        last: elements.peek().is_none(),
                    };
                    let element = Context::collection_item(&collection, value.clone(), info);
                    if let Some(alias) = &alias {
                        renderer
                            .scope
                            .set_variable(&alias.name, alias.scope, value.clone());
                    }
                    if body(renderer, &element)? == Flow::Halt {
                        return Ok(Flow::Halt);
                    }
                }
                Ok(Flow::Continue)
            })
        }
        ItemKind::While { expression } | ItemKind::DoWhile { expression } => {
            let test = compile_expression(expression);
            let check_first = matches!(item.kind, ItemKind::While { .. });
            let body = body();
            Arc::new(move |renderer: &mut Renderer<'_>, context: &Rc<Context>| {
                let mut index = 0;
                loop {
                    if renderer.check_stop()? {
                        return Ok(Flow::Halt);
                    }
                    if check_first || index > 0 {
                        let value = test(context, &renderer.scope)?;
                        if !is_truthy(&value, &renderer.scope) {
                            return Ok(Flow::Continue);
                        }
                    }
                    let info = CollectionInfo { index, last: false };
                    let pass = Context::collection_item(context, context.value().clone(), info);
                    if body(renderer, &pass)? == Flow::Halt {
                        return Ok(Flow::Halt);
                    }
                    index += 1;
                }
            })
        }
        ItemKind::Repeat { expression } => {
            let count = compile_expression(expression);
            let display = expression.to_string();
            let body = body();
            Arc::new(move |renderer: &mut Renderer<'_>, context: &Rc<Context>| {
                let value = count(context, &renderer.scope)?;
                let count = repeat_count(&value, || display.clone(), location)?;
                for index in 0..count {
                    if renderer.check_stop()? {
                        return Ok(Flow::Halt);
                    }
                    let info = CollectionInfo {
                        index,
                        last: index + 1 == count,
                    };
                    let pass = Context::collection_item(context, context.value().clone(), info);
                    if body(renderer, &pass)? == Flow::Halt {
                        return Ok(Flow::Halt);
                    }
                }
                Ok(Flow::Continue)
            })
        }
        ItemKind::Switch {
            expression,
            scope_to_value,
        } => {
            let subject = compile_expression(expression);
            let scope_to_value = *scope_to_value;
            let cases: Vec<(Option<CompiledExpression>, CompiledBlock)> = item
                .children
                .iter()
                .filter_map(|case| {
                    let case_item = document.item(*case);
                    let test = match &case_item.kind {
                        ItemKind::Case { expression } => Some(compile_expression(expression)),
                        ItemKind::Default => None,
                        _ => return None,
                    };
                    Some((test, compile_items(document, &case_item.children)))
                })
                .collect();
            Arc::new(move |renderer: &mut Renderer<'_>, context: &Rc<Context>| {
                let value = subject(context, &renderer.scope)?;
                let mut fallback = None;
                let mut matched = None;
                for (test, block) in &cases {
                    match test {
                        Some(test) => {
                            let candidate = test(context, &renderer.scope)?;
                            if value.value().loosely_equals(candidate.value()) {
                                matched = Some(block);
                                break;
                            }
                        }
                        None => {
                            fallback.get_or_insert(block);
                        }
                    }
                }
                let Some(block) = matched.or(fallback) else {
                    return Ok(Flow::Continue);
                };
                let case_context = if scope_to_value { &value } else { context };
                block(renderer, case_context)
            })
        }
        ItemKind::Scope(scope) => {
            let expression = compile_expression(&scope.expression);
            let inverted = scope.inverted;
            let alias = scope.alias.clone();
            let body = body();
            Arc::new(move |renderer: &mut Renderer<'_>, context: &Rc<Context>| {
                let value = expression(context, &renderer.scope)?;
                if !scope_renders(&value, inverted, &renderer.scope) {
                    return Ok(Flow::Continue);
                }
                if inverted {
                    return body(renderer, context);
                }
                if let Some(alias) = &alias {
                    renderer
                        .scope
                        .set_variable(&alias.name, alias.scope, value.value().clone());
                }
                body(renderer, &value)
            })
        }
        ItemKind::Isolate { expression } => {
            let expression = expression.as_ref().map(compile_expression);
            let body = body();
            Arc::new(move |renderer: &mut Renderer<'_>, context: &Rc<Context>| {
                let value = match &expression {
                    Some(expression) => expression(context, &renderer.scope)?.value().clone(),
                    None => context.value().clone(),
                };
                let snapshot = renderer.scope.snapshot_variables();
                let flow = body(renderer, &Context::root(value));
                renderer.scope.restore_variables(snapshot);
                flow
            })
        }
        ItemKind::Variable {
            name,
            expression,
            scope,
        } => {
            let expression = compile_expression(expression);
            let name = name.clone();
            let scope = *scope;
            Arc::new(move |renderer: &mut Renderer<'_>, context: &Rc<Context>| {
                let value = expression(context, &renderer.scope)?;
                renderer
                    .scope
                    .set_variable(&name, scope, value.value().clone());
                Ok(Flow::Continue)
            })
        }
        ItemKind::RemoveAlias { name, scope } => {
            let name = name.clone();
            let scope = *scope;
            Arc::new(move |renderer: &mut Renderer<'_>, _: &Rc<Context>| {
                renderer.scope.remove_alias(&name, scope);
                Ok(Flow::Continue)
            })
        }
        ItemKind::PartialDeclare { name } => {
            let name = name.clone();
            let body = body();
            Arc::new(move |renderer: &mut Renderer<'_>, _: &Rc<Context>| {
                renderer
                    .scope
                    .declare_partial(&name, PartialBody::Compiled(Arc::clone(&body)));
                Ok(Flow::Continue)
            })
        }
        ItemKind::PartialImport {
            name,
            context: with,
        } => {
            let name_expression = name.clone();
            let name = compile_expression(name);
            let with = with.as_ref().map(compile_expression);
            Arc::new(move |renderer: &mut Renderer<'_>, context: &Rc<Context>| {
                let partial = partial_name(&name_expression, &mut renderer.scope, location, |scope| {
                    name(context, scope)
                })?;
                let target = match &with {
                    Some(with) => with(context, &renderer.scope)?,
                    None => Rc::clone(context),
                };
                let body = find_partial(&mut renderer.scope, &partial, location)?;
                if !renderer.scope.enter_partial(&partial)? {
                    trace!(partial = %partial, "partial skipped at stack limit");
                    return Ok(Flow::Continue);
                }
                trace!(partial = %partial, depth = renderer.scope.partial_depth(), "entering partial");
                let result = run_partial(renderer, &partial, body, &target);
                renderer.scope.exit_partial();
                trace!(depth = renderer.scope.partial_depth(), "partial finished");
                result?;
                continue_with(renderer)
            })
        }
        ItemKind::Custom(custom) => {
            let custom = custom.clone();
            let expression = custom.expression.as_ref().map(compile_expression);
            let body = body();
            Arc::new(move |renderer: &mut Renderer<'_>, context: &Rc<Context>| {
                let value = match &expression {
                    Some(expression) => Some(expression(context, &renderer.scope)?),
                    None => None,
                };
                match run_custom(renderer, &custom, value.as_deref(), context)? {
                    Some(body_context) => body(renderer, &body_context),
                    None => Ok(Flow::Continue),
                }
            })
        }
    }
}

/// Run a partial body. Stored partials are compiled on first use and cached for the render.
fn run_partial(
    renderer: &mut Renderer<'_>,
    name: &str,
    body: PartialBody,
    target: &Rc<Context>,
) -> Result<Flow> {
    match body {
        PartialBody::Compiled(block) => block(renderer, target),
        PartialBody::Tree { document, item } if item == ItemId::ROOT => {
            let block = match renderer.scope.compiled_partial(name) {
                Some(block) => block,
                None => {
                    let Some(source) = renderer.scope.document(document) else {
                        return Ok(Flow::Continue);
                    };
                    let block = compile_document(&source);
                    renderer.scope.cache_compiled_partial(name, Arc::clone(&block));
                    block
                }
            };
            block(renderer, target)
        }
        PartialBody::Tree { document, item } => {
            interpret(renderer, document, item, target)?;
            continue_with(renderer)
        }
    }
}
