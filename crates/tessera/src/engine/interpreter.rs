//! Iterative document walker.
//!
//! Items never render their children recursively. Each item returns the continuations that
//! should run next, which are pushed onto an explicit stack in reverse so the first child pops
//! first. Nesting depth is therefore bounded by heap, not by the native call stack, and the stop
//! conditions are checked before every pop.

use super::{
    collection_items, condition_holds, find_partial, partial_name, repeat_count, run_custom,
    scope_renders, Renderer,
};
use crate::context::{CollectionInfo, Context};
use crate::error::{Result, TemplateError};
use crate::evaluate::{evaluate, is_truthy};
use crate::scope::{PartialBody, VariableSnapshot};
use crate::value::Value;
use std::rc::Rc;
use std::sync::Arc;
use tessera_ast::{Document, ItemId, ItemKind};
use tracing::trace;

enum Continuation {
    Render {
        document: usize,
        item: ItemId,
        context: Rc<Context>,
    },
    /// Next element of an `each` loop. `item` is the each item, `collection` the evaluated
    /// collection context.
    Iterate {
        document: usize,
        item: ItemId,
        collection: Rc<Context>,
        items: Arc<Vec<Value>>,
        index: usize,
    },
    /// Next pass of a `while`, `do` or `repeat` loop.
    Loop {
        document: usize,
        item: ItemId,
        context: Rc<Context>,
        index: usize,
        count: Option<usize>,
    },
    PartialDone,
    RestoreVariables(VariableSnapshot),
}

fn children<'a>(
    document: usize,
    items: &'a [ItemId],
    context: &Rc<Context>,
) -> impl Iterator<Item = Continuation> + 'a {
    let context = Rc::clone(context);
    items.iter().map(move |item| Continuation::Render {
        document,
        item: *item,
        context: Rc::clone(&context),
    })
}

/// Render `root`'s children from document `document` of the scope.
pub(crate) fn interpret(
    renderer: &mut Renderer<'_>,
    document: usize,
    root: ItemId,
    context: &Rc<Context>,
) -> Result<()> {
    let source = load(renderer, document)?;
    let mut stack: Vec<Continuation> = children(document, source.children(root), context).collect();
    stack.reverse();

    while let Some(continuation) = stack.pop() {
        if renderer.check_stop()? {
            break;
        }
        let next = match continuation {
            Continuation::Render {
                document,
                item,
                context,
            } => render_item(renderer, document, item, &context)?,
            Continuation::Iterate {
                document,
                item,
                collection,
                items,
                index,
            } => iterate(renderer, document, item, collection, items, index)?,
            Continuation::Loop {
                document,
                item,
                context,
                index,
                count,
            } => loop_pass(renderer, document, item, context, index, count)?,
            Continuation::PartialDone => {
                renderer.scope.exit_partial();
                trace!(depth = renderer.scope.partial_depth(), "partial finished");
                Vec::new()
            }
            Continuation::RestoreVariables(snapshot) => {
                renderer.scope.restore_variables(snapshot);
                Vec::new()
            }
        };
        stack.extend(next.into_iter().rev());
    }
    Ok(())
}

fn load(renderer: &Renderer<'_>, document: usize) -> Result<Arc<Document>> {
    renderer
        .scope
        .document(document)
        .ok_or_else(|| TemplateError::Custom(format!("unknown document handle {document}")))
}

fn render_item(
    renderer: &mut Renderer<'_>,
    handle: usize,
    id: ItemId,
    context: &Rc<Context>,
) -> Result<Vec<Continuation>> {
    let document = load(renderer, handle)?;
    let item = document.item(id);
    let location = item.range.start;
    let mut next = Vec::new();

    match &item.kind {
        ItemKind::Root => next.extend(children(handle, &item.children, context)),
        ItemKind::Content(content) => renderer.write(&content.rendered_text())?,
        ItemKind::Value { expression, escape } => {
            let value = evaluate(expression, context, &renderer.scope)?;
            renderer.write_value(&value, *escape)?;
        }
        ItemKind::If(condition) => {
            let split = item
                .children
                .iter()
                .position(|child| document.item(*child).kind.is_branch())
                .unwrap_or(item.children.len());
            let value = evaluate(&condition.expression, context, &renderer.scope)?;
            if condition_holds(&value, condition.inverted, &renderer.scope) {
                next.extend(children(handle, &item.children[..split], context));
            } else {
                for branch in &item.children[split..] {
                    let branch_item = document.item(*branch);
                    let taken = match &branch_item.kind {
                        ItemKind::ElseIf(condition) => {
                            let value = evaluate(&condition.expression, context, &renderer.scope)?;
                            condition_holds(&value, condition.inverted, &renderer.scope)
                        }
                        _ => true,
                    };
                    if taken {
                        next.extend(children(handle, &branch_item.children, context));
                        break;
                    }
                }
            }
        }
        ItemKind::ElseIf(_) | ItemKind::Else | ItemKind::Case { .. } | ItemKind::Default => {}
        ItemKind::Each(each) => {
            let collection = evaluate(&each.expression, context, &renderer.scope)?;
            let items = collection_items(&collection, || each.expression.to_string(), location)?;
            if let Some(items) = items {
                next.push(Continuation::Iterate {
                    document: handle,
                    item: id,
                    collection,
                    items,
                    index: 0,
                });
            }
        }
        ItemKind::While { .. } | ItemKind::DoWhile { .. } => next.push(Continuation::Loop {
            document: handle,
            item: id,
            context: Rc::clone(context),
            index: 0,
            count: None,
        }),
        ItemKind::Repeat { expression } => {
            let value = evaluate(expression, context, &renderer.scope)?;
            let count = repeat_count(&value, || expression.to_string(), location)?;
            next.push(Continuation::Loop {
                document: handle,
                item: id,
                context: Rc::clone(context),
                index: 0,
                count: Some(count),
            });
        }
        ItemKind::Switch {
            expression,
            scope_to_value,
        } => {
            let value = evaluate(expression, context, &renderer.scope)?;
            let mut matched = None;
            let mut fallback = None;
            for case in &item.children {
                match &document.item(*case).kind {
                    ItemKind::Case { expression } => {
                        let candidate = evaluate(expression, context, &renderer.scope)?;
                        if value.value().loosely_equals(candidate.value()) {
                            matched = Some(*case);
                            break;
                        }
                    }
                    ItemKind::Default => {
                        fallback.get_or_insert(*case);
                    }
                    _ => {}
                }
            }
            if let Some(case) = matched.or(fallback) {
                let case_context = if *scope_to_value { &value } else { context };
                next.extend(children(handle, document.children(case), case_context));
            }
        }
        ItemKind::Scope(scope) => {
            let value = evaluate(&scope.expression, context, &renderer.scope)?;
            if scope_renders(&value, scope.inverted, &renderer.scope) {
                if scope.inverted {
                    next.extend(children(handle, &item.children, context));
                } else {
                    if let Some(alias) = &scope.alias {
                        renderer
                            .scope
                            .set_variable(&alias.name, alias.scope, value.value().clone());
                    }
                    next.extend(children(handle, &item.children, &value));
                }
            }
        }
        ItemKind::Isolate { expression } => {
            let value = match expression {
                Some(expression) => evaluate(expression, context, &renderer.scope)?
                    .value()
                    .clone(),
                None => context.value().clone(),
            };
            let snapshot = renderer.scope.snapshot_variables();
            next.extend(children(handle, &item.children, &Context::root(value)));
            next.push(Continuation::RestoreVariables(snapshot));
        }
        ItemKind::Variable {
            name,
            expression,
            scope,
        } => {
            let value = evaluate(expression, context, &renderer.scope)?;
            renderer
                .scope
                .set_variable(name, *scope, value.value().clone());
        }
        ItemKind::RemoveAlias { name, scope } => renderer.scope.remove_alias(name, *scope),
        ItemKind::PartialDeclare { name } => renderer.scope.declare_partial(
            name,
            PartialBody::Tree {
                document: handle,
                item: id,
            },
        ),
        ItemKind::PartialImport {
            name,
            context: with,
        } => {
            let partial = partial_name(name, &mut renderer.scope, location, |scope| {
                evaluate(name, context, scope)
            })?;
            let target = match with {
                Some(with) => evaluate(with, context, &renderer.scope)?,
                None => Rc::clone(context),
            };
            let body = find_partial(&mut renderer.scope, &partial, location)?;
            if !renderer.scope.enter_partial(&partial)? {
                trace!(partial = %partial, "partial skipped at stack limit");
                return Ok(next);
            }
            trace!(partial = %partial, depth = renderer.scope.partial_depth(), "entering partial");
            match body {
                PartialBody::Tree { document, item } => {
                    let body_document = load(renderer, document)?;
                    next.extend(children(document, body_document.children(item), &target));
                    next.push(Continuation::PartialDone);
                }
                PartialBody::Compiled(block) => {
                    let result = block(renderer, &target);
                    renderer.scope.exit_partial();
                    result?;
                }
            }
        }
        ItemKind::Custom(custom) => {
            let value = match &custom.expression {
                Some(expression) => Some(evaluate(expression, context, &renderer.scope)?),
                None => None,
            };
            if let Some(body) = run_custom(renderer, custom, value.as_deref(), context)? {
                next.extend(children(handle, &item.children, &body));
            }
        }
    }
    Ok(next)
}

fn iterate(
    renderer: &mut Renderer<'_>,
    handle: usize,
    id: ItemId,
    collection: Rc<Context>,
    items: Arc<Vec<Value>>,
    index: usize,
) -> Result<Vec<Continuation>> {
    let Some(value) = items.get(index).cloned() else {
        return Ok(Vec::new());
    };
    let document = load(renderer, handle)?;
    let item = document.item(id);
    let info = CollectionInfo {
        index,
        last: index + 1 == items.len(),
    };
    let element = Context::collection_item(&collection, value, info);
    if let ItemKind::Each(each) = &item.kind {
        if let Some(alias) = &each.alias {
            renderer
                .scope
                .set_variable(&alias.name, alias.scope, element.value().clone());
        }
    }
    let mut next: Vec<Continuation> = children(handle, &item.children, &element).collect();
    next.push(Continuation::Iterate {
        document: handle,
        item: id,
        collection,
        items,
        index: index + 1,
    });
    Ok(next)
}

fn loop_pass(
    renderer: &mut Renderer<'_>,
    handle: usize,
    id: ItemId,
    context: Rc<Context>,
    index: usize,
    count: Option<usize>,
) -> Result<Vec<Continuation>> {
    let document = load(renderer, handle)?;
    let item = document.item(id);
    let proceed = match (&item.kind, count) {
        (_, Some(count)) => index < count,
        (ItemKind::DoWhile { .. }, None) if index == 0 => true,
        (ItemKind::While { expression } | ItemKind::DoWhile { expression }, None) => {
            let value = evaluate(expression, &context, &renderer.scope)?;
            is_truthy(&value, &renderer.scope)
        }
        _ => false,
    };
    if !proceed {
        return Ok(Vec::new());
    }
    let info = CollectionInfo {
        index,
        last: count.is_some_and(|count| index + 1 == count),
    };
    let pass = Context::collection_item(&context, context.value().clone(), info);
    let mut next: Vec<Continuation> = children(handle, &item.children, &pass).collect();
    next.push(Continuation::Loop {
        document: handle,
        item: id,
        context,
        index: index + 1,
        count,
    });
    Ok(next)
}
