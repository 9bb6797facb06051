//! Mutable per-render state.
//!
//! One [`RenderScope`] exists per render call and is owned by it, so nothing in here needs
//! synchronisation apart from the [`CancellationToken`], which is shared with the caller.

use crate::engine::CompiledBlock;
use crate::error::{Result, TemplateError};
use crate::options::{ParserOptions, PartialStackOverflowBehavior};
use crate::profiler::Profiler;
use crate::value::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessera_ast::{Document, ItemId, ScopeId};

/// Cooperative cancellation flag checked between render steps.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Extensible key/value storage for custom tags. Registered disposers run, newest first, when
/// the render ends.
#[derive(Default)]
pub struct ScopeBag {
    values: HashMap<String, Box<dyn Any>>,
    disposers: Vec<Box<dyn FnOnce()>>,
}

impl ScopeBag {
    pub fn insert<T: Any>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|value| value.downcast_ref())
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key).and_then(|value| value.downcast_mut())
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    pub fn on_dispose(&mut self, disposer: impl FnOnce() + 'static) {
        self.disposers.push(Box::new(disposer));
    }
}

impl Drop for ScopeBag {
    fn drop(&mut self) {
        while let Some(disposer) = self.disposers.pop() {
            disposer();
        }
    }
}

/// Body of a partial registered in the scope.
#[derive(Clone)]
pub(crate) enum PartialBody {
    /// Item in one of the scope's documents, walked by the interpreter.
    Tree { document: usize, item: ItemId },
    Compiled(CompiledBlock),
}

/// Variables saved by `{{#isolate}}`.
pub(crate) struct VariableSnapshot {
    globals: HashMap<String, Value>,
    aliases: HashMap<String, Vec<(ScopeId, Value)>>,
}

pub struct RenderScope {
    options: Arc<ParserOptions>,
    globals: HashMap<String, Value>,
    /// Lexical bindings per name, innermost last.
    aliases: HashMap<String, Vec<(ScopeId, Value)>>,
    partials: HashMap<String, PartialBody>,
    partial_stack: Vec<String>,
    documents: Vec<Arc<Document>>,
    external_partials: HashMap<String, usize>,
    compiled_partials: HashMap<String, CompiledBlock>,
    token: CancellationToken,
    deadline: Option<(Instant, Duration)>,
    written: usize,
    truncated: bool,
    profiler: Option<Profiler>,
    bag: ScopeBag,
}

impl RenderScope {
    pub(crate) fn new(
        options: Arc<ParserOptions>,
        document: Arc<Document>,
        token: CancellationToken,
    ) -> Self {
        let deadline = options
            .timeout()
            .map(|timeout| (Instant::now() + timeout, timeout));
        let profiler = options.profile().then(|| Profiler::new("render"));
        Self {
            options,
            globals: HashMap::new(),
            aliases: HashMap::new(),
            partials: HashMap::new(),
            partial_stack: Vec::new(),
            documents: vec![document],
            external_partials: HashMap::new(),
            compiled_partials: HashMap::new(),
            token,
            deadline,
            written: 0,
            truncated: false,
            profiler,
            bag: ScopeBag::default(),
        }
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    pub(crate) fn options_arc(&self) -> Arc<ParserOptions> {
        Arc::clone(&self.options)
    }

    pub fn bag(&mut self) -> &mut ScopeBag {
        &mut self.bag
    }

    /// Bind `name`. Global scope writes the variable table, any other scope adds a lexical alias.
    pub fn set_variable(&mut self, name: &str, scope: ScopeId, value: Value) {
        if scope.is_global() {
            self.globals.insert(name.to_string(), value);
            return;
        }
        let bindings = self.aliases.entry(name.to_string()).or_default();
        match bindings.iter_mut().rev().find(|(id, _)| *id == scope) {
            Some(binding) => binding.1 = value,
            None => bindings.push((scope, value)),
        }
    }

    /// End the binding of `name` owned by `scope`. Outer bindings of the same name stay.
    pub fn remove_alias(&mut self, name: &str, scope: ScopeId) {
        if let Some(bindings) = self.aliases.get_mut(name) {
            if let Some(position) = bindings.iter().rposition(|(id, _)| *id == scope) {
                bindings.remove(position);
            }
            if bindings.is_empty() {
                self.aliases.remove(name);
            }
        }
    }

    /// Innermost alias first, then the global table.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.aliases
            .get(name)
            .and_then(|bindings| bindings.last())
            .map(|(_, value)| value)
            .or_else(|| self.globals.get(name))
    }

    pub(crate) fn snapshot_variables(&self) -> VariableSnapshot {
        VariableSnapshot {
            globals: self.globals.clone(),
            aliases: self.aliases.clone(),
        }
    }

    pub(crate) fn restore_variables(&mut self, snapshot: VariableSnapshot) {
        self.globals = snapshot.globals;
        self.aliases = snapshot.aliases;
    }

    pub(crate) fn declare_partial(&mut self, name: &str, body: PartialBody) {
        self.partials.insert(name.to_string(), body);
    }

    pub(crate) fn declared_partial(&self, name: &str) -> Option<PartialBody> {
        self.partials.get(name).cloned()
    }

    pub(crate) fn document(&self, index: usize) -> Option<Arc<Document>> {
        self.documents.get(index).cloned()
    }

    /// Whether `name` is declared in this render or available from the partial store.
    pub(crate) fn has_partial(&mut self, name: &str) -> Result<bool> {
        Ok(self.partials.contains_key(name) || self.load_external(name)?.is_some())
    }

    /// Document index of an externally stored partial, loading it on first use.
    pub(crate) fn load_external(&mut self, name: &str) -> Result<Option<usize>> {
        if let Some(index) = self.external_partials.get(name) {
            return Ok(Some(*index));
        }
        let Some(store) = self.options.partial_store() else {
            return Ok(None);
        };
        let Some(document) = store.load(name, &self.options.tokenizer_options())? else {
            return Ok(None);
        };
        let index = self.documents.len();
        self.documents.push(document);
        self.external_partials.insert(name.to_string(), index);
        Ok(Some(index))
    }

    pub(crate) fn compiled_partial(&self, name: &str) -> Option<CompiledBlock> {
        self.compiled_partials.get(name).cloned()
    }

    pub(crate) fn cache_compiled_partial(&mut self, name: &str, block: CompiledBlock) {
        self.compiled_partials.insert(name.to_string(), block);
    }

    pub fn partial_depth(&self) -> usize {
        self.partial_stack.len()
    }

    pub fn current_partial(&self) -> Option<&str> {
        self.partial_stack.last().map(String::as_str)
    }

    /// Enter a partial, or report what the overflow policy decided.
    ///
    /// `Ok(false)` means the call must be skipped silently.
    pub(crate) fn enter_partial(&mut self, name: &str) -> Result<bool> {
        let limit = self.options.partial_stack_size();
        if self.partial_stack.len() >= limit {
            return match self.options.stack_overflow() {
                PartialStackOverflowBehavior::Raise => {
                    let mut chain = self.partial_stack.clone();
                    chain.push(name.to_string());
                    Err(TemplateError::PartialStackOverflow { chain, limit })
                }
                PartialStackOverflowBehavior::Silent => Ok(false),
            };
        }
        self.partial_stack.push(name.to_string());
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.enter(format!("partial:{name}"));
        }
        Ok(true)
    }

    pub(crate) fn exit_partial(&mut self) {
        self.partial_stack.pop();
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.exit();
        }
    }

    /// `Err` for cancellation or timeout, `Ok(true)` once the output limit was reached.
    pub(crate) fn check_stop(&self) -> Result<bool> {
        if self.token.is_cancelled() {
            return Err(TemplateError::Cancelled);
        }
        if let Some((deadline, timeout)) = self.deadline {
            if Instant::now() >= deadline {
                return Err(TemplateError::Timeout(timeout));
            }
        }
        Ok(self.truncated)
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// How much of `text` still fits under the output limit, marking truncation when cut.
    pub(crate) fn admit<'t>(&mut self, text: &'t str) -> &'t str {
        if self.truncated {
            return "";
        }
        let Some(max) = self.options.max_size() else {
            return text;
        };
        let remaining = max.saturating_sub(self.written);
        match text.char_indices().nth(remaining) {
            None => {
                self.written += text.chars().count();
                text
            }
            Some((cut, _)) => {
                self.written = max;
                self.truncated = true;
                &text[..cut]
            }
        }
    }

    pub(crate) fn take_profiler(&mut self) -> Option<Profiler> {
        self.profiler.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ParserOptionsBuilder;
    use std::cell::Cell;
    use std::rc::Rc;

    fn scope_with(builder: ParserOptionsBuilder) -> RenderScope {
        let document = tessera_ast::parse("", &Default::default())
            .unwrap()
            .document
            .unwrap();
        RenderScope::new(builder.build(), Arc::new(document), CancellationToken::new())
    }

    #[test]
    fn test_alias_shadowing_and_removal() {
        let mut scope = scope_with(ParserOptionsBuilder::new(""));
        scope.set_variable("x", ScopeId::GLOBAL, Value::Integer(0));
        scope.set_variable("x", ScopeId(1), Value::Integer(1));
        scope.set_variable("x", ScopeId(2), Value::Integer(2));
        assert_eq!(scope.variable("x"), Some(&Value::Integer(2)));

        scope.remove_alias("x", ScopeId(2));
        assert_eq!(scope.variable("x"), Some(&Value::Integer(1)));
        scope.remove_alias("x", ScopeId(1));
        assert_eq!(scope.variable("x"), Some(&Value::Integer(0)));
    }

    #[test]
    fn test_rebinding_same_scope_replaces() {
        let mut scope = scope_with(ParserOptionsBuilder::new(""));
        scope.set_variable("x", ScopeId(3), Value::Integer(1));
        scope.set_variable("x", ScopeId(3), Value::Integer(2));
        scope.remove_alias("x", ScopeId(3));
        assert_eq!(scope.variable("x"), None);
    }

    #[test]
    fn test_partial_overflow_policies() {
        let mut scope = scope_with(ParserOptionsBuilder::new("").partial_stack_size(1));
        assert!(scope.enter_partial("a").unwrap());
        match scope.enter_partial("b") {
            Err(TemplateError::PartialStackOverflow { chain, limit }) => {
                assert_eq!(chain, vec!["a".to_string(), "b".to_string()]);
                assert_eq!(limit, 1);
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }

        let mut silent = scope_with(
            ParserOptionsBuilder::new("")
                .partial_stack_size(0)
                .stack_overflow(PartialStackOverflowBehavior::Silent),
        );
        assert!(!silent.enter_partial("a").unwrap());
    }

    #[test]
    fn test_admit_truncates_by_chars() {
        let mut scope = scope_with(ParserOptionsBuilder::new("").max_size(4));
        assert_eq!(scope.admit("äb"), "äb");
        assert!(!scope.is_truncated());
        assert_eq!(scope.admit("cde"), "cd");
        assert!(scope.is_truncated());
        assert_eq!(scope.admit("f"), "");
    }

    #[test]
    fn test_cancellation_stops() {
        let token = CancellationToken::new();
        let document = tessera_ast::parse("", &Default::default())
            .unwrap()
            .document
            .unwrap();
        let scope = RenderScope::new(
            ParserOptionsBuilder::new("").build(),
            Arc::new(document),
            token.clone(),
        );
        assert!(!scope.check_stop().unwrap());
        token.cancel();
        assert!(matches!(scope.check_stop(), Err(TemplateError::Cancelled)));
    }

    #[test]
    fn test_bag_disposers_run_on_drop() {
        let disposed = Rc::new(Cell::new(0));
        {
            let mut bag = ScopeBag::default();
            bag.insert("counter", 41_i32);
            *bag.get_mut::<i32>("counter").unwrap() += 1;
            assert_eq!(bag.get::<i32>("counter"), Some(&42));
            assert_eq!(bag.get::<String>("counter"), None);
            let flag = Rc::clone(&disposed);
            bag.on_dispose(move || flag.set(flag.get() + 1));
        }
        assert_eq!(disposed.get(), 1);
    }
}
