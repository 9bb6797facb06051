//! Tessera - a text template engine
//!
//! A template is parsed once into an immutable document and rendered any number of times
//! against hierarchical data, either by the iterative interpreter ([`Template`]) or by the
//! closure compiler ([`CompiledTemplate`]). Both produce the same output.
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//!
//! let result = tessera::render(
//!     "Hello, {{name}}!",
//!     json!({"name": "World"}),
//! ).unwrap();
//!
//! assert_eq!(result, "Hello, World!");
//! ```

pub mod context;
pub mod custom;
mod engine;
pub mod error;
mod evaluate;
pub mod formatter;
pub mod html_escape;
pub mod options;
pub mod output;
pub mod partials;
pub mod profiler;
pub mod resolver;
pub mod scope;
pub mod services;
pub mod value;

pub use context::{CollectionInfo, Context};
pub use custom::{CustomItemProvider, CustomTagOutcome};
pub use error::{Result, TemplateError};
pub use formatter::{
    FormatterBuilder, FormatterError, FormatterErrorPolicy, FormatterModel, FormatterService,
    ParamType,
};
pub use options::{
    Culture, OptionsConfig, ParserOptions, ParserOptionsBuilder, PartialStackOverflowBehavior,
    ScopingBehavior,
};
pub use output::{Output, StringOutput, WriterOutput};
pub use partials::{FilePartialStore, MemoryPartialStore, PartialStore};
pub use profiler::PerformanceProfile;
pub use resolver::{MemberResolver, ValueResolver};
pub use scope::{CancellationToken, ScopeBag};
pub use services::ServiceCollection;
pub use tessera_ast::{Diagnostic, Document, Location, Severity, UnmatchedTagBehavior};
pub use value::{Value, ValueType};

use engine::{compile_document, interpret, CompiledBlock, Renderer};
use scope::RenderScope;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessera_ast::ItemId;
use tracing::debug;

/// Outcome of [`parse`]: the template, when one could be built, and every diagnostic.
#[derive(Debug)]
pub struct ParseResult {
    pub template: Option<Template>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParseResult {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// The template, or [`TemplateError::InvalidTemplate`] carrying the diagnostics.
    pub fn into_template(self) -> Result<Template> {
        match self.template {
            Some(template) => Ok(template),
            None => Err(TemplateError::InvalidTemplate {
                diagnostics: self.diagnostics,
            }),
        }
    }
}

/// Rendered text plus render metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderResult {
    pub output: String,
    /// The output limit cut the text short.
    pub truncated: bool,
    pub profile: Option<PerformanceProfile>,
}

/// Metadata of a render written to a caller supplied [`Output`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenderReport {
    pub truncated: bool,
    pub profile: Option<PerformanceProfile>,
}

/// Parse the template held by `options`.
///
/// Syntax problems never fail this call; they are returned in [`ParseResult::diagnostics`].
///
/// # Example
///
/// ```rust
/// use tessera::{ParserOptionsBuilder, Value};
/// use serde_json::json;
///
/// let options = ParserOptionsBuilder::new("{{#each items}}{{.}}{{/each}}").build();
/// let template = tessera::parse(options).unwrap().into_template().unwrap();
/// let result = template.render(&Value::from_json(json!({"items": [1, 2]}))).unwrap();
/// assert_eq!(result.output, "12");
/// ```
pub fn parse(options: Arc<ParserOptions>) -> Result<ParseResult> {
    Template::parse(options)
}

/// Main template struct for parsing once and rendering multiple times
#[derive(Debug, Clone)]
pub struct Template {
    document: Arc<Document>,
    options: Arc<ParserOptions>,
    parse_profile: Option<PerformanceProfile>,
}

impl Template {
    /// Parse the template held by `options`. See [`parse`].
    pub fn parse(options: Arc<ParserOptions>) -> Result<ParseResult> {
        let started = Instant::now();
        let parsed = tessera_ast::parse(options.template(), &options.tokenizer_options())?;
        let elapsed = started.elapsed();
        debug!(
            items = parsed.document.as_ref().map_or(0, Document::len),
            diagnostics = parsed.diagnostics.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "parsed template"
        );
        let parse_profile = options
            .profile()
            .then(|| PerformanceProfile::new("parse", elapsed));
        let template = parsed.document.map(|document| Template {
            document: Arc::new(document),
            options,
            parse_profile,
        });
        Ok(ParseResult {
            template,
            diagnostics: parsed.diagnostics,
        })
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Render with the interpreter.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tessera::{ParserOptionsBuilder, Value};
    /// use serde_json::json;
    ///
    /// let options = ParserOptionsBuilder::new("Hello, {{name}}!").build();
    /// let template = tessera::parse(options).unwrap().into_template().unwrap();
    /// let data = Value::from_json(json!({"name": "Alice"}));
    /// assert_eq!(template.render(&data).unwrap().output, "Hello, Alice!");
    /// ```
    pub fn render(&self, data: &Value) -> Result<RenderResult> {
        self.render_with_token(data, CancellationToken::new())
    }

    /// Render with the interpreter, stopping with [`TemplateError::Cancelled`] once `token` is
    /// cancelled.
    pub fn render_with_token(&self, data: &Value, token: CancellationToken) -> Result<RenderResult> {
        let mut output = StringOutput::new();
        let report = self.render_to(&mut output, data, token)?;
        Ok(report.with_output(output.into_string()))
    }

    /// Render with the interpreter into `output`.
    pub fn render_to(
        &self,
        output: &mut dyn Output,
        data: &Value,
        token: CancellationToken,
    ) -> Result<RenderReport> {
        execute(self, None, output, data, token)
    }

    /// Compile the document into closures for repeated rendering.
    pub fn compile(&self) -> CompiledTemplate {
        let started = Instant::now();
        let block = compile_document(&self.document);
        let elapsed = started.elapsed();
        debug!(
            items = self.document.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "compiled template"
        );
        CompiledTemplate {
            template: self.clone(),
            block,
            compile_profile: self
                .options
                .profile()
                .then(|| PerformanceProfile::new("compile", elapsed)),
        }
    }
}

/// A template compiled into nested closures.
///
/// Renders exactly like the [`Template`] it came from, without walking the document again.
#[derive(Clone)]
pub struct CompiledTemplate {
    template: Template,
    block: CompiledBlock,
    compile_profile: Option<PerformanceProfile>,
}

impl std::fmt::Debug for CompiledTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledTemplate")
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

impl CompiledTemplate {
    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn render(&self, data: &Value) -> Result<RenderResult> {
        self.render_with_token(data, CancellationToken::new())
    }

    pub fn render_with_token(&self, data: &Value, token: CancellationToken) -> Result<RenderResult> {
        let mut output = StringOutput::new();
        let report = self.render_to(&mut output, data, token)?;
        Ok(report.with_output(output.into_string()))
    }

    pub fn render_to(
        &self,
        output: &mut dyn Output,
        data: &Value,
        token: CancellationToken,
    ) -> Result<RenderReport> {
        execute(&self.template, Some(self), output, data, token)
    }
}

impl RenderReport {
    fn with_output(self, output: String) -> RenderResult {
        RenderResult {
            output,
            truncated: self.truncated,
            profile: self.profile,
        }
    }
}

fn execute(
    template: &Template,
    compiled: Option<&CompiledTemplate>,
    output: &mut dyn Output,
    data: &Value,
    token: CancellationToken,
) -> Result<RenderReport> {
    let started = Instant::now();
    let scope = RenderScope::new(
        Arc::clone(&template.options),
        Arc::clone(&template.document),
        token,
    );
    let mut renderer = Renderer::new(scope, output);
    let context = Context::root(data.clone());
    match compiled {
        Some(compiled) => {
            (compiled.block)(&mut renderer, &context)?;
        }
        None => interpret(&mut renderer, 0, ItemId::ROOT, &context)?,
    }
    renderer.flush()?;

    let mut scope = renderer.into_scope();
    let truncated = scope.is_truncated();
    debug!(
        compiled = compiled.is_some(),
        truncated,
        elapsed_us = started.elapsed().as_micros() as u64,
        "rendered template"
    );
    let profile = scope.take_profiler().map(|profiler| {
        let mut sections: Vec<PerformanceProfile> = template.parse_profile.iter().cloned().collect();
        if let Some(compile) = compiled.and_then(|compiled| compiled.compile_profile.clone()) {
            sections.push(compile);
        }
        sections.push(profiler.finish());
        let mut root = PerformanceProfile::new(
            "template",
            sections.iter().map(|section| section.duration).sum::<Duration>(),
        );
        root.children = sections;
        root
    });
    Ok(RenderReport { truncated, profile })
}

/// Convenience function: parse and render in one call
///
/// Diagnostics with error severity become [`TemplateError::InvalidTemplate`].
///
/// # Example
///
/// ```rust
/// use serde_json::json;
///
/// let result = tessera::render(
///     "{{#each items}}{{.}}{{#if $last}}.{{else}}, {{/if}}{{/each}}",
///     json!({"items": [1, 2, 3]}),
/// ).unwrap();
///
/// assert_eq!(result, "1, 2, 3.");
/// ```
pub fn render(source: &str, data: serde_json::Value) -> Result<String> {
    render_with_options(ParserOptionsBuilder::new(source).build(), data)
}

/// Parse and render the template held by `options`.
pub fn render_with_options(options: Arc<ParserOptions>, data: serde_json::Value) -> Result<String> {
    let template = parse(options)?.into_template()?;
    Ok(template.render(&Value::from_json(data))?.output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(template: &str) -> ParserOptionsBuilder {
        ParserOptionsBuilder::new(template)
    }

    #[test]
    fn test_template_reuse() {
        let template = parse(options("Hello, {{name}}!").build())
            .unwrap()
            .into_template()
            .unwrap();

        let first = template.render(&Value::from_json(json!({"name": "Alice"}))).unwrap();
        assert_eq!(first.output, "Hello, Alice!");

        let second = template.render(&Value::from_json(json!({"name": "Bob"}))).unwrap();
        assert_eq!(second.output, "Hello, Bob!");
    }

    #[test]
    fn test_invalid_template_keeps_diagnostics() {
        let parsed = parse(options("{{#if a}}open").build()).unwrap();
        assert!(parsed.has_errors());
        assert!(parsed.template.is_none());

        let err = render("{{#if a}}open", json!({})).unwrap_err();
        match err {
            TemplateError::InvalidTemplate { diagnostics } => assert!(!diagnostics.is_empty()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_compiled_matches_interpreted() {
        let template = parse(options("{{#each xs}}[{{$index}}:{{.}}]{{/each}}").build())
            .unwrap()
            .into_template()
            .unwrap();
        let data = Value::from_json(json!({"xs": ["a", "b"]}));
        let compiled = template.compile();
        assert_eq!(template.render(&data).unwrap(), compiled.render(&data).unwrap());
        assert_eq!(compiled.render(&data).unwrap().output, "[0:a][1:b]");
    }

    #[test]
    fn test_profile_sections() {
        let template = parse(options("{{#declare p}}x{{/declare}}{{#import p}}").profile(true).build())
            .unwrap()
            .into_template()
            .unwrap();
        let profile = template
            .compile()
            .render(&Value::from_json(json!({})))
            .unwrap()
            .profile
            .unwrap();
        assert_eq!(profile.name, "template");
        let names: Vec<&str> = profile.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["parse", "compile", "render"]);
        assert!(profile.find("partial:p").is_some());
    }

    #[test]
    fn test_profile_disabled_by_default() {
        let template = parse(options("a").build()).unwrap().into_template().unwrap();
        assert!(template.render(&Value::Null).unwrap().profile.is_none());
    }

    #[test]
    fn test_render_to_writer() {
        let template = parse(options("<{{v}}>").build()).unwrap().into_template().unwrap();
        let mut output = WriterOutput::new(Vec::new());
        let report = template
            .render_to(
                &mut output,
                &Value::from_json(json!({"v": "&"})),
                CancellationToken::new(),
            )
            .unwrap();
        assert!(!report.truncated);
        assert_eq!(output.into_inner(), b"<&amp;>");
    }
}
