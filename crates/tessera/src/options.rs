//! Parser options.
//!
//! [`ParserOptions`] is produced by [`ParserOptionsBuilder::build`] and never changes afterwards,
//! so a parsed template and its options can be shared between threads rendering concurrently.
//! [`OptionsConfig`] carries the plain-data subset and can be deserialized from JSON.

use crate::custom::CustomItemProvider;
use crate::error::Result;
use crate::formatter::{FormatterErrorPolicy, FormatterModel, FormatterService};
use crate::partials::PartialStore;
use crate::resolver::{DefaultMemberResolver, MemberResolver, ValueResolver};
use crate::services::ServiceCollection;
use crate::value::Value;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tessera_ast::{CustomTag, TokenizerOptions, UnmatchedTagBehavior};

/// Default maximum partial nesting.
pub const DEFAULT_PARTIAL_STACK_SIZE: usize = 255;

/// Predicate deciding which values count as false in conditions.
pub type DefinitionOfFalse = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// What happens when partial nesting exceeds `partial_stack_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialStackOverflowBehavior {
    #[default]
    Raise,
    /// Skip the offending partial call and keep rendering.
    Silent,
}

/// How `{{#scope}}` treats values that exist but are falsy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopingBehavior {
    /// Render the block only for truthy values.
    #[default]
    DoNotScope,
    /// Render the block whenever the path resolves.
    ScopeAnyway,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Culture {
    pub name: String,
    pub decimal_separator: char,
}

impl Default for Culture {
    fn default() -> Self {
        Self {
            name: "invariant".to_string(),
            decimal_separator: '.',
        }
    }
}

#[derive(Deserialize)]
#[serde(remote = "UnmatchedTagBehavior", rename_all = "snake_case")]
#[allow(dead_code)]
enum UnmatchedTagBehaviorDef {
    Error,
    Warn,
    Ignore,
}

/// Plain-data options, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OptionsConfig {
    pub template: String,
    /// Maximum output size in characters, 0 for unlimited.
    pub max_size: usize,
    /// Render timeout in milliseconds, 0 for none.
    pub timeout_ms: u64,
    pub partial_stack_size: usize,
    pub stack_overflow: PartialStackOverflowBehavior,
    pub disable_content_escaping: bool,
    pub culture: Culture,
    pub null_substitute: String,
    pub strict_paths: bool,
    #[serde(with = "UnmatchedTagBehaviorDef")]
    pub unmatched_tags: UnmatchedTagBehavior,
    pub scoping: ScopingBehavior,
    pub formatter_errors: FormatterErrorPolicy,
    pub profile: bool,
    pub formatter_cache: bool,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            template: String::new(),
            max_size: 0,
            timeout_ms: 0,
            partial_stack_size: DEFAULT_PARTIAL_STACK_SIZE,
            stack_overflow: PartialStackOverflowBehavior::default(),
            disable_content_escaping: false,
            culture: Culture::default(),
            null_substitute: String::new(),
            strict_paths: false,
            unmatched_tags: UnmatchedTagBehavior::default(),
            scoping: ScopingBehavior::default(),
            formatter_errors: FormatterErrorPolicy::default(),
            profile: false,
            formatter_cache: true,
        }
    }
}

impl OptionsConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Immutable options shared by parsing and every render of the resulting template.
pub struct ParserOptions {
    config: OptionsConfig,
    formatters: FormatterService,
    value_resolvers: Vec<Arc<dyn ValueResolver>>,
    member_resolver: Arc<dyn MemberResolver>,
    partial_store: Option<Arc<dyn PartialStore>>,
    custom_tags: Vec<Arc<dyn CustomItemProvider>>,
    services: ServiceCollection,
    definition_of_false: DefinitionOfFalse,
}

impl ParserOptions {
    pub fn builder(template: impl Into<String>) -> ParserOptionsBuilder {
        ParserOptionsBuilder::new(template)
    }

    pub fn config(&self) -> &OptionsConfig {
        &self.config
    }

    pub fn template(&self) -> &str {
        &self.config.template
    }

    pub fn max_size(&self) -> Option<usize> {
        (self.config.max_size > 0).then_some(self.config.max_size)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.config.timeout_ms > 0).then(|| Duration::from_millis(self.config.timeout_ms))
    }

    pub fn partial_stack_size(&self) -> usize {
        self.config.partial_stack_size
    }

    pub fn stack_overflow(&self) -> PartialStackOverflowBehavior {
        self.config.stack_overflow
    }

    pub fn escape_content(&self) -> bool {
        !self.config.disable_content_escaping
    }

    pub fn culture(&self) -> &Culture {
        &self.config.culture
    }

    pub fn null_substitute(&self) -> &str {
        &self.config.null_substitute
    }

    pub fn strict_paths(&self) -> bool {
        self.config.strict_paths
    }

    pub fn scoping(&self) -> ScopingBehavior {
        self.config.scoping
    }

    pub fn formatter_errors(&self) -> FormatterErrorPolicy {
        self.config.formatter_errors
    }

    pub fn profile(&self) -> bool {
        self.config.profile
    }

    pub fn formatters(&self) -> &FormatterService {
        &self.formatters
    }

    pub fn value_resolvers(&self) -> &[Arc<dyn ValueResolver>] {
        &self.value_resolvers
    }

    pub fn member_resolver(&self) -> &dyn MemberResolver {
        self.member_resolver.as_ref()
    }

    pub fn partial_store(&self) -> Option<&dyn PartialStore> {
        self.partial_store.as_deref()
    }

    pub fn custom_tag(&self, name: &str) -> Option<&Arc<dyn CustomItemProvider>> {
        self.custom_tags
            .iter()
            .find(|provider| provider.tag().eq_ignore_ascii_case(name))
    }

    pub fn services(&self) -> &ServiceCollection {
        &self.services
    }

    pub fn is_false(&self, value: &Value) -> bool {
        (self.definition_of_false)(value)
    }

    /// Settings handed to the tokenizer for this template and its partials.
    pub fn tokenizer_options(&self) -> TokenizerOptions {
        TokenizerOptions {
            custom_tags: self
                .custom_tags
                .iter()
                .map(|provider| CustomTag {
                    name: provider.tag().to_string(),
                    block: provider.is_block(),
                })
                .collect(),
            unmatched_tags: self.config.unmatched_tags,
        }
    }
}

impl fmt::Debug for ParserOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserOptions")
            .field("config", &self.config)
            .field("value_resolvers", &self.value_resolvers.len())
            .field("custom_tags", &self.custom_tags.len())
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

/// Collects options; [`build`](ParserOptionsBuilder::build) seals them.
pub struct ParserOptionsBuilder {
    config: OptionsConfig,
    formatters: Option<FormatterService>,
    extra_formatters: Vec<FormatterModel>,
    value_resolvers: Vec<Arc<dyn ValueResolver>>,
    member_resolver: Arc<dyn MemberResolver>,
    partial_store: Option<Arc<dyn PartialStore>>,
    custom_tags: Vec<Arc<dyn CustomItemProvider>>,
    services: ServiceCollection,
    definition_of_false: Option<DefinitionOfFalse>,
}

impl ParserOptionsBuilder {
    pub fn new(template: impl Into<String>) -> Self {
        Self::from_config(OptionsConfig {
            template: template.into(),
            ..OptionsConfig::default()
        })
    }

    pub fn from_config(config: OptionsConfig) -> Self {
        Self {
            config,
            formatters: None,
            extra_formatters: Vec::new(),
            value_resolvers: Vec::new(),
            member_resolver: Arc::new(DefaultMemberResolver),
            partial_store: None,
            custom_tags: Vec::new(),
            services: ServiceCollection::new(),
            definition_of_false: None,
        }
    }

    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.config.template = template.into();
        self
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.config.max_size = max_size;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn partial_stack_size(mut self, size: usize) -> Self {
        self.config.partial_stack_size = size;
        self
    }

    pub fn stack_overflow(mut self, behavior: PartialStackOverflowBehavior) -> Self {
        self.config.stack_overflow = behavior;
        self
    }

    pub fn disable_content_escaping(mut self, disable: bool) -> Self {
        self.config.disable_content_escaping = disable;
        self
    }

    pub fn culture(mut self, culture: Culture) -> Self {
        self.config.culture = culture;
        self
    }

    pub fn null_substitute(mut self, text: impl Into<String>) -> Self {
        self.config.null_substitute = text.into();
        self
    }

    pub fn strict_paths(mut self, strict: bool) -> Self {
        self.config.strict_paths = strict;
        self
    }

    pub fn unmatched_tags(mut self, behavior: UnmatchedTagBehavior) -> Self {
        self.config.unmatched_tags = behavior;
        self
    }

    pub fn scoping(mut self, scoping: ScopingBehavior) -> Self {
        self.config.scoping = scoping;
        self
    }

    pub fn formatter_errors(mut self, policy: FormatterErrorPolicy) -> Self {
        self.config.formatter_errors = policy;
        self
    }

    pub fn profile(mut self, profile: bool) -> Self {
        self.config.profile = profile;
        self
    }

    pub fn formatter_cache(mut self, enabled: bool) -> Self {
        self.config.formatter_cache = enabled;
        self
    }

    /// Replace the default formatter library.
    pub fn formatters(mut self, service: FormatterService) -> Self {
        self.formatters = Some(service);
        self
    }

    /// Register one more formatter on top of the library.
    pub fn add_formatter(mut self, model: FormatterModel) -> Self {
        self.extra_formatters.push(model);
        self
    }

    pub fn value_resolver(mut self, resolver: Arc<dyn ValueResolver>) -> Self {
        self.value_resolvers.push(resolver);
        self
    }

    pub fn member_resolver(mut self, resolver: Arc<dyn MemberResolver>) -> Self {
        self.member_resolver = resolver;
        self
    }

    pub fn partial_store(mut self, store: Arc<dyn PartialStore>) -> Self {
        self.partial_store = Some(store);
        self
    }

    pub fn custom_tag(mut self, provider: Arc<dyn CustomItemProvider>) -> Self {
        self.custom_tags.push(provider);
        self
    }

    pub fn service(mut self, name: impl Into<String>, value: Value) -> Self {
        self.services.add(name, value);
        self
    }

    pub fn definition_of_false(
        mut self,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.definition_of_false = Some(Arc::new(predicate));
        self
    }

    pub fn build(self) -> Arc<ParserOptions> {
        let mut formatters = self.formatters.unwrap_or_else(FormatterService::with_defaults);
        for model in self.extra_formatters {
            formatters.register(model);
        }
        formatters.set_cache_enabled(self.config.formatter_cache);
        Arc::new(ParserOptions {
            config: self.config,
            formatters,
            value_resolvers: self.value_resolvers,
            member_resolver: self.member_resolver,
            partial_store: self.partial_store,
            custom_tags: self.custom_tags,
            services: self.services,
            definition_of_false: self
                .definition_of_false
                .unwrap_or_else(|| Arc::new(|value: &Value| !value.is_truthy())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ParserOptionsBuilder::new("x").build();
        assert_eq!(options.template(), "x");
        assert_eq!(options.max_size(), None);
        assert_eq!(options.timeout(), None);
        assert_eq!(options.partial_stack_size(), DEFAULT_PARTIAL_STACK_SIZE);
        assert!(options.escape_content());
        assert!(options.formatters().cache_enabled());
        assert!(options.is_false(&Value::Integer(0)));
        assert!(!options.is_false(&Value::from("text")));
    }

    #[test]
    fn test_config_from_json() {
        let config = OptionsConfig::from_json(
            r#"{
                "template": "{{a}}",
                "max_size": 10,
                "stack_overflow": "silent",
                "unmatched_tags": "warn",
                "scoping": "scope_anyway",
                "formatter_errors": "stringify",
                "culture": { "name": "de-DE", "decimal_separator": "," }
            }"#,
        )
        .unwrap();
        assert_eq!(config.max_size, 10);
        assert_eq!(config.stack_overflow, PartialStackOverflowBehavior::Silent);
        assert_eq!(config.unmatched_tags, UnmatchedTagBehavior::Warn);
        assert_eq!(config.scoping, ScopingBehavior::ScopeAnyway);
        assert_eq!(config.formatter_errors, FormatterErrorPolicy::Stringify);
        assert_eq!(config.culture.decimal_separator, ',');
        assert_eq!(config.partial_stack_size, DEFAULT_PARTIAL_STACK_SIZE);
    }

    #[test]
    fn test_config_rejects_unknown_policy() {
        assert!(OptionsConfig::from_json(r#"{"stack_overflow": "explode"}"#).is_err());
    }

    #[test]
    fn test_custom_definition_of_false() {
        let options = ParserOptionsBuilder::new("")
            .definition_of_false(|value| value.is_null())
            .build();
        assert!(!options.is_false(&Value::Integer(0)));
        assert!(options.is_false(&Value::Null));
    }

    #[test]
    fn test_cache_toggle_reaches_service() {
        let options = ParserOptionsBuilder::new("").formatter_cache(false).build();
        assert!(!options.formatters().cache_enabled());
    }
}
