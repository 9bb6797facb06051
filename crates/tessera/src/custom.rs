//! Extension point for tags the built-in syntax does not know.
//!
//! A provider claims a keyword (`{{#stamp expr}}`). The tokenizer is told about every registered
//! keyword, so the tag parses into a custom item instead of hitting the unmatched-tag policy.

use crate::scope::ScopeBag;
use crate::value::Value;

/// What a custom tag asks the engine to do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomTagOutcome {
    /// Written to the output as is, without escaping.
    pub text: Option<String>,
    /// Block tags only: render the body.
    pub render_body: bool,
    /// Context value for the body. The current context is used when `None`.
    pub body_value: Option<Value>,
}

impl CustomTagOutcome {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn body(value: Option<Value>) -> Self {
        Self {
            render_body: true,
            body_value: value,
            ..Self::default()
        }
    }
}

pub trait CustomItemProvider: Send + Sync {
    /// Keyword claimed by this provider, matched case-insensitively.
    fn tag(&self) -> &str;

    /// Whether the tag opens a block closed by `{{/tag}}`.
    fn is_block(&self) -> bool {
        false
    }

    /// Called once per rendering of the tag. `value` is the evaluated tag expression, if any.
    /// Errors abort the render as [`crate::TemplateError::Custom`].
    fn render(
        &self,
        value: Option<&Value>,
        context: &Value,
        bag: &mut ScopeBag,
    ) -> Result<CustomTagOutcome, String>;
}
