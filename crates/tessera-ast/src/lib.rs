//! Parsing front end for Tessera templates.
//!
//! Source text goes through the [`lexer`] (tokens plus diagnostics), the expression parser
//! (invoked by the lexer for every tag), and the document builder in [`parser`], which produces
//! an immutable [`Document`].
//!
//! ```
//! use tessera_ast::{parse, TokenizerOptions};
//!
//! let parsed = parse("Hello {{name}}!", &TokenizerOptions::default()).unwrap();
//! assert!(parsed.diagnostics.is_empty());
//! assert_eq!(parsed.document.unwrap().children(tessera_ast::ItemId::ROOT).len(), 3);
//! ```

pub mod ast;
mod diagnostics;
pub mod expression;
pub mod lexer;
mod location;
pub mod parser;
pub mod token;
mod validator;

pub use ast::{
    Alias, ConditionalItem, ContentItem, CustomItem, Document, DocumentItem, EachItem, ItemId,
    ItemKind, ScopeId, ScopeItem,
};
pub use diagnostics::{BuildError, Diagnostic, Result, Severity};
pub use expression::{
    Argument, CallExpression, Expression, Literal, Operator, OperatorExpression, PathExpression,
    PathSegment,
};
pub use lexer::{tokenize, CustomTag, Tokenized, TokenizerOptions, UnmatchedTagBehavior};
pub use location::{Location, SourceRange};
pub use parser::build_document;
pub use token::{TextOperation, Token, TokenKind};
pub use validator::{validate_identifier, validate_partial_name};

use tracing::debug;

/// Result of parsing template source.
///
/// `document` is `None` when any error diagnostic was reported; warnings alone do not prevent
/// building the document.
#[derive(Debug, Clone)]
pub struct ParseOutput {
    pub document: Option<Document>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParseOutput {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// Tokenize and build a document.
///
/// Template syntax problems are returned as diagnostics. An `Err` means the token stream was
/// structurally unusable, which the tokenizer's own checks normally rule out.
pub fn parse(source: &str, options: &TokenizerOptions) -> Result<ParseOutput> {
    let tokenized = tokenize(source, options);
    debug!(
        tokens = tokenized.tokens.len(),
        diagnostics = tokenized.diagnostics.len(),
        "tokenized template"
    );
    if tokenized.has_errors() {
        return Ok(ParseOutput {
            document: None,
            diagnostics: tokenized.diagnostics,
        });
    }
    let document = build_document(tokenized.tokens)?;
    debug!(items = document.len(), "built document");
    Ok(ParseOutput {
        document: Some(document),
        diagnostics: tokenized.diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reports_diagnostics_without_document() {
        let parsed = parse("{{#if a}}", &TokenizerOptions::default()).unwrap();
        assert!(parsed.document.is_none());
        assert!(parsed.has_errors());
    }

    #[test]
    fn test_warnings_still_build() {
        let options = TokenizerOptions {
            unmatched_tags: UnmatchedTagBehavior::Warn,
            ..TokenizerOptions::default()
        };
        let parsed = parse("a{{#mystery}}b", &options).unwrap();
        assert!(!parsed.has_errors());
        assert_eq!(parsed.diagnostics.len(), 1);
        assert_eq!(parsed.document.unwrap().children(ItemId::ROOT).len(), 2);
    }

    #[test]
    fn test_diagnostic_carries_location() {
        let parsed = parse("ok\n{{ 1 + }}", &TokenizerOptions::default()).unwrap();
        let diagnostic = &parsed.diagnostics[0];
        assert_eq!(diagnostic.range.start.line, 2);
    }
}
