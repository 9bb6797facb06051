//! Error types for the Tessera engine.

use std::time::Duration;
use thiserror::Error;

pub use tessera_ast::{BuildError, Diagnostic, Location};

/// All errors that can occur while parsing or rendering
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Invalid template: {}", join_diagnostics(diagnostics))]
    InvalidTemplate { diagnostics: Vec<Diagnostic> },

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("Unresolved path '{path}' at {location}")]
    UnresolvedPath { path: String, location: Location },

    #[error("Type error at {location}: {message} (path: '{path}', context: '{breadcrumb}')")]
    TypeError {
        message: String,
        path: String,
        breadcrumb: String,
        location: Location,
    },

    #[error("Partial stack overflow after {limit} nested calls: {}", chain.join(" -> "))]
    PartialStackOverflow { chain: Vec<String>, limit: usize },

    #[error("Partial '{name}' not found at {location}")]
    PartialNotFound { name: String, location: Location },

    #[error("No formatter '{name}' accepts a {receiver} receiver with the given arguments at {location}")]
    FormatterNotFound {
        name: String,
        receiver: String,
        location: Location,
    },

    #[error("Formatter '{name}' failed at {location}: {message}")]
    Formatter {
        name: String,
        message: String,
        location: Location,
    },

    #[error("Render timed out after {0:?}")]
    Timeout(Duration),

    #[error("Render cancelled")]
    Cancelled,

    #[error("{0}")]
    Custom(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn join_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .filter(|d| d.is_error())
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for Tessera operations
pub type Result<T> = std::result::Result<T, TemplateError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_ast::SourceRange;

    #[test]
    fn test_invalid_template_lists_errors_only() {
        let err = TemplateError::InvalidTemplate {
            diagnostics: vec![
                Diagnostic::warning("ignored", SourceRange::default()),
                Diagnostic::error("Unclosed block 'if'", SourceRange::default()),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Invalid template: error at line 1, column 1: Unclosed block 'if'"
        );
    }

    #[test]
    fn test_overflow_message_shows_chain() {
        let err = TemplateError::PartialStackOverflow {
            chain: vec!["a".to_string(), "b".to_string(), "a".to_string()],
            limit: 2,
        };
        assert!(err.to_string().ends_with("a -> b -> a"));
    }
}
