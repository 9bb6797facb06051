//! Template diagnostics and build errors.

use crate::location::{Location, SourceRange};
use std::fmt;
use thiserror::Error;

/// Severity of a template diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A problem found while tokenizing. Reported as data, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub range: SourceRange,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, range: SourceRange) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            range,
        }
    }

    pub fn warning(message: impl Into<String>, range: SourceRange) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            range,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{severity} at {}: {}", self.range.start, self.message)
    }
}

/// Structural violations detected while building the document tree.
///
/// A token stream produced by the tokenizer without error diagnostics never triggers these;
/// they surface when a hand-assembled or externally supplied token stream is malformed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("Unterminated block '{keyword}' opened at {location}")]
    UnterminatedBlock { keyword: String, location: Location },

    #[error("Closing tag '{found}' at {location} does not match the open block '{expected}'")]
    MismatchedClose {
        expected: String,
        found: String,
        location: Location,
    },

    #[error("Unexpected '{keyword}' at {location}: {message}")]
    MisplacedTag {
        keyword: String,
        message: String,
        location: Location,
    },

    #[error("Token at {location} is missing its expression")]
    MissingExpression { location: Location },
}

/// Result type alias for document building.
pub type Result<T> = std::result::Result<T, BuildError>;
