//! Source positions used by tokens, diagnostics and document items.

use std::fmt;

/// Location in source text (1-indexed line and column, 0-indexed byte offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub line: usize,
    pub column: usize,
    pub byte_offset: usize,
}

impl Default for Location {
    fn default() -> Self {
        Self::start()
    }
}

impl Location {
    pub fn new(line: usize, column: usize, byte_offset: usize) -> Self {
        Self {
            line,
            column,
            byte_offset,
        }
    }

    /// The first character of a source.
    pub fn start() -> Self {
        Self::new(1, 1, 0)
    }

    /// Returns the location reached after reading `text` starting at `self`.
    pub fn advance_over(self, text: &str) -> Self {
        let mut location = self;
        for c in text.chars() {
            location = location.advance(c);
        }
        location
    }

    /// Returns the location following the character `c`.
    pub fn advance(self, c: char) -> Self {
        if c == '\n' {
            Self::new(self.line + 1, 1, self.byte_offset + 1)
        } else {
            Self::new(self.line, self.column + 1, self.byte_offset + c.len_utf8())
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// A half-open range of source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct SourceRange {
    pub start: Location,
    pub end: Location,
}

impl SourceRange {
    pub fn new(start: Location, end: Location) -> Self {
        Self { start, end }
    }

    /// A zero-width range at `location`.
    pub fn at(location: Location) -> Self {
        Self::new(location, location)
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_over_newlines() {
        let location = Location::start().advance_over("ab\ncd");
        assert_eq!(location, Location::new(2, 3, 5));
    }

    #[test]
    fn test_advance_counts_utf8_bytes() {
        let location = Location::start().advance('é');
        assert_eq!(location.column, 2);
        assert_eq!(location.byte_offset, 2);
    }
}
