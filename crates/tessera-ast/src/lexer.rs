use crate::diagnostics::Diagnostic;
use crate::expression::{
    is_ident_continue, is_ident_start, parse_expression, Expression, Literal,
};
use crate::location::{Location, SourceRange};
use crate::token::{
    options, to_block_kind, to_text_operation, BlockKind, TextOperation, Token, TokenKind,
    TokenOption, VariableKind,
};
use crate::validator;
use tracing::warn;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// What to do with a `{{#tag}}` that no built-in keyword or custom provider claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnmatchedTagBehavior {
    #[default]
    Error,
    Warn,
    Ignore,
}

/// A tag keyword claimed by a custom document item provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomTag {
    pub name: String,
    /// Block tags have a body and a `{{/name}}` closing tag.
    pub block: bool,
}

/// Settings consumed by the tokenizer.
#[derive(Debug, Clone, Default)]
pub struct TokenizerOptions {
    pub custom_tags: Vec<CustomTag>,
    pub unmatched_tags: UnmatchedTagBehavior,
}

/// Output of tokenizing: the token sequence plus every diagnostic found on the way.
#[derive(Debug, Clone, Default)]
pub struct Tokenized {
    pub tokens: Vec<Token>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Tokenized {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

struct OpenBlock {
    kind: BlockKind,
    location: Location,
    seen_else: bool,
}

/// Tokenizer for template source.
///
/// Never fails: malformed tags become diagnostics and scanning resumes after the tag.
pub struct Lexer<'s> {
    source: &'s str,
    pos: usize,
    location: Location,
    options: &'s TokenizerOptions,
    tokens: Vec<Token>,
    diagnostics: Vec<Diagnostic>,
    blocks: Vec<OpenBlock>,
    /// Lowercased keywords of unknown tags dropped under the `Warn` or `Ignore` policy.
    ignored_tags: Vec<String>,
}

/// Tokenize `source` in one call.
pub fn tokenize(source: &str, options: &TokenizerOptions) -> Tokenized {
    Lexer::new(source, options).tokenize()
}

impl<'s> Lexer<'s> {
    /// Create a new lexer for the given source
    pub fn new(source: &'s str, options: &'s TokenizerOptions) -> Self {
        Self {
            source,
            pos: 0,
            location: Location::start(),
            options,
            tokens: Vec::new(),
            diagnostics: Vec::new(),
            blocks: Vec::new(),
            ignored_tags: Vec::new(),
        }
    }

    /// Tokenize the source
    pub fn tokenize(mut self) -> Tokenized {
        while self.pos < self.source.len() {
            let Some(offset) = self.source[self.pos..].find(OPEN) else {
                let rest = self.source.len();
                self.push_content(rest);
                break;
            };
            let open = self.pos + offset;
            self.push_content(open);
            let tag_start = self.location;

            let Some(close) = self.find_tag_end(open + OPEN.len()) else {
                self.diagnostics.push(Diagnostic::error(
                    "Unclosed tag: missing '}}'",
                    SourceRange::at(tag_start),
                ));
                let rest = self.source.len();
                self.advance_to(rest);
                break;
            };

            let body = &self.source[open + OPEN.len()..close];
            self.advance_to(close + CLOSE.len());
            let range = SourceRange::new(tag_start, self.location);
            let body_location = tag_start.advance_over(OPEN);
            self.tokenize_tag(body, body_location, range);
        }

        for block in std::mem::take(&mut self.blocks) {
            self.diagnostics.push(Diagnostic::error(
                format!("Unclosed block '{}'", block.kind),
                SourceRange::at(block.location),
            ));
        }

        Tokenized {
            tokens: self.tokens,
            diagnostics: self.diagnostics,
        }
    }

    fn push_content(&mut self, end: usize) {
        if end <= self.pos {
            return;
        }
        let text = &self.source[self.pos..end];
        let start = self.location;
        self.advance_to(end);
        self.tokens.push(Token::content(
            text.to_string(),
            SourceRange::new(start, self.location),
        ));
    }

    fn advance_to(&mut self, end: usize) {
        self.location = self.location.advance_over(&self.source[self.pos..end]);
        self.pos = end;
    }

    /// Find the `}}` ending the tag whose body starts at `from`, skipping quoted strings.
    fn find_tag_end(&self, from: usize) -> Option<usize> {
        let bytes = self.source.as_bytes();
        let mut i = from;
        let mut quote: Option<u8> = None;
        while i < bytes.len() {
            let b = bytes[i];
            match quote {
                Some(_) if b == b'\\' => {
                    i += 2;
                    continue;
                }
                Some(q) if b == q => quote = None,
                Some(_) => {}
                None if b == b'\'' || b == b'"' => quote = Some(b),
                None if bytes[i..].starts_with(CLOSE.as_bytes()) => return Some(i),
                None => {}
            }
            i += 1;
        }
        // An unterminated quote would hide the close delimiter; fall back to a plain search.
        self.source[from..].find(CLOSE).map(|offset| from + offset)
    }

    fn tokenize_tag(&mut self, body: &str, body_location: Location, range: SourceRange) {
        let mut body = body;
        let mut body_location = body_location;
        let mut trim_options = Vec::new();

        if let Some(rest) = body.strip_prefix('-').filter(|rest| starts_trim_marker(rest)) {
            body = rest;
            body_location = body_location.advance('-');
            trim_options.push(TokenOption::flag(options::TRIM_BEFORE, true));
        }
        if let Some(rest) = body.strip_suffix('-') {
            body = rest;
            trim_options.push(TokenOption::flag(options::TRIM_AFTER, true));
        }

        let leading = body.len() - body.trim_start().len();
        body_location = body_location.advance_over(&body[..leading]);
        let body = body.trim();

        let Some(first) = body.chars().next() else {
            self.error("Empty tag", range);
            return;
        };

        let token = match first {
            '!' => {
                self.push_trim_operations(&trim_options, range);
                return;
            }
            '#' => self.tokenize_keyword_tag(&body[1..], body_location.advance('#'), range),
            '^' => self.tokenize_inverted_tag(&body[1..], body_location.advance('^'), range),
            '/' => self.tokenize_close_tag(&body[1..], range),
            '&' => self
                .required_expression(&body[1..], body_location.advance('&'), range)
                .map(|(expression, _)| {
                    Token::new(TokenKind::Expression { escape: false }, range)
                        .with_expression(expression)
                }),
            _ if body.eq_ignore_ascii_case("else") => self.tokenize_else(range),
            _ => self
                .required_expression_only(body, body_location, range)
                .map(|expression| {
                    Token::new(TokenKind::Expression { escape: true }, range)
                        .with_expression(expression)
                }),
        };

        if let Some(mut token) = token {
            token.options.extend(trim_options);
            self.tokens.push(token);
        }
    }

    fn tokenize_keyword_tag(
        &mut self,
        text: &str,
        location: Location,
        range: SourceRange,
    ) -> Option<Token> {
        let (keyword, rest, rest_location) = split_keyword(text, location);
        if keyword.is_empty() {
            self.error("Expected keyword after '#'", range);
            return None;
        }
        let lower = keyword.to_ascii_lowercase();

        if let Some(kind) = to_block_kind(&lower) {
            return self.tokenize_block_open(kind, rest, rest_location, range);
        }
        if let Some(operation) = to_text_operation(&lower) {
            self.expect_empty(rest, range);
            return Some(Token::new(TokenKind::TextOperation(operation), range));
        }
        match lower.as_str() {
            "elseif" => {
                self.check_branch(true, range)?;
                let expression = self.required_expression_only(rest, rest_location, range)?;
                return Some(Token::new(TokenKind::ElseIf, range).with_expression(expression));
            }
            "else" => {
                self.expect_empty(rest, range);
                return self.tokenize_else(range);
            }
            "var" => return self.tokenize_variable(VariableKind::Global, rest, rest_location, range),
            "let" => return self.tokenize_variable(VariableKind::Local, rest, rest_location, range),
            "import" | "render" => {
                let (expression, options) =
                    self.expression_with_options(rest, rest_location, range)?;
                if let Expression::Literal(Literal::String(name)) = &expression {
                    if let Err(message) = validator::validate_partial_name(name) {
                        self.error(&message, range);
                        return None;
                    }
                }
                return Some(Token {
                    options,
                    ..Token::new(TokenKind::PartialImport, range).with_expression(expression)
                });
            }
            _ => {}
        }

        let custom = self
            .options
            .custom_tags
            .iter()
            .find(|tag| tag.name.eq_ignore_ascii_case(keyword))
            .cloned();
        if let Some(custom) = custom {
            let expression = self.optional_expression(rest, rest_location, range)?;
            let token = if custom.block {
                self.blocks.push(OpenBlock {
                    kind: BlockKind::Custom(custom.name.clone()),
                    location: range.start,
                    seen_else: false,
                });
                Token::new(TokenKind::Open(BlockKind::Custom(custom.name)), range)
            } else {
                Token::new(TokenKind::Custom(custom.name), range)
            };
            return Some(Token {
                expression,
                ..token
            });
        }

        let message = format!("Unknown tag '{{{{#{keyword}}}}}'");
        match self.options.unmatched_tags {
            UnmatchedTagBehavior::Error => self.error(&message, range),
            UnmatchedTagBehavior::Warn => {
                warn!(line = range.start.line, column = range.start.column, "{message}");
                self.diagnostics.push(Diagnostic::warning(message, range));
            }
            UnmatchedTagBehavior::Ignore => {}
        }
        if self.options.unmatched_tags != UnmatchedTagBehavior::Error
            && !self.ignored_tags.contains(&lower)
        {
            self.ignored_tags.push(lower);
        }
        None
    }

    fn tokenize_block_open(
        &mut self,
        kind: BlockKind,
        rest: &str,
        rest_location: Location,
        range: SourceRange,
    ) -> Option<Token> {
        match kind {
            BlockKind::Case | BlockKind::Default => {
                if !matches!(self.blocks.last(), Some(b) if b.kind == BlockKind::Switch) {
                    self.error(
                        &format!("'{{{{#{kind}}}}}' is only allowed directly inside a switch"),
                        range,
                    );
                    return None;
                }
            }
            _ => {}
        }

        let token = match kind {
            BlockKind::Default => {
                self.expect_empty(rest, range);
                Token::new(TokenKind::Open(kind.clone()), range)
            }
            BlockKind::Isolate => {
                let expression = self.optional_expression(rest, rest_location, range)?;
                Token {
                    expression,
                    ..Token::new(TokenKind::Open(kind.clone()), range)
                }
            }
            BlockKind::Declare => {
                let expression = self.required_expression_only(rest, rest_location, range)?;
                let Some(name) = expression.as_static_name() else {
                    self.error("Partial name must be a literal name", range);
                    return None;
                };
                if let Err(message) = validator::validate_partial_name(&name) {
                    self.error(&message, range);
                    return None;
                }
                Token::new(TokenKind::Open(kind.clone()), range).with_literal(name)
            }
            BlockKind::ForEach => {
                let (alias, rest, rest_location) = split_keyword(rest, rest_location);
                if let Err(message) = validator::validate_identifier(alias) {
                    self.error(&message, range);
                    return None;
                }
                let (keyword, rest, rest_location) = split_keyword(rest, rest_location);
                if !keyword.eq_ignore_ascii_case("in") {
                    self.error("Expected '{{#foreach name in expression}}'", range);
                    return None;
                }
                let expression = self.required_expression_only(rest, rest_location, range)?;
                let mut token = Token::new(TokenKind::Open(kind.clone()), range)
                    .with_expression(expression);
                token
                    .options
                    .push(TokenOption::text(options::ALIAS, alias.to_string()));
                token
            }
            _ => {
                let (expression, options) =
                    self.expression_with_options(rest, rest_location, range)?;
                Token {
                    options,
                    ..Token::new(TokenKind::Open(kind.clone()), range).with_expression(expression)
                }
            }
        };

        self.blocks.push(OpenBlock {
            kind,
            location: range.start,
            seen_else: false,
        });
        Some(token)
    }

    fn tokenize_inverted_tag(
        &mut self,
        text: &str,
        location: Location,
        range: SourceRange,
    ) -> Option<Token> {
        let (keyword, rest, rest_location) = split_keyword(text, location);
        let kind = match keyword.to_ascii_lowercase().as_str() {
            "if" => BlockKind::IfNot,
            "scope" => BlockKind::InvertedScope,
            _ => {
                self.error(&format!("Unknown inverted tag '{{{{^{keyword}}}}}'"), range);
                return None;
            }
        };
        let expression = self.required_expression_only(rest, rest_location, range)?;
        self.blocks.push(OpenBlock {
            kind: kind.clone(),
            location: range.start,
            seen_else: false,
        });
        Some(Token::new(TokenKind::Open(kind), range).with_expression(expression))
    }

    fn tokenize_close_tag(&mut self, text: &str, range: SourceRange) -> Option<Token> {
        let keyword = text.trim();
        match self.blocks.last() {
            Some(open) if open.kind.is_closed_by(keyword) => {
                let open = self.blocks.pop()?;
                Some(Token::new(TokenKind::Close(open.kind), range))
            }
            Some(_) if self.is_ignored(keyword) => None,
            Some(open) => {
                let message = format!(
                    "Unexpected closing tag '{{{{/{keyword}}}}}', expected '{{{{/{}}}}}' for the block opened at {}",
                    open.kind, open.location
                );
                self.error(&message, range);
                None
            }
            _ if self.is_ignored(keyword) => None,
            None => {
                self.error(
                    &format!("Closing tag '{{{{/{keyword}}}}}' has no open block"),
                    range,
                );
                None
            }
        }
    }

    fn tokenize_else(&mut self, range: SourceRange) -> Option<Token> {
        self.check_branch(false, range)?;
        Some(Token::new(TokenKind::Else, range))
    }

    /// `else`/`elseif` must be directly inside an if block and may not follow `else`.
    fn check_branch(&mut self, is_else_if: bool, range: SourceRange) -> Option<()> {
        let tag = if is_else_if { "elseif" } else { "else" };
        match self.blocks.last_mut() {
            Some(open) if matches!(open.kind, BlockKind::If | BlockKind::IfNot) => {
                if open.seen_else {
                    let message = format!("'{tag}' cannot follow 'else' in the same if block");
                    self.error(&message, range);
                    return None;
                }
                if !is_else_if {
                    open.seen_else = true;
                }
                Some(())
            }
            _ => {
                self.error(&format!("'{tag}' is only allowed inside an if block"), range);
                None
            }
        }
    }

    fn tokenize_variable(
        &mut self,
        kind: VariableKind,
        text: &str,
        location: Location,
        range: SourceRange,
    ) -> Option<Token> {
        let Some((name, expression_text)) = text.split_once('=') else {
            self.error("Expected '{{#var name = expression}}'", range);
            return None;
        };
        let name = name.trim();
        if let Err(message) = validator::validate_identifier(name) {
            self.error(&message, range);
            return None;
        }
        let expression_location = location.advance_over(&text[..=text.find('=')?]);
        let expression = self.required_expression_only(expression_text, expression_location, range)?;
        Some(
            Token::new(TokenKind::Variable(kind), range)
                .with_literal(name.to_string())
                .with_expression(expression),
        )
    }

    fn push_trim_operations(&mut self, trim_options: &[TokenOption], range: SourceRange) {
        for option in trim_options {
            let operation = if option.name == options::TRIM_BEFORE {
                TextOperation::TrimTrailingWhitespace
            } else {
                TextOperation::TrimLeadingWhitespace
            };
            self.tokens
                .push(Token::new(TokenKind::TextOperation(operation), range));
        }
    }

    /// Parse an expression that must fill the whole text.
    fn required_expression_only(
        &mut self,
        text: &str,
        location: Location,
        range: SourceRange,
    ) -> Option<Expression> {
        let (expression, rest) = self.required_expression(text, location, range)?;
        if !rest.trim().is_empty() {
            self.error(&format!("Unexpected '{}' after expression", rest.trim()), range);
            return None;
        }
        Some(expression)
    }

    fn optional_expression(
        &mut self,
        text: &str,
        location: Location,
        range: SourceRange,
    ) -> Option<Option<Expression>> {
        if text.trim().is_empty() {
            return Some(None);
        }
        self.required_expression_only(text, location, range).map(Some)
    }

    fn required_expression<'t>(
        &mut self,
        text: &'t str,
        location: Location,
        range: SourceRange,
    ) -> Option<(Expression, &'t str)> {
        if text.trim().is_empty() {
            self.error("Missing expression", range);
            return None;
        }
        match parse_expression(text, location) {
            Ok(parsed) => Some((parsed.expression, &text[parsed.consumed..])),
            Err(err) => {
                self.diagnostics.push(Diagnostic::error(
                    err.message,
                    SourceRange::new(err.location, range.end),
                ));
                None
            }
        }
    }

    /// Parse an expression followed by tag options: `as name`, `#scope`, `#with expr`.
    fn expression_with_options(
        &mut self,
        text: &str,
        location: Location,
        range: SourceRange,
    ) -> Option<(Expression, Vec<TokenOption>)> {
        let (expression, mut rest) = self.required_expression(text, location, range)?;
        let mut rest_location = location.advance_over(&text[..text.len() - rest.len()]);
        let mut parsed = Vec::new();

        loop {
            let trimmed = rest.trim_start();
            rest_location = rest_location.advance_over(&rest[..rest.len() - trimmed.len()]);
            rest = trimmed;
            if rest.is_empty() {
                return Some((expression, parsed));
            }

            if let Some(option_text) = rest.strip_prefix('#') {
                let (name, after, after_location) =
                    split_keyword(option_text, rest_location.advance('#'));
                match name.to_ascii_lowercase().as_str() {
                    options::SCOPE => {
                        parsed.push(TokenOption::flag(options::SCOPE, false));
                        rest = after;
                        rest_location = after_location;
                    }
                    options::WITH => {
                        let (with, remaining) =
                            self.required_expression(after, after_location, range)?;
                        rest_location =
                            after_location.advance_over(&after[..after.len() - remaining.len()]);
                        parsed.push(TokenOption::expression(options::WITH, with));
                        rest = remaining;
                    }
                    _ => {
                        self.error(&format!("Unknown tag option '#{name}'"), range);
                        return None;
                    }
                }
                continue;
            }

            let (keyword, after, after_location) = split_keyword(rest, rest_location);
            if keyword.eq_ignore_ascii_case("as") {
                let (alias, remaining, remaining_location) = split_keyword(after, after_location);
                if let Err(message) = validator::validate_identifier(alias) {
                    self.error(&message, range);
                    return None;
                }
                parsed.push(TokenOption::text(options::ALIAS, alias.to_string()));
                rest = remaining;
                rest_location = remaining_location;
                continue;
            }

            self.error(&format!("Unexpected '{rest}' in tag"), range);
            return None;
        }
    }

    fn expect_empty(&mut self, rest: &str, range: SourceRange) {
        if !rest.trim().is_empty() {
            self.error(&format!("Unexpected '{}' in tag", rest.trim()), range);
        }
    }

    fn is_ignored(&self, keyword: &str) -> bool {
        let keyword = keyword.to_ascii_lowercase();
        self.ignored_tags.contains(&keyword)
    }

    fn error(&mut self, message: &str, range: SourceRange) {
        self.diagnostics.push(Diagnostic::error(message, range));
    }
}

/// Whether a `-` right after `{{` is a trim marker rather than a negation.
///
/// It is a marker when followed by whitespace, a tag sigil or nothing: `{{- x}}`, `{{-#if a}}`.
/// `{{-1}}` and `{{-x}}` negate.
fn starts_trim_marker(rest: &str) -> bool {
    match rest.chars().next() {
        None => true,
        Some(c) => c.is_whitespace() || matches!(c, '!' | '#' | '^' | '/' | '&'),
    }
}

/// Split a leading identifier (after optional whitespace) from the rest of `text`.
fn split_keyword(text: &str, location: Location) -> (&str, &str, Location) {
    let trimmed = text.trim_start();
    let location = location.advance_over(&text[..text.len() - trimmed.len()]);
    let end = trimmed
        .char_indices()
        .find(|&(i, c)| {
            if i == 0 {
                !is_ident_start(c)
            } else {
                !is_ident_continue(c)
            }
        })
        .map_or(trimmed.len(), |(i, _)| i);
    let (keyword, rest) = trimmed.split_at(end);
    (keyword, rest, location.advance_over(keyword))
}
