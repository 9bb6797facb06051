use crate::expression::Expression;
use crate::location::SourceRange;
use std::fmt;

/// Block tags: each has an opening `{{#kind}}` and a closing `{{/kind}}` tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockKind {
    If,
    IfNot,
    Each,
    ForEach,
    While,
    DoWhile,
    Repeat,
    Switch,
    Case,
    Default,
    Scope,
    InvertedScope,
    Isolate,
    Declare,
    Custom(String),
}

impl BlockKind {
    /// Keyword used in the closing tag.
    pub fn keyword(&self) -> &str {
        match self {
            BlockKind::If | BlockKind::IfNot => "if",
            BlockKind::Each => "each",
            BlockKind::ForEach => "foreach",
            BlockKind::While => "while",
            BlockKind::DoWhile => "do",
            BlockKind::Repeat => "repeat",
            BlockKind::Switch => "switch",
            BlockKind::Case => "case",
            BlockKind::Default => "default",
            BlockKind::Scope | BlockKind::InvertedScope => "scope",
            BlockKind::Isolate => "isolate",
            BlockKind::Declare => "declare",
            BlockKind::Custom(tag) => tag,
        }
    }

    /// Whether a closing tag with `keyword` closes this block.
    pub fn is_closed_by(&self, keyword: &str) -> bool {
        self.keyword().eq_ignore_ascii_case(keyword)
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Variable declaration lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    /// `{{#var}}`: global for the rest of the render.
    Global,
    /// `{{#let}}`: ends with the enclosing block.
    Local,
}

/// Text edits applied to neighbouring content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextOperation {
    /// `{{#nl}}`: append a line break to the preceding content.
    AppendLineBreak,
    /// `{{#tnl}}`: remove one leading line break from the following content.
    TrimLeadingLineBreak,
    /// `{{#tnls}}`: remove all leading line breaks from the following content.
    TrimLeadingLineBreaks,
    /// `{{#tws}}` and `-}}`: remove all leading whitespace from the following content.
    TrimLeadingWhitespace,
    /// `{{-`: remove all trailing whitespace from the preceding content.
    TrimTrailingWhitespace,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Literal text between tags.
    Content,
    /// `{{expr}}` (escaped) or `{{&expr}}` (raw).
    Expression { escape: bool },
    Open(BlockKind),
    Close(BlockKind),
    ElseIf,
    Else,
    /// `{{#var name = expr}}` / `{{#let name = expr}}`; the name is the literal value.
    Variable(VariableKind),
    /// `{{#import expr}}`
    PartialImport,
    TextOperation(TextOperation),
    /// A custom tag without body.
    Custom(String),
}

/// Value of a tag option.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Flag,
    Text(String),
    Expression(Expression),
}

/// Option attached to a tag (`as name`, `#with expr`, `#scope`, trim markers).
///
/// Persistent options are carried into the document item as tag creation options.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenOption {
    pub name: String,
    pub value: OptionValue,
    pub persistent: bool,
}

impl TokenOption {
    pub fn flag(name: &str, persistent: bool) -> Self {
        Self {
            name: name.to_string(),
            value: OptionValue::Flag,
            persistent,
        }
    }

    pub fn text(name: &str, text: String) -> Self {
        Self {
            name: name.to_string(),
            value: OptionValue::Text(text),
            persistent: false,
        }
    }

    pub fn expression(name: &str, expression: Expression) -> Self {
        Self {
            name: name.to_string(),
            value: OptionValue::Expression(expression),
            persistent: false,
        }
    }
}

/// Option names understood by the document builder.
pub mod options {
    pub const ALIAS: &str = "alias";
    pub const WITH: &str = "with";
    pub const SCOPE: &str = "scope";
    pub const TRIM_BEFORE: &str = "trim_before";
    pub const TRIM_AFTER: &str = "trim_after";
}

/// A token with its kind and source range. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub literal: Option<String>,
    pub range: SourceRange,
    pub expression: Option<Expression>,
    pub options: Vec<TokenOption>,
}

impl Token {
    pub fn new(kind: TokenKind, range: SourceRange) -> Self {
        Self {
            kind,
            literal: None,
            range,
            expression: None,
            options: Vec::new(),
        }
    }

    pub fn content(text: String, range: SourceRange) -> Self {
        Self {
            literal: Some(text),
            ..Self::new(TokenKind::Content, range)
        }
    }

    pub fn with_expression(mut self, expression: Expression) -> Self {
        self.expression = Some(expression);
        self
    }

    pub fn with_literal(mut self, literal: String) -> Self {
        self.literal = Some(literal);
        self
    }

    pub fn option(&self, name: &str) -> Option<&OptionValue> {
        self.options.iter().find(|o| o.name == name).map(|o| &o.value)
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.option(name).is_some()
    }

    pub fn text_option(&self, name: &str) -> Option<&str> {
        match self.option(name) {
            Some(OptionValue::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn expression_option(&self, name: &str) -> Option<&Expression> {
        match self.option(name) {
            Some(OptionValue::Expression(expression)) => Some(expression),
            _ => None,
        }
    }
}

/// Reserved words that cannot be used as alias or variable names
pub const RESERVED_WORDS: &[&str] = &["true", "false", "null", "this", "as", "in"];

/// Check if a string is a reserved word
pub fn is_reserved_word(s: &str) -> bool {
    RESERVED_WORDS.contains(&s)
}

/// Try to convert an opening keyword (`{{#keyword}}`) to a block kind
pub fn to_block_kind(keyword: &str) -> Option<BlockKind> {
    match keyword.to_ascii_lowercase().as_str() {
        "if" => Some(BlockKind::If),
        "each" => Some(BlockKind::Each),
        "foreach" => Some(BlockKind::ForEach),
        "while" => Some(BlockKind::While),
        "do" => Some(BlockKind::DoWhile),
        "repeat" => Some(BlockKind::Repeat),
        "switch" => Some(BlockKind::Switch),
        "case" => Some(BlockKind::Case),
        "default" => Some(BlockKind::Default),
        "scope" => Some(BlockKind::Scope),
        "isolate" => Some(BlockKind::Isolate),
        "declare" => Some(BlockKind::Declare),
        _ => None,
    }
}

/// Try to convert a text-operation keyword to its operation
pub fn to_text_operation(keyword: &str) -> Option<TextOperation> {
    match keyword.to_ascii_lowercase().as_str() {
        "nl" => Some(TextOperation::AppendLineBreak),
        "tnl" => Some(TextOperation::TrimLeadingLineBreak),
        "tnls" => Some(TextOperation::TrimLeadingLineBreaks),
        "tws" => Some(TextOperation::TrimLeadingWhitespace),
        _ => None,
    }
}
