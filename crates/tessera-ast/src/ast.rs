//! Document item model.
//!
//! A parsed template is a [`Document`]: an arena of [`DocumentItem`]s addressed by [`ItemId`].
//! Item 0 is the root. Children are ordered by document position and there are no parent
//! links, so the arena is the only owner of every item.

use crate::expression::Expression;
use crate::location::SourceRange;
use crate::token::{TextOperation, TokenOption};
use std::borrow::Cow;

/// Handle of an item inside its [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub usize);

impl ItemId {
    pub const ROOT: ItemId = ItemId(0);
}

/// Lexical block owning a `let` binding or alias. `ScopeId::GLOBAL` marks `var` bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

impl ScopeId {
    pub const GLOBAL: ScopeId = ScopeId(0);

    pub fn is_global(self) -> bool {
        self == Self::GLOBAL
    }
}

/// Immutable tree of document items produced by the document builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    items: Vec<DocumentItem>,
}

impl Document {
    pub(crate) fn new() -> Self {
        Self {
            items: vec![DocumentItem::new(ItemKind::Root, SourceRange::default())],
        }
    }

    pub(crate) fn push(&mut self, parent: ItemId, item: DocumentItem) -> ItemId {
        let id = ItemId(self.items.len());
        self.items.push(item);
        self.items[parent.0].children.push(id);
        id
    }

    pub(crate) fn item_mut(&mut self, id: ItemId) -> &mut DocumentItem {
        &mut self.items[id.0]
    }

    pub fn root(&self) -> ItemId {
        ItemId::ROOT
    }

    pub fn item(&self, id: ItemId) -> &DocumentItem {
        &self.items[id.0]
    }

    pub fn get(&self, id: ItemId) -> Option<&DocumentItem> {
        self.items.get(id.0)
    }

    pub fn children(&self, id: ItemId) -> &[ItemId] {
        &self.items[id.0].children
    }

    /// Number of items, root included.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items[0].children.is_empty()
    }

    /// All partials declared anywhere in the document, in document order.
    pub fn declared_partials(&self) -> impl Iterator<Item = (&str, ItemId)> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| match &item.kind {
                ItemKind::PartialDeclare { name } => Some((name.as_str(), ItemId(index))),
                _ => None,
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentItem {
    pub kind: ItemKind,
    pub children: Vec<ItemId>,
    pub range: SourceRange,
    /// Persistent options copied from the tag that created this item.
    pub tag_options: Vec<TokenOption>,
}

impl DocumentItem {
    pub fn new(kind: ItemKind, range: SourceRange) -> Self {
        Self {
            kind,
            children: Vec::new(),
            range,
            tag_options: Vec::new(),
        }
    }

    pub fn has_tag_option(&self, name: &str) -> bool {
        self.tag_options.iter().any(|o| o.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    Root,
    Content(ContentItem),
    Value {
        expression: Expression,
        escape: bool,
    },
    /// `if` / `^if`. `ElseIf` and `Else` items are children following the then-branch.
    If(ConditionalItem),
    ElseIf(ConditionalItem),
    Else,
    /// `each` and `foreach`.
    Each(EachItem),
    While {
        expression: Expression,
    },
    DoWhile {
        expression: Expression,
    },
    Repeat {
        expression: Expression,
    },
    Switch {
        expression: Expression,
        scope_to_value: bool,
    },
    Case {
        expression: Expression,
    },
    Default,
    Scope(ScopeItem),
    Isolate {
        expression: Option<Expression>,
    },
    Variable {
        name: String,
        expression: Expression,
        scope: ScopeId,
    },
    /// Synthetic: ends a lexical binding when its block closes.
    RemoveAlias {
        name: String,
        scope: ScopeId,
    },
    PartialDeclare {
        name: String,
    },
    PartialImport {
        name: Expression,
        context: Option<Expression>,
    },
    Custom(CustomItem),
}

impl ItemKind {
    /// Short name used in profiles and logs.
    pub fn name(&self) -> &'static str {
        match self {
            ItemKind::Root => "root",
            ItemKind::Content(_) => "content",
            ItemKind::Value { .. } => "value",
            ItemKind::If(_) => "if",
            ItemKind::ElseIf(_) => "elseif",
            ItemKind::Else => "else",
            ItemKind::Each(_) => "each",
            ItemKind::While { .. } => "while",
            ItemKind::DoWhile { .. } => "do",
            ItemKind::Repeat { .. } => "repeat",
            ItemKind::Switch { .. } => "switch",
            ItemKind::Case { .. } => "case",
            ItemKind::Default => "default",
            ItemKind::Scope(_) => "scope",
            ItemKind::Isolate { .. } => "isolate",
            ItemKind::Variable { .. } => "variable",
            ItemKind::RemoveAlias { .. } => "remove-alias",
            ItemKind::PartialDeclare { .. } => "declare",
            ItemKind::PartialImport { .. } => "import",
            ItemKind::Custom(_) => "custom",
        }
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, ItemKind::ElseIf(_) | ItemKind::Else)
    }
}

/// Literal text plus the text edits queued against it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContentItem {
    pub text: String,
    pub edits: Vec<TextOperation>,
}

impl ContentItem {
    pub fn new(text: String) -> Self {
        Self {
            text,
            edits: Vec::new(),
        }
    }

    /// Text after applying every edit in order.
    pub fn rendered_text(&self) -> Cow<'_, str> {
        if self.edits.is_empty() {
            return Cow::Borrowed(&self.text);
        }
        let mut text = self.text.clone();
        for edit in &self.edits {
            text = apply_edit(&text, *edit);
        }
        Cow::Owned(text)
    }
}

fn apply_edit(text: &str, edit: TextOperation) -> String {
    match edit {
        TextOperation::AppendLineBreak => format!("{text}\n"),
        TextOperation::TrimLeadingLineBreak => strip_line_break(text).unwrap_or(text).to_string(),
        TextOperation::TrimLeadingLineBreaks => {
            let mut rest = text;
            while let Some(stripped) = strip_line_break(rest) {
                rest = stripped;
            }
            rest.to_string()
        }
        TextOperation::TrimLeadingWhitespace => text.trim_start().to_string(),
        TextOperation::TrimTrailingWhitespace => text.trim_end().to_string(),
    }
}

fn strip_line_break(text: &str) -> Option<&str> {
    text.strip_prefix("\r\n").or_else(|| text.strip_prefix('\n'))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalItem {
    pub expression: Expression,
    pub inverted: bool,
}

/// Name bound by `as name` or `foreach name in`, owned by the block's lexical scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub name: String,
    pub scope: ScopeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EachItem {
    pub expression: Expression,
    pub alias: Option<Alias>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeItem {
    pub expression: Expression,
    pub inverted: bool,
    pub alias: Option<Alias>,
}

/// Item created for a tag claimed by a custom provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomItem {
    pub tag: String,
    pub expression: Option<Expression>,
    pub block: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(text: &str, edits: &[TextOperation]) -> ContentItem {
        ContentItem {
            text: text.to_string(),
            edits: edits.to_vec(),
        }
    }

    #[test]
    fn test_rendered_text_without_edits_borrows() {
        let item = content("abc", &[]);
        assert!(matches!(item.rendered_text(), Cow::Borrowed("abc")));
    }

    #[test]
    fn test_trim_one_line_break() {
        let item = content("\n\nx", &[TextOperation::TrimLeadingLineBreak]);
        assert_eq!(item.rendered_text(), "\nx");
    }

    #[test]
    fn test_trim_all_line_breaks() {
        let item = content("\r\n\n  x", &[TextOperation::TrimLeadingLineBreaks]);
        assert_eq!(item.rendered_text(), "  x");
    }

    #[test]
    fn test_edits_apply_in_order() {
        let item = content(
            "  x  ",
            &[
                TextOperation::TrimLeadingWhitespace,
                TextOperation::TrimTrailingWhitespace,
                TextOperation::AppendLineBreak,
            ],
        );
        assert_eq!(item.rendered_text(), "x\n");
    }

    #[test]
    fn test_push_links_children_in_order() {
        let mut document = Document::new();
        let a = document.push(
            ItemId::ROOT,
            DocumentItem::new(ItemKind::Else, SourceRange::default()),
        );
        let b = document.push(
            ItemId::ROOT,
            DocumentItem::new(ItemKind::Default, SourceRange::default()),
        );
        assert_eq!(document.children(document.root()), &[a, b]);
        assert_eq!(document.len(), 3);
    }
}
