//! Document tree builder.
//!
//! Consumes a token stream and produces a [`Document`]. Open blocks are tracked on an explicit
//! frame stack; each frame lazily receives a lexical scope id the first time a binding is
//! declared in it. When a frame closes, a `RemoveAlias` item is appended for every binding it
//! declared, so the binding ends exactly at the closing tag.

use crate::ast::{
    Alias, ConditionalItem, ContentItem, CustomItem, Document, DocumentItem, EachItem, ItemId,
    ItemKind, ScopeId, ScopeItem,
};
use crate::diagnostics::{BuildError, Result};
use crate::expression::Expression;
use crate::location::Location;
use crate::token::{options, BlockKind, TextOperation, Token, TokenKind, VariableKind};

/// Build a document from a token stream.
pub fn build_document(tokens: Vec<Token>) -> Result<Document> {
    let mut builder = DocumentBuilder::new();
    for token in tokens {
        builder.process(token)?;
    }
    builder.finish()
}

struct Frame {
    /// `None` for the root frame.
    kind: Option<BlockKind>,
    block: ItemId,
    /// Where children are appended; differs from `block` after `elseif`/`else`.
    container: ItemId,
    scope: Option<ScopeId>,
    declared: Vec<String>,
    saw_else: bool,
    location: Location,
}

impl Frame {
    fn new(kind: Option<BlockKind>, block: ItemId, location: Location) -> Self {
        Self {
            kind,
            block,
            container: block,
            scope: None,
            declared: Vec::new(),
            saw_else: false,
            location,
        }
    }
}

struct DocumentBuilder {
    document: Document,
    frames: Vec<Frame>,
    next_scope: u32,
    last_content: Option<ItemId>,
    pending_edits: Vec<TextOperation>,
}

impl DocumentBuilder {
    fn new() -> Self {
        Self {
            document: Document::new(),
            frames: vec![Frame::new(None, ItemId::ROOT, Location::start())],
            next_scope: 1,
            last_content: None,
            pending_edits: Vec::new(),
        }
    }

    fn process(&mut self, token: Token) -> Result<()> {
        if let TokenKind::Content = token.kind {
            return self.add_content(token);
        }
        if let TokenKind::TextOperation(operation) = token.kind {
            self.apply_text_operation(operation, &token);
            return Ok(());
        }

        if token.has_option(options::TRIM_BEFORE) {
            self.edit_previous(TextOperation::TrimTrailingWhitespace);
        }
        self.last_content = None;
        self.pending_edits.clear();

        let trim_after = token.has_option(options::TRIM_AFTER);
        self.process_tag(token)?;
        if trim_after {
            self.pending_edits.push(TextOperation::TrimLeadingWhitespace);
        }
        Ok(())
    }

    fn process_tag(&mut self, token: Token) -> Result<()> {
        match token.kind.clone() {
            TokenKind::Content | TokenKind::TextOperation(_) => Ok(()),
            TokenKind::Expression { escape } => {
                let expression = required_expression(&token)?;
                self.add_leaf(ItemKind::Value { expression, escape }, &token);
                Ok(())
            }
            TokenKind::Open(kind) => self.open_block(kind, token),
            TokenKind::Close(kind) => self.close_block(&kind, &token),
            TokenKind::ElseIf => {
                let expression = required_expression(&token)?;
                self.open_branch(
                    ItemKind::ElseIf(ConditionalItem {
                        expression,
                        inverted: false,
                    }),
                    "elseif",
                    &token,
                )
            }
            TokenKind::Else => self.open_branch(ItemKind::Else, "else", &token),
            TokenKind::Variable(kind) => {
                let name = token.literal.clone().ok_or(BuildError::MisplacedTag {
                    keyword: "var".to_string(),
                    message: "variable declaration without a name".to_string(),
                    location: token.range.start,
                })?;
                let expression = required_expression(&token)?;
                let scope = match kind {
                    VariableKind::Global => ScopeId::GLOBAL,
                    VariableKind::Local => self.declare_local(&name),
                };
                self.add_leaf(
                    ItemKind::Variable {
                        name,
                        expression,
                        scope,
                    },
                    &token,
                );
                Ok(())
            }
            TokenKind::PartialImport => {
                let name = required_expression(&token)?;
                let context = token.expression_option(options::WITH).cloned();
                self.add_leaf(ItemKind::PartialImport { name, context }, &token);
                Ok(())
            }
            TokenKind::Custom(tag) => {
                self.add_leaf(
                    ItemKind::Custom(CustomItem {
                        tag,
                        expression: token.expression.clone(),
                        block: false,
                    }),
                    &token,
                );
                Ok(())
            }
        }
    }

    fn open_block(&mut self, kind: BlockKind, token: Token) -> Result<()> {
        let mut scope = None;
        let mut declared = Vec::new();
        let mut alias = |name: Option<&str>, builder: &mut Self| {
            name.map(|name| {
                let id = builder.allocate_scope();
                scope = Some(id);
                declared.push(name.to_string());
                Alias {
                    name: name.to_string(),
                    scope: id,
                }
            })
        };

        let item = match &kind {
            BlockKind::If | BlockKind::IfNot => ItemKind::If(ConditionalItem {
                expression: required_expression(&token)?,
                inverted: kind == BlockKind::IfNot,
            }),
            BlockKind::Each | BlockKind::ForEach => {
                let expression = required_expression(&token)?;
                ItemKind::Each(EachItem {
                    expression,
                    alias: alias(token.text_option(options::ALIAS), self),
                })
            }
            BlockKind::While => ItemKind::While {
                expression: required_expression(&token)?,
            },
            BlockKind::DoWhile => ItemKind::DoWhile {
                expression: required_expression(&token)?,
            },
            BlockKind::Repeat => ItemKind::Repeat {
                expression: required_expression(&token)?,
            },
            BlockKind::Switch => ItemKind::Switch {
                expression: required_expression(&token)?,
                scope_to_value: token.has_option(options::SCOPE),
            },
            BlockKind::Case | BlockKind::Default => {
                if self.top().kind != Some(BlockKind::Switch) {
                    return Err(BuildError::MisplacedTag {
                        keyword: kind.to_string(),
                        message: "only allowed directly inside a switch".to_string(),
                        location: token.range.start,
                    });
                }
                if kind == BlockKind::Case {
                    ItemKind::Case {
                        expression: required_expression(&token)?,
                    }
                } else {
                    ItemKind::Default
                }
            }
            BlockKind::Scope | BlockKind::InvertedScope => {
                let expression = required_expression(&token)?;
                ItemKind::Scope(ScopeItem {
                    expression,
                    inverted: kind == BlockKind::InvertedScope,
                    alias: alias(token.text_option(options::ALIAS), self),
                })
            }
            BlockKind::Isolate => ItemKind::Isolate {
                expression: token.expression.clone(),
            },
            BlockKind::Declare => ItemKind::PartialDeclare {
                name: token.literal.clone().ok_or(BuildError::MisplacedTag {
                    keyword: "declare".to_string(),
                    message: "partial declaration without a name".to_string(),
                    location: token.range.start,
                })?,
            },
            BlockKind::Custom(tag) => ItemKind::Custom(CustomItem {
                tag: tag.clone(),
                expression: token.expression.clone(),
                block: true,
            }),
        };

        let id = self.add_leaf(item, &token);
        let mut frame = Frame::new(Some(kind), id, token.range.start);
        frame.scope = scope;
        frame.declared = declared;
        self.frames.push(frame);
        Ok(())
    }

    fn close_block(&mut self, kind: &BlockKind, token: &Token) -> Result<()> {
        let top = self.top();
        match &top.kind {
            Some(open) if open == kind => {}
            Some(open) => {
                return Err(BuildError::MismatchedClose {
                    expected: open.to_string(),
                    found: kind.to_string(),
                    location: token.range.start,
                })
            }
            None => {
                return Err(BuildError::MisplacedTag {
                    keyword: format!("/{kind}"),
                    message: "no block is open".to_string(),
                    location: token.range.start,
                })
            }
        }
        self.end_bindings();
        self.frames.pop();
        Ok(())
    }

    fn open_branch(&mut self, kind: ItemKind, keyword: &str, token: &Token) -> Result<()> {
        let top = self.top();
        if !matches!(top.kind, Some(BlockKind::If | BlockKind::IfNot)) {
            return Err(BuildError::MisplacedTag {
                keyword: keyword.to_string(),
                message: "only allowed inside an if block".to_string(),
                location: token.range.start,
            });
        }
        if top.saw_else {
            return Err(BuildError::MisplacedTag {
                keyword: keyword.to_string(),
                message: "cannot follow else".to_string(),
                location: token.range.start,
            });
        }

        self.end_bindings();
        let is_else = matches!(kind, ItemKind::Else);
        let block = self.top().block;
        let mut item = DocumentItem::new(kind, token.range);
        item.tag_options = persistent_options(token);
        let branch = self.document.push(block, item);

        let frame = self.top_mut();
        frame.container = branch;
        frame.saw_else = is_else;
        Ok(())
    }

    /// Append removal items for every binding declared in the top frame's current container.
    fn end_bindings(&mut self) {
        let frame = self.top_mut();
        let Some(scope) = frame.scope else {
            return;
        };
        let container = frame.container;
        let location = frame.location;
        let names = std::mem::take(&mut frame.declared);
        for name in names {
            let range = crate::location::SourceRange::at(location);
            self.document.push(
                container,
                DocumentItem::new(ItemKind::RemoveAlias { name, scope }, range),
            );
        }
    }

    fn declare_local(&mut self, name: &str) -> ScopeId {
        let scope = match self.top().scope {
            Some(scope) => scope,
            None => {
                let scope = self.allocate_scope();
                self.top_mut().scope = Some(scope);
                scope
            }
        };
        let frame = self.top_mut();
        if !frame.declared.iter().any(|declared| declared == name) {
            frame.declared.push(name.to_string());
        }
        scope
    }

    fn allocate_scope(&mut self) -> ScopeId {
        let scope = ScopeId(self.next_scope);
        self.next_scope += 1;
        scope
    }

    fn add_content(&mut self, token: Token) -> Result<()> {
        let mut content = ContentItem::new(token.literal.unwrap_or_default());
        content.edits = std::mem::take(&mut self.pending_edits);
        let container = self.top().container;
        let id = self
            .document
            .push(container, DocumentItem::new(ItemKind::Content(content), token.range));
        self.last_content = Some(id);
        Ok(())
    }

    fn apply_text_operation(&mut self, operation: TextOperation, token: &Token) {
        match operation {
            TextOperation::TrimTrailingWhitespace => self.edit_previous(operation),
            TextOperation::AppendLineBreak => {
                if self.last_content.is_none() {
                    let container = self.top().container;
                    let item = DocumentItem::new(
                        ItemKind::Content(ContentItem::default()),
                        token.range,
                    );
                    self.last_content = Some(self.document.push(container, item));
                }
                self.edit_previous(operation);
            }
            _ => self.pending_edits.push(operation),
        }
    }

    fn edit_previous(&mut self, operation: TextOperation) {
        if let Some(id) = self.last_content {
            if let ItemKind::Content(content) = &mut self.document.item_mut(id).kind {
                content.edits.push(operation);
            }
        }
    }

    fn add_leaf(&mut self, kind: ItemKind, token: &Token) -> ItemId {
        let mut item = DocumentItem::new(kind, token.range);
        item.tag_options = persistent_options(token);
        let container = self.top().container;
        self.document.push(container, item)
    }

    fn finish(mut self) -> Result<Document> {
        if self.frames.len() > 1 {
            let frame = self.top();
            return Err(BuildError::UnterminatedBlock {
                keyword: frame
                    .kind
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                location: frame.location,
            });
        }
        self.end_bindings();
        Ok(self.document)
    }

    fn top(&self) -> &Frame {
        // The root frame is never popped: close_block rejects a close with only the root open.
        &self.frames[self.frames.len() - 1]
    }

    fn top_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }
}

fn required_expression(token: &Token) -> Result<Expression> {
    token
        .expression
        .clone()
        .ok_or(BuildError::MissingExpression {
            location: token.range.start,
        })
}

fn persistent_options(token: &Token) -> Vec<crate::token::TokenOption> {
    token
        .options
        .iter()
        .filter(|option| option.persistent)
        .cloned()
        .collect()
}
