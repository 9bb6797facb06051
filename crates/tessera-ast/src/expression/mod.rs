//! Expression trees parsed from tag contents.
//!
//! An expression is a literal, a path walked against the render context, a formatter call, or an
//! operator applied to sub-expressions. Expressions are immutable once parsed.

mod parser;

pub use parser::{parse_expression, ExpressionError, ParsedExpression};
pub(crate) use parser::{is_ident_continue, is_ident_start};

use crate::location::Location;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Path(PathExpression),
    Call(CallExpression),
    Operator(OperatorExpression),
}

impl Expression {
    pub fn location(&self) -> Location {
        match self {
            Expression::Literal(_) => Location::default(),
            Expression::Path(p) => p.location,
            Expression::Call(c) => c.location,
            Expression::Operator(o) => o.location,
        }
    }

    /// The expression `.`, i.e. the current context value.
    pub fn current(location: Location) -> Self {
        Expression::Path(PathExpression {
            target: None,
            segments: vec![PathSegment::Current],
            location,
        })
    }

    /// Returns the literal text when this expression is a plain string literal or a single
    /// member name, which is how partial names are usually written.
    pub fn as_static_name(&self) -> Option<String> {
        match self {
            Expression::Literal(Literal::String(s)) => Some(s.clone()),
            Expression::Path(PathExpression {
                target: None,
                segments,
                ..
            }) => match segments.as_slice() {
                [PathSegment::Member(name)] => Some(name.clone()),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

/// A sequence of path segments, optionally applied to the result of another expression
/// (`Format('x').Length`, `(a + b).Value`).
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpression {
    pub target: Option<Box<Expression>>,
    pub segments: Vec<PathSegment>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    /// `.` or `this`
    Current,
    /// `..`
    Parent,
    /// `~`
    Root,
    /// `name`
    Member(String),
    /// `$name`
    Variable(String),
    /// `[expr]`
    Index(Box<Expression>),
}

/// Formatter invocation: `target.Name(args)` or `Name(args)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpression {
    pub name: String,
    pub target: Option<Box<Expression>>,
    pub arguments: Vec<Argument>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: Option<String>,
    pub value: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorExpression {
    pub operator: Operator,
    pub left: Box<Expression>,
    /// `None` for unary operators.
    pub right: Option<Box<Expression>>,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equals,
    NotEquals,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    And,
    Or,
    Not,
    Negate,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Subtract | Operator::Negate => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::Modulo => "%",
            Operator::Equals => "==",
            Operator::NotEquals => "!=",
            Operator::Less => "<",
            Operator::LessOrEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Not => "!",
        }
    }

    /// Name used when an operator falls back to formatter dispatch (`op_Add`).
    pub fn name(self) -> &'static str {
        match self {
            Operator::Add => "Add",
            Operator::Subtract => "Subtract",
            Operator::Multiply => "Multiply",
            Operator::Divide => "Divide",
            Operator::Modulo => "Modulo",
            Operator::Equals => "Equals",
            Operator::NotEquals => "NotEquals",
            Operator::Less => "LessThan",
            Operator::LessOrEqual => "LessThanOrEqual",
            Operator::Greater => "GreaterThan",
            Operator::GreaterOrEqual => "GreaterThanOrEqual",
            Operator::And => "And",
            Operator::Or => "Or",
            Operator::Not => "Not",
            Operator::Negate => "Negate",
        }
    }

    pub fn is_unary(self) -> bool {
        matches!(self, Operator::Not | Operator::Negate)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(literal) => write!(f, "{literal}"),
            Expression::Path(path) => write!(f, "{path}"),
            Expression::Call(call) => write!(f, "{call}"),
            Expression::Operator(op) => match &op.right {
                Some(right) => write!(f, "({} {} {})", op.left, op.operator.symbol(), right),
                None => write!(f, "{}{}", op.operator.symbol(), op.left),
            },
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Integer(n) => write!(f, "{n}"),
            Literal::Float(n) => write!(f, "{n:?}"),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
        }
    }
}

impl fmt::Display for PathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        if let Some(target) = &self.target {
            write!(f, "{target}")?;
            first = false;
        }
        for segment in &self.segments {
            match segment {
                PathSegment::Current if first => f.write_str(".")?,
                PathSegment::Current => {}
                PathSegment::Parent => f.write_str("../")?,
                PathSegment::Root => f.write_str("~")?,
                PathSegment::Member(name) | PathSegment::Variable(name) => {
                    if !first {
                        f.write_str(".")?;
                    }
                    if matches!(segment, PathSegment::Variable(_)) {
                        f.write_str("$")?;
                    }
                    f.write_str(name)?;
                }
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
            // Parent and root markers glue directly to the next member.
            first = matches!(segment, PathSegment::Parent | PathSegment::Root);
        }
        Ok(())
    }
}

impl fmt::Display for CallExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(target) = &self.target {
            write!(f, "{target}.")?;
        }
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.arguments.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if let Some(name) = &arg.name {
                write!(f, "{name}: ")?;
            }
            write!(f, "{}", arg.value)?;
        }
        f.write_str(")")
    }
}
