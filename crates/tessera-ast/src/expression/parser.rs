use super::{
    Argument, CallExpression, Expression, Literal, Operator, OperatorExpression, PathExpression,
    PathSegment,
};
use crate::location::Location;
use thiserror::Error;

/// A malformed expression inside a tag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at {location}")]
pub struct ExpressionError {
    pub message: String,
    pub location: Location,
}

/// An expression plus the number of bytes of the input it consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedExpression {
    pub expression: Expression,
    pub consumed: usize,
}

/// Parse the longest expression at the start of `source`.
///
/// Parsing stops at the first character that cannot continue the expression; the caller decides
/// whether the remainder (tag options such as `as name`) is acceptable. `base` is the location of
/// the first byte of `source` and is used for diagnostics.
pub fn parse_expression(source: &str, base: Location) -> Result<ParsedExpression> {
    let mut parser = ExpressionParser {
        source,
        pos: 0,
        base,
    };
    parser.skip_whitespace();
    let expression = parser.parse_or()?;
    // Operator lookahead skips whitespace; it is not part of the expression.
    let consumed = source[..parser.pos].trim_end().len();
    Ok(ParsedExpression {
        expression,
        consumed,
    })
}

struct ExpressionParser<'s> {
    source: &'s str,
    pos: usize,
    base: Location,
}

type Result<T> = std::result::Result<T, ExpressionError>;

impl<'s> ExpressionParser<'s> {
    fn parse_or(&mut self) -> Result<Expression> {
        let mut left = self.parse_and()?;
        loop {
            self.skip_whitespace();
            let location = self.location();
            if !self.eat("||") {
                return Ok(left);
            }
            let right = self.parse_and()?;
            left = binary(Operator::Or, left, right, location);
        }
    }

    fn parse_and(&mut self) -> Result<Expression> {
        let mut left = self.parse_equality()?;
        loop {
            self.skip_whitespace();
            let location = self.location();
            if !self.eat("&&") {
                return Ok(left);
            }
            let right = self.parse_equality()?;
            left = binary(Operator::And, left, right, location);
        }
    }

    fn parse_equality(&mut self) -> Result<Expression> {
        let mut left = self.parse_comparison()?;
        loop {
            self.skip_whitespace();
            let location = self.location();
            let operator = if self.eat("==") {
                Operator::Equals
            } else if self.eat("!=") {
                Operator::NotEquals
            } else {
                return Ok(left);
            };
            let right = self.parse_comparison()?;
            left = binary(operator, left, right, location);
        }
    }

    fn parse_comparison(&mut self) -> Result<Expression> {
        let mut left = self.parse_additive()?;
        loop {
            self.skip_whitespace();
            let location = self.location();
            let operator = if self.eat("<=") {
                Operator::LessOrEqual
            } else if self.eat(">=") {
                Operator::GreaterOrEqual
            } else if self.eat("<") {
                Operator::Less
            } else if self.eat(">") {
                Operator::Greater
            } else {
                return Ok(left);
            };
            let right = self.parse_additive()?;
            left = binary(operator, left, right, location);
        }
    }

    fn parse_additive(&mut self) -> Result<Expression> {
        let mut left = self.parse_multiplicative()?;
        loop {
            self.skip_whitespace();
            let location = self.location();
            let operator = match self.peek() {
                Some('+') => Operator::Add,
                Some('-') => Operator::Subtract,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_multiplicative()?;
            left = binary(operator, left, right, location);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expression> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_whitespace();
            let location = self.location();
            let operator = match self.peek() {
                Some('*') => Operator::Multiply,
                Some('/') => Operator::Divide,
                Some('%') => Operator::Modulo,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_unary()?;
            left = binary(operator, left, right, location);
        }
    }

    fn parse_unary(&mut self) -> Result<Expression> {
        self.skip_whitespace();
        let location = self.location();
        match self.peek() {
            Some('!') if self.peek_nth(1) != Some('=') => {
                self.bump();
                let operand = self.parse_unary()?;
                Ok(unary(Operator::Not, operand, location))
            }
            Some('-') => {
                self.bump();
                let operand = self.parse_unary()?;
                Ok(match operand {
                    Expression::Literal(Literal::Integer(n)) => {
                        Expression::Literal(Literal::Integer(-n))
                    }
                    Expression::Literal(Literal::Float(n)) => Expression::Literal(Literal::Float(-n)),
                    other => unary(Operator::Negate, other, location),
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expression> {
        let mut expression = self.parse_primary()?;
        loop {
            match self.peek() {
                Some('.') if self.peek_nth(1).is_some_and(is_ident_start) => {
                    self.bump();
                    let location = self.location();
                    let name = self.read_identifier();
                    if self.peek() == Some('(') {
                        let arguments = self.parse_arguments()?;
                        expression = Expression::Call(CallExpression {
                            name,
                            target: Some(Box::new(expression)),
                            arguments,
                            location,
                        });
                    } else {
                        expression = append_segment(expression, PathSegment::Member(name));
                    }
                }
                Some('[') => {
                    self.bump();
                    let index = self.parse_or()?;
                    self.skip_whitespace();
                    self.expect(']')?;
                    expression = append_segment(expression, PathSegment::Index(Box::new(index)));
                }
                _ => return Ok(expression),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expression> {
        self.skip_whitespace();
        let location = self.location();
        match self.peek() {
            Some('(') => {
                self.bump();
                let inner = self.parse_or()?;
                self.skip_whitespace();
                self.expect(')')?;
                Ok(inner)
            }
            Some(quote @ ('\'' | '"')) => {
                self.bump();
                let text = self.read_string(quote, location)?;
                Ok(Expression::Literal(Literal::String(text)))
            }
            Some(c) if c.is_ascii_digit() => self.parse_number(location),
            Some('.') => {
                let mut segments = Vec::new();
                if self.starts_with("..") {
                    while self.eat("..") {
                        segments.push(PathSegment::Parent);
                        self.eat("/");
                    }
                } else {
                    self.bump();
                    segments.push(PathSegment::Current);
                }
                if self.peek().is_some_and(is_ident_start) {
                    segments.push(PathSegment::Member(self.read_identifier()));
                }
                Ok(path(segments, location))
            }
            Some('~') => {
                self.bump();
                let mut segments = vec![PathSegment::Root];
                if self.peek().is_some_and(is_ident_start) {
                    segments.push(PathSegment::Member(self.read_identifier()));
                }
                Ok(path(segments, location))
            }
            Some('$') => {
                self.bump();
                if !self.peek().is_some_and(is_ident_start) {
                    return self.error("Expected variable name after '$'");
                }
                let name = self.read_identifier();
                Ok(path(vec![PathSegment::Variable(name)], location))
            }
            Some(c) if is_ident_start(c) => {
                let name = self.read_identifier();
                match name.as_str() {
                    "true" => return Ok(Expression::Literal(Literal::Bool(true))),
                    "false" => return Ok(Expression::Literal(Literal::Bool(false))),
                    "null" => return Ok(Expression::Literal(Literal::Null)),
                    "this" => return Ok(path(vec![PathSegment::Current], location)),
                    _ => {}
                }
                if self.peek() == Some('(') {
                    let arguments = self.parse_arguments()?;
                    return Ok(Expression::Call(CallExpression {
                        name,
                        target: None,
                        arguments,
                        location,
                    }));
                }
                Ok(path(vec![PathSegment::Member(name)], location))
            }
            Some(c) => self.error(&format!("Unexpected character '{c}' in expression")),
            None => self.error("Expected expression"),
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Argument>> {
        self.expect('(')?;
        let mut arguments = Vec::new();
        self.skip_whitespace();
        if self.eat(")") {
            return Ok(arguments);
        }
        loop {
            self.skip_whitespace();
            let name = self.try_argument_name();
            let value = self.parse_or()?;
            arguments.push(Argument { name, value });
            self.skip_whitespace();
            if self.eat(",") {
                continue;
            }
            if self.eat(")") {
                return Ok(arguments);
            }
            return self.error("Expected ',' or ')' in argument list");
        }
    }

    fn try_argument_name(&mut self) -> Option<String> {
        if !self.peek().is_some_and(is_ident_start) {
            return None;
        }
        let saved = self.pos;
        let name = self.read_identifier();
        self.skip_whitespace();
        if self.peek() == Some(':') {
            self.bump();
            return Some(name);
        }
        self.pos = saved;
        None
    }

    fn parse_number(&mut self, location: Location) -> Result<Expression> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        let is_float =
            self.peek() == Some('.') && self.peek_nth(1).is_some_and(|c| c.is_ascii_digit());
        if is_float {
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        let text = &self.source[start..self.pos];
        let literal = if is_float {
            text.parse::<f64>().map(Literal::Float).ok()
        } else {
            text.parse::<i64>().map(Literal::Integer).ok()
        };
        match literal {
            Some(literal) => Ok(Expression::Literal(literal)),
            None => Err(ExpressionError {
                message: format!("Invalid number literal '{text}'"),
                location,
            }),
        }
    }

    fn read_string(&mut self, quote: char, start: Location) -> Result<String> {
        let mut text = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(text),
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some(other) => text.push(other),
                    None => break,
                },
                Some(c) => text.push(c),
                None => break,
            }
        }
        Err(ExpressionError {
            message: "Unterminated string literal".to_string(),
            location: start,
        })
    }

    fn read_identifier(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_continue) {
            self.bump();
        }
        self.source[start..self.pos].to_string()
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        if self.peek() == Some(expected) {
            self.bump();
            Ok(())
        } else {
            self.error(&format!("Expected '{expected}'"))
        }
    }

    fn error<T>(&self, message: &str) -> Result<T> {
        Err(ExpressionError {
            message: message.to_string(),
            location: self.location(),
        })
    }

    fn location(&self) -> Location {
        self.base.advance_over(&self.source[..self.pos])
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn starts_with(&self, s: &str) -> bool {
        self.source[self.pos..].starts_with(s)
    }

    fn eat(&mut self, s: &str) -> bool {
        if self.starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }
}

pub(crate) fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

pub(crate) fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn path(segments: Vec<PathSegment>, location: Location) -> Expression {
    Expression::Path(PathExpression {
        target: None,
        segments,
        location,
    })
}

fn append_segment(expression: Expression, segment: PathSegment) -> Expression {
    match expression {
        Expression::Path(mut p) => {
            p.segments.push(segment);
            Expression::Path(p)
        }
        other => {
            let location = other.location();
            Expression::Path(PathExpression {
                target: Some(Box::new(other)),
                segments: vec![segment],
                location,
            })
        }
    }
}

fn binary(operator: Operator, left: Expression, right: Expression, location: Location) -> Expression {
    Expression::Operator(OperatorExpression {
        operator,
        left: Box::new(left),
        right: Some(Box::new(right)),
        location,
    })
}

fn unary(operator: Operator, operand: Expression, location: Location) -> Expression {
    Expression::Operator(OperatorExpression {
        operator,
        left: Box::new(operand),
        right: None,
        location,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Expression {
        parse_expression(source, Location::start()).unwrap().expression
    }

    fn segments(expression: &Expression) -> &[PathSegment] {
        match expression {
            Expression::Path(p) => &p.segments,
            other => panic!("Expected path, got {other:?}"),
        }
    }

    #[test]
    fn test_simple_path() {
        let expression = parse("user.profile.name");
        assert_eq!(
            segments(&expression),
            &[
                PathSegment::Member("user".to_string()),
                PathSegment::Member("profile".to_string()),
                PathSegment::Member("name".to_string()),
            ]
        );
    }

    #[test]
    fn test_current_parent_and_root() {
        assert_eq!(segments(&parse(".")), &[PathSegment::Current]);
        assert_eq!(segments(&parse("this")), &[PathSegment::Current]);
        assert_eq!(
            segments(&parse("../../name")),
            &[
                PathSegment::Parent,
                PathSegment::Parent,
                PathSegment::Member("name".to_string())
            ]
        );
        assert_eq!(
            segments(&parse("~.config.title")),
            &[
                PathSegment::Root,
                PathSegment::Member("config".to_string()),
                PathSegment::Member("title".to_string())
            ]
        );
    }

    #[test]
    fn test_special_variable() {
        assert_eq!(
            segments(&parse("$index")),
            &[PathSegment::Variable("index".to_string())]
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse("42"), Expression::Literal(Literal::Integer(42)));
        assert_eq!(parse("-3"), Expression::Literal(Literal::Integer(-3)));
        assert_eq!(parse("1.5"), Expression::Literal(Literal::Float(1.5)));
        assert_eq!(parse("'it\\'s'"), Expression::Literal(Literal::String("it's".into())));
        assert_eq!(parse("\"x\""), Expression::Literal(Literal::String("x".into())));
        assert_eq!(parse("true"), Expression::Literal(Literal::Bool(true)));
        assert_eq!(parse("null"), Expression::Literal(Literal::Null));
    }

    #[test]
    fn test_method_call_on_path() {
        let Expression::Call(call) = parse("Value.Add(5)") else {
            panic!("Expected call");
        };
        assert_eq!(call.name, "Add");
        assert_eq!(call.arguments.len(), 1);
        assert_eq!(
            call.arguments[0].value,
            Expression::Literal(Literal::Integer(5))
        );
        let target = call.target.expect("target");
        assert_eq!(segments(&target), &[PathSegment::Member("Value".to_string())]);
    }

    #[test]
    fn test_chained_calls_and_members() {
        let expression = parse("name.ToUpper().Length");
        let Expression::Path(p) = expression else {
            panic!("Expected path");
        };
        assert_eq!(p.segments, vec![PathSegment::Member("Length".to_string())]);
        assert!(matches!(p.target.as_deref(), Some(Expression::Call(c)) if c.name == "ToUpper"));
    }

    #[test]
    fn test_named_arguments() {
        let Expression::Call(call) = parse("Join(items, separator: ' | ')") else {
            panic!("Expected call");
        };
        assert!(call.target.is_none());
        assert_eq!(call.arguments[0].name, None);
        assert_eq!(call.arguments[1].name.as_deref(), Some("separator"));
    }

    #[test]
    fn test_operator_precedence() {
        let expression = parse("a + b * 2 == 10 && !done");
        assert_eq!(expression.to_string(), "(((a + (b * 2)) == 10) && !done)");
    }

    #[test]
    fn test_index_segment() {
        let expression = parse("items[0].name");
        assert_eq!(expression.to_string(), "items[0].name");
    }

    #[test]
    fn test_stops_before_options() {
        let parsed = parse_expression("items as item", Location::start()).unwrap();
        assert_eq!(parsed.consumed, "items".len());
    }

    #[test]
    fn test_consumed_excludes_trailing_whitespace() {
        let parsed = parse_expression("  a + b   #scope", Location::start()).unwrap();
        assert_eq!(parsed.consumed, "  a + b".len());
    }

    #[test]
    fn test_unterminated_string() {
        let err = parse_expression("'abc", Location::start()).unwrap_err();
        assert!(err.message.contains("Unterminated"));
    }

    #[test]
    fn test_error_location_is_relative_to_base() {
        let err = parse_expression("a + ", Location::new(3, 10, 40)).unwrap_err();
        assert_eq!(err.location.line, 3);
        assert_eq!(err.location.column, 14);
    }
}
