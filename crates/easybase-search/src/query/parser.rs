//! Recursive-descent parser for filter expressions
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! expr       := term ( "or" term )*
//! term       := factor ( "and" factor )*
//! factor     := "not" factor | "(" expr ")" | comparison
//! comparison := "contains" "(" IDENT "," STRING ")"
//!             | IDENT OP literal
//! literal    := STRING | NUMBER | BOOLEAN | NULL
//! ```

use super::lexer::{tokenize, ComparisonOp, Token, TokenKind};
use crate::error::{SearchError, SearchResult};

/// Literal operand of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// Integer number
    Integer(i64),
    /// Decimal number
    Decimal(f64),
    /// Quoted string
    String(String),
}

impl Literal {
    /// JSON form used in the query DSL
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Integer(n) => serde_json::Value::from(*n),
            Self::Decimal(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Text form (`prefix` and `wildcard` queries take strings)
    pub fn as_text(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Integer(n) => n.to_string(),
            Self::Decimal(n) => n.to_string(),
            Self::String(s) => s.clone(),
        }
    }
}

/// Parsed filter expression
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    /// All operands must match
    And(Vec<FilterNode>),
    /// At least one operand must match
    Or(Vec<FilterNode>),
    /// Operand must not match
    Not(Box<FilterNode>),
    /// `field op literal`
    Comparison {
        /// Field name
        field: String,
        /// Operator
        op: ComparisonOp,
        /// Right-hand side
        value: Literal,
    },
    /// `contains(field, 'text')`
    Contains {
        /// Field name
        field: String,
        /// Substring to look for
        value: String,
    },
}

/// Parse a filter expression
///
/// Blank input yields `Ok(None)`.
pub fn parse_filter(input: &str) -> SearchResult<Option<FilterNode>> {
    if input.trim().is_empty() {
        return Ok(None);
    }
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens: &tokens,
        index: 0,
        end: input.len(),
    };
    let node = parser.expression()?;
    if let Some(token) = parser.peek() {
        return Err(SearchError::query(
            "unexpected token after expression",
            token.position,
        ));
    }
    Ok(Some(node))
}

struct Parser<'a> {
    tokens: &'a [Token],
    index: usize,
    /// Reported position for errors at end of input
    end: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.index)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.index);
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn position(&self) -> usize {
        self.peek().map(|t| t.position).unwrap_or(self.end)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().is_some_and(|t| &t.kind == kind) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> SearchResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(SearchError::query(format!("expected {what}"), self.position()))
        }
    }

    fn expression(&mut self) -> SearchResult<FilterNode> {
        let mut operands = vec![self.term()?];
        while self.eat(&TokenKind::Or) {
            operands.push(self.term()?);
        }
        Ok(collapse(operands, FilterNode::Or))
    }

    fn term(&mut self) -> SearchResult<FilterNode> {
        let mut operands = vec![self.factor()?];
        while self.eat(&TokenKind::And) {
            operands.push(self.factor()?);
        }
        Ok(collapse(operands, FilterNode::And))
    }

    fn factor(&mut self) -> SearchResult<FilterNode> {
        if self.eat(&TokenKind::Not) {
            return Ok(FilterNode::Not(Box::new(self.factor()?)));
        }
        if self.eat(&TokenKind::LParen) {
            let inner = self.expression()?;
            self.expect(&TokenKind::RParen, "')'")?;
            return Ok(inner);
        }
        self.comparison()
    }

    fn comparison(&mut self) -> SearchResult<FilterNode> {
        if self.eat(&TokenKind::Contains) {
            self.expect(&TokenKind::LParen, "'(' after contains")?;
            let field = self.identifier()?;
            self.expect(&TokenKind::Comma, "','")?;
            let value = match self.next() {
                Some(Token {
                    kind: TokenKind::String(s),
                    ..
                }) => s.clone(),
                _ => {
                    return Err(SearchError::query(
                        "contains expects a string argument",
                        self.tokens
                            .get(self.index.saturating_sub(1))
                            .map(|t| t.position)
                            .unwrap_or(self.end),
                    ))
                }
            };
            self.expect(&TokenKind::RParen, "')' after contains arguments")?;
            return Ok(FilterNode::Contains { field, value });
        }

        let field = self.identifier()?;
        let op = match self.peek() {
            Some(Token {
                kind: TokenKind::Comparison(op),
                ..
            }) => {
                self.index += 1;
                *op
            }
            _ => {
                return Err(SearchError::query(
                    "expected comparison operator",
                    self.position(),
                ))
            }
        };

        let value_position = self.position();
        let value = self.literal()?;
        if value == Literal::Null && (op.is_range() || op == ComparisonOp::StartsWith) {
            return Err(SearchError::query(
                format!("'{}' cannot compare with null", op.symbol()),
                value_position,
            ));
        }
        Ok(FilterNode::Comparison { field, op, value })
    }

    fn identifier(&mut self) -> SearchResult<String> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Identifier(name),
                ..
            }) => {
                self.index += 1;
                Ok(name.clone())
            }
            _ => Err(SearchError::query("expected field name", self.position())),
        }
    }

    fn literal(&mut self) -> SearchResult<Literal> {
        let position = self.position();
        let token = self
            .next()
            .ok_or_else(|| SearchError::query("expected value", position))?;
        match &token.kind {
            TokenKind::String(s) => Ok(Literal::String(s.clone())),
            TokenKind::Boolean(b) => Ok(Literal::Bool(*b)),
            TokenKind::Null => Ok(Literal::Null),
            TokenKind::Number(raw) if raw.contains('.') => raw
                .parse()
                .map(Literal::Decimal)
                .map_err(|_| SearchError::query("invalid number", position)),
            TokenKind::Number(raw) => raw
                .parse()
                .map(Literal::Integer)
                .map_err(|_| SearchError::query("integer out of range", position)),
            _ => Err(SearchError::query("expected value", position)),
        }
    }
}

fn collapse(mut operands: Vec<FilterNode>, combine: fn(Vec<FilterNode>) -> FilterNode) -> FilterNode {
    if operands.len() == 1 {
        operands.remove(0)
    } else {
        combine(operands)
    }
}
