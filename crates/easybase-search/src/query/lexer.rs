//! Tokenizer for filter expressions

use crate::error::{SearchError, SearchResult};

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    /// `eq`
    Eq,
    /// `ne`
    Ne,
    /// `gt`
    Gt,
    /// `ge`
    Ge,
    /// `lt`
    Lt,
    /// `le`
    Le,
    /// `startsWith`
    StartsWith,
}

impl ComparisonOp {
    /// Whether the operator is an ordering comparison (`gt`, `ge`, `lt`, `le`)
    pub fn is_range(self) -> bool {
        matches!(self, Self::Gt | Self::Ge | Self::Lt | Self::Le)
    }

    /// Keyword as written in expressions
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::StartsWith => "startsWith",
        }
    }
}

/// Token kinds
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `,`
    Comma,
    /// `and`
    And,
    /// `or`
    Or,
    /// `not`
    Not,
    /// Comparison operator keyword
    Comparison(ComparisonOp),
    /// `contains` function name
    Contains,
    /// Field name (`[a-zA-Z_][a-zA-Z0-9_.]*`)
    Identifier(String),
    /// Single-quoted string, quotes stripped
    String(String),
    /// Numeric literal as written (`-?\d+(\.\d+)?`)
    Number(String),
    /// `true` / `false`
    Boolean(bool),
    /// `null`
    Null,
}

/// Token with its byte offset in the source expression
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Token kind
    pub kind: TokenKind,
    /// Byte offset of the first character
    pub position: usize,
}

impl Token {
    fn new(kind: TokenKind, position: usize) -> Self {
        Self { kind, position }
    }
}

/// Split a filter expression into tokens
///
/// Keywords are case-insensitive; identifiers keep their case.
pub fn tokenize(input: &str) -> SearchResult<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let start = pos;
        match c {
            b'(' => {
                tokens.push(Token::new(TokenKind::LParen, start));
                pos += 1;
            }
            b')' => {
                tokens.push(Token::new(TokenKind::RParen, start));
                pos += 1;
            }
            b',' => {
                tokens.push(Token::new(TokenKind::Comma, start));
                pos += 1;
            }
            b'\'' => {
                let close = input[start + 1..]
                    .find('\'')
                    .ok_or_else(|| SearchError::query("unterminated string literal", start))?;
                let end = start + 1 + close;
                tokens.push(Token::new(
                    TokenKind::String(input[start + 1..end].to_string()),
                    start,
                ));
                pos = end + 1;
            }
            b'-' | b'0'..=b'9' => {
                pos = scan_number(bytes, start)?;
                tokens.push(Token::new(
                    TokenKind::Number(input[start..pos].to_string()),
                    start,
                ));
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                pos += 1;
                while pos < bytes.len()
                    && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_' || bytes[pos] == b'.')
                {
                    pos += 1;
                }
                let word = &input[start..pos];
                tokens.push(Token::new(keyword(word), start));
            }
            _ => {
                let ch = input[start..].chars().next().unwrap_or('?');
                return Err(SearchError::query(
                    format!("unexpected character '{}'", ch),
                    start,
                ));
            }
        }
    }

    Ok(tokens)
}

fn scan_number(bytes: &[u8], start: usize) -> SearchResult<usize> {
    let mut pos = start;
    if bytes[pos] == b'-' {
        pos += 1;
    }
    let digits_start = pos;
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    if pos == digits_start {
        return Err(SearchError::query("expected digits after '-'", start));
    }
    if pos + 1 < bytes.len() && bytes[pos] == b'.' && bytes[pos + 1].is_ascii_digit() {
        pos += 1;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    Ok(pos)
}

fn keyword(word: &str) -> TokenKind {
    match word.to_ascii_lowercase().as_str() {
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "eq" => TokenKind::Comparison(ComparisonOp::Eq),
        "ne" => TokenKind::Comparison(ComparisonOp::Ne),
        "gt" => TokenKind::Comparison(ComparisonOp::Gt),
        "ge" => TokenKind::Comparison(ComparisonOp::Ge),
        "lt" => TokenKind::Comparison(ComparisonOp::Lt),
        "le" => TokenKind::Comparison(ComparisonOp::Le),
        "startswith" => TokenKind::Comparison(ComparisonOp::StartsWith),
        "contains" => TokenKind::Contains,
        "true" => TokenKind::Boolean(true),
        "false" => TokenKind::Boolean(false),
        "null" => TokenKind::Null,
        _ => TokenKind::Identifier(word.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_tokenize_comparison() {
        assert_eq!(
            kinds("status eq 'shipped'"),
            vec![
                TokenKind::Identifier("status".into()),
                TokenKind::Comparison(ComparisonOp::Eq),
                TokenKind::String("shipped".into()),
            ]
        );
    }

    #[test]
    fn test_keywords_case_insensitive() {
        assert_eq!(
            kinds("NOT a Eq TRUE AND b startsWith 'x' Or c ne NULL"),
            vec![
                TokenKind::Not,
                TokenKind::Identifier("a".into()),
                TokenKind::Comparison(ComparisonOp::Eq),
                TokenKind::Boolean(true),
                TokenKind::And,
                TokenKind::Identifier("b".into()),
                TokenKind::Comparison(ComparisonOp::StartsWith),
                TokenKind::String("x".into()),
                TokenKind::Or,
                TokenKind::Identifier("c".into()),
                TokenKind::Comparison(ComparisonOp::Ne),
                TokenKind::Null,
            ]
        );
    }

    #[test]
    fn test_numbers_and_dotted_identifiers() {
        assert_eq!(
            kinds("address.zip ge -10.5"),
            vec![
                TokenKind::Identifier("address.zip".into()),
                TokenKind::Comparison(ComparisonOp::Ge),
                TokenKind::Number("-10.5".into()),
            ]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("contains(name, 'ab')").unwrap();
        let positions: Vec<usize> = tokens.iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![0, 8, 9, 13, 15, 19]);
    }

    #[test]
    fn test_errors_report_position() {
        match tokenize("total gt 5 & x") {
            Err(SearchError::Query { position, .. }) => assert_eq!(position, 11),
            other => panic!("unexpected: {other:?}"),
        }
        match tokenize("name eq 'open") {
            Err(SearchError::Query { position, .. }) => assert_eq!(position, 8),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
