//! Filter and sort expression language
//!
//! Filters use an OData-style syntax:
//!
//! ```text
//! status eq 'shipped' and (total gt 100 or contains(customerName, 'ada'))
//! ```
//!
//! Expressions are tokenized, parsed into a [`FilterNode`] tree and compiled
//! into Elasticsearch query DSL clauses. Errors carry the byte offset of the
//! offending token.

mod compile;
mod lexer;
mod parser;
mod sort;

pub use compile::compile;
pub use lexer::{tokenize, ComparisonOp, Token, TokenKind};
pub use parser::{parse_filter, FilterNode, Literal};
pub use sort::{parse_sort, sort_to_json, SortField, SortOrder};

use crate::error::SearchResult;

/// Parse and compile a filter expression in one step
///
/// Blank input yields `Ok(None)`.
pub fn compile_filter(input: &str) -> SearchResult<Option<serde_json::Value>> {
    Ok(parse_filter(input)?.as_ref().map(compile))
}
