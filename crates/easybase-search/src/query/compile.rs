//! Compile filter expressions into the Elasticsearch query DSL

use serde_json::{json, Value};

use super::lexer::ComparisonOp;
use super::parser::{FilterNode, Literal};

/// Translate a parsed filter into a query DSL clause
pub fn compile(node: &FilterNode) -> Value {
    match node {
        FilterNode::And(operands) => json!({
            "bool": { "must": operands.iter().map(compile).collect::<Vec<_>>() }
        }),
        FilterNode::Or(operands) => json!({
            "bool": {
                "should": operands.iter().map(compile).collect::<Vec<_>>(),
                "minimum_should_match": 1
            }
        }),
        FilterNode::Not(inner) => json!({
            "bool": { "must_not": [compile(inner)] }
        }),
        FilterNode::Contains { field, value } => json!({
            "wildcard": { field: format!("*{}*", escape_wildcard(value)) }
        }),
        FilterNode::Comparison { field, op, value } => comparison(field, *op, value),
    }
}

fn comparison(field: &str, op: ComparisonOp, value: &Literal) -> Value {
    match (op, value) {
        (ComparisonOp::Eq, Literal::Null) => json!({
            "bool": { "must_not": [{ "exists": { "field": field } }] }
        }),
        (ComparisonOp::Eq, v) => json!({ "term": { field: v.to_json() } }),
        (ComparisonOp::Ne, Literal::Null) => json!({ "exists": { "field": field } }),
        (ComparisonOp::Ne, v) => json!({
            "bool": { "must_not": [{ "term": { field: v.to_json() } }] }
        }),
        (ComparisonOp::StartsWith, v) => json!({ "prefix": { field: v.as_text() } }),
        (range, v) => {
            let bound = match range {
                ComparisonOp::Gt => "gt",
                ComparisonOp::Ge => "gte",
                ComparisonOp::Lt => "lt",
                _ => "lte",
            };
            json!({ "range": { field: { bound: v.to_json() } } })
        }
    }
}

/// Escape wildcard metacharacters so user text matches literally
fn escape_wildcard(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
