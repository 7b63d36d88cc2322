//! SQL injection guards for easybase-rdbc.
//!
//! Collection and field names end up interpolated into DDL and DML, so
//! every identifier is validated before it reaches a statement builder.

use crate::error::Error;

/// Maximum identifier length accepted (matches the metadata `VARCHAR(255)` columns)
pub const MAX_IDENTIFIER_LEN: usize = 255;

/// Validate a SQL identifier (table and column names).
///
/// - Must not be empty
/// - At most 255 characters
/// - Must start with an ASCII letter or underscore
/// - May only contain ASCII alphanumerics and underscores
///
/// # Examples
///
/// ```
/// use easybase_rdbc::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("orders").is_ok());
/// assert!(validate_sql_identifier("line_item_2").is_ok());
///
/// assert!(validate_sql_identifier("x; DROP TABLE orders--").is_err());
/// assert!(validate_sql_identifier("").is_err());
/// assert!(validate_sql_identifier("9lives").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidIdentifier("identifier cannot be empty".into()));
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::InvalidIdentifier(format!(
            "SQL identifier too long: {} chars (max {})",
            name.len(),
            MAX_IDENTIFIER_LEN
        )));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::InvalidIdentifier(format!(
                "Invalid SQL identifier '{}': must start with a letter or underscore",
                name
            )));
        }
    }

    if let Some(c) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(Error::InvalidIdentifier(format!(
            "Invalid SQL identifier '{}': contains invalid character '{}'",
            name, c
        )));
    }

    Ok(())
}

/// Escape a string value for a single-quoted SQL literal.
///
/// Only used for catalog lookups (`information_schema`) where the statement
/// is built as a complete string; everything else is parameterised.
///
/// ```
/// use easybase_rdbc::security::escape_string_literal;
///
/// assert_eq!(escape_string_literal("orders"), "orders");
/// assert_eq!(escape_string_literal("don't"), "don''t");
/// ```
pub fn escape_string_literal(value: &str) -> String {
    if !value.contains('\'') {
        return value.to_string();
    }
    value.replace('\'', "''")
}
