//! SQL dialect abstraction for easybase-rdbc
//!
//! - SqlDialect: vendor-specific identifier quoting, placeholders and
//!   statement generation (sea-query backed)
//! - DdlTemplates: `${uuid_column}`-style substitutions used by the
//!   metadata DDL so one script works across engines
//! - detect_dialect: pick a dialect from the connection's product name

use crate::connection::DatabaseType;
use crate::security::escape_string_literal;
use sea_query::{
    Alias, Asterisk, DeleteStatement, Expr, InsertStatement, MysqlQueryBuilder,
    PostgresQueryBuilder, Query, SelectStatement, UpdateStatement,
};

/// Column-type substitutions for portable DDL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DdlTemplates {
    /// Column type for UUID values
    pub uuid_column: &'static str,
    /// Column type for timestamps
    pub timestamp_column: &'static str,
    /// Column type for unbounded text
    pub text_column: &'static str,
    /// Auto-incrementing key column definition
    pub auto_increment: &'static str,
}

impl DdlTemplates {
    /// PostgreSQL templates
    pub const POSTGRESQL: Self = Self {
        uuid_column: "UUID",
        timestamp_column: "TIMESTAMP WITH TIME ZONE",
        text_column: "TEXT",
        auto_increment: "BIGSERIAL",
    };

    /// HSQLDB templates
    pub const HSQLDB: Self = Self {
        uuid_column: "VARCHAR(36)",
        timestamp_column: "TIMESTAMP",
        text_column: "VARCHAR(4000)",
        auto_increment: "BIGINT GENERATED BY DEFAULT AS IDENTITY",
    };

    /// Fallback templates for any other engine
    pub const DEFAULT: Self = Self {
        uuid_column: "VARCHAR(36)",
        timestamp_column: "TIMESTAMP",
        text_column: "VARCHAR(4000)",
        auto_increment: "BIGINT AUTO_INCREMENT",
    };

    /// Templates for a database type
    pub const fn for_database(db: DatabaseType) -> Self {
        match db {
            DatabaseType::PostgreSQL => Self::POSTGRESQL,
            DatabaseType::Hsql => Self::HSQLDB,
            DatabaseType::Other => Self::DEFAULT,
        }
    }

    /// Look up a template by key
    pub fn get(&self, key: &str) -> Option<&'static str> {
        match key {
            "uuid_column" => Some(self.uuid_column),
            "timestamp_column" => Some(self.timestamp_column),
            "text_column" => Some(self.text_column),
            "auto_increment" => Some(self.auto_increment),
            _ => None,
        }
    }

    /// Substitute every `${key}` placeholder in `sql`
    ///
    /// Unknown placeholders are left untouched.
    pub fn apply(&self, sql: &str) -> String {
        [
            "uuid_column",
            "timestamp_column",
            "text_column",
            "auto_increment",
        ]
        .iter()
        .fold(sql.to_string(), |acc, key| match self.get(key) {
            Some(value) => acc.replace(&format!("${{{}}}", key), value),
            None => acc,
        })
    }
}

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Database type this dialect targets
    fn database_type(&self) -> DatabaseType;

    /// Quote an identifier (table, column name)
    fn quote_identifier(&self, name: &str) -> String;

    /// Get the placeholder for a 1-based parameter index (`$1` or `?`)
    fn placeholder(&self, index: usize) -> String;

    /// DDL templates for this engine
    fn templates(&self) -> DdlTemplates {
        DdlTemplates::for_database(self.database_type())
    }

    /// Query returning a single `table_count` column for a table name
    fn table_exists_sql(&self, table: &str) -> String;

    /// `CREATE TABLE` from `(column, definition)` pairs and primary key columns
    fn create_table_sql(
        &self,
        table: &str,
        columns: &[(&str, String)],
        primary_key: &[&str],
    ) -> String {
        let mut defs: Vec<String> = columns
            .iter()
            .map(|(name, def)| format!("{} {}", self.quote_identifier(name), def))
            .collect();
        if !primary_key.is_empty() {
            let pk: Vec<String> = primary_key
                .iter()
                .map(|c| self.quote_identifier(c))
                .collect();
            defs.push(format!("PRIMARY KEY ({})", pk.join(", ")));
        }
        format!(
            "CREATE TABLE {} ({})",
            self.quote_identifier(table),
            defs.join(", ")
        )
    }

    /// `DROP TABLE IF EXISTS`
    fn drop_table_sql(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote_identifier(table))
    }

    /// Parameterised INSERT of `columns`
    fn insert_sql(&self, table: &str, columns: &[&str]) -> String;

    /// Parameterised UPDATE of `columns` keyed by `key_column`
    ///
    /// Parameters are the column values in order, then the key. When
    /// `touch_column` is set it is assigned the current timestamp.
    fn update_sql(
        &self,
        table: &str,
        columns: &[&str],
        key_column: &str,
        touch_column: Option<&str>,
    ) -> String;

    /// Parameterised DELETE keyed by `key_column`
    fn delete_sql(&self, table: &str, key_column: &str) -> String;

    /// SELECT of `columns` (all when empty), optionally keyed by `key_column`
    fn select_sql(&self, table: &str, columns: &[&str], key_column: Option<&str>) -> String;

    /// `SELECT COUNT(*) AS row_count`
    fn count_sql(&self, table: &str) -> String;

    /// `LIMIT`/`OFFSET` suffix for paged selects
    fn limit_offset_sql(&self, limit: u64, offset: u64) -> String {
        format!(" LIMIT {} OFFSET {}", limit, offset)
    }

    /// Get current timestamp expression
    fn current_timestamp(&self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }
}

// ---------------------------------------------------------------------------
// sea-query statement builders shared by all dialects
// ---------------------------------------------------------------------------

fn insert_stmt(table: &str, columns: &[&str], ph: impl Fn(usize) -> String) -> InsertStatement {
    let values: Vec<_> = (1..=columns.len()).map(|i| Expr::cust(ph(i))).collect();
    let mut stmt = Query::insert();
    stmt.into_table(Alias::new(table))
        .columns(columns.iter().map(|c| Alias::new(*c)))
        .values_panic(values);
    stmt
}

fn update_stmt(
    table: &str,
    columns: &[&str],
    key_column: &str,
    touch_column: Option<&str>,
    ph: impl Fn(usize) -> String,
) -> UpdateStatement {
    let mut stmt = Query::update();
    stmt.table(Alias::new(table));
    for (i, col) in columns.iter().enumerate() {
        stmt.value(Alias::new(*col), Expr::cust(ph(i + 1)));
    }
    if let Some(touch) = touch_column {
        stmt.value(Alias::new(touch), Expr::cust("CURRENT_TIMESTAMP"));
    }
    stmt.and_where(Expr::col(Alias::new(key_column)).eq(Expr::cust(ph(columns.len() + 1))));
    stmt
}

fn delete_stmt(table: &str, key_column: &str, ph: impl Fn(usize) -> String) -> DeleteStatement {
    let mut stmt = Query::delete();
    stmt.from_table(Alias::new(table))
        .and_where(Expr::col(Alias::new(key_column)).eq(Expr::cust(ph(1))));
    stmt
}

fn select_stmt(
    table: &str,
    columns: &[&str],
    key_column: Option<&str>,
    ph: impl Fn(usize) -> String,
) -> SelectStatement {
    let mut stmt = Query::select();
    if columns.is_empty() {
        stmt.column(Asterisk);
    } else {
        stmt.columns(columns.iter().map(|c| Alias::new(*c)));
    }
    stmt.from(Alias::new(table));
    if let Some(key) = key_column {
        stmt.and_where(Expr::col(Alias::new(key)).eq(Expr::cust(ph(1))));
    }
    stmt
}

fn count_stmt(table: &str) -> SelectStatement {
    let mut stmt = Query::select();
    stmt.expr_as(Expr::cust("COUNT(*)"), Alias::new("row_count"))
        .from(Alias::new(table));
    stmt
}

fn information_schema_lookup(table: &str, schema_filter: &str) -> String {
    format!(
        "SELECT COUNT(*) AS table_count FROM information_schema.tables WHERE {}LOWER(table_name) = '{}'",
        schema_filter,
        escape_string_literal(&table.to_lowercase())
    )
}

// ===========================================================================
// PostgreSQL
// ===========================================================================

/// PostgreSQL dialect
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn table_exists_sql(&self, table: &str) -> String {
        information_schema_lookup(table, "table_schema = current_schema() AND ")
    }

    fn insert_sql(&self, table: &str, columns: &[&str]) -> String {
        insert_stmt(table, columns, |i| self.placeholder(i)).to_string(PostgresQueryBuilder)
    }

    fn update_sql(
        &self,
        table: &str,
        columns: &[&str],
        key_column: &str,
        touch_column: Option<&str>,
    ) -> String {
        update_stmt(table, columns, key_column, touch_column, |i| {
            self.placeholder(i)
        })
        .to_string(PostgresQueryBuilder)
    }

    fn delete_sql(&self, table: &str, key_column: &str) -> String {
        delete_stmt(table, key_column, |i| self.placeholder(i)).to_string(PostgresQueryBuilder)
    }

    fn select_sql(&self, table: &str, columns: &[&str], key_column: Option<&str>) -> String {
        select_stmt(table, columns, key_column, |i| self.placeholder(i))
            .to_string(PostgresQueryBuilder)
    }

    fn count_sql(&self, table: &str) -> String {
        count_stmt(table).to_string(PostgresQueryBuilder)
    }
}

// ===========================================================================
// HSQLDB: ANSI quoting, positional `?` parameters
// ===========================================================================

/// HSQLDB dialect
#[derive(Debug, Clone, Default)]
pub struct HsqlDialect;

impl SqlDialect for HsqlDialect {
    fn name(&self) -> &'static str {
        "HSQLDB"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Hsql
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn table_exists_sql(&self, table: &str) -> String {
        information_schema_lookup(table, "")
    }

    fn insert_sql(&self, table: &str, columns: &[&str]) -> String {
        insert_stmt(table, columns, |i| self.placeholder(i)).to_string(PostgresQueryBuilder)
    }

    fn update_sql(
        &self,
        table: &str,
        columns: &[&str],
        key_column: &str,
        touch_column: Option<&str>,
    ) -> String {
        update_stmt(table, columns, key_column, touch_column, |i| {
            self.placeholder(i)
        })
        .to_string(PostgresQueryBuilder)
    }

    fn delete_sql(&self, table: &str, key_column: &str) -> String {
        delete_stmt(table, key_column, |i| self.placeholder(i)).to_string(PostgresQueryBuilder)
    }

    fn select_sql(&self, table: &str, columns: &[&str], key_column: Option<&str>) -> String {
        select_stmt(table, columns, key_column, |i| self.placeholder(i))
            .to_string(PostgresQueryBuilder)
    }

    fn count_sql(&self, table: &str) -> String {
        count_stmt(table).to_string(PostgresQueryBuilder)
    }
}

// ===========================================================================
// Generic fallback (MySQL-compatible quoting)
// ===========================================================================

/// Fallback dialect for engines without a dedicated implementation
#[derive(Debug, Clone, Default)]
pub struct GenericDialect;

impl SqlDialect for GenericDialect {
    fn name(&self) -> &'static str {
        "Generic"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Other
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn table_exists_sql(&self, table: &str) -> String {
        information_schema_lookup(table, "")
    }

    fn insert_sql(&self, table: &str, columns: &[&str]) -> String {
        insert_stmt(table, columns, |i| self.placeholder(i)).to_string(MysqlQueryBuilder)
    }

    fn update_sql(
        &self,
        table: &str,
        columns: &[&str],
        key_column: &str,
        touch_column: Option<&str>,
    ) -> String {
        update_stmt(table, columns, key_column, touch_column, |i| {
            self.placeholder(i)
        })
        .to_string(MysqlQueryBuilder)
    }

    fn delete_sql(&self, table: &str, key_column: &str) -> String {
        delete_stmt(table, key_column, |i| self.placeholder(i)).to_string(MysqlQueryBuilder)
    }

    fn select_sql(&self, table: &str, columns: &[&str], key_column: Option<&str>) -> String {
        select_stmt(table, columns, key_column, |i| self.placeholder(i))
            .to_string(MysqlQueryBuilder)
    }

    fn count_sql(&self, table: &str) -> String {
        count_stmt(table).to_string(MysqlQueryBuilder)
    }
}

/// Get a dialect for a configured database name
pub fn dialect_for(db_type: &str) -> Box<dyn SqlDialect> {
    match db_type.to_lowercase().as_str() {
        "postgres" | "postgresql" | "pg" => Box::new(PostgresDialect),
        "hsql" | "hsqldb" => Box::new(HsqlDialect),
        _ => Box::new(GenericDialect),
    }
}

/// Pick a dialect from a database product name (as reported by the server)
pub fn detect_dialect(product_name: &str) -> Box<dyn SqlDialect> {
    match DatabaseType::detect(product_name) {
        DatabaseType::PostgreSQL => Box::new(PostgresDialect),
        DatabaseType::Hsql => Box::new(HsqlDialect),
        DatabaseType::Other => Box::new(GenericDialect),
    }
}
