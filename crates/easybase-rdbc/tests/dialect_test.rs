//! Unit tests for easybase-rdbc dialect module

use easybase_rdbc::connection::DatabaseType;
use easybase_rdbc::dialect::{
    detect_dialect, DdlTemplates, GenericDialect, HsqlDialect, PostgresDialect, SqlDialect,
};

#[test]
fn test_postgres_quote_identifier() {
    let dialect = PostgresDialect;

    assert_eq!(dialect.quote_identifier("orders"), "\"orders\"");
    assert_eq!(dialect.quote_identifier("customerName"), "\"customerName\"");
    assert_eq!(dialect.quote_identifier("my\"table"), "\"my\"\"table\"");
}

#[test]
fn test_generic_quote_identifier() {
    let dialect = GenericDialect;

    assert_eq!(dialect.quote_identifier("orders"), "`orders`");
    assert_eq!(dialect.quote_identifier("my`table"), "`my``table`");
}

#[test]
fn test_placeholders() {
    assert_eq!(PostgresDialect.placeholder(1), "$1");
    assert_eq!(PostgresDialect.placeholder(10), "$10");
    assert_eq!(HsqlDialect.placeholder(3), "?");
    assert_eq!(GenericDialect.placeholder(3), "?");
}

#[test]
fn test_postgres_insert_sql() {
    let sql = PostgresDialect.insert_sql("orders", &["id", "customerName", "total"]);

    assert!(sql.starts_with("INSERT INTO \"orders\""));
    assert!(sql.contains("(\"id\", \"customerName\", \"total\")"));
    assert!(sql.contains("VALUES ($1, $2, $3)"));
}

#[test]
fn test_hsql_insert_uses_positional_params() {
    let sql = HsqlDialect.insert_sql("orders", &["id", "total"]);
    assert!(sql.contains("VALUES (?, ?)"));
}

#[test]
fn test_select_sql() {
    let by_id = PostgresDialect.select_sql("orders", &[], Some("id"));
    assert!(by_id.starts_with("SELECT * FROM \"orders\""));
    assert!(by_id.contains("WHERE \"id\" = $1"));

    let all = PostgresDialect.select_sql("orders", &["id"], None);
    assert!(all.starts_with("SELECT \"id\" FROM \"orders\""));
    assert!(!all.contains("WHERE"));
}

#[test]
fn test_delete_sql() {
    let sql = PostgresDialect.delete_sql("orders", "id");
    assert!(sql.starts_with("DELETE FROM \"orders\""));
    assert!(sql.contains("WHERE \"id\" = $1"));

    let sql = GenericDialect.delete_sql("orders", "id");
    assert!(sql.contains("`id` = ?"));
}

#[test]
fn test_update_without_touch_column() {
    let sql = HsqlDialect.update_sql("orders", &["status"], "id", None);
    assert!(sql.contains("\"status\" = ?"));
    assert!(!sql.contains("CURRENT_TIMESTAMP"));
    assert!(sql.ends_with("WHERE \"id\" = ?"));
}

#[test]
fn test_count_sql_alias() {
    let sql = PostgresDialect.count_sql("orders");
    assert!(sql.contains("COUNT(*)"));
    assert!(sql.contains("row_count"));
}

#[test]
fn test_table_exists_sql() {
    let pg = PostgresDialect.table_exists_sql("Orders");
    assert!(pg.contains("information_schema.tables"));
    assert!(pg.contains("current_schema()"));
    assert!(pg.contains("= 'orders'"));
    assert!(pg.contains("table_count"));

    let hsql = HsqlDialect.table_exists_sql("o'rders");
    assert!(hsql.contains("'o''rders'"));
    assert!(!hsql.contains("current_schema"));
}

#[test]
fn test_create_table_sql_quotes_columns() {
    let columns = vec![
        ("id", "VARCHAR(255) NOT NULL".to_string()),
        ("customerName", "VARCHAR(255)".to_string()),
        ("created_date", "TIMESTAMP DEFAULT CURRENT_TIMESTAMP".to_string()),
    ];
    let sql = PostgresDialect.create_table_sql("orders", &columns, &["id"]);

    assert_eq!(
        sql,
        "CREATE TABLE \"orders\" (\"id\" VARCHAR(255) NOT NULL, \"customerName\" VARCHAR(255), \"created_date\" TIMESTAMP DEFAULT CURRENT_TIMESTAMP, PRIMARY KEY (\"id\"))"
    );
}

#[test]
fn test_create_table_without_primary_key() {
    let columns = vec![("note", "VARCHAR(255)".to_string())];
    let sql = GenericDialect.create_table_sql("notes", &columns, &[]);
    assert_eq!(sql, "CREATE TABLE `notes` (`note` VARCHAR(255))");
}

#[test]
fn test_drop_table_sql() {
    assert_eq!(
        PostgresDialect.drop_table_sql("orders"),
        "DROP TABLE IF EXISTS \"orders\""
    );
}

#[test]
fn test_detect_dialect_database_types() {
    assert_eq!(
        detect_dialect("PostgreSQL 16.2 on x86_64-pc-linux-gnu").database_type(),
        DatabaseType::PostgreSQL
    );
    assert_eq!(
        detect_dialect("HSQL Database Engine").database_type(),
        DatabaseType::Hsql
    );
    assert_eq!(
        detect_dialect("Microsoft SQL Server").database_type(),
        DatabaseType::Other
    );
}

#[test]
fn test_templates_for_database() {
    assert_eq!(
        DdlTemplates::for_database(DatabaseType::PostgreSQL).uuid_column,
        "UUID"
    );
    assert_eq!(
        DdlTemplates::for_database(DatabaseType::Hsql).text_column,
        "VARCHAR(4000)"
    );
    assert_eq!(
        DdlTemplates::for_database(DatabaseType::Other).auto_increment,
        "BIGINT AUTO_INCREMENT"
    );
    assert_eq!(DdlTemplates::POSTGRESQL.get("nope"), None);
}

#[test]
fn test_templates_apply_metadata_ddl() {
    let ddl = "CREATE TABLE IF NOT EXISTS eb_field_metadata (id ${auto_increment} PRIMARY KEY, search_mapping ${text_column})";
    assert_eq!(
        DdlTemplates::HSQLDB.apply(ddl),
        "CREATE TABLE IF NOT EXISTS eb_field_metadata (id BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY, search_mapping VARCHAR(4000))"
    );
}

#[test]
fn test_limit_offset_sql() {
    assert_eq!(PostgresDialect.limit_offset_sql(20, 40), " LIMIT 20 OFFSET 40");
    assert_eq!(HsqlDialect.limit_offset_sql(5, 0), " LIMIT 5 OFFSET 0");
}
