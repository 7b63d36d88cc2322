//! Tests for DataSourceManager against a scripted in-process database

use easybase_rdbc::prelude::*;
use easybase_rdbc::testing::ScriptedDatabase;
use std::sync::Arc;

async fn manager(db: &Arc<ScriptedDatabase>) -> DataSourceManager {
    DataSourceManager::connect(db.factory(), PoolConfig::new("scripted://easybase"))
        .await
        .unwrap()
}

// ==================== Detection Tests ====================

#[tokio::test]
async fn test_detects_postgres_dialect() {
    let db = ScriptedDatabase::new("PostgreSQL 16.2 on x86_64-pc-linux-gnu");
    let manager = manager(&db).await;

    assert_eq!(manager.dialect().name(), "PostgreSQL");
    assert_eq!(manager.templates(), &DdlTemplates::POSTGRESQL);
    assert!(manager.product_name().starts_with("PostgreSQL"));
}

#[tokio::test]
async fn test_unknown_product_falls_back_to_generic() {
    let db = ScriptedDatabase::new("SQLite");
    let manager = manager(&db).await;

    assert_eq!(manager.dialect().name(), "Generic");
    assert_eq!(manager.templates(), &DdlTemplates::DEFAULT);
}

// ==================== DDL Tests ====================

#[tokio::test]
async fn test_execute_ddl_applies_templates() {
    let db = ScriptedDatabase::new("HSQL Database Engine 2.7.2");
    let manager = manager(&db).await;

    manager
        .execute_ddl("CREATE TABLE IF NOT EXISTS audit (id ${auto_increment} PRIMARY KEY, body ${text_column})")
        .await
        .unwrap();

    let statements = db.statements();
    let ddl = &statements.last().unwrap().sql;
    assert!(ddl.contains("BIGINT GENERATED BY DEFAULT AS IDENTITY"));
    assert!(ddl.contains("VARCHAR(4000)"));
    assert!(!ddl.contains("${"));
    assert!(db.has_table("audit"));
}

// ==================== Table Cache Tests ====================

#[tokio::test]
async fn test_table_exists_is_memoised() {
    let db = ScriptedDatabase::new("PostgreSQL 16").with_tables(&["orders"]);
    let manager = manager(&db).await;

    assert!(manager.table_exists("orders").await.unwrap());
    assert!(manager.table_exists("ORDERS").await.unwrap());
    assert!(!manager.table_exists("customers").await.unwrap());
    assert!(!manager.table_exists("customers").await.unwrap());

    assert_eq!(db.lookups(), 2);
    assert_eq!(manager.cached_tables(), 2);
}

#[tokio::test]
async fn test_create_and_drop_invalidate_cache() {
    let db = ScriptedDatabase::new("PostgreSQL 16");
    let manager = manager(&db).await;

    assert!(!manager.table_exists("orders").await.unwrap());

    let ddl = manager.dialect().create_table_sql(
        "orders",
        &[("id", "VARCHAR(255) NOT NULL".to_string())],
        &["id"],
    );
    manager.create_table("orders", &ddl).await.unwrap();
    assert!(manager.table_exists("orders").await.unwrap());

    manager.drop_table("orders").await.unwrap();
    assert!(!manager.table_exists("orders").await.unwrap());

    assert_eq!(db.lookups(), 3);
}

#[tokio::test]
async fn test_table_exists_rejects_bad_identifier() {
    let db = ScriptedDatabase::new("PostgreSQL 16");
    let manager = manager(&db).await;

    let err = manager
        .table_exists("orders; DROP TABLE users")
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvalidInput);
    assert_eq!(db.lookups(), 0);
}

#[tokio::test]
async fn test_clear_table_cache() {
    let db = ScriptedDatabase::new("PostgreSQL 16").with_tables(&["orders"]);
    let manager = manager(&db).await;

    manager.table_exists("orders").await.unwrap();
    manager.clear_table_cache();
    assert_eq!(manager.cached_tables(), 0);

    manager.table_exists("orders").await.unwrap();
    assert_eq!(db.lookups(), 2);
}

// ==================== Transaction Tests ====================

#[tokio::test]
async fn test_statements_outside_transaction_use_another_connection() {
    let db = ScriptedDatabase::new("PostgreSQL 16");
    let manager = manager(&db).await;

    let tx = manager.begin().await.unwrap();
    tx.execute("INSERT INTO eb_collection_metadata (name) VALUES ($1)", &[Value::from("orders")])
        .await
        .unwrap();

    manager
        .execute("INSERT INTO \"books\" (\"id\") VALUES ($1)", &[Value::from("b1")])
        .await
        .unwrap();

    db.fail_next("INSERT INTO eb_field_metadata");
    assert!(tx
        .execute("INSERT INTO eb_field_metadata (name) VALUES ($1)", &[Value::from("id")])
        .await
        .is_err());
    tx.rollback().await.unwrap();

    let metadata = &db.matching("eb_collection_metadata")[0];
    let book = &db.matching("\"books\"")[0];
    let rollback = &db.matching("ROLLBACK")[0];
    assert!(metadata.in_transaction);
    assert!(!book.in_transaction);
    assert_ne!(book.connection, rollback.connection);
    assert_eq!(metadata.connection, rollback.connection);
}

#[tokio::test]
async fn test_committed_transaction_returns_connection() {
    let db = ScriptedDatabase::new("PostgreSQL 16");
    let manager = manager(&db).await;

    let tx = manager.begin().await.unwrap();
    tx.commit().await.unwrap();
    manager.execute("DELETE FROM \"books\"", &[]).await.unwrap();

    assert_eq!(db.connections_opened(), 1);
    let stats = manager.pool_stats();
    assert_eq!(stats.open, 1);
    assert_eq!(stats.idle, 1);
}
