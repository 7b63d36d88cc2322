//! Integration tests for SqlRecordStore against a scripted database

use std::sync::Arc;

use easybase_core::prelude::*;
use easybase_rdbc::manager::DataSourceManager;
use easybase_rdbc::pool::PoolConfig;
use easybase_rdbc::testing::ScriptedDatabase;
use easybase_rdbc::types::Row;
use easybase_rdbc::ErrorCategory;

async fn setup() -> (SqlRecordStore, Arc<ScriptedDatabase>) {
    let db = ScriptedDatabase::new("PostgreSQL 16.2");
    let manager = DataSourceManager::connect(db.factory(), PoolConfig::new("scripted://easybase"))
        .await
        .unwrap();
    (SqlRecordStore::new(Arc::new(manager)), db)
}

fn row(columns: &[&str], values: Vec<Value>) -> Row {
    Row::new(columns.iter().map(|c| c.to_string()).collect(), values)
}

fn books() -> CollectionDefinition {
    CollectionDefinition::new(
        "Books",
        vec![
            FieldDefinition::new("title", FieldType::String).not_null(),
            FieldDefinition::new("author", FieldType::String)
                .with_search_mapping(SearchMapping::text().with_analyzer("english")),
        ],
    )
}

// ==================== Bootstrap Tests ====================

#[tokio::test]
async fn test_bootstrap_creates_metadata_tables() {
    let (store, db) = setup().await;
    store.bootstrap().await.unwrap();

    assert!(db.has_table("eb_collection_metadata"));
    assert!(db.has_table("eb_field_metadata"));
    let ddl = &db.matching("CREATE TABLE IF NOT EXISTS eb_field_metadata")[0].sql;
    assert!(ddl.contains("id BIGSERIAL PRIMARY KEY"));
    assert!(!ddl.contains("${"));
}

// ==================== Record Tests ====================

#[tokio::test]
async fn test_insert_binds_every_field() {
    let (store, db) = setup().await;
    let record = Record::new().with(ID_FIELD, "b1").with("title", "Dune");

    store.insert(&books(), &record).await.unwrap();

    let insert = &db.matching("INSERT INTO \"books\"")[0];
    assert!(insert.sql.contains("$2"));
    assert_eq!(insert.params, vec![Value::from("b1"), Value::from("Dune")]);
    assert!(!insert.in_transaction);
}

#[tokio::test]
async fn test_update_keys_by_id_and_reports_affected_rows() {
    let (store, db) = setup().await;
    let record = Record::new().with(ID_FIELD, "b1").with("title", "Dune Messiah");

    assert_eq!(store.update(&books(), "b1", &record).await.unwrap(), 1);

    db.affect("UPDATE \"books\"", 0);
    assert_eq!(store.update(&books(), "missing", &record).await.unwrap(), 0);

    let updates = db.matching("UPDATE \"books\"");
    assert!(updates[0].sql.contains("modified_date"));
    assert_eq!(
        updates[0].params,
        vec![Value::from("Dune Messiah"), Value::from("b1")]
    );
    assert_eq!(updates[1].params.last(), Some(&Value::from("missing")));
}

#[tokio::test]
async fn test_fetch_maps_columns_to_declared_names() {
    let (store, db) = setup().await;
    let carts = CollectionDefinition::new(
        "carts",
        vec![FieldDefinition::new("itemCount", FieldType::Integer)],
    );
    db.respond(
        "FROM \"carts\"",
        vec![row(
            &["id", "itemcount"],
            vec![Value::from("c1"), Value::Int64(5)],
        )],
    );

    let record = store.fetch(&carts, "c1").await.unwrap().unwrap();
    assert_eq!(record.get("itemCount"), Some(&Value::Int32(5)));
    assert_eq!(record.get("itemcount"), None);
    assert_eq!(record.id().as_deref(), Some("c1"));

    let select = &db.matching("FROM \"carts\"")[0];
    assert_eq!(select.params, vec![Value::from("c1")]);
}

#[tokio::test]
async fn test_fetch_missing_record() {
    let (store, _db) = setup().await;
    assert!(store.fetch(&books(), "nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_reports_affected_rows() {
    let (store, db) = setup().await;

    assert_eq!(store.delete(&books(), "b1").await.unwrap(), 1);
    db.affect("DELETE FROM \"books\"", 0);
    assert_eq!(store.delete(&books(), "b1").await.unwrap(), 0);

    let delete = &db.matching("DELETE FROM \"books\"")[0];
    assert_eq!(delete.params, vec![Value::from("b1")]);
}

#[tokio::test]
async fn test_count_reads_row_count() {
    let (store, db) = setup().await;
    db.respond("COUNT(*)", vec![row(&["row_count"], vec![Value::Int64(3)])]);

    assert_eq!(store.count(&books()).await.unwrap(), 3);
}

#[tokio::test]
async fn test_count_without_rows_is_an_error() {
    let (store, _db) = setup().await;

    let err = store.count(&books()).await.unwrap_err();
    match err {
        Error::Storage(e) => {
            assert_eq!(e.category(), ErrorCategory::Statement);
            assert!(e.sql().is_some_and(|sql| sql.contains("COUNT(*)")));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_ids_reads_first_column() {
    let (store, db) = setup().await;
    db.respond(
        "FROM \"books\"",
        vec![
            row(&["id"], vec![Value::from("b1")]),
            row(&["id"], vec![Value::from("b2")]),
        ],
    );

    assert_eq!(store.ids(&books()).await.unwrap(), vec!["b1", "b2"]);
}

// ==================== Metadata Tests ====================

#[tokio::test]
async fn test_save_definition_commits_one_transaction() {
    let (store, db) = setup().await;
    store.save_definition(&books()).await.unwrap();

    let statements = db.statements();
    let sql: Vec<&str> = statements.iter().map(|s| s.sql.as_str()).collect();
    assert_eq!(sql.first(), Some(&"BEGIN"));
    assert_eq!(sql.last(), Some(&"COMMIT"));
    assert!(statements.iter().all(|s| s.in_transaction));
    assert!(statements.iter().all(|s| s.connection == statements[0].connection));

    let fields = db.matching("INSERT INTO eb_field_metadata");
    assert_eq!(fields.len(), 3);
    let author = &fields[2].params;
    assert_eq!(author[0], Value::from("books"));
    assert_eq!(author[1], Value::from("author"));
    assert_eq!(author[2], Value::from("string"));
    assert!(author[5]
        .as_str()
        .is_some_and(|json| json.contains("\"analyzer\":\"english\"")));
    assert_eq!(fields[0].params[5], Value::Null);
}

#[tokio::test]
async fn test_save_definition_rolls_back_on_failure() {
    let (store, db) = setup().await;
    db.fail_next("INSERT INTO eb_field_metadata");

    let err = store.save_definition(&books()).await.unwrap_err();
    assert!(err.is_duplicate_key());

    assert_eq!(db.matching("ROLLBACK").len(), 1);
    assert!(db.matching("COMMIT").is_empty());
    assert_eq!(db.matching("INSERT INTO eb_collection_metadata").len(), 1);
    assert_eq!(db.matching("INSERT INTO eb_field_metadata").len(), 1);

    let stats = store.manager().pool_stats();
    assert_eq!(stats.open, 1);
    assert_eq!(stats.idle, 1);
}

#[tokio::test]
async fn test_load_definitions_restores_search_mappings() {
    let (store, db) = setup().await;
    db.respond(
        "FROM eb_collection_metadata",
        vec![row(&["name", "table_name"], vec![Value::from("Books"), Value::from("books")])],
    );
    let columns = ["name", "type", "is_primary_key", "is_nullable", "search_mapping"];
    db.respond(
        "FROM eb_field_metadata",
        vec![
            row(
                &columns,
                vec![
                    Value::from("id"),
                    Value::from("uuid"),
                    Value::Bool(true),
                    Value::Bool(false),
                    Value::Null,
                ],
            ),
            row(
                &columns,
                vec![
                    Value::from("author"),
                    Value::from("string"),
                    Value::Bool(false),
                    Value::Bool(true),
                    Value::from(r#"{"type":"text","analyzer":"english"}"#),
                ],
            ),
            row(
                &columns,
                vec![
                    Value::from("pages"),
                    Value::from("integer"),
                    Value::Bool(false),
                    Value::Bool(true),
                    Value::from("{not json"),
                ],
            ),
        ],
    );

    let definitions = store.load_definitions().await.unwrap();
    assert_eq!(definitions.len(), 1);
    let books = &definitions[0];
    assert_eq!(books.name, "Books");
    assert_eq!(books.table_name, "books");
    assert_eq!(books.index_name, "books");
    assert_eq!(books.field_names(), vec!["id", "author", "pages"]);

    let id = books.field(ID_FIELD).unwrap();
    assert!(id.primary_key);
    assert!(!id.nullable);
    assert_eq!(id.field_type, FieldType::Uuid);

    let author = books.field("author").unwrap();
    assert_eq!(
        author.search_mapping,
        Some(SearchMapping::text().with_analyzer("english"))
    );
    assert!(books.field("pages").unwrap().search_mapping.is_none());

    let lookup = &db.matching("FROM eb_field_metadata")[0];
    assert_eq!(lookup.params, vec![Value::from("books")]);
}
