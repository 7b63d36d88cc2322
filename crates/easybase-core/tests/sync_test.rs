//! Integration tests for the easybase-core sync engine
//!
//! The engine is driven tick by tick through `process_batches` /
//! `process_retries` against the in-memory stores; only the orders
//! scenario runs the timer tasks.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use easybase_core::prelude::*;
use easybase_search::memory::MemoryIndex;
use proptest::prelude::*;
use serde_json::json;

struct Fixture {
    service: CollectionService,
    store: Arc<MemoryRecordStore>,
    index: Arc<MemoryIndex>,
}

impl Fixture {
    async fn new(config: SyncConfig) -> Self {
        let store = Arc::new(MemoryRecordStore::new());
        let index = Arc::new(MemoryIndex::new());
        let service = CollectionService::build(store.clone(), index.clone(), config);
        service.initialize().await.unwrap();
        Self {
            service,
            store,
            index,
        }
    }

    async fn with_orders(config: SyncConfig) -> Self {
        let fixture = Self::new(config).await;
        fixture
            .service
            .create_collection("orders", order_fields())
            .await
            .unwrap();
        fixture
    }

    fn engine(&self) -> &Arc<SyncEngine> {
        self.service.engine()
    }

    fn indexed_ids(&self, index: &str) -> BTreeSet<String> {
        (0..64)
            .map(|i| format!("o{i}"))
            .chain(["a1".to_string(), "a2".to_string(), "a3".to_string()])
            .filter(|id| self.index.document(index, id).is_some())
            .collect()
    }
}

fn order_fields() -> Vec<FieldDefinition> {
    vec![
        FieldDefinition::new("id", FieldType::Uuid).primary_key(),
        FieldDefinition::new("total", FieldType::Double),
        FieldDefinition::new("status", FieldType::String),
    ]
}

fn order(id: &str, total: f64, status: &str) -> Record {
    Record::new()
        .with(ID_FIELD, id)
        .with("total", total)
        .with("status", status)
}

fn manual_config() -> SyncConfig {
    SyncConfig {
        consistency_check_enabled: false,
        ..SyncConfig::default()
    }
}

// ==================== Propagation Tests ====================

#[tokio::test]
async fn test_writes_reach_index_after_batch() {
    let fx = Fixture::with_orders(manual_config()).await;
    for i in 0..5 {
        fx.service
            .create_record("orders", order(&format!("o{i}"), 10.0 * i as f64, "NEW"))
            .await
            .unwrap();
    }
    assert_eq!(fx.engine().queue_len(), 5);
    assert!(fx.index.document("orders", "o1").is_none());

    assert_eq!(fx.engine().process_batches().await, 5);
    assert_eq!(fx.engine().queue_len(), 0);
    assert_eq!(fx.indexed_ids("orders").len(), 5);

    let stats = fx.engine().stats();
    assert_eq!(stats.enqueued, 5);
    assert_eq!(stats.applied, 5);
    assert_eq!(stats.batches, 1);
    assert_eq!(fx.engine().in_flight_records(), 0);
}

#[tokio::test]
async fn test_update_and_delete_sequence_is_consistent() {
    let fx = Fixture::with_orders(manual_config()).await;
    for i in 0..4 {
        fx.service
            .create_record("orders", order(&format!("o{i}"), 1.0, "NEW"))
            .await
            .unwrap();
    }
    fx.engine().process_batches().await;

    fx.service
        .update_record("orders", "o1", Record::new().with("status", "PAID"))
        .await
        .unwrap();
    assert!(fx.service.delete_record("orders", "o2").await.unwrap());
    assert!(!fx.service.delete_record("orders", "o2").await.unwrap());
    fx.engine().process_batches().await;

    let doc = fx.index.document("orders", "o1").unwrap();
    assert_eq!(doc["status"], json!("PAID"));
    assert_eq!(doc["total"], json!(1.0));
    assert!(fx.index.document("orders", "o2").is_none());
    assert!(fx.engine().verify_consistency("orders").await);
}

#[tokio::test]
async fn test_batch_size_bounds_each_tick() {
    let config = SyncConfig {
        batch_size: 3,
        ..manual_config()
    };
    let fx = Fixture::with_orders(config).await;
    for i in 0..7 {
        fx.service
            .create_record("orders", order(&format!("o{i}"), 1.0, "NEW"))
            .await
            .unwrap();
    }

    assert_eq!(fx.engine().process_batches().await, 3);
    assert_eq!(fx.engine().queue_len(), 4);
    assert_eq!(fx.engine().drain_queue().await, 4);
    assert_eq!(fx.index.bulk_calls(), 3);
}

#[tokio::test]
async fn test_sync_without_id_is_rejected() {
    let fx = Fixture::with_orders(manual_config()).await;
    let err = fx
        .engine()
        .sync_record("orders", Record::new().with("total", 1.0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let queued = fx
        .engine()
        .sync_batch(
            "orders",
            vec![order("a1", 1.0, "NEW"), Record::new().with("total", 2.0)],
        )
        .await;
    assert_eq!(queued, 1);
    assert_eq!(fx.engine().queue_len(), 1);
}

#[tokio::test]
async fn test_delete_batch() {
    let fx = Fixture::with_orders(manual_config()).await;
    for id in ["a1", "a2", "a3"] {
        fx.index
            .put_document("orders", id, json!({"id": id, "total": 1.0}));
    }

    fx.engine()
        .delete_batch("orders", &["a1".to_string(), "a2".to_string()])
        .await;
    fx.engine().process_batches().await;

    assert_eq!(fx.indexed_ids("orders"), BTreeSet::from(["a3".to_string()]));
}

// ==================== Retry Tests ====================

#[tokio::test]
async fn test_item_failure_retries_exactly_max_then_abandons() {
    let fx = Fixture::with_orders(manual_config()).await;
    fx.index.fail_ids(["a1"]);
    fx.service
        .create_record("orders", order("a1", 42.5, "NEW"))
        .await
        .unwrap();

    fx.engine().process_batches().await;
    assert_eq!(fx.engine().retry_len("orders"), 1);

    for _ in 0..3 {
        assert_eq!(fx.engine().process_retries().await, 1);
    }
    assert_eq!(fx.engine().retry_len("orders"), 0);
    assert_eq!(fx.engine().process_retries().await, 0);

    let stats = fx.engine().stats();
    assert_eq!(stats.retried, 3);
    assert_eq!(stats.abandoned, 1);
    assert_eq!(fx.index.bulk_calls(), 4);
    assert_eq!(fx.engine().in_flight_records(), 0);
    assert!(fx.index.document("orders", "a1").is_none());
}

#[tokio::test]
async fn test_partial_bulk_failure_only_retries_failed_items() {
    let fx = Fixture::with_orders(manual_config()).await;
    fx.index.fail_ids(["a2"]);
    for id in ["a1", "a2", "a3"] {
        fx.service
            .create_record("orders", order(id, 1.0, "NEW"))
            .await
            .unwrap();
    }

    fx.engine().process_batches().await;
    assert!(fx.index.document("orders", "a1").is_some());
    assert!(fx.index.document("orders", "a3").is_some());
    assert_eq!(fx.engine().retry_len("orders"), 1);

    fx.index.clear_failing_ids();
    assert_eq!(fx.engine().process_retries().await, 1);
    assert!(fx.index.document("orders", "a2").is_some());
    assert!(fx.engine().verify_consistency("orders").await);
}

#[tokio::test]
async fn test_transport_failure_moves_batch_to_retry_queue() {
    let fx = Fixture::with_orders(manual_config()).await;
    fx.index.fail_next_bulk(1);
    fx.service
        .create_record("orders", order("a1", 42.5, "NEW"))
        .await
        .unwrap();
    fx.service
        .create_record("orders", order("a2", 7.0, "NEW"))
        .await
        .unwrap();

    fx.engine().process_batches().await;
    assert_eq!(fx.engine().retry_len("orders"), 2);
    assert_eq!(fx.engine().stats().failed_batches, 1);

    fx.engine().process_retries().await;
    assert_eq!(fx.engine().retry_len("orders"), 0);
    assert_eq!(fx.indexed_ids("orders").len(), 2);
}

// ==================== Ordering Tests ====================

#[tokio::test]
async fn test_index_then_delete_in_one_batch_keeps_delete() {
    let fx = Fixture::with_orders(manual_config()).await;
    fx.engine()
        .sync_record("orders", order("a1", 1.0, "NEW"))
        .await
        .unwrap();
    fx.engine().delete_record("orders", "a1").await;

    fx.engine().process_batches().await;

    assert!(fx.index.document("orders", "a1").is_none());
    let stats = fx.engine().stats();
    assert_eq!(stats.superseded, 1);
    assert_eq!(stats.applied, 1);
}

#[tokio::test]
async fn test_stale_retry_does_not_resurrect_deleted_record() {
    let fx = Fixture::with_orders(manual_config()).await;
    fx.index.fail_next_bulk(1);
    fx.engine()
        .sync_record("orders", order("a1", 1.0, "NEW"))
        .await
        .unwrap();
    fx.engine().process_batches().await;
    assert_eq!(fx.engine().retry_len("orders"), 1);

    fx.engine().delete_record("orders", "a1").await;
    fx.engine().process_batches().await;
    fx.engine().process_retries().await;

    assert!(fx.index.document("orders", "a1").is_none());
    assert_eq!(fx.engine().stats().superseded, 1);
    assert_eq!(fx.engine().in_flight_records(), 0);
}

#[tokio::test]
async fn test_last_update_wins() {
    let fx = Fixture::with_orders(manual_config()).await;
    for status in ["NEW", "PAID", "SHIPPED"] {
        fx.engine()
            .sync_record("orders", order("a1", 1.0, status))
            .await
            .unwrap();
    }
    fx.engine().process_batches().await;

    let doc = fx.index.document("orders", "a1").unwrap();
    assert_eq!(doc["status"], json!("SHIPPED"));
    assert_eq!(fx.engine().stats().superseded, 2);
}

// ==================== Collection Deletion Tests ====================

#[tokio::test]
async fn test_deleted_collection_drops_pending_work() {
    let fx = Fixture::with_orders(manual_config()).await;
    fx.index.fail_next_bulk(1);
    fx.service
        .create_record("orders", order("a1", 1.0, "NEW"))
        .await
        .unwrap();
    fx.engine().process_batches().await;
    assert_eq!(fx.engine().retry_len("orders"), 1);

    fx.service
        .create_record("orders", order("a2", 2.0, "NEW"))
        .await
        .unwrap();
    assert!(fx.service.delete_collection("orders").await);
    assert_eq!(fx.engine().retry_len("orders"), 0);
    assert_eq!(fx.engine().in_flight_records(), 0);

    assert_eq!(fx.engine().process_batches().await, 1);
    assert_eq!(fx.engine().process_retries().await, 0);

    let stats = fx.engine().stats();
    assert_eq!(stats.discarded, 2);
    assert_eq!(stats.applied, 0);
    assert_eq!(fx.index.bulk_calls(), 1);
    assert!(fx.index.index_names().is_empty());
}

#[tokio::test]
async fn test_recreated_collection_syncs_normally() {
    let fx = Fixture::with_orders(manual_config()).await;
    fx.service
        .create_record("orders", order("a1", 1.0, "NEW"))
        .await
        .unwrap();
    assert!(fx.service.delete_collection("orders").await);
    fx.engine().drain_queue().await;

    fx.service
        .create_collection("orders", order_fields())
        .await
        .unwrap();
    fx.service
        .create_record("orders", order("a3", 3.0, "NEW"))
        .await
        .unwrap();
    fx.engine().drain_queue().await;

    assert!(fx.index.document("orders", "a3").is_some());
    assert!(fx.index.document("orders", "a1").is_none());
    assert_eq!(fx.engine().stats().discarded, 1);
    assert_eq!(fx.engine().in_flight_records(), 0);
}

// ==================== Queue Overflow Tests ====================

#[tokio::test]
async fn test_full_queue_applies_immediately() {
    let config = SyncConfig {
        queue_capacity: 1,
        ..manual_config()
    };
    let fx = Fixture::with_orders(config).await;

    fx.engine()
        .sync_record("orders", order("a1", 1.0, "NEW"))
        .await
        .unwrap();
    fx.engine()
        .sync_record("orders", order("a2", 2.0, "NEW"))
        .await
        .unwrap();

    assert_eq!(fx.engine().queue_len(), 1);
    assert!(fx.index.document("orders", "a1").is_none());
    assert!(fx.index.document("orders", "a2").is_some());
    assert_eq!(fx.engine().stats().fallback_applied, 1);
    assert_eq!(fx.engine().queue_stats().rejected, 1);
}

#[tokio::test]
async fn test_failed_fallback_goes_to_retry_queue() {
    let config = SyncConfig {
        queue_capacity: 1,
        ..manual_config()
    };
    let fx = Fixture::with_orders(config).await;
    fx.engine()
        .sync_record("orders", order("a1", 1.0, "NEW"))
        .await
        .unwrap();

    fx.index.fail_next_bulk(1);
    fx.engine()
        .sync_record("orders", order("a2", 2.0, "NEW"))
        .await
        .unwrap();
    assert_eq!(fx.engine().retry_len("orders"), 1);

    fx.engine().process_retries().await;
    assert!(fx.index.document("orders", "a2").is_some());
}

// ==================== Outbox Tests ====================

#[tokio::test]
async fn test_discarded_outbox_enqueues_nothing() {
    let fx = Fixture::with_orders(manual_config()).await;
    let mut outbox = fx.engine().outbox();
    outbox.record("orders", order("a1", 1.0, "NEW")).unwrap();
    outbox.delete("orders", "a2");
    assert_eq!(outbox.len(), 2);

    assert_eq!(outbox.discard(), 2);
    assert_eq!(fx.engine().queue_len(), 0);
    assert_eq!(fx.engine().stats().enqueued, 0);

    {
        let mut dropped = fx.engine().outbox();
        dropped.record("orders", order("a3", 1.0, "NEW")).unwrap();
    }
    assert_eq!(fx.engine().queue_len(), 0);
}

#[tokio::test]
async fn test_committed_outbox_enqueues_in_order() {
    let fx = Fixture::with_orders(manual_config()).await;
    let mut outbox = fx.engine().outbox();
    outbox.record("orders", order("a1", 1.0, "NEW")).unwrap();
    outbox.delete("orders", "a1");
    assert!(outbox.record("orders", Record::new()).is_err());

    assert_eq!(outbox.on_committed().await, 2);
    assert_eq!(fx.engine().queue_len(), 2);

    fx.engine().process_batches().await;
    assert!(fx.index.document("orders", "a1").is_none());
}

// ==================== Consistency Tests ====================

#[tokio::test]
async fn test_verify_detects_drift() {
    let fx = Fixture::with_orders(manual_config()).await;
    fx.service
        .create_record("orders", order("a1", 1.0, "NEW"))
        .await
        .unwrap();
    assert!(!fx.engine().verify_consistency("orders").await);

    fx.engine().process_batches().await;
    assert!(fx.engine().verify_consistency("orders").await);

    fx.index.put_document("orders", "ghost", json!({"id": "ghost"}));
    assert!(!fx.engine().verify_consistency("orders").await);
}

#[tokio::test]
async fn test_verify_reports_false_on_failures() {
    let fx = Fixture::with_orders(manual_config()).await;
    assert!(!fx.engine().verify_consistency("missing").await);
    assert_eq!(fx.engine().repair_inconsistencies("missing").await, 0);
    assert_eq!(fx.engine().reindex_collection("missing").await, 0);

    fx.store.set_unavailable(true);
    assert!(!fx.engine().verify_consistency("orders").await);
    assert_eq!(fx.engine().repair_inconsistencies("orders").await, 0);
    fx.store.set_unavailable(false);

    fx.index.set_unavailable(true);
    assert!(!fx.engine().verify_consistency("orders").await);
}

#[tokio::test]
async fn test_reindex_rebuilds_from_rows() {
    let fx = Fixture::with_orders(manual_config()).await;
    for id in ["a1", "a2"] {
        fx.service
            .create_record("orders", order(id, 3.0, "NEW"))
            .await
            .unwrap();
    }
    fx.engine().process_batches().await;
    fx.index.put_document("orders", "ghost", json!({"id": "ghost"}));

    assert_eq!(fx.engine().reindex_collection("orders").await, 2);
    assert!(fx.index.document("orders", "ghost").is_none());
    assert!(fx.index.mapping("orders").is_some());

    fx.engine().process_batches().await;
    assert!(fx.engine().verify_consistency("orders").await);
}

#[tokio::test]
async fn test_scheduled_sweep_repairs_drifted_collections() {
    let fx = Fixture::with_orders(manual_config()).await;
    fx.service
        .create_collection("customers", vec![FieldDefinition::new("name", FieldType::String)])
        .await
        .unwrap();
    assert!(fx.store.put_row("orders", order("a1", 5.0, "NEW")));
    fx.index
        .put_document("customers", "ghost", json!({"id": "ghost"}));

    assert_eq!(fx.engine().check_all_collections().await, 2);
    fx.engine().drain_queue().await;

    assert!(fx.engine().verify_consistency("orders").await);
    assert!(fx.engine().verify_consistency("customers").await);
    assert_eq!(fx.engine().check_all_collections().await, 0);
    assert_eq!(fx.engine().stats().repaired, 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_repair_indexes_missing_and_deletes_orphans(
        rows in prop::collection::btree_set(0u8..16, 0..12),
        docs in prop::collection::btree_set(0u8..16, 0..12),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let fx = Fixture::with_orders(manual_config()).await;
            for i in &rows {
                let id = format!("o{i}");
                assert!(fx.store.put_row("orders", order(&id, f64::from(*i), "NEW")));
            }
            for i in &docs {
                let id = format!("o{i}");
                fx.index.put_document("orders", &id, json!({"id": id}));
            }

            let expected = rows.symmetric_difference(&docs).count();
            assert_eq!(fx.engine().repair_inconsistencies("orders").await, expected);
            fx.engine().drain_queue().await;

            let row_ids: BTreeSet<String> = rows.iter().map(|i| format!("o{i}")).collect();
            assert_eq!(fx.indexed_ids("orders"), row_ids);
            assert!(fx.engine().verify_consistency("orders").await);
        });
    }

    #[test]
    fn prop_random_writes_converge(
        ops in prop::collection::vec((0u8..6, 0u8..3), 1..40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let fx = Fixture::with_orders(manual_config()).await;
            for (n, (key, action)) in ops.iter().enumerate() {
                let id = format!("o{key}");
                let exists = fx.service.get_record("orders", &id).await.unwrap().is_some();
                match (*action, exists) {
                    (0 | 1, false) => {
                        fx.service
                            .create_record("orders", order(&id, n as f64, "NEW"))
                            .await
                            .unwrap();
                    }
                    (0 | 1, true) => {
                        fx.service
                            .update_record("orders", &id, Record::new().with("total", n as f64))
                            .await
                            .unwrap();
                    }
                    _ => {
                        fx.service.delete_record("orders", &id).await.unwrap();
                    }
                }
                if n % 7 == 0 {
                    fx.engine().process_batches().await;
                }
            }
            fx.engine().drain_queue().await;
            assert!(fx.engine().verify_consistency("orders").await);
            assert_eq!(fx.engine().in_flight_records(), 0);
        });
    }
}

// ==================== Scheduler Tests ====================

#[tokio::test]
async fn test_orders_scenario_with_timers() {
    let config = SyncConfig {
        batch_interval_ms: 20,
        retry_interval_ms: 20,
        ..manual_config()
    };
    let fx = Fixture::with_orders(config).await;
    let handle = fx.engine().start();
    assert_eq!(handle.task_count(), 2);

    fx.service
        .create_record("orders", order("a1", 42.5, "NEW"))
        .await
        .unwrap();
    let early = fx
        .service
        .search("orders", None, None, None, Pagination::default())
        .await
        .unwrap();
    assert!(early.total_count <= 1);

    let mut page = early;
    for _ in 0..100 {
        if page.total_count == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        page = fx
            .service
            .search("orders", None, None, None, Pagination::default())
            .await
            .unwrap();
    }

    assert_eq!(page.total_count, 1);
    assert_eq!(page.items.len(), 1);
    let hit = &page.items[0];
    assert_eq!(hit.id().as_deref(), Some("a1"));
    assert_eq!(hit.get("total"), Some(&Value::Float64(42.5)));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_flushes_main_queue() {
    let config = SyncConfig {
        batch_interval_ms: 60_000,
        retry_interval_ms: 60_000,
        consistency_interval_secs: 3_600,
        ..SyncConfig::default()
    };
    let fx = Fixture::with_orders(config).await;
    let handle = fx.engine().start();
    assert_eq!(handle.task_count(), 3);

    fx.service
        .create_record("orders", order("a1", 1.0, "NEW"))
        .await
        .unwrap();
    handle.shutdown().await;

    assert_eq!(fx.engine().queue_len(), 0);
    assert!(fx.index.document("orders", "a1").is_some());
}
