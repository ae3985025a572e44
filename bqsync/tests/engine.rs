#![cfg(feature = "test-utils")]

use bqsync::engine::ReconciliationEngine;
use bqsync::error::ErrorKind;
use bqsync::test_utils::rows::{
    CHECKSUM_COLUMN, DATE_COLUMN, KEY_COLUMN, fact_row, january, test_table,
};
use bqsync::test_utils::test_warehouse_wrapper::TestWarehouseWrapper;
use bqsync::types::{Row, Value};
use bqsync::warehouse::memory::MemoryWarehouse;
use sync_telemetry::tracing::init_test_tracing;

/// Builds an engine over a wrapped memory warehouse already holding `rows`.
async fn engine_with_rows(
    rows: Vec<Row>,
) -> (
    ReconciliationEngine<TestWarehouseWrapper<MemoryWarehouse>>,
    TestWarehouseWrapper<MemoryWarehouse>,
    MemoryWarehouse,
) {
    let memory = MemoryWarehouse::new();
    memory.insert_rows(&test_table(), rows).await;

    let warehouse = TestWarehouseWrapper::wrap(memory.clone());
    let engine = ReconciliationEngine::new(warehouse.clone(), test_table());

    (engine, warehouse, memory)
}

fn ids(rows: &[Row]) -> Vec<i64> {
    rows.iter()
        .filter_map(|row| match row.get(KEY_COLUMN) {
            Some(Value::Int64(id)) => Some(*id),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn reference_scenario_ignores_updates_and_inserts() {
    init_test_tracing();

    let existing = vec![
        Row::new().with_column("id", 1).with_column("sum", "a"),
        Row::new().with_column("id", 2).with_column("sum", "b"),
    ];
    let incoming = vec![
        Row::new().with_column("id", 1).with_column("sum", "a"),
        Row::new().with_column("id", 2).with_column("sum", "c"),
        Row::new().with_column("id", 3).with_column("sum", "d"),
    ];

    let (engine, warehouse, memory) = engine_with_rows(existing.clone()).await;
    let report = engine
        .sync(&existing, incoming, "id", Some("sum"))
        .await
        .unwrap();

    assert_eq!(report.ignored, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.inserted.attempted, 1);
    assert_eq!(report.inserted.accepted, 1);
    assert!(report.is_complete());

    let mutations = warehouse.mutations().await;
    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].key(), &Value::Int64(2));
    assert_eq!(
        mutations[0].sql(),
        "UPDATE `test-project.test_dataset.facts` SET `sum` = 'c' WHERE `id` = 2"
    );

    let batches = warehouse.insert_batches().await;
    assert_eq!(
        batches,
        vec![vec![Row::new().with_column("id", 3).with_column("sum", "d")]]
    );

    let stored = memory.rows(&test_table()).await;
    assert_eq!(
        stored,
        vec![
            Row::new().with_column("id", 1).with_column("sum", "a"),
            Row::new().with_column("id", 2).with_column("sum", "c"),
            Row::new().with_column("id", 3).with_column("sum", "d"),
        ]
    );
}

#[tokio::test]
async fn second_sync_of_the_same_batch_changes_nothing() {
    init_test_tracing();

    let (engine, warehouse, _memory) =
        engine_with_rows(vec![fact_row(1, "a", 1), fact_row(2, "b", 2)]).await;
    let incoming = vec![fact_row(1, "a", 1), fact_row(2, "z", 2), fact_row(3, "c", 3)];

    let first = engine
        .fetch_and_sync(
            january(1),
            january(31),
            DATE_COLUMN,
            incoming.clone(),
            KEY_COLUMN,
            Some(CHECKSUM_COLUMN),
        )
        .await
        .unwrap();
    assert_eq!((first.ignored, first.updated), (1, 1));
    assert_eq!(first.inserted.accepted, 1);

    let second = engine
        .fetch_and_sync(
            january(1),
            january(31),
            DATE_COLUMN,
            incoming,
            KEY_COLUMN,
            Some(CHECKSUM_COLUMN),
        )
        .await
        .unwrap();
    assert_eq!(second.ignored, 3);
    assert_eq!(second.updated, 0);
    assert_eq!(second.inserted.attempted, 0);

    // The second sync issued no writes.
    assert_eq!(warehouse.mutations().await.len(), 1);
    assert_eq!(warehouse.insert_batches().await.len(), 1);
    assert_eq!(warehouse.queries().await.len(), 2);
}

#[tokio::test]
async fn without_checksum_every_match_is_updated() {
    init_test_tracing();

    let existing = vec![fact_row(1, "a", 1), fact_row(2, "b", 2)];
    let (engine, warehouse, _memory) = engine_with_rows(existing.clone()).await;

    let report = engine
        .sync(
            &existing,
            vec![fact_row(2, "b", 2), fact_row(1, "a", 1)],
            KEY_COLUMN,
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.ignored, 0);
    assert_eq!(report.updated, 2);
    assert_eq!(report.inserted.attempted, 0);

    // Updates follow the order of the existing rows.
    let keys: Vec<Value> = warehouse
        .mutations()
        .await
        .iter()
        .map(|statement| statement.key().clone())
        .collect();
    assert_eq!(keys, vec![Value::Int64(1), Value::Int64(2)]);
    assert!(warehouse.insert_batches().await.is_empty());
}

#[tokio::test]
async fn missing_key_fails_before_any_warehouse_call() {
    init_test_tracing();

    let existing = vec![fact_row(1, "a", 1)];
    let (engine, warehouse, _memory) = engine_with_rows(existing.clone()).await;

    let keyless = Row::new().with_column(CHECKSUM_COLUMN, "x");
    let err = engine
        .sync(
            &existing,
            vec![fact_row(1, "b", 1), keyless, fact_row(5, "c", 5)],
            KEY_COLUMN,
            Some(CHECKSUM_COLUMN),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MissingKeyColumn);
    assert!(err.is_validation());
    assert_eq!(warehouse.calls().await, 0);
}

#[tokio::test]
async fn missing_key_fails_before_the_range_is_fetched() {
    init_test_tracing();

    let (engine, warehouse, _memory) = engine_with_rows(vec![fact_row(1, "a", 1)]).await;

    let keyless = Row::new().with_column(CHECKSUM_COLUMN, "x");
    let err = engine
        .fetch_and_sync(
            january(1),
            january(31),
            DATE_COLUMN,
            vec![fact_row(2, "b", 2), keyless],
            KEY_COLUMN,
            Some(CHECKSUM_COLUMN),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MissingKeyColumn);
    assert_eq!(warehouse.calls().await, 0);
}

#[tokio::test]
async fn update_of_a_key_only_row_fails_validation() {
    init_test_tracing();

    let existing = vec![fact_row(1, "a", 1)];
    let (engine, warehouse, _memory) = engine_with_rows(existing.clone()).await;

    let err = engine
        .sync(
            &existing,
            vec![Row::new().with_column(KEY_COLUMN, 1)],
            KEY_COLUMN,
            None,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::EmptyRow);
    assert_eq!(warehouse.calls().await, 0);
}

#[tokio::test]
async fn failed_update_is_recorded_and_inserts_still_run() {
    init_test_tracing();

    let existing = vec![fact_row(1, "a", 1), fact_row(2, "b", 2), fact_row(3, "c", 3)];
    let (engine, warehouse, memory) = engine_with_rows(existing.clone()).await;
    warehouse
        .fail_mutation_for_key(2, ErrorKind::MutationExecutionFailed)
        .await;

    let report = engine
        .sync(
            &existing,
            vec![
                fact_row(1, "a2", 1),
                fact_row(2, "b2", 2),
                fact_row(3, "c2", 3),
                fact_row(4, "d", 4),
            ],
            KEY_COLUMN,
            Some(CHECKSUM_COLUMN),
        )
        .await
        .unwrap();

    assert_eq!(report.updated, 2);
    assert_eq!(report.update_failures.len(), 1);
    assert_eq!(report.update_failures[0].key, Value::Int64(2));
    assert_eq!(
        report.update_failures[0].error.kind(),
        ErrorKind::MutationExecutionFailed
    );
    assert_eq!(report.inserted.accepted, 1);
    assert!(!report.is_complete());
    assert_eq!(report.failed(), 1);

    // Every update was attempted, in order, before the insert.
    assert_eq!(warehouse.mutations().await.len(), 3);
    assert_eq!(ids(&warehouse.insert_batches().await.concat()), vec![4]);

    let stored = memory.rows(&test_table()).await;
    assert_eq!(stored[0], fact_row(1, "a2", 1));
    assert_eq!(stored[1], fact_row(2, "b", 2));
    assert_eq!(stored[2], fact_row(3, "c2", 3));
    assert_eq!(stored[3], fact_row(4, "d", 4));
}

#[tokio::test]
async fn fatal_update_failure_aborts_before_inserts() {
    init_test_tracing();

    let existing = vec![fact_row(1, "a", 1), fact_row(2, "b", 2)];
    let (engine, warehouse, _memory) = engine_with_rows(existing.clone()).await;
    warehouse
        .fail_mutation_for_key(1, ErrorKind::ServiceConnectivity)
        .await;

    let err = engine
        .sync(
            &existing,
            vec![fact_row(1, "a2", 1), fact_row(2, "b2", 2), fact_row(3, "c", 3)],
            KEY_COLUMN,
            Some(CHECKSUM_COLUMN),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServiceConnectivity);
    assert!(err.is_fatal());
    assert_eq!(warehouse.mutations().await.len(), 1);
    assert!(warehouse.insert_batches().await.is_empty());
}

#[tokio::test]
async fn fatal_abort_carries_earlier_update_failures() {
    init_test_tracing();

    let existing = vec![fact_row(1, "a", 1), fact_row(2, "b", 2), fact_row(3, "c", 3)];
    let (engine, warehouse, _memory) = engine_with_rows(existing.clone()).await;
    warehouse
        .fail_mutation_for_key(1, ErrorKind::MutationExecutionFailed)
        .await;
    warehouse
        .fail_mutation_for_key(2, ErrorKind::ServiceConnectivity)
        .await;

    let err = engine
        .sync(
            &existing,
            vec![fact_row(1, "a2", 1), fact_row(2, "b2", 2), fact_row(3, "c2", 3)],
            KEY_COLUMN,
            Some(CHECKSUM_COLUMN),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServiceConnectivity);
    assert_eq!(
        err.kinds(),
        vec![ErrorKind::ServiceConnectivity, ErrorKind::MutationExecutionFailed]
    );
    assert!(err.is_fatal());
    assert_eq!(warehouse.mutations().await.len(), 2);
    assert!(warehouse.insert_batches().await.is_empty());
}

#[tokio::test]
async fn fatal_insert_failure_is_propagated() {
    init_test_tracing();

    let (engine, warehouse, _memory) = engine_with_rows(Vec::new()).await;
    warehouse.fail_inserts(ErrorKind::AuthenticationError).await;

    let err = engine
        .sync(&[], vec![fact_row(1, "a", 1)], KEY_COLUMN, Some(CHECKSUM_COLUMN))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AuthenticationError);
}

#[tokio::test]
async fn non_fatal_insert_failure_marks_every_row() {
    init_test_tracing();

    let (engine, warehouse, memory) = engine_with_rows(Vec::new()).await;
    warehouse
        .fail_inserts(ErrorKind::StreamInsertPartialFailure)
        .await;

    let report = engine
        .sync(
            &[],
            vec![fact_row(1, "a", 1), fact_row(2, "b", 2)],
            KEY_COLUMN,
            Some(CHECKSUM_COLUMN),
        )
        .await
        .unwrap();

    assert_eq!(report.inserted.attempted, 2);
    assert_eq!(report.inserted.accepted, 0);
    let indices: Vec<usize> = report.inserted.failures.iter().map(|f| f.index).collect();
    assert_eq!(indices, vec![0, 1]);
    assert!(memory.rows(&test_table()).await.is_empty());
}

#[tokio::test]
async fn rejected_insert_rows_are_reported() {
    init_test_tracing();

    let (engine, warehouse, memory) = engine_with_rows(Vec::new()).await;
    warehouse.reject_insert_row(1, "invalid: no such field").await;
    warehouse.reject_insert_row(1, "stopped").await;

    let report = engine
        .sync(
            &[],
            vec![fact_row(1, "a", 1), fact_row(2, "b", 2), fact_row(3, "c", 3)],
            KEY_COLUMN,
            Some(CHECKSUM_COLUMN),
        )
        .await
        .unwrap();

    assert_eq!(report.inserted.attempted, 3);
    assert_eq!(report.inserted.accepted, 2);
    assert_eq!(report.inserted.failures.len(), 1);

    let failure = &report.inserted.failures[0];
    assert_eq!(failure.index, 1);
    assert_eq!(failure.row, fact_row(2, "b", 2));
    assert_eq!(failure.error.kind(), ErrorKind::StreamInsertPartialFailure);
    assert_eq!(
        failure.error.detail(),
        Some("invalid: no such field; stopped")
    );

    assert_eq!(ids(&memory.rows(&test_table()).await), vec![1, 3]);
}

#[tokio::test]
async fn duplicate_incoming_keys_do_not_crash() {
    init_test_tracing();

    let existing = vec![fact_row(1, "a", 1)];
    let (engine, _warehouse, _memory) = engine_with_rows(existing.clone()).await;

    let report = engine
        .sync(
            &existing,
            vec![fact_row(1, "b", 1), fact_row(1, "c", 1), fact_row(2, "d", 2)],
            KEY_COLUMN,
            Some(CHECKSUM_COLUMN),
        )
        .await
        .unwrap();

    assert_eq!(
        report.ignored + report.updated + report.inserted.attempted,
        3
    );
}

#[tokio::test]
async fn failed_fetch_is_propagated() {
    init_test_tracing();

    let (engine, warehouse, _memory) = engine_with_rows(Vec::new()).await;
    warehouse.fail_queries(ErrorKind::QueryFailed).await;

    let err = engine
        .fetch_and_sync(
            january(1),
            january(2),
            DATE_COLUMN,
            vec![fact_row(1, "a", 1)],
            KEY_COLUMN,
            Some(CHECKSUM_COLUMN),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::QueryFailed);
    assert!(warehouse.mutations().await.is_empty());
    assert!(warehouse.insert_batches().await.is_empty());
}
