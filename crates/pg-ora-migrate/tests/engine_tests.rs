//! End-to-end engine tests against the in-memory adapter.

use std::io::Write;
use std::sync::Arc;

use pg_ora_migrate::{
    BackupManager, Config, IntegrityValidator, MemoryDb, MigrationHistory, MigrationOptions,
    Orchestrator, Record, SqlValue, TableExporter, TableImporter, TestDataManager,
};
use tokio::sync::mpsc;

fn config_yaml(batch_size: usize, parallel: usize, continue_on_error: bool) -> String {
    format!(
        r#"
source:
  database: pcm
  user: reader
target:
  service_name: PCMDB
  user: pcm
migration:
  batch_size: {batch_size}
  parallel_tables: {parallel}
  continue_on_error: {continue_on_error}
tables:
  - users
"#
    )
}

fn test_config(batch_size: usize, parallel: usize, continue_on_error: bool) -> Config {
    Config::from_yaml(&config_yaml(batch_size, parallel, continue_on_error)).unwrap()
}

fn options(batch_size: usize) -> MigrationOptions {
    MigrationOptions {
        batch_size,
        retry_base_delay_ms: 1,
        ..MigrationOptions::default()
    }
}

fn seed_users(db: &MemoryDb, count: i64) {
    let rows = (1..=count)
        .map(|id| Record::new().with("id", id).with("name", format!("user-{id}")))
        .collect();
    db.insert_rows("users", rows);
}

#[tokio::test]
async fn test_small_table_fits_one_batch() {
    let source = Arc::new(MemoryDb::new());
    seed_users(&source, 2);

    let exporter = TableExporter::new(source, options(1000));
    let exported = exporter.export_table("users").await.unwrap();

    assert!(exported.result.success);
    assert_eq!(exported.result.total_records, 2);
    assert_eq!(exported.result.batch_count, 1);
    assert_eq!(exported.batches.len(), 1);
    assert_eq!(exported.batches[0].len(), 2);
}

#[tokio::test]
async fn test_partial_final_batch() {
    let source = Arc::new(MemoryDb::new());
    seed_users(&source, 25);

    let exporter = TableExporter::new(source, options(10));
    let exported = exporter.export_table("users").await.unwrap();

    assert_eq!(exported.result.total_records, 25);
    assert_eq!(exported.result.batch_count, 3);
    assert_eq!(exported.batches[2].len(), 5);

    // Concatenating the batches yields every row exactly once, in order.
    let ids: Vec<i64> = exported
        .batches
        .iter()
        .flatten()
        .map(|row| match row.get("id") {
            Some(SqlValue::Int(id)) => *id,
            other => panic!("unexpected id value: {other:?}"),
        })
        .collect();
    assert_eq!(ids, (1..=25).collect::<Vec<i64>>());
}

#[tokio::test]
async fn test_empty_table_exports_single_empty_batch() {
    let source = Arc::new(MemoryDb::new());
    source.create_table("users");

    let exporter = TableExporter::new(source, options(10));
    let exported = exporter.export_table("users").await.unwrap();

    assert!(exported.result.success);
    assert_eq!(exported.result.total_records, 0);
    assert_eq!(exported.result.batch_count, 1);
    assert!(exported.batches.is_empty());
}

#[tokio::test]
async fn test_export_failure_reports_zero_batches() {
    let source = Arc::new(MemoryDb::new());
    let exporter = TableExporter::new(source, options(10));

    // No such table.
    let exported = exporter.export_table("missing").await.unwrap();
    assert!(!exported.result.success);
    assert_eq!(exported.result.batch_count, 0);
    assert!(exported.result.error.is_some());
}

#[tokio::test]
async fn test_count_mismatch_names_both_counts() {
    let source = Arc::new(MemoryDb::new());
    seed_users(&source, 1000);
    let target = Arc::new(MemoryDb::new());
    seed_users(&target, 995);

    let validator = IntegrityValidator::new(source, target);
    let report = validator.validate_counts("users").await.unwrap();

    assert!(!report.is_valid);
    assert_eq!(report.postgres_count, 1000);
    assert_eq!(report.oracle_count, 995);
    assert_eq!(report.issues.len(), 1);
    assert!(report.issues[0].contains("1000"));
    assert!(report.issues[0].contains("995"));
}

#[tokio::test]
async fn test_continue_on_error_keeps_going() {
    let target = Arc::new(MemoryDb::new());
    target.create_table("users");
    target.inject_row_failure(
        SqlValue::Text("user-2".into()),
        "ORA-00001: unique constraint (PCM.PK_USERS) violated",
    );

    let batch: Vec<Record> = (1..=3)
        .map(|id: i64| Record::new().with("id", id).with("name", format!("user-{id}")))
        .collect();
    let importer = TableImporter::new(
        target.clone(),
        MigrationOptions {
            continue_on_error: true,
            retry_base_delay_ms: 1,
            ..MigrationOptions::default()
        },
    );
    let result = importer.import_table("users", &[batch]).await;

    assert_eq!(result.total_records, 3);
    assert_eq!(result.inserted, 2);
    assert_eq!(result.failed, 1);
    assert_eq!(result.errors.len(), 1);
    // The loop ran to completion, so the import as a whole succeeded.
    assert!(result.success);
    assert_eq!(result.errors[0].target_error_code.as_deref(), Some("ORA-00001"));
    assert_eq!(target.rows("users").len(), 2);
}

#[tokio::test]
async fn test_first_failure_aborts_without_continue_on_error() {
    let target = Arc::new(MemoryDb::new());
    target.create_table("users");
    target.inject_row_failure(
        SqlValue::Text("user-2".into()),
        "ORA-00001: unique constraint (PCM.PK_USERS) violated",
    );

    let batch: Vec<Record> = (1..=3)
        .map(|id: i64| Record::new().with("id", id).with("name", format!("user-{id}")))
        .collect();
    let importer = TableImporter::new(
        target.clone(),
        MigrationOptions {
            continue_on_error: false,
            retry_base_delay_ms: 1,
            ..MigrationOptions::default()
        },
    );
    let result = importer.import_table("users", &[batch]).await;

    // The abort still reports what landed before the bad row.
    assert!(!result.success);
    assert_eq!(result.inserted, 1);
    assert_eq!(result.failed, 2);
    assert_eq!(result.inserted + result.failed, result.total_records);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(target.rows("users").len(), 1);
}

#[tokio::test]
async fn test_transient_failures_retry_then_succeed() {
    let target = Arc::new(MemoryDb::new());
    target.create_table("users");
    target.inject_failure(
        "INSERT INTO users",
        "ORA-03113: end-of-file on communication channel",
        2,
    );

    let batch = vec![Record::new().with("id", 1i64).with("name", "ada")];
    let importer = TableImporter::new(
        target.clone(),
        MigrationOptions {
            max_retries: 3,
            retry_base_delay_ms: 1,
            ..MigrationOptions::default()
        },
    );
    let result = importer.import_table("users", &[batch]).await;

    assert!(result.success);
    assert_eq!(result.inserted, 1);
    assert_eq!(result.retry_attempts, 2);
    assert_eq!(target.rows("users").len(), 1);
}

#[tokio::test]
async fn test_retries_exhausted_falls_back_and_fails_row() {
    let target = Arc::new(MemoryDb::new());
    target.create_table("users");
    // Fails forever.
    target.inject_failure("INSERT INTO users", "connection reset by peer", u32::MAX);

    let batch = vec![Record::new().with("id", 1i64).with("name", "ada")];
    let importer = TableImporter::new(
        target,
        MigrationOptions {
            max_retries: 1,
            retry_base_delay_ms: 1,
            continue_on_error: true,
            ..MigrationOptions::default()
        },
    );
    let result = importer.import_table("users", &[batch]).await;

    // The row was given up on, but continue_on_error kept the loop going.
    assert!(result.success);
    assert_eq!(result.failed, 1);
    assert!(result.errors[0].is_retryable);
}

#[tokio::test]
async fn test_conversions_are_tallied() {
    use pg_ora_migrate::ConversionKind;

    let target = Arc::new(MemoryDb::new());
    target.create_table("events");

    let batch = vec![Record::new()
        .with("id", uuid::Uuid::new_v4())
        .with("active", true)
        .with("payload", serde_json::json!({"kind": "photo"}))];
    let importer = TableImporter::new(target.clone(), options(100));
    let result = importer.import_table("events", &[batch]).await;

    assert!(result.success);
    assert_eq!(result.conversions.get(&ConversionKind::UuidToChar), Some(&1));
    assert_eq!(result.conversions.get(&ConversionKind::BooleanToNumber), Some(&1));
    assert_eq!(result.conversions.get(&ConversionKind::JsonToClob), Some(&1));

    // Stored forms are target-native.
    let row = &target.rows("events")[0];
    assert!(matches!(row.get("active"), Some(SqlValue::Int(1))));
    assert!(matches!(row.get("id"), Some(SqlValue::Text(_))));
}

#[tokio::test]
async fn test_sample_validation_across_conventions() {
    let id = uuid::Uuid::new_v4();
    let source = Arc::new(MemoryDb::new());
    source.insert_rows(
        "users",
        vec![Record::new()
            .with("id", 1i64)
            .with("guid", id)
            .with("active", true)],
    );
    let target = Arc::new(MemoryDb::new());
    target.insert_rows(
        "users",
        vec![Record::new()
            .with("id", 1i64)
            .with("guid", id.to_string())
            .with("active", 1i64)],
    );

    let validator = IntegrityValidator::new(source, target);
    let report = validator.validate_sample("users", "id", 10).await.unwrap();

    assert!(report.is_valid, "differences: {:?}", report.differences);
    assert_eq!(report.matched_records, 1);
    assert_eq!(report.mismatched_records, 0);
}

#[tokio::test]
async fn test_count_comparison_isolates_broken_table() {
    let source = Arc::new(MemoryDb::new());
    seed_users(&source, 3);
    let target = Arc::new(MemoryDb::new());
    seed_users(&target, 3);

    let validator = IntegrityValidator::new(source, target);
    let tables = vec!["users".to_string(), "missing".to_string(), "users".to_string()];
    let comparison = validator.compare_counts(&tables).await.unwrap();

    // The broken table becomes its own non-matching row; the rest still run.
    assert_eq!(comparison.tables.len(), 3);
    assert!(comparison.tables[0].is_match);
    assert!(!comparison.tables[1].is_match);
    assert!(comparison.tables[1].issue.is_some());
    assert!(comparison.tables[2].is_match);
    assert!(!comparison.summary.overall_match);
}

#[tokio::test]
async fn test_missing_records_partition() {
    let source = Arc::new(MemoryDb::new());
    seed_users(&source, 5);
    let target = Arc::new(MemoryDb::new());
    // 3..=7 in the target: 1,2 missing there, 6,7 missing here.
    let rows = (3..=7i64)
        .map(|id| Record::new().with("id", id).with("name", format!("user-{id}")))
        .collect();
    target.insert_rows("users", rows);

    let validator = IntegrityValidator::new(source, target);
    let analysis = validator.analyze_missing("users", "id").await.unwrap();

    assert_eq!(analysis.missing_in_target, vec!["1", "2"]);
    assert_eq!(analysis.missing_in_source, vec!["6", "7"]);
    assert_eq!(analysis.common_records, vec!["3", "4", "5"]);

    // The three sets partition the union of both key sets.
    let total = analysis.missing_in_target.len()
        + analysis.missing_in_source.len()
        + analysis.common_records.len();
    assert_eq!(total, 7);
}

#[tokio::test]
async fn test_backup_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.bak");

    let target = Arc::new(MemoryDb::new());
    seed_users(&target, 4);

    let manager = BackupManager::new(
        target.clone(),
        MigrationOptions {
            compression_enabled: true,
            ..MigrationOptions::default()
        },
    );
    let backup = manager
        .create_backup(&["users".to_string()], &path, true)
        .await
        .unwrap();
    assert_eq!(backup.metadata.table_count, 1);
    assert_eq!(backup.metadata.total_records, 4);
    assert!(backup.metadata.includes_data);
    assert!(backup.metadata.compressed);

    let validation = manager.validate_backup(&path).unwrap();
    assert!(validation.is_valid);
    assert!(validation.checksum_match);

    // Wipe and replay.
    target.create_table("users");
    assert!(target.rows("users").is_empty());
    let restore = manager.restore_backup(&path).await.unwrap();
    assert!(restore.success);
    assert_eq!(restore.rows_restored, 4);
    // CREATE TABLE, DELETE, and one INSERT per row.
    assert_eq!(restore.executed_statements, 6);
    assert_eq!(target.rows("users").len(), 4);
}

#[tokio::test]
async fn test_schema_only_backup_restores_structure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.bak");

    let target = Arc::new(MemoryDb::new());
    seed_users(&target, 3);

    let manager = BackupManager::new(target, options(100));
    let backup = manager
        .create_backup(&["users".to_string()], &path, false)
        .await
        .unwrap();
    assert!(!backup.metadata.includes_data);
    assert_eq!(backup.metadata.total_records, 0);

    let fresh: Arc<MemoryDb> = Arc::new(MemoryDb::new());
    let manager = BackupManager::new(fresh.clone(), options(100));
    let restore = manager.restore_backup(&path).await.unwrap();
    assert!(restore.success);
    assert_eq!(restore.executed_statements, 1);
    assert_eq!(restore.rows_restored, 0);

    use pg_ora_migrate::TargetConnection;
    let tables = fresh.list_tables().await.unwrap();
    assert_eq!(tables, vec!["USERS".to_string()]);
    assert!(fresh.rows("users").is_empty());
}

#[tokio::test]
async fn test_failed_restore_reports_executed_statements() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.bak");

    let target = Arc::new(MemoryDb::new());
    seed_users(&target, 4);

    let manager = BackupManager::new(target.clone(), options(100));
    manager
        .create_backup(&["users".to_string()], &path, true)
        .await
        .unwrap();

    target.inject_failure("INSERT INTO users", "ORA-01653: unable to extend table", 1);
    let restore = manager.restore_backup(&path).await.unwrap();

    assert!(!restore.success);
    assert!(restore.error.is_some());
    // CREATE TABLE and DELETE ran; the failing INSERT is not counted.
    assert_eq!(restore.executed_statements, 2);
    assert_eq!(restore.rows_restored, 0);
}

#[tokio::test]
async fn test_corrupted_backup_fails_checksum() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.bak");

    let target = Arc::new(MemoryDb::new());
    seed_users(&target, 2);

    let manager = BackupManager::new(target.clone(), options(100));
    manager
        .create_backup(&["users".to_string()], &path, true)
        .await
        .unwrap();

    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"tail garbage").unwrap();

    let validation = manager.validate_backup(&path).unwrap();
    assert!(!validation.is_valid);
    assert!(!validation.checksum_match);
    assert!(validation
        .issues
        .iter()
        .any(|i| i == "Checksum mismatch - backup may be corrupted"));

    // A corrupted backup is never replayed.
    assert!(manager.restore_backup(&path).await.is_err());
}

#[tokio::test]
async fn test_history_is_idempotent_per_script() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("001_widgets.sql"),
        "CREATE TABLE widgets (id INT);\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("002_seed.sql"),
        "INSERT INTO widgets (id) VALUES (1);\n",
    )
    .unwrap();

    let target = Arc::new(MemoryDb::new());
    let history = MigrationHistory::new(target.clone());

    let first = history.run_scripts(dir.path()).await.unwrap();
    assert_eq!(first.executed.len(), 2);
    assert!(first.all_succeeded());
    assert_eq!(target.rows("widgets").len(), 1);

    let second = history.run_scripts(dir.path()).await.unwrap();
    assert!(second.executed.is_empty());
    assert_eq!(second.skipped.len(), 2);
    assert_eq!(target.rows("widgets").len(), 1);

    let version = history.current_version().await.unwrap();
    assert_eq!(version.as_deref(), Some("002_seed.sql"));

    let records = history.history().await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.success));
}

#[tokio::test]
async fn test_failed_script_is_recorded_and_stops_run() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("001_bad.sql"),
        "TRUNCATE nothing;\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("002_never.sql"),
        "CREATE TABLE widgets (id INT);\n",
    )
    .unwrap();

    let target = Arc::new(MemoryDb::new());
    let history = MigrationHistory::new(target.clone());

    let run = history.run_scripts(dir.path()).await.unwrap();
    assert_eq!(run.executed.len(), 1);
    assert!(!run.all_succeeded());
    assert!(run.executed[0].error_message.is_some());
    assert!(target.rows("widgets").is_empty());
}

#[tokio::test]
async fn test_test_data_load_clean_validate() {
    let dir = tempfile::tempdir().unwrap();
    let seed = dir.path().join("seed.sql");
    std::fs::write(
        &seed,
        "INSERT INTO users (id, name) VALUES (1, 'ada');\n\
         INSERT INTO users (id, name) VALUES (2, 'bea');\n",
    )
    .unwrap();

    let target = Arc::new(MemoryDb::new());
    target.create_table("users");
    let manager = TestDataManager::new(target.clone());

    let loaded = manager.load(&seed).await.unwrap();
    assert_eq!(loaded.statements_executed, 2);
    assert_eq!(loaded.rows_affected, 2);

    let tables = vec!["users".to_string()];
    let validation = manager.validate(&tables).await.unwrap();
    assert!(validation.is_valid);
    assert_eq!(validation.counts, vec![("users".to_string(), 2)]);

    let cleaned = manager.clean(&tables).await.unwrap();
    assert_eq!(cleaned.rows_affected, 2);
    let validation = manager.validate(&tables).await.unwrap();
    assert!(!validation.is_valid);
    assert_eq!(validation.empty_tables, tables);
}

#[tokio::test]
async fn test_orchestrator_migrates_and_reports_progress() {
    let source = Arc::new(MemoryDb::new());
    seed_users(&source, 25);
    let target = Arc::new(MemoryDb::new());
    target.create_table("users");

    let config = test_config(10, 2, false);
    let (tx, mut rx) = mpsc::channel(64);
    let orchestrator = Orchestrator::new(source, target.clone(), config).with_progress(tx);

    let summary = orchestrator.run(&["users".to_string()]).await.unwrap();
    assert!(summary.success);
    assert_eq!(summary.completed_tables, 1);
    assert_eq!(summary.failed_tables, 0);
    assert_eq!(summary.total_records, 25);
    assert_eq!(target.rows("users").len(), 25);

    let outcome = &summary.tables[0];
    assert_eq!(outcome.export.batch_count, 3);
    assert!(outcome.validation.as_ref().unwrap().is_valid);

    drop(orchestrator);
    let mut last_records = 0;
    let mut saw_completed = false;
    while let Some(event) = rx.recv().await {
        assert_eq!(event.current_table, "users");
        assert!(event.records_processed >= last_records);
        last_records = event.records_processed;
        if event.completed {
            saw_completed = true;
            assert_eq!(event.batches_processed, event.total_batches);
        }
    }
    assert!(saw_completed);
    assert_eq!(last_records, 25);
}

#[tokio::test]
async fn test_orchestrator_counts_completed_table_despite_skipped_rows() {
    let source = Arc::new(MemoryDb::new());
    seed_users(&source, 5);
    let target = Arc::new(MemoryDb::new());
    target.create_table("users");
    target.inject_row_failure(
        SqlValue::Text("user-3".into()),
        "ORA-00001: unique constraint (PCM.PK_USERS) violated",
    );

    let config = test_config(10, 1, true);
    let orchestrator = Orchestrator::new(source, target.clone(), config);
    let summary = orchestrator.run(&["users".to_string()]).await.unwrap();

    // The import loop finished, so the table counts as completed even though
    // a row was skipped; the skip shows up in the import and validation.
    assert_eq!(summary.completed_tables, 1);
    assert_eq!(summary.failed_tables, 0);
    let outcome = &summary.tables[0];
    assert!(outcome.success);
    let import = outcome.import.as_ref().unwrap();
    assert_eq!(import.inserted, 4);
    assert_eq!(import.failed, 1);
    assert!(!outcome.validation.as_ref().unwrap().is_valid);
    assert_eq!(target.rows("users").len(), 4);
}

#[tokio::test]
async fn test_orchestrator_validation_failure_becomes_outcome() {
    let source = Arc::new(MemoryDb::new());
    seed_users(&source, 3);
    // No users table on the target: every insert and the count check fail.
    let target = Arc::new(MemoryDb::new());

    let config = test_config(10, 1, true);
    let orchestrator = Orchestrator::new(source, target, config);
    let summary = orchestrator.run(&["users".to_string()]).await.unwrap();

    assert_eq!(summary.failed_tables, 1);
    let outcome = &summary.tables[0];
    assert!(!outcome.success);
    assert!(outcome.error.is_some());
    assert_eq!(outcome.import.as_ref().unwrap().failed, 3);
}

#[tokio::test]
async fn test_export_failure_still_emits_final_progress_event() {
    // No users table on the source, so the export fails immediately.
    let source = Arc::new(MemoryDb::new());
    let target = Arc::new(MemoryDb::new());
    target.create_table("users");

    let config = test_config(10, 1, false);
    let (tx, mut rx) = mpsc::channel(16);
    let orchestrator = Orchestrator::new(source, target, config).with_progress(tx);
    let summary = orchestrator.run(&["users".to_string()]).await.unwrap();
    assert_eq!(summary.failed_tables, 1);

    drop(orchestrator);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(events.len(), 1);
    assert!(events[0].completed);
}

#[tokio::test]
async fn test_orchestrator_surfaces_table_failure() {
    let source = Arc::new(MemoryDb::new());
    seed_users(&source, 5);
    let target = Arc::new(MemoryDb::new());
    target.create_table("users");
    target.inject_row_failure(
        SqlValue::Text("user-3".into()),
        "ORA-01400: cannot insert NULL",
    );

    let config = test_config(10, 1, false);
    let orchestrator = Orchestrator::new(source, target, config);
    let summary = orchestrator.run(&["users".to_string()]).await.unwrap();

    assert!(!summary.success);
    assert_eq!(summary.failed_tables, 1);
    let outcome = &summary.tables[0];
    assert!(!outcome.success);
    assert!(outcome.error.is_some());
}
