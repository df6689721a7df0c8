//! Migration orchestration: per-table export, import, and validation, with
//! bounded parallelism across tables and progress events on a channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::core::{SourceConnection, SqlValue, TargetConnection};
use crate::error::{MigrateError, Result};
use crate::export::TableExporter;
use crate::import::{ImportResult, TableImporter};
use crate::validate::IntegrityValidator;

/// Progress event emitted while a table migrates.
///
/// `records_processed` only grows for a given table; the final event per
/// table has `completed=true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationProgress {
    pub current_table: String,
    pub batches_processed: u64,
    pub total_batches: u64,
    pub records_processed: u64,
    pub completed: bool,
}

/// Everything that happened to one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMigrationOutcome {
    pub table: String,
    pub export: crate::export::ExportResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import: Option<ImportResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<crate::validate::ValidationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
}

/// Summary of a whole migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tables: Vec<TableMigrationOutcome>,
    /// Tables whose import loop ran to completion, including tables with
    /// skipped rows under `continue_on_error`.
    pub completed_tables: u64,
    pub failed_tables: u64,
    pub total_records: u64,
    pub duration_ms: u64,
    pub success: bool,
}

/// Drives a full migration run.
pub struct Orchestrator {
    source: Arc<dyn SourceConnection>,
    target: Arc<dyn TargetConnection>,
    config: Config,
    progress: Option<mpsc::Sender<MigrationProgress>>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn SourceConnection>,
        target: Arc<dyn TargetConnection>,
        config: Config,
    ) -> Self {
        Self {
            source,
            target,
            config,
            progress: None,
        }
    }

    /// Attach a progress channel. Events are sent with backpressure; a
    /// closed receiver silently drops them.
    #[must_use]
    pub fn with_progress(mut self, tx: mpsc::Sender<MigrationProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Migrate the given tables. Table-level failures are captured per
    /// outcome; with `continue_on_error` off the first failed table stops
    /// scheduling further ones.
    pub async fn run(&self, tables: &[String]) -> Result<MigrationSummary> {
        let started = Instant::now();
        let started_at = Utc::now();
        let options = self.config.migration.clone();
        let semaphore = Arc::new(Semaphore::new(options.parallel_tables as usize));
        let continue_on_error = options.continue_on_error;

        let mut handles = Vec::with_capacity(tables.len());
        for table in tables {
            let permit_source = Arc::clone(&semaphore);
            let source = Arc::clone(&self.source);
            let target = Arc::clone(&self.target);
            let config = self.config.clone();
            let progress = self.progress.clone();
            let table = table.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit_source
                    .acquire_owned()
                    .await
                    .map_err(|e| MigrateError::import(&table, format!("semaphore closed: {e}")))?;
                migrate_table(&table, source, target, &config, progress).await
            }));
        }

        let mut outcomes = Vec::with_capacity(tables.len());
        let mut stop = false;
        for handle in handles {
            if stop {
                handle.abort();
                continue;
            }
            let outcome = handle
                .await
                .map_err(|e| MigrateError::Import {
                    table: String::new(),
                    message: format!("table task panicked: {e}"),
                })??;
            if !outcome.success && !continue_on_error {
                warn!(table = %outcome.table, "table failed, stopping run");
                stop = true;
            }
            outcomes.push(outcome);
        }

        let completed_tables = outcomes.iter().filter(|o| o.success).count() as u64;
        let failed_tables = outcomes.len() as u64 - completed_tables;
        let total_records = outcomes
            .iter()
            .filter_map(|o| o.import.as_ref())
            .map(|i| i.inserted)
            .sum();
        let summary = MigrationSummary {
            started_at,
            finished_at: Utc::now(),
            tables: outcomes,
            completed_tables,
            failed_tables,
            total_records,
            duration_ms: started.elapsed().as_millis() as u64,
            success: failed_tables == 0 && !stop,
        };
        if summary.success {
            info!(
                tables = completed_tables,
                records = total_records,
                "migration run complete"
            );
        } else {
            error!(
                completed = completed_tables,
                failed = failed_tables,
                "migration run finished with failures"
            );
        }
        Ok(summary)
    }
}

/// Export, import batch by batch with progress, then validate counts.
async fn migrate_table(
    table: &str,
    source: Arc<dyn SourceConnection>,
    target: Arc<dyn TargetConnection>,
    config: &Config,
    progress: Option<mpsc::Sender<MigrationProgress>>,
) -> Result<TableMigrationOutcome> {
    let options = config.migration.clone();
    let exporter = TableExporter::new(Arc::clone(&source), options.clone());
    let exported = exporter.export_table(table).await?;
    if !exported.result.success {
        let error = exported.result.error.clone();
        send_progress(&progress, final_event(table, 0, 0)).await;
        return Ok(TableMigrationOutcome {
            table: table.to_string(),
            export: exported.result,
            import: None,
            validation: None,
            error,
            success: false,
        });
    }

    let column_types = match fetch_column_types(&*source, config, table).await {
        Ok(types) => types,
        Err(e) => {
            warn!(table = %table, error = %e, "column type lookup failed");
            send_progress(&progress, final_event(table, 0, 0)).await;
            return Ok(TableMigrationOutcome {
                table: table.to_string(),
                export: exported.result,
                import: None,
                validation: None,
                error: Some(e.to_string()),
                success: false,
            });
        }
    };
    let importer =
        TableImporter::new(Arc::clone(&target), options.clone()).with_column_types(column_types);

    let total_batches = exported.batches.len() as u64;
    let mut merged: Option<ImportResult> = None;
    let mut import_error = None;
    for (index, batch) in exported.batches.iter().enumerate() {
        if import_error.is_some() {
            // The abort already happened; fold the unattempted rows in so
            // inserted + failed still covers every exported record.
            if let Some(acc) = merged.as_mut() {
                acc.total_records += batch.len() as u64;
                acc.failed += batch.len() as u64;
            }
            continue;
        }
        let partial = importer.import_table(table, std::slice::from_ref(batch)).await;
        if !partial.success {
            // First-failure abort with continue_on_error off lands here.
            import_error = Some(
                partial
                    .errors
                    .last()
                    .map_or_else(|| "import aborted".to_string(), |e| e.message.clone()),
            );
            warn!(table = %table, "import aborted");
        }
        let merged_so_far = merge_import(merged.take(), partial, index as u64);
        send_progress(
            &progress,
            MigrationProgress {
                current_table: table.to_string(),
                batches_processed: index as u64 + 1,
                total_batches,
                records_processed: merged_so_far.inserted + merged_so_far.failed,
                completed: false,
            },
        )
        .await;
        merged = Some(merged_so_far);
    }
    let import = merged.unwrap_or_else(|| empty_import(table));

    send_progress(
        &progress,
        final_event(table, total_batches, import.inserted + import.failed),
    )
    .await;

    if let Some(error) = import_error {
        return Ok(TableMigrationOutcome {
            table: table.to_string(),
            export: exported.result,
            import: Some(import),
            validation: None,
            error: Some(error),
            success: false,
        });
    }

    let validator = IntegrityValidator::new(source, target);
    let validation = match validator.validate_counts(table).await {
        Ok(validation) => validation,
        Err(e) => {
            warn!(table = %table, error = %e, "count validation failed");
            return Ok(TableMigrationOutcome {
                table: table.to_string(),
                export: exported.result,
                import: Some(import),
                validation: None,
                error: Some(e.to_string()),
                success: false,
            });
        }
    };
    // Success tracks loop completion; skipped rows under continue_on_error
    // surface through the validation report and the error list instead.
    let success = import.success;
    Ok(TableMigrationOutcome {
        table: table.to_string(),
        export: exported.result,
        import: Some(import),
        validation: Some(validation),
        error: None,
        success,
    })
}

fn final_event(table: &str, total_batches: u64, records_processed: u64) -> MigrationProgress {
    MigrationProgress {
        current_table: table.to_string(),
        batches_processed: total_batches,
        total_batches,
        records_processed,
        completed: true,
    }
}

/// Declared source column types, lowercased. Only the PostgreSQL catalog is
/// consulted; other source kinds rely on value-based inference downstream.
async fn fetch_column_types(
    source: &dyn SourceConnection,
    config: &Config,
    table: &str,
) -> Result<HashMap<String, String>> {
    if source.db_type() != "postgres" {
        return Ok(HashMap::new());
    }
    let rows = source
        .query(
            "SELECT column_name, udt_name FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2",
            &[
                SqlValue::Text(config.source.schema.clone()),
                SqlValue::Text(table.to_string()),
            ],
        )
        .await?;
    let mut types = HashMap::with_capacity(rows.len());
    for row in &rows {
        if let (Some(SqlValue::Text(name)), Some(SqlValue::Text(udt))) =
            (row.get("column_name"), row.get("udt_name"))
        {
            types.insert(name.to_ascii_lowercase(), udt.clone());
        }
    }
    Ok(types)
}

fn merge_import(acc: Option<ImportResult>, mut partial: ImportResult, batch_index: u64) -> ImportResult {
    // Per-batch imports each report batch index 0; rebase onto the run.
    for e in &mut partial.errors {
        e.batch_index = batch_index;
    }
    let Some(mut acc) = acc else {
        partial.batch_count = if partial.total_records > 0 { 1 } else { 0 };
        return partial;
    };
    acc.total_records += partial.total_records;
    acc.inserted += partial.inserted;
    acc.failed += partial.failed;
    acc.batch_count += 1;
    acc.retry_attempts += partial.retry_attempts;
    acc.duration_ms += partial.duration_ms;
    for (kind, count) in partial.conversions {
        *acc.conversions.entry(kind).or_insert(0) += count;
    }
    acc.success = acc.success && partial.success;
    acc.errors.extend(partial.errors);
    acc
}

fn empty_import(table: &str) -> ImportResult {
    ImportResult {
        table: table.to_string(),
        success: true,
        total_records: 0,
        inserted: 0,
        failed: 0,
        batch_count: 0,
        retry_attempts: 0,
        duration_ms: 0,
        conversions: HashMap::new(),
        errors: Vec::new(),
    }
}

async fn send_progress(
    progress: &Option<mpsc::Sender<MigrationProgress>>,
    event: MigrationProgress,
) {
    if let Some(tx) = progress {
        // Receiver gone just means nobody is watching.
        let _ = tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn import_with(inserted: u64, failed: u64, success: bool) -> ImportResult {
        ImportResult {
            table: "users".into(),
            success,
            total_records: inserted + failed,
            inserted,
            failed,
            batch_count: 1,
            retry_attempts: 0,
            duration_ms: 1,
            conversions: HashMap::new(),
            errors: Vec::new(),
        }
    }

    #[test]
    fn test_merge_import_accumulates() {
        let first = merge_import(None, import_with(10, 0, true), 0);
        let merged = merge_import(Some(first), import_with(5, 1, true), 1);
        assert_eq!(merged.total_records, 16);
        assert_eq!(merged.inserted, 15);
        assert_eq!(merged.failed, 1);
        assert_eq!(merged.batch_count, 2);
        // Skipped rows do not undo loop completion.
        assert!(merged.success);
    }

    #[test]
    fn test_merge_import_propagates_abort() {
        let first = merge_import(None, import_with(10, 0, true), 0);
        let merged = merge_import(Some(first), import_with(1, 4, false), 1);
        assert!(!merged.success);
        let merged = merge_import(Some(merged), import_with(0, 5, true), 2);
        assert!(!merged.success);
    }

    #[test]
    fn test_empty_import_is_successful() {
        let import = empty_import("users");
        assert!(import.success);
        assert!(import.is_complete());
    }
}
