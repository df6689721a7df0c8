//! Table import: batched writes to the target with retry, fallback, and
//! conversion tallying.
//!
//! Each batch goes through the array-bind path first. A failed batch is
//! retried with exponential backoff while the classifier calls the error
//! transient; a permanent failure (or exhausted retries) falls back to
//! row-by-row inserts so that one poisoned row does not sink its whole
//! batch when `continue_on_error` is set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classify::{classify, classify_detailed, ErrorClass, Severity};
use crate::config::MigrationOptions;
use crate::convert::{convert, ConversionKind, ConversionTally};
use crate::core::{sql, Record, SqlValue, TargetConnection};

/// One failed row or batch, carried in the import summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportError {
    pub table: String,
    pub batch_index: u64,
    /// Row offset within the batch for row-level failures; `None` when the
    /// whole batch failed as a unit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_index: Option<u64>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_error_code: Option<String>,
    pub is_retryable: bool,
    pub severity: Severity,
    pub suggested_action: String,
}

impl ImportError {
    fn from_message(table: &str, batch_index: u64, row_index: Option<u64>, message: &str) -> Self {
        let detail = classify_detailed(message);
        Self {
            table: table.to_string(),
            batch_index,
            row_index,
            message: message.to_string(),
            target_error_code: detail.target_error_code,
            is_retryable: detail.class == ErrorClass::Transient,
            severity: detail.severity,
            suggested_action: detail.suggested_action,
        }
    }
}

/// Outcome summary for one imported table.
///
/// Invariant: `inserted + failed == total_records`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    pub table: String,
    pub success: bool,
    pub total_records: u64,
    pub inserted: u64,
    pub failed: u64,
    pub batch_count: u64,
    /// Retries actually performed, summed over all batches.
    pub retry_attempts: u64,
    pub duration_ms: u64,
    pub conversions: HashMap<ConversionKind, u64>,
    pub errors: Vec<ImportError>,
}

impl ImportResult {
    /// True when every row landed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.inserted == self.total_records
    }
}

/// Writes exported batches into the target.
pub struct TableImporter {
    target: Arc<dyn TargetConnection>,
    options: MigrationOptions,
    /// Source column types, lowercased name -> declared type. Columns absent
    /// from the map fall back to inference from the value variant.
    column_types: HashMap<String, String>,
}

impl TableImporter {
    pub fn new(target: Arc<dyn TargetConnection>, options: MigrationOptions) -> Self {
        Self {
            target,
            options,
            column_types: HashMap::new(),
        }
    }

    /// Supply declared source column types for conversion decisions.
    #[must_use]
    pub fn with_column_types(mut self, column_types: HashMap<String, String>) -> Self {
        self.column_types = column_types
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        self
    }

    /// Import all batches of one table. Failures are captured in the
    /// summary; `success` means the import loop ran to completion, which
    /// under `continue_on_error` includes runs with skipped rows. With
    /// `continue_on_error` off the first bad row aborts the loop and the
    /// result carries `success=false` plus whatever was inserted before it.
    pub async fn import_table(&self, table: &str, batches: &[Vec<Record>]) -> ImportResult {
        let started = Instant::now();
        let db = self.target.db_type();
        let mut tally = ConversionTally::new();
        let mut result = ImportResult {
            table: table.to_string(),
            success: false,
            total_records: batches.iter().map(|b| b.len() as u64).sum(),
            inserted: 0,
            failed: 0,
            batch_count: batches.iter().filter(|b| !b.is_empty()).count() as u64,
            retry_attempts: 0,
            duration_ms: 0,
            conversions: HashMap::new(),
            errors: Vec::new(),
        };

        let mut aborted = false;
        for (batch_index, batch) in batches.iter().enumerate() {
            if aborted {
                // Unattempted rows count as failed so the tally stays whole.
                result.failed += batch.len() as u64;
                continue;
            }
            let Some(first) = batch.first() else {
                continue;
            };
            let columns = first.column_names();
            let insert_sql = sql::insert_query(db, table, &columns);
            let rows = self.convert_batch(batch, &columns, &mut tally);

            let batch_outcome = if self.target.supports_batch() {
                self.insert_with_retry(table, &insert_sql, &rows, &mut result)
                    .await
            } else {
                Err("array binds not supported by target".to_string())
            };

            match batch_outcome {
                Ok(count) => {
                    result.inserted += count;
                    self.probe_batch_count(table, batch_index as u64, result.inserted)
                        .await;
                }
                Err(message) => {
                    debug!(
                        table = %table,
                        batch = batch_index,
                        error = %message,
                        "batch insert failed, falling back to row-by-row"
                    );
                    let completed = self
                        .insert_row_by_row(table, &insert_sql, &rows, batch_index as u64, &mut result)
                        .await;
                    if !completed {
                        aborted = true;
                    }
                }
            }
        }

        if let Err(e) = self.target.commit().await {
            let message = format!("commit: {e}");
            result
                .errors
                .push(ImportError::from_message(table, result.batch_count, None, &message));
            aborted = true;
        }

        result.conversions = tally.into_counts();
        result.duration_ms = started.elapsed().as_millis() as u64;
        result.success = !aborted;
        debug_assert_eq!(result.inserted + result.failed, result.total_records);
        info!(
            table = %table,
            inserted = result.inserted,
            failed = result.failed,
            retries = result.retry_attempts,
            aborted,
            "import complete"
        );
        result
    }

    /// Array-bind insert with exponential backoff on transient errors.
    async fn insert_with_retry(
        &self,
        table: &str,
        insert_sql: &str,
        rows: &[Vec<SqlValue>],
        result: &mut ImportResult,
    ) -> std::result::Result<u64, String> {
        let mut attempt = 0u32;
        loop {
            match self.target.execute_batch(insert_sql, rows).await {
                Ok(count) => return Ok(count),
                Err(e) => {
                    let message = e.to_string();
                    if classify(&message) != ErrorClass::Transient
                        || attempt >= self.options.max_retries
                    {
                        return Err(message);
                    }
                    let delay = self.options.retry_base_delay_ms << attempt;
                    warn!(
                        table = %table,
                        attempt = attempt + 1,
                        delay_ms = delay,
                        error = %message,
                        "transient batch failure, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                    result.retry_attempts += 1;
                }
            }
        }
    }

    /// Per-row fallback. Honors `continue_on_error`; each row gets its own
    /// transient-retry loop. Returns false when the batch was abandoned on
    /// the first bad row; the remaining rows are already counted as failed.
    async fn insert_row_by_row(
        &self,
        table: &str,
        insert_sql: &str,
        rows: &[Vec<SqlValue>],
        batch_index: u64,
        result: &mut ImportResult,
    ) -> bool {
        for (row_index, row) in rows.iter().enumerate() {
            let mut attempt = 0u32;
            loop {
                match self
                    .target
                    .execute_batch(insert_sql, std::slice::from_ref(row))
                    .await
                {
                    Ok(_) => {
                        result.inserted += 1;
                        break;
                    }
                    Err(e) => {
                        let message = e.to_string();
                        let class = classify(&message);
                        if class == ErrorClass::Transient && attempt < self.options.max_retries {
                            let delay = self.options.retry_base_delay_ms << attempt;
                            tokio::time::sleep(Duration::from_millis(delay)).await;
                            attempt += 1;
                            result.retry_attempts += 1;
                            continue;
                        }
                        result.failed += 1;
                        result.errors.push(ImportError::from_message(
                            table,
                            batch_index,
                            Some(row_index as u64),
                            &message,
                        ));
                        if !self.options.continue_on_error {
                            // Leave the tally consistent before bailing out.
                            result.failed +=
                                (rows.len() - row_index - 1) as u64;
                            warn!(
                                table = %table,
                                batch = batch_index,
                                row = row_index,
                                error = %message,
                                "aborting import"
                            );
                            return false;
                        }
                        warn!(
                            table = %table,
                            batch = batch_index,
                            row = row_index,
                            error = %message,
                            "row skipped"
                        );
                        break;
                    }
                }
            }
        }
        true
    }

    /// Optional post-batch count probe. Diagnostic only, never fails the run.
    async fn probe_batch_count(&self, table: &str, batch_index: u64, expected_so_far: u64) {
        if !self.options.validate_each_batch {
            return;
        }
        let count_sql = sql::count_query(self.target.db_type(), table);
        match self.target.query(&count_sql, &[]).await {
            Ok(rows) => {
                if let Some(SqlValue::Int(n)) = rows.first().and_then(|r| r.get("CNT")) {
                    if (*n as u64) < expected_so_far {
                        warn!(
                            table = %table,
                            batch = batch_index,
                            target_count = n,
                            expected = expected_so_far,
                            "batch count probe below expected"
                        );
                    }
                }
            }
            Err(e) => warn!(table = %table, error = %e, "batch count probe failed"),
        }
    }

    fn convert_batch(
        &self,
        batch: &[Record],
        columns: &[String],
        tally: &mut ConversionTally,
    ) -> Vec<Vec<SqlValue>> {
        batch
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|column| {
                        let value = record.get(column).cloned().unwrap_or(SqlValue::Null);
                        let source_type = self.source_type_for(column, &value);
                        let (converted, kind) = convert(&value, &source_type);
                        if kind != ConversionKind::Passthrough {
                            tally.record(kind);
                        }
                        converted
                    })
                    .collect()
            })
            .collect()
    }

    /// Declared type if we have one, otherwise inferred from the value.
    fn source_type_for(&self, column: &str, value: &SqlValue) -> String {
        if let Some(t) = self.column_types.get(&column.to_ascii_lowercase()) {
            return t.clone();
        }
        match value {
            SqlValue::Uuid(_) => "uuid".into(),
            SqlValue::Json(_) => "jsonb".into(),
            SqlValue::Bool(_) => "boolean".into(),
            SqlValue::Timestamp(_) => "timestamp".into(),
            _ => String::new(),
        }
    }
}
