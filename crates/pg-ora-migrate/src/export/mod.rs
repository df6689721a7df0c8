//! Table export: paged reads from the source into in-memory batches.

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MigrationOptions;
use crate::core::{sql, Record, SourceConnection};
use crate::error::{MigrateError, Result};

/// Outcome summary for one exported table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResult {
    pub table: String,
    pub success: bool,
    pub total_records: u64,
    /// Number of batches produced. `ceil(total_records / batch_size)`, 1 for
    /// an empty table (a single empty page) and 0 when the export failed.
    pub batch_count: u64,
    /// Serialized payload size in bytes.
    pub original_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<f64>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A fully exported table: the summary plus the batches themselves.
#[derive(Debug, Clone)]
pub struct ExportedTable {
    pub result: ExportResult,
    pub batches: Vec<Vec<Record>>,
}

/// Reads source tables page by page.
///
/// Pages are keyed by a deterministic ORDER BY so that re-running an export
/// against a quiescent source yields identical batches.
pub struct TableExporter {
    source: Arc<dyn SourceConnection>,
    options: MigrationOptions,
}

impl TableExporter {
    pub fn new(source: Arc<dyn SourceConnection>, options: MigrationOptions) -> Self {
        Self { source, options }
    }

    /// Export one table. The per-table failure is captured in the returned
    /// summary; only malformed inputs surface as `Err`.
    pub async fn export_table(&self, table: &str) -> Result<ExportedTable> {
        if table.trim().is_empty() {
            return Err(MigrateError::export(table, "table name is empty"));
        }

        let started = Instant::now();
        match self.export_inner(table).await {
            Ok((total_records, batches)) => {
                let (original_size, compressed_size) = self.payload_sizes(&batches)?;
                let compression_ratio = compressed_size
                    .filter(|_| original_size > 0)
                    .map(|c| c as f64 / original_size as f64);
                let result = ExportResult {
                    table: table.to_string(),
                    success: true,
                    total_records,
                    batch_count: (batches.len() as u64).max(1),
                    original_size,
                    compressed_size,
                    compression_ratio,
                    duration_ms: started.elapsed().as_millis() as u64,
                    error: None,
                };
                info!(
                    table = %table,
                    records = total_records,
                    batches = result.batch_count,
                    bytes = original_size,
                    "export complete"
                );
                Ok(ExportedTable { result, batches })
            }
            Err(e) => {
                warn!(table = %table, error = %e, "export failed");
                Ok(ExportedTable {
                    result: ExportResult {
                        table: table.to_string(),
                        success: false,
                        total_records: 0,
                        batch_count: 0,
                        original_size: 0,
                        compressed_size: None,
                        compression_ratio: None,
                        duration_ms: started.elapsed().as_millis() as u64,
                        error: Some(e.to_string()),
                    },
                    batches: Vec::new(),
                })
            }
        }
    }

    async fn export_inner(&self, table: &str) -> Result<(u64, Vec<Vec<Record>>)> {
        let db = self.source.db_type();
        let total_records = self.count_rows(table).await?;
        if total_records == 0 {
            debug!(table = %table, "table is empty, nothing to export");
            return Ok((0, Vec::new()));
        }

        let batch_size = self.options.batch_size as u64;
        let mut batches = Vec::with_capacity(total_records.div_ceil(batch_size) as usize);
        let mut offset = 0u64;

        while offset < total_records {
            let page_sql = sql::page_query(db, table, self.options.batch_size, offset);
            let rows = self.source.query(&page_sql, &[]).await.map_err(|e| {
                MigrateError::export(table, format!("page read at offset {offset}: {e}"))
            })?;
            if rows.is_empty() {
                // The source shrank under us. Stop rather than loop.
                warn!(table = %table, offset, "short page, source row count changed");
                break;
            }
            offset += rows.len() as u64;
            debug!(table = %table, offset, batch_rows = rows.len(), "page exported");
            batches.push(rows);
        }

        Ok((offset, batches))
    }

    /// Serialized payload size, plus the gzipped size when compression is on.
    /// The compressed bytes are sizing information only; batches stay
    /// uncompressed in memory for the importer.
    fn payload_sizes(&self, batches: &[Vec<Record>]) -> Result<(u64, Option<u64>)> {
        let serialized = serde_json::to_vec(batches)?;
        let original_size = serialized.len() as u64;
        if !self.options.compression_enabled || original_size == 0 {
            return Ok((original_size, None));
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&serialized)?;
        let compressed = encoder.finish()?;
        Ok((original_size, Some(compressed.len() as u64)))
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        let count_sql = sql::count_query(self.source.db_type(), table);
        let rows = self
            .source
            .query(&count_sql, &[])
            .await
            .map_err(|e| MigrateError::export(table, format!("row count: {e}")))?;
        let row = rows
            .first()
            .ok_or_else(|| MigrateError::export(table, "row count returned no rows"))?;
        match row.get("CNT") {
            Some(crate::core::SqlValue::Int(n)) if *n >= 0 => Ok(*n as u64),
            other => Err(MigrateError::export(
                table,
                format!("row count returned unexpected value: {other:?}"),
            )),
        }
    }
}
