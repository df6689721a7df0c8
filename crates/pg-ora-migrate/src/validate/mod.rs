//! Post-migration integrity validation.
//!
//! Three levels, cheapest first: row-count comparison per table, sampled
//! row comparison keyed by a stable column, and key-set difference analysis
//! for tables where counts disagree.
//!
//! Values are compared through a normalized text form so that the same
//! datum stored under each database's native conventions compares equal
//! (0/1 against boolean, CHAR(36) against uuid, ISO-8601 text against
//! timestamp, uppercase against lowercase column names).

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::{sql, Record, SourceConnection, SqlValue, TargetConnection};
use crate::error::{MigrateError, Result};

/// Row-count comparison for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub table: String,
    pub postgres_count: u64,
    pub oracle_count: u64,
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub duration_ms: u64,
}

/// One value that differs between source and target for a sampled row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleMismatch {
    pub key: String,
    pub column: String,
    pub source_value: String,
    pub target_value: String,
}

/// Sampled row comparison for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleValidationReport {
    pub table: String,
    pub key_column: String,
    pub sample_size: usize,
    /// Sampled rows that matched completely.
    pub matched_records: u64,
    /// Sampled rows with at least one differing field.
    pub mismatched_records: u64,
    pub differences: Vec<SampleMismatch>,
    /// Sampled keys with no counterpart row in the target.
    pub missing_in_target: Vec<String>,
    pub is_valid: bool,
}

/// Per-table row of a multi-table count comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCountRow {
    pub table: String,
    pub source_count: u64,
    pub target_count: u64,
    pub is_match: bool,
    /// Set when the table could not be counted at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub issue: Option<String>,
}

/// Totals over a [`TableCountComparison`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCountSummary {
    pub total_source_records: u64,
    pub total_target_records: u64,
    pub overall_match: bool,
}

/// Count comparison across a set of tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCountComparison {
    pub checked_at: chrono::DateTime<chrono::Utc>,
    pub tables: Vec<TableCountRow>,
    pub summary: TableCountSummary,
}

/// Key-set partition for one table.
///
/// Every key seen on either side lands in exactly one of the three sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingRecordsAnalysis {
    pub table: String,
    pub key_column: String,
    /// Keys present in the source but absent from the target.
    pub missing_in_target: Vec<String>,
    /// Keys present in the target but absent from the source.
    pub missing_in_source: Vec<String>,
    /// Keys present on both sides.
    pub common_records: Vec<String>,
}

/// Compares migrated data between the two sides.
pub struct IntegrityValidator {
    source: Arc<dyn SourceConnection>,
    target: Arc<dyn TargetConnection>,
}

impl IntegrityValidator {
    pub fn new(source: Arc<dyn SourceConnection>, target: Arc<dyn TargetConnection>) -> Self {
        Self { source, target }
    }

    /// Compare row counts for one table.
    pub async fn validate_counts(&self, table: &str) -> Result<ValidationReport> {
        let started = Instant::now();
        let postgres_count = self.source_count(table).await?;
        let oracle_count = self.target_count(table).await?;

        let mut issues = Vec::new();
        if postgres_count != oracle_count {
            issues.push(format!(
                "Row count mismatch for {table}: source has {postgres_count} rows, target has {oracle_count} rows"
            ));
        }
        let is_valid = issues.is_empty();
        if is_valid {
            debug!(table = %table, rows = postgres_count, "row counts match");
        } else {
            warn!(table = %table, postgres_count, oracle_count, "row count mismatch");
        }

        Ok(ValidationReport {
            table: table.to_string(),
            postgres_count,
            oracle_count,
            is_valid,
            issues,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Compare counts across multiple tables. A table that cannot be
    /// counted becomes a non-matching row with an issue; it never stops
    /// the remaining tables from being checked.
    pub async fn compare_counts(&self, tables: &[String]) -> Result<TableCountComparison> {
        let mut rows = Vec::with_capacity(tables.len());
        for table in tables {
            match self.validate_counts(table).await {
                Ok(report) => rows.push(TableCountRow {
                    table: report.table,
                    source_count: report.postgres_count,
                    target_count: report.oracle_count,
                    is_match: report.is_valid,
                    issue: None,
                }),
                Err(e) => {
                    warn!(table = %table, error = %e, "count comparison failed");
                    rows.push(TableCountRow {
                        table: table.clone(),
                        source_count: 0,
                        target_count: 0,
                        is_match: false,
                        issue: Some(e.to_string()),
                    });
                }
            }
        }
        let summary = TableCountSummary {
            total_source_records: rows.iter().map(|r| r.source_count).sum(),
            total_target_records: rows.iter().map(|r| r.target_count).sum(),
            overall_match: rows.iter().all(|r| r.is_match),
        };
        info!(
            checked = rows.len(),
            overall_match = summary.overall_match,
            "count comparison complete"
        );
        Ok(TableCountComparison {
            checked_at: chrono::Utc::now(),
            tables: rows,
            summary,
        })
    }

    /// Sample up to `sample_size` rows from the source ordered by
    /// `key_column` and compare them field by field against the target.
    pub async fn validate_sample(
        &self,
        table: &str,
        key_column: &str,
        sample_size: usize,
    ) -> Result<SampleValidationReport> {
        let sample_sql = sql::sample_query(self.source.db_type(), table, key_column, sample_size);
        let source_rows = self
            .source
            .query(&sample_sql, &[])
            .await
            .map_err(|e| MigrateError::Validation(format!("sample read from {table}: {e}")))?;

        let mut differences = Vec::new();
        let mut missing_in_target = Vec::new();
        let mut matched_records = 0u64;
        let mut mismatched_records = 0u64;

        for source_row in &source_rows {
            let key_value = source_row.get(key_column).cloned().unwrap_or(SqlValue::Null);
            let key_text = comparable(&key_value);

            let lookup = format!(
                "SELECT * FROM {} WHERE {} = {}",
                sql::quote_ident(self.target.db_type(), table),
                sql::quote_ident(self.target.db_type(), key_column),
                sql::placeholder(self.target.db_type(), 1),
            );
            let target_rows = self
                .target
                .query(&lookup, std::slice::from_ref(&key_value))
                .await
                .map_err(|e| MigrateError::Validation(format!("sample lookup in {table}: {e}")))?;

            let Some(target_row) = target_rows.first() else {
                missing_in_target.push(key_text);
                continue;
            };
            let before = differences.len();
            compare_rows(source_row, target_row, &key_text, &mut differences);
            if differences.len() == before {
                matched_records += 1;
            } else {
                mismatched_records += 1;
            }
        }

        let is_valid = mismatched_records == 0 && missing_in_target.is_empty();
        info!(
            table = %table,
            sampled = source_rows.len(),
            matched = matched_records,
            mismatched = mismatched_records,
            missing = missing_in_target.len(),
            "sample validation complete"
        );
        Ok(SampleValidationReport {
            table: table.to_string(),
            key_column: key_column.to_string(),
            sample_size,
            matched_records,
            mismatched_records,
            differences,
            missing_in_target,
            is_valid,
        })
    }

    /// Full key-set difference for one table.
    pub async fn analyze_missing(
        &self,
        table: &str,
        key_column: &str,
    ) -> Result<MissingRecordsAnalysis> {
        let source_sql = sql::keys_query(self.source.db_type(), table, key_column);
        let source_rows = self
            .source
            .query(&source_sql, &[])
            .await
            .map_err(|e| MigrateError::Validation(format!("source key scan of {table}: {e}")))?;
        let source_keys = key_set(&source_rows, key_column);

        let target_sql = sql::keys_query(self.target.db_type(), table, key_column);
        let target_rows = self
            .target
            .query(&target_sql, &[])
            .await
            .map_err(|e| MigrateError::Validation(format!("target key scan of {table}: {e}")))?;
        let target_keys = key_set(&target_rows, key_column);

        Ok(MissingRecordsAnalysis {
            table: table.to_string(),
            key_column: key_column.to_string(),
            missing_in_target: source_keys.difference(&target_keys).cloned().collect(),
            missing_in_source: target_keys.difference(&source_keys).cloned().collect(),
            common_records: source_keys.intersection(&target_keys).cloned().collect(),
        })
    }

    async fn source_count(&self, table: &str) -> Result<u64> {
        let rows = self
            .source
            .query(&sql::count_query(self.source.db_type(), table), &[])
            .await
            .map_err(|e| MigrateError::Validation(format!("source count of {table}: {e}")))?;
        extract_count(&rows, table)
    }

    async fn target_count(&self, table: &str) -> Result<u64> {
        let rows = self
            .target
            .query(&sql::count_query(self.target.db_type(), table), &[])
            .await
            .map_err(|e| MigrateError::Validation(format!("target count of {table}: {e}")))?;
        extract_count(&rows, table)
    }
}

fn key_set(rows: &[Record], key_column: &str) -> BTreeSet<String> {
    rows.iter()
        .map(|row| {
            row.get(key_column)
                .map(comparable)
                .unwrap_or_else(|| "NULL".to_string())
        })
        .collect()
}

fn extract_count(rows: &[Record], table: &str) -> Result<u64> {
    match rows.first().and_then(|r| r.get("CNT")) {
        Some(SqlValue::Int(n)) if *n >= 0 => Ok(*n as u64),
        other => Err(MigrateError::Validation(format!(
            "count of {table} returned unexpected value: {other:?}"
        ))),
    }
}

/// Field-by-field comparison of one matched row pair.
fn compare_rows(
    source_row: &Record,
    target_row: &Record,
    key_text: &str,
    mismatches: &mut Vec<SampleMismatch>,
) {
    let target_by_upper = target_row.normalized();
    for (column, source_value) in source_row.iter() {
        let target_value = target_by_upper
            .get(&column.to_ascii_uppercase())
            .copied()
            .unwrap_or(&SqlValue::Null);
        let source_text = comparable(source_value);
        let target_text = comparable(target_value);
        if source_text != target_text {
            mismatches.push(SampleMismatch {
                key: key_text.to_string(),
                column: column.to_string(),
                source_value: source_text,
                target_value: target_text,
            });
        }
    }
}

/// Normalized text form used for equality across database conventions.
#[must_use]
pub fn comparable(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        SqlValue::Int(n) => n.to_string(),
        SqlValue::Float(f) => {
            // Trim trailing zeros so 1.50 and 1.5 compare equal.
            let s = format!("{f}");
            if s.contains('.') {
                s.trim_end_matches('0').trim_end_matches('.').to_string()
            } else {
                s
            }
        }
        SqlValue::Uuid(u) => u.to_string(),
        SqlValue::Timestamp(t) => t.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        SqlValue::Json(v) => v.to_string(),
        SqlValue::Text(s) => {
            if let Ok(u) = Uuid::parse_str(s.trim()) {
                return u.to_string();
            }
            s.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_comparable_bool_matches_number() {
        assert_eq!(comparable(&SqlValue::Bool(true)), comparable(&SqlValue::Int(1)));
        assert_eq!(comparable(&SqlValue::Bool(false)), comparable(&SqlValue::Int(0)));
    }

    #[test]
    fn test_comparable_uuid_case_insensitive() {
        let native = SqlValue::Uuid(Uuid::parse_str("6FA459EA-EE8A-3CA4-894E-DB77E160355E").unwrap());
        let stored = SqlValue::Text("6FA459EA-EE8A-3CA4-894E-DB77E160355E".into());
        assert_eq!(comparable(&native), comparable(&stored));
    }

    #[test]
    fn test_comparable_timestamp_matches_iso_text() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_micro_opt(3, 4, 5, 600_000)
            .unwrap();
        assert_eq!(
            comparable(&SqlValue::Timestamp(ts)),
            comparable(&SqlValue::Text("2024-01-02T03:04:05.600000".into()))
        );
    }

    #[test]
    fn test_comparable_float_trims_zeros() {
        assert_eq!(comparable(&SqlValue::Float(1.5)), "1.5");
    }

    #[test]
    fn test_compare_rows_case_insensitive_columns() {
        let source = Record::new().with("id", 1i64).with("name", "ada");
        let target = Record::new().with("ID", 1i64).with("NAME", "ada");
        let mut mismatches = Vec::new();
        compare_rows(&source, &target, "1", &mut mismatches);
        assert!(mismatches.is_empty());
    }

    #[test]
    fn test_key_set_uses_comparable_form() {
        let rows = vec![
            Record::new().with("id", SqlValue::Bool(true)),
            Record::new().with("id", SqlValue::Int(0)),
        ];
        let keys = key_set(&rows, "id");
        assert_eq!(keys, BTreeSet::from(["1".to_string(), "0".to_string()]));
    }

    #[test]
    fn test_compare_rows_reports_differences() {
        let source = Record::new().with("id", 1i64).with("name", "ada");
        let target = Record::new().with("ID", 1i64).with("NAME", "bob");
        let mut mismatches = Vec::new();
        compare_rows(&source, &target, "1", &mut mismatches);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].column, "name");
        assert_eq!(mismatches[0].source_value, "ada");
        assert_eq!(mismatches[0].target_value, "bob");
    }
}
