//! Versioned schema scripts and their execution history.
//!
//! Script files are applied in lexical order and each outcome is recorded
//! in a `SCHEMA_MIGRATIONS` table on the target, keyed by script name. A
//! script that already ran successfully is skipped, which makes repeated
//! runs idempotent.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::{sql, SqlValue, TargetConnection};
use crate::error::{MigrateError, Result};
use crate::script::split_statements;

/// History table name. Oracle folds unquoted identifiers to upper case, so
/// the name is spelled that way everywhere.
pub const HISTORY_TABLE: &str = "SCHEMA_MIGRATIONS";

/// One row of the history table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationHistoryRecord {
    pub script_name: String,
    pub executed_at: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Outcome of one `run_scripts` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptRunSummary {
    /// Scripts applied during this run, in order.
    pub executed: Vec<MigrationHistoryRecord>,
    /// Scripts skipped because a successful record already exists.
    pub skipped: Vec<String>,
}

impl ScriptRunSummary {
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.executed.iter().all(|r| r.success)
    }
}

/// Applies schema scripts and maintains the history table.
pub struct MigrationHistory {
    target: Arc<dyn TargetConnection>,
}

impl MigrationHistory {
    pub fn new(target: Arc<dyn TargetConnection>) -> Self {
        Self { target }
    }

    /// Create the history table when it does not exist yet.
    pub async fn ensure_table(&self) -> Result<()> {
        let tables = self
            .target
            .list_tables()
            .await
            .map_err(|e| MigrateError::History(format!("listing tables: {e}")))?;
        if tables.iter().any(|t| t.eq_ignore_ascii_case(HISTORY_TABLE)) {
            return Ok(());
        }

        let ddl = if self.target.db_type() == "oracle" {
            format!(
                "CREATE TABLE {HISTORY_TABLE} (\
                 SCRIPT_NAME VARCHAR2(255) PRIMARY KEY, \
                 EXECUTED_AT TIMESTAMP NOT NULL, \
                 SUCCESS NUMBER(1) NOT NULL, \
                 ERROR_MESSAGE CLOB)"
            )
        } else {
            format!(
                "CREATE TABLE {HISTORY_TABLE} (\
                 SCRIPT_NAME VARCHAR(255) PRIMARY KEY, \
                 EXECUTED_AT TIMESTAMP NOT NULL, \
                 SUCCESS SMALLINT NOT NULL, \
                 ERROR_MESSAGE TEXT)"
            )
        };
        self.target
            .execute(&ddl, &[])
            .await
            .map_err(|e| MigrateError::History(format!("creating {HISTORY_TABLE}: {e}")))?;
        info!(table = HISTORY_TABLE, "history table created");
        Ok(())
    }

    /// Apply every `.sql` file under `scripts_dir` in lexical order,
    /// skipping scripts with a successful history record.
    ///
    /// A failing script stops the run; the failure is recorded first.
    pub async fn run_scripts(&self, scripts_dir: &Path) -> Result<ScriptRunSummary> {
        self.ensure_table().await?;
        let applied = self.successful_scripts().await?;

        let mut script_files: Vec<_> = std::fs::read_dir(scripts_dir)
            .map_err(|e| {
                MigrateError::History(format!(
                    "reading scripts dir {}: {e}",
                    scripts_dir.display()
                ))
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "sql"))
            .collect();
        script_files.sort();

        let mut summary = ScriptRunSummary {
            executed: Vec::new(),
            skipped: Vec::new(),
        };

        for path in script_files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if applied.iter().any(|a| a == &name) {
                debug!(script = %name, "already applied, skipping");
                summary.skipped.push(name);
                continue;
            }

            let text = std::fs::read_to_string(&path)?;
            let outcome = self.apply_script(&name, &text).await?;
            let failed = !outcome.success;
            summary.executed.push(outcome);
            if failed {
                warn!(script = %name, "script failed, stopping run");
                break;
            }
        }

        info!(
            executed = summary.executed.len(),
            skipped = summary.skipped.len(),
            "script run complete"
        );
        Ok(summary)
    }

    /// Name of the most recent successfully applied script, if any.
    pub async fn current_version(&self) -> Result<Option<String>> {
        self.ensure_table().await?;
        Ok(self.successful_scripts().await?.into_iter().max())
    }

    /// All history rows, oldest first.
    pub async fn history(&self) -> Result<Vec<MigrationHistoryRecord>> {
        self.ensure_table().await?;
        let rows = self
            .target
            .query(&format!("SELECT * FROM {HISTORY_TABLE} ORDER BY 1"), &[])
            .await
            .map_err(|e| MigrateError::History(format!("reading history: {e}")))?;
        let mut records: Vec<_> = rows.iter().map(record_from_row).collect();
        records.sort_by_key(|r| r.executed_at);
        Ok(records)
    }

    async fn apply_script(&self, name: &str, text: &str) -> Result<MigrationHistoryRecord> {
        let mut error_message = None;
        for statement in split_statements(text) {
            if let Err(e) = self.target.execute(&statement, &[]).await {
                error_message = Some(e.to_string());
                break;
            }
        }
        let success = error_message.is_none();
        let record = MigrationHistoryRecord {
            script_name: name.to_string(),
            executed_at: Utc::now(),
            success,
            error_message,
        };
        self.record(&record).await?;
        if success {
            self.target
                .commit()
                .await
                .map_err(|e| MigrateError::History(format!("commit of {name}: {e}")))?;
            info!(script = %name, "script applied");
        }
        Ok(record)
    }

    async fn record(&self, record: &MigrationHistoryRecord) -> Result<()> {
        let db = self.target.db_type();
        let insert = sql::insert_query(
            db,
            HISTORY_TABLE,
            &[
                "SCRIPT_NAME".to_string(),
                "EXECUTED_AT".to_string(),
                "SUCCESS".to_string(),
                "ERROR_MESSAGE".to_string(),
            ],
        );
        let params = vec![
            SqlValue::Text(record.script_name.clone()),
            SqlValue::Timestamp(record.executed_at.naive_utc()),
            SqlValue::Int(i64::from(record.success)),
            record
                .error_message
                .clone()
                .map_or(SqlValue::Null, SqlValue::Text),
        ];
        self.target
            .execute(&insert, &params)
            .await
            .map_err(|e| MigrateError::History(format!("recording {}: {e}", record.script_name)))?;
        self.target
            .commit()
            .await
            .map_err(|e| MigrateError::History(format!("history commit: {e}")))?;
        Ok(())
    }

    async fn successful_scripts(&self) -> Result<Vec<String>> {
        let rows = self
            .target
            .query(&format!("SELECT * FROM {HISTORY_TABLE} ORDER BY 1"), &[])
            .await
            .map_err(|e| MigrateError::History(format!("reading history: {e}")))?;
        Ok(rows
            .iter()
            .map(record_from_row)
            .filter(|r| r.success)
            .map(|r| r.script_name)
            .collect())
    }
}

fn record_from_row(row: &crate::core::Record) -> MigrationHistoryRecord {
    let by_upper = row.normalized();
    let script_name = match by_upper.get("SCRIPT_NAME") {
        Some(SqlValue::Text(s)) => s.clone(),
        _ => String::new(),
    };
    let executed_at = match by_upper.get("EXECUTED_AT") {
        Some(SqlValue::Timestamp(t)) => DateTime::from_naive_utc_and_offset(*t, Utc),
        Some(SqlValue::Text(s)) => s
            .parse::<NaiveDateTime>()
            .map(|t| DateTime::from_naive_utc_and_offset(t, Utc))
            .unwrap_or_else(|_| Utc::now()),
        _ => Utc::now(),
    };
    let success = matches!(
        by_upper.get("SUCCESS"),
        Some(SqlValue::Int(1)) | Some(SqlValue::Bool(true))
    );
    let error_message = match by_upper.get("ERROR_MESSAGE") {
        Some(SqlValue::Text(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };
    MigrationHistoryRecord {
        script_name,
        executed_at,
        success,
        error_message,
    }
}
