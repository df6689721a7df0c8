//! Post-migration maintenance against the target: statistics refresh and
//! index rebuilds. Statements are dialect-switched on the target's
//! `db_type`; unknown dialects get a no-op with a warning rather than a
//! guessed statement.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{sql, SqlValue, TargetConnection};
use crate::error::{MigrateError, Result};

/// Summary of one maintenance operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub operation: String,
    /// Statements actually executed, in order.
    pub statements: Vec<String>,
    pub duration_ms: u64,
}

/// Runs maintenance statements against the target.
pub struct Maintenance {
    target: Arc<dyn TargetConnection>,
}

impl Maintenance {
    pub fn new(target: Arc<dyn TargetConnection>) -> Self {
        Self { target }
    }

    /// Refresh optimizer statistics for the given tables.
    pub async fn analyze_tables(&self, tables: &[String]) -> Result<MaintenanceReport> {
        let db = self.target.db_type();
        let mut statements = Vec::with_capacity(tables.len());
        for table in tables {
            let quoted = sql::quote_ident(db, table);
            match db {
                "oracle" => statements.push(format!("ANALYZE TABLE {quoted} COMPUTE STATISTICS")),
                "postgres" => statements.push(format!("ANALYZE {quoted}")),
                other => {
                    warn!(db = other, table = %table, "no analyze statement for this dialect");
                }
            }
        }
        self.run("analyze", statements).await
    }

    /// Refresh statistics for the whole connected schema.
    pub async fn update_statistics(&self) -> Result<MaintenanceReport> {
        let statements = match self.target.db_type() {
            "oracle" => vec!["BEGIN DBMS_STATS.GATHER_SCHEMA_STATS(USER); END;".to_string()],
            "postgres" => vec!["ANALYZE".to_string()],
            other => {
                warn!(db = other, "no statistics statement for this dialect");
                Vec::new()
            }
        };
        self.run("update-stats", statements).await
    }

    /// Rebuild all indexes owned by the connected schema (Oracle) or
    /// reindex the given tables (PostgreSQL).
    pub async fn rebuild_indexes(&self, tables: &[String]) -> Result<MaintenanceReport> {
        let db = self.target.db_type();
        let statements = match db {
            "oracle" => {
                let rows = self
                    .target
                    .query("SELECT INDEX_NAME FROM USER_INDEXES ORDER BY 1", &[])
                    .await
                    .map_err(|e| MigrateError::Target(format!("listing indexes: {e}")))?;
                rows.iter()
                    .filter_map(|row| match row.get("INDEX_NAME") {
                        Some(SqlValue::Text(name)) => {
                            Some(format!("ALTER INDEX {name} REBUILD"))
                        }
                        _ => None,
                    })
                    .collect()
            }
            "postgres" => tables
                .iter()
                .map(|t| format!("REINDEX TABLE {}", sql::quote_ident(db, t)))
                .collect(),
            other => {
                warn!(db = other, "no index rebuild statement for this dialect");
                Vec::new()
            }
        };
        self.run("rebuild-indexes", statements).await
    }

    async fn run(&self, operation: &str, statements: Vec<String>) -> Result<MaintenanceReport> {
        let started = std::time::Instant::now();
        for statement in &statements {
            self.target
                .execute(statement, &[])
                .await
                .map_err(|e| MigrateError::Target(format!("{operation}: {e}")))?;
        }
        info!(operation, count = statements.len(), "maintenance complete");
        Ok(MaintenanceReport {
            operation: operation.to_string(),
            statements,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}
