//! Seeding and clearing test data on the target.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{sql, SqlValue, TargetConnection};
use crate::error::{MigrateError, Result};
use crate::script::split_statements;

/// Summary of a load or clean operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDataReport {
    pub operation: String,
    pub statements_executed: u64,
    pub rows_affected: u64,
}

/// Row-count snapshot of the seeded tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDataValidation {
    pub counts: Vec<(String, u64)>,
    /// Tables with no rows at all.
    pub empty_tables: Vec<String>,
    pub is_valid: bool,
}

/// Loads, clears, and checks seed data.
pub struct TestDataManager {
    target: Arc<dyn TargetConnection>,
}

impl TestDataManager {
    pub fn new(target: Arc<dyn TargetConnection>) -> Self {
        Self { target }
    }

    /// Execute a seed script statement by statement.
    pub async fn load(&self, script_path: &Path) -> Result<TestDataReport> {
        let text = std::fs::read_to_string(script_path).map_err(|e| {
            MigrateError::Config(format!(
                "cannot read seed script {}: {e}",
                script_path.display()
            ))
        })?;

        let mut statements_executed = 0u64;
        let mut rows_affected = 0u64;
        for statement in split_statements(&text) {
            rows_affected += self
                .target
                .execute(&statement, &[])
                .await
                .map_err(|e| MigrateError::Target(format!("seed statement failed: {e}")))?;
            statements_executed += 1;
        }
        self.target
            .commit()
            .await
            .map_err(|e| MigrateError::Target(format!("seed commit: {e}")))?;

        info!(
            script = %script_path.display(),
            statements = statements_executed,
            rows = rows_affected,
            "test data loaded"
        );
        Ok(TestDataReport {
            operation: "load".into(),
            statements_executed,
            rows_affected,
        })
    }

    /// Delete all rows from the given tables, last table first so that
    /// child rows go before their parents.
    pub async fn clean(&self, tables: &[String]) -> Result<TestDataReport> {
        let db = self.target.db_type();
        let mut statements_executed = 0u64;
        let mut rows_affected = 0u64;
        for table in tables.iter().rev() {
            let statement = format!("DELETE FROM {}", sql::quote_ident(db, table));
            rows_affected += self
                .target
                .execute(&statement, &[])
                .await
                .map_err(|e| MigrateError::Target(format!("clean of {table}: {e}")))?;
            statements_executed += 1;
        }
        self.target
            .commit()
            .await
            .map_err(|e| MigrateError::Target(format!("clean commit: {e}")))?;

        info!(tables = tables.len(), rows = rows_affected, "test data cleaned");
        Ok(TestDataReport {
            operation: "clean".into(),
            statements_executed,
            rows_affected,
        })
    }

    /// Report row counts per table; valid when every table has rows.
    pub async fn validate(&self, tables: &[String]) -> Result<TestDataValidation> {
        let db = self.target.db_type();
        let mut counts = Vec::with_capacity(tables.len());
        let mut empty_tables = Vec::new();

        for table in tables {
            let rows = self
                .target
                .query(&sql::count_query(db, table), &[])
                .await
                .map_err(|e| MigrateError::Target(format!("count of {table}: {e}")))?;
            let count = match rows.first().and_then(|r| r.get("CNT")) {
                Some(SqlValue::Int(n)) if *n >= 0 => *n as u64,
                _ => 0,
            };
            if count == 0 {
                warn!(table = %table, "table is empty");
                empty_tables.push(table.clone());
            }
            counts.push((table.clone(), count));
        }

        let is_valid = empty_tables.is_empty();
        Ok(TestDataValidation {
            counts,
            empty_tables,
            is_valid,
        })
    }
}
