//! Connection port traits.
//!
//! The engine depends on these two narrow contracts and nothing else: a
//! source that can run queries and a target that can execute statements
//! inside a transaction. Drivers live behind the traits (`ports` module);
//! the engine never touches a wire protocol directly.

use async_trait::async_trait;

use crate::core::value::{Record, SqlValue};
use crate::error::Result;

/// Column description returned by [`TargetConnection::describe_table`],
/// used when serializing table structure into a backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// Target-native data type string (e.g. "VARCHAR2(255)", "NUMBER(1)").
    pub data_type: String,

    /// Whether the column allows NULL.
    pub is_nullable: bool,
}

/// Read access to the source database.
#[async_trait]
pub trait SourceConnection: Send + Sync {
    /// Run a query and return the resulting rows.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>>;

    /// Database type identifier (e.g. "postgres"), used for dialect-aware
    /// SQL generation.
    fn db_type(&self) -> &str;
}

/// Write access to the target database.
#[async_trait]
pub trait TargetConnection: Send + Sync {
    /// Run a query against the target (counts, samples, catalog reads).
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>>;

    /// Execute a single statement, returning rows affected.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Execute one statement for many parameter rows as a single bulk call.
    ///
    /// Only called when [`supports_batch`](Self::supports_batch) is true. A
    /// bulk failure reports the whole batch as failed; the importer then
    /// falls back to per-record statements to isolate the bad rows.
    async fn execute_batch(&self, sql: &str, rows: &[Vec<SqlValue>]) -> Result<u64>;

    /// Whether the target accepts bulk statement execution.
    fn supports_batch(&self) -> bool {
        true
    }

    /// Commit the current transaction.
    async fn commit(&self) -> Result<()>;

    /// Roll back the current transaction.
    async fn rollback(&self) -> Result<()>;

    /// List table names visible to the connected schema.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Describe the columns of a table.
    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    /// Server version string for backup metadata.
    async fn server_version(&self) -> Result<String> {
        Ok("unknown".to_string())
    }

    /// Database type identifier (e.g. "oracle"), used for dialect-aware
    /// SQL generation.
    fn db_type(&self) -> &str;
}
