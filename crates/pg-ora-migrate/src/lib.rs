//! # pg-ora-migrate
//!
//! Batch PostgreSQL to Oracle data migration library.
//!
//! This library provides the core functionality for one-shot, table-by-table
//! migration from PostgreSQL to Oracle with support for:
//!
//! - **Batched export/import** with configurable batch size
//! - **Type conversion** for uuid, json, boolean, and timestamp columns
//! - **Retry with exponential backoff** for transient target failures
//! - **Integrity validation** through counts, samples, and key-set diffs
//! - **Target-side backups** with checksummed sidecar metadata
//! - **Parallel table migration** with a bounded worker pool
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pg_ora_migrate::{Config, MemoryDb, Orchestrator, PgSourcePool};
//!
//! #[tokio::main]
//! async fn main() -> pg_ora_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let source = Arc::new(PgSourcePool::connect(&config.source, 4).await?);
//!     let target = Arc::new(MemoryDb::new());
//!     let summary = Orchestrator::new(source, target, config.clone())
//!         .run(&config.tables)
//!         .await?;
//!     println!("Migrated {} rows", summary.total_records);
//!     Ok(())
//! }
//! ```

pub mod backup;
pub mod classify;
pub mod config;
pub mod convert;
pub mod core;
pub mod error;
pub mod export;
pub mod history;
pub mod import;
pub mod maintenance;
pub mod orchestrator;
pub mod ports;
pub mod script;
pub mod testdata;
pub mod validate;

// Re-exports for convenient access
pub use backup::{BackupManager, BackupMetadata, BackupResult, BackupValidation, RestoreResult};
pub use classify::{classify, classify_detailed, ErrorClass, Severity};
pub use config::{Config, MigrationOptions, SourceConfig, TargetConfig};
pub use convert::{convert, ConversionKind, ConversionTally};
pub use crate::core::{ColumnInfo, Record, SourceConnection, SqlValue, TargetConnection};
pub use error::{MigrateError, Result};
pub use export::{ExportResult, ExportedTable, TableExporter};
pub use history::{MigrationHistory, MigrationHistoryRecord, ScriptRunSummary};
pub use import::{ImportError, ImportResult, TableImporter};
pub use maintenance::{Maintenance, MaintenanceReport};
pub use orchestrator::{MigrationProgress, MigrationSummary, Orchestrator, TableMigrationOutcome};
pub use ports::{MemoryDb, PgSourcePool};
pub use testdata::{TestDataManager, TestDataReport, TestDataValidation};
pub use validate::{
    IntegrityValidator, MissingRecordsAnalysis, SampleValidationReport, TableCountComparison,
    ValidationReport,
};
