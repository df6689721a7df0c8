//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (PostgreSQL).
    pub source: SourceConfig,

    /// Target database configuration (Oracle).
    pub target: TargetConfig,

    /// Migration behavior options.
    #[serde(default)]
    pub migration: MigrationOptions,

    /// Tables to migrate, in caller-supplied order. The engine never
    /// reorders this list; foreign-key-safe ordering is the operator's job.
    #[serde(default)]
    pub tables: Vec<String>,

    /// Directory of schema migration scripts (for `migration run`).
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    /// Seed script for `test-data load`.
    #[serde(default = "default_test_data_script")]
    pub test_data_script: PathBuf,
}

/// Source database (PostgreSQL) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database type (default: "postgres"; "memory" for dry runs/tests).
    #[serde(default = "default_postgres")]
    pub r#type: String,

    /// Database host.
    #[serde(default = "default_localhost")]
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Source schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,
}

/// Target database (Oracle) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database type (default: "oracle"; "memory" for dry runs/tests).
    #[serde(default = "default_oracle")]
    pub r#type: String,

    /// Database host.
    #[serde(default = "default_localhost")]
    pub host: String,

    /// Database port (default: 1521).
    #[serde(default = "default_oracle_port")]
    pub port: u16,

    /// Oracle service name (or database name for other targets).
    pub service_name: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Target schema (default: uppercased user).
    #[serde(default)]
    pub schema: String,
}

impl TargetConfig {
    /// Effective schema: the configured one, or the uppercased user.
    pub fn effective_schema(&self) -> String {
        if self.schema.is_empty() {
            self.user.to_ascii_uppercase()
        } else {
            self.schema.clone()
        }
    }
}

/// Migration behavior options.
///
/// Supplied once per run and treated as immutable; every component reads
/// its knobs from here so behavior stays uniform across the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Rows per export/import batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum tables migrated concurrently.
    #[serde(default = "default_parallel_tables")]
    pub parallel_tables: usize,

    /// Probe the target row count after each imported batch.
    #[serde(default)]
    pub validate_each_batch: bool,

    /// Record per-record failures and keep going instead of aborting.
    #[serde(default)]
    pub continue_on_error: bool,

    /// Compress the serialized export payload and report sizes.
    #[serde(default)]
    pub compression_enabled: bool,

    /// Maximum retries for a transiently failing write.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds; doubles per retry.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            parallel_tables: default_parallel_tables(),
            validate_each_batch: false,
            continue_on_error: false,
            compression_enabled: false,
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

// Default value functions for serde

fn default_postgres() -> String {
    "postgres".to_string()
}

fn default_oracle() -> String {
    "oracle".to_string()
}

fn default_localhost() -> String {
    "localhost".to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_oracle_port() -> u16 {
    1521
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_parallel_tables() -> usize {
    1
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_test_data_script() -> PathBuf {
    PathBuf::from("testdata/seed.sql")
}
