//! Target-side backup and restore.
//!
//! A backup is a SQL statement stream (one `DELETE` plus the `INSERT`s per
//! table), optionally gzip-compressed, with a JSON sidecar at
//! `<path>.meta.json` carrying the metadata and a SHA-256 checksum of the
//! payload as written to disk. Restore validates the checksum, then replays
//! the statements against the target.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MigrationOptions;
use crate::core::{sql, TargetConnection};
use crate::error::{MigrateError, Result};
use crate::script::split_statements;

/// Current on-disk format version.
const FORMAT_VERSION: u32 = 1;

/// Sidecar metadata for one backup file. Enough to validate the backup
/// without parsing the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: Uuid,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub table_count: u64,
    pub total_records: u64,
    /// SHA-256 of the payload file as written (post-compression).
    pub checksum: String,
    pub includes_data: bool,
    pub compressed: bool,
    pub size_bytes: u64,
    /// Target server version at backup time.
    pub target_version: String,
    pub row_counts: HashMap<String, u64>,
}

/// Outcome of creating a backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupResult {
    pub metadata: BackupMetadata,
    pub path: PathBuf,
    pub duration_ms: u64,
}

/// Outcome of validating a backup against its sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupValidation {
    pub is_valid: bool,
    pub checksum_match: bool,
    pub issues: Vec<String>,
}

/// Outcome of replaying a backup. `executed_statements` counts only
/// statements that actually ran to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResult {
    pub tables_restored: u64,
    pub executed_statements: u64,
    pub rows_restored: u64,
    pub duration_ms: u64,
    pub success: bool,
    /// The failure that stopped the replay, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Creates, validates, and replays target-side backups.
pub struct BackupManager {
    target: Arc<dyn TargetConnection>,
    options: MigrationOptions,
}

impl BackupManager {
    pub fn new(target: Arc<dyn TargetConnection>, options: MigrationOptions) -> Self {
        Self { target, options }
    }

    /// Snapshot the named tables into `path`. The sidecar lands next to it.
    /// Table structure is always serialized; the rows only when
    /// `include_data` is set.
    pub async fn create_backup(
        &self,
        tables: &[String],
        path: &Path,
        include_data: bool,
    ) -> Result<BackupResult> {
        let started = Instant::now();
        let db = self.target.db_type();
        let mut payload = String::new();
        let mut row_counts = HashMap::new();

        for table in tables {
            let quoted = sql::quote_ident(db, table);
            let columns = self
                .target
                .describe_table(table)
                .await
                .map_err(|e| MigrateError::Backup(format!("structure of {table}: {e}")))?;
            let column_defs = columns
                .iter()
                .map(|c| {
                    let mut def = format!("{} {}", sql::quote_ident(db, &c.name), c.data_type);
                    if !c.is_nullable {
                        def.push_str(" NOT NULL");
                    }
                    def
                })
                .collect::<Vec<_>>()
                .join(", ");
            payload.push_str(&format!("CREATE TABLE {quoted} ({column_defs});\n"));
            if !include_data {
                debug!(table = %table, "structure snapshotted");
                row_counts.insert(table.clone(), 0);
                continue;
            }
            payload.push_str(&format!("DELETE FROM {quoted};\n"));

            let rows = self
                .target
                .query(&format!("SELECT * FROM {quoted} ORDER BY 1"), &[])
                .await
                .map_err(|e| MigrateError::Backup(format!("snapshot of {table}: {e}")))?;
            for row in &rows {
                let columns = row.column_names();
                let column_list = columns
                    .iter()
                    .map(|c| sql::quote_ident(db, c))
                    .collect::<Vec<_>>()
                    .join(", ");
                let values = columns
                    .iter()
                    .map(|c| {
                        row.get(c)
                            .map(crate::core::SqlValue::to_sql_literal)
                            .unwrap_or_else(|| "NULL".to_string())
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                payload.push_str(&format!(
                    "INSERT INTO {quoted} ({column_list}) VALUES ({values});\n"
                ));
            }
            debug!(table = %table, rows = rows.len(), "table snapshotted");
            row_counts.insert(table.clone(), rows.len() as u64);
        }

        let bytes = if self.options.compression_enabled {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(payload.as_bytes())?;
            encoder.finish()?
        } else {
            payload.into_bytes()
        };

        let checksum = hex::encode(Sha256::digest(&bytes));
        write_atomic(path, &bytes)?;

        let metadata = BackupMetadata {
            id: Uuid::new_v4(),
            version: FORMAT_VERSION,
            created_at: Utc::now(),
            table_count: tables.len() as u64,
            total_records: row_counts.values().sum(),
            checksum,
            includes_data: include_data,
            compressed: self.options.compression_enabled,
            size_bytes: bytes.len() as u64,
            target_version: self
                .target
                .server_version()
                .await
                .unwrap_or_else(|_| "unknown".to_string()),
            row_counts,
        };
        let sidecar = sidecar_path(path);
        write_atomic(&sidecar, serde_json::to_string_pretty(&metadata)?.as_bytes())?;

        info!(
            path = %path.display(),
            tables = tables.len(),
            bytes = metadata.size_bytes,
            compressed = metadata.compressed,
            "backup created"
        );
        Ok(BackupResult {
            metadata,
            path: path.to_path_buf(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Check a backup file against its sidecar without touching the target.
    pub fn validate_backup(&self, path: &Path) -> Result<BackupValidation> {
        let mut issues = Vec::new();

        let metadata = match read_metadata(path) {
            Ok(m) => m,
            Err(e) => {
                return Ok(BackupValidation {
                    is_valid: false,
                    checksum_match: false,
                    issues: vec![format!("Cannot read backup metadata: {e}")],
                })
            }
        };
        if metadata.version != FORMAT_VERSION {
            issues.push(format!("Unsupported backup format version {}", metadata.version));
        }

        let bytes = std::fs::read(path)?;
        if bytes.len() as u64 != metadata.size_bytes {
            issues.push(format!(
                "Backup size {} does not match recorded size {}",
                bytes.len(),
                metadata.size_bytes
            ));
        }

        let checksum_match = hex::encode(Sha256::digest(&bytes)) == metadata.checksum;
        if !checksum_match {
            issues.push("Checksum mismatch - backup may be corrupted".to_string());
        }

        let is_valid = issues.is_empty();
        if !is_valid {
            warn!(path = %path.display(), ?issues, "backup failed validation");
        }
        Ok(BackupValidation {
            is_valid,
            checksum_match,
            issues,
        })
    }

    /// Replay a backup against the target. Refuses to replay a backup that
    /// fails validation.
    pub async fn restore_backup(&self, path: &Path) -> Result<RestoreResult> {
        let started = Instant::now();
        let validation = self.validate_backup(path)?;
        if !validation.is_valid {
            return Err(MigrateError::Backup(format!(
                "refusing to restore {}: {}",
                path.display(),
                validation.issues.join("; ")
            )));
        }

        let metadata = read_metadata(path)?;
        let bytes = std::fs::read(path)?;
        let payload = if metadata.compressed {
            let mut decoder = GzDecoder::new(&bytes[..]);
            let mut text = String::new();
            decoder.read_to_string(&mut text)?;
            text
        } else {
            String::from_utf8(bytes)
                .map_err(|e| MigrateError::Backup(format!("backup is not valid UTF-8: {e}")))?
        };

        let mut rows_restored = 0u64;
        let mut executed_statements = 0u64;
        let mut error = None;
        for statement in split_statements(&payload) {
            match self.target.execute(&statement, &[]).await {
                Ok(affected) => {
                    executed_statements += 1;
                    if statement.trim_start().to_ascii_uppercase().starts_with("INSERT") {
                        rows_restored += affected;
                    }
                }
                Err(e) => {
                    error = Some(format!("restore statement failed: {e}"));
                    break;
                }
            }
        }
        if error.is_none() {
            if let Err(e) = self.target.commit().await {
                error = Some(format!("restore commit: {e}"));
            }
        } else {
            // Partial replays are rolled back; the count still reports what ran.
            let _ = self.target.rollback().await;
        }

        match &error {
            None => info!(
                path = %path.display(),
                tables = metadata.table_count,
                statements = executed_statements,
                rows = rows_restored,
                "backup restored"
            ),
            Some(e) => warn!(
                path = %path.display(),
                statements = executed_statements,
                error = %e,
                "restore aborted"
            ),
        }
        Ok(RestoreResult {
            tables_restored: metadata.table_count,
            executed_statements,
            rows_restored,
            duration_ms: started.elapsed().as_millis() as u64,
            success: error.is_none(),
            error,
        })
    }
}

/// Sidecar path for a backup file.
#[must_use]
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".meta.json");
    PathBuf::from(name)
}

fn read_metadata(path: &Path) -> Result<BackupMetadata> {
    let text = std::fs::read_to_string(sidecar_path(path))?;
    Ok(serde_json::from_str(&text)?)
}

/// Write-then-rename so a crash never leaves a truncated file behind.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
