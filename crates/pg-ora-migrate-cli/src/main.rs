//! pg-ora-migrate CLI - Batch PostgreSQL to Oracle data migration.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use pg_ora_migrate::{
    BackupManager, Config, IntegrityValidator, Maintenance, MemoryDb, MigrateError,
    MigrationHistory, Orchestrator, PgSourcePool, Result, SourceConnection, TargetConnection,
    TestDataManager,
};
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "pg-ora-migrate")]
#[command(about = "Batch PostgreSQL to Oracle data migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schema migration scripts and data migration
    Migration {
        #[command(subcommand)]
        command: MigrationCommands,
    },

    /// Seed data management on the target
    TestData {
        #[command(subcommand)]
        command: TestDataCommands,
    },

    /// Target-side maintenance after a migration
    Maintenance {
        #[command(subcommand)]
        command: MaintenanceCommands,
    },

    /// Create, validate, or replay target backups
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },

    /// Compare row counts between source and target
    Validate,
}

#[derive(Subcommand)]
enum MigrationCommands {
    /// Apply pending schema scripts, then migrate table data
    Run {
        /// Only apply schema scripts, skip the data migration
        #[arg(long)]
        schema_only: bool,
    },

    /// Print the most recent successfully applied script
    Version,

    /// Print the full script execution history
    History,
}

#[derive(Subcommand)]
enum TestDataCommands {
    /// Execute the configured seed script
    Load,

    /// Delete all rows from the configured tables
    Clean,

    /// Check that every configured table has rows
    Validate,
}

#[derive(Subcommand)]
enum MaintenanceCommands {
    /// Refresh optimizer statistics for the configured tables
    Analyze,

    /// Refresh statistics for the whole schema
    UpdateStats,

    /// Rebuild target indexes
    RebuildIndexes,
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Snapshot the configured tables into a backup file
    Create {
        /// Backup file path
        path: PathBuf,

        /// Serialize table structure only, no data
        #[arg(long)]
        schema_only: bool,
    },

    /// Check a backup file against its sidecar metadata
    Validate {
        /// Backup file path
        path: PathBuf,
    },

    /// Replay a backup against the target
    Restore {
        /// Backup file path
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let output_json = cli.output_json;
    let progress = cli.progress;
    match cli.command {
        Commands::Migration { command } => {
            run_migration(output_json, progress, config, command).await
        }
        Commands::TestData { command } => run_test_data(output_json, config, command).await,
        Commands::Maintenance { command } => run_maintenance(output_json, config, command).await,
        Commands::Backup { command } => run_backup(output_json, config, command).await,
        Commands::Validate => run_validate(output_json, config).await,
    }
}

async fn run_migration(
    output_json: bool,
    progress: bool,
    config: Config,
    command: MigrationCommands,
) -> Result<()> {
    let target = connect_target(&config)?;

    match command {
        MigrationCommands::Run { schema_only } => {
            let history = MigrationHistory::new(Arc::clone(&target));
            let scripts = history.run_scripts(&config.scripts_dir).await?;
            if !scripts.all_succeeded() {
                return Err(MigrateError::History(
                    "schema script run failed; see history for details".to_string(),
                ));
            }
            if !output_json {
                println!(
                    "Schema scripts: {} applied, {} already current",
                    scripts.executed.len(),
                    scripts.skipped.len()
                );
            }
            if schema_only {
                if output_json {
                    println!("{}", serde_json::to_string_pretty(&scripts)?);
                }
                return Ok(());
            }

            let source = connect_source(&config).await?;
            let tables = config.tables.clone();
            let mut orchestrator = Orchestrator::new(source, target, config);
            if progress {
                let (tx, mut rx) = tokio::sync::mpsc::channel(64);
                orchestrator = orchestrator.with_progress(tx);
                tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        if let Ok(line) = serde_json::to_string(&event) {
                            eprintln!("{line}");
                        }
                    }
                });
            }

            let summary = orchestrator.run(&tables).await?;
            if output_json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("\nMigration completed!");
                println!(
                    "  Tables: {}/{}",
                    summary.completed_tables,
                    summary.tables.len()
                );
                println!("  Rows: {}", summary.total_records);
                println!("  Duration: {:.2}s", summary.duration_ms as f64 / 1000.0);
                for outcome in summary.tables.iter().filter(|o| !o.success) {
                    println!(
                        "  Failed: {} ({})",
                        outcome.table,
                        outcome.error.as_deref().unwrap_or("validation mismatch")
                    );
                }
            }
            if !summary.success {
                return Err(MigrateError::Import {
                    table: String::new(),
                    message: format!("{} table(s) failed", summary.failed_tables),
                });
            }
            Ok(())
        }

        MigrationCommands::Version => {
            let history = MigrationHistory::new(target);
            let version = history.current_version().await?;
            match version {
                Some(v) => println!("{v}"),
                None => println!("No migrations applied"),
            }
            Ok(())
        }

        MigrationCommands::History => {
            let history = MigrationHistory::new(target);
            let records = history.history().await?;
            if output_json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No migrations applied");
            } else {
                for record in records {
                    println!(
                        "{}  {}  {}{}",
                        record.executed_at.format("%Y-%m-%d %H:%M:%S"),
                        if record.success { "OK    " } else { "FAILED" },
                        record.script_name,
                        record
                            .error_message
                            .map(|e| format!("  ({e})"))
                            .unwrap_or_default()
                    );
                }
            }
            Ok(())
        }
    }
}

async fn run_test_data(output_json: bool, config: Config, command: TestDataCommands) -> Result<()> {
    let target = connect_target(&config)?;
    let manager = TestDataManager::new(target);

    match command {
        TestDataCommands::Load => {
            let report = manager.load(&config.test_data_script).await?;
            if output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Loaded test data: {} statements, {} rows",
                    report.statements_executed, report.rows_affected
                );
            }
            Ok(())
        }
        TestDataCommands::Clean => {
            let report = manager.clean(&config.tables).await?;
            if output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Cleaned {} rows", report.rows_affected);
            }
            Ok(())
        }
        TestDataCommands::Validate => {
            let validation = manager.validate(&config.tables).await?;
            if output_json {
                println!("{}", serde_json::to_string_pretty(&validation)?);
            } else {
                for (table, count) in &validation.counts {
                    println!("  {table}: {count} rows");
                }
            }
            if !validation.is_valid {
                return Err(MigrateError::Validation(format!(
                    "empty tables: {}",
                    validation.empty_tables.join(", ")
                )));
            }
            Ok(())
        }
    }
}

async fn run_maintenance(output_json: bool, config: Config, command: MaintenanceCommands) -> Result<()> {
    let target = connect_target(&config)?;
    let maintenance = Maintenance::new(target);

    let report = match command {
        MaintenanceCommands::Analyze => maintenance.analyze_tables(&config.tables).await?,
        MaintenanceCommands::UpdateStats => maintenance.update_statistics().await?,
        MaintenanceCommands::RebuildIndexes => {
            maintenance.rebuild_indexes(&config.tables).await?
        }
    };

    if output_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{}: {} statement(s) in {}ms",
            report.operation,
            report.statements.len(),
            report.duration_ms
        );
    }
    Ok(())
}

async fn run_backup(output_json: bool, config: Config, command: BackupCommands) -> Result<()> {
    let target = connect_target(&config)?;
    let manager = BackupManager::new(target, config.migration.clone());

    match command {
        BackupCommands::Create { path, schema_only } => {
            let result = manager
                .create_backup(&config.tables, &path, !schema_only)
                .await?;
            if output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "Backup written to {} ({} tables, {} rows, {} bytes)",
                    result.path.display(),
                    result.metadata.table_count,
                    result.metadata.total_records,
                    result.metadata.size_bytes
                );
            }
            Ok(())
        }
        BackupCommands::Validate { path } => {
            let validation = manager.validate_backup(&path)?;
            if output_json {
                println!("{}", serde_json::to_string_pretty(&validation)?);
            } else if validation.is_valid {
                println!("Backup is valid");
            } else {
                for issue in &validation.issues {
                    println!("  {issue}");
                }
            }
            if !validation.is_valid {
                return Err(MigrateError::Backup("backup failed validation".to_string()));
            }
            Ok(())
        }
        BackupCommands::Restore { path } => {
            let result = manager.restore_backup(&path).await?;
            if output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "Restored {} tables, {} rows ({} statements)",
                    result.tables_restored, result.rows_restored, result.executed_statements
                );
            }
            if let Some(error) = result.error {
                return Err(MigrateError::Backup(error));
            }
            Ok(())
        }
    }
}

async fn run_validate(output_json: bool, config: Config) -> Result<()> {
    let source = connect_source(&config).await?;
    let target = connect_target(&config)?;
    let validator = IntegrityValidator::new(source, target);
    let comparison = validator.compare_counts(&config.tables).await?;

    if output_json {
        println!("{}", serde_json::to_string_pretty(&comparison)?);
    } else {
        for row in &comparison.tables {
            println!(
                "  {}: source={} target={} {}",
                row.table,
                row.source_count,
                row.target_count,
                if row.is_match { "OK" } else { "MISMATCH" }
            );
        }
        println!(
            "\n  Overall: {}",
            if comparison.summary.overall_match {
                "MATCH"
            } else {
                "MISMATCH"
            }
        );
    }
    if !comparison.summary.overall_match {
        return Err(MigrateError::Validation(
            "row counts do not match".to_string(),
        ));
    }
    Ok(())
}

/// Build the source connection named by the configuration.
async fn connect_source(config: &Config) -> Result<Arc<dyn SourceConnection>> {
    match config.source.r#type.as_str() {
        "postgres" => {
            let max_conns = config.migration.parallel_tables.max(1) * 2;
            Ok(Arc::new(
                PgSourcePool::connect(&config.source, max_conns).await?,
            ))
        }
        "memory" => Ok(Arc::new(MemoryDb::new())),
        other => Err(MigrateError::Config(format!(
            "Unsupported source type '{other}'. Valid options: postgres, memory"
        ))),
    }
}

/// Build the target connection named by the configuration.
///
/// Oracle connectivity goes through an external OCI bridge deployed next to
/// this tool; the in-process adapters cover testing and dry runs.
fn connect_target(config: &Config) -> Result<Arc<dyn TargetConnection>> {
    match config.target.r#type.as_str() {
        "memory" => Ok(Arc::new(MemoryDb::new())),
        other => Err(MigrateError::Config(format!(
            "No in-process driver for target type '{other}'. Valid options: memory"
        ))),
    }
}

fn setup_logging(verbosity: &str, format: &str) -> std::result::Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
