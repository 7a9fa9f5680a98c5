//! sqlite-pg-migrate CLI - SQLite to PostgreSQL migration.

use clap::{Parser, Subcommand};
use sqlite_pg_migrate::{Config, MigrateError, MigrationRunner};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "sqlite-pg-migrate")]
#[command(about = "SQLite to PostgreSQL schema and data migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Path to the source SQLite database (overrides source.path)
    #[arg(long, global = true)]
    source: Option<String>,

    /// Target PostgreSQL URL (overrides the target connection settings)
    #[arg(long, global = true)]
    target: Option<String>,

    /// Output JSON result to stdout
    #[arg(long, global = true)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info", global = true)]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate every selected table
    Run {
        /// Dry run: show the planned tables and DDL without touching the target
        #[arg(long)]
        dry_run: bool,

        /// Override rows per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override rows sampled per table for type inference
        #[arg(long)]
        sample_size: Option<usize>,

        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,
    },

    /// Validate row counts between source and target
    Validate,

    /// Test database connections
    HealthCheck,
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

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = load_config(&cli.config, cli.source.as_deref(), cli.target.as_deref())?;

    match cli.command {
        Commands::Run {
            dry_run,
            batch_size,
            sample_size,
            target_schema,
        } => {
            if let Some(n) = batch_size {
                config.migration.batch_size = n;
            }
            if let Some(n) = sample_size {
                config.migration.sample_size = n;
            }
            if let Some(schema) = target_schema {
                config.target.schema = schema;
            }
            config.validate()?;

            if dry_run {
                let plan = MigrationRunner::dry_run(&config).await?;
                if cli.output_json {
                    println!("{}", plan.to_json()?);
                } else {
                    println!("Dry run: {} table(s) into schema {}", plan.tables.len(), plan.schema);
                    for table in &plan.tables {
                        println!(
                            "\n-- {} -> {} ({} rows)\n{};",
                            table.table_name, table.target_name, table.row_count, table.ddl
                        );
                    }
                }
                return Ok(());
            }

            let cancel_token = setup_signal_handler();
            let runner = MigrationRunner::connect(config).await?;
            let report = runner.run(cancel_token).await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                println!("\nMigration {}!", report.status);
                println!("  Run ID: {}", report.run_id);
                println!("  Duration: {:.2}s", report.duration_seconds);
                println!(
                    "  Tables: {} migrated, {} skipped, {} failed (of {})",
                    report.tables_migrated,
                    report.tables_skipped,
                    report.tables_failed,
                    report.tables_total
                );
                println!("  Rows: {}", report.rows_migrated);
                println!("  Throughput: {} rows/sec", report.rows_per_second);
                for table in report.tables.iter().filter(|t| t.error.is_some()) {
                    println!(
                        "  Failed: {}: {}",
                        table.table_name,
                        table.error.as_deref().unwrap_or_default()
                    );
                }
            }

            if let Some(e) = report.error() {
                return Err(e);
            }
        }

        Commands::Validate => {
            let runner = MigrationRunner::connect(config).await?;
            let report = runner.validate().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for table in &report.tables {
                    let target = table
                        .target_rows
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "missing".to_string());
                    println!(
                        "  {:<32} source={:<10} target={:<10} {}",
                        table.table_name,
                        table.source_rows,
                        target,
                        if table.matches { "OK" } else { "MISMATCH" }
                    );
                }
            }

            if !report.is_valid() {
                let mismatched = report
                    .tables
                    .iter()
                    .filter(|t| !t.matches)
                    .map(|t| t.table_name.clone())
                    .collect();
                return Err(MigrateError::TablesFailed(mismatched));
            }
            println!("Validation completed successfully");
        }

        Commands::HealthCheck => {
            let result = MigrationRunner::health_check(&config).await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (SQLite): {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target (PostgreSQL): {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::connection(
                    config.target.endpoint(),
                    "health check failed",
                ));
            }
        }
    }

    Ok(())
}

/// Configuration from the YAML file, with `--source`/`--target` applied.
///
/// When both flags are given and the file does not exist, the flags alone
/// make up the configuration.
fn load_config(
    path: &Path,
    source: Option<&str>,
    target: Option<&str>,
) -> Result<Config, MigrateError> {
    if let (Some(source), Some(target), false) = (source, target, path.exists()) {
        info!("No configuration file at {:?}, using --source and --target", path);
        return Config::from_parts(source, target);
    }

    let mut config = Config::load(path)?;
    info!("Loaded configuration from {:?}", path);
    if let Some(source) = source {
        config.source.path = source.to_string();
    }
    if let Some(target) = target {
        config.target.url = Some(target.to_string());
    }
    config.validate()?;
    Ok(config)
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the run on SIGINT or SIGTERM. The table in flight still finishes.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Stopping after the current table...", name);
                    token.cancel();
                });
            }
            Err(e) => warn!("Could not install {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Cancel the run on Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current table...");
            token.cancel();
        }
    });

    cancel_token
}
