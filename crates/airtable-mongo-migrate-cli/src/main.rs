//! airtable-mongo-migrate CLI - Airtable to MongoDB migration.

use airtable_mongo_migrate::{
    Config, MappingCheck, MigrateError, MigrationRun, Orchestrator, RunStatus,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "airtable-mongo-migrate")]
#[command(about = "Migrate an Airtable base into MongoDB collections")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Where to write the run report (default: migration_report_<timestamp>.json)
    #[arg(long)]
    report_file: Option<PathBuf>,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new migration
    Run {
        /// Comma-separated tables to migrate (default: all declared tables)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
    },

    /// Migrate more tables, linking into documents written by earlier runs
    Resume {
        /// Comma-separated tables to migrate (default: all declared tables)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
    },

    /// Compare mapping rules with the fields present in the source
    CheckMapping {
        /// Table to check (default: every declared table)
        #[arg(long)]
        table: Option<String>,
    },

    /// Test source and destination connections
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

    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Run { tables } => {
            migrate(config, &tables, false, cli.output_json, cli.report_file.as_deref()).await?;
        }

        Commands::Resume { tables } => {
            migrate(config, &tables, true, cli.output_json, cli.report_file.as_deref()).await?;
        }

        Commands::CheckMapping { table } => {
            let tables = match table {
                Some(t) => vec![t],
                None => config.migration.table_names(),
            };
            let orchestrator = Orchestrator::from_config(config).await?;

            let mut checks = Vec::with_capacity(tables.len());
            for table in &tables {
                checks.push(orchestrator.check_mapping(table).await?);
            }

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&checks)?);
            } else {
                for check in &checks {
                    print_mapping_check(check);
                }
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::from_config(config).await?;
            let result = orchestrator.health_check().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (Airtable): {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target (MongoDB): {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\nOverall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::Setup("Health check failed".to_string()));
            }
        }
    }

    Ok(())
}

/// Run or resume a migration, print the outcome and save the report.
async fn migrate(
    config: Config,
    tables: &[String],
    resume: bool,
    output_json: bool,
    report_file: Option<&Path>,
) -> Result<(), MigrateError> {
    let cancel = setup_signal_handler()?;
    let orchestrator = Orchestrator::from_config(config).await?;

    let run = orchestrator.run_migration(tables, resume, cancel).await?;

    let report_path = report_file
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(run.default_file_name()));
    run.save(&report_path)?;
    info!("Report written to {}", report_path.display());

    if output_json {
        println!("{}", run.to_json()?);
    } else {
        print_run_summary(&run, &report_path);
    }

    match run.status {
        RunStatus::Aborted => Err(MigrateError::Setup(
            run.error.unwrap_or_else(|| "run aborted".to_string()),
        )),
        RunStatus::Cancelled => Err(MigrateError::Cancelled),
        _ => Ok(()),
    }
}

fn print_run_summary(run: &MigrationRun, report_path: &Path) {
    let summary = run.summary();
    let headline = match run.status {
        RunStatus::Done if run.resumed => "Migration resumed and completed!",
        RunStatus::Done => "Migration completed!",
        RunStatus::Cancelled => "Migration cancelled.",
        _ => "Migration aborted.",
    };

    println!("\n{}", headline);
    println!("  Run ID: {}", run.run_id);
    if let Some(secs) = run.duration_seconds() {
        println!("  Duration: {:.2}s", secs);
    }
    println!(
        "  Tables: {}/{}",
        summary.tables_completed, summary.tables_total
    );
    println!(
        "  Records: {} extracted, {} written, {} skipped",
        summary.records_extracted, summary.records_written, summary.records_skipped
    );
    if !summary.anomalies_by_kind.is_empty() {
        println!("  Anomalies:");
        for (kind, count) in &summary.anomalies_by_kind {
            println!("    {}: {}", kind, count);
        }
    }
    if !summary.failed_tables.is_empty() {
        println!("  Failed tables: {:?}", summary.failed_tables);
    }
    if let Some(ref err) = run.error {
        println!("  Error: {}", err);
    }
    println!("  Report: {}", report_path.display());
}

fn print_mapping_check(check: &MappingCheck) {
    println!(
        "{}: {}",
        check.table,
        if check.is_complete() { "OK" } else { "INCOMPLETE" }
    );
    println!("  Covered fields: {}", check.covered.len());
    for field in &check.uncovered {
        println!("  ✗ No rule for: {}", field);
    }
    for field in &check.unseen_rules {
        println!("  ? Rule field not seen in sample: {}", field);
    }
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
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// The in-flight write completes; no new records or tables are started.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token_int = cancel_token.clone();
    tokio::spawn(async move {
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Finishing the current record and stopping...");
        token_int.cancel();
    });

    let token_term = cancel_token.clone();
    tokio::spawn(async move {
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Finishing the current record and stopping...");
        token_term.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing the current record and stopping...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
