//! click-replicate CLI - Incremental ClickHouse table replication.

use clap::{Parser, Subcommand};
use click_replicate::error::EXIT_CANCELLED;
use click_replicate::{Config, ExtractionMode, Orchestrator, ReplicateError, TableOutcome};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "click-replicate")]
#[command(about = "Incremental ClickHouse table replication")]
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

    /// Seconds to wait for in-flight work after a shutdown signal (default: 60)
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replicate every selected table
    Run {
        /// Override source database
        #[arg(long)]
        source_database: Option<String>,

        /// Override destination database
        #[arg(long)]
        destination_database: Option<String>,

        /// Override rows per page
        #[arg(long)]
        page_size: Option<usize>,

        /// Override extraction mode
        #[arg(long, value_parser = ["paged", "cli"])]
        mode: Option<String>,
    },

    /// Validate row counts between source and destination
    Validate,

    /// Test warehouse connections
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

async fn run() -> Result<(), ReplicateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| ReplicateError::Config(e.to_string()))?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            source_database,
            destination_database,
            page_size,
            mode,
        } => {
            // Apply overrides
            if let Some(database) = source_database {
                config.source.database = database;
            }
            if let Some(database) = destination_database {
                config.destination.database = database;
            }
            if let Some(size) = page_size {
                config.replication.page_size = size;
            }
            if let Some(mode) = mode.as_deref() {
                config.replication.mode = match mode {
                    "cli" => ExtractionMode::Cli,
                    _ => ExtractionMode::Paged,
                };
            }

            let orchestrator = Orchestrator::new(config)?;
            setup_signal_handler(orchestrator.cancellation_token(), cli.shutdown_timeout);

            let result = orchestrator.run().await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("\nReplication completed!");
                println!("  Run ID: {}", result.run_id);
                println!("  Duration: {:.2}s", result.duration_seconds);
                println!(
                    "  Tables: {} replicated, {} skipped, {} failed (of {})",
                    result.tables_replicated,
                    result.tables_skipped,
                    result.tables_failed,
                    result.tables_total
                );
                println!("  Rows: {}", result.rows_loaded);
                for table in &result.tables {
                    if let TableOutcome::Skipped { reason } = &table.outcome {
                        println!("    skipped {}: {:?}", table.source_table, reason);
                    }
                }
                if !result.failed_tables.is_empty() {
                    println!("  Failed tables: {:?}", result.failed_tables);
                }
            }

            if !result.failed_tables.is_empty() {
                return Err(ReplicateError::transfer(
                    result.failed_tables.join(", "),
                    "one or more tables failed",
                ));
            }
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::new(config)?;
            setup_signal_handler(orchestrator.cancellation_token(), cli.shutdown_timeout);
            let reports = orchestrator.validate().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                println!("Validation Results:");
                for report in &reports {
                    let destination = report
                        .destination_rows
                        .map(|rows| rows.to_string())
                        .unwrap_or_else(|| "missing".to_string());
                    println!(
                        "  {} {} -> {}: source {}, destination {}",
                        if report.complete { "OK" } else { "INCOMPLETE" },
                        report.source_table,
                        report.destination_table,
                        report.source_rows,
                        destination
                    );
                }
            }

            let incomplete: Vec<&str> = reports
                .iter()
                .filter(|r| !r.complete)
                .map(|r| r.source_table.as_str())
                .collect();
            if !incomplete.is_empty() {
                return Err(ReplicateError::transfer(
                    incomplete.join(", "),
                    "destination is incomplete",
                ));
            }
            println!("Validation completed successfully");
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config)?;
            let result = orchestrator.health_check().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source ({}): {} ({}ms)",
                    result.source_endpoint,
                    if result.source_ok { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Destination ({}): {} ({}ms)",
                    result.destination_endpoint,
                    if result.destination_ok { "OK" } else { "FAILED" },
                    result.destination_latency_ms
                );
                if let Some(ref err) = result.destination_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(ReplicateError::connection(
                    "health-check",
                    "one or more endpoints are unreachable",
                ));
            }
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };

    // RUST_LOG wins over --verbosity when set.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().try_init().map_err(|e| e.to_string())
    } else {
        subscriber.try_init().map_err(|e| e.to_string())
    }
}

/// Cancel `token` on SIGINT or SIGTERM.
///
/// The process exits with the cancellation code if the run has not wound
/// down `shutdown_timeout` seconds after the signal.
#[cfg(unix)]
fn setup_signal_handler(token: CancellationToken, shutdown_timeout: u64) {
    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(signal = name, error = %e, "failed to install signal handler");
                    return;
                }
            };
            stream.recv().await;
            eprintln!(
                "\nReceived {}. Shutting down gracefully (timeout: {}s)...",
                name, shutdown_timeout
            );
            token.cancel();
            force_exit_after(shutdown_timeout).await;
        });
    }
}

/// Cancel `token` on Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler(token: CancellationToken, shutdown_timeout: u64) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl-C handler");
            return;
        }
        eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
        token.cancel();
        force_exit_after(shutdown_timeout).await;
    });
}

async fn force_exit_after(shutdown_timeout: u64) {
    tokio::time::sleep(Duration::from_secs(shutdown_timeout)).await;
    eprintln!("Shutdown timeout elapsed, exiting");
    std::process::exit(i32::from(EXIT_CANCELLED));
}
