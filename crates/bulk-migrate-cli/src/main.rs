//! bulk-migrate CLI - dependency-ordered import into PostgreSQL.

use std::path::PathBuf;
use std::process::ExitCode;

use bulk_migrate::{builtin_registry, Config, Executor, HealthCheckResult, MigrateError};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "bulk-migrate")]
#[command(about = "Dependency-ordered bulk import into PostgreSQL")]
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

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the import
    Import {
        /// Steps to leave out (comma separated)
        #[arg(long, value_delimiter = ',')]
        skip: Vec<String>,

        /// Run only these steps and their dependencies (comma separated)
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        /// Override rows per COPY transaction
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// List the import steps in execution order
    ListSteps,

    /// Test the staging, mapping, upload and target stores
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

    // Listing steps needs no configuration
    if let Commands::ListSteps = cli.command {
        return list_steps(cli.output_json);
    }

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::ListSteps => unreachable!(), // Handled above
        Commands::Import {
            skip,
            only,
            batch_size,
        } => {
            // Apply overrides
            if !skip.is_empty() {
                config.import.skip = skip;
            }
            if !only.is_empty() {
                config.import.only = only;
            }
            if let Some(size) = batch_size {
                config.import.batch_size = size;
            }
            config.validate()?;

            let executor = Executor::new(config, builtin_registry()).with_progress(!cli.output_json);
            let result = executor.run().await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("\nImport completed!");
                println!("  Run ID: {}", result.run_id);
                println!("  Duration: {}", result.duration());
                println!("  Steps: {}", result.steps.len());
                for step in &result.steps {
                    println!(
                        "    {}: {} inserted, {} skipped, {} mapped ({:.2}s)",
                        step.name, step.inserted, step.skipped, step.mapped, step.duration_seconds
                    );
                }
                println!("  Rows: {}", result.rows_inserted());
            }
        }

        Commands::HealthCheck => {
            let executor = Executor::new(config, builtin_registry());
            let result = executor.health_check().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_health(&result);
            }

            if !result.healthy {
                return Err(MigrateError::Store("Health check failed".to_string()));
            }
        }
    }

    Ok(())
}

fn list_steps(output_json: bool) -> Result<(), MigrateError> {
    let registry = builtin_registry();
    let steps = registry.sorted(&[], &[])?;

    if output_json {
        println!("{}", serde_json::to_string_pretty(&steps)?);
        return Ok(());
    }

    for (idx, step) in steps.iter().enumerate() {
        let dependencies = step.dependencies();
        if dependencies.is_empty() {
            println!("{:>2}. {}", idx + 1, step.name());
        } else {
            println!(
                "{:>2}. {} (after {})",
                idx + 1,
                step.name(),
                dependencies.join(", ")
            );
        }
    }
    Ok(())
}

fn print_health(result: &HealthCheckResult) {
    println!("Health Check Results:");
    for (label, store) in [
        ("Staging (SQLite)", &result.staging),
        ("Mappings (SQLite)", &result.mappings),
        ("Uploads (SQLite)", &result.uploads),
        ("Target (PostgreSQL)", &result.target),
    ] {
        println!(
            "  {}: {} ({}ms)",
            label,
            if store.ok { "OK" } else { "FAILED" },
            store.latency_ms
        );
        if let Some(ref err) = store.error {
            println!("    Error: {}", err);
        }
    }
    println!(
        "\n  Overall: {}",
        if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
    );
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so that stdout stays parseable with --output-json
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
