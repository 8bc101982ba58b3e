//! CLI binary entry point for analytics-tables

#[cfg(feature = "cli")]
use analytics_tables::cli::commands::build::{BuildArgs, handle_build};
#[cfg(feature = "cli")]
use analytics_tables::cli::commands::init::{InitArgs, handle_init};
#[cfg(feature = "cli")]
use analytics_tables::cli::commands::status::{StatusArgs, handle_status};
#[cfg(feature = "cli")]
use analytics_tables::table::AnalyticsTableType;
#[cfg(feature = "cli")]
use anyhow::Context;
#[cfg(feature = "cli")]
use chrono::NaiveDate;
#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use std::path::PathBuf;
#[cfg(feature = "cli")]
use tracing_subscriber::EnvFilter;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "analytics-tables")]
#[command(about = "Build partitioned analytics tables from registration data")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Create the configuration, source tables and resource tables
    Init {
        /// Workspace path
        #[arg(default_value = ".")]
        workspace: PathBuf,
        /// Dimension catalog snapshot (YAML or JSON)
        #[arg(short, long)]
        catalog: Option<PathBuf>,
    },

    /// Build or incrementally update the analytics tables
    Build {
        /// Workspace path
        #[arg(default_value = ".")]
        workspace: PathBuf,
        /// Dimension catalog snapshot (YAML or JSON)
        #[arg(short, long)]
        catalog: Option<PathBuf>,
        /// Only apply data changed since the last update
        #[arg(long)]
        latest: bool,
        /// Only rebuild data from this date on (YYYY-MM-DD)
        #[arg(long, conflicts_with = "last_years")]
        from_date: Option<NaiveDate>,
        /// Only rebuild this many most recent years
        #[arg(long)]
        last_years: Option<u32>,
        /// Table types to skip, e.g. COMPLETENESS
        #[arg(long, value_delimiter = ',')]
        skip: Vec<AnalyticsTableType>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show watermarks and production partitions
    Status {
        /// Workspace path
        #[arg(default_value = ".")]
        workspace: PathBuf,
        /// Output format (table, json, csv)
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

#[cfg(feature = "cli")]
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result: anyhow::Result<()> = match cli.command {
        Commands::Init { workspace, catalog } => {
            handle_init(&InitArgs { workspace, catalog }).context("Initialization failed")
        }
        Commands::Build {
            workspace,
            catalog,
            latest,
            from_date,
            last_years,
            skip,
            json,
        } => handle_build(&BuildArgs {
            workspace,
            catalog,
            latest,
            from_date,
            last_years,
            skip,
            json,
        })
        .context("Build failed"),
        Commands::Status { workspace, format } => {
            handle_status(&StatusArgs { workspace, format }).context("Status failed")
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature is not enabled. Build with --features cli");
    std::process::exit(1);
}
