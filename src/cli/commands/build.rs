//! Analytics table build command

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::warn;

use crate::cli::commands::{load_catalog, open_store};
use crate::cli::error::CliError;
use crate::config::EngineConfig;
use crate::manager::CompletenessTableManager;
use crate::service::{AnalyticsTableService, UpdateReport};
use crate::table::{AnalyticsTableType, AnalyticsTableUpdateParams};

/// Build command arguments
#[derive(Debug, Clone, Default)]
pub struct BuildArgs {
    /// Workspace path
    pub workspace: PathBuf,
    /// Catalog snapshot overriding the configured one
    pub catalog: Option<PathBuf>,
    /// Incremental update of the latest partition
    pub latest: bool,
    /// Only rebuild data from this date on
    pub from_date: Option<NaiveDate>,
    /// Only rebuild the given number of most recent years
    pub last_years: Option<u32>,
    /// Table types to leave untouched
    pub skip: Vec<AnalyticsTableType>,
    /// Print the report as JSON
    pub json: bool,
}

impl BuildArgs {
    fn update_params(&self) -> Result<AnalyticsTableUpdateParams, CliError> {
        if self.latest && (self.from_date.is_some() || self.last_years.is_some()) {
            return Err(CliError::InvalidArgument(
                "--latest cannot be combined with --from-date or --last-years".to_string(),
            ));
        }

        if let Some(last_years) = self.last_years
            && (last_years == 0 || i32::try_from(last_years).is_err())
        {
            return Err(CliError::InvalidArgument(format!(
                "--last-years must be between 1 and {}, got {}",
                i32::MAX,
                last_years
            )));
        }

        let mut builder = AnalyticsTableUpdateParams::builder().latest_update(self.latest);
        if let Some(from_date) = self.from_date {
            builder = builder.from_date(from_date);
        }
        if let Some(last_years) = self.last_years {
            builder = builder.last_years(last_years);
        }
        for table_type in &self.skip {
            builder = builder.skip_table_type(*table_type);
        }
        Ok(builder.build())
    }
}

/// Build the analytics tables of the workspace
pub fn handle_build(args: &BuildArgs) -> Result<(), CliError> {
    let params = args.update_params()?;
    let workspace = &args.workspace;

    let config = EngineConfig::load(workspace)?;
    let catalog = Arc::new(load_catalog(workspace, &config, args.catalog.as_deref())?);
    let store = open_store(workspace, &config)?;
    store.initialize()?;

    let service = AnalyticsTableService::new(store.clone(), config)?.with_manager(Arc::new(
        CompletenessTableManager::new(store.clone(), catalog),
    ));

    let mut report = service.update(&params);

    for handle in report.take_post_processing() {
        if let Err(e) = handle.wait() {
            warn!("Post-processing failed: {}", e);
        }
    }

    if args.json {
        let output = serde_json::to_string_pretty(&report.to_json())
            .map_err(|e| CliError::InvalidArgument(format!("Failed to render report: {}", e)))?;
        println!("{}", output);
    } else {
        print_report(&report);
    }

    let failed = report
        .results
        .iter()
        .filter(|(_, result)| match result {
            Ok(result) => result.is_partial_failure(),
            Err(_) => true,
        })
        .count();

    if failed > 0 {
        return Err(CliError::UpdateFailed(failed));
    }

    Ok(())
}

fn print_report(report: &UpdateReport) {
    for table_type in &report.skipped_types {
        println!("{}: skipped by request", table_type);
    }

    for (table_type, result) in &report.results {
        match result {
            Err(e) => println!("{}: failed: {}", table_type, e),
            Ok(result) => {
                if let Some(reason) = &result.skipped_reason {
                    println!("{}: {}", table_type, reason);
                    continue;
                }
                for table in &result.tables_built {
                    println!(
                        "{}: {} rows published to {}",
                        table_type,
                        table.rows_published(),
                        table.table_name
                    );
                    for partition in &table.partitions {
                        println!("  {} {:?}", partition.name, partition.outcome);
                    }
                }
            }
        }
    }
}
