//! Analytics table status command
//!
//! Lists the persisted watermarks and the production partitions of every
//! table type.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;

use crate::catalog::CatalogSnapshot;
use crate::cli::commands::open_store;
use crate::cli::error::CliError;
use crate::config::EngineConfig;
use crate::database::{OutputFormat, QueryResult, format_query_result};
use crate::manager::CompletenessTableManager;
use crate::service::{AnalyticsTableService, TableStatus};
use crate::table::sql::long_date_string;

/// Status command arguments
#[derive(Debug, Clone)]
pub struct StatusArgs {
    /// Workspace path
    pub workspace: PathBuf,
    /// Output format (table, json, csv)
    pub format: String,
}

/// Print the status of the analytics tables
pub fn handle_status(args: &StatusArgs) -> Result<(), CliError> {
    let output_format: OutputFormat = args
        .format
        .parse()
        .map_err(|e: String| CliError::InvalidArgument(e))?;

    let config = EngineConfig::load(&args.workspace)?;
    let store = open_store(&args.workspace, &config)?;
    store.initialize()?;

    // Status only reads production tables, the catalog is not consulted
    let service = AnalyticsTableService::new(store.clone(), config)?.with_manager(Arc::new(
        CompletenessTableManager::new(store.clone(), Arc::new(CatalogSnapshot::new())),
    ));

    let result = status_result(&service.status()?);
    println!("{}", format_query_result(&result, output_format));

    Ok(())
}

/// One row per production partition, or per table type without any
fn status_result(statuses: &[TableStatus]) -> QueryResult {
    let columns = vec![
        "table_type".to_string(),
        "last_full_update".to_string(),
        "last_latest_update".to_string(),
        "partition".to_string(),
        "rows".to_string(),
    ];

    let mut rows = Vec::new();
    for status in statuses {
        let full = status.state.last_full_update.as_ref().map(long_date_string);
        let latest = status.state.last_latest_update.as_ref().map(long_date_string);
        let row = |partition: Option<&String>, count: Option<i64>| {
            let mut row = serde_json::Map::new();
            row.insert("table_type".to_string(), json!(status.state.table_type));
            row.insert("last_full_update".to_string(), json!(full));
            row.insert("last_latest_update".to_string(), json!(latest));
            row.insert("partition".to_string(), json!(partition));
            row.insert("rows".to_string(), json!(count));
            serde_json::Value::Object(row)
        };

        if status.partitions.is_empty() {
            rows.push(row(None, None));
        }
        for (name, count) in &status.partitions {
            rows.push(row(Some(name), Some(*count)));
        }
    }

    QueryResult::new(columns, rows)
}
