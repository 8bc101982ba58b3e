//! CLI command implementations

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::catalog::CatalogSnapshot;
use crate::cli::error::CliError;
use crate::config::EngineConfig;
use crate::database::{AnalyticsStore, DuckDbStore};

pub mod build;
pub mod init;
pub mod status;

/// Open the database configured for `workspace`
pub(crate) fn open_store(
    workspace: &Path,
    config: &EngineConfig,
) -> Result<Arc<dyn AnalyticsStore>, CliError> {
    let store = match config.get_duckdb_path(workspace) {
        Some(path) => {
            info!("Using database {}", path.display());
            DuckDbStore::new(&path)?
        }
        None => {
            info!("Using in-memory database");
            DuckDbStore::in_memory()?
        }
    };
    Ok(Arc::new(store))
}

/// Load the catalog snapshot named on the command line or in the config
///
/// Without either, the catalog is empty and tables only get the fixed
/// columns.
pub(crate) fn load_catalog(
    workspace: &Path,
    config: &EngineConfig,
    override_path: Option<&Path>,
) -> Result<CatalogSnapshot, CliError> {
    let path = match override_path {
        Some(path) => Some(path.to_path_buf()),
        None => config.get_catalog_path(workspace),
    };

    match path {
        Some(path) => {
            if !path.exists() {
                return Err(CliError::FileNotFound(path));
            }
            Ok(CatalogSnapshot::load(&path)?)
        }
        None => Ok(CatalogSnapshot::new()),
    }
}
