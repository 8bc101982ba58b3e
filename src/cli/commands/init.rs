//! Workspace initialization command
//!
//! Writes a sample configuration when none exists, then creates the engine
//! tables, the normalized source tables and the resource structure tables
//! for the configured catalog.

use std::path::PathBuf;

use tracing::info;

use crate::cli::commands::{load_catalog, open_store};
use crate::cli::error::CliError;
use crate::config::{CONFIG_FILENAME, EngineConfig, sample_config};
use crate::database::SourceSchema;

/// Init command arguments
#[derive(Debug, Clone)]
pub struct InitArgs {
    /// Workspace path
    pub workspace: PathBuf,
    /// Catalog snapshot overriding the configured one
    pub catalog: Option<PathBuf>,
}

/// Initialize the workspace database
pub fn handle_init(args: &InitArgs) -> Result<(), CliError> {
    let workspace = &args.workspace;
    if !workspace.is_dir() {
        return Err(CliError::FileNotFound(workspace.clone()));
    }

    if !EngineConfig::exists(workspace) {
        let config_path = workspace.join(CONFIG_FILENAME);
        std::fs::write(&config_path, sample_config())
            .map_err(|e| CliError::FileWriteError(config_path.clone(), e.to_string()))?;
        println!("Created {}", config_path.display());
    }

    let config = EngineConfig::load(workspace)?;
    let catalog = load_catalog(workspace, &config, args.catalog.as_deref())?;
    let store = open_store(workspace, &config)?;

    store.initialize()?;
    store.execute_batch(SourceSchema::create_tables_sql())?;
    store.execute_batch(&SourceSchema::create_resource_tables_sql(&catalog)?)?;
    info!("Workspace {} initialized", workspace.display());

    match config.get_duckdb_path(workspace) {
        Some(path) => println!("Initialized database {}", path.display()),
        None => println!("Initialized in-memory database"),
    }

    Ok(())
}
