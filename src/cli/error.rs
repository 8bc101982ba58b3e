//! CLI-specific error types

use std::path::PathBuf;
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::database::DatabaseError;
use crate::service::BuildError;
use crate::table::ConfigurationError;

/// CLI-specific error type
#[derive(Error, Debug)]
pub enum CliError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to write file {0}: {1}")]
    FileWriteError(PathBuf, String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    #[error("Catalog error: {0}")]
    CatalogError(#[from] CatalogError),

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),

    #[error("Build error: {0}")]
    BuildError(#[from] BuildError),

    #[error("{0} table type(s) failed to update")]
    UpdateFailed(usize),
}
