//! Engine configuration file support
//!
//! Handles parsing of `.analytics-tables.toml` configuration files and
//! environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::database::{DatabaseError, DatabaseResult, TableState};

/// Default database filename for DuckDB
pub const DEFAULT_DUCKDB_FILENAME: &str = ".analytics-tables.duckdb";

/// Default configuration filename
pub const CONFIG_FILENAME: &str = ".analytics-tables.toml";

/// Environment variable for the DuckDB path
pub const ENV_DB_PATH: &str = "ANALYTICS_TABLES_DB_PATH";

/// Environment variable for the worker pool size
pub const ENV_PARALLEL_JOBS: &str = "ANALYTICS_TABLES_PARALLEL_JOBS";

/// Database configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSection {
    /// Path to the DuckDB file (relative to the workspace, or absolute).
    /// Empty means an in-memory database.
    #[serde(default = "default_duckdb_path")]
    pub path: String,
}

fn default_duckdb_path() -> String {
    DEFAULT_DUCKDB_FILENAME.to_string()
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_duckdb_path(),
        }
    }
}

/// Build configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSection {
    /// Number of partitions populated concurrently
    #[serde(default = "default_parallel_jobs")]
    pub parallel_jobs: usize,

    /// Build different table types concurrently
    #[serde(default = "default_true")]
    pub parallel_table_types: bool,
}

fn default_parallel_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_true() -> bool {
    true
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            parallel_jobs: default_parallel_jobs(),
            parallel_table_types: true,
        }
    }
}

/// Aggregation level override for a set of data elements
///
/// Org unit level columns deeper than `level` are cleared for rows of the
/// listed data elements, so they only aggregate from `level` upwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationLevel {
    pub level: i32,
    #[serde(default)]
    pub data_elements: Vec<String>,
}

/// Post-processing configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostProcessingSection {
    /// Vacuum published partitions after a build
    #[serde(default = "default_true")]
    pub vacuum: bool,

    /// Aggregation level overrides
    #[serde(default)]
    pub aggregation_levels: Vec<AggregationLevel>,
}

impl Default for PostProcessingSection {
    fn default() -> Self {
        Self {
            vacuum: true,
            aggregation_levels: Vec::new(),
        }
    }
}

/// Catalog configuration section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSection {
    /// YAML or JSON catalog snapshot (relative to the workspace, or absolute)
    #[serde(default)]
    pub path: Option<String>,
}

/// Main configuration structure
///
/// Represents the `.analytics-tables.toml` configuration file format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSection,

    #[serde(default)]
    pub build: BuildSection,

    #[serde(default)]
    pub post_processing: PostProcessingSection,

    #[serde(default)]
    pub catalog: CatalogSection,
}

impl EngineConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for an in-memory database
    pub fn in_memory() -> Self {
        Self {
            database: DatabaseSection {
                path: String::new(),
            },
            ..Default::default()
        }
    }

    /// Load configuration from a workspace directory
    ///
    /// Looks for `.analytics-tables.toml` in the workspace directory.
    /// Falls back to defaults if not found.
    pub fn load(workspace_path: &Path) -> DatabaseResult<Self> {
        let config_path = workspace_path.join(CONFIG_FILENAME);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| DatabaseError::IoError(format!("Failed to read config: {}", e)))?;

            Self::parse(&content)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> DatabaseResult<Self> {
        toml::from_str(content)
            .map_err(|e| DatabaseError::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to a workspace directory
    pub fn save(&self, workspace_path: &Path) -> DatabaseResult<()> {
        let config_path = workspace_path.join(CONFIG_FILENAME);
        let content = self.to_toml()?;

        std::fs::write(&config_path, content)
            .map_err(|e| DatabaseError::IoError(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Convert configuration to TOML string
    pub fn to_toml(&self) -> DatabaseResult<String> {
        toml::to_string_pretty(self).map_err(|e| {
            DatabaseError::SerializationError(format!("Failed to serialize config: {}", e))
        })
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(ENV_DB_PATH) {
            self.database.path = path;
        }

        if let Ok(jobs) = std::env::var(ENV_PARALLEL_JOBS)
            && let Ok(jobs) = jobs.parse::<usize>()
            && jobs > 0
        {
            self.build.parallel_jobs = jobs;
        }
    }

    /// Get the DuckDB database path for a workspace, `None` for in-memory
    pub fn get_duckdb_path(&self, workspace_path: &Path) -> Option<PathBuf> {
        let path = Path::new(&self.database.path);
        if self.database.path.is_empty() {
            None
        } else if path.is_absolute() {
            Some(path.to_path_buf())
        } else {
            Some(workspace_path.join(path))
        }
    }

    /// Get the catalog snapshot path for a workspace
    pub fn get_catalog_path(&self, workspace_path: &Path) -> Option<PathBuf> {
        self.catalog.path.as_ref().map(|p| {
            let path = Path::new(p);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                workspace_path.join(path)
            }
        })
    }

    /// Check if configuration exists in a workspace
    pub fn exists(workspace_path: &Path) -> bool {
        workspace_path.join(CONFIG_FILENAME).exists()
    }
}

/// Settings of one table type build, resolved once when the build starts
///
/// Nothing here changes while the build runs; concurrent builds of
/// different table types each hold their own copy.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildSettings {
    pub parallel_jobs: usize,
    pub vacuum: bool,
    pub aggregation_levels: Vec<AggregationLevel>,
    /// Watermarks as persisted before this build
    pub state: TableState,
}

impl BuildSettings {
    pub fn resolve(config: &EngineConfig, state: TableState) -> Self {
        Self {
            parallel_jobs: config.build.parallel_jobs.max(1),
            vacuum: config.post_processing.vacuum,
            aggregation_levels: config.post_processing.aggregation_levels.clone(),
            state,
        }
    }
}

/// Generate a sample configuration file content
pub fn sample_config() -> &'static str {
    r#"# Analytics tables configuration

[database]
# Path to the DuckDB database file (relative to workspace, or absolute).
# Leave empty for an in-memory database.
path = ".analytics-tables.duckdb"

[build]
# Number of partitions populated concurrently
# parallel_jobs = 4

# Build different table types concurrently
parallel_table_types = true

[post_processing]
# Vacuum published partitions after each build
vacuum = true

# Limit aggregation of some data elements to an org unit level
# [[post_processing.aggregation_levels]]
# level = 2
# data_elements = ["fbfJHSPpUQD"]

[catalog]
# Dimension catalog snapshot (YAML or JSON)
# path = "catalog.yaml"
"#
}
