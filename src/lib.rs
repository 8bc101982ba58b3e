//! Analytics tables - build engine for partitioned analytics tables
//!
//! Materializes normalized registration records into denormalized,
//! year-partitioned tables that analytical queries read through one master
//! view. Provides:
//! - Full rebuilds, optionally restricted to recent years
//! - Incremental updates of a `latest` partition from a watermark
//! - Staging, validation and atomic publishing of each partition
//! - Asynchronous post-processing (vacuum, aggregation levels)
//! - An embedded DuckDB store and a file-based configuration

pub mod catalog;
pub mod config;
pub mod database;
pub mod manager;
pub mod postprocess;
pub mod service;
pub mod table;

#[cfg(feature = "cli")]
pub mod cli;

// Re-export commonly used types
pub use catalog::{CatalogError, CatalogSnapshot, Dimension, DimensionCatalog, OrgUnitLevel};
pub use config::{BuildSettings, EngineConfig};
pub use database::{
    AnalyticsStore, DatabaseError, DatabaseResult, DuckDbStore, QueryResult, StateRepository,
    TableState,
};
pub use manager::{CompletenessTableManager, TableColumns, TableManager, UpdateWindow};
pub use postprocess::{PostProcessError, PostProcessHandle, PostProcessScheduler, PostProcessTask};
pub use service::{
    AnalyticsTableService, BuildError, BuildResult, PartitionOutcome, TableBuilder, UpdateReport,
};
pub use table::{
    AnalyticsTable, AnalyticsTableColumn, AnalyticsTablePartition, AnalyticsTableType,
    AnalyticsTableUpdateParams, ColumnDataType, ConfigurationError,
};
