//! Analytics table model
//!
//! Columns, tables, partitions and update parameters, plus the SQL text
//! helpers every table manager shares.

pub mod column;
pub mod params;
pub mod partition;
pub mod sql;

pub use column::{
    AnalyticsTableColumn, CHARACTER_11, ColumnDataType, ColumnNotNullConstraint, PERIOD_TYPES,
    validate_dimension_columns,
};
pub use params::{AnalyticsTableUpdateParams, AnalyticsTableUpdateParamsBuilder};
pub use partition::{AnalyticsTable, AnalyticsTablePartition, AnalyticsTableType, PartitionKey};

use serde::{Deserialize, Serialize};

/// Configuration problems that make a table type unbuildable
///
/// These are fatal for the current build of the affected table type and
/// are never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ConfigurationError {
    /// Two dimension columns resolve to the same name
    #[error("Duplicate dimension column name: {0}")]
    DuplicateColumn(String),

    /// A dimension identifier is not safe to use as a column name
    #[error("Invalid dimension identifier: {0}")]
    InvalidIdentifier(String),

    /// A dimension referenced by the table could not be resolved
    #[error("Unresolved dimension: {0}")]
    UnresolvedDimension(String),

    /// A partition was planned twice
    #[error("Duplicate partition: {0}")]
    DuplicatePartition(String),

    /// A partition year outside the representable date range
    #[error("Invalid partition year: {0}")]
    InvalidPartitionYear(i32),
}
