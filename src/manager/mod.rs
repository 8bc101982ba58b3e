//! Table managers
//!
//! A [`TableManager`] knows how one analytic subject area is shaped and
//! filled: which columns it has, which years hold data, and how a partition
//! is populated from the source tables. The orchestration that turns those
//! answers into published tables is shared and lives in
//! [`crate::service::TableBuilder`].

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::config::AggregationLevel;
use crate::database::{AnalyticsStore, DatabaseResult};
use crate::postprocess::{PostProcessHandle, PostProcessScheduler, PostProcessTask};
use crate::service::BuildError;
use crate::table::sql::quote_alias;
use crate::table::{
    AnalyticsTable, AnalyticsTableColumn, AnalyticsTablePartition, AnalyticsTableType,
    AnalyticsTableUpdateParams, ColumnDataType, PERIOD_TYPES,
};

pub mod completeness;
pub mod populator;

pub use completeness::CompletenessTableManager;
pub use populator::{InsertStatement, PartitionPopulator};

/// Resolved columns of an analytics table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableColumns {
    pub dimension_columns: Vec<AnalyticsTableColumn>,
    pub value_columns: Vec<AnalyticsTableColumn>,
}

/// Half-open time window `[start, end)` of an incremental update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// One analytic subject area
///
/// Implementations hold their own handle to the store and the catalog.
/// All methods are called from the build thread except
/// [`populate_partition`](Self::populate_partition), which runs on the
/// worker pool, once per partition and concurrently.
pub trait TableManager: Send + Sync {
    fn table_type(&self) -> AnalyticsTableType;

    /// `Some(reason)` when there is nothing to build
    fn valid_state(&self) -> DatabaseResult<Option<String>>;

    /// Dimension and value columns from the current catalog state
    fn resolve_columns(&self) -> Result<TableColumns, BuildError>;

    /// Distinct years of source data before the cutoff, ascending
    fn data_years(&self, params: &AnalyticsTableUpdateParams) -> DatabaseResult<Vec<i32>>;

    /// Plan the partitions of this build
    ///
    /// Full builds get one partition per data year; incremental builds get
    /// the latest partition covering `window`.
    fn plan_partitions(
        &self,
        params: &AnalyticsTableUpdateParams,
        columns: TableColumns,
        window: Option<UpdateWindow>,
    ) -> Result<AnalyticsTable, BuildError> {
        let mut table = AnalyticsTable::new(
            self.table_type(),
            columns.dimension_columns,
            columns.value_columns,
        );

        match window {
            Some(window) => {
                table.add_latest_partition(window.start, window.end)?;
            }
            None => {
                for year in self.data_years(params)? {
                    table.add_partition(year)?;
                }
            }
        }

        Ok(table)
    }

    /// Check constraints every row of the partition must satisfy
    fn partition_checks(&self, partition: &AnalyticsTablePartition) -> Vec<String>;

    /// Whether any source record changed inside `window`
    fn has_updated_latest_data(&self, window: UpdateWindow) -> DatabaseResult<bool>;

    /// Delete rows of `production_table` whose source records changed in
    /// `window`, returning the number of deleted rows
    fn remove_updated_data(
        &self,
        production_table: &str,
        window: UpdateWindow,
    ) -> DatabaseResult<usize>;

    /// Fill the staging table of `partition`, returning the rows written
    fn populate_partition(
        &self,
        params: &AnalyticsTableUpdateParams,
        table: &AnalyticsTable,
        partition: &AnalyticsTablePartition,
    ) -> DatabaseResult<usize>;

    /// Queue aggregation level overrides for the published partitions
    fn apply_aggregation_levels(
        &self,
        scheduler: &PostProcessScheduler,
        partitions: &[String],
        levels: &[AggregationLevel],
    ) -> Vec<PostProcessHandle> {
        levels
            .iter()
            .map(|level| {
                scheduler.submit(PostProcessTask::AggregationLevels {
                    partitions: partitions.to_vec(),
                    data_elements: level.data_elements.clone(),
                    level: level.level,
                })
            })
            .collect()
    }

    /// Queue a vacuum of the published partitions
    fn vacuum_tables(
        &self,
        scheduler: &PostProcessScheduler,
        partitions: &[String],
    ) -> PostProcessHandle {
        scheduler.submit(PostProcessTask::Vacuum {
            partitions: partitions.to_vec(),
        })
    }
}

/// Org unit levels that have at least one organisation unit
pub fn filled_org_unit_levels(store: &dyn AnalyticsStore) -> DatabaseResult<BTreeSet<i32>> {
    let levels = store.query_i64_column(
        "SELECT DISTINCT hierarchylevel FROM organisationunit \
         WHERE hierarchylevel IS NOT NULL",
    )?;
    Ok(levels.into_iter().map(|level| level as i32).collect())
}

/// One column per period type, read from the period structure alias
pub fn period_columns(table_alias: &str) -> Vec<AnalyticsTableColumn> {
    PERIOD_TYPES
        .iter()
        .map(|period_type| {
            AnalyticsTableColumn::new(
                *period_type,
                ColumnDataType::Text,
                quote_alias(table_alias, period_type),
            )
        })
        .collect()
}
