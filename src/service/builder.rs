//! Shared build orchestration
//!
//! [`TableBuilder`] drives a [`TableManager`] through one build: check
//! preconditions, resolve columns, plan partitions, populate them into
//! staging tables on a bounded worker pool, publish what succeeded and
//! queue post-processing.

use std::collections::BTreeSet;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::BuildError;
use super::report::{BuildResult, PartitionOutcome, PartitionSummary, TableSummary};
use crate::config::{BuildSettings, EngineConfig};
use crate::database::{AnalyticsStore, DatabaseError, DatabaseResult, StateRepository};
use crate::manager::{TableManager, UpdateWindow};
use crate::postprocess::{PostProcessHandle, PostProcessScheduler};
use crate::table::sql::{literal_list, long_date_string, quote};
use crate::table::{
    AnalyticsTable, AnalyticsTablePartition, AnalyticsTableUpdateParams, PartitionKey,
    validate_dimension_columns,
};

/// Name of the natural key column checked for uniqueness after population
pub const NATURAL_KEY_COLUMN: &str = "id";

/// Runs builds of single table types
pub struct TableBuilder<'a> {
    store: &'a dyn AnalyticsStore,
    scheduler: &'a PostProcessScheduler,
    config: &'a EngineConfig,
}

impl<'a> TableBuilder<'a> {
    pub fn new(
        store: &'a dyn AnalyticsStore,
        scheduler: &'a PostProcessScheduler,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            store,
            scheduler,
            config,
        }
    }

    /// Build the tables of `manager`'s table type
    ///
    /// Configuration errors and store failures outside of partition
    /// population are returned as errors. Failed partitions are reported
    /// in the result.
    pub fn build(
        &self,
        manager: &dyn TableManager,
        params: &AnalyticsTableUpdateParams,
    ) -> Result<BuildResult, BuildError> {
        let table_type = manager.table_type();
        let start = Instant::now();

        if let Some(reason) = manager.valid_state()? {
            info!("{}", reason);
            return Ok(BuildResult::skipped(table_type, reason));
        }

        let state = StateRepository::new(self.store).load(table_type)?;
        let settings = BuildSettings::resolve(self.config, state);

        let window = if params.is_latest_update() {
            match self.latest_window(manager, params, &settings)? {
                Ok(window) => Some(window),
                Err(reason) => {
                    info!("{}", reason);
                    return Ok(BuildResult::skipped(table_type, reason));
                }
            }
        } else {
            None
        };

        let mut columns = manager.resolve_columns()?;
        validate_dimension_columns(&columns.dimension_columns)?;

        if window.is_some()
            && let Some(last_full_update) = settings.state.last_full_update
        {
            columns.dimension_columns.retain(|column| {
                let existed = column.existed_at(&last_full_update);
                if !existed {
                    debug!(
                        "Skipping column {} created after the last full update",
                        column.name
                    );
                }
                existed
            });
        }

        let table = manager.plan_partitions(params, columns, window)?;

        if !table.has_partition_tables() {
            let reason = format!(
                "No data to build for {}, production tables left untouched",
                table_type
            );
            info!("{}", reason);
            return Ok(BuildResult::skipped(table_type, reason));
        }

        info!(
            "Building {} with {} partition(s)",
            table.base_name(),
            table.partitions().len()
        );

        if let Some(window) = window {
            for (_, production) in production_partitions(self.store, table.base_name())? {
                let deleted = manager.remove_updated_data(&production, window)?;
                info!("Removed {} updated row(s) from {}", deleted, production);
            }
        }

        let populated = self.populate_partitions(manager, params, &table, settings.parallel_jobs)?;
        let summary = self.publish(&table, params, populated)?;
        self.recreate_master_view(table.base_name())?;

        if summary.has_failures() {
            warn!(
                "Build of {} had failed partitions, watermark not advanced",
                table.base_name()
            );
        } else {
            let repository = StateRepository::new(self.store);
            if params.is_latest_update() {
                repository.record_latest_update(table_type, params.start_time)?;
            } else if params.from_date.is_none() {
                repository.record_full_update(table_type, params.start_time)?;
            }
        }

        let post_processing = self.schedule_post_processing(manager, &settings, &summary);

        info!(
            "Built {}: {} row(s) published in {} ms",
            table.base_name(),
            summary.rows_published(),
            start.elapsed().as_millis()
        );

        Ok(BuildResult {
            table_type,
            tables_built: vec![summary],
            skipped_reason: None,
            post_processing,
        })
    }

    /// Window of an incremental build, or the reason to skip it
    fn latest_window(
        &self,
        manager: &dyn TableManager,
        params: &AnalyticsTableUpdateParams,
        settings: &BuildSettings,
    ) -> Result<Result<UpdateWindow, String>, BuildError> {
        let table_type = manager.table_type();

        if !table_type.has_latest_partition() {
            return Ok(Err(format!(
                "Incremental updates are not supported for {}",
                table_type
            )));
        }

        let Some(start) = settings.state.latest_watermark() else {
            return Ok(Err(format!(
                "No full update of {} has completed, run a full update first",
                table_type
            )));
        };

        let window = UpdateWindow {
            start,
            end: params.start_time,
        };

        if window.start >= window.end || !manager.has_updated_latest_data(window)? {
            return Ok(Err(format!(
                "No updated data for {} since {}",
                table_type,
                long_date_string(&start)
            )));
        }

        Ok(Ok(window))
    }

    fn populate_partitions<'t>(
        &self,
        manager: &dyn TableManager,
        params: &AnalyticsTableUpdateParams,
        table: &'t AnalyticsTable,
        parallel_jobs: usize,
    ) -> Result<Vec<(&'t AnalyticsTablePartition, DatabaseResult<usize>)>, BuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallel_jobs.max(1))
            .thread_name(|i| format!("analytics-populate-{}", i))
            .build()
            .map_err(|e| BuildError::Worker(e.to_string()))?;

        Ok(pool.install(|| {
            table
                .partitions()
                .par_iter()
                .map(|partition| {
                    let result = self.populate_partition(manager, params, table, partition);
                    if let Err(e) = &result {
                        warn!("Failed to populate {}: {}", partition.staging_name(), e);
                        self.drop_table(&partition.staging_name());
                    }
                    (partition, result)
                })
                .collect()
        }))
    }

    /// Create, fill and validate the staging table of one partition
    fn populate_partition(
        &self,
        manager: &dyn TableManager,
        params: &AnalyticsTableUpdateParams,
        table: &AnalyticsTable,
        partition: &AnalyticsTablePartition,
    ) -> DatabaseResult<usize> {
        let staging = partition.staging_name();
        let checks = manager.partition_checks(partition);

        let mut definitions: Vec<String> =
            table.columns().iter().map(|c| c.definition_sql()).collect();
        definitions.extend(checks.iter().map(|check| format!("check ({})", check)));

        self.store
            .execute(&format!("drop table if exists {}", quote(&staging)))?;
        self.store.execute(&format!(
            "create table {} ({})",
            quote(&staging),
            definitions.join(", ")
        ))?;

        manager.populate_partition(params, table, partition)?;

        for check in &checks {
            let violations = self.count(&format!(
                "select count(*) as n from {} where not ({})",
                quote(&staging),
                check
            ))?;
            if violations > 0 {
                return Err(DatabaseError::InvalidInput(format!(
                    "{} row(s) of {} violate partition check {}",
                    violations, staging, check
                )));
            }
        }

        if table
            .dimension_columns
            .iter()
            .any(|c| c.name == NATURAL_KEY_COLUMN)
        {
            let duplicates = self.count(&format!(
                "select count(*) - count(distinct {key}) as n from {}",
                quote(&staging),
                key = quote(NATURAL_KEY_COLUMN)
            ))?;
            if duplicates > 0 {
                return Err(DatabaseError::InvalidInput(format!(
                    "{} duplicate natural key(s) in {}",
                    duplicates, staging
                )));
            }
        }

        let rows = self.store.count_rows(&staging)?;
        Ok(rows.max(0) as usize)
    }

    /// Promote populated partitions and retire stale production partitions
    fn publish(
        &self,
        table: &AnalyticsTable,
        params: &AnalyticsTableUpdateParams,
        populated: Vec<(&AnalyticsTablePartition, DatabaseResult<usize>)>,
    ) -> Result<TableSummary, BuildError> {
        let base_name = table.base_name();
        let mut partitions = Vec::new();

        for (partition, result) in populated {
            let outcome = match result {
                Err(e) => PartitionOutcome::Failed {
                    error: e.to_string(),
                },
                Ok(0) => {
                    debug!("Discarding empty partition {}", partition.staging_name());
                    self.drop_table(&partition.staging_name());
                    if !partition.is_latest_partition() {
                        // The year has no qualifying data left
                        self.store.execute(&format!(
                            "drop table if exists {}",
                            quote(&partition.production_name())
                        ))?;
                    }
                    PartitionOutcome::Empty
                }
                Ok(rows) => match self.publish_partition(table, partition) {
                    Ok(()) => PartitionOutcome::Published { rows },
                    Err(e) => {
                        warn!("Failed to publish {}: {}", partition.production_name(), e);
                        self.drop_table(&partition.staging_name());
                        PartitionOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                },
            };

            partitions.push(PartitionSummary {
                name: partition.production_name(),
                year: partition.year(),
                latest: partition.is_latest_partition(),
                outcome,
            });
        }

        if !params.is_latest_update() {
            self.retire_stale_partitions(table, params, &partitions)?;
        }

        Ok(TableSummary {
            table_name: base_name.to_string(),
            partitions,
        })
    }

    fn publish_partition(
        &self,
        table: &AnalyticsTable,
        partition: &AnalyticsTablePartition,
    ) -> DatabaseResult<()> {
        let staging = partition.staging_name();
        let production = partition.production_name();

        let statements = if partition.is_latest_partition()
            && self.store.table_exists(&production)?
        {
            let existing: BTreeSet<String> =
                self.store.table_columns(&production)?.into_iter().collect();

            let mut statements: Vec<String> = table
                .columns()
                .iter()
                .filter(|c| !existing.contains(&c.name))
                .map(|c| {
                    format!(
                        "alter table {} add column {} {}",
                        quote(&production),
                        c.quoted_name(),
                        c.data_type.sql_type()
                    )
                })
                .collect();
            statements.push(format!(
                "insert into {} by name select * from {}",
                quote(&production),
                quote(&staging)
            ));
            statements.push(format!("drop table {}", quote(&staging)));
            statements
        } else {
            vec![
                format!("drop table if exists {}", quote(&production)),
                format!(
                    "alter table {} rename to {}",
                    quote(&staging),
                    quote(&production)
                ),
            ]
        };

        let start = Instant::now();
        self.store.execute_in_transaction(&statements)?;
        info!(
            "Published {} in {} ms",
            production,
            start.elapsed().as_millis()
        );
        Ok(())
    }

    /// After a full build, drop what the build superseded
    ///
    /// A complete rebuild without a from date drops every year partition
    /// the build did not plan, and the latest partition. Otherwise, with a
    /// from date or when a partition failed, only the latest rows of the
    /// years rebuilt without failure are deleted; the rest stays served.
    fn retire_stale_partitions(
        &self,
        table: &AnalyticsTable,
        params: &AnalyticsTableUpdateParams,
        built: &[PartitionSummary],
    ) -> DatabaseResult<()> {
        let base_name = table.base_name();
        let planned: BTreeSet<i32> = table.partitions().iter().filter_map(|p| p.year()).collect();
        let complete = params.from_date.is_none() && !built.iter().any(|p| p.outcome.is_failed());

        for (key, name) in production_partitions(self.store, base_name)? {
            match key {
                PartitionKey::Year(year) if complete && !planned.contains(&year) => {
                    info!("Dropping stale partition {}", name);
                    self.store
                        .execute(&format!("drop table if exists {}", quote(&name)))?;
                }
                PartitionKey::Latest if complete => {
                    info!("Dropping latest partition {} after full update", name);
                    self.store
                        .execute(&format!("drop table if exists {}", quote(&name)))?;
                }
                PartitionKey::Latest => self.remove_rebuilt_latest_rows(&name, built)?,
                PartitionKey::Year(_) => {}
            }
        }

        Ok(())
    }

    /// Delete rows of years `built` replaced from the latest partition `name`
    fn remove_rebuilt_latest_rows(
        &self,
        name: &str,
        built: &[PartitionSummary],
    ) -> DatabaseResult<()> {
        let rebuilt: Vec<String> = built
            .iter()
            .filter(|p| !p.outcome.is_failed())
            .filter_map(|p| p.year)
            .map(|year| year.to_string())
            .collect();

        let has_year = self
            .store
            .table_columns(name)?
            .iter()
            .any(|c| c == "year");

        if !rebuilt.is_empty() && has_year {
            let deleted = self.store.execute(&format!(
                "delete from {} where cast({} as text) in {}",
                quote(name),
                quote("year"),
                literal_list(&rebuilt)
            ))?;
            info!("Removed {} rebuilt row(s) from {}", deleted, name);
        }

        Ok(())
    }

    /// Point the master view at the current production partitions
    fn recreate_master_view(&self, base_name: &str) -> DatabaseResult<()> {
        let partitions = production_partitions(self.store, base_name)?;

        if partitions.is_empty() {
            self.store
                .execute(&format!("drop view if exists {}", quote(base_name)))?;
            return Ok(());
        }

        let selects: Vec<String> = partitions
            .iter()
            .map(|(_, name)| format!("select * from {}", quote(name)))
            .collect();

        self.store.execute(&format!(
            "create or replace view {} as {}",
            quote(base_name),
            selects.join(" union all by name ")
        ))?;
        Ok(())
    }

    fn schedule_post_processing(
        &self,
        manager: &dyn TableManager,
        settings: &BuildSettings,
        summary: &TableSummary,
    ) -> Vec<PostProcessHandle> {
        let published = summary.published_partitions();
        if published.is_empty() {
            return Vec::new();
        }

        let mut handles = Vec::new();
        if !settings.aggregation_levels.is_empty() {
            handles.extend(manager.apply_aggregation_levels(
                self.scheduler,
                &published,
                &settings.aggregation_levels,
            ));
        }
        if settings.vacuum {
            handles.push(manager.vacuum_tables(self.scheduler, &published));
        }
        handles
    }

    fn count(&self, sql: &str) -> DatabaseResult<i64> {
        Ok(self
            .store
            .query_i64_column(sql)?
            .first()
            .copied()
            .unwrap_or(0))
    }

    /// Drop a table, logging instead of failing
    fn drop_table(&self, name: &str) {
        if let Err(e) = self
            .store
            .execute(&format!("drop table if exists {}", quote(name)))
        {
            warn!("Failed to drop {}: {}", name, e);
        }
    }
}

/// Existing production partitions of `base_name`, ordered by key
pub fn production_partitions(
    store: &dyn AnalyticsStore,
    base_name: &str,
) -> DatabaseResult<Vec<(PartitionKey, String)>> {
    let mut partitions: Vec<(PartitionKey, String)> = store
        .list_tables(&format!("{}_", base_name))?
        .into_iter()
        .filter_map(|name| PartitionKey::parse(base_name, &name).map(|key| (key, name)))
        .collect();
    partitions.sort();
    Ok(partitions)
}
