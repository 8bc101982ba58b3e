//! Completeness registration analytics tables
//!
//! One row per completed data set registration: which data set was
//! completed, for which period, org unit and attribute option combo, when,
//! and whether it was on time.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use super::populator::{InsertStatement, PartitionPopulator};
use super::{TableColumns, TableManager, UpdateWindow, filled_org_unit_levels, period_columns};
use crate::catalog::{Dimension, DimensionCatalog};
use crate::config::AggregationLevel;
use crate::database::{
    AnalyticsStore, CATEGORY_STRUCTURE, DatabaseResult, ORG_UNIT_GROUP_SET_STRUCTURE,
};
use crate::postprocess::{PostProcessHandle, PostProcessScheduler};
use crate::service::BuildError;
use crate::table::sql::{
    cast_to_date, days_between_dates, is_valid_uid, long_date_string, medium_date_string, quote,
    quote_alias,
};
use crate::table::{
    AnalyticsTable, AnalyticsTableColumn, AnalyticsTablePartition, AnalyticsTableType,
    AnalyticsTableUpdateParams, CHARACTER_11, ColumnDataType, ConfigurationError,
};

/// Reason reported when there is nothing to build
pub const NO_REGISTRATIONS_REASON: &str =
    "No complete registrations exist, not updating completeness analytics tables";

/// Natural key of a registration: data set, period, org unit and attribute
/// option combo
const NATURAL_KEY: &str = "ds.uid || '-' || ps.iso || '-' || ou.uid || '-' || ao.uid";

const FROM_CLAUSE: &str = "completedatasetregistration cdr \
    inner join dataset ds on cdr.datasetid=ds.datasetid \
    inner join period pe on cdr.periodid=pe.periodid \
    inner join _periodstructure ps on cdr.periodid=ps.periodid \
    inner join organisationunit ou on cdr.sourceid=ou.organisationunitid \
    inner join _organisationunitgroupsetstructure ougs on cdr.sourceid=ougs.organisationunitid \
    and (cast(date_trunc('month', pe.startdate) as date)=ougs.startdate or ougs.startdate is null) \
    left join _orgunitstructure ous on cdr.sourceid=ous.organisationunitid \
    inner join _categorystructure acs on cdr.attributeoptioncomboid=acs.categoryoptioncomboid \
    inner join categoryoptioncombo ao on cdr.attributeoptioncomboid=ao.categoryoptioncomboid";

/// Table manager for [`AnalyticsTableType::Completeness`]
pub struct CompletenessTableManager {
    store: Arc<dyn AnalyticsStore>,
    catalog: Arc<dyn DimensionCatalog>,
}

impl CompletenessTableManager {
    pub fn new(store: Arc<dyn AnalyticsStore>, catalog: Arc<dyn DimensionCatalog>) -> Self {
        Self { store, catalog }
    }

    /// Columns that every completeness table has, after the dimensions
    fn fixed_columns() -> Vec<AnalyticsTableColumn> {
        vec![
            AnalyticsTableColumn::not_null("dx", CHARACTER_11, "ds.uid"),
            AnalyticsTableColumn::not_null("year", ColumnDataType::Integer, "ps.year"),
        ]
    }

    /// Column of `dimension`, which must be one of the `available` columns
    /// of the resource table behind `table_alias`
    fn dimension_column(
        dimension: &Dimension,
        table_alias: &str,
        available: &HashSet<String>,
    ) -> Result<AnalyticsTableColumn, ConfigurationError> {
        if !is_valid_uid(&dimension.uid) {
            return Err(ConfigurationError::InvalidIdentifier(dimension.uid.clone()));
        }
        if !available.contains(&dimension.uid) {
            return Err(ConfigurationError::UnresolvedDimension(dimension.uid.clone()));
        }

        Ok(AnalyticsTableColumn::new(
            dimension.uid.as_str(),
            CHARACTER_11,
            quote_alias(table_alias, &dimension.uid),
        )
        .with_created(dimension.created))
    }

    /// The insert that fills `partition`'s staging table
    pub fn insert_statement(
        &self,
        params: &AnalyticsTableUpdateParams,
        table: &AnalyticsTable,
        partition: &AnalyticsTablePartition,
    ) -> InsertStatement {
        let partition_clause = match partition.year() {
            Some(year) => format!("ps.year = {}", year),
            None => format!(
                "cdr.lastupdated >= '{}'",
                long_date_string(&partition.start_date())
            ),
        };

        InsertStatement::new(partition.staging_name(), table.columns())
            .from(FROM_CLAUSE)
            .filter("cdr.date is not null")
            .filter(partition_clause)
            .filter(format!(
                "cdr.lastupdated < '{}'",
                long_date_string(&params.start_time)
            ))
            .filter("cdr.completed = true")
            .with_legacy_org_unit_alias()
    }
}

impl TableManager for CompletenessTableManager {
    fn table_type(&self) -> AnalyticsTableType {
        AnalyticsTableType::Completeness
    }

    fn valid_state(&self) -> DatabaseResult<Option<String>> {
        let exists = self
            .store
            .query_exists("select cdr.datasetid from completedatasetregistration cdr limit 1")?;

        Ok((!exists).then(|| NO_REGISTRATIONS_REASON.to_string()))
    }

    fn resolve_columns(&self) -> Result<TableColumns, BuildError> {
        let mut columns = vec![AnalyticsTableColumn::not_null(
            "id",
            ColumnDataType::Text,
            NATURAL_KEY,
        )];

        let group_set_columns: HashSet<String> = self
            .store
            .table_columns(ORG_UNIT_GROUP_SET_STRUCTURE)?
            .into_iter()
            .collect();
        let category_columns: HashSet<String> = self
            .store
            .table_columns(CATEGORY_STRUCTURE)?
            .into_iter()
            .collect();

        for group_set in self.catalog.list_org_unit_group_sets() {
            columns.push(Self::dimension_column(&group_set, "ougs", &group_set_columns)?);
        }

        let filled_levels = filled_org_unit_levels(self.store.as_ref())?;
        for level in self.catalog.list_org_unit_levels() {
            if !filled_levels.contains(&level.level) {
                debug!("Skipping empty org unit level {}", level.level);
                continue;
            }

            let column = level.column_name();
            columns.push(
                AnalyticsTableColumn::new(column.as_str(), CHARACTER_11, quote_alias("ous", &column))
                    .with_created(level.created),
            );
        }

        for group_set in self.catalog.list_attribute_category_option_group_sets() {
            columns.push(Self::dimension_column(&group_set, "acs", &category_columns)?);
        }

        for category in self.catalog.list_attribute_categories() {
            columns.push(Self::dimension_column(&category, "acs", &category_columns)?);
        }

        columns.extend(period_columns("ps"));

        let timely = format!(
            "{} <= ds.timelydays",
            days_between_dates("pe.enddate", &cast_to_date("cdr.date"))
        );
        columns.push(AnalyticsTableColumn::new(
            "timely",
            ColumnDataType::Boolean,
            timely,
        ));

        columns.extend(Self::fixed_columns());

        Ok(TableColumns {
            dimension_columns: columns,
            value_columns: vec![AnalyticsTableColumn::new(
                "value",
                ColumnDataType::Date,
                cast_to_date("cdr.date"),
            )],
        })
    }

    fn data_years(&self, params: &AnalyticsTableUpdateParams) -> DatabaseResult<Vec<i32>> {
        let cutoff = long_date_string(&params.start_time);
        let mut sql = format!(
            "select distinct extract(year from pe.startdate) as year \
             from completedatasetregistration cdr \
             inner join period pe on cdr.periodid=pe.periodid \
             where pe.startdate is not null \
             and cdr.date is not null \
             and cdr.completed = true \
             and cdr.date < '{cutoff}' \
             and cdr.lastupdated < '{cutoff}' "
        );

        if let Some(from_date) = params.from_date {
            sql.push_str(&format!(
                "and pe.startdate >= '{}' ",
                medium_date_string(&from_date)
            ));
        }

        sql.push_str("order by year");

        let years = self.store.query_i64_column(&sql)?;
        Ok(years.into_iter().map(|year| year as i32).collect())
    }

    fn partition_checks(&self, partition: &AnalyticsTablePartition) -> Vec<String> {
        match partition.year() {
            Some(year) => vec![format!("{} = {}", quote("year"), year)],
            None => Vec::new(),
        }
    }

    fn has_updated_latest_data(&self, window: UpdateWindow) -> DatabaseResult<bool> {
        self.store.query_exists(&format!(
            "select cdr.datasetid from completedatasetregistration cdr \
             where cdr.lastupdated >= '{}' and cdr.lastupdated < '{}' limit 1",
            long_date_string(&window.start),
            long_date_string(&window.end)
        ))
    }

    fn remove_updated_data(
        &self,
        production_table: &str,
        window: UpdateWindow,
    ) -> DatabaseResult<usize> {
        let sql = format!(
            "delete from {} where {} in (\
             select {} from completedatasetregistration cdr \
             inner join dataset ds on cdr.datasetid=ds.datasetid \
             inner join _periodstructure ps on cdr.periodid=ps.periodid \
             inner join organisationunit ou on cdr.sourceid=ou.organisationunitid \
             inner join categoryoptioncombo ao on cdr.attributeoptioncomboid=ao.categoryoptioncomboid \
             where cdr.lastupdated >= '{}' and cdr.lastupdated < '{}')",
            quote(production_table),
            quote("id"),
            NATURAL_KEY,
            long_date_string(&window.start),
            long_date_string(&window.end)
        );

        self.store.execute(&sql)
    }

    fn populate_partition(
        &self,
        params: &AnalyticsTableUpdateParams,
        table: &AnalyticsTable,
        partition: &AnalyticsTablePartition,
    ) -> DatabaseResult<usize> {
        let statement = self.insert_statement(params, table, partition);
        PartitionPopulator::new(self.store.as_ref()).populate(&statement)
    }

    fn apply_aggregation_levels(
        &self,
        _scheduler: &PostProcessScheduler,
        _partitions: &[String],
        _levels: &[AggregationLevel],
    ) -> Vec<PostProcessHandle> {
        vec![PostProcessHandle::completed()]
    }

    fn vacuum_tables(
        &self,
        _scheduler: &PostProcessScheduler,
        _partitions: &[String],
    ) -> PostProcessHandle {
        PostProcessHandle::completed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogSnapshot, OrgUnitLevel};
    use crate::database::{DuckDbStore, SourceSchema};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn org_unit_store() -> DuckDbStore {
        let store = DuckDbStore::in_memory().unwrap();
        store
            .execute_batch(
                "CREATE TABLE organisationunit (organisationunitid BIGINT, uid TEXT, hierarchylevel INTEGER); \
                 INSERT INTO organisationunit VALUES (1, 'ImspTQPwCqd', 1), (2, 'O6uvpzGd5pu', 2);",
            )
            .unwrap();
        store
    }

    /// Manager over a store whose resource tables match `catalog`
    fn manager(catalog: CatalogSnapshot) -> CompletenessTableManager {
        let store = org_unit_store();
        store
            .execute_batch(&SourceSchema::create_resource_tables_sql(&catalog).unwrap())
            .unwrap();
        CompletenessTableManager::new(Arc::new(store), Arc::new(catalog))
    }

    fn created() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_column_order() {
        let catalog = CatalogSnapshot::new()
            .with_org_unit_group_set(Dimension::new("J5jldMd8OHv", "Type", created()))
            .with_org_unit_level(OrgUnitLevel::new(1, "National", created()))
            .with_org_unit_level(OrgUnitLevel::new(2, "District", created()))
            .with_org_unit_level(OrgUnitLevel::new(3, "Chiefdom", created()))
            .with_attribute_category_option_group_set(Dimension::new(
                "ZIiRl9ng7c9",
                "Partners",
                created(),
            ))
            .with_attribute_category(Dimension::new("fMZEcRHuamy", "Funder", created()));

        let columns = manager(catalog).resolve_columns().unwrap();
        let names: Vec<&str> = columns
            .dimension_columns
            .iter()
            .map(|c| c.name.as_str())
            .collect();

        // Level 3 has no org units and is left out
        assert_eq!(
            &names[..6],
            &[
                "id",
                "J5jldMd8OHv",
                "uidlevel1",
                "uidlevel2",
                "ZIiRl9ng7c9",
                "fMZEcRHuamy"
            ]
        );
        assert_eq!(&names[names.len() - 3..], &["timely", "dx", "year"]);
        assert!(names.contains(&"quarterly"));

        assert_eq!(columns.value_columns.len(), 1);
        assert_eq!(columns.value_columns[0].name, "value");
        assert_eq!(columns.dimension_columns[1].alias, "ougs.\"J5jldMd8OHv\"");
        assert_eq!(
            columns.dimension_columns.last().unwrap().alias,
            "ps.year"
        );
    }

    #[test]
    fn test_invalid_dimension_uid() {
        let catalog = CatalogSnapshot::new()
            .with_attribute_category(Dimension::new("x\" or 1=1", "Bad", created()));
        let manager = CompletenessTableManager::new(Arc::new(org_unit_store()), Arc::new(catalog));

        assert!(matches!(
            manager.resolve_columns(),
            Err(BuildError::Configuration(ConfigurationError::InvalidIdentifier(_)))
        ));
    }

    #[test]
    fn test_dimension_without_resource_column() {
        let store = org_unit_store();
        let known = CatalogSnapshot::new()
            .with_attribute_category(Dimension::new("fMZEcRHuamy", "Funder", created()));
        store
            .execute_batch(&SourceSchema::create_resource_tables_sql(&known).unwrap())
            .unwrap();

        // Added to the catalog after the resource tables were created
        let catalog = known.with_org_unit_group_set(Dimension::new("Bpx0589u8y0", "Area", created()));
        let manager = CompletenessTableManager::new(Arc::new(store), Arc::new(catalog));

        match manager.resolve_columns() {
            Err(BuildError::Configuration(ConfigurationError::UnresolvedDimension(uid))) => {
                assert_eq!(uid, "Bpx0589u8y0")
            }
            other => panic!("Expected unresolved dimension, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_partition_checks() {
        let manager = manager(CatalogSnapshot::new());
        let mut table = AnalyticsTable::new(AnalyticsTableType::Completeness, vec![], vec![]);
        table.add_partition(2020).unwrap();
        table
            .add_latest_partition(created(), Utc::now())
            .unwrap();

        assert_eq!(
            manager.partition_checks(&table.partitions()[0]),
            vec!["\"year\" = 2020"]
        );
        assert!(manager.partition_checks(&table.partitions()[1]).is_empty());
    }

    #[test]
    fn test_insert_statement_for_year_partition() {
        let manager = manager(CatalogSnapshot::new());
        let params = AnalyticsTableUpdateParams::builder()
            .start_time(Utc.with_ymd_and_hms(2021, 3, 4, 10, 15, 0).unwrap())
            .build();
        let columns = manager.resolve_columns().unwrap();
        let mut table = AnalyticsTable::new(
            AnalyticsTableType::Completeness,
            columns.dimension_columns,
            columns.value_columns,
        );
        table.add_partition(2020).unwrap();

        let sql = manager
            .insert_statement(&params, &table, &table.partitions()[0])
            .to_sql();

        assert!(sql.starts_with("insert into \"analytics_completeness_temp_2020\" (\"id\", "));
        assert!(sql.contains("cast(cdr.date as date) as \"value\" from completedatasetregistration cdr"));
        assert!(sql.contains("(cast(cdr.date as date) - pe.enddate) <= ds.timelydays as \"timely\""));
        assert!(sql.ends_with(
            "where cdr.date is not null and ps.year = 2020 \
             and cdr.lastupdated < '2021-03-04T10:15:00' and cdr.completed = true"
        ));
    }

    #[test]
    fn test_insert_statement_for_latest_partition() {
        let manager = manager(CatalogSnapshot::new());
        let start = Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap();
        let params = AnalyticsTableUpdateParams::builder()
            .latest_update(true)
            .from_date(NaiveDate::from_ymd_opt(2021, 1, 1).unwrap())
            .start_time(Utc.with_ymd_and_hms(2021, 3, 4, 10, 15, 0).unwrap())
            .build();
        let mut table = AnalyticsTable::new(AnalyticsTableType::Completeness, vec![], vec![]);
        table.add_latest_partition(start, params.start_time).unwrap();

        let sql = manager
            .insert_statement(&params, &table, &table.partitions()[0])
            .to_sql();

        assert!(sql.contains("\"analytics_completeness_temp_latest\""));
        assert!(sql.contains("and cdr.lastupdated >= '2021-03-01T00:00:00' and"));
    }
}
