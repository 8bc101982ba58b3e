//! Shared fixtures for build tests
//!
//! Seeds a small source database: one data set with 15 timely days, four
//! monthly periods in 2019-2022, a national and a district org unit and the
//! default attribute option combo.

#![allow(dead_code)]

use std::sync::Arc;

use analytics_tables::catalog::{CatalogSnapshot, Dimension, OrgUnitLevel};
use analytics_tables::config::EngineConfig;
use analytics_tables::database::{AnalyticsStore, DuckDbStore, SourceSchema};
use analytics_tables::manager::CompletenessTableManager;
use analytics_tables::service::AnalyticsTableService;
use analytics_tables::table::AnalyticsTableUpdateParams;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

pub const DATA_SET: i64 = 1;
pub const DISTRICT: i64 = 2;
pub const NATIONAL: i64 = 1;

pub const PERIOD_2019_01: i64 = 1;
pub const PERIOD_2020_03: i64 = 2;
pub const PERIOD_2021_06: i64 = 3;
pub const PERIOD_2022_01: i64 = 4;

pub const GROUP_SET: &str = "J5jldMd8OHv";
pub const CATEGORY: &str = "fMZEcRHuamy";
pub const LATE_CATEGORY: &str = "cX5k9anHEHd";

pub fn ts(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// Catalog with one group set, two levels and one attribute category
pub fn catalog() -> CatalogSnapshot {
    CatalogSnapshot::new()
        .with_org_unit_group_set(Dimension::new(GROUP_SET, "Facility Type", ts(2018, 1, 1)))
        .with_org_unit_level(OrgUnitLevel::new(1, "National", ts(2018, 1, 1)))
        .with_org_unit_level(OrgUnitLevel::new(2, "District", ts(2018, 1, 1)))
        .with_attribute_category(Dimension::new(CATEGORY, "Funding Mechanism", ts(2018, 1, 1)))
}

/// [`catalog`] plus a category created on `created`
pub fn catalog_with_late_category(created: DateTime<Utc>) -> CatalogSnapshot {
    catalog().with_attribute_category(Dimension::new(LATE_CATEGORY, "Project", created))
}

/// In-memory store with engine, source and resource tables and seeded
/// metadata, but no registrations
pub fn seeded_store() -> Arc<dyn AnalyticsStore> {
    let store = DuckDbStore::in_memory().unwrap();
    store.initialize().unwrap();
    store
        .execute_batch(SourceSchema::create_tables_sql())
        .unwrap();

    // Resource tables cover every dimension any test catalog uses
    let resources = SourceSchema::create_resource_tables_sql(&catalog_with_late_category(
        ts(2018, 1, 1),
    ))
    .unwrap();
    store.execute_batch(&resources).unwrap();

    store
        .execute_batch(&format!(
            r#"
INSERT INTO dataset VALUES ({DATA_SET}, 'lyLU2wR22tC', 'ANC', 'Monthly', 15);

INSERT INTO period VALUES
    ({PERIOD_2019_01}, '201901', 'Monthly', DATE '2019-01-01', DATE '2019-01-31'),
    ({PERIOD_2020_03}, '202003', 'Monthly', DATE '2020-03-01', DATE '2020-03-31'),
    ({PERIOD_2021_06}, '202106', 'Monthly', DATE '2021-06-01', DATE '2021-06-30'),
    ({PERIOD_2022_01}, '202201', 'Monthly', DATE '2022-01-01', DATE '2022-01-31');

INSERT INTO _periodstructure (periodid, iso, "monthly", "quarterly", "yearly", year) VALUES
    ({PERIOD_2019_01}, '201901', '201901', '2019Q1', '2019', 2019),
    ({PERIOD_2020_03}, '202003', '202003', '2020Q1', '2020', 2020),
    ({PERIOD_2021_06}, '202106', '202106', '2021Q2', '2021', 2021),
    ({PERIOD_2022_01}, '202201', '202201', '2022Q1', '2022', 2022);

INSERT INTO organisationunit VALUES
    ({NATIONAL}, 'ImspTQPwCqd', 'Sierra Leone', '/ImspTQPwCqd', 1),
    ({DISTRICT}, 'O6uvpzGd5pu', 'Bo', '/ImspTQPwCqd/O6uvpzGd5pu', 2);

INSERT INTO _orgunitstructure VALUES
    ({NATIONAL}, 'ImspTQPwCqd', 1, 'ImspTQPwCqd', NULL),
    ({DISTRICT}, 'O6uvpzGd5pu', 2, 'ImspTQPwCqd', 'O6uvpzGd5pu');

INSERT INTO _organisationunitgroupsetstructure (organisationunitid, startdate, "{GROUP_SET}") VALUES
    ({NATIONAL}, NULL, 'RXL3lPSK8oG'),
    ({DISTRICT}, NULL, 'tDZVQ1WtwpA');

INSERT INTO categoryoptioncombo VALUES (1, 'HllvX50cXC0', 'default');

INSERT INTO _categorystructure (categoryoptioncomboid, "{CATEGORY}", "{LATE_CATEGORY}") VALUES
    (1, 'xYerKDKCefk', 'Xr12mI7VPn3');
"#
        ))
        .unwrap();

    Arc::new(store)
}

/// Natural key of a registration of the seeded data set
pub fn registration_id(period_iso: &str, org_unit_uid: &str) -> String {
    format!("lyLU2wR22tC-{}-{}-HllvX50cXC0", period_iso, org_unit_uid)
}

/// Insert a completed registration
pub fn register(
    store: &dyn AnalyticsStore,
    period: i64,
    source: i64,
    completed_on: NaiveDate,
    last_updated: DateTime<Utc>,
) {
    store
        .execute(&format!(
            "INSERT INTO completedatasetregistration \
             (datasetid, periodid, sourceid, attributeoptioncomboid, date, storedby, lastupdated, completed) \
             VALUES ({DATA_SET}, {period}, {source}, 1, TIMESTAMP '{} 10:00:00', 'admin', TIMESTAMP '{}', true)",
            completed_on.format("%Y-%m-%d"),
            last_updated.format("%Y-%m-%d %H:%M:%S")
        ))
        .unwrap();
}

/// Change the completion date of an existing registration
pub fn update_registration(
    store: &dyn AnalyticsStore,
    period: i64,
    source: i64,
    completed_on: NaiveDate,
    last_updated: DateTime<Utc>,
) {
    let updated = store
        .execute(&format!(
            "UPDATE completedatasetregistration \
             SET date = TIMESTAMP '{} 10:00:00', lastupdated = TIMESTAMP '{}' \
             WHERE datasetid = {DATA_SET} AND periodid = {period} AND sourceid = {source}",
            completed_on.format("%Y-%m-%d"),
            last_updated.format("%Y-%m-%d %H:%M:%S")
        ))
        .unwrap();
    assert_eq!(updated, 1);
}

pub fn completeness_manager(
    store: &Arc<dyn AnalyticsStore>,
    catalog: CatalogSnapshot,
) -> Arc<CompletenessTableManager> {
    Arc::new(CompletenessTableManager::new(store.clone(), Arc::new(catalog)))
}

/// Service over `store` with the completeness manager for `catalog`
pub fn service(store: &Arc<dyn AnalyticsStore>, catalog: CatalogSnapshot) -> AnalyticsTableService {
    let mut config = EngineConfig::in_memory();
    config.build.parallel_jobs = 2;

    AnalyticsTableService::new(store.clone(), config)
        .unwrap()
        .with_manager(completeness_manager(store, catalog))
}

pub fn full_update(start_time: DateTime<Utc>) -> AnalyticsTableUpdateParams {
    AnalyticsTableUpdateParams::builder()
        .start_time(start_time)
        .build()
}

pub fn latest_update(start_time: DateTime<Utc>) -> AnalyticsTableUpdateParams {
    AnalyticsTableUpdateParams::builder()
        .latest_update(true)
        .start_time(start_time)
        .build()
}

/// Rows of the master view ordered by id
pub fn master_rows(store: &dyn AnalyticsStore) -> Vec<serde_json::Value> {
    store
        .query("SELECT * FROM analytics_completeness ORDER BY \"id\"")
        .unwrap()
        .rows
}

/// Names of all tables of the completeness table type, staging included
pub fn completeness_tables(store: &dyn AnalyticsStore) -> Vec<String> {
    store.list_tables("analytics_completeness_").unwrap()
}
