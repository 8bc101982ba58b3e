//! Full build tests against an in-memory DuckDB store

mod common;

use analytics_tables::catalog::{CatalogSnapshot, Dimension};
use analytics_tables::database::{AnalyticsStore, StateRepository};
use analytics_tables::manager::completeness::NO_REGISTRATIONS_REASON;
use analytics_tables::service::{BuildError, PartitionOutcome, production_partitions};
use analytics_tables::table::{AnalyticsTableType, AnalyticsTableUpdateParams, ConfigurationError};
use common::*;

fn seed_three_years(store: &dyn AnalyticsStore) {
    register(store, PERIOD_2019_01, DISTRICT, date(2019, 2, 3), ts(2019, 2, 3));
    register(store, PERIOD_2020_03, DISTRICT, date(2020, 4, 5), ts(2020, 4, 5));
    register(store, PERIOD_2021_06, NATIONAL, date(2021, 7, 30), ts(2021, 7, 30));
}

fn partition_names(store: &dyn AnalyticsStore) -> Vec<String> {
    production_partitions(store, "analytics_completeness")
        .unwrap()
        .into_iter()
        .map(|(_, name)| name)
        .collect()
}

#[test]
fn test_full_build_publishes_one_partition_per_year() {
    let store = seeded_store();
    seed_three_years(store.as_ref());

    let service = service(&store, catalog());
    let start = ts(2023, 1, 1);
    let result = service
        .build_table(
            completeness_manager(&store, catalog()).as_ref(),
            &full_update(start),
        )
        .unwrap();

    assert!(!result.is_skipped());
    assert!(!result.is_partial_failure());
    assert_eq!(result.tables_built.len(), 1);

    let table = &result.tables_built[0];
    assert_eq!(table.table_name, "analytics_completeness");
    assert_eq!(table.rows_published(), 3);
    assert_eq!(
        table.published_partitions(),
        vec![
            "analytics_completeness_2019",
            "analytics_completeness_2020",
            "analytics_completeness_2021"
        ]
    );

    // Staging tables are gone after publishing
    assert_eq!(completeness_tables(store.as_ref()), partition_names(store.as_ref()));

    let state = StateRepository::new(store.as_ref())
        .load(AnalyticsTableType::Completeness)
        .unwrap();
    assert_eq!(state.last_full_update, Some(start));
    assert_eq!(state.last_latest_update, None);
}

#[test]
fn test_master_view_contents() {
    let store = seeded_store();
    register(store.as_ref(), PERIOD_2020_03, DISTRICT, date(2020, 4, 5), ts(2020, 4, 5));
    register(store.as_ref(), PERIOD_2021_06, NATIONAL, date(2021, 7, 30), ts(2021, 7, 30));
    // Not completed, never published
    register(store.as_ref(), PERIOD_2022_01, DISTRICT, date(2022, 2, 1), ts(2022, 2, 1));
    store
        .execute("UPDATE completedatasetregistration SET completed = false WHERE periodid = 4")
        .unwrap();

    let service = service(&store, catalog());
    let report = service.update(&full_update(ts(2023, 1, 1)));
    assert!(!report.has_failures());

    let columns = store.table_columns("analytics_completeness_2020").unwrap();
    assert_eq!(
        &columns[..5],
        &["id", GROUP_SET, "uidlevel1", "uidlevel2", CATEGORY]
    );
    assert_eq!(
        &columns[columns.len() - 4..],
        &["timely", "dx", "year", "value"]
    );

    let rows = master_rows(store.as_ref());
    assert_eq!(rows.len(), 2);

    let district = &rows[0];
    assert_eq!(district["id"], registration_id("202003", "O6uvpzGd5pu"));
    assert_eq!(district[GROUP_SET], "tDZVQ1WtwpA");
    assert_eq!(district["uidlevel1"], "ImspTQPwCqd");
    assert_eq!(district["uidlevel2"], "O6uvpzGd5pu");
    assert_eq!(district[CATEGORY], "xYerKDKCefk");
    assert_eq!(district["monthly"], "202003");
    assert_eq!(district["quarterly"], "2020Q1");
    assert_eq!(district["dx"], "lyLU2wR22tC");
    assert_eq!(district["year"], 2020);
    assert_eq!(district["value"], "2020-04-05");
    assert_eq!(district["timely"], true);

    // Completed 30 days after the period ended
    let national = &rows[1];
    assert_eq!(national["id"], registration_id("202106", "ImspTQPwCqd"));
    assert_eq!(national["uidlevel2"], serde_json::Value::Null);
    assert_eq!(national["timely"], false);
}

#[test]
fn test_records_after_cutoff_are_deferred() {
    let store = seeded_store();
    register(store.as_ref(), PERIOD_2020_03, DISTRICT, date(2020, 4, 5), ts(2020, 4, 5));
    register(store.as_ref(), PERIOD_2021_06, DISTRICT, date(2021, 7, 1), ts(2023, 1, 2));

    let service = service(&store, catalog());
    let result = service
        .build_table(
            completeness_manager(&store, catalog()).as_ref(),
            &full_update(ts(2023, 1, 1)),
        )
        .unwrap();

    assert_eq!(result.tables_built[0].rows_published(), 1);
    assert_eq!(partition_names(store.as_ref()), vec!["analytics_completeness_2020"]);
}

#[test]
fn test_from_date_rebuilds_recent_years_only() {
    let store = seeded_store();
    seed_three_years(store.as_ref());

    let service = service(&store, catalog());
    let manager = completeness_manager(&store, catalog());
    let first = ts(2023, 1, 1);
    service.build_table(manager.as_ref(), &full_update(first)).unwrap();

    register(store.as_ref(), PERIOD_2021_06, DISTRICT, date(2021, 7, 2), ts(2023, 1, 5));
    let params = AnalyticsTableUpdateParams::builder()
        .from_date(date(2020, 1, 1))
        .start_time(ts(2023, 2, 1))
        .build();
    let result = service.build_table(manager.as_ref(), &params).unwrap();

    let years: Vec<Option<i32>> = result.tables_built[0]
        .partitions
        .iter()
        .map(|p| p.year)
        .collect();
    assert_eq!(years, vec![Some(2020), Some(2021)]);

    // 2019 was not rebuilt and stays published
    assert_eq!(partition_names(store.as_ref()).len(), 3);
    assert_eq!(store.count_rows("analytics_completeness_2019").unwrap(), 1);
    assert_eq!(store.count_rows("analytics_completeness_2021").unwrap(), 2);
    assert_eq!(master_rows(store.as_ref()).len(), 4);

    // A partial rebuild does not move the full update watermark
    let state = StateRepository::new(store.as_ref())
        .load(AnalyticsTableType::Completeness)
        .unwrap();
    assert_eq!(state.last_full_update, Some(first));
}

#[test]
fn test_last_years_limits_partitions() {
    let store = seeded_store();
    seed_three_years(store.as_ref());
    register(store.as_ref(), PERIOD_2022_01, DISTRICT, date(2022, 2, 1), ts(2022, 2, 1));

    let service = service(&store, catalog());
    let params = AnalyticsTableUpdateParams::builder()
        .last_years(2)
        .start_time(ts(2022, 6, 1))
        .build();
    assert_eq!(params.from_date, Some(date(2021, 1, 1)));

    service
        .build_table(completeness_manager(&store, catalog()).as_ref(), &params)
        .unwrap();

    assert_eq!(
        partition_names(store.as_ref()),
        vec!["analytics_completeness_2021", "analytics_completeness_2022"]
    );
}

#[test]
fn test_full_build_retires_stale_years() {
    let store = seeded_store();
    seed_three_years(store.as_ref());

    let service = service(&store, catalog());
    let manager = completeness_manager(&store, catalog());
    service.build_table(manager.as_ref(), &full_update(ts(2023, 1, 1))).unwrap();
    assert_eq!(partition_names(store.as_ref()).len(), 3);

    store
        .execute(&format!(
            "DELETE FROM completedatasetregistration WHERE periodid = {}",
            PERIOD_2019_01
        ))
        .unwrap();
    service.build_table(manager.as_ref(), &full_update(ts(2023, 2, 1))).unwrap();

    assert_eq!(
        partition_names(store.as_ref()),
        vec!["analytics_completeness_2020", "analytics_completeness_2021"]
    );
    assert_eq!(master_rows(store.as_ref()).len(), 2);
}

#[test]
fn test_no_registrations_skips_build() {
    let store = seeded_store();
    let service = service(&store, catalog());

    let result = service
        .build_table(
            completeness_manager(&store, catalog()).as_ref(),
            &full_update(ts(2023, 1, 1)),
        )
        .unwrap();

    assert_eq!(result.skipped_reason.as_deref(), Some(NO_REGISTRATIONS_REASON));
    assert!(result.tables_built.is_empty());
    assert!(completeness_tables(store.as_ref()).is_empty());
    assert!(!store.table_exists("analytics_completeness").unwrap());
}

#[test]
fn test_no_data_years_leaves_production_untouched() {
    let store = seeded_store();
    seed_three_years(store.as_ref());

    let service = service(&store, catalog());
    let manager = completeness_manager(&store, catalog());
    service.build_table(manager.as_ref(), &full_update(ts(2023, 1, 1))).unwrap();

    // Every registration is newer than this cutoff
    let result = service
        .build_table(manager.as_ref(), &full_update(ts(2018, 1, 1)))
        .unwrap();

    let reason = result.skipped_reason.unwrap();
    assert!(reason.starts_with("No data to build"));
    assert_eq!(partition_names(store.as_ref()).len(), 3);
    assert_eq!(master_rows(store.as_ref()).len(), 3);

    let state = StateRepository::new(store.as_ref())
        .load(AnalyticsTableType::Completeness)
        .unwrap();
    assert_eq!(state.last_full_update, Some(ts(2023, 1, 1)));
}

#[test]
fn test_duplicate_dimension_column_is_configuration_error() {
    let store = seeded_store();
    seed_three_years(store.as_ref());

    // A group set and a category sharing one identifier
    store
        .execute(&format!(
            "ALTER TABLE _organisationunitgroupsetstructure ADD COLUMN \"{}\" VARCHAR(11)",
            CATEGORY
        ))
        .unwrap();
    let catalog = CatalogSnapshot::new()
        .with_org_unit_group_set(Dimension::new(CATEGORY, "Funding", ts(2018, 1, 1)))
        .with_attribute_category(Dimension::new(CATEGORY, "Funding", ts(2018, 1, 1)));

    let service = service(&store, catalog.clone());
    let result = service.build_table(
        completeness_manager(&store, catalog).as_ref(),
        &full_update(ts(2023, 1, 1)),
    );

    match result {
        Err(BuildError::Configuration(ConfigurationError::DuplicateColumn(name))) => {
            assert_eq!(name, CATEGORY)
        }
        other => panic!("Expected duplicate column error, got {:?}", other),
    }
    assert!(completeness_tables(store.as_ref()).is_empty());
}

#[test]
fn test_new_registration_year_extends_master_view() {
    let store = seeded_store();
    register(store.as_ref(), PERIOD_2020_03, DISTRICT, date(2020, 4, 5), ts(2020, 4, 5));

    let service = service(&store, catalog());
    let manager = completeness_manager(&store, catalog());
    service.build_table(manager.as_ref(), &full_update(ts(2023, 1, 1))).unwrap();
    assert_eq!(master_rows(store.as_ref()).len(), 1);

    register(store.as_ref(), PERIOD_2022_01, NATIONAL, date(2022, 2, 1), ts(2023, 1, 3));
    let result = service
        .build_table(manager.as_ref(), &full_update(ts(2023, 2, 1)))
        .unwrap();

    assert!(result.tables_built[0]
        .partitions
        .iter()
        .all(|p| matches!(p.outcome, PartitionOutcome::Published { rows: 1 })));
    assert_eq!(master_rows(store.as_ref()).len(), 2);
}

#[test]
fn test_dimension_missing_from_resource_tables_is_configuration_error() {
    let store = seeded_store();
    seed_three_years(store.as_ref());

    let service = service(&store, catalog());
    let manager = completeness_manager(&store, catalog());
    service.build_table(manager.as_ref(), &full_update(ts(2023, 1, 1))).unwrap();

    // Added to the catalog without regenerating the resource tables
    let catalog = catalog().with_org_unit_group_set(Dimension::new(
        "Bpx0589u8y0",
        "Area",
        ts(2022, 1, 1),
    ));
    let result = service.build_table(
        completeness_manager(&store, catalog).as_ref(),
        &full_update(ts(2023, 2, 1)),
    );

    match result {
        Err(BuildError::Configuration(ConfigurationError::UnresolvedDimension(uid))) => {
            assert_eq!(uid, "Bpx0589u8y0")
        }
        other => panic!("Expected unresolved dimension error, got {:?}", other),
    }

    // Nothing was staged and the previous build is still served
    assert_eq!(completeness_tables(store.as_ref()), partition_names(store.as_ref()));
    assert_eq!(master_rows(store.as_ref()).len(), 3);
}
